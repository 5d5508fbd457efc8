//! Coins view abstraction and the in-memory coins database.

use crate::coin::Coin;
use crate::{Error, Result};
use bitcoin::{BlockHash, OutPoint};
use std::collections::HashMap;

/// Ledger tip a coins view reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BestBlock {
    /// Block hash.
    pub hash: BlockHash,
    /// Block height.
    pub height: u32,
}

impl BestBlock {
    /// Constructs a new [`BestBlock`].
    pub fn new(hash: BlockHash, height: u32) -> Self {
        Self { hash, height }
    }
}

impl std::fmt::Display for BestBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{},{}", self.height, self.hash)
    }
}

/// Change to a single coin carried by a [`CoinsBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinChange {
    /// Write the coin.
    ///
    /// `fresh` is set when the writer knows the coin is absent from the receiving view.
    Put { coin: Coin, fresh: bool },
    /// Delete the coin.
    Erase,
}

/// Set of coin changes committed atomically together with a new tip.
#[derive(Debug, Clone, Default)]
pub struct CoinsBatch {
    changes: Vec<(OutPoint, CoinChange)>,
    write_count: usize,
    erase_count: usize,
}

impl CoinsBatch {
    /// Constructs an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a write of `coin`.
    pub fn put(&mut self, outpoint: OutPoint, coin: Coin, fresh: bool) {
        self.write_count += 1;
        self.changes.push((outpoint, CoinChange::Put { coin, fresh }));
    }

    /// Queues a deletion.
    pub fn erase(&mut self, outpoint: OutPoint) {
        self.erase_count += 1;
        self.changes.push((outpoint, CoinChange::Erase));
    }

    /// Number of queued writes.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Number of queued deletions.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    /// Total number of queued changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the batch carries no change.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterates over the queued changes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(OutPoint, CoinChange)> {
        self.changes.iter()
    }
}

impl IntoIterator for CoinsBatch {
    type Item = (OutPoint, CoinChange);
    type IntoIter = std::vec::IntoIter<(OutPoint, CoinChange)>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

/// Read and write interface of a coins view.
///
/// Implemented by the durable coins database and by [`crate::CoinsViewCache`] itself,
/// which allows caches to be layered on top of each other.
pub trait CoinsView {
    /// Returns the unspent coin at `outpoint`, if any.
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>>;

    /// Whether an unspent coin exists at `outpoint`.
    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.get_coin(outpoint)?.is_some())
    }

    /// Returns the tip this view reflects, `None` if it has never been written.
    fn best_block(&self) -> Option<BestBlock>;

    /// Applies `batch` and moves the tip to `best_block`.
    ///
    /// Either every change and the new tip are applied or none are.
    fn batch_write(&mut self, batch: CoinsBatch, best_block: BestBlock) -> Result<()>;
}

impl<T: CoinsView + ?Sized> CoinsView for &mut T {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        (**self).get_coin(outpoint)
    }

    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        (**self).have_coin(outpoint)
    }

    fn best_block(&self) -> Option<BestBlock> {
        (**self).best_block()
    }

    fn batch_write(&mut self, batch: CoinsBatch, best_block: BestBlock) -> Result<()> {
        (**self).batch_write(batch, best_block)
    }
}

impl<T: CoinsView + ?Sized> CoinsView for Box<T> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        (**self).get_coin(outpoint)
    }

    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        (**self).have_coin(outpoint)
    }

    fn best_block(&self) -> Option<BestBlock> {
        (**self).best_block()
    }

    fn batch_write(&mut self, batch: CoinsBatch, best_block: BestBlock) -> Result<()> {
        (**self).batch_write(batch, best_block)
    }
}

/// Operation counters of a [`MemoryCoinsDb`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Number of point lookups served.
    pub reads: usize,
    /// Number of coins written.
    pub writes: usize,
    /// Number of coins deleted.
    pub erases: usize,
    /// Number of batches committed.
    pub commits: usize,
}

/// Coins database kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCoinsDb {
    coins: HashMap<OutPoint, Coin>,
    best_block: Option<BestBlock>,
    stats: DbStats,
    fail_next_commit: bool,
}

impl MemoryCoinsDb {
    /// Constructs an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a coin directly, bypassing batches and counters.
    pub fn insert(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    /// Returns the stored coin without touching the counters.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    /// Number of stored coins.
    pub fn len(&self) -> usize {
        self.coins.len()
    }

    /// Whether the database holds no coin.
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Operation counters.
    pub fn stats(&self) -> DbStats {
        self.stats
    }

    /// Makes the next [`CoinsView::batch_write`] fail without applying anything.
    pub fn fail_next_commit(&mut self) {
        self.fail_next_commit = true;
    }
}

impl CoinsView for MemoryCoinsDb {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        self.stats.reads += 1;
        Ok(self.coins.get(outpoint).cloned())
    }

    fn best_block(&self) -> Option<BestBlock> {
        self.best_block
    }

    fn batch_write(&mut self, batch: CoinsBatch, best_block: BestBlock) -> Result<()> {
        if std::mem::take(&mut self.fail_next_commit) {
            return Err(Error::Backend(format!(
                "commit of {} changes at {best_block} rejected",
                batch.len()
            )));
        }

        for (outpoint, change) in batch {
            match change {
                CoinChange::Put { coin, .. } => {
                    self.stats.writes += 1;
                    self.coins.insert(outpoint, coin);
                }
                CoinChange::Erase => {
                    self.stats.erases += 1;
                    self.coins.remove(&outpoint);
                }
            }
        }

        self.best_block = Some(best_block);
        self.stats.commits += 1;

        Ok(())
    }
}
