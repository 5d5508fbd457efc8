//! In-memory coins view layered over a base view.

use crate::coin::Coin;
use crate::entry::CacheEntry;
use crate::memusage::{MemoryAccounting, NodeTableAccounting};
use crate::pressure::{PressureBudget, PressureState, classify};
use crate::view::{BestBlock, CoinChange, CoinsBatch, CoinsView};
use crate::{Error, Result};
use bitcoin::{BlockHash, OutPoint, Transaction};
use std::collections::HashMap;
use std::time::Instant;

const LOG_TARGET: &str = "coins-cache";

/// Snapshot of the cache composition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached entries, tombstones included.
    pub entries: usize,
    /// Entries that must be written on the next flush.
    pub dirty: usize,
    /// Entries known to be absent from the base view.
    pub fresh: usize,
    /// Tombstones awaiting their deletion in the base view.
    pub spent: usize,
    /// Estimated dynamic memory usage in bytes.
    pub memory_usage: usize,
}

/// Write-back cache of coins on top of a base [`CoinsView`].
///
/// Reads fall through to the base view and are cached as `Clean`. Mutations stay in memory
/// until [`Self::flush`] or [`Self::sync`] commits them in a single batch.
///
/// The memory estimate is maintained incrementally through `A`:
/// - `cached_coins_usage` sums the coin payloads of all entries.
/// - The table overhead is derived from the entry count and the bucket count, which only
///   grows until [`Self::reallocate`].
pub struct CoinsViewCache<V, A = NodeTableAccounting> {
    base: V,
    coins: HashMap<OutPoint, CacheEntry>,
    best_block: Option<BestBlock>,
    accounting: A,
    buckets: usize,
    cached_coins_usage: usize,
}

impl<V: CoinsView> CoinsViewCache<V> {
    /// Constructs a cache over `base` accounted for the compilation target.
    pub fn new(base: V) -> Self {
        Self::with_accounting(base, NodeTableAccounting::native())
    }
}

impl<V: CoinsView, A: MemoryAccounting> CoinsViewCache<V, A> {
    /// Constructs a cache over `base` using the given accounting policy.
    pub fn with_accounting(base: V, accounting: A) -> Self {
        let buckets = accounting.initial_buckets();
        Self {
            base,
            coins: HashMap::new(),
            best_block: None,
            accounting,
            buckets,
            cached_coins_usage: 0,
        }
    }

    /// Returns a reference to the base view.
    pub fn base(&self) -> &V {
        &self.base
    }

    /// Returns a mutable reference to the base view.
    ///
    /// Writing to the base directly bypasses the cache and may leave it stale.
    pub fn base_mut(&mut self) -> &mut V {
        &mut self.base
    }

    /// Returns the accounting policy.
    pub fn accounting(&self) -> &A {
        &self.accounting
    }

    /// Adds `coin` at `outpoint`.
    ///
    /// Unspendable outputs are silently ignored.
    ///
    /// # Panics
    ///
    /// Panics if an unspent coin is already cached at `outpoint` and `possible_overwrite` is
    /// not set.
    pub fn add_coin(&mut self, outpoint: OutPoint, coin: Coin, possible_overwrite: bool) {
        if coin.is_unspendable() {
            tracing::trace!(target: LOG_TARGET, "Skipping unspendable coin {outpoint}");
            return;
        }

        let Some(entry) =
            CacheEntry::after_add(self.coins.get(&outpoint), coin, possible_overwrite)
        else {
            panic!("Attempted to overwrite unspent coin {outpoint} without possible_overwrite");
        };

        self.insert_entry(outpoint, entry);
    }

    /// Adds every output of `tx` created at `height`.
    ///
    /// Coinbase outputs may always overwrite, two historical coinbase transactions share
    /// their txid. With `check_for_overwrite` the view is consulted for every output instead.
    pub fn add_coins(
        &mut self,
        tx: &Transaction,
        height: u32,
        check_for_overwrite: bool,
    ) -> Result<()> {
        let is_coinbase = tx.is_coinbase();
        let txid = tx.compute_txid();

        for (vout, txout) in tx.output.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            let overwrite = if check_for_overwrite {
                self.have_coin(&outpoint)?
            } else {
                is_coinbase
            };
            self.add_coin(outpoint, Coin::from_txout(txout, height, is_coinbase), overwrite);
        }

        Ok(())
    }

    /// Returns the unspent coin at `outpoint`, reading through to the base view on a miss.
    ///
    /// A coin served by the base view stays cached as `Clean` and counts toward the memory
    /// usage from then on.
    pub fn access_coin(&mut self, outpoint: &OutPoint) -> Result<Option<&Coin>> {
        self.fetch(outpoint)?;
        Ok(self.coins.get(outpoint).and_then(CacheEntry::coin))
    }

    /// Whether an unspent coin exists at `outpoint`, reading through on a miss.
    pub fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self.access_coin(outpoint)?.is_some())
    }

    /// Whether an unspent coin at `outpoint` is cached, never touching the base view.
    pub fn have_coin_in_cache(&self, outpoint: &OutPoint) -> bool {
        self.coins
            .get(outpoint)
            .is_some_and(|entry| entry.coin().is_some())
    }

    /// Spends the coin at `outpoint` and returns it.
    ///
    /// A `Fresh` coin is dropped outright, the base view never heard of it. Any other coin
    /// leaves a tombstone behind so the deletion reaches the base view on flush.
    ///
    /// # Panics
    ///
    /// Panics if there is no unspent coin at `outpoint` in the cache or the base view.
    pub fn spend_coin(&mut self, outpoint: &OutPoint) -> Result<Coin> {
        self.fetch(outpoint)?;

        let fresh = match self.coins.get(outpoint) {
            Some(CacheEntry::Spent) | None => {
                panic!("Attempted to spend missing coin {outpoint}")
            }
            Some(entry) => entry.is_fresh(),
        };

        let previous = if fresh {
            self.coins.remove(outpoint)
        } else {
            self.coins
                .get_mut(outpoint)
                .map(|entry| std::mem::replace(entry, CacheEntry::Spent))
        };

        let coin = previous
            .and_then(CacheEntry::into_coin)
            .expect("Entry is known to hold an unspent coin; qed");
        self.cached_coins_usage -= self.accounting.coin_usage(&coin);

        Ok(coin)
    }

    /// Drops the entry at `outpoint` if it is `Clean`, releasing its memory.
    pub fn uncache(&mut self, outpoint: &OutPoint) {
        if matches!(self.coins.get(outpoint), Some(CacheEntry::Clean(_))) {
            self.remove_entry(outpoint);
        }
    }

    /// Returns the tip of this view, falling back to the base view's.
    pub fn best_block(&self) -> Option<BestBlock> {
        self.best_block.or_else(|| self.base.best_block())
    }

    /// Moves the tip of this view.
    pub fn set_best_block(&mut self, hash: BlockHash, height: u32) {
        self.best_block = Some(BestBlock::new(hash, height));
    }

    /// Writes every modification to the base view, then evicts all entries.
    ///
    /// The bucket storage is retained, so the reported usage right after a flush is the
    /// empty table at its previous size. On failure the cache is left untouched.
    pub fn flush(&mut self) -> Result<()> {
        let started = Instant::now();
        let usage_before = self.dynamic_memory_usage();
        let (writes, erases) = self.write_back()?;

        let evicted = self.coins.len();
        self.coins.clear();
        self.cached_coins_usage = 0;

        tracing::debug!(
            target: LOG_TARGET,
            writes,
            erases,
            evicted,
            usage_before,
            usage_after = self.dynamic_memory_usage(),
            elapsed = ?started.elapsed(),
            "Flushed coins cache"
        );

        Ok(())
    }

    /// Writes every modification to the base view, keeping the surviving entries as `Clean`.
    pub fn sync(&mut self) -> Result<()> {
        let started = Instant::now();
        let usage_before = self.dynamic_memory_usage();
        let (writes, erases) = self.write_back()?;

        let mut tombstones = 0usize;
        self.coins.retain(|_, entry| {
            let keep = entry.settle();
            tombstones += usize::from(!keep);
            keep
        });

        tracing::debug!(
            target: LOG_TARGET,
            writes,
            erases,
            tombstones,
            entries = self.coins.len(),
            usage_before,
            usage_after = self.dynamic_memory_usage(),
            elapsed = ?started.elapsed(),
            "Synced coins cache"
        );

        Ok(())
    }

    /// Releases the bucket storage of an empty cache.
    ///
    /// # Panics
    ///
    /// Panics if the cache still holds entries.
    pub fn reallocate(&mut self) {
        assert!(
            self.coins.is_empty(),
            "Coins cache must be flushed before reallocating"
        );
        self.coins = HashMap::new();
        self.buckets = self.accounting.initial_buckets();
        self.cached_coins_usage = 0;
    }

    /// Estimated dynamic memory usage of the cache in bytes.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.accounting.table_usage(self.coins.len(), self.buckets) + self.cached_coins_usage
    }

    /// Classifies the current usage against `budget`.
    pub fn pressure_state(&self, pool_usage: usize, budget: &PressureBudget) -> PressureState {
        classify(self.dynamic_memory_usage(), pool_usage, budget)
    }

    /// Number of cached entries, tombstones included.
    pub fn cache_size(&self) -> usize {
        self.coins.len()
    }

    /// Returns `true` if a flush has nothing to hand to the base view.
    ///
    /// The cache holds no entry and its tip, if any, is already the tip of the base view.
    pub fn is_flushed(&self) -> bool {
        self.coins.is_empty()
            && self
                .best_block
                .map_or(true, |tip| self.base.best_block() == Some(tip))
    }

    /// Number of entries awaiting a write to the base view.
    pub fn dirty_count(&self) -> usize {
        self.coins.values().filter(|entry| entry.is_dirty()).count()
    }

    /// Current bucket count of the modelled table.
    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    /// Returns the cached entry at `outpoint` without reading through.
    pub fn entry(&self, outpoint: &OutPoint) -> Option<&CacheEntry> {
        self.coins.get(outpoint)
    }

    /// Counts the cached entries by state.
    pub fn stats(&self) -> CacheStats {
        self.coins.values().fold(
            CacheStats {
                entries: self.coins.len(),
                memory_usage: self.dynamic_memory_usage(),
                ..Default::default()
            },
            |mut stats, entry| {
                stats.dirty += usize::from(entry.is_dirty());
                stats.fresh += usize::from(entry.is_fresh());
                stats.spent += usize::from(entry.is_spent());
                stats
            },
        )
    }

    /// Verifies the incrementally maintained accounting against a full recount.
    ///
    /// # Panics
    ///
    /// Panics if the bookkeeping has drifted.
    pub fn sanity_check(&self) {
        let recomputed: usize = self
            .coins
            .values()
            .map(|entry| entry.coin_usage(&self.accounting))
            .sum();

        assert_eq!(
            recomputed, self.cached_coins_usage,
            "Cached coins usage drifted from the cache contents"
        );
        assert!(
            self.buckets >= self.accounting.initial_buckets(),
            "Bucket count fell below the initial table size"
        );
    }

    /// Loads the coin at `outpoint` from the base view unless an entry is already cached.
    fn fetch(&mut self, outpoint: &OutPoint) -> Result<()> {
        if self.coins.contains_key(outpoint) {
            return Ok(());
        }

        match self.base.get_coin(outpoint)? {
            Some(coin) => {
                self.insert_entry(*outpoint, CacheEntry::Clean(coin));
            }
            None => {
                tracing::trace!(target: LOG_TARGET, "Coin {outpoint} not found in base view");
            }
        }

        Ok(())
    }

    fn insert_entry(&mut self, outpoint: OutPoint, entry: CacheEntry) {
        if !self.coins.contains_key(&outpoint) {
            self.buckets = self
                .accounting
                .reserve_buckets(self.buckets, self.coins.len() + 1);
        }

        self.cached_coins_usage += entry.coin_usage(&self.accounting);
        if let Some(previous) = self.coins.insert(outpoint, entry) {
            self.cached_coins_usage -= previous.coin_usage(&self.accounting);
        }
    }

    fn remove_entry(&mut self, outpoint: &OutPoint) -> Option<CacheEntry> {
        let entry = self.coins.remove(outpoint)?;
        self.cached_coins_usage -= entry.coin_usage(&self.accounting);
        Some(entry)
    }

    /// Commits all dirty entries to the base view, returning the written and erased counts.
    fn write_back(&mut self) -> Result<(usize, usize)> {
        let best_block = self.best_block().ok_or(Error::MissingBestBlock)?;

        let mut batch = CoinsBatch::new();
        for (outpoint, entry) in &self.coins {
            match entry {
                CacheEntry::Clean(_) => {}
                CacheEntry::Dirty(coin) => batch.put(*outpoint, coin.clone(), false),
                CacheEntry::Fresh(coin) => batch.put(*outpoint, coin.clone(), true),
                CacheEntry::Spent => batch.erase(*outpoint),
            }
        }

        let counts = (batch.write_count(), batch.erase_count());

        self.base
            .batch_write(batch, best_block)
            .inspect_err(|err| {
                tracing::warn!(
                    target: LOG_TARGET,
                    "Failed to write {} coins and erase {} at {best_block}: {err}",
                    counts.0,
                    counts.1,
                )
            })?;

        self.best_block = Some(best_block);

        Ok(counts)
    }

    /// Merges a change flushed by a child cache into this one.
    fn merge_change(&mut self, outpoint: OutPoint, change: CoinChange) {
        let merged = match (self.coins.get(&outpoint), change) {
            (None, CoinChange::Put { coin, fresh: true }) => Some(CacheEntry::Fresh(coin)),
            (None, CoinChange::Put { coin, fresh: false }) => Some(CacheEntry::Dirty(coin)),
            // The child may have read the coin from further down, keep the deletion going.
            (None, CoinChange::Erase) => Some(CacheEntry::Spent),
            (Some(CacheEntry::Fresh(_)), CoinChange::Erase) => None,
            (Some(_), CoinChange::Erase) => Some(CacheEntry::Spent),
            (Some(entry), CoinChange::Put { fresh: true, .. }) if !entry.is_spent() => {
                panic!("Child cache claims coin {outpoint} is fresh but it is unspent here")
            }
            (Some(CacheEntry::Fresh(_)), CoinChange::Put { coin, .. }) => {
                Some(CacheEntry::Fresh(coin))
            }
            (Some(_), CoinChange::Put { coin, .. }) => Some(CacheEntry::Dirty(coin)),
        };

        match merged {
            Some(entry) => self.insert_entry(outpoint, entry),
            None => {
                self.remove_entry(&outpoint);
            }
        }
    }
}

impl<V: CoinsView, A: MemoryAccounting> CoinsView for CoinsViewCache<V, A> {
    fn get_coin(&mut self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        Ok(self.access_coin(outpoint)?.cloned())
    }

    fn have_coin(&mut self, outpoint: &OutPoint) -> Result<bool> {
        CoinsViewCache::have_coin(self, outpoint)
    }

    fn best_block(&self) -> Option<BestBlock> {
        CoinsViewCache::best_block(self)
    }

    fn batch_write(&mut self, batch: CoinsBatch, best_block: BestBlock) -> Result<()> {
        for (outpoint, change) in batch {
            self.merge_change(outpoint, change);
        }
        self.best_block = Some(best_block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memusage::PointerWidth;
    use crate::view::MemoryCoinsDb;
    use bitcoin::Txid;
    use bitcoin::hashes::Hash;

    fn outpoint(vout: u32) -> OutPoint {
        OutPoint::new(Txid::all_zeros(), vout)
    }

    fn coin(amount: u64) -> Coin {
        Coin::new(amount, vec![0u8; 56], 1, false)
    }

    fn new_cache() -> CoinsViewCache<MemoryCoinsDb> {
        CoinsViewCache::with_accounting(
            MemoryCoinsDb::new(),
            NodeTableAccounting::new(PointerWidth::Bits64),
        )
    }

    #[test]
    fn test_usage_tracks_adds_and_spends() {
        let mut cache = new_cache();
        assert_eq!(cache.dynamic_memory_usage(), 32);

        cache.add_coin(outpoint(0), coin(1), false);
        assert_eq!(cache.dynamic_memory_usage(), 336);

        cache.add_coin(outpoint(1), coin(2), false);
        assert_eq!(cache.dynamic_memory_usage(), 544);

        // Fresh spend removes the entry, the buckets stay.
        let spent = cache.spend_coin(&outpoint(1)).unwrap();
        assert_eq!(spent.amount, 2);
        assert_eq!(cache.dynamic_memory_usage(), 336);
        assert!(cache.entry(&outpoint(1)).is_none());

        cache.sanity_check();
    }

    #[test]
    fn test_spend_clean_leaves_tombstone() {
        let mut db = MemoryCoinsDb::new();
        db.insert(outpoint(0), coin(7));
        let mut cache =
            CoinsViewCache::with_accounting(db, NodeTableAccounting::new(PointerWidth::Bits64));

        assert_eq!(cache.access_coin(&outpoint(0)).unwrap().map(|c| c.amount), Some(7));
        assert_eq!(cache.entry(&outpoint(0)), Some(&CacheEntry::Clean(coin(7))));

        cache.spend_coin(&outpoint(0)).unwrap();
        assert_eq!(cache.entry(&outpoint(0)), Some(&CacheEntry::Spent));
        assert!(!cache.have_coin(&outpoint(0)).unwrap());
        // A tombstone still costs a node but no payload.
        assert_eq!(cache.dynamic_memory_usage(), 128 + 128);
        cache.sanity_check();
    }

    #[test]
    fn test_have_coin_in_cache_never_reads_through() {
        let mut db = MemoryCoinsDb::new();
        db.insert(outpoint(0), coin(7));
        let mut cache = CoinsViewCache::new(db);

        assert!(!cache.have_coin_in_cache(&outpoint(0)));
        assert_eq!(cache.base().stats().reads, 0);

        assert!(cache.have_coin(&outpoint(0)).unwrap());
        assert!(cache.have_coin_in_cache(&outpoint(0)));
        assert_eq!(cache.base().stats().reads, 1);
    }

    #[test]
    fn test_uncache_only_drops_clean_entries() {
        let mut db = MemoryCoinsDb::new();
        db.insert(outpoint(0), coin(7));
        let mut cache = new_cache();
        *cache.base_mut() = db;

        cache.access_coin(&outpoint(0)).unwrap();
        cache.add_coin(outpoint(1), coin(1), false);

        cache.uncache(&outpoint(0));
        cache.uncache(&outpoint(1));

        assert_eq!(cache.cache_size(), 1);
        assert!(cache.have_coin_in_cache(&outpoint(1)));
        cache.sanity_check();
    }

    #[test]
    fn test_stats() {
        let mut db = MemoryCoinsDb::new();
        db.insert(outpoint(0), coin(7));
        db.insert(outpoint(1), coin(8));
        let mut cache = new_cache();
        *cache.base_mut() = db;

        cache.access_coin(&outpoint(0)).unwrap();
        cache.spend_coin(&outpoint(1)).unwrap();
        cache.add_coin(outpoint(2), coin(1), false);
        cache.add_coin(outpoint(3), coin(1), true);

        let stats = cache.stats();
        assert_eq!(stats.entries, 4);
        assert_eq!(stats.dirty, 3);
        assert_eq!(stats.fresh, 1);
        assert_eq!(stats.spent, 1);
        assert_eq!(stats.memory_usage, cache.dynamic_memory_usage());
        assert_eq!(cache.dirty_count(), 3);
    }

    #[test]
    fn test_flush_without_tip_fails() {
        let mut cache = new_cache();
        cache.add_coin(outpoint(0), coin(1), false);

        assert!(matches!(cache.flush(), Err(Error::MissingBestBlock)));
        assert_eq!(cache.cache_size(), 1);
        assert_eq!(cache.base().stats().commits, 0);
    }

    #[test]
    fn test_best_block_falls_back_to_base() {
        let mut cache = new_cache();
        assert_eq!(cache.best_block(), None);

        let tip = BestBlock::new(BlockHash::all_zeros(), 5);
        cache.base_mut().batch_write(CoinsBatch::new(), tip).unwrap();
        assert_eq!(cache.best_block(), Some(tip));

        cache.set_best_block(BlockHash::all_zeros(), 6);
        assert_eq!(cache.best_block().map(|tip| tip.height), Some(6));
    }

    #[test]
    fn test_is_flushed_tracks_entries_and_tip() {
        let mut cache = new_cache();
        assert!(cache.is_flushed());

        cache.set_best_block(BlockHash::all_zeros(), 1);
        assert!(!cache.is_flushed());

        cache.add_coin(outpoint(0), coin(1), false);
        cache.flush().unwrap();
        assert!(cache.is_flushed());

        // A tip move alone still has to reach the base view.
        cache.set_best_block(BlockHash::all_zeros(), 2);
        assert!(!cache.is_flushed());
        cache.flush().unwrap();
        assert!(cache.is_flushed());
        assert_eq!(cache.base().best_block().map(|tip| tip.height), Some(2));
    }

    #[test]
    #[should_panic(expected = "Coins cache must be flushed before reallocating")]
    fn test_reallocate_requires_empty_cache() {
        let mut cache = new_cache();
        cache.add_coin(outpoint(0), coin(1), false);
        cache.reallocate();
    }
}
