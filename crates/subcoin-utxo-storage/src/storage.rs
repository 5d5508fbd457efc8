//! Coins database implementation using RocksDB.

use crate::keys::{key_to_outpoint, outpoint_to_key};
use crate::{Error, Result, cf, meta_keys};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint};
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::collections::HashMap;
use std::path::Path;
use subcoin_coins_cache::{BestBlock, Coin, CoinChange, CoinsBatch, CoinsView};

const LOG_TARGET: &str = "utxo-storage";

/// Coins database serving as the base view of the coins cache.
///
/// Coins and the tip they reflect are only ever modified together, through
/// [`CoinsView::batch_write`].
pub struct CoinsDb {
    /// RocksDB instance.
    db: DB,
    /// Tip of the stored coins, `None` until the first commit.
    best_block: RwLock<Option<BestBlock>>,
    /// Total UTXO count.
    utxo_count: RwLock<u64>,
}

impl CoinsDb {
    /// Open or create the coins database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Point lookups dominate the read-through workload.
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(cf::UTXOS, Options::default()),
            ColumnFamilyDescriptor::new(cf::META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let best_block = Self::load_best_block(&db)?;
        let utxo_count = Self::load_utxo_count(&db)?;

        match best_block {
            Some(best_block) => tracing::info!(
                target: LOG_TARGET,
                "Opened coins database at {best_block}, {utxo_count} UTXOs"
            ),
            None => tracing::info!(target: LOG_TARGET, "Opened empty coins database"),
        }

        Ok(Self {
            db,
            best_block: RwLock::new(best_block),
            utxo_count: RwLock::new(utxo_count),
        })
    }

    /// Create a database in a fresh temporary directory for testing.
    ///
    /// The directory is removed once the returned guard is dropped.
    #[cfg(test)]
    pub fn open_temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let db = Self::open(temp_dir.path())?;
        Ok((db, temp_dir))
    }

    /// Get a UTXO by outpoint.
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<Coin>> {
        let cf = self.cf(cf::UTXOS)?;

        self.db
            .get_pinned_cf(cf, outpoint_to_key(outpoint))?
            .map(|bytes| {
                bincode::deserialize::<Coin>(&bytes)
                    .map_err(|err| Error::Deserialization(err.to_string()))
            })
            .transpose()
    }

    /// Check if a UTXO exists.
    pub fn contains(&self, outpoint: &OutPoint) -> Result<bool> {
        let cf = self.cf(cf::UTXOS)?;
        Ok(self
            .db
            .get_pinned_cf(cf, outpoint_to_key(outpoint))?
            .is_some())
    }

    /// Returns every stored coin in key order.
    pub fn coins(&self) -> Result<Vec<(OutPoint, Coin)>> {
        let cf = self.cf(cf::UTXOS)?;

        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| -> Result<(OutPoint, Coin)> {
                let (key, value) = item?;
                let outpoint = key_to_outpoint(&key).ok_or_else(|| {
                    Error::Deserialization(format!("Invalid UTXO key length {}", key.len()))
                })?;
                let coin = bincode::deserialize::<Coin>(&value)
                    .map_err(|err| Error::Deserialization(err.to_string()))?;
                Ok((outpoint, coin))
            })
            .collect()
    }

    /// Get the tip of the stored coins.
    pub fn best_block(&self) -> Option<BestBlock> {
        *self.best_block.read()
    }

    /// Get the current UTXO count.
    pub fn utxo_count(&self) -> u64 {
        *self.utxo_count.read()
    }

    /// Apply `batch` and move the tip to `best_block` in a single atomic write.
    pub fn write(&self, batch: CoinsBatch, best_block: BestBlock) -> Result<()> {
        let cf_utxos = self.cf(cf::UTXOS)?;
        let cf_meta = self.cf(cf::META)?;

        let mut write_batch = WriteBatch::default();
        let mut utxo_count = *self.utxo_count.read();
        let (writes, erases) = (batch.write_count(), batch.erase_count());

        // Existence of outpoints already touched by this batch.
        let mut pending: HashMap<OutPoint, bool> = HashMap::new();

        for (outpoint, change) in batch {
            let key = outpoint_to_key(&outpoint);

            let existed = match (pending.get(&outpoint), &change) {
                (Some(existed), _) => *existed,
                (None, CoinChange::Put { fresh: true, .. }) => false,
                (None, _) => self.db.get_pinned_cf(cf_utxos, key)?.is_some(),
            };

            match change {
                CoinChange::Put { coin, .. } => {
                    write_batch.put_cf(cf_utxos, key, bincode::serialize(&coin)?);
                    if !existed {
                        utxo_count += 1;
                    }
                    pending.insert(outpoint, true);
                }
                CoinChange::Erase => {
                    write_batch.delete_cf(cf_utxos, key);
                    if existed {
                        utxo_count = utxo_count.saturating_sub(1);
                    }
                    pending.insert(outpoint, false);
                }
            }
        }

        write_batch.put_cf(cf_meta, meta_keys::BEST_HASH, best_block.hash.to_byte_array());
        write_batch.put_cf(cf_meta, meta_keys::HEIGHT, best_block.height.to_le_bytes());
        write_batch.put_cf(cf_meta, meta_keys::UTXO_COUNT, utxo_count.to_le_bytes());

        // Atomic write
        self.db.write(write_batch)?;

        *self.best_block.write() = Some(best_block);
        *self.utxo_count.write() = utxo_count;

        tracing::debug!(
            target: LOG_TARGET,
            writes,
            erases,
            utxo_count,
            "Committed coins batch at {best_block}"
        );

        Ok(())
    }

    // --- Private helper methods ---

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or(Error::NotInitialized)
    }

    fn load_best_block(db: &DB) -> Result<Option<BestBlock>> {
        let Some(cf) = db.cf_handle(cf::META) else {
            return Ok(None);
        };

        let Some(hash) = db.get_cf(cf, meta_keys::BEST_HASH)? else {
            return Ok(None);
        };

        let hash: [u8; 32] = hash
            .try_into()
            .map_err(|_| Error::Deserialization("Invalid best block hash length".to_string()))?;

        let height = match db.get_cf(cf, meta_keys::HEIGHT)? {
            Some(bytes) => u32::from_le_bytes(bytes.try_into().map_err(|_| {
                Error::Deserialization("Invalid best block height length".to_string())
            })?),
            None => return Err(Error::Deserialization("Missing best block height".to_string())),
        };

        Ok(Some(BestBlock::new(BlockHash::from_byte_array(hash), height)))
    }

    fn load_utxo_count(db: &DB) -> Result<u64> {
        let Some(cf) = db.cf_handle(cf::META) else {
            return Ok(0);
        };

        match db.get_cf(cf, meta_keys::UTXO_COUNT)? {
            Some(bytes) => Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| {
                Error::Deserialization("Invalid UTXO count length".to_string())
            })?)),
            None => Ok(0),
        }
    }
}

impl CoinsView for CoinsDb {
    fn get_coin(&mut self, outpoint: &OutPoint) -> subcoin_coins_cache::Result<Option<Coin>> {
        self.get(outpoint).map_err(|err| match err {
            Error::Deserialization(reason) => subcoin_coins_cache::Error::CorruptEntry {
                outpoint: *outpoint,
                reason,
            },
            err => err.into(),
        })
    }

    fn best_block(&self) -> Option<BestBlock> {
        CoinsDb::best_block(self)
    }

    fn batch_write(
        &mut self,
        batch: CoinsBatch,
        best_block: BestBlock,
    ) -> subcoin_coins_cache::Result<()> {
        self.write(batch, best_block).map_err(Into::into)
    }
}
