//! Durable coins database for the subcoin coins cache.
//!
//! ## Layout
//!
//! - **UTXOs**: one RocksDB entry per unspent output, keyed by outpoint
//! - **Meta**: the tip the stored coins reflect and the number of stored coins
//!
//! Every batch flushed by the coins cache lands in a single RocksDB `WriteBatch` together
//! with the new tip, so the database never reflects a partially applied flush.

mod error;
mod keys;
mod storage;

pub use error::Error;
pub use storage::CoinsDb;

/// Result type for coins database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Column family names for RocksDB.
mod cf {
    /// Column family for UTXO entries.
    /// Key: OutPoint (txid || vout) = 36 bytes
    /// Value: Coin (bincode)
    pub const UTXOS: &str = "utxos";

    /// Column family for metadata.
    pub const META: &str = "meta";
}

/// Metadata keys.
mod meta_keys {
    pub const BEST_HASH: &[u8] = b"best_hash";
    pub const HEIGHT: &[u8] = b"height";
    pub const UTXO_COUNT: &[u8] = b"utxo_count";
}
