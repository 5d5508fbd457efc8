//! Error types for the coins cache.

use bitcoin::OutPoint;

/// Errors that can occur while reading through or writing back the coins cache.
///
/// Contract violations by the caller (overwriting an unspent coin, spending a missing one)
/// are not represented here, they abort via panic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backing store failed to serve a read or commit a batch.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Backing store returned an entry that could not be decoded.
    #[error("Corrupt coin entry {outpoint}: {reason}")]
    CorruptEntry { outpoint: OutPoint, reason: String },

    /// Flush requested before any tip was known to the view.
    #[error("No best block set for the coins view")]
    MissingBestBlock,

    /// Error raised by a concrete storage implementation.
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}
