//! Coin record held by the coins cache.

use crate::memusage::{PointerWidth, script_heap_usage};
use bitcoin::TxOut;
use serde::{Deserialize, Serialize};

/// Maximum script length in bytes, longer scripts can never be spent.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

const OP_RETURN: u8 = 0x6a;

/// Unspent transaction output as seen by the coins cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Whether the coin is from a coinbase transaction.
    pub is_coinbase: bool,
    /// Transfer value in satoshis.
    pub amount: u64,
    // Block height at which this containing transaction was included.
    pub height: u32,
    /// Spending condition of the output.
    pub script_pubkey: Vec<u8>,
}

impl Coin {
    /// Constructs a new coin.
    pub fn new(amount: u64, script_pubkey: Vec<u8>, height: u32, is_coinbase: bool) -> Self {
        Self {
            is_coinbase,
            amount,
            height,
            script_pubkey,
        }
    }

    /// Constructs a coin from a transaction output created at `height`.
    pub fn from_txout(txout: &TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            is_coinbase,
            amount: txout.value.to_sat(),
            height,
            script_pubkey: txout.script_pubkey.as_bytes().to_vec(),
        }
    }

    /// Returns `true` if the output can never be spent.
    ///
    /// Such outputs are never added to the coins cache.
    pub fn is_unspendable(&self) -> bool {
        self.script_pubkey.first() == Some(&OP_RETURN) || self.script_pubkey.len() > MAX_SCRIPT_SIZE
    }

    /// Heap memory consumed by this coin on the native target.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.dynamic_memory_usage_for(PointerWidth::NATIVE)
    }

    /// Heap memory consumed by this coin for the given pointer width.
    ///
    /// Only the script can spill to the heap; amount, height and the coinbase flag are
    /// stored inline with the cache entry.
    pub fn dynamic_memory_usage_for(&self, width: PointerWidth) -> usize {
        script_heap_usage(width, self.script_pubkey.len())
    }
}
