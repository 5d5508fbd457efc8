
use crate::{Coin, CoinsView, CoinsViewCache, MemoryAccounting};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn random_outpoint() -> OutPoint {
    OutPoint::new(Txid::from_byte_array(std::array::from_fn(|_| fastrand::u8(..))), 0)
}

pub(crate) fn random_block_hash() -> BlockHash {
    BlockHash::from_byte_array(std::array::from_fn(|_| fastrand::u8(..)))
}

/// Coin whose script spills 56 bytes to the heap.
pub(crate) fn test_coin() -> Coin {
    Coin::new(fastrand::u32(..) as u64, vec![1u8; 56], 1, false)
}

/// Adds a fresh 56-byte script coin at a random outpoint.
pub(crate) fn add_coin<V: CoinsView, A: MemoryAccounting>(
    view: &mut CoinsViewCache<V, A>,
) -> OutPoint {
    let outpoint = random_outpoint();
    view.add_coin(outpoint, test_coin(), false);
    outpoint
}
