//! Coins cache flushing into the RocksDB coins database.

use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};
use subcoin_coins_cache::{
    ChainstateCoins, Coin, CoinsCacheOptions, FlushMode, FlushOutcome, FlushReason, PointerWidth,
    PressureState,
};
use subcoin_utxo_storage::CoinsDb;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn random_outpoint() -> OutPoint {
    OutPoint::new(Txid::from_byte_array(std::array::from_fn(|_| fastrand::u8(..))), 0)
}

fn options() -> CoinsCacheOptions {
    CoinsCacheOptions::builder()
        .max_coins_cache_bytes(1024)
        .max_mempool_bytes(0)
        .pointer_width(PointerWidth::Bits64)
        .build()
}

#[test]
fn test_flush_persists_across_reopen() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let tip_hash = BlockHash::from_byte_array([3u8; 32]);

    let outpoints = {
        let chainstate = ChainstateCoins::new(CoinsDb::open(dir.path()).unwrap(), options());

        let outpoints = {
            let mut tip = chainstate.coins_tip();
            tip.set_best_block(tip_hash, 3);
            (0..5)
                .map(|i| {
                    let outpoint = random_outpoint();
                    tip.add_coin(outpoint, Coin::new(i, vec![1u8; 56], 3, false), false);
                    outpoint
                })
                .collect::<Vec<_>>()
        };

        assert_eq!(
            chainstate.flush_state_to_disk(FlushMode::IfNeeded, &0usize).unwrap(),
            FlushOutcome::Flushed {
                reason: FlushReason::Critical,
                state: PressureState::Ok,
            }
        );

        let tip = chainstate.coins_tip();
        assert_eq!(tip.base().utxo_count(), 5);
        assert_eq!(tip.cache_size(), 0);

        outpoints
    };

    let db = CoinsDb::open(dir.path()).unwrap();
    assert_eq!(db.utxo_count(), 5);
    assert_eq!(db.best_block().map(|tip| (tip.hash, tip.height)), Some((tip_hash, 3)));
    for (i, outpoint) in outpoints.iter().enumerate() {
        assert_eq!(db.get(outpoint).unwrap().map(|coin| coin.amount), Some(i as u64));
    }
}

#[test]
fn test_spend_reads_through_and_erases() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let chainstate = ChainstateCoins::new(CoinsDb::open(dir.path()).unwrap(), options());

    let (kept, spent) = (random_outpoint(), random_outpoint());
    {
        let mut tip = chainstate.coins_tip();
        tip.set_best_block(BlockHash::from_byte_array([1u8; 32]), 1);
        tip.add_coin(kept, Coin::new(1, vec![0x51; 25], 1, false), false);
        tip.add_coin(spent, Coin::new(2, vec![0x51; 25], 1, false), false);
    }
    chainstate
        .flush_state_to_disk(FlushMode::Always, &0usize)
        .unwrap();

    {
        let mut tip = chainstate.coins_tip();
        assert_eq!(tip.cache_size(), 0);

        // The coin is served by the database and then cached.
        assert_eq!(tip.spend_coin(&spent).unwrap().amount, 2);
        assert_eq!(tip.cache_size(), 1);
        assert_eq!(tip.dirty_count(), 1);

        tip.set_best_block(BlockHash::from_byte_array([2u8; 32]), 2);
    }

    assert!(matches!(
        chainstate.flush_state_to_disk(FlushMode::Always, &0usize).unwrap(),
        FlushOutcome::Flushed {
            reason: FlushReason::Always,
            ..
        }
    ));

    let tip = chainstate.coins_tip();
    let db = tip.base();
    assert_eq!(db.utxo_count(), 1);
    assert!(db.contains(&kept).unwrap());
    assert!(!db.contains(&spent).unwrap());
    assert_eq!(db.best_block().map(|tip| tip.height), Some(2));
}

#[test]
fn test_fresh_spend_never_touches_database() {
    let dir = tempfile::tempdir().unwrap();
    let chainstate = ChainstateCoins::new(CoinsDb::open(dir.path()).unwrap(), options());

    {
        let mut tip = chainstate.coins_tip();
        tip.set_best_block(BlockHash::from_byte_array([1u8; 32]), 1);
        let outpoint = random_outpoint();
        tip.add_coin(outpoint, Coin::new(1, vec![0x51; 25], 1, false), false);
        tip.spend_coin(&outpoint).unwrap();
    }

    chainstate
        .flush_state_to_disk(FlushMode::Always, &0usize)
        .unwrap();

    let tip = chainstate.coins_tip();
    assert_eq!(tip.base().utxo_count(), 0);
    assert!(tip.base().coins().unwrap().is_empty());
    assert_eq!(tip.base().best_block().map(|tip| tip.height), Some(1));
}
