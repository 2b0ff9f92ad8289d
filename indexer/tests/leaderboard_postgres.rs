//! Leaderboard aggregation arithmetic, against a real Postgres instance and a fixture of
//! Lock/Unlock/Withdrawn rows.

use bigdecimal::BigDecimal;
use chrono::Utc;
use indexer::byte_array::{Address20, Hash32};
use indexer::db::{self, BlockTxRow, Db, LockEventRecord, UnlockEventRecord};
use indexer::leaderboard;
use std::str::FromStr;

async fn test_db() -> Db {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let db = Db::connect(&url, 5).await.expect("connect");
    db.migrate().await.expect("migrate");
    db
}

async fn seed_block(db: &Db, tx: u8, block_number: u64) -> Hash32 {
    let tx_hash = Hash32([tx; 32]);
    let row = BlockTxRow {
        tx_hash,
        block_hash: Hash32([tx.wrapping_add(1); 32]),
        block_number,
        block_timestamp: Utc::now(),
        confirmed: false,
    };
    db::upsert_block_tx(&db.pool, &row).await.unwrap();
    tx_hash
}

#[tokio::test]
#[ignore]
async fn holder_totals_reflect_locked_minus_unlocked() {
    let db = test_db().await;
    let holder = Address20([42; 20]);

    let tx1 = seed_block(&db, 1, 1_000).await;
    db::bulk_insert_lock_events(
        &db.pool,
        &[LockEventRecord {
            tx_hash: tx1,
            log_index: 0,
            holder,
            amount: 5_000,
            timestamp: Utc::now(),
        }],
    )
    .await
    .unwrap();

    let tx2 = seed_block(&db, 2, 1_001).await;
    db::bulk_insert_unlock_events(
        &db.pool,
        &[UnlockEventRecord {
            tx_hash: tx2,
            log_index: 0,
            holder,
            unlock_index: 0,
            amount: 2_000,
            timestamp: Utc::now(),
        }],
    )
    .await
    .unwrap();

    let totals = leaderboard::holder_totals(&db.pool, holder)
        .await
        .unwrap()
        .expect("holder should have totals after locking and unlocking");

    assert_eq!(totals.locked_amount, BigDecimal::from_str("3000").unwrap());
    assert_eq!(totals.unlocked_amount, BigDecimal::from_str("2000").unwrap());
    assert_eq!(totals.withdrawn_amount, BigDecimal::from_str("0").unwrap());
}

#[tokio::test]
#[ignore]
async fn leaderboard_orders_by_locked_amount_descending() {
    let db = test_db().await;
    let big_holder = Address20([1; 20]);
    let small_holder = Address20([2; 20]);

    let tx_big = seed_block(&db, 3, 2_000).await;
    let tx_small = seed_block(&db, 4, 2_001).await;
    db::bulk_insert_lock_events(
        &db.pool,
        &[
            LockEventRecord {
                tx_hash: tx_big,
                log_index: 0,
                holder: big_holder,
                amount: 10_000,
                timestamp: Utc::now(),
            },
            LockEventRecord {
                tx_hash: tx_small,
                log_index: 0,
                holder: small_holder,
                amount: 1_000,
                timestamp: Utc::now(),
            },
        ],
    )
    .await
    .unwrap();

    let rows = leaderboard::leaderboard(&db.pool, 10, 0).await.unwrap();
    let big_pos = rows.iter().position(|r| r.holder == big_holder).unwrap();
    let small_pos = rows.iter().position(|r| r.holder == small_holder).unwrap();
    assert!(big_pos < small_pos, "larger locked amount should rank first");
}
