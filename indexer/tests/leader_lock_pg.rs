//! Advisory-lock contention, against a real Postgres instance.

use indexer::leader_lock;
use sqlx::postgres::PgPoolOptions;

async fn pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect")
}

#[tokio::test]
#[ignore]
async fn second_acquire_is_rejected_while_first_holds_it() {
    let pool = pool().await;

    let first = leader_lock::try_acquire(&pool, "test.leader_lock.contention")
        .await
        .unwrap()
        .expect("first acquire should succeed");

    let second = leader_lock::try_acquire(&pool, "test.leader_lock.contention")
        .await
        .unwrap();
    assert!(second.is_none(), "lock is held by another session");

    first.release().await;

    let third = leader_lock::try_acquire(&pool, "test.leader_lock.contention")
        .await
        .unwrap();
    assert!(third.is_some(), "lock should be free after release");
}

#[tokio::test]
#[ignore]
async fn distinct_task_names_do_not_contend() {
    let pool = pool().await;

    let a = leader_lock::try_acquire(&pool, "test.leader_lock.task_a")
        .await
        .unwrap()
        .expect("acquire a");
    let b = leader_lock::try_acquire(&pool, "test.leader_lock.task_b")
        .await
        .unwrap();
    assert!(b.is_some(), "different task names use different lock keys");

    a.release().await;
    b.unwrap().release().await;
}
