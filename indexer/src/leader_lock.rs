//! Single-runner lock (§4.7), adapted from the Postgres advisory-lock pattern used elsewhere in
//! the corpus for leader election across a fleet of otherwise-identical workers.

use anyhow::{Context, Result};
use sqlx::{PgPool, pool::PoolConnection, postgres::Postgres};

pub struct LockGuard {
    conn: PoolConnection<Postgres>,
    key: &'static str,
}

impl LockGuard {
    /// `pg_advisory_unlock` releases the session-scoped lock. Best-effort: if the connection is
    /// already gone, Postgres has already dropped the lock along with the session.
    pub async fn release(mut self) {
        let _ = sqlx::query("select pg_advisory_unlock(hashtextextended($1, 0))")
            .bind(self.key)
            .execute(&mut *self.conn)
            .await;
    }
}

/// Attempts to become the sole runner of `task_name`. Non-blocking: on contention this returns
/// `Ok(None)` immediately rather than waiting (§4.7 "blocking acquisition is disabled").
pub async fn try_acquire(pool: &PgPool, task_name: &'static str) -> Result<Option<LockGuard>> {
    let mut conn = pool
        .acquire()
        .await
        .context("acquire connection for leader lock")?;

    let acquired: bool = sqlx::query_scalar("select pg_try_advisory_lock(hashtextextended($1, 0))")
        .bind(task_name)
        .fetch_one(&mut *conn)
        .await
        .context("pg_try_advisory_lock")?;

    if !acquired {
        return Ok(None);
    }

    Ok(Some(LockGuard {
        conn,
        key: task_name,
    }))
}

#[cfg(test)]
mod tests {
    // Exercising `try_acquire`/`release` against a real contended lock requires a live Postgres
    // instance; see `tests/leader_lock_pg.rs` for the `#[ignore]`-gated integration test.
}
