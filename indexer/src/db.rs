use crate::byte_array::{Address20, Hash32};
use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::{
    ConnectOptions, PgPool, Postgres,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let opts = PgConnectOptions::from_str(database_url)
            .context("parse DATABASE_URL")?
            .log_statements(tracing::log::LevelFilter::Trace)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_millis(200));

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .context("connect to database")?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run database migrations")
    }
}

/// A row of `block_tx` (§3 `BlockTx`).
#[derive(Debug, Clone)]
pub struct BlockTxRow {
    pub tx_hash: Hash32,
    pub block_hash: Hash32,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct LockEventRecord {
    pub tx_hash: Hash32,
    pub log_index: u32,
    pub holder: Address20,
    pub amount: u128,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UnlockEventRecord {
    pub tx_hash: Hash32,
    pub log_index: u32,
    pub holder: Address20,
    pub unlock_index: u32,
    pub amount: u128,
    pub timestamp: DateTime<Utc>,
}

pub type WithdrawnEventRecord = UnlockEventRecord;

fn amount_to_decimal(amount: u128) -> BigDecimal {
    BigDecimal::from_str(&amount.to_string()).expect("u128 always parses as decimal")
}

/// Creates the `block_tx` row for a transaction if absent; no-op otherwise (§4.2 `upsertBlockTx`).
pub async fn upsert_block_tx<'e, E>(ex: E, row: &BlockTxRow) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "insert into block_tx (tx_hash, block_hash, block_number, block_timestamp, confirmed) \
         values ($1, $2, $3, $4, $5) \
         on conflict (tx_hash) do nothing",
    )
    .bind(row.tx_hash)
    .bind(row.block_hash)
    .bind(i64::try_from(row.block_number).context("block_number out of range")?)
    .bind(row.block_timestamp)
    .bind(row.confirmed)
    .execute(ex)
    .await
    .context("upsert block_tx")?;
    Ok(())
}

/// Inserts `Lock` events for one window, skipping rows that violate uniqueness (§4.2
/// `bulkInsertEvents`).
pub async fn bulk_insert_lock_events<'e, E>(ex: E, rows: &[LockEventRecord]) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = sqlx::QueryBuilder::new(
        "insert into lock_event (tx_hash, log_index, holder, amount, \"timestamp\") ",
    );
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.tx_hash);
        b.push_bind(i64::from(r.log_index));
        b.push_bind(r.holder);
        b.push_bind(amount_to_decimal(r.amount));
        b.push_bind(r.timestamp);
    });
    qb.push(" on conflict do nothing");
    let result = qb.build().execute(ex).await.context("insert lock_event")?;
    Ok(result.rows_affected())
}

/// Inserts `Unlock` events for one window (§4.2 `bulkInsertEvents`).
pub async fn bulk_insert_unlock_events<'e, E>(ex: E, rows: &[UnlockEventRecord]) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = sqlx::QueryBuilder::new(
        "insert into unlock_event (tx_hash, log_index, holder, unlock_index, amount, \"timestamp\") ",
    );
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.tx_hash);
        b.push_bind(i64::from(r.log_index));
        b.push_bind(r.holder);
        b.push_bind(i64::from(r.unlock_index));
        b.push_bind(amount_to_decimal(r.amount));
        b.push_bind(r.timestamp);
    });
    qb.push(" on conflict do nothing");
    let result = qb
        .build()
        .execute(ex)
        .await
        .context("insert unlock_event")?;
    Ok(result.rows_affected())
}

/// Inserts `Withdrawn` events for one window (§4.2 `bulkInsertEvents`).
pub async fn bulk_insert_withdrawn_events<'e, E>(
    ex: E,
    rows: &[WithdrawnEventRecord],
) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    if rows.is_empty() {
        return Ok(0);
    }
    let mut qb = sqlx::QueryBuilder::new(
        "insert into withdrawn_event (tx_hash, log_index, holder, unlock_index, amount, \"timestamp\") ",
    );
    qb.push_values(rows, |mut b, r| {
        b.push_bind(r.tx_hash);
        b.push_bind(i64::from(r.log_index));
        b.push_bind(r.holder);
        b.push_bind(i64::from(r.unlock_index));
        b.push_bind(amount_to_decimal(r.amount));
        b.push_bind(r.timestamp);
    });
    qb.push(" on conflict do nothing");
    let result = qb
        .build()
        .execute(ex)
        .await
        .context("insert withdrawn_event")?;
    Ok(result.rows_affected())
}

/// Reads `(deployedBlock, lastIndexedBlock)` for a contract, creating the cursor row at
/// `deployed_block` on first call (§9 open-question resolution — never at 0).
pub async fn get_or_init_cursor(
    db: &Db,
    contract_address: Address20,
    deployed_block: u64,
) -> Result<(u64, u64)> {
    let row: Option<(i64, i64)> = sqlx::query_as(
        "select deployed_block, last_indexed_block from indexer_cursor where contract_address = $1",
    )
    .bind(contract_address)
    .fetch_optional(&db.pool)
    .await
    .context("read indexer_cursor")?;

    if let Some((deployed, last_indexed)) = row {
        return Ok((
            u64::try_from(deployed).context("deployed_block out of range")?,
            u64::try_from(last_indexed).context("last_indexed_block out of range")?,
        ));
    }

    tracing::warn!(
        contract = %format!("0x{}", hex::encode(contract_address.0)),
        deployed_block,
        "no indexer cursor found; starting full-history scan from deployed_block"
    );

    sqlx::query(
        "insert into indexer_cursor (contract_address, deployed_block, last_indexed_block) \
         values ($1, $2, $2) on conflict (contract_address) do nothing",
    )
    .bind(contract_address)
    .bind(i64::try_from(deployed_block).context("deployed_block out of range")?)
    .execute(&db.pool)
    .await
    .context("initialize indexer_cursor")?;

    Ok((deployed_block, deployed_block))
}

/// Sets `lastIndexedBlock`, as part of a window transaction (§4.2 `setCursor`).
pub async fn set_cursor<'e, E>(ex: E, contract_address: Address20, last_indexed_block: u64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "update indexer_cursor set last_indexed_block = $2 where contract_address = $1",
    )
    .bind(contract_address)
    .bind(i64::try_from(last_indexed_block).context("last_indexed_block out of range")?)
    .execute(ex)
    .await
    .context("update indexer_cursor")?;
    Ok(())
}

/// Reads up to `limit` unconfirmed `block_tx` rows in ascending block order (§4.2
/// `unconfirmedBlocksAsc`).
pub async fn unconfirmed_blocks_asc(db: &Db, limit: u64) -> Result<Vec<BlockTxRow>> {
    let rows: Vec<(Hash32, Hash32, i64, DateTime<Utc>)> = sqlx::query_as(
        "select tx_hash, block_hash, block_number, block_timestamp from block_tx \
         where not confirmed order by block_number asc limit $1",
    )
    .bind(i64::try_from(limit).context("limit out of range")?)
    .fetch_all(&db.pool)
    .await
    .context("read unconfirmed block_tx")?;

    rows.into_iter()
        .map(|(tx_hash, block_hash, block_number, block_timestamp)| {
            Ok(BlockTxRow {
                tx_hash,
                block_hash,
                block_number: u64::try_from(block_number).context("block_number out of range")?,
                block_timestamp,
                confirmed: false,
            })
        })
        .collect()
}

/// Marks the given transactions confirmed (§4.2 `markConfirmed`). `confirmed` only ever
/// transitions false → true (§3 `BlockTx` invariant).
pub async fn mark_confirmed<'e, E>(ex: E, tx_hashes: &[Hash32]) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    if tx_hashes.is_empty() {
        return Ok(());
    }
    sqlx::query("update block_tx set confirmed = true where tx_hash = any($1)")
        .bind(tx_hashes)
        .execute(ex)
        .await
        .context("mark_confirmed")?;
    Ok(())
}

/// Deletes every `block_tx` (and, via cascade, every event) with `block_number >= n`, returning
/// the number of `block_tx` rows removed (§4.2 `deleteFromBlock`).
pub async fn delete_from_block<'e, E>(ex: E, n: u64) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("delete from block_tx where block_number >= $1")
        .bind(i64::try_from(n).context("block number out of range")?)
        .execute(ex)
        .await
        .context("delete_from_block")?;
    Ok(result.rows_affected())
}

/// Atomically clears everything from `n` onward and rewinds the cursor to `n` (§4.6
/// `recoverFromReorg`). Returns the number of `block_tx` rows deleted.
pub async fn recover_from_reorg(
    db: &Db,
    contract_address: Address20,
    reorg_block: u64,
) -> Result<u64> {
    let mut tx = db.pool.begin().await.context("begin reorg recovery tx")?;
    let deleted = delete_from_block(&mut *tx, reorg_block).await?;
    set_cursor(&mut *tx, contract_address, reorg_block).await?;
    tx.commit().await.context("commit reorg recovery tx")?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_to_decimal_roundtrips_u96_max() {
        let max_u96: u128 = (1u128 << 96) - 1;
        let d = amount_to_decimal(max_u96);
        assert_eq!(d.to_string(), max_u96.to_string());
    }
}
