//! Adaptive block-range scanner (§4.4) plus the event decode/route step (§4.5) that runs
//! inside each window.

use crate::byte_array::{Address20, Hash32};
use crate::db::{
    self, BlockTxRow, Db, LockEventRecord, UnlockEventRecord, WithdrawnEventRecord,
};
use crate::decode::{DecodedEvent, decode_log, known_topic0s};
use crate::dedup::{DedupCache, DedupKey};
use crate::error::IndexerError;
use crate::metrics::Metrics;
use crate::rpc::{RpcClient, looks_like_range_too_large, looks_like_transient};
use crate::timestamps::TimestampCache;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct Scanner {
    pub contract_address: Address20,
    pub contract_address_hex: String,
    pub deployed_block: u64,

    pub rpc: RpcClient,
    pub db: Db,

    /// Shared with the reorg-recovery task so a detected reorg can clear it out of band.
    pub dedup: Arc<Mutex<DedupCache>>,
    pub timestamps: TimestampCache,
    pub block_header_concurrency: usize,

    /// `W`.
    pub window: u64,
    /// `W_max`; 0 = unlimited.
    pub window_max: u64,
    /// `B`.
    pub blocks_behind: u64,
    pub auto_tune: bool,
}

impl Scanner {
    /// `indexUntilHead` (§4.4). `from_override` is set by the `reindex` CLI command;
    /// `update_cursor` is false for that command's dry-run replay.
    pub async fn index_until_head(
        &mut self,
        shutdown: &CancellationToken,
        from_override: Option<u64>,
        update_cursor: bool,
    ) -> Result<()> {
        let head = self
            .rpc
            .block_number()
            .await
            .context("fetch chain head")?;

        let mut from = match from_override {
            Some(f) => f,
            None => {
                let (_, last_indexed) =
                    db::get_or_init_cursor(&self.db, self.contract_address, self.deployed_block)
                        .await?;
                last_indexed
            }
        };

        let safe_head = head.saturating_sub(self.blocks_behind);

        while from < safe_head {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let to = (from + self.window - 1).min(safe_head);
            let window_width = to.saturating_sub(from) + 1;

            let started = Instant::now();
            let logs_result = self
                .rpc
                .get_logs(&self.contract_address_hex, from, to, &known_topic0s())
                .await;
            let elapsed = started.elapsed();

            let logs = match logs_result {
                Ok(logs) => logs,
                Err(err) => {
                    // §4.4(c): any getLogs failure resets W to 1 and aborts the cycle; the
                    // cursor is left untouched so the next invocation retries the same range.
                    let classified = if looks_like_range_too_large(&err) {
                        IndexerError::RangeTooLarge(err.to_string())
                    } else {
                        IndexerError::TransientRpc(err.to_string())
                    };
                    tracing::warn!(
                        error = %classified,
                        from,
                        to,
                        transient = looks_like_transient(&err),
                        "getLogs failed; resetting window to 1"
                    );
                    self.window = 1;
                    return Ok(());
                }
            };

            self.process_window(from, to, logs, update_cursor, shutdown)
                .await?;

            let pending_blocks = safe_head.saturating_sub(to);
            tracing::info!("window from={from} to={to} pending-blocks={pending_blocks}");

            if self.auto_tune && window_width == self.window {
                self.window = tune_window(self.window, elapsed.as_secs_f64(), self.window_max);
            }

            from = to;
        }

        Ok(())
    }

    async fn process_window(
        &mut self,
        from: u64,
        to: u64,
        logs: Vec<alloy::rpc::types::Log>,
        update_cursor: bool,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let mut survivors = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(tx_hash) = log.transaction_hash else {
                continue;
            };
            let Some(block_hash) = log.block_hash else {
                continue;
            };
            let Some(log_index) = log.log_index else {
                continue;
            };
            let key = DedupKey::new(
                Hash32(tx_hash.0),
                Hash32(block_hash.0),
                u32::try_from(log_index).unwrap_or(u32::MAX),
            );
            if self.dedup.lock().await.contains(&key) {
                continue;
            }
            survivors.push((log, key));
        }

        if survivors.is_empty() {
            if update_cursor {
                db::set_cursor(&self.db.pool, self.contract_address, to).await?;
            }
            return Ok(());
        }

        let block_numbers: Vec<u64> = survivors
            .iter()
            .filter_map(|(log, _)| log.block_number)
            .collect();
        crate::timestamps::populate_timestamps(
            shutdown,
            &self.rpc,
            &mut self.timestamps,
            &block_numbers,
            self.block_header_concurrency,
        )
        .await?;

        let mut block_txs: HashMap<Hash32, BlockTxRow> = HashMap::new();
        let mut locks = Vec::new();
        let mut unlocks = Vec::new();
        let mut withdrawns = Vec::new();
        let mut inserted_keys = Vec::new();

        for (log, key) in &survivors {
            let (Some(tx_hash), Some(block_hash), Some(block_number), Some(log_index)) = (
                log.transaction_hash,
                log.block_hash,
                log.block_number,
                log.log_index,
            ) else {
                continue;
            };
            let log_index = u32::try_from(log_index).unwrap_or(u32::MAX);

            let Some(decoded) = decode_log(log) else {
                let err = IndexerError::DecodeError(format!(
                    "log did not match any known event ABI (tx={tx_hash}, log_index={log_index})"
                ));
                tracing::error!(error = %err, "skipping undecodable log");
                continue;
            };

            let ts_secs = self.timestamps.get(block_number).unwrap_or(0);
            let timestamp = timestamp_from_secs(ts_secs);

            block_txs
                .entry(Hash32(tx_hash.0))
                .or_insert_with(|| BlockTxRow {
                    tx_hash: Hash32(tx_hash.0),
                    block_hash: Hash32(block_hash.0),
                    block_number,
                    block_timestamp: timestamp,
                    confirmed: false,
                });

            match decoded {
                DecodedEvent::Lock { holder, amount } => locks.push(LockEventRecord {
                    tx_hash: Hash32(tx_hash.0),
                    log_index,
                    holder: Address20(holder.into_array()),
                    amount,
                    timestamp,
                }),
                DecodedEvent::Unlock {
                    holder,
                    unlock_index,
                    amount,
                } => unlocks.push(UnlockEventRecord {
                    tx_hash: Hash32(tx_hash.0),
                    log_index,
                    holder: Address20(holder.into_array()),
                    unlock_index,
                    amount,
                    timestamp,
                }),
                DecodedEvent::Withdrawn {
                    holder,
                    unlock_index,
                    amount,
                } => withdrawns.push(WithdrawnEventRecord {
                    tx_hash: Hash32(tx_hash.0),
                    log_index,
                    holder: Address20(holder.into_array()),
                    unlock_index,
                    amount,
                    timestamp,
                }),
            }

            inserted_keys.push(*key);
        }

        let mut tx = self.db.pool.begin().await.context("begin window tx")?;
        for row in block_txs.values() {
            db::upsert_block_tx(&mut *tx, row).await?;
        }
        let locks_inserted = db::bulk_insert_lock_events(&mut *tx, &locks).await?;
        let unlocks_inserted = db::bulk_insert_unlock_events(&mut *tx, &unlocks).await?;
        let withdrawns_inserted = db::bulk_insert_withdrawn_events(&mut *tx, &withdrawns).await?;
        if update_cursor {
            db::set_cursor(&mut *tx, self.contract_address, to).await?;
        }
        tx.commit().await.context("commit window tx")?;

        let metrics = Metrics::get();
        metrics
            .rows_inserted
            .with_label_values(&["lock_event"])
            .inc_by(locks_inserted);
        metrics
            .rows_inserted
            .with_label_values(&["unlock_event"])
            .inc_by(unlocks_inserted);
        metrics
            .rows_inserted
            .with_label_values(&["withdrawn_event"])
            .inc_by(withdrawns_inserted);
        if update_cursor {
            metrics
                .chain_position
                .with_label_values(&[self.contract_address_hex.as_str()])
                .set(to as i64);
        }

        let mut dedup = self.dedup.lock().await;
        for key in inserted_keys {
            dedup.insert(key);
        }
        drop(dedup);

        Ok(())
    }
}

fn timestamp_from_secs(secs: u64) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::try_from(secs).unwrap_or(0), 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
}

/// §4.4(f): auto-tunes `W` from the wall-clock latency `Δ` of the just-completed window.
pub fn tune_window(current: u64, delta_secs: f64, window_max: u64) -> u64 {
    let mut w = current;
    if delta_secs > 30.0 {
        w = (w / 2).max(1);
    } else if delta_secs > 10.0 {
        w = w.saturating_sub(20).max(1);
    } else if delta_secs < 2.0 {
        w = w.saturating_mul(2);
    } else if delta_secs < 5.0 {
        w = w + 20;
    }
    if window_max > 0 {
        w = w.min(window_max);
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_window_when_very_slow() {
        assert_eq!(tune_window(100, 31.0, 0), 50);
    }

    #[test]
    fn shrinks_by_twenty_when_slow() {
        assert_eq!(tune_window(100, 15.0, 0), 80);
    }

    #[test]
    fn doubles_window_when_very_fast() {
        assert_eq!(tune_window(51, 0.5, 150), 102);
    }

    #[test]
    fn grows_by_twenty_when_fast() {
        assert_eq!(tune_window(50, 3.0, 0), 70);
    }

    #[test]
    fn leaves_window_unchanged_in_middle_band() {
        assert_eq!(tune_window(50, 7.0, 0), 50);
    }

    #[test]
    fn never_drops_below_one() {
        assert_eq!(tune_window(1, 31.0, 0), 1);
        assert_eq!(tune_window(5, 15.0, 0), 1);
    }

    #[test]
    fn clamps_to_window_max_after_doubling() {
        assert_eq!(tune_window(100, 0.5, 150), 150);
    }

    #[test]
    fn window_max_zero_means_unlimited() {
        assert_eq!(tune_window(1_000_000, 0.1, 0), 2_000_000);
    }
}
