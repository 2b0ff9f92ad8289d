//! Scheduler: runs the scanner loop and the reorg-detector loop as independently-leader-locked
//! tasks (§4.7), each on its own ticker, sharing one shutdown token.

use crate::config::AppConfig;
use crate::db::Db;
use crate::dedup::DedupCache;
use crate::error::IndexerError;
use crate::leader_lock;
use crate::metrics::Metrics;
use crate::rpc::RpcClient;
use crate::scanner::Scanner;
use crate::timestamps::TimestampCache;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Separate keys per task name, not per contract: the scan and reorg loops can run concurrently
// against the same contract, only same-task overlap is excluded.
const SCAN_LOCK_NAME: &str = "indexer.scan";
const REORG_LOCK_NAME: &str = "indexer.reorg";
const DEDUP_CACHE_CAPACITY: usize = 40_000;

pub async fn run(cfg: AppConfig, shutdown: CancellationToken) -> Result<()> {
    let db = Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
    db.migrate().await?;

    let contract_address = crate::byte_array::Address20::from_str(&cfg.scanner.contract_address)
        .context("parse INDEXER_CONTRACT_ADDRESS")?;

    let rpc = RpcClient::new(cfg.scanner.rpc.urls.clone()).context("build rpc client")?;
    let dedup = Arc::new(Mutex::new(DedupCache::new(DEDUP_CACHE_CAPACITY)));

    let scanner = Scanner {
        contract_address,
        contract_address_hex: cfg.scanner.contract_address.clone(),
        deployed_block: cfg.scanner.deployed_block,
        rpc: rpc.clone(),
        db: db.clone(),
        dedup: dedup.clone(),
        timestamps: TimestampCache::new(cfg.block_timestamp_cache_size),
        block_header_concurrency: cfg.scanner.block_header_concurrency,
        window: cfg.scanner.block_process_limit,
        window_max: cfg.scanner.block_process_limit_max,
        blocks_behind: cfg.scanner.blocks_behind,
        auto_tune: cfg.scanner.auto_block_process_limit,
    };

    let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();

    {
        let shutdown = shutdown.clone();
        let scan_interval = cfg.scanner.scan_interval;
        let lock_timeout = cfg.scanner.lock_timeout;
        let db = db.clone();
        join_set.spawn(async move { scan_loop(scanner, db, scan_interval, lock_timeout, shutdown).await });
    }

    {
        let shutdown = shutdown.clone();
        let scan_interval = cfg.scanner.scan_interval;
        let soft_timeout = cfg.scanner.soft_timeout;
        let confirmation_depth = cfg.scanner.reorg_blocks;
        let page_size = cfg.scanner.reorg_blocks_batch;
        let db = db.clone();
        let rpc = rpc.clone();
        join_set.spawn(async move {
            reorg_loop(
                db,
                rpc,
                dedup,
                contract_address,
                confirmation_depth,
                page_size,
                scan_interval,
                soft_timeout,
                shutdown,
            )
            .await
        });
    }

    tokio::select! {
        _ = shutdown.cancelled() => {},
        res = join_set.join_next() => {
            if let Some(res) = res {
                return res.context("scheduler task panicked")?;
            }
        }
    }

    while let Some(res) = join_set.join_next().await {
        let res = res.context("scheduler task panicked")?;
        if let Err(e) = res {
            warn!(err = %e, "task exited with error during shutdown");
        }
    }

    Ok(())
}

async fn scan_loop(
    mut scanner: Scanner,
    db: Db,
    scan_interval: Duration,
    lock_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut ticker = time::interval(scan_interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let Some(lock) = leader_lock::try_acquire(&db.pool, SCAN_LOCK_NAME).await? else {
            debug!(err = %IndexerError::LockContention(SCAN_LOCK_NAME.to_string()), "skipping scan tick");
            continue;
        };

        let result = time::timeout(
            lock_timeout,
            scanner.index_until_head(&shutdown, None, true),
        )
        .await;

        lock.release().await;

        match result {
            Ok(Ok(())) => {
                Metrics::get().window_size.set(scanner.window as i64);
            }
            Ok(Err(e)) => {
                Metrics::get().store_errors.inc();
                error!(err = %e, "scan iteration failed");
            }
            Err(_) => {
                warn!(timeout_secs = lock_timeout.as_secs(), "scan iteration exceeded lock timeout");
            }
        }
    }
}

async fn reorg_loop(
    db: Db,
    rpc: RpcClient,
    dedup: Arc<Mutex<DedupCache>>,
    contract_address: crate::byte_array::Address20,
    confirmation_depth: u64,
    page_size: u64,
    scan_interval: Duration,
    soft_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut ticker = time::interval(scan_interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        let Some(lock) = leader_lock::try_acquire(&db.pool, REORG_LOCK_NAME).await? else {
            debug!(err = %IndexerError::LockContention(REORG_LOCK_NAME.to_string()), "skipping reorg tick");
            continue;
        };

        let result = time::timeout(
            soft_timeout,
            crate::reorg::run_check_reorg(&db, &rpc, confirmation_depth, page_size),
        )
        .await;

        let reorg_at = match result {
            Ok(Ok(reorg_at)) => reorg_at,
            Ok(Err(e)) => {
                lock.release().await;
                error!(err = %e, "reorg check failed");
                continue;
            }
            Err(_) => {
                lock.release().await;
                warn!(timeout_secs = soft_timeout.as_secs(), "reorg check exceeded soft timeout");
                continue;
            }
        };

        if let Some(reorg_block) = reorg_at {
            warn!(reorg_block, "reorg detected; recovering");
            Metrics::get().reorgs_detected.inc();
            match crate::reorg::recover_from_reorg(&db, &dedup, contract_address, reorg_block)
                .await
            {
                Ok(deleted) => {
                    Metrics::get().reorg_rows_deleted.inc_by(deleted);
                    info!(reorg_block, deleted, "reorg recovery committed");
                }
                Err(e) => error!(err = %e, "reorg recovery failed"),
            }
        }

        lock.release().await;
    }
}
