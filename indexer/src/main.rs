use anyhow::{Context, Result};
use clap::Parser;
use indexer::cli::{Cli, Command};
use indexer::{byte_array, config, db, dedup, leaderboard, rpc, runner, scanner, timestamps};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(err = ?e, "indexer exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config()?;

    match cli.command {
        Some(Command::SetupService) => {
            let db = db::Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
            db.migrate().await?;
            tracing::info!("migrations applied");
            Ok(())
        }
        Some(Command::Reindex {
            from_block,
            block_process_limit,
        }) => reindex(cfg, from_block, block_process_limit).await,
        Some(Command::Leaderboard {
            limit,
            offset,
            holder,
        }) => print_leaderboard(cfg, limit, offset, holder).await,
        None => serve(cfg).await,
    }
}

async fn print_leaderboard(
    cfg: config::AppConfig,
    limit: i64,
    offset: i64,
    holder: Option<String>,
) -> Result<()> {
    let db = db::Db::connect(&cfg.database_url, cfg.db_max_connections).await?;

    let rows = if let Some(holder) = holder {
        let address =
            byte_array::Address20::from_str(&holder).context("parse --holder address")?;
        leaderboard::holder_totals(&db.pool, address)
            .await?
            .into_iter()
            .collect::<Vec<_>>()
    } else {
        leaderboard::leaderboard(&db.pool, limit, offset).await?
    };

    let json: Vec<_> = rows
        .iter()
        .map(|r| {
            serde_json::json!({
                "position": r.position,
                "holder": format!("0x{}", hex::encode(r.holder.0)),
                "lockedAmount": r.locked_amount.to_string(),
                "unlockedAmount": r.unlocked_amount.to_string(),
                "withdrawnAmount": r.withdrawn_amount.to_string(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn reindex(
    cfg: config::AppConfig,
    from_block: u64,
    block_process_limit: Option<u64>,
) -> Result<()> {
    let db = db::Db::connect(&cfg.database_url, cfg.db_max_connections).await?;
    db.migrate().await?;

    let contract_address = byte_array::Address20::from_str(&cfg.scanner.contract_address)
        .context("parse INDEXER_CONTRACT_ADDRESS")?;
    let rpc = rpc::RpcClient::new(cfg.scanner.rpc.urls.clone()).context("build rpc client")?;

    let mut scanner = scanner::Scanner {
        contract_address,
        contract_address_hex: cfg.scanner.contract_address.clone(),
        deployed_block: cfg.scanner.deployed_block,
        rpc,
        db,
        dedup: Arc::new(Mutex::new(dedup::DedupCache::new(40_000))),
        timestamps: timestamps::TimestampCache::new(cfg.block_timestamp_cache_size),
        block_header_concurrency: cfg.scanner.block_header_concurrency,
        window: block_process_limit.unwrap_or(cfg.scanner.block_process_limit),
        window_max: cfg.scanner.block_process_limit_max,
        blocks_behind: cfg.scanner.blocks_behind,
        auto_tune: block_process_limit.is_none() && cfg.scanner.auto_block_process_limit,
    };

    let shutdown = CancellationToken::new();
    scanner
        .index_until_head(&shutdown, Some(from_block), false)
        .await?;

    tracing::info!(from_block, "reindex replay complete");
    Ok(())
}

async fn serve(cfg: config::AppConfig) -> Result<()> {
    tracing::info!("indexer starting");
    tracing::info!(
        contract = %cfg.scanner.contract_address,
        rpc_urls = cfg.scanner.rpc.urls.len(),
        deployed_block = cfg.scanner.deployed_block,
        "config loaded"
    );

    let shutdown = CancellationToken::new();

    let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();
    {
        let shutdown = shutdown.clone();
        join_set.spawn(async move { runner::run(cfg, shutdown).await });
    }

    tracing::info!("indexer started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("indexer task panicked")?;
                match res {
                    Ok(()) => fatal = Some(anyhow::anyhow!("indexer task exited unexpectedly")),
                    Err(e) => fatal = Some(e.context("indexer task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("indexer task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("indexer task failed"));
        }
    }

    fatal.map_or(Ok(()), Err)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
