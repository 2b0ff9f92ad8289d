use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub urls: Vec<String>,
}

/// Tunables for the adaptive range scanner — `W`, `W_max`, `B` in the scanner's terms.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub contract_address: String,
    pub deployed_block: u64,

    pub rpc: RpcConfig,

    /// Initial `W`.
    pub block_process_limit: u64,
    /// Hard ceiling on `W`; 0 = unlimited.
    pub block_process_limit_max: u64,
    /// `B`: blocks behind head treated as the safe-to-fetch frontier.
    pub blocks_behind: u64,
    /// Enables the timing-based auto-tune step.
    pub auto_block_process_limit: bool,

    /// `C`: confirmation depth for the reorg detector.
    pub reorg_blocks: u64,
    /// `R`: page size for the unconfirmed-block scan.
    pub reorg_blocks_batch: u64,

    /// `K`: concurrent block-header fetches for timestamp enrichment.
    pub block_header_concurrency: usize,

    pub scan_interval: Duration,
    pub lock_timeout: Duration,
    pub soft_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,

    pub block_timestamp_cache_size: usize,

    pub scanner: ScannerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct BaseEnv {
    database_url: String,
    db_max_connections: u32,
    block_timestamp_cache_size: usize,
}

impl Default for BaseEnv {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            block_timestamp_cache_size: DEFAULT_BLOCK_TIMESTAMP_CACHE_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScannerEnv {
    #[serde(rename = "rpc_urls")]
    rpc_urls_raw: String,
    contract_address: String,
    deployed_block: u64,

    block_process_limit: Option<u64>,
    block_process_limit_max: Option<u64>,
    blocks_behind: Option<u64>,
    auto_block_process_limit: Option<bool>,

    reorg_blocks: Option<u64>,
    reorg_blocks_batch: Option<u64>,

    block_header_concurrency: Option<usize>,

    scan_interval_seconds: Option<u64>,
    lock_timeout_seconds: Option<u64>,
    soft_timeout_seconds: Option<u64>,
}

pub fn load_config() -> Result<AppConfig> {
    let base: BaseEnv = envy::from_env().context("load base env config")?;
    if base.database_url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }

    let scanner_env: ScannerEnv = envy::prefixed("INDEXER_")
        .from_env()
        .context("load INDEXER_* env config")?;

    let rpc_urls = parse_list(&scanner_env.rpc_urls_raw);
    if rpc_urls.is_empty() {
        anyhow::bail!("INDEXER_RPC_URLS must not be empty");
    }

    let scanner = ScannerConfig {
        contract_address: scanner_env.contract_address,
        deployed_block: scanner_env.deployed_block,
        rpc: RpcConfig { urls: rpc_urls },
        block_process_limit: scanner_env
            .block_process_limit
            .unwrap_or(DEFAULT_BLOCK_PROCESS_LIMIT)
            .max(1),
        block_process_limit_max: scanner_env
            .block_process_limit_max
            .unwrap_or(DEFAULT_BLOCK_PROCESS_LIMIT_MAX),
        blocks_behind: scanner_env.blocks_behind.unwrap_or(DEFAULT_BLOCKS_BEHIND),
        auto_block_process_limit: scanner_env.auto_block_process_limit.unwrap_or(true),
        reorg_blocks: scanner_env.reorg_blocks.unwrap_or(DEFAULT_REORG_BLOCKS),
        reorg_blocks_batch: scanner_env
            .reorg_blocks_batch
            .unwrap_or(DEFAULT_REORG_BLOCKS_BATCH)
            .max(1),
        block_header_concurrency: scanner_env
            .block_header_concurrency
            .unwrap_or(DEFAULT_BLOCK_HEADER_CONCURRENCY)
            .max(1),
        scan_interval: Duration::from_secs(
            scanner_env
                .scan_interval_seconds
                .unwrap_or(DEFAULT_SCAN_INTERVAL_SECONDS)
                .max(1),
        ),
        lock_timeout: Duration::from_secs(
            scanner_env
                .lock_timeout_seconds
                .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECONDS),
        ),
        soft_timeout: Duration::from_secs(
            scanner_env
                .soft_timeout_seconds
                .unwrap_or(DEFAULT_SOFT_TIMEOUT_SECONDS),
        ),
    };

    Ok(AppConfig {
        database_url: base.database_url,
        db_max_connections: base.db_max_connections,
        block_timestamp_cache_size: base.block_timestamp_cache_size.max(1),
        scanner,
    })
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_BLOCK_TIMESTAMP_CACHE_SIZE: usize = 2048;

const DEFAULT_BLOCK_PROCESS_LIMIT: u64 = 50;
const DEFAULT_BLOCK_PROCESS_LIMIT_MAX: u64 = 0;
// Roughly one day of blocks at 12s/block (mainnet); operators tune per chain.
const DEFAULT_BLOCKS_BEHIND: u64 = 7_200;
const DEFAULT_REORG_BLOCKS: u64 = 12;
const DEFAULT_REORG_BLOCKS_BATCH: u64 = 200;
const DEFAULT_BLOCK_HEADER_CONCURRENCY: usize = 20;
const DEFAULT_SCAN_INTERVAL_SECONDS: u64 = 10;
const DEFAULT_LOCK_TIMEOUT_SECONDS: u64 = 900;
const DEFAULT_SOFT_TIMEOUT_SECONDS: u64 = 600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_splits_on_comma_and_whitespace() {
        let urls = parse_list("https://a.example, https://b.example\nhttps://c.example");
        assert_eq!(
            urls,
            vec![
                "https://a.example".to_string(),
                "https://b.example".to_string(),
                "https://c.example".to_string(),
            ]
        );
    }

    #[test]
    fn parse_list_ignores_empty_entries() {
        assert!(parse_list("").is_empty());
        assert!(parse_list(" , ,").is_empty());
    }
}
