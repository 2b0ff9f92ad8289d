//! Reorg Detector & Recovery (§4.6).

use crate::byte_array::Address20;
use crate::db::{self, Db};
use crate::dedup::DedupCache;
use crate::rpc::RpcClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Runs one pass of `runCheckReorg` over every unconfirmed `block_tx` row, in ascending
/// block-number pages of size `page_size` (`R`). Returns the first block number at which the
/// stored hash disagrees with the canonical chain, if any.
pub async fn run_check_reorg(
    db: &Db,
    rpc: &RpcClient,
    confirmation_depth: u64,
    page_size: u64,
) -> Result<Option<u64>> {
    let head = rpc.block_number().await.context("fetch chain head")?;
    let confirmation_cutoff = head.saturating_sub(confirmation_depth);

    loop {
        let page = db::unconfirmed_blocks_asc(db, page_size).await?;
        if page.is_empty() {
            return Ok(None);
        }

        let numbers: Vec<u64> = page.iter().map(|row| row.block_number).collect();
        let canonical = rpc.get_blocks(&numbers).await.context("getBlocks")?;
        let canonical_by_number: std::collections::HashMap<u64, _> =
            canonical.into_iter().map(|h| (h.number, h)).collect();

        let mut to_confirm = Vec::new();
        for row in &page {
            let Some(canonical_block) = canonical_by_number.get(&row.block_number) else {
                // Node doesn't see this block yet (still maturing); skip, retry next pass.
                continue;
            };
            if canonical_block.hash.0 != row.block_hash.0 {
                if !to_confirm.is_empty() {
                    mark_confirmed(db, &to_confirm).await?;
                }
                return Ok(Some(row.block_number));
            }
            if row.block_number <= confirmation_cutoff {
                to_confirm.push(row.tx_hash);
            }
        }

        if !to_confirm.is_empty() {
            mark_confirmed(db, &to_confirm).await?;
        }

        // Fewer rows than the page size means this was the last page.
        if (page.len() as u64) < page_size {
            return Ok(None);
        }
    }
}

async fn mark_confirmed(db: &Db, tx_hashes: &[crate::byte_array::Hash32]) -> Result<()> {
    db::mark_confirmed(&db.pool, tx_hashes).await
}

/// Atomically rewinds to the reorg point: clears the dedup cache, deletes every `block_tx`
/// (and cascaded events) with `block_number >= n`, and sets the cursor to `n` (§4.6
/// `recoverFromReorg`).
pub async fn recover_from_reorg(
    db: &Db,
    dedup: &Arc<Mutex<DedupCache>>,
    contract_address: Address20,
    reorg_block_number: u64,
) -> Result<u64> {
    dedup.lock().await.clear();
    let deleted = db::recover_from_reorg(db, contract_address, reorg_block_number).await?;
    Ok(deleted)
}
