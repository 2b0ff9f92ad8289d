//! Error taxonomy (§7). Most call sites propagate via `anyhow::Error` with `.context(...)`;
//! this module exists for the handful of sites that branch on *kind* rather than just logging
//! and retrying.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexerError {
    /// RPC failure classified as transient (timeouts, connection resets, 5xx) — callers retry
    /// on the next tick rather than treating it as fatal.
    #[error("transient RPC error: {0}")]
    TransientRpc(String),

    /// A node rejected a window as too wide (`-32005`, "query returned more than...", etc).
    /// Distinct from `TransientRpc` because the recovery is to shrink `W`, not merely retry.
    #[error("range too large: {0}")]
    RangeTooLarge(String),

    /// A log could not be decoded against any known event ABI, or decoded with a shape the
    /// invariants reject (wrong topic count, non-canonical address encoding).
    #[error("failed to decode log: {0}")]
    DecodeError(String),

    /// A write violated a uniqueness constraint already covered by the dedup cache or an
    /// idempotent `ON CONFLICT DO NOTHING` — not an error condition, but surfaced so a caller
    /// can choose to log at debug rather than warn.
    #[error("store conflict (already applied): {0}")]
    StoreConflict(String),

    /// Any other store failure: connection loss, constraint violation unrelated to dedup,
    /// migration failure. Unrecoverable within the current attempt.
    #[error("store error: {0}")]
    StoreFatal(String),

    /// Another process already holds the single-runner lock for this task.
    #[error("lock contention: {0} is already held")]
    LockContention(String),
}
