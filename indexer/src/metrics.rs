//! Ambient metrics. Definitions and updates live here; this crate does not itself serve an
//! HTTP scrape endpoint (out of scope — see SPEC_FULL §6), but registers into the default
//! `prometheus` registry for an embedding binary to expose.

use prometheus::{
    HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, register_histogram_vec,
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
};
use std::sync::OnceLock;

pub struct Metrics {
    /// Wall-clock latency of a single RPC call, by method.
    pub rpc_latency_seconds: HistogramVec,
    /// RPC calls that failed, labeled by method and whether the failure was transient.
    pub rpc_errors: IntCounterVec,
    /// Current `lastIndexedBlock`, by contract.
    pub chain_position: IntGaugeVec,
    /// Width of the most recently completed window (`to - from + 1`).
    pub window_size: IntGauge,
    /// Rows written, by table.
    pub rows_inserted: IntCounterVec,
    /// Reorgs detected.
    pub reorgs_detected: IntCounter,
    /// Rows deleted by the most recent reorg recovery.
    pub reorg_rows_deleted: IntCounter,
    /// Store errors that were not a recognized conflict (`StoreFatal`, §7).
    pub store_errors: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    pub fn get() -> &'static Self {
        METRICS.get_or_init(|| Metrics {
            rpc_latency_seconds: register_histogram_vec!(
                "indexer_rpc_latency_seconds",
                "Wall-clock latency of a single RPC call.",
                &["method"]
            )
            .expect("metric registration"),
            rpc_errors: register_int_counter_vec!(
                "indexer_rpc_errors_total",
                "RPC calls that failed.",
                &["method", "transient"]
            )
            .expect("metric registration"),
            chain_position: register_int_gauge_vec!(
                "indexer_chain_position",
                "Current lastIndexedBlock per contract.",
                &["contract"]
            )
            .expect("metric registration"),
            window_size: register_int_gauge!(
                "indexer_window_size",
                "Width of the most recently completed scan window."
            )
            .expect("metric registration"),
            rows_inserted: register_int_counter_vec!(
                "indexer_rows_inserted_total",
                "Rows inserted, by table.",
                &["table"]
            )
            .expect("metric registration"),
            reorgs_detected: register_int_counter!(
                "indexer_reorgs_detected_total",
                "Reorgs detected."
            )
            .expect("metric registration"),
            reorg_rows_deleted: register_int_counter!(
                "indexer_reorg_rows_deleted_total",
                "Rows deleted by reorg recovery."
            )
            .expect("metric registration"),
            store_errors: register_int_counter!(
                "indexer_store_errors_total",
                "Fatal store errors (excludes idempotent conflicts)."
            )
            .expect("metric registration"),
        })
    }
}
