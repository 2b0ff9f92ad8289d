use crate::metrics::Metrics;
use alloy::primitives::B256;
use anyhow::{Context, Result};
use futures::{StreamExt, stream};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct RpcClient {
    urls: Arc<Vec<String>>,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
    preferred_url: Arc<AtomicUsize>,
}

impl RpcClient {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        if urls.is_empty() {
            anyhow::bail!("rpc urls must not be empty");
        }
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .build()
            .context("build reqwest client")?;

        Ok(Self {
            urls: Arc::new(urls),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
            preferred_url: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let started = Instant::now();
        let result = self.request_inner(method, params).await;

        Metrics::get()
            .rpc_latency_seconds
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());
        if let Err(err) = &result {
            Metrics::get()
                .rpc_errors
                .with_label_values(&[method, looks_like_transient(err).to_string().as_str()])
                .inc();
        }

        result
    }

    async fn request_inner(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        // Stick to a single "preferred" RPC endpoint for consistency (avoids mixing
        // slightly-different views across endpoints), but still fall back to others.
        let start = self
            .preferred_url
            .load(Ordering::Relaxed)
            .wrapping_rem(self.urls.len());

        let mut last_err: Option<anyhow::Error> = None;
        for offset in 0..self.urls.len() {
            let idx = (start + offset) % self.urls.len();
            let url = &self.urls[idx];
            match self
                .http
                .post(url)
                .json(&body)
                .send()
                .await
                .with_context(|| format!("{method} POST {url}"))
            {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .with_context(|| format!("{method} read body {url}"))?;
                    if status != StatusCode::OK {
                        last_err = Some(anyhow::anyhow!(
                            "{method} http status={} url={} body={}",
                            status.as_u16(),
                            url,
                            text
                        ));
                        continue;
                    }
                    let v: Value = serde_json::from_str(&text)
                        .with_context(|| format!("{method} parse json"))?;
                    if let Some(err) = v.get("error") {
                        last_err = Some(anyhow::anyhow!("{method} rpc error: {err}"));
                        continue;
                    }
                    let Some(result) = v.get("result") else {
                        last_err = Some(anyhow::anyhow!("{method} missing result field"));
                        continue;
                    };
                    self.preferred_url.store(idx, Ordering::Relaxed);
                    return Ok(result.clone());
                }
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{method} failed")))
    }

    /// `currentBlock` (§4.1).
    pub async fn block_number(&self) -> Result<u64> {
        let v = self
            .request("eth_blockNumber", serde_json::json!([]))
            .await?;
        parse_quantity_u64(v).context("parse eth_blockNumber")
    }

    /// `getLogs` (§4.1). `topics` is the union of topic-0 hashes of all known event ABIs.
    pub async fn get_logs(
        &self,
        address: &str,
        from_block: u64,
        to_block: u64,
        topics: &[B256],
    ) -> Result<Vec<alloy::rpc::types::Log>> {
        let filter = serde_json::json!({
            "address": address,
            "fromBlock": format_quantity(from_block),
            "toBlock": format_quantity(to_block),
            "topics": [topics.iter().map(|t| format!("0x{}", hex::encode(t.as_slice()))).collect::<Vec<_>>()],
        });
        let v = self
            .request("eth_getLogs", serde_json::json!([filter]))
            .await?;
        serde_json::from_value(v).context("parse eth_getLogs result as logs")
    }

    pub async fn get_block_by_number(&self, block_number: u64) -> Result<Option<Value>> {
        let v = self
            .request(
                "eth_getBlockByNumber",
                serde_json::json!([format_quantity(block_number), false]),
            )
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(v))
    }

    /// `getBlocks(nums) → [{number, hash, parentHash}]` (§4.1), fetched concurrently and
    /// returned in the same order as requested. A missing block is dropped rather than padded,
    /// since callers treat absence (not a sentinel) as "not yet visible to this node".
    pub async fn get_blocks(&self, numbers: &[u64]) -> Result<Vec<BlockHeader>> {
        let rpc = self.clone();
        let mut results: Vec<(usize, BlockHeader)> =
            stream::iter(numbers.iter().copied().enumerate())
                .map(|(idx, n)| {
                    let rpc = rpc.clone();
                    async move {
                        let block = rpc.get_block_by_number(n).await?;
                        let Some(block) = block else {
                            return Ok::<_, anyhow::Error>(None);
                        };
                        Ok(Some((idx, BlockHeader::from_json(n, &block)?)))
                    }
                })
                .buffer_unordered(16)
                .filter_map(|res| async move { res.transpose() })
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .collect::<Result<Vec<_>>>()?;

        results.sort_by_key(|(idx, _)| *idx);
        Ok(results.into_iter().map(|(_, h)| h).collect())
    }
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
}

impl BlockHeader {
    fn from_json(number: u64, block: &Value) -> Result<Self> {
        let hash = parse_hash(block, "hash")?;
        let parent_hash = parse_hash(block, "parentHash")?;
        Ok(Self {
            number,
            hash,
            parent_hash,
        })
    }
}

fn parse_hash(block: &Value, field: &str) -> Result<B256> {
    let s = block
        .get(field)
        .and_then(|v| v.as_str())
        .with_context(|| format!("missing block.{field}"))?;
    s.parse::<B256>()
        .with_context(|| format!("invalid block.{field}: {s}"))
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn parse_quantity_u64(v: Value) -> Result<u64> {
    match v {
        Value::String(s) => parse_quantity_u64_str(&s),
        Value::Number(n) => n
            .as_u64()
            .context("quantity number not representable as u64"),
        other => anyhow::bail!("unexpected quantity json type: {other}"),
    }
}

fn parse_quantity_u64_str(s: &str) -> Result<u64> {
    let trimmed = s.trim();
    let Some(hex) = trimmed.strip_prefix("0x") else {
        return trimmed
            .parse::<u64>()
            .with_context(|| format!("invalid decimal u64: {trimmed}"));
    };
    if hex.is_empty() {
        anyhow::bail!("invalid hex quantity: {trimmed}");
    }
    u64::from_str_radix(hex, 16).with_context(|| format!("invalid hex quantity: {trimmed}"))
}

/// Errors matching this are treated as `TransientRpc` (§7): the scanner resets its window to 1
/// and retries on the next invocation rather than surfacing a fatal error.
pub fn looks_like_transient(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("deadline")
        || msg.contains("too many requests")
        || msg.contains("rate limit")
        || msg.contains("429")
        || msg.contains("bad gateway")
        || msg.contains("gateway")
        || msg.contains("service unavailable")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("connection refused")
        || msg.contains("broken pipe")
        || msg.contains("temporarily unavailable")
}

/// A provider-specific rejection of the requested block range, distinct from a generic
/// transient failure: the scanner should shrink `W` rather than merely retry unchanged.
pub fn looks_like_range_too_large(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("range too large")
        || msg.contains("block range")
        || msg.contains("too many results")
        || msg.contains("response size exceeded")
        || msg.contains("payload too large")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_decimal_quantities() {
        assert_eq!(parse_quantity_u64(Value::String("0x1a".into())).unwrap(), 26);
        assert_eq!(parse_quantity_u64(Value::String("42".into())).unwrap(), 42);
    }

    #[test]
    fn classifies_transient_errors() {
        let err = anyhow::anyhow!("upstream returned 503 Service Unavailable");
        assert!(looks_like_transient(&err));
        assert!(!looks_like_range_too_large(&err));
    }

    #[test]
    fn classifies_range_too_large_errors() {
        let err = anyhow::anyhow!("query returned more than 10000 results");
        assert!(looks_like_range_too_large(&err));
    }
}
