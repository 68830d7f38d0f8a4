//! Bounded retry wrapper around chain-query calls. Transient upstream
//! failures are retried up to a fixed bound and surfaced as
//! `UpstreamUnavailable` on exhaustion; definitive lookup outcomes pass
//! through untouched so callers can branch on them.

use std::future::Future;
use std::time::Duration;

use log::warn;
use serde_json::Value;

use oracle_core::{normalize, OracleError, Result};

use crate::backend::ChainBackend;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last = None;
    for attempt in 1..=max_attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!("upstream attempt {attempt}/{max_attempts} failed: {e}");
                last = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(OracleError::UpstreamUnavailable(
        last.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

/// Retried transaction lookup: missing transactions surface as `TxNotFound`
/// and under-confirmed ones as `TxUnconfirmed`, both immediately.
pub async fn fetch_confirmed_tx(
    backend: &dyn ChainBackend,
    tx_hash: &str,
    min_confirmations: u64,
    max_attempts: u32,
) -> Result<Value> {
    with_retry(max_attempts, || async move {
        let raw = backend.get_tx(tx_hash).await?.ok_or(OracleError::TxNotFound)?;
        if min_confirmations > 0 {
            let confirmations = normalize(&raw)?.confirmations;
            if confirmations < min_confirmations {
                return Err(OracleError::TxUnconfirmed);
            }
        }
        Ok(raw)
    })
    .await
}
