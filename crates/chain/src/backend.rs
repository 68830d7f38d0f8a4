use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use oracle_core::{Amount, Color, Result, TxHash};

/// An unspent output as reported by the upstream chain backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: TxHash,
    pub vout: u32,
    pub amount: Amount,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub hash: String,
    pub height: u64,
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub created_time: String,
}

/// The upstream chain-query surface the oracle consumes. Transactions come
/// back as raw JSON because response shapes differ per backend; the
/// normalizer owns that translation. Everything else is typed.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// `Ok(None)` is the definitive not-found outcome; it is never retried.
    async fn get_tx(&self, tx_hash: &str) -> Result<Option<Value>>;

    /// `Ok(None)` when the block is unknown, which callers treat as the
    /// referencing transaction being unconfirmed.
    async fn get_block_by_hash(&self, block_hash: &str) -> Result<Option<ChainBlock>>;

    async fn get_latest_blocks(&self) -> Result<Vec<ChainBlock>>;

    async fn get_address_utxos(&self, address: &str) -> Result<Vec<Utxo>>;

    async fn get_address_balance(
        &self,
        address: &str,
        color: Option<Color>,
    ) -> Result<BTreeMap<Color, Amount>>;

    /// Asset-license metadata for a color, opaque to this core.
    async fn get_license_info(&self, color: Color) -> Result<Value>;

    /// All raw transactions touching an address, unordered.
    async fn get_txs_by_address(&self, address: &str) -> Result<Vec<Value>>;

    async fn subscribe_address_notification(
        &self,
        address: &str,
        callback_url: &str,
        confirmations: u32,
    ) -> Result<Subscription>;

    async fn send_raw_tx(&self, raw_tx_hex: &str) -> Result<TxHash>;
}
