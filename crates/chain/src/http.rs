//! REST implementation of [`ChainBackend`]. Explicitly constructed and
//! injected wherever chain access is needed; there is no process-wide
//! backend handle.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use oracle_core::{Amount, Color, OracleError, Result, TxHash};

use crate::backend::{ChainBackend, ChainBlock, Subscription, Utxo};

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpBackend {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json(&self, path: &str) -> Result<Option<Value>> {
        let url = self.url(path);
        debug!("GET {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Upstream(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| OracleError::Upstream(e.to_string()))?;
        let value = response
            .json()
            .await
            .map_err(|e| OracleError::Upstream(format!("bad response body: {e}")))?;
        Ok(Some(value))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| OracleError::Upstream(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| OracleError::Upstream(format!("bad response body: {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| OracleError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl ChainBackend for HttpBackend {
    async fn get_tx(&self, tx_hash: &str) -> Result<Option<Value>> {
        self.get_json(&format!("/transactions/{tx_hash}")).await
    }

    async fn get_block_by_hash(&self, block_hash: &str) -> Result<Option<ChainBlock>> {
        match self.get_json(&format!("/blocks/{block_hash}")).await? {
            Some(value) => Ok(Some(Self::decode(value)?)),
            None => Ok(None),
        }
    }

    async fn get_latest_blocks(&self) -> Result<Vec<ChainBlock>> {
        let value = self
            .get_json("/blocks")
            .await?
            .ok_or_else(|| OracleError::Upstream("blocks endpoint missing".into()))?;
        Self::decode(value)
    }

    async fn get_address_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let value = self
            .get_json(&format!("/addresses/{address}/utxos"))
            .await?
            .unwrap_or(Value::Array(vec![]));
        Self::decode(value)
    }

    async fn get_address_balance(
        &self,
        address: &str,
        color: Option<Color>,
    ) -> Result<BTreeMap<Color, Amount>> {
        let path = match color {
            Some(color) => format!("/addresses/{address}/balance?color={color}"),
            None => format!("/addresses/{address}/balance"),
        };
        let value = self
            .get_json(&path)
            .await?
            .unwrap_or(Value::Object(Default::default()));
        Self::decode(value)
    }

    async fn get_license_info(&self, color: Color) -> Result<Value> {
        self.get_json(&format!("/licenses/{color}"))
            .await?
            .ok_or_else(|| OracleError::Upstream(format!("no license info for color {color}")))
    }

    async fn get_txs_by_address(&self, address: &str) -> Result<Vec<Value>> {
        let value = self
            .get_json(&format!("/addresses/{address}/txs"))
            .await?
            .unwrap_or(Value::Array(vec![]));
        Self::decode(value)
    }

    async fn subscribe_address_notification(
        &self,
        address: &str,
        callback_url: &str,
        confirmations: u32,
    ) -> Result<Subscription> {
        let body = serde_json::json!({
            "address": address,
            "callback_url": callback_url,
            "confirmation_count": confirmations,
        });
        let value = self.post_json("/notification/address", &body).await?;
        Self::decode(value)
    }

    async fn send_raw_tx(&self, raw_tx_hex: &str) -> Result<TxHash> {
        let body = serde_json::json!({ "raw_tx": raw_tx_hex });
        let value = self.post_json("/transactions/send", &body).await?;
        value
            .get("tx_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OracleError::Upstream("send response lacks tx_id".into()))
    }
}
