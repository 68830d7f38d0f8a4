use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Amount, ChainAddress, Color, TxHash};

/// Canonical transaction record, derived purely from upstream data and never
/// persisted. Heterogeneous backend shapes are folded into this one form by
/// [`crate::normalize::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTx {
    pub hash: TxHash,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    pub time: u64,
    pub blockhash: Option<String>,
    pub confirmations: u64,
    pub vins: Vec<TxInput>,
    pub vouts: Vec<TxOutput>,
    /// Present only for CONTRACT-type transactions.
    pub payload: Option<ContractPayload>,
}

impl NormalizedTx {
    pub fn is_contract(&self) -> bool {
        self.tx_type == TxType::Contract
    }

    /// Outputs paying the given chain address.
    pub fn outputs_to<'a>(&'a self, address: &'a str) -> impl Iterator<Item = &'a TxOutput> {
        self.vouts.iter().filter(move |v| v.address == address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Normal,
    Contract,
    Other(String),
}

impl TxType {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "NORMAL" => TxType::Normal,
            "CONTRACT" => TxType::Contract,
            other => TxType::Other(other.to_string()),
        }
    }
}

/// A spend of a previously confirmed output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub tx_hash: TxHash,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: ChainAddress,
    pub amount: Amount,
    pub color: Color,
    pub n: u32,
}

/// Structured data carried in the color-zero output of a CONTRACT
/// transaction. Exactly one of deployment bytecode or a call's input hash is
/// present; the updates are the call's declared effects on derived state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractPayload {
    pub is_deploy: bool,
    pub bytecode: String,
    pub multisig_address: ChainAddress,
    /// Target of a contract call; `None` for deployments, whose address is
    /// derived from the creator account and nonce.
    pub contract_address: Option<String>,
    #[serde(default)]
    pub storage_updates: BTreeMap<String, String>,
    #[serde(default)]
    pub balance_updates: Vec<BalanceDelta>,
}

/// A declared balance effect of a contract call on one derived account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// Ledger address, lowercase hex.
    pub address: String,
    pub color: Color,
    pub delta: i64,
}
