use thiserror::Error;

use crate::types::{Amount, Color};

pub type Result<T> = std::result::Result<T, OracleError>;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("transaction not found")]
    TxNotFound,

    #[error("transaction not yet confirmed")]
    TxUnconfirmed,

    #[error("no contract state for {0}")]
    ContractNotFound(String),

    #[error("no multisig descriptor for {0}")]
    MultisigNotFound(String),

    #[error("proposed inputs omit the oldest unresolved utxo")]
    StaleReference,

    #[error("proposed input references a utxo not owned by the account")]
    UnknownUtxo,

    #[error("insufficient funds for color {color}: have {available}, need {required}")]
    InsufficientFunds {
        color: Color,
        available: Amount,
        required: Amount,
    },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("upstream unavailable after retries: {0}")]
    UpstreamUnavailable(String),

    /// A single failed upstream request; candidate for retry.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OracleError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        OracleError::MalformedTransaction(msg.into())
    }

    /// Whether the retry wrapper should try again. Definitive lookup
    /// outcomes (not found, unconfirmed) must surface immediately so callers
    /// can branch on them.
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Upstream(_) | OracleError::Io(_))
    }
}
