//! core data types and pure functions for the colored-UTXO contract oracle

pub mod address;
pub mod error;
pub mod normalize;
pub mod tx;
pub mod types;
pub mod wire;

pub use error::{OracleError, Result};
pub use normalize::{normalize, Dialect};
pub use tx::{BalanceDelta, ContractPayload, NormalizedTx, TxInput, TxOutput, TxType};
pub use types::{Amount, ChainAddress, Color, LedgerAddress, Nonce, TxHash};
