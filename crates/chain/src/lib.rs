//! upstream chain backend interface for the colored oracle

pub mod backend;
pub mod http;
pub mod retry;
pub mod signer;

pub use backend::{ChainBackend, ChainBlock, Subscription, Utxo};
pub use http::HttpBackend;
pub use retry::{fetch_confirmed_tx, with_retry};
pub use signer::{LocalSigner, Signer};
