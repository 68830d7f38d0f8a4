//! derived-ledger engine: state persistence, synchronization, cosign
//! validation and notification dispatch

pub mod dispatch;
pub mod locks;
pub mod registry;
pub mod state;
pub mod sync;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

pub use dispatch::{NotificationDispatcher, SyncJob};
pub use locks::AccountLocks;
pub use registry::{MultisigDescriptor, MultisigRegistry};
pub use state::{AccountRecord, LedgerState, StateStore, SyncCursor};
pub use sync::{SyncReport, Synchronizer};
pub use validate::{CosignRequest, CosignValidator};
