//! Notification Dispatcher: turns inbound chain notifications into
//! synchronizer runs through a bounded job queue, so the notifying caller
//! is acknowledged immediately and never blocked on a replay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc;

use oracle_core::TxHash;

use crate::sync::Synchronizer;

/// One scheduled synchronization. The multisig address is absent for
/// tx-hash-only notifications and resolved by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub multisig_address: Option<String>,
    pub tx_hash: TxHash,
}

pub struct NotificationDispatcher {
    jobs: mpsc::Sender<SyncJob>,
    queue_depth: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    /// Starts the worker task draining the queue. Failures are logged for
    /// reconciliation, never surfaced to the notifier.
    pub fn spawn(synchronizer: Arc<Synchronizer>, capacity: usize) -> Self {
        let (jobs, mut rx) = mpsc::channel::<SyncJob>(capacity);
        let queue_depth = Arc::new(AtomicU64::new(0));
        let depth = queue_depth.clone();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                depth.fetch_sub(1, Ordering::Relaxed);
                let multisig = match &job.multisig_address {
                    Some(address) => Some(address.clone()),
                    None => match synchronizer.resolve_multisig(&job.tx_hash).await {
                        Ok(resolved) => resolved,
                        Err(e) => {
                            error!("cannot resolve multisig for tx {}: {e}", job.tx_hash);
                            continue;
                        }
                    },
                };
                let Some(multisig) = multisig else {
                    warn!("tx {} touches no known multisig account, ignored", job.tx_hash);
                    continue;
                };
                match synchronizer.sync_account(&multisig).await {
                    Ok(report) => info!(
                        "sync of {multisig} for tx {}: {} applied, {} unconfirmed skipped",
                        job.tx_hash, report.applied, report.skipped_unconfirmed
                    ),
                    // recorded for reconciliation; the notifier already got
                    // its acknowledgment
                    Err(e) => error!("sync of {multisig} for tx {} failed: {e}", job.tx_hash),
                }
            }
        });

        NotificationDispatcher { jobs, queue_depth }
    }

    /// Enqueues a job without blocking. Returns `false` when the queue is
    /// full or the worker is gone; notifications are redeliverable, so the
    /// caller still acknowledges.
    pub fn notify(&self, job: SyncJob) -> bool {
        match self.jobs.try_send(job) {
            Ok(()) => {
                self.queue_depth.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                error!("dispatch queue full, dropping job for tx {}", job.tx_hash);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                error!("dispatch worker gone, dropping job for tx {}", job.tx_hash);
                false
            }
        }
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }
}
