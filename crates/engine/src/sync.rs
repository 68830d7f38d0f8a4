//! Ledger State Synchronizer: replays confirmed chain transactions into one
//! account's derived state, incrementally and idempotently, in ascending
//! confirmation-time order.

use std::sync::Arc;

use log::{debug, info, warn};

use oracle_chain::{fetch_confirmed_tx, with_retry, ChainBackend};
use oracle_core::address::{chain_to_ledger_address, derive_contract_address};
use oracle_core::{normalize, ChainAddress, NormalizedTx, OracleError, Result, TxType};

use crate::locks::AccountLocks;
use crate::registry::MultisigRegistry;
use crate::state::{LedgerState, StateStore, SyncCursor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub skipped_unconfirmed: usize,
    pub cursor: Option<SyncCursor>,
}

pub struct Synchronizer {
    backend: Arc<dyn ChainBackend>,
    store: Arc<StateStore>,
    registry: Arc<MultisigRegistry>,
    locks: Arc<AccountLocks>,
    retry_attempts: u32,
}

impl Synchronizer {
    pub fn new(
        backend: Arc<dyn ChainBackend>,
        store: Arc<StateStore>,
        registry: Arc<MultisigRegistry>,
        locks: Arc<AccountLocks>,
        retry_attempts: u32,
    ) -> Self {
        Synchronizer { backend, store, registry, locks, retry_attempts }
    }

    pub fn backend(&self) -> &Arc<dyn ChainBackend> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MultisigRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &Arc<AccountLocks> {
        &self.locks
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Brings one state-multisig account fully up to date with the chain.
    pub async fn sync_account(&self, multisig_address: &str) -> Result<SyncReport> {
        let _guard = self.locks.acquire(multisig_address).await;
        self.sync_account_locked(multisig_address, None).await
    }

    /// Same as [`sync_account`](Self::sync_account) but assumes the caller
    /// already holds the account lock; `stop_at` bounds the replay (used by
    /// the validator to synchronize up to the oldest unresolved reference).
    pub async fn sync_account_locked(
        &self,
        multisig_address: &str,
        stop_at: Option<&SyncCursor>,
    ) -> Result<SyncReport> {
        self.registry.require(multisig_address)?;

        let existing = self.store.load(multisig_address)?;
        let (history, skipped_unconfirmed) = self.confirmed_history(multisig_address).await?;

        let has_deploy = history
            .iter()
            .any(|(_, tx)| tx.payload.as_ref().is_some_and(|p| p.is_deploy));
        if existing.is_none() && !has_deploy {
            return Err(OracleError::ContractNotFound(multisig_address.to_string()));
        }

        let mut state = existing.unwrap_or_default();
        let mut applied = 0usize;
        for (cursor, tx) in history {
            if state.applied(&cursor) {
                debug!("{multisig_address}: {} already applied, skipping", tx.hash);
                continue;
            }
            if let Some(stop) = stop_at {
                if cursor > *stop {
                    break;
                }
            }
            self.apply_tx(multisig_address, &mut state, &tx).await?;
            state.cursor = Some(cursor);
            applied += 1;
        }

        self.store.save(multisig_address, &state)?;
        if applied > 0 {
            info!("{multisig_address}: applied {applied} transaction(s)");
        }
        Ok(SyncReport { applied, skipped_unconfirmed, cursor: state.cursor })
    }

    /// Resolves the state-multisig account a notified transaction belongs
    /// to: from the embedded payload when present, otherwise the sender
    /// address when it is a script-hash address.
    pub async fn resolve_multisig(&self, tx_hash: &str) -> Result<Option<ChainAddress>> {
        let raw = fetch_confirmed_tx(&*self.backend, tx_hash, 0, self.retry_attempts).await?;
        let tx = normalize(&raw)?;
        if let Some(payload) = &tx.payload {
            return Ok(Some(payload.multisig_address.clone()));
        }
        let sender = self.sender_address(&tx).await?;
        Ok(sender.filter(|addr| addr.starts_with('3')))
    }

    /// Confirmed transactions touching the address with their replay
    /// cursors, ascending by block time. Unconfirmed transactions are
    /// skipped and counted, never treated as errors.
    async fn confirmed_history(
        &self,
        address: &str,
    ) -> Result<(Vec<(SyncCursor, NormalizedTx)>, usize)> {
        let backend = &*self.backend;
        let attempts = self.retry_attempts;
        let raws = with_retry(attempts, || async move {
            backend.get_txs_by_address(address).await
        })
        .await?;

        let mut history = Vec::with_capacity(raws.len());
        let mut skipped = 0usize;
        for raw in &raws {
            let tx = normalize(raw)?;
            let Some(blockhash) = tx.blockhash.clone() else {
                debug!("{address}: tx {} unconfirmed, skipping", tx.hash);
                skipped += 1;
                continue;
            };
            let blockhash_ref = blockhash.as_str();
            let block = with_retry(attempts, || async move {
                backend.get_block_by_hash(blockhash_ref).await
            })
            .await?;
            let Some(block) = block else {
                debug!("{address}: block {blockhash} not found, tx {} unconfirmed", tx.hash);
                skipped += 1;
                continue;
            };
            history.push((SyncCursor { block_time: block.time, tx_hash: tx.hash.clone() }, tx));
        }
        history.sort_by(|a, b| a.0.cmp(&b.0));
        Ok((history, skipped))
    }

    /// Folds one confirmed transaction into the account state.
    async fn apply_tx(
        &self,
        multisig_address: &str,
        state: &mut LedgerState,
        tx: &NormalizedTx,
    ) -> Result<()> {
        match (&tx.tx_type, &tx.payload) {
            (TxType::Contract, Some(payload)) if payload.is_deploy => {
                let sender = self.sender_address(tx).await?.ok_or_else(|| {
                    OracleError::malformed(format!("deploy tx {} has no sender", tx.hash))
                })?;
                let creator = chain_to_ledger_address(&sender)?;
                let creator_nonce = state.account(&creator).map(|a| a.nonce);
                let contract_address = derive_contract_address(&creator, creator_nonce);

                let account = state.account_mut(&contract_address);
                if account.code.is_empty() {
                    account.code = payload.bytecode.clone();
                    account.storage.clear();
                    account.nonce = 0;
                    info!(
                        "{multisig_address}: deployed contract {contract_address} (tx {})",
                        tx.hash
                    );
                } else {
                    warn!(
                        "{multisig_address}: contract {contract_address} already deployed, \
                         ignoring redeploy in tx {}",
                        tx.hash
                    );
                }
                state.account_mut(&creator).nonce += 1;
            }
            (TxType::Contract, Some(payload)) => {
                let target = payload
                    .contract_address
                    .as_deref()
                    .ok_or_else(|| {
                        OracleError::malformed(format!("call tx {} has no contract address", tx.hash))
                    })?
                    .parse()?;
                if state.account(&target).is_none() {
                    return Err(OracleError::ContractNotFound(target.to_string()));
                }
                let account = state.account_mut(&target);
                for (key, value) in &payload.storage_updates {
                    account.storage.insert(key.clone(), value.clone());
                }
                for delta in &payload.balance_updates {
                    let address = delta.address.parse()?;
                    let account = state.account_mut(&address);
                    if delta.delta >= 0 {
                        account.credit(delta.color, delta.delta as u64);
                    } else {
                        account.debit(delta.color, delta.delta.unsigned_abs());
                    }
                }
                debug!("{multisig_address}: applied call tx {}", tx.hash);
            }
            (TxType::Contract, None) => {
                // unreachable by construction; the normalizer rejects these
                return Err(OracleError::malformed(format!(
                    "contract tx {} has no payload",
                    tx.hash
                )));
            }
            _ => self.apply_transfer(multisig_address, state, tx).await?,
        }
        Ok(())
    }

    /// NORMAL value transfer: credit outputs paying the account, debit
    /// spent inputs that referenced the account's own outputs.
    async fn apply_transfer(
        &self,
        multisig_address: &str,
        state: &mut LedgerState,
        tx: &NormalizedTx,
    ) -> Result<()> {
        let own = chain_to_ledger_address(multisig_address)?;

        for vout in tx.outputs_to(multisig_address) {
            state.account_mut(&own).credit(vout.color, vout.amount);
            debug!(
                "{multisig_address}: +{} color {} from tx {} vout {}",
                vout.amount, vout.color, tx.hash, vout.n
            );
        }

        for vin in &tx.vins {
            let raw =
                fetch_confirmed_tx(&*self.backend, &vin.tx_hash, 0, self.retry_attempts).await?;
            let prev = normalize(&raw)?;
            let Some(prev_out) = prev.vouts.iter().find(|o| o.n == vin.vout) else {
                return Err(OracleError::malformed(format!(
                    "tx {} spends missing output {}:{}",
                    tx.hash, vin.tx_hash, vin.vout
                )));
            };
            if prev_out.address == multisig_address {
                state.account_mut(&own).debit(prev_out.color, prev_out.amount);
                debug!(
                    "{multisig_address}: -{} color {} via tx {}",
                    prev_out.amount, prev_out.color, tx.hash
                );
            }
        }
        Ok(())
    }

    /// The chain address funding a transaction's first input.
    async fn sender_address(&self, tx: &NormalizedTx) -> Result<Option<ChainAddress>> {
        let Some(vin) = tx.vins.first() else {
            return Ok(None);
        };
        let raw = fetch_confirmed_tx(&*self.backend, &vin.tx_hash, 0, self.retry_attempts).await?;
        let prev = normalize(&raw)?;
        let out = prev.vouts.iter().find(|o| o.n == vin.vout).ok_or_else(|| {
            OracleError::malformed(format!(
                "input references missing output {}:{}",
                vin.tx_hash, vin.vout
            ))
        })?;
        Ok(Some(out.address.clone()))
    }
}
