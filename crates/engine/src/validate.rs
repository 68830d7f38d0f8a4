//! Cosigning Validator: checks a proposed spend against the latest
//! synchronized state before any partial signature is released.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use oracle_chain::{with_retry, Signer};
use oracle_core::address::{chain_address_from_script, chain_to_ledger_address};
use oracle_core::wire::decode_raw_tx;
use oracle_core::{normalize, OracleError, Result, TxHash};

use crate::state::SyncCursor;
use crate::sync::Synchronizer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignRequest {
    /// Proposed transaction, wire-encoded hex.
    pub raw_tx: String,
    /// Input this caller wants countersigned.
    pub input_index: usize,
    /// Spending script for that input.
    pub script: String,
    /// The state-multisig account the inputs are drawn from.
    pub multisig_address: String,
    /// Explicit recipient contract account, overriding address mapping.
    pub contract_address: Option<String>,
}

pub struct CosignValidator {
    synchronizer: Arc<Synchronizer>,
    signer: Arc<dyn Signer>,
}

impl CosignValidator {
    pub fn new(synchronizer: Arc<Synchronizer>, signer: Arc<dyn Signer>) -> Self {
        CosignValidator { synchronizer, signer }
    }

    /// Runs the full consistency check and, only on success, produces the
    /// partial signature. No state is written beyond the re-synchronization
    /// itself.
    pub async fn validate_and_sign(&self, request: &CosignRequest) -> Result<String> {
        let decoded = decode_raw_tx(&request.raw_tx)?;
        let multisig = request.multisig_address.as_str();

        let _guard = self.synchronizer.locks().acquire(multisig).await;

        let (oldest, oldest_cursor, owned) = self.oldest_utxo(multisig).await?;
        self.synchronizer
            .sync_account_locked(multisig, Some(&oldest_cursor))
            .await?;

        // input freshness: only currently owned utxos, and strictly in
        // order starting from the oldest
        let mut contains_oldest = false;
        for input in &decoded.ins {
            let key = (input.outpoint.tx_hash.clone(), input.outpoint.vout);
            if !owned.contains(&key) {
                debug!("{multisig}: proposed input {}:{} not owned", key.0, key.1);
                return Err(OracleError::UnknownUtxo);
            }
            if key == oldest {
                contains_oldest = true;
            }
        }
        if !contains_oldest {
            debug!("{multisig}: proposal omits oldest utxo {}:{}", oldest.0, oldest.1);
            return Err(OracleError::StaleReference);
        }

        // output solvency against the freshly synchronized state
        let state = self
            .synchronizer
            .store()
            .load(multisig)?
            .ok_or_else(|| OracleError::ContractNotFound(multisig.to_string()))?;
        for output in &decoded.outs {
            if output.color == 0 {
                // payload carrier, no value
                continue;
            }
            let address = chain_address_from_script(&output.script_hex);
            if address.as_deref() == Some(multisig) {
                // change back to the account
                continue;
            }
            // the recipient must resolve to a ledger account; an output the
            // mapper cannot classify is never signed off
            let recipient = match (&request.contract_address, address) {
                (Some(contract), _) => contract.clone(),
                (None, Some(address)) => chain_to_ledger_address(&address)?.to_string(),
                (None, None) => {
                    return Err(OracleError::malformed(format!(
                        "output {} pays an unclassifiable script",
                        output.script_hex
                    )))
                }
            };
            let account = state
                .accounts
                .get(&recipient)
                .ok_or_else(|| OracleError::AccountNotFound(recipient.clone()))?;
            let available = account.balance_of(output.color);
            if available < output.value {
                return Err(OracleError::InsufficientFunds {
                    color: output.color,
                    available,
                    required: output.value,
                });
            }
        }

        let signature =
            self.signer
                .sign_input(&request.raw_tx, request.input_index, &request.script)?;
        info!("{multisig}: cosigned input {} of proposed tx", request.input_index);
        Ok(signature)
    }

    /// Scans the account's UTXO set for the oldest confirmed entry and the
    /// full set of owned outpoints. Unconfirmed entries stay spendable-set
    /// members but never become the oldest reference.
    async fn oldest_utxo(
        &self,
        address: &str,
    ) -> Result<((TxHash, u32), SyncCursor, HashSet<(TxHash, u32)>)> {
        let backend = &**self.synchronizer.backend();
        let attempts = self.synchronizer.retry_attempts();

        let utxos = with_retry(attempts, || async move {
            backend.get_address_utxos(address).await
        })
        .await?;

        let mut owned = HashSet::with_capacity(utxos.len());
        let mut oldest: Option<((TxHash, u32), SyncCursor)> = None;
        for utxo in utxos {
            owned.insert((utxo.txid.clone(), utxo.vout));

            let txid = utxo.txid.as_str();
            let raw = with_retry(attempts, || async move { backend.get_tx(txid).await })
                .await?
                .ok_or(OracleError::TxNotFound)?;
            let tx = normalize(&raw)?;
            let Some(blockhash) = tx.blockhash else {
                debug!("{address}: utxo {}:{} unconfirmed, skipped", utxo.txid, utxo.vout);
                continue;
            };
            let blockhash_ref = blockhash.as_str();
            let block = with_retry(attempts, || async move {
                backend.get_block_by_hash(blockhash_ref).await
            })
            .await?;
            let Some(block) = block else {
                debug!("{address}: utxo {}:{} block unknown, skipped", utxo.txid, utxo.vout);
                continue;
            };

            let cursor = SyncCursor { block_time: block.time, tx_hash: utxo.txid.clone() };
            let candidate = ((utxo.txid, utxo.vout), cursor);
            match &oldest {
                Some((_, best)) if *best <= candidate.1 => {}
                _ => oldest = Some(candidate),
            }
        }

        let (outpoint, cursor) =
            oldest.ok_or(OracleError::StaleReference)?;
        Ok((outpoint, cursor, owned))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oracle_chain::Utxo;
    use oracle_core::wire::{encode_raw_tx, OutPoint, RawInput, RawOutput, RawTx};
    use oracle_core::{Amount, LedgerAddress};

    use super::*;
    use crate::state::{LedgerState, SyncCursor};
    use crate::testutil::{
        multisig_address, normal_tx, p2pkh_script, test_synchronizer, MockBackend, StubSigner,
    };

    const RECIPIENT: LedgerAddress = LedgerAddress([0x33; 20]);

    fn utxo_hash(tag: u8) -> String {
        hex::encode([tag; 32])
    }

    /// Account with two confirmed UTXOs: U1 (oldest, block time 100) and U2
    /// (block time 200); the recipient account holds 100 of color 1.
    fn scenario(dir: &std::path::Path) -> CosignValidator {
        let multisig = multisig_address();
        let mut backend = MockBackend::default();
        backend.add_block("b1", 100);
        backend.add_block("b2", 200);
        backend.add_tx(normal_tx(&utxo_hash(0x11), Some("b1"), &[], &[(&multisig, 100, 1)]));
        backend.add_tx(normal_tx(&utxo_hash(0x22), Some("b2"), &[], &[(&multisig, 60, 1)]));
        backend.utxos.insert(
            multisig.clone(),
            vec![
                Utxo { txid: utxo_hash(0x11), vout: 0, amount: 100, color: 1 },
                Utxo { txid: utxo_hash(0x22), vout: 0, amount: 60, color: 1 },
            ],
        );

        let (synchronizer, store, _) = test_synchronizer(backend, dir);
        let mut state = LedgerState::default();
        state.account_mut(&RECIPIENT).credit(1, 100);
        // already synchronized past both funding transactions
        state.cursor = Some(SyncCursor { block_time: 200, tx_hash: utxo_hash(0x22) });
        store.save(&multisig, &state).unwrap();

        CosignValidator::new(synchronizer, Arc::new(StubSigner))
    }

    fn proposal(inputs: &[u8], pay: Amount) -> CosignRequest {
        let tx = RawTx {
            version: 1,
            ins: inputs
                .iter()
                .map(|&tag| RawInput {
                    outpoint: OutPoint { tx_hash: utxo_hash(tag), vout: 0 },
                    script_hex: String::new(),
                    sequence: 0xffff_ffff,
                })
                .collect(),
            outs: vec![RawOutput { value: pay, color: 1, script_hex: p2pkh_script(&RECIPIENT) }],
            locktime: 0,
        };
        CosignRequest {
            raw_tx: hex::encode(encode_raw_tx(&tx).unwrap()),
            input_index: 0,
            script: "52ae".into(),
            multisig_address: multisig_address(),
            contract_address: None,
        }
    }

    #[tokio::test]
    async fn spend_including_oldest_utxo_is_signed() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let signature = validator
            .validate_and_sign(&proposal(&[0x11, 0x22], 50))
            .await
            .unwrap();
        assert_eq!(signature, "stub-signature-0");
    }

    #[tokio::test]
    async fn omitting_oldest_utxo_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let err = validator
            .validate_and_sign(&proposal(&[0x22], 50))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::StaleReference));
    }

    #[tokio::test]
    async fn foreign_utxo_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let err = validator
            .validate_and_sign(&proposal(&[0x11, 0x99], 50))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::UnknownUtxo));
    }

    #[tokio::test]
    async fn overdraft_is_insufficient_funds() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let err = validator
            .validate_and_sign(&proposal(&[0x11, 0x22], 150))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OracleError::InsufficientFunds { color: 1, available: 100, required: 150 }
        ));
    }

    #[tokio::test]
    async fn nonstandard_output_script_is_never_signed() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let mut request = proposal(&[0x11, 0x22], 50);
        // uncompressed-key p2pk, which the address mapper does not classify
        let tx = RawTx {
            version: 1,
            ins: vec![RawInput {
                outpoint: OutPoint { tx_hash: utxo_hash(0x11), vout: 0 },
                script_hex: String::new(),
                sequence: 0xffff_ffff,
            }],
            outs: vec![RawOutput {
                value: 1_000_000,
                color: 1,
                script_hex: format!("41{}ac", "ab".repeat(65)),
            }],
            locktime: 0,
        };
        request.raw_tx = hex::encode(encode_raw_tx(&tx).unwrap());
        let err = validator.validate_and_sign(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::MalformedTransaction(_)));
    }

    #[tokio::test]
    async fn contract_override_still_checks_solvency() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let mut request = proposal(&[0x11, 0x22], 150);
        // an override routes the check to the contract account, it never
        // bypasses it
        request.contract_address = Some(RECIPIENT.to_string());
        let err = validator.validate_and_sign(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn unknown_recipient_is_account_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let mut request = proposal(&[0x11, 0x22], 50);
        let tx = RawTx {
            version: 1,
            ins: vec![RawInput {
                outpoint: OutPoint { tx_hash: utxo_hash(0x11), vout: 0 },
                script_hex: String::new(),
                sequence: 0xffff_ffff,
            }],
            outs: vec![RawOutput {
                value: 5,
                color: 1,
                script_hex: p2pkh_script(&LedgerAddress([0x77; 20])),
            }],
            locktime: 0,
        };
        request.raw_tx = hex::encode(encode_raw_tx(&tx).unwrap());
        let err = validator.validate_and_sign(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn change_outputs_are_not_solvency_checked() {
        let dir = tempfile::tempdir().unwrap();
        let validator = scenario(dir.path());
        let mut request = proposal(&[0x11, 0x22], 50);
        let change_script = {
            let own = chain_to_ledger_address(&multisig_address()).unwrap();
            format!("a914{own}87")
        };
        let tx = RawTx {
            version: 1,
            ins: vec![
                RawInput {
                    outpoint: OutPoint { tx_hash: utxo_hash(0x11), vout: 0 },
                    script_hex: String::new(),
                    sequence: 0xffff_ffff,
                },
                RawInput {
                    outpoint: OutPoint { tx_hash: utxo_hash(0x22), vout: 0 },
                    script_hex: String::new(),
                    sequence: 0xffff_ffff,
                },
            ],
            outs: vec![
                RawOutput { value: 50, color: 1, script_hex: p2pkh_script(&RECIPIENT) },
                // huge change output back to the multisig itself
                RawOutput { value: 1_000_000, color: 1, script_hex: change_script },
            ],
            locktime: 0,
        };
        request.raw_tx = hex::encode(encode_raw_tx(&tx).unwrap());
        validator.validate_and_sign(&request).await.unwrap();
    }
}
