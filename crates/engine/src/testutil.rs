//! Shared fixtures for engine tests: an in-memory chain backend and raw
//! transaction builders in the node-RPC shape.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use oracle_chain::{ChainBackend, ChainBlock, Signer, Subscription, Utxo};
use oracle_core::address::ledger_to_chain_address;
use oracle_core::{Amount, ChainAddress, Color, LedgerAddress, Result, TxHash};

use crate::locks::AccountLocks;
use crate::registry::{MultisigDescriptor, MultisigRegistry};
use crate::state::StateStore;
use crate::sync::Synchronizer;

#[derive(Default)]
pub struct MockBackend {
    pub txs: HashMap<String, Value>,
    pub blocks: HashMap<String, ChainBlock>,
    pub utxos: HashMap<String, Vec<Utxo>>,
    pub address_txs: HashMap<String, Vec<Value>>,
}

impl MockBackend {
    pub fn add_block(&mut self, hash: &str, time: u64) {
        self.blocks.insert(
            hash.to_string(),
            ChainBlock { hash: hash.to_string(), height: time, time },
        );
    }

    pub fn add_tx(&mut self, raw: Value) {
        let hash = raw["txid"].as_str().expect("fixture tx needs txid").to_string();
        self.txs.insert(hash, raw);
    }

    pub fn add_address_tx(&mut self, address: &str, raw: Value) {
        self.add_tx(raw.clone());
        self.address_txs.entry(address.to_string()).or_default().push(raw);
    }
}

#[async_trait]
impl ChainBackend for MockBackend {
    async fn get_tx(&self, tx_hash: &str) -> Result<Option<Value>> {
        Ok(self.txs.get(tx_hash).cloned())
    }

    async fn get_block_by_hash(&self, block_hash: &str) -> Result<Option<ChainBlock>> {
        Ok(self.blocks.get(block_hash).cloned())
    }

    async fn get_latest_blocks(&self) -> Result<Vec<ChainBlock>> {
        let mut blocks: Vec<ChainBlock> = self.blocks.values().cloned().collect();
        blocks.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(blocks)
    }

    async fn get_address_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        Ok(self.utxos.get(address).cloned().unwrap_or_default())
    }

    async fn get_address_balance(
        &self,
        _address: &str,
        _color: Option<Color>,
    ) -> Result<BTreeMap<Color, Amount>> {
        Ok(BTreeMap::new())
    }

    async fn get_license_info(&self, color: Color) -> Result<Value> {
        Ok(json!({ "color": color }))
    }

    async fn get_txs_by_address(&self, address: &str) -> Result<Vec<Value>> {
        Ok(self.address_txs.get(address).cloned().unwrap_or_default())
    }

    async fn subscribe_address_notification(
        &self,
        _address: &str,
        _callback_url: &str,
        _confirmations: u32,
    ) -> Result<Subscription> {
        Ok(Subscription { id: "sub-test".into(), created_time: "0".into() })
    }

    async fn send_raw_tx(&self, _raw_tx_hex: &str) -> Result<TxHash> {
        Ok("00".repeat(32))
    }
}

pub struct StubSigner;

impl Signer for StubSigner {
    fn sign_input(
        &self,
        _raw_tx_hex: &str,
        input_index: usize,
        _script_hex: &str,
    ) -> Result<String> {
        Ok(format!("stub-signature-{input_index}"))
    }
}

pub fn sender_address() -> ChainAddress {
    ledger_to_chain_address(&LedgerAddress([0xaa; 20]), 0x00)
}

pub fn multisig_address() -> ChainAddress {
    ledger_to_chain_address(&LedgerAddress([0xbb; 20]), 0x05)
}

pub fn p2pkh_script(address: &LedgerAddress) -> String {
    format!("76a914{address}88ac")
}

pub fn normal_tx(
    hash: &str,
    blockhash: Option<&str>,
    vins: &[(&str, u32)],
    vouts: &[(&str, Amount, Color)],
) -> Value {
    let vin: Vec<Value> = vins
        .iter()
        .map(|(tx, n)| json!({ "txid": tx, "vout": n }))
        .collect();
    let vout: Vec<Value> = vouts
        .iter()
        .enumerate()
        .map(|(n, (address, amount, color))| {
            json!({ "value": amount, "color": color, "n": n,
                    "scriptPubKey": { "hex": "", "addresses": [address] } })
        })
        .collect();
    let mut tx = json!({
        "txid": hash,
        "type": "NORMAL",
        "time": 0,
        "confirmations": 6,
        "vin": vin,
        "vout": vout,
    });
    if let Some(blockhash) = blockhash {
        tx["blockhash"] = json!(blockhash);
    }
    tx
}

pub fn deploy_tx(
    hash: &str,
    blockhash: &str,
    vin: (&str, u32),
    multisig: &str,
    source_code: &str,
) -> Value {
    let payload = json!({ "multisig_address": multisig, "source_code": source_code });
    let script = hex::encode(serde_json::to_vec(&payload).unwrap());
    json!({
        "txid": hash,
        "type": "CONTRACT",
        "time": 0,
        "blockhash": blockhash,
        "confirmations": 6,
        "vin": [{ "txid": vin.0, "vout": vin.1 }],
        "vout": [
            { "value": 0, "color": 0, "n": 0,
              "scriptPubKey": { "hex": "6a", "asm": format!("OP_RETURN {script}") } }
        ],
    })
}

pub fn call_tx(
    hash: &str,
    blockhash: &str,
    vin: (&str, u32),
    multisig: &str,
    contract_address: &str,
    storage_updates: Value,
    balance_updates: Value,
) -> Value {
    let payload = json!({
        "multisig_address": multisig,
        "function_inputs_hash": "cafe",
        "contract_address": contract_address,
        "storage_updates": storage_updates,
        "balance_updates": balance_updates,
    });
    let script = hex::encode(serde_json::to_vec(&payload).unwrap());
    json!({
        "txid": hash,
        "type": "CONTRACT",
        "time": 0,
        "blockhash": blockhash,
        "confirmations": 6,
        "vin": [{ "txid": vin.0, "vout": vin.1 }],
        "vout": [
            { "value": 0, "color": 0, "n": 0,
              "scriptPubKey": { "hex": "6a", "asm": format!("OP_RETURN {script}") } }
        ],
    })
}

/// Wires a synchronizer over the given backend with fresh temp stores and a
/// registered descriptor for [`multisig_address`].
pub fn test_synchronizer(
    backend: MockBackend,
    dir: &std::path::Path,
) -> (Arc<Synchronizer>, Arc<StateStore>, Arc<MultisigRegistry>) {
    let store = Arc::new(StateStore::open(dir.join("states")).unwrap());
    let registry = Arc::new(MultisigRegistry::open(dir.join("multisigs")).unwrap());
    registry
        .save(&MultisigDescriptor {
            multisig_address: multisig_address(),
            public_keys: vec!["02aa".into()],
            required_signatures: 1,
            contract_address: None,
            subscription_id: None,
        })
        .unwrap();
    let synchronizer = Arc::new(Synchronizer::new(
        Arc::new(backend),
        store.clone(),
        registry.clone(),
        Arc::new(AccountLocks::new()),
        3,
    ));
    (synchronizer, store, registry)
}
