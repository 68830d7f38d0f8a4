//! Normalization of heterogeneous upstream transaction shapes into
//! [`NormalizedTx`]. Each known backend dialect implements one canonical
//! extraction contract; no ad-hoc alias probing across shapes.

use serde_json::Value;

use crate::address::chain_address_from_script;
use crate::error::{OracleError, Result};
use crate::tx::{ContractPayload, NormalizedTx, TxInput, TxOutput, TxType};

/// Upstream response shape. `CoreRpc` is the node-RPC form
/// (`txid`/`vin`/`vout`/`value`, structured `scriptPubKey`); `Explorer` is
/// the REST-explorer form (`tx_id`/`vins`/`vouts`/`amount`, flat script
/// hex).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    CoreRpc,
    Explorer,
}

impl Dialect {
    pub fn detect(raw: &Value) -> Dialect {
        if raw.get("vin").is_some() || raw.get("txid").is_some() {
            Dialect::CoreRpc
        } else {
            Dialect::Explorer
        }
    }

    fn tx_hash<'a>(&self, raw: &'a Value) -> Option<&'a str> {
        match self {
            Dialect::CoreRpc => raw.get("txid").or_else(|| raw.get("hash"))?.as_str(),
            Dialect::Explorer => raw.get("tx_id").or_else(|| raw.get("hash"))?.as_str(),
        }
    }

    fn blockhash<'a>(&self, raw: &'a Value) -> Option<&'a str> {
        match self {
            Dialect::CoreRpc => raw.get("blockhash")?.as_str(),
            Dialect::Explorer => raw.get("block_hash")?.as_str(),
        }
    }

    fn confirmations(&self, raw: &Value) -> u64 {
        let field = match self {
            Dialect::CoreRpc => raw.get("confirmations"),
            Dialect::Explorer => raw.get("confirmation").or_else(|| raw.get("confirmations")),
        };
        field.and_then(as_u64).unwrap_or(0)
    }

    fn vins<'a>(&self, raw: &'a Value) -> Option<&'a Vec<Value>> {
        match self {
            Dialect::CoreRpc => raw.get("vin")?.as_array(),
            Dialect::Explorer => raw.get("vins")?.as_array(),
        }
    }

    fn vouts<'a>(&self, raw: &'a Value) -> Option<&'a Vec<Value>> {
        match self {
            Dialect::CoreRpc => raw.get("vout")?.as_array(),
            Dialect::Explorer => raw.get("vouts")?.as_array(),
        }
    }

    fn vin_tx_hash<'a>(&self, vin: &'a Value) -> Option<&'a str> {
        match self {
            Dialect::CoreRpc => vin.get("txid")?.as_str(),
            Dialect::Explorer => vin.get("tx_id").or_else(|| vin.get("tx_hash"))?.as_str(),
        }
    }

    fn output_amount(&self, vout: &Value) -> Option<u64> {
        match self {
            Dialect::CoreRpc => vout.get("value").and_then(as_u64),
            Dialect::Explorer => vout.get("amount").and_then(as_u64),
        }
    }

    fn output_address<'a>(&self, vout: &'a Value) -> Option<&'a str> {
        if let Some(addr) = vout.get("address").and_then(Value::as_str) {
            return Some(addr);
        }
        // CoreRpc nests addresses inside the spending condition
        vout.get("scriptPubKey")?
            .get("addresses")?
            .as_array()?
            .first()?
            .as_str()
    }

    fn output_script_hex<'a>(&self, vout: &'a Value) -> Option<&'a str> {
        match self {
            Dialect::CoreRpc => vout.get("scriptPubKey")?.get("hex")?.as_str(),
            Dialect::Explorer => vout.get("scriptPubKey")?.as_str(),
        }
    }

    /// The raw data-carrier hex of an output script, as used for embedded
    /// payloads. CoreRpc exposes it via the script's `asm` rendering with
    /// the leading `OP_RETURN ` dropped; Explorer serves the hex directly.
    fn output_payload_hex<'a>(&self, vout: &'a Value) -> Option<&'a str> {
        match self {
            Dialect::CoreRpc => {
                let asm = vout.get("scriptPubKey")?.get("asm")?.as_str()?;
                asm.strip_prefix("OP_RETURN ").or(Some(asm))
            }
            Dialect::Explorer => vout.get("scriptPubKey")?.as_str(),
        }
    }
}

/// Converts one raw upstream transaction into the canonical record.
pub fn normalize(raw: &Value) -> Result<NormalizedTx> {
    let dialect = Dialect::detect(raw);

    let hash = dialect
        .tx_hash(raw)
        .ok_or_else(|| OracleError::malformed("missing transaction hash"))?
        .to_string();
    let tx_type = TxType::parse(raw.get("type").and_then(Value::as_str).unwrap_or("NORMAL"));
    let time = raw.get("time").and_then(as_u64).unwrap_or(0);
    let blockhash = dialect.blockhash(raw).map(str::to_string);
    let confirmations = dialect.confirmations(raw);

    let mut vins = Vec::new();
    for vin in dialect.vins(raw).into_iter().flatten() {
        if vin.get("coinbase").is_some() {
            continue;
        }
        let tx_hash = dialect
            .vin_tx_hash(vin)
            .ok_or_else(|| OracleError::malformed("input lacks referenced tx hash"))?
            .to_string();
        let vout = vin
            .get("vout")
            .and_then(as_u64)
            .ok_or_else(|| OracleError::malformed("input lacks referenced output index"))?;
        vins.push(TxInput { tx_hash, vout: vout as u32 });
    }

    let mut vouts = Vec::new();
    for vout in dialect.vouts(raw).into_iter().flatten() {
        let n = vout
            .get("n")
            .and_then(as_u64)
            .ok_or_else(|| OracleError::malformed("output lacks positional index"))?
            as u32;
        let color = vout
            .get("color")
            .and_then(as_u64)
            .ok_or_else(|| OracleError::malformed("output lacks color"))? as u32;
        let amount = dialect
            .output_amount(vout)
            .ok_or_else(|| OracleError::malformed("output lacks amount"))?;
        let address = match dialect.output_address(vout) {
            Some(addr) => addr.to_string(),
            None => dialect
                .output_script_hex(vout)
                .and_then(chain_address_from_script)
                .unwrap_or_default(),
        };
        vouts.push(TxOutput { address, amount, color, n });
    }

    let payload = match &tx_type {
        TxType::Normal => None,
        TxType::Contract => Some(extract_payload(raw, dialect)?),
        // other special types (mint, license transfer) may carry a payload
        // but are not required to
        TxType::Other(_) => extract_payload(raw, dialect).ok(),
    };

    Ok(NormalizedTx {
        hash,
        tx_type,
        time,
        blockhash,
        confirmations,
        vins,
        vouts,
        payload,
    })
}

#[derive(serde::Deserialize)]
struct RawPayload {
    multisig_address: String,
    source_code: Option<String>,
    function_inputs_hash: Option<String>,
    contract_address: Option<String>,
    #[serde(default)]
    storage_updates: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    balance_updates: Vec<crate::tx::BalanceDelta>,
}

/// Finds the color-zero output and decodes the JSON document embedded in its
/// script (everything from the first `7b` marker, unhexed).
fn extract_payload(raw: &Value, dialect: Dialect) -> Result<ContractPayload> {
    let vouts = dialect
        .vouts(raw)
        .ok_or_else(|| OracleError::malformed("contract transaction has no outputs"))?;
    let carrier = vouts
        .iter()
        .find(|v| v.get("color").and_then(as_u64) == Some(0))
        .and_then(|v| dialect.output_payload_hex(v))
        .ok_or_else(|| OracleError::malformed("contract transaction has no payload output"))?;

    let begin = carrier
        .find("7b")
        .ok_or_else(|| OracleError::malformed("payload script has no data marker"))?;
    let bytes = hex::decode(&carrier[begin..])
        .map_err(|_| OracleError::malformed("payload data is not valid hex"))?;
    let parsed: RawPayload = serde_json::from_slice(&bytes)
        .map_err(|e| OracleError::malformed(format!("payload is not valid json: {e}")))?;

    match (parsed.source_code, parsed.function_inputs_hash) {
        (Some(code), None) => Ok(ContractPayload {
            is_deploy: true,
            bytecode: code,
            multisig_address: parsed.multisig_address,
            contract_address: None,
            storage_updates: parsed.storage_updates,
            balance_updates: parsed.balance_updates,
        }),
        (None, Some(inputs_hash)) => Ok(ContractPayload {
            is_deploy: false,
            bytecode: inputs_hash,
            multisig_address: parsed.multisig_address,
            contract_address: Some(parsed.contract_address.ok_or_else(|| {
                OracleError::malformed("contract call payload lacks contract address")
            })?),
            storage_updates: parsed.storage_updates,
            balance_updates: parsed.balance_updates,
        }),
        _ => Err(OracleError::malformed(
            "payload must carry exactly one of source_code or function_inputs_hash",
        )),
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .or_else(|| value.as_f64().map(|f| f as u64))
}
