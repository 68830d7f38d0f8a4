//! Deterministic mapping between the UTXO address space and the derived
//! ledger account space, plus contract-account address derivation.

use once_cell::sync::Lazy;
use regex::Regex;
use ripemd::Ripemd160;
use rlp::RlpStream;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::error::{OracleError, Result};
use crate::types::{ChainAddress, LedgerAddress, Nonce};

/// Version byte for pay-to-pubkey-hash / pay-to-pubkey addresses.
pub const PUBKEY_HASH_VERSION: u8 = 0x00;
/// Version byte for pay-to-script-hash addresses.
pub const SCRIPT_HASH_VERSION: u8 = 0x05;

static PUBKEY_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^76a914[a-f0-9]{40}88ac$").unwrap());
static PUBKEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^21[a-f0-9]{66}ac$").unwrap());
static SCRIPT_HASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^a914[a-f0-9]{40}87$").unwrap());

/// Classifies a spending-condition script by its fixed-length pattern and
/// returns the checksum-encoded chain address, or `None` when the script is
/// not one of the three standard forms.
pub fn chain_address_from_script(script_hex: &str) -> Option<ChainAddress> {
    let script = script_hex.to_ascii_lowercase();
    let (hash, version) = if PUBKEY_HASH_RE.is_match(&script) {
        (hex::decode(&script[6..script.len() - 4]).ok()?, PUBKEY_HASH_VERSION)
    } else if PUBKEY_RE.is_match(&script) {
        let pubkey = hex::decode(&script[2..script.len() - 2]).ok()?;
        (hash160(&pubkey).to_vec(), PUBKEY_HASH_VERSION)
    } else if SCRIPT_HASH_RE.is_match(&script) {
        (hex::decode(&script[4..script.len() - 2]).ok()?, SCRIPT_HASH_VERSION)
    } else {
        return None;
    };
    let bytes: [u8; 20] = hash.try_into().ok()?;
    Some(base58check_encode(version, &bytes))
}

/// Projects a chain address onto its derived-ledger counterpart. Pure
/// decoding; the inverse is [`ledger_to_chain_address`].
pub fn chain_to_ledger_address(address: &str) -> Result<LedgerAddress> {
    let (_, hash) = base58check_decode(address)?;
    Ok(LedgerAddress(hash))
}

/// Projects a ledger address back onto the chain address space.
pub fn ledger_to_chain_address(address: &LedgerAddress, version: u8) -> ChainAddress {
    base58check_encode(version, address.as_bytes())
}

/// Deterministic contract-account address: last 20 bytes of
/// Keccak256(rlp([creator, nonce])). One-way; contract accounts are reached
/// through their registered multisig descriptor, never by inverting this.
pub fn derive_contract_address(creator: &LedgerAddress, nonce: Option<Nonce>) -> LedgerAddress {
    let mut stream = RlpStream::new_list(2);
    stream.append(&creator.as_bytes().to_vec());
    stream.append(&nonce.unwrap_or(0));
    let digest = Keccak256::digest(stream.out());
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..32]);
    LedgerAddress(out)
}

pub fn base58check_encode(version: u8, payload: &[u8; 20]) -> String {
    let mut buf = Vec::with_capacity(25);
    buf.push(version);
    buf.extend_from_slice(payload);
    let checksum = Sha256::digest(Sha256::digest(&buf));
    buf.extend_from_slice(&checksum[..4]);
    bs58::encode(buf).into_string()
}

pub fn base58check_decode(address: &str) -> Result<(u8, [u8; 20])> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|_| OracleError::malformed(format!("bad base58 address: {address}")))?;
    if raw.len() != 25 {
        return Err(OracleError::malformed(format!(
            "address payload must be 25 bytes, got {}",
            raw.len()
        )));
    }
    let checksum = Sha256::digest(Sha256::digest(&raw[..21]));
    if checksum[..4] != raw[21..] {
        return Err(OracleError::malformed(format!("address checksum mismatch: {address}")));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&raw[1..21]);
    Ok((raw[0], hash))
}

fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY_HASH_SCRIPT: &str =
        "76a914f1df95e2c76b7faad4bde1daa1b1895bc8dba39988ac";
    const SCRIPT_HASH_SCRIPT: &str = "a914f1df95e2c76b7faad4bde1daa1b1895bc8dba39987";

    #[test]
    fn classifies_pubkey_hash_script() {
        let addr = chain_address_from_script(PUBKEY_HASH_SCRIPT).unwrap();
        // version 0x00 addresses start with '1'
        assert!(addr.starts_with('1'), "got {addr}");
        let ledger = chain_to_ledger_address(&addr).unwrap();
        assert_eq!(ledger.to_string(), "f1df95e2c76b7faad4bde1daa1b1895bc8dba399");
    }

    #[test]
    fn classifies_script_hash_script() {
        let addr = chain_address_from_script(SCRIPT_HASH_SCRIPT).unwrap();
        // version 0x05 addresses start with '3'
        assert!(addr.starts_with('3'), "got {addr}");
    }

    #[test]
    fn classifies_pubkey_script() {
        let pubkey = "02".to_string() + &"ab".repeat(32);
        let script = format!("21{pubkey}ac");
        let addr = chain_address_from_script(&script).unwrap();
        let expected = hash160(&hex::decode(&pubkey).unwrap());
        assert_eq!(*chain_to_ledger_address(&addr).unwrap().as_bytes(), expected);
    }

    #[test]
    fn rejects_unknown_script() {
        assert_eq!(chain_address_from_script("6a4c50deadbeef"), None);
        assert_eq!(chain_address_from_script(""), None);
    }

    #[test]
    fn address_bijection() {
        let ledger = LedgerAddress([0x42; 20]);
        let chain = ledger_to_chain_address(&ledger, PUBKEY_HASH_VERSION);
        assert_eq!(chain_to_ledger_address(&chain).unwrap(), ledger);
        // and the other direction, starting from a chain address
        let addr = chain_address_from_script(PUBKEY_HASH_SCRIPT).unwrap();
        let round =
            ledger_to_chain_address(&chain_to_ledger_address(&addr).unwrap(), PUBKEY_HASH_VERSION);
        assert_eq!(round, addr);
    }

    #[test]
    fn decode_rejects_tampered_checksum() {
        let addr = ledger_to_chain_address(&LedgerAddress([7; 20]), PUBKEY_HASH_VERSION);
        let mut tampered = addr.into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'2' { b'3' } else { b'2' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(base58check_decode(&tampered).is_err());
    }

    #[test]
    fn contract_address_is_deterministic() {
        let creator = LedgerAddress([0x11; 20]);
        let a = derive_contract_address(&creator, Some(3));
        let b = derive_contract_address(&creator, Some(3));
        assert_eq!(a, b);
        assert_ne!(a, derive_contract_address(&creator, Some(4)));
        assert_ne!(a, derive_contract_address(&LedgerAddress([0x12; 20]), Some(3)));
        // unknown nonce defaults to 0
        assert_eq!(
            derive_contract_address(&creator, None),
            derive_contract_address(&creator, Some(0))
        );
    }
}
