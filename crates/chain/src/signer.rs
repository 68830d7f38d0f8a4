//! Signing primitive boundary. The oracle core never generates keys; a
//! [`Signer`] is constructed by the host with whatever key material the
//! deployment provides and injected into the validator.

use secp256k1::{Message, Secp256k1, SecretKey, SignOnly};

use oracle_core::wire::{decode_raw_tx, sighash_all};
use oracle_core::{OracleError, Result};

pub trait Signer: Send + Sync {
    /// Produces one partial signature (DER + hash-type byte, hex encoded)
    /// over the given input of the raw transaction, spending the given
    /// script.
    fn sign_input(&self, raw_tx_hex: &str, input_index: usize, script_hex: &str)
        -> Result<String>;
}

pub struct LocalSigner {
    secp: Secp256k1<SignOnly>,
    key: SecretKey,
}

impl LocalSigner {
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|_| OracleError::malformed("signing key is not valid hex"))?;
        let key = SecretKey::from_slice(&bytes)
            .map_err(|e| OracleError::malformed(format!("bad signing key: {e}")))?;
        Ok(LocalSigner { secp: Secp256k1::signing_only(), key })
    }
}

impl Signer for LocalSigner {
    fn sign_input(
        &self,
        raw_tx_hex: &str,
        input_index: usize,
        script_hex: &str,
    ) -> Result<String> {
        let tx = decode_raw_tx(raw_tx_hex)?;
        let digest = sighash_all(&tx, input_index, script_hex)?;
        let signature = self.secp.sign_ecdsa(&Message::from_digest(digest), &self.key);
        let mut blob = signature.serialize_der().to_vec();
        blob.push(oracle_core::wire::SIGHASH_ALL as u8);
        Ok(hex::encode(blob))
    }
}
