//! Wire codec for proposed chain transactions as submitted for cosigning:
//! the standard UTXO serialization with a 4-byte color per output. Only
//! decoding and sighash construction are needed here; the oracle never
//! authors transactions.

use sha2::{Digest, Sha256};

use crate::error::{OracleError, Result};
use crate::types::{Amount, Color, TxHash};

pub const SIGHASH_ALL: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutPoint {
    /// Big-endian display order, as upstream reports tx hashes.
    pub tx_hash: TxHash,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInput {
    pub outpoint: OutPoint,
    pub script_hex: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub value: Amount,
    pub color: Color,
    pub script_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTx {
    pub version: u32,
    pub ins: Vec<RawInput>,
    pub outs: Vec<RawOutput>,
    pub locktime: u32,
}

pub fn decode_raw_tx(raw_hex: &str) -> Result<RawTx> {
    let bytes = hex::decode(raw_hex.trim())
        .map_err(|_| OracleError::malformed("raw transaction is not valid hex"))?;
    let mut cursor = Cursor::new(&bytes);

    let version = cursor.read_u32()?;
    let n_ins = cursor.read_varint()?;
    // counts are attacker-controlled; allocation grows with actual reads
    let mut ins = Vec::new();
    for _ in 0..n_ins {
        let mut hash = cursor.read_bytes(32)?.to_vec();
        hash.reverse();
        let vout = cursor.read_u32()?;
        let script_len = cursor.read_varint()?;
        let script = cursor.read_bytes(script_len as usize)?;
        let sequence = cursor.read_u32()?;
        ins.push(RawInput {
            outpoint: OutPoint { tx_hash: hex::encode(hash), vout },
            script_hex: hex::encode(script),
            sequence,
        });
    }

    let n_outs = cursor.read_varint()?;
    let mut outs = Vec::new();
    for _ in 0..n_outs {
        let value = cursor.read_u64()?;
        let color = cursor.read_u32()?;
        let script_len = cursor.read_varint()?;
        let script = cursor.read_bytes(script_len as usize)?;
        outs.push(RawOutput { value, color, script_hex: hex::encode(script) });
    }

    let locktime = cursor.read_u32()?;
    if !cursor.is_empty() {
        return Err(OracleError::malformed("trailing bytes after transaction"));
    }
    Ok(RawTx { version, ins, outs, locktime })
}

pub fn encode_raw_tx(tx: &RawTx) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&tx.version.to_le_bytes());
    write_varint(&mut out, tx.ins.len() as u64);
    for input in &tx.ins {
        let mut hash = hex::decode(&input.outpoint.tx_hash)
            .map_err(|_| OracleError::malformed("input tx hash is not valid hex"))?;
        if hash.len() != 32 {
            return Err(OracleError::malformed("input tx hash must be 32 bytes"));
        }
        hash.reverse();
        out.extend_from_slice(&hash);
        out.extend_from_slice(&input.outpoint.vout.to_le_bytes());
        let script = hex::decode(&input.script_hex)
            .map_err(|_| OracleError::malformed("input script is not valid hex"))?;
        write_varint(&mut out, script.len() as u64);
        out.extend_from_slice(&script);
        out.extend_from_slice(&input.sequence.to_le_bytes());
    }
    write_varint(&mut out, tx.outs.len() as u64);
    for output in &tx.outs {
        out.extend_from_slice(&output.value.to_le_bytes());
        out.extend_from_slice(&output.color.to_le_bytes());
        let script = hex::decode(&output.script_hex)
            .map_err(|_| OracleError::malformed("output script is not valid hex"))?;
        write_varint(&mut out, script.len() as u64);
        out.extend_from_slice(&script);
    }
    out.extend_from_slice(&tx.locktime.to_le_bytes());
    Ok(out)
}

/// SIGHASH_ALL digest for one input: every input script blanked except the
/// signed one, which carries the spending condition, then double-sha256 over
/// the serialization plus the hash-type word.
pub fn sighash_all(tx: &RawTx, input_index: usize, script_hex: &str) -> Result<[u8; 32]> {
    if input_index >= tx.ins.len() {
        return Err(OracleError::malformed(format!(
            "input index {input_index} out of range ({} inputs)",
            tx.ins.len()
        )));
    }
    let mut copy = tx.clone();
    for (i, input) in copy.ins.iter_mut().enumerate() {
        input.script_hex = if i == input_index { script_hex.to_string() } else { String::new() };
    }
    let mut preimage = encode_raw_tx(&copy)?;
    preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
    let digest = Sha256::digest(Sha256::digest(&preimage));
    Ok(digest.into())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| OracleError::malformed("transaction truncated"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_varint(&mut self) -> Result<u64> {
        let first = self.read_bytes(1)?[0];
        Ok(match first {
            0xfd => u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()) as u64,
            0xfe => u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()) as u64,
            0xff => u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()),
            n => n as u64,
        })
    }
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}
