//! Persisted Account Ledger State: one JSON document per state-multisig
//! address, holding every derived account it administers plus the
//! synchronization cursor.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use oracle_core::{Amount, Color, LedgerAddress, Nonce, OracleError, Result, TxHash};

/// One derived-ledger account. `code` is set once at deployment and
/// immutable afterward; `storage` is opaque to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    #[serde(default)]
    pub nonce: Nonce,
    #[serde(default)]
    pub balance: BTreeMap<Color, Amount>,
    #[serde(default)]
    pub storage: BTreeMap<String, String>,
    #[serde(default)]
    pub code: String,
}

impl AccountRecord {
    pub fn balance_of(&self, color: Color) -> Amount {
        self.balance.get(&color).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, color: Color, amount: Amount) {
        *self.balance.entry(color).or_insert(0) += amount;
    }

    pub fn debit(&mut self, color: Color, amount: Amount) {
        let entry = self.balance.entry(color).or_insert(0);
        *entry = entry.saturating_sub(amount);
    }
}

/// The synchronization cursor: reference of the newest chain transaction
/// folded into the state. Ordered by confirmation block time, hash as
/// tiebreak; it only ever advances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncCursor {
    pub block_time: u64,
    pub tx_hash: TxHash,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Keyed by ledger address in lowercase hex.
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountRecord>,
    pub cursor: Option<SyncCursor>,
}

impl LedgerState {
    pub fn account(&self, address: &LedgerAddress) -> Option<&AccountRecord> {
        self.accounts.get(&address.to_string())
    }

    pub fn account_mut(&mut self, address: &LedgerAddress) -> &mut AccountRecord {
        self.accounts.entry(address.to_string()).or_default()
    }

    /// Whether the cursor has already passed the given reference.
    pub fn applied(&self, cursor: &SyncCursor) -> bool {
        self.cursor.as_ref().is_some_and(|c| c >= cursor)
    }
}

/// Directory-backed store, one file per state-multisig address. Writes go
/// through a temp file and rename so a crashed write never leaves a
/// truncated state behind.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(StateStore { dir })
    }

    fn path(&self, multisig_address: &str) -> Result<PathBuf> {
        // state files are keyed by base58 addresses; anything else would
        // escape the store directory
        if multisig_address.is_empty()
            || !multisig_address.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(OracleError::malformed(format!(
                "invalid multisig address: {multisig_address}"
            )));
        }
        Ok(self.dir.join(multisig_address))
    }

    pub fn load(&self, multisig_address: &str) -> Result<Option<LedgerState>> {
        let path = self.path(multisig_address)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, multisig_address: &str, state: &LedgerState) -> Result<()> {
        let path = self.path(multisig_address)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn exists(&self, multisig_address: &str) -> bool {
        self.path(multisig_address).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
