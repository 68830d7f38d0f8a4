//! Multisig Account Descriptors, created by the proposal workflow and
//! read-only for the synchronizer and validator.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use oracle_core::{ChainAddress, OracleError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisigDescriptor {
    pub multisig_address: ChainAddress,
    pub public_keys: Vec<String>,
    pub required_signatures: u32,
    /// Derived-ledger account this multisig administers, when it fronts a
    /// contract account. Hex ledger address.
    pub contract_address: Option<String>,
    /// Chain-backend notification subscription, filled in at registration.
    pub subscription_id: Option<String>,
}

/// Directory of descriptor files, one per multisig address, sibling to the
/// state store.
#[derive(Debug, Clone)]
pub struct MultisigRegistry {
    dir: PathBuf,
}

impl MultisigRegistry {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(MultisigRegistry { dir })
    }

    fn path(&self, multisig_address: &str) -> Result<PathBuf> {
        if multisig_address.is_empty()
            || !multisig_address.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(OracleError::malformed(format!(
                "invalid multisig address: {multisig_address}"
            )));
        }
        Ok(self.dir.join(format!("{multisig_address}.json")))
    }

    pub fn load(&self, multisig_address: &str) -> Result<Option<MultisigDescriptor>> {
        let path = self.path(multisig_address)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a descriptor, mapping absence to `MultisigNotFound`.
    pub fn require(&self, multisig_address: &str) -> Result<MultisigDescriptor> {
        self.load(multisig_address)?
            .ok_or_else(|| OracleError::MultisigNotFound(multisig_address.to_string()))
    }

    pub fn save(&self, descriptor: &MultisigDescriptor) -> Result<()> {
        let path = self.path(&descriptor.multisig_address)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(descriptor)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MultisigRegistry::open(dir.path()).unwrap();
        assert!(matches!(
            registry.require("3Missing"),
            Err(OracleError::MultisigNotFound(_))
        ));

        let descriptor = MultisigDescriptor {
            multisig_address: "3Abc".into(),
            public_keys: vec!["02aa".into(), "03bb".into()],
            required_signatures: 2,
            contract_address: None,
            subscription_id: Some("sub-1".into()),
        };
        registry.save(&descriptor).unwrap();
        assert_eq!(registry.require("3Abc").unwrap(), descriptor);
    }
}
