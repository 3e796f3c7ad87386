//! Trusted key stores, scoped by role.
//!
//! Skill-signing keys and revocation-signing keys live in separate keyrings;
//! a key trusted for one role grants nothing for the other.

use std::collections::HashMap;

use crate::crypto;
use crate::error::Error;

/// Mapping from key id to trusted public key PEM.
///
/// Verification treats an unknown key id as "not trusted" rather than an
/// error; whether that fails the operation is decided by the caller once all
/// candidate signatures are exhausted.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: HashMap<String, String>,
}

impl Keyring {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Add a trusted key, deriving its id from the SPKI digest.
    /// Returns the derived key id.
    pub fn insert_pem(&mut self, public_key_pem: &str) -> Result<String, Error> {
        let key_id = crypto::calculate_key_id(public_key_pem)?;
        self.keys.insert(key_id.clone(), public_key_pem.to_string());
        Ok(key_id)
    }

    /// Add a trusted key under an externally supplied stable id.
    /// The PEM must still parse as an Ed25519 public key.
    pub fn insert_with_id(&mut self, key_id: &str, public_key_pem: &str) -> Result<(), Error> {
        crypto::load_verifying_key(public_key_pem)?;
        self.keys.insert(key_id.to_string(), public_key_pem.to_string());
        Ok(())
    }

    pub fn get(&self, key_id: &str) -> Option<&str> {
        self.keys.get(key_id).map(|s| s.as_str())
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Serialize the keyring to JSON as a keyid-to-PEM map.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.keys)?)
    }

    /// Deserialize a keyring from JSON, validating every key.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let keys: HashMap<String, String> = serde_json::from_str(json)?;
        for pem in keys.values() {
            crypto::load_verifying_key(pem)?;
        }
        Ok(Self { keys })
    }
}
