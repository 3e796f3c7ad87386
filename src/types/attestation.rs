use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Schema version stamped into every artifact this crate emits.
///
/// Verification rejects any other value; forward-compatible guessing is
/// deliberately refused.
pub const SCHEMA_VERSION: &str = "1";

/// Payload type bound into the PAE and the signature envelope. Frozen.
pub const PAYLOAD_TYPE: &str = "application/vnd.haldir.attestation+json";

/// Map from relative path to content hash over a skill tree.
///
/// Paths are POSIX-style and relative to the skill root; every hash is
/// `"sha256:" + 64 lowercase hex` over the file's byte contents. The
/// `generated_at` timestamp is informational and excluded from hashing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityManifest {
    pub schema_version: String,
    pub algorithm: String,
    pub files: BTreeMap<String, String>,
    pub generated_at: String,
}

/// Identity of the skill being attested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkillIdentity {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SkillIdentity {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind: "skill".to_string(),
        }
    }
}

/// The signed claim: a skill identity bound to the hashes of its integrity
/// manifest and its declared permissions.
///
/// Both hashes cover the canonical byte encoding of the corresponding
/// document, not the on-disk file bytes, so stored artifacts tolerate
/// whitespace and key-order drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attestation {
    pub schema_version: String,
    pub skill: SkillIdentity,
    pub integrity_hash: String,
    pub permissions_hash: String,
    pub signed_at: String,
}

/// Detached signature envelope written to `.vault/signature.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureEnvelope {
    pub schema_version: String,
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    /// base64url (no padding) of the attestation's canonical bytes.
    pub payload: String,
    pub signatures: Vec<EnvelopeSignature>,
}

/// One signature entry. Verification passes if any entry validates under a
/// trusted key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeSignature {
    pub keyid: String,
    /// base64url (no padding) Ed25519 signature over the PAE.
    pub sig: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_serde_roundtrip() {
        let mut files = BTreeMap::new();
        files.insert(
            "SKILL.md".to_string(),
            format!("sha256:{}", "a".repeat(64)),
        );
        let manifest = IntegrityManifest {
            schema_version: SCHEMA_VERSION.to_string(),
            algorithm: "sha256".to_string(),
            files,
            generated_at: "2026-08-01T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_string_pretty(&manifest).unwrap();
        let back: IntegrityManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, back);
    }

    #[test]
    fn test_skill_identity_type_field_name() {
        let skill = SkillIdentity::new("pdf-tools", "1.2.0");
        let json = serde_json::to_string(&skill).unwrap();
        assert!(json.contains("\"type\":\"skill\""));
        assert!(!json.contains("\"kind\""));
    }

    #[test]
    fn test_envelope_payload_type_field_name() {
        let envelope = SignatureEnvelope {
            schema_version: SCHEMA_VERSION.to_string(),
            payload_type: PAYLOAD_TYPE.to_string(),
            payload: "e30".to_string(),
            signatures: vec![EnvelopeSignature {
                keyid: "deadbeefdeadbeef".to_string(),
                sig: "c2ln".to_string(),
            }],
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"payloadType\""));
        let back: SignatureEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }
}
