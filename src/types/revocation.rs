use serde::{Deserialize, Serialize};

/// Signed, monotonically sequenced list of withdrawn skill versions.
///
/// `signature.sig` is Ed25519 over the canonical encoding of the object with
/// the `signature` field removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationList {
    pub schema_version: String,
    pub sequence_number: u64,
    pub issued_at: String,
    pub expires_at: String,
    pub next_update: String,
    #[serde(default)]
    pub entries: Vec<RevocationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<ListSignature>,
}

/// A single withdrawal: the named versions of one skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationEntry {
    pub name: String,
    pub versions: Vec<String>,
    pub revoked_at: String,
    pub reason: RevocationReason,
    pub severity: RevocationSeverity,
}

/// Why a skill version was withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Malware,
    Vulnerability,
    PolicyViolation,
    Superseded,
    Unspecified,
}

/// Operator-facing urgency of a withdrawal. At runtime context the caller
/// decides how to act on it; at install context any revocation is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListSignature {
    pub keyid: String,
    pub sig: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_list() -> RevocationList {
        RevocationList {
            schema_version: "1".to_string(),
            sequence_number: 5,
            issued_at: "2026-08-01T00:00:00+00:00".to_string(),
            expires_at: "2026-08-08T00:00:00+00:00".to_string(),
            next_update: "2026-08-02T00:00:00+00:00".to_string(),
            entries: vec![RevocationEntry {
                name: "pdf-tools".to_string(),
                versions: vec!["1.0.0".to_string(), "1.0.1".to_string()],
                revoked_at: "2026-08-01T00:00:00+00:00".to_string(),
                reason: RevocationReason::Malware,
                severity: RevocationSeverity::Critical,
            }],
            signature: None,
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let list = make_list();
        let json = serde_json::to_string_pretty(&list).unwrap();
        let back: RevocationList = serde_json::from_str(&json).unwrap();
        assert_eq!(list, back);
    }

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&RevocationReason::PolicyViolation).unwrap(),
            "\"policy_violation\""
        );
        assert_eq!(
            serde_json::to_string(&RevocationSeverity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(RevocationSeverity::Critical > RevocationSeverity::High);
        assert!(RevocationSeverity::High > RevocationSeverity::Medium);
        assert!(RevocationSeverity::Medium > RevocationSeverity::Low);
    }

    #[test]
    fn test_absent_signature_elided() {
        let list = make_list();
        let json = serde_json::to_string(&list).unwrap();
        assert!(!json.contains("\"signature\""));
    }

    #[test]
    fn test_missing_entries_defaults_empty() {
        let json = r#"{
            "schema_version": "1",
            "sequence_number": 1,
            "issued_at": "2026-08-01T00:00:00+00:00",
            "expires_at": "2026-08-08T00:00:00+00:00",
            "next_update": "2026-08-02T00:00:00+00:00"
        }"#;
        let list: RevocationList = serde_json::from_str(json).unwrap();
        assert!(list.entries.is_empty());
    }
}
