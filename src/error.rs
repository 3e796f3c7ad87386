use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("PKCS8 error: {0}")]
    Pkcs8(String),

    #[error("SPKI error: {0}")]
    Spki(String),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid key format")]
    InvalidKeyFormat,

    #[error("Unsafe skill tree at {}: {reason}", path.display())]
    UnsafeTree { path: PathBuf, reason: String },

    #[error("Walk failed at {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Permissions error: {0}")]
    Permissions(String),

    #[error("Revocation error: {0}")]
    Revocation(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Verification failed: {kind}: {message}")]
    Verification { kind: IssueKind, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "fetch")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Issue kinds for structured verification results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    SchemaInvalid,
    PayloadMismatch,
    SignatureInvalid,
    NoTrustedKey,
    PermissionsHashMismatch,
    IntegrityHashMismatch,
    FileMissing,
    FileHashMismatch,
    HardlinkViolation,
    FilesystemUnsafe,
    Revoked,
    RevocationStale,
    RevocationRolledBack,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueKind::SchemaInvalid => "SCHEMA_INVALID",
            IssueKind::PayloadMismatch => "PAYLOAD_MISMATCH",
            IssueKind::SignatureInvalid => "SIGNATURE_INVALID",
            IssueKind::NoTrustedKey => "NO_TRUSTED_KEY",
            IssueKind::PermissionsHashMismatch => "PERMISSIONS_HASH_MISMATCH",
            IssueKind::IntegrityHashMismatch => "INTEGRITY_HASH_MISMATCH",
            IssueKind::FileMissing => "FILE_MISSING",
            IssueKind::FileHashMismatch => "FILE_HASH_MISMATCH",
            IssueKind::HardlinkViolation => "HARDLINK_VIOLATION",
            IssueKind::FilesystemUnsafe => "FILESYSTEM_UNSAFE",
            IssueKind::Revoked => "REVOKED",
            IssueKind::RevocationStale => "REVOCATION_STALE",
            IssueKind::RevocationRolledBack => "REVOCATION_ROLLED_BACK",
        };
        write!(f, "{}", s)
    }
}

/// One structured finding from the verification pipeline.
///
/// Carries the machine-readable kind, a human message, and, where they
/// apply, the offending path and the observed/expected revocation sequence
/// numbers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VerifyIssue {
    pub kind: IssueKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_sequence: Option<u64>,
}

impl VerifyIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            observed_sequence: None,
            expected_sequence: None,
        }
    }

    pub fn with_path(kind: IssueKind, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(kind, message)
        }
    }

    pub fn with_sequences(
        kind: IssueKind,
        message: impl Into<String>,
        observed: u64,
        expected: u64,
    ) -> Self {
        Self {
            observed_sequence: Some(observed),
            expected_sequence: Some(expected),
            ..Self::new(kind, message)
        }
    }
}
