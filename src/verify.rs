//! Ordered verification pipeline for signed skills.
//!
//! The phase order is fixed and observable: artifact shape, payload
//! round-trip, signatures, permissions hash, integrity re-derivation,
//! hardlinks, revocation. A failing phase short-circuits; later phases never
//! run before earlier ones.
//!
//! An optional `.vault/sigstore.bundle` (keyless signing artifact) is opaque
//! to this pipeline; its absence simply selects the keyring path.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::Value;

use crate::canonical;
use crate::crypto;
use crate::error::{Error, IssueKind, VerifyIssue};
use crate::integrity::{self, VAULT_DIR};
use crate::keyring::Keyring;
use crate::policy;
use crate::revocation::{Freshness, RevocationState, RevocationVerdict};
use crate::types::attestation::{
    Attestation, EnvelopeSignature, IntegrityManifest, PAYLOAD_TYPE, SCHEMA_VERSION,
};

/// Whether a verification gates an install or a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyContext {
    Install,
    Runtime,
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub context: VerifyContext,
    /// Suppress the outside-hardlink audit. Only honored at runtime context;
    /// installers may have hardlinked files legitimately for dedup.
    pub skip_hardlink_check: bool,
}

impl VerifyOptions {
    pub fn install() -> Self {
        Self {
            context: VerifyContext::Install,
            skip_hardlink_check: false,
        }
    }

    pub fn runtime() -> Self {
        Self {
            context: VerifyContext::Runtime,
            skip_hardlink_check: true,
        }
    }
}

/// Structured verification result. Never panics, never throws: a failed
/// verify is a report with `ok = false` and at least one issue.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub ok: bool,
    pub errors: Vec<VerifyIssue>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<RevocationVerdict>,
}

impl VerifyReport {
    fn failure(errors: Vec<VerifyIssue>, warnings: Vec<String>) -> Self {
        Self {
            ok: false,
            errors,
            warnings,
            revocation: None,
        }
    }

    fn fail_one(issue: VerifyIssue) -> Self {
        Self::failure(vec![issue], vec![])
    }
}

/// Envelope wire shape with lazily parsed signature entries, so one
/// malformed entry cannot poison the others.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    schema_version: String,
    #[serde(rename = "payloadType")]
    payload_type: String,
    payload: String,
    signatures: Vec<Value>,
}

/// Verify a signed skill directory.
///
/// `keyring` holds trusted skill-signing keys; `revocation`, when present,
/// is the caller's cached revocation state. The phases of the pipeline run
/// in their fixed order and the first failing phase ends the verify.
pub fn verify_skill(
    skill_dir: &Path,
    keyring: &Keyring,
    revocation: Option<&RevocationState>,
    options: &VerifyOptions,
) -> VerifyReport {
    tracing::debug!(dir = %skill_dir.display(), context = ?options.context, "verify start");

    // Phase 1: load and shape-check every artifact.
    let loaded = match load_artifacts(skill_dir) {
        Ok(loaded) => loaded,
        Err(issue) => return VerifyReport::fail_one(issue),
    };

    // Phase 2: the stored envelope payload must equal the re-canonicalized
    // attestation byte-for-byte (tolerating pretty-printed storage).
    let attestation_bytes = match serde_json::to_value(&loaded.attestation) {
        Ok(value) => canonical::encode(&value),
        Err(e) => {
            return VerifyReport::fail_one(VerifyIssue::new(
                IssueKind::SchemaInvalid,
                format!("attestation not encodable: {}", e),
            ))
        }
    };
    match general_purpose::URL_SAFE_NO_PAD.decode(&loaded.envelope.payload) {
        Ok(decoded) if decoded == attestation_bytes => {}
        Ok(_) => {
            return VerifyReport::fail_one(VerifyIssue::new(
                IssueKind::PayloadMismatch,
                "envelope payload does not round-trip to the attestation",
            ))
        }
        Err(e) => {
            return VerifyReport::fail_one(VerifyIssue::new(
                IssueKind::PayloadMismatch,
                format!("envelope payload is not valid base64url: {}", e),
            ))
        }
    }

    // Phase 3: at least one signature must validate under a trusted key.
    if let Some(issue) = check_signatures(&loaded.envelope, &attestation_bytes, keyring) {
        return VerifyReport::fail_one(issue);
    }

    // Phase 4: permissions hash binding.
    let permissions_hash = match policy::permissions_hash(&loaded.permissions) {
        Ok(hash) => hash,
        Err(e) => {
            return VerifyReport::fail_one(VerifyIssue::new(
                IssueKind::SchemaInvalid,
                format!("permissions not encodable: {}", e),
            ))
        }
    };
    if permissions_hash != loaded.attestation.permissions_hash {
        return VerifyReport::fail_one(VerifyIssue::new(
            IssueKind::PermissionsHashMismatch,
            "declared permissions do not match the attested hash",
        ));
    }

    // Phase 5: integrity. Stored manifest against the attestation, then the
    // live tree against the stored manifest for localized diagnostics.
    if let Some(issues) = check_integrity(skill_dir, &loaded) {
        return VerifyReport::failure(issues, vec![]);
    }

    // Phase 6: outside-hardlink audit.
    let skip_hardlinks =
        options.context == VerifyContext::Runtime && options.skip_hardlink_check;
    if !skip_hardlinks {
        match integrity::audit_hardlinks(skill_dir) {
            Ok(violations) if violations.is_empty() => {}
            Ok(violations) => {
                let issues = violations
                    .into_iter()
                    .map(|path| {
                        VerifyIssue::with_path(
                            IssueKind::HardlinkViolation,
                            "file is hardlinked from outside the skill root",
                            path,
                        )
                    })
                    .collect();
                return VerifyReport::failure(issues, vec![]);
            }
            Err(e) => {
                return VerifyReport::fail_one(VerifyIssue::new(
                    IssueKind::FilesystemUnsafe,
                    format!("hardlink audit failed: {}", e),
                ))
            }
        }
    }

    // Phase 7: revocation consult. Install fails on a revoked or hard-stale
    // list; runtime surfaces the verdict and lets the caller choose.
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let verdict = revocation.and_then(|state| {
        state.current()?;
        let now = chrono::Utc::now();
        let verdict = state.status(
            &loaded.attestation.skill.name,
            &loaded.attestation.skill.version,
            now,
        );

        match verdict.freshness {
            Freshness::Fresh => {}
            Freshness::SoftStale => {
                warnings.push("revocation list is past its next_update".to_string());
            }
            Freshness::HardStale => match options.context {
                VerifyContext::Install => errors.push(VerifyIssue::new(
                    IssueKind::RevocationStale,
                    "revocation list is expired; refusing to install",
                )),
                VerifyContext::Runtime => {
                    warnings.push("revocation list is expired".to_string());
                }
            },
        }

        if verdict.revoked {
            let message = format!(
                "skill {}@{} is revoked",
                loaded.attestation.skill.name, loaded.attestation.skill.version
            );
            match options.context {
                VerifyContext::Install => {
                    errors.push(VerifyIssue::new(IssueKind::Revoked, message))
                }
                VerifyContext::Runtime => warnings.push(message),
            }
        }

        Some(verdict)
    });

    let ok = errors.is_empty();
    tracing::debug!(ok, errors = errors.len(), warnings = warnings.len(), "verify done");
    VerifyReport {
        ok,
        errors,
        warnings,
        revocation: verdict,
    }
}

struct LoadedArtifacts {
    attestation: Attestation,
    manifest: IntegrityManifest,
    permissions: crate::types::permissions::PermissionsDocument,
    envelope: RawEnvelope,
}

fn load_artifacts(skill_dir: &Path) -> Result<LoadedArtifacts, VerifyIssue> {
    let vault = skill_dir.join(VAULT_DIR);

    let attestation_text = read_artifact(&vault, "attestation.json")?;
    let attestation: Attestation = parse_artifact(&attestation_text, "attestation.json")?;
    if attestation.schema_version != SCHEMA_VERSION {
        return Err(VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!(
                "unknown attestation schema_version: {}",
                attestation.schema_version
            ),
            "attestation.json",
        ));
    }

    let manifest_text = read_artifact(&vault, "integrity.json")?;
    let manifest: IntegrityManifest = parse_artifact(&manifest_text, "integrity.json")?;
    if manifest.schema_version != SCHEMA_VERSION {
        return Err(VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!("unknown manifest schema_version: {}", manifest.schema_version),
            "integrity.json",
        ));
    }
    if manifest.algorithm != "sha256" {
        return Err(VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!("unsupported manifest algorithm: {}", manifest.algorithm),
            "integrity.json",
        ));
    }
    for path in manifest.files.keys() {
        if !manifest_path_is_safe(path) {
            return Err(VerifyIssue::with_path(
                IssueKind::SchemaInvalid,
                "manifest path escapes the skill root or shadows the vault",
                path.clone(),
            ));
        }
    }

    let permissions_text = read_artifact(&vault, "permissions.json")?;
    let permissions_value: Value = parse_artifact(&permissions_text, "permissions.json")?;
    let permissions = policy::normalize_document(Some(&permissions_value)).map_err(|e| {
        VerifyIssue::with_path(IssueKind::SchemaInvalid, e.to_string(), "permissions.json")
    })?;

    let envelope_text = read_artifact(&vault, "signature.json")?;
    let envelope: RawEnvelope = parse_artifact(&envelope_text, "signature.json")?;
    if envelope.schema_version != SCHEMA_VERSION {
        return Err(VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!("unknown envelope schema_version: {}", envelope.schema_version),
            "signature.json",
        ));
    }
    if envelope.payload_type != PAYLOAD_TYPE {
        return Err(VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!("unexpected payloadType: {}", envelope.payload_type),
            "signature.json",
        ));
    }
    if envelope.signatures.is_empty() {
        return Err(VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            "envelope carries no signatures",
            "signature.json",
        ));
    }

    Ok(LoadedArtifacts {
        attestation,
        manifest,
        permissions,
        envelope,
    })
}

fn read_artifact(vault: &Path, name: &str) -> Result<String, VerifyIssue> {
    fs::read_to_string(vault.join(name)).map_err(|e| {
        VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!("cannot read artifact: {}", e),
            name,
        )
    })
}

fn parse_artifact<T: serde::de::DeserializeOwned>(
    text: &str,
    name: &str,
) -> Result<T, VerifyIssue> {
    serde_json::from_str(text).map_err(|e| {
        VerifyIssue::with_path(
            IssueKind::SchemaInvalid,
            format!("malformed artifact: {}", e),
            name,
        )
    })
}

fn manifest_path_is_safe(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') {
        return false;
    }
    if path == VAULT_DIR || path.starts_with(".vault/") {
        return false;
    }
    !path.split('/').any(|seg| seg == ".." || seg.is_empty())
}

/// Walk the signature entries in order. Success is the first entry that
/// validates under a trusted key; a malformed entry is tolerated as long as
/// some other entry validates.
fn check_signatures(
    envelope: &RawEnvelope,
    attestation_bytes: &[u8],
    keyring: &Keyring,
) -> Option<VerifyIssue> {
    let pae = canonical::pre_auth_encoding(PAYLOAD_TYPE, attestation_bytes);

    let mut parseable = 0usize;
    let mut trusted_seen = false;
    for raw in &envelope.signatures {
        let entry: EnvelopeSignature = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        parseable += 1;

        let Some(public_pem) = keyring.get(&entry.keyid) else {
            // Unknown keyid is not an error on its own.
            continue;
        };
        trusted_seen = true;

        match crypto::verify_bytes(public_pem, &pae, &entry.sig) {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(keyid = %entry.keyid, "unverifiable signature entry: {}", e);
            }
        }
    }

    Some(if parseable == 0 {
        VerifyIssue::new(
            IssueKind::SignatureInvalid,
            "no parseable signature entries in envelope",
        )
    } else if !trusted_seen {
        VerifyIssue::new(
            IssueKind::NoTrustedKey,
            "no signature carries a trusted keyid",
        )
    } else {
        VerifyIssue::new(
            IssueKind::SignatureInvalid,
            "no signature validates under a trusted key",
        )
    })
}

/// Integrity phase: the stored manifest must hash to the attested value, and
/// the live tree must match the stored manifest file-for-file.
fn check_integrity(skill_dir: &Path, loaded: &LoadedArtifacts) -> Option<Vec<VerifyIssue>> {
    if integrity::manifest_hash(&loaded.manifest) != loaded.attestation.integrity_hash {
        return Some(vec![VerifyIssue::with_path(
            IssueKind::IntegrityHashMismatch,
            "stored manifest does not match the attested integrity hash",
            "integrity.json",
        )]);
    }

    let live = match integrity::build_manifest(skill_dir) {
        Ok(manifest) => manifest,
        Err(Error::UnsafeTree { path, reason }) => {
            return Some(vec![VerifyIssue::with_path(
                IssueKind::FilesystemUnsafe,
                reason,
                path.to_string_lossy().into_owned(),
            )])
        }
        Err(e) => {
            return Some(vec![VerifyIssue::new(
                IssueKind::FilesystemUnsafe,
                format!("cannot re-derive manifest: {}", e),
            )])
        }
    };

    let diff = integrity::diff_manifests(&live.files, &loaded.manifest.files);
    if diff.is_empty() {
        return None;
    }

    let mut issues = Vec::new();
    for path in diff.removed {
        issues.push(VerifyIssue::with_path(
            IssueKind::FileMissing,
            "file listed in the manifest is missing",
            path,
        ));
    }
    for path in diff.modified {
        issues.push(VerifyIssue::with_path(
            IssueKind::FileHashMismatch,
            "file content differs from the signed hash",
            path,
        ));
    }
    for path in diff.added {
        issues.push(VerifyIssue::with_path(
            IssueKind::IntegrityHashMismatch,
            "file is not covered by the signed manifest",
            path,
        ));
    }
    Some(issues)
}
