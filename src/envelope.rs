//! Attestation building and the skill signing flow.
//!
//! Signing emits the four `.vault/` artifacts: canonical integrity manifest
//! bytes, pretty permissions, canonical attestation bytes, and the pretty
//! signature envelope. Envelopes are immutable once written; any change to
//! the skill requires re-signing.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use crate::canonical;
use crate::crypto;
use crate::error::Error;
use crate::integrity::{self, VAULT_DIR};
use crate::policy;
use crate::types::attestation::{
    Attestation, EnvelopeSignature, IntegrityManifest, SignatureEnvelope, SkillIdentity,
    PAYLOAD_TYPE, SCHEMA_VERSION,
};

/// Options controlling a signing run.
#[derive(Debug, Clone)]
pub struct SignOptions {
    pub skill: SkillIdentity,
    /// Raw permissions value (canonical or legacy shape). `None` signs the
    /// deny-all document.
    pub permissions: Option<Value>,
    /// Externally supplied stable key id; derived from the public key when
    /// absent.
    pub key_id: Option<String>,
}

impl SignOptions {
    pub fn new(skill: SkillIdentity) -> Self {
        Self {
            skill,
            permissions: None,
            key_id: None,
        }
    }
}

/// Everything a signing run produced.
#[derive(Debug, Clone)]
pub struct SignedSkill {
    pub attestation: Attestation,
    pub envelope: SignatureEnvelope,
    pub manifest: IntegrityManifest,
}

/// Sign a skill directory and write its `.vault/` artifacts.
///
/// Runs the filesystem safety pre-check first; any unsafe entry aborts
/// before anything is written.
pub fn sign_skill(
    skill_dir: &Path,
    private_key_pem: &str,
    options: &SignOptions,
) -> Result<SignedSkill, Error> {
    tracing::info!(skill = %options.skill.name, dir = %skill_dir.display(), "signing skill");

    // Walks the tree and rejects escaping symlinks and special files.
    let manifest = integrity::build_manifest(skill_dir)?;
    let integrity_hash = integrity::manifest_hash(&manifest);

    let permissions_doc = policy::normalize_document(options.permissions.as_ref())?;
    let permissions_hash = policy::permissions_hash(&permissions_doc)?;

    let attestation = Attestation {
        schema_version: SCHEMA_VERSION.to_string(),
        skill: options.skill.clone(),
        integrity_hash,
        permissions_hash,
        signed_at: chrono::Utc::now().to_rfc3339(),
    };
    let attestation_bytes = canonical::encode(&serde_json::to_value(&attestation)?);

    let pae = canonical::pre_auth_encoding(PAYLOAD_TYPE, &attestation_bytes);
    let sig = crypto::sign_bytes(private_key_pem, &pae)?;
    let keyid = match &options.key_id {
        Some(id) => id.clone(),
        None => {
            let public_pem = crypto::derive_public_key_pem(private_key_pem)?;
            crypto::calculate_key_id(&public_pem)?
        }
    };

    let envelope = SignatureEnvelope {
        schema_version: SCHEMA_VERSION.to_string(),
        payload_type: PAYLOAD_TYPE.to_string(),
        payload: general_purpose::URL_SAFE_NO_PAD.encode(&attestation_bytes),
        signatures: vec![EnvelopeSignature { keyid, sig }],
    };

    write_vault_artifacts(skill_dir, &manifest, &permissions_doc, &attestation_bytes, &envelope)?;

    tracing::info!(skill = %options.skill.name, "skill signed");
    Ok(SignedSkill {
        attestation,
        envelope,
        manifest,
    })
}

fn write_vault_artifacts(
    skill_dir: &Path,
    manifest: &IntegrityManifest,
    permissions_doc: &crate::types::permissions::PermissionsDocument,
    attestation_bytes: &[u8],
    envelope: &SignatureEnvelope,
) -> Result<(), Error> {
    let vault = skill_dir.join(VAULT_DIR);
    fs::create_dir_all(&vault)?;

    // Manifest and attestation are stored as their canonical bytes; the
    // human-facing artifacts get pretty JSON and are re-canonicalized at
    // verify time.
    let manifest_bytes = canonical::encode(&serde_json::to_value(manifest)?);
    fs::write(vault.join("integrity.json"), manifest_bytes)?;

    let permissions_json = serde_json::to_string_pretty(permissions_doc)?;
    fs::write(vault.join("permissions.json"), format!("{}\n", permissions_json))?;

    fs::write(vault.join("attestation.json"), attestation_bytes)?;

    let envelope_json = serde_json::to_string_pretty(envelope)?;
    fs::write(vault.join("signature.json"), format!("{}\n", envelope_json))?;

    Ok(())
}
