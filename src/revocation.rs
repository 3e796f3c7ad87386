//! Revocation list production, signing, and evaluation.
//!
//! Lists are issued periodically with a strictly increasing sequence number.
//! Clients cache the highest sequence they have accepted per signer and treat
//! anything lower as a rollback attempt. Freshness is evaluated at use time:
//! past `next_update` the list is usable with a warning, past `expires_at` it
//! is refused for new installs.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::crypto;
use crate::error::{Error, IssueKind};
use crate::keyring::Keyring;
use crate::types::attestation::SCHEMA_VERSION;
use crate::types::revocation::{
    ListSignature, RevocationEntry, RevocationList, RevocationReason, RevocationSeverity,
};

/// How long a freshly issued list stays usable.
#[derive(Debug, Clone, Copy)]
pub struct ListValidity {
    pub expires_in_hours: i64,
    pub next_update_in_hours: i64,
}

impl Default for ListValidity {
    fn default() -> Self {
        Self {
            expires_in_hours: 7 * 24,
            next_update_in_hours: 24,
        }
    }
}

/// Build an empty revocation list with the given sequence number.
pub fn build_revocation_list(sequence_number: u64, validity: &ListValidity) -> RevocationList {
    let now = Utc::now();
    RevocationList {
        schema_version: SCHEMA_VERSION.to_string(),
        sequence_number,
        issued_at: now.to_rfc3339(),
        expires_at: (now + Duration::hours(validity.expires_in_hours)).to_rfc3339(),
        next_update: (now + Duration::hours(validity.next_update_in_hours)).to_rfc3339(),
        entries: vec![],
        signature: None,
    }
}

/// Add a withdrawal entry to the list. Invalidates any existing signature.
pub fn add_revocation(
    list: &mut RevocationList,
    name: &str,
    versions: &[&str],
    reason: RevocationReason,
    severity: RevocationSeverity,
) {
    list.entries.push(RevocationEntry {
        name: name.to_string(),
        versions: versions.iter().map(|v| v.to_string()).collect(),
        revoked_at: Utc::now().to_rfc3339(),
        reason,
        severity,
    });
    list.signature = None;
}

/// The bytes a list signature covers: the canonical encoding of the object
/// with the `signature` field removed.
pub fn revocation_signing_bytes(list: &RevocationList) -> Result<Vec<u8>, Error> {
    let mut value = serde_json::to_value(list)?;
    if let Some(obj) = value.as_object_mut() {
        obj.remove("signature");
    }
    Ok(canonical::encode(&value))
}

/// Sign a revocation list in place. The signing key must belong to a
/// revocation signer, never a skill signer.
pub fn sign_revocation_list(
    list: &mut RevocationList,
    private_key_pem: &str,
    key_id: Option<&str>,
) -> Result<(), Error> {
    if list.sequence_number == 0 {
        return Err(Error::Revocation(
            "sequence_number must be positive".to_string(),
        ));
    }
    list.signature = None;
    let bytes = revocation_signing_bytes(list)?;
    let sig = crypto::sign_bytes(private_key_pem, &bytes)?;
    let keyid = match key_id {
        Some(id) => id.to_string(),
        None => {
            let public_pem = crypto::derive_public_key_pem(private_key_pem)?;
            crypto::calculate_key_id(&public_pem)?
        }
    };
    list.signature = Some(ListSignature { keyid, sig });
    Ok(())
}

/// Verify a list's signature against the trusted revocation keyring.
pub fn verify_revocation_list(list: &RevocationList, keyring: &Keyring) -> Result<(), Error> {
    if list.schema_version != SCHEMA_VERSION {
        return Err(Error::Verification {
            kind: IssueKind::SchemaInvalid,
            message: format!("unknown revocation schema_version: {}", list.schema_version),
        });
    }
    if list.sequence_number == 0 {
        return Err(Error::Verification {
            kind: IssueKind::SchemaInvalid,
            message: "revocation sequence_number must be positive".to_string(),
        });
    }
    let signature = list.signature.as_ref().ok_or(Error::Verification {
        kind: IssueKind::SignatureInvalid,
        message: "revocation list is unsigned".to_string(),
    })?;
    let public_pem = keyring.get(&signature.keyid).ok_or(Error::Verification {
        kind: IssueKind::NoTrustedKey,
        message: format!("no trusted revocation key for keyid {}", signature.keyid),
    })?;

    let bytes = revocation_signing_bytes(list)?;
    if !crypto::verify_bytes(public_pem, &bytes, &signature.sig)? {
        return Err(Error::Verification {
            kind: IssueKind::SignatureInvalid,
            message: "revocation list signature is invalid".to_string(),
        });
    }
    Ok(())
}

/// Freshness of a cached list at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Fresh,
    /// Past `next_update`: usable, but surface a warning.
    SoftStale,
    /// Past `expires_at`: refuse for new installs; runtime is caller policy.
    HardStale,
}

/// Revocation verdict for one skill version, as surfaced to verify callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationVerdict {
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<RevocationSeverity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RevocationReason>,
    pub freshness: Freshness,
}

/// Outcome of offering a freshly fetched list to the cache.
#[derive(Debug, Clone)]
pub struct IngestVerdict {
    pub accepted: bool,
    /// `(observed, cached)` sequence numbers when the incoming list tried to
    /// roll the cache back.
    pub rolled_back: Option<(u64, u64)>,
    pub warnings: Vec<String>,
}

/// Client-side cache of the highest-sequence revocation list per signer.
///
/// Updates are pure: `ingest` consumes nothing and returns the next state
/// alongside a verdict, so concurrent verifiers can serialize writes however
/// they like while the monotonicity invariant holds per write.
#[derive(Debug, Clone, Default)]
pub struct RevocationState {
    current: Option<RevocationList>,
    high_water: HashMap<String, u64>,
}

impl RevocationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&RevocationList> {
        self.current.as_ref()
    }

    /// Offer an incoming list. Signature verification is the caller's job
    /// (via [`verify_revocation_list`]) before ingesting.
    pub fn ingest(&self, incoming: RevocationList, now: DateTime<Utc>) -> (Self, IngestVerdict) {
        let signer = incoming
            .signature
            .as_ref()
            .map(|s| s.keyid.clone())
            .unwrap_or_else(|| "<unsigned>".to_string());

        if let Some(&high) = self.high_water.get(&signer) {
            if incoming.sequence_number < high {
                tracing::warn!(
                    signer = %signer,
                    observed = incoming.sequence_number,
                    cached = high,
                    "revocation rollback attempt; keeping cached list"
                );
                return (
                    self.clone(),
                    IngestVerdict {
                        accepted: false,
                        rolled_back: Some((incoming.sequence_number, high)),
                        warnings: vec![],
                    },
                );
            }
        }

        let mut warnings = Vec::new();
        match freshness_of(&incoming, now) {
            Freshness::Fresh => {}
            Freshness::SoftStale => {
                warnings.push("revocation list is past its next_update".to_string())
            }
            Freshness::HardStale => {
                warnings.push("revocation list is past its expires_at".to_string())
            }
        }

        let mut next = self.clone();
        next.high_water.insert(signer, incoming.sequence_number);
        next.current = Some(incoming);
        (
            next,
            IngestVerdict {
                accepted: true,
                rolled_back: None,
                warnings,
            },
        )
    }

    /// Freshness of the cached list; `None` when nothing is cached.
    pub fn freshness(&self, now: DateTime<Utc>) -> Option<Freshness> {
        self.current.as_ref().map(|list| freshness_of(list, now))
    }

    /// Find the entry revoking this exact `(name, version)` pair, if any.
    /// Matching is exact string equality; no version ranges.
    pub fn lookup(&self, name: &str, version: &str) -> Option<&RevocationEntry> {
        self.current.as_ref().and_then(|list| {
            list.entries
                .iter()
                .find(|e| e.name == name && e.versions.iter().any(|v| v == version))
        })
    }

    /// Combined verdict for a skill version at a point in time.
    pub fn status(&self, name: &str, version: &str, now: DateTime<Utc>) -> RevocationVerdict {
        let entry = self.lookup(name, version);
        RevocationVerdict {
            revoked: entry.is_some(),
            severity: entry.map(|e| e.severity),
            reason: entry.map(|e| e.reason),
            freshness: self.freshness(now).unwrap_or(Freshness::Fresh),
        }
    }
}

fn freshness_of(list: &RevocationList, now: DateTime<Utc>) -> Freshness {
    // Unparseable timestamps read as hard-stale: a list whose validity
    // window cannot be established must not gate installs silently.
    let expires_at = match DateTime::parse_from_rfc3339(&list.expires_at) {
        Ok(t) => t.with_timezone(&Utc),
        Err(_) => return Freshness::HardStale,
    };
    if now > expires_at {
        return Freshness::HardStale;
    }
    let next_update = match DateTime::parse_from_rfc3339(&list.next_update) {
        Ok(t) => t.with_timezone(&Utc),
        Err(_) => return Freshness::HardStale,
    };
    if now > next_update {
        return Freshness::SoftStale;
    }
    Freshness::Fresh
}

/// Fetch a revocation list from a collaborator URL.
#[cfg(feature = "fetch")]
pub async fn fetch_revocation_list(url: &str) -> Result<RevocationList, Error> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::Revocation(e.to_string()))?;

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Revocation(format!("Failed to fetch {}: {}", url, e)))?;

    if !resp.status().is_success() {
        return Err(Error::Revocation(format!(
            "HTTP {} fetching {}",
            resp.status(),
            url
        )));
    }

    let list: RevocationList = resp
        .json()
        .await
        .map_err(|e| Error::Revocation(format!("Invalid JSON from {}: {}", url, e)))?;

    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_pair;

    fn signed_list(sequence: u64, private_key_pem: &str) -> RevocationList {
        let mut list = build_revocation_list(sequence, &ListValidity::default());
        sign_revocation_list(&mut list, private_key_pem, None).unwrap();
        list
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let kp = generate_key_pair().unwrap();
        let mut ring = Keyring::new();
        ring.insert_pem(&kp.public_key_pem).unwrap();

        let list = signed_list(1, &kp.private_key_pem);
        assert!(verify_revocation_list(&list, &ring).is_ok());
    }

    #[test]
    fn test_verify_rejects_wrong_keyring() {
        let signer = generate_key_pair().unwrap();
        let other = generate_key_pair().unwrap();
        let mut ring = Keyring::new();
        ring.insert_pem(&other.public_key_pem).unwrap();

        let list = signed_list(1, &signer.private_key_pem);
        let err = verify_revocation_list(&list, &ring).unwrap_err();
        assert!(matches!(
            err,
            Error::Verification {
                kind: IssueKind::NoTrustedKey,
                ..
            }
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_list() {
        let kp = generate_key_pair().unwrap();
        let mut ring = Keyring::new();
        ring.insert_pem(&kp.public_key_pem).unwrap();

        let mut list = signed_list(3, &kp.private_key_pem);
        list.sequence_number = 4;
        let err = verify_revocation_list(&list, &ring).unwrap_err();
        assert!(matches!(
            err,
            Error::Verification {
                kind: IssueKind::SignatureInvalid,
                ..
            }
        ));
    }

    #[test]
    fn test_verify_rejects_unsigned() {
        let ring = Keyring::new();
        let list = build_revocation_list(1, &ListValidity::default());
        assert!(verify_revocation_list(&list, &ring).is_err());
    }

    #[test]
    fn test_signing_bytes_exclude_signature() {
        let kp = generate_key_pair().unwrap();
        let unsigned = build_revocation_list(2, &ListValidity::default());
        let mut signed = unsigned.clone();
        sign_revocation_list(&mut signed, &kp.private_key_pem, None).unwrap();

        assert_eq!(
            revocation_signing_bytes(&unsigned).unwrap(),
            revocation_signing_bytes(&signed).unwrap()
        );
    }

    #[test]
    fn test_rollback_refused() {
        let kp = generate_key_pair().unwrap();
        let state = RevocationState::new();
        let (state, v5) = state.ingest(signed_list(5, &kp.private_key_pem), Utc::now());
        assert!(v5.accepted);

        let (state, v4) = state.ingest(signed_list(4, &kp.private_key_pem), Utc::now());
        assert!(!v4.accepted);
        assert_eq!(v4.rolled_back, Some((4, 5)));
        // Cached list is unchanged.
        assert_eq!(state.current().unwrap().sequence_number, 5);
    }

    #[test]
    fn test_equal_sequence_reaccepted() {
        let kp = generate_key_pair().unwrap();
        let state = RevocationState::new();
        let (state, _) = state.ingest(signed_list(5, &kp.private_key_pem), Utc::now());
        let (_, verdict) = state.ingest(signed_list(5, &kp.private_key_pem), Utc::now());
        assert!(verdict.accepted);
        assert!(verdict.rolled_back.is_none());
    }

    #[test]
    fn test_high_water_is_per_signer() {
        let kp1 = generate_key_pair().unwrap();
        let kp2 = generate_key_pair().unwrap();
        let state = RevocationState::new();
        let (state, _) = state.ingest(signed_list(5, &kp1.private_key_pem), Utc::now());
        // A different signer starts its own sequence.
        let (_, verdict) = state.ingest(signed_list(1, &kp2.private_key_pem), Utc::now());
        assert!(verdict.accepted);
    }

    #[test]
    fn test_freshness_transitions() {
        let kp = generate_key_pair().unwrap();
        let list = signed_list(1, &kp.private_key_pem);
        let issued = DateTime::parse_from_rfc3339(&list.issued_at)
            .unwrap()
            .with_timezone(&Utc);
        let (state, _) = RevocationState::new().ingest(list, issued);

        assert_eq!(state.freshness(issued), Some(Freshness::Fresh));
        assert_eq!(
            state.freshness(issued + Duration::hours(25)),
            Some(Freshness::SoftStale)
        );
        assert_eq!(
            state.freshness(issued + Duration::hours(7 * 24 + 1)),
            Some(Freshness::HardStale)
        );
    }

    #[test]
    fn test_stale_ingest_warns() {
        let kp = generate_key_pair().unwrap();
        let list = signed_list(1, &kp.private_key_pem);
        let far_future = Utc::now() + Duration::days(365);
        let (_, verdict) = RevocationState::new().ingest(list, far_future);
        assert!(verdict.accepted);
        assert!(!verdict.warnings.is_empty());
    }

    #[test]
    fn test_lookup_exact_match_only() {
        let kp = generate_key_pair().unwrap();
        let mut list = build_revocation_list(1, &ListValidity::default());
        add_revocation(
            &mut list,
            "pdf-tools",
            &["1.0.0", "1.0.1"],
            RevocationReason::Malware,
            RevocationSeverity::Critical,
        );
        sign_revocation_list(&mut list, &kp.private_key_pem, None).unwrap();
        let (state, _) = RevocationState::new().ingest(list, Utc::now());

        assert!(state.lookup("pdf-tools", "1.0.0").is_some());
        assert!(state.lookup("pdf-tools", "1.0.2").is_none());
        assert!(state.lookup("pdf-tool", "1.0.0").is_none());
        assert!(state.lookup("pdf-tools", "1.0").is_none());

        let verdict = state.status("pdf-tools", "1.0.1", Utc::now());
        assert!(verdict.revoked);
        assert_eq!(verdict.severity, Some(RevocationSeverity::Critical));
    }

    #[test]
    fn test_add_revocation_invalidates_signature() {
        let kp = generate_key_pair().unwrap();
        let mut list = signed_list(1, &kp.private_key_pem);
        assert!(list.signature.is_some());
        add_revocation(
            &mut list,
            "x",
            &["1.0.0"],
            RevocationReason::Unspecified,
            RevocationSeverity::Low,
        );
        assert!(list.signature.is_none());
    }

    #[test]
    fn test_sign_rejects_zero_sequence() {
        let kp = generate_key_pair().unwrap();
        let mut list = build_revocation_list(0, &ListValidity::default());
        assert!(sign_revocation_list(&mut list, &kp.private_key_pem, None).is_err());
    }
}
