//! # Haldir
//!
//! Trust registry core for agent skills.
//!
//! Haldir makes installing and running a skill (a small directory of
//! agent-consumable files) safe: it signs each skill with a publisher key,
//! records a tamper-evident manifest of its contents and declared
//! permissions, verifies both at install and at runtime, supports
//! revocation, and confines the skill to its declared permissions when it
//! actually runs.
//!
//! ## Quick Start
//!
//! ```rust
//! use haldir::crypto::generate_key_pair;
//! use haldir::envelope::{sign_skill, SignOptions};
//! use haldir::keyring::Keyring;
//! use haldir::types::attestation::SkillIdentity;
//! use haldir::verify::{verify_skill, VerifyOptions};
//!
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::write(dir.path().join("SKILL.md"), "hello\n").unwrap();
//!
//! // Sign: emits the .vault/ artifacts.
//! let key_pair = generate_key_pair().unwrap();
//! let options = SignOptions::new(SkillIdentity::new("demo", "1.0.0"));
//! sign_skill(dir.path(), &key_pair.private_key_pem, &options).unwrap();
//!
//! // Verify with the matching trusted key.
//! let mut keyring = Keyring::new();
//! keyring.insert_pem(&key_pair.public_key_pem).unwrap();
//! let report = verify_skill(dir.path(), &keyring, None, &VerifyOptions::install());
//! assert!(report.ok);
//! ```
//!
//! ## Security
//!
//! This implementation uses:
//! - Ed25519 signatures over PKCS#8/SubjectPublicKeyInfo PEM keys
//! - SHA-256 over a deterministic canonical JSON encoding, the sole source
//!   of bytes hashed or signed anywhere in the system
//! - A length-prefixed pre-authentication encoding binding the payload type
//!   to the payload (ASCII-decimal lengths; deliberately not interoperable
//!   with generic DSSE verifiers)
//! - Deny-by-default OS sandbox policies (Seatbelt, Landlock, or the child
//!   runtime's own permission flags) compiled from the signed permissions
//!
//! ## Error Handling
//!
//! Hard failures return `Result<T, Error>`. Verification never panics and
//! never throws for a bad skill: [`verify::verify_skill`] returns a
//! structured [`verify::VerifyReport`] whose issues carry typed
//! [`error::IssueKind`]s. Sandbox runs return their outcome regardless of
//! the child's exit; a crash is data, not an exception.

pub mod analyzer;
pub mod canonical;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod integrity;
pub mod keyring;
pub mod policy;
pub mod profile;
pub mod revocation;
pub mod runner;
pub mod types;
pub mod verify;

pub use error::{Error, IssueKind, VerifyIssue};
pub use keyring::Keyring;
pub use verify::{verify_skill, VerifyContext, VerifyOptions, VerifyReport};
