//! Serde document types for the `.vault/` artifacts and their collaborators.

pub mod attestation;
pub mod permissions;
pub mod revocation;
