//! Integrity manifest: the per-file SHA-256 map over a skill tree.
//!
//! The walk is sorted and recursive, records regular files only, and fails
//! loudly on anything that could let tree contents change behind the hash:
//! symlinks escaping the root, special files, and (at install time) files
//! hardlinked from outside the root.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::error::Error;
use crate::types::attestation::{IntegrityManifest, SCHEMA_VERSION};

/// Reserved subdirectory holding envelope artifacts; never part of the
/// manifest.
pub const VAULT_DIR: &str = ".vault";

/// Directory names excluded from the walk wherever they appear.
const EXCLUDED_DIRS: &[&str] = &[VAULT_DIR, ".git", "node_modules"];

/// File names excluded from the walk (OS cache droppings).
const EXCLUDED_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Walk the skill root and produce its integrity manifest.
///
/// Fails on I/O errors (with the offending path), on symlinks that resolve
/// outside the root, and on non-regular non-directory entries. Symlinks that
/// stay inside the root are tolerated but not recorded.
pub fn build_manifest(skill_root: &Path) -> Result<IntegrityManifest, Error> {
    let root_resolved = fs::canonicalize(skill_root).map_err(|e| Error::Walk {
        path: skill_root.to_path_buf(),
        source: e,
    })?;

    let mut files = BTreeMap::new();
    walk_sorted(skill_root, &root_resolved, skill_root, &mut files)?;

    if files.is_empty() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "skill directory contains no files",
        )));
    }

    Ok(IntegrityManifest {
        schema_version: SCHEMA_VERSION.to_string(),
        algorithm: "sha256".to_string(),
        files,
        generated_at: chrono::Utc::now().to_rfc3339(),
    })
}

/// The manifest as a JSON value with the volatile `generated_at` field
/// stripped. This is the value whose canonical encoding gets hashed; with
/// the timestamp left in, two signs of an unchanged tree could never agree.
pub fn manifest_hashable_value(manifest: &IntegrityManifest) -> Value {
    let mut value = serde_json::to_value(manifest).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("generated_at");
    }
    value
}

/// Canonical bytes of the hashable manifest form.
pub fn manifest_canonical_bytes(manifest: &IntegrityManifest) -> Vec<u8> {
    canonical::encode(&manifest_hashable_value(manifest))
}

/// The `integrity_hash` value an attestation binds for this manifest.
pub fn manifest_hash(manifest: &IntegrityManifest) -> String {
    canonical::sha256_hex(&manifest_canonical_bytes(manifest))
}

/// Differences between a freshly derived manifest and the signed one.
#[derive(Debug, Clone, Default)]
pub struct ManifestDiff {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ManifestDiff {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare the live file map against the signed one.
pub fn diff_manifests(
    current: &BTreeMap<String, String>,
    signed: &BTreeMap<String, String>,
) -> ManifestDiff {
    let mut diff = ManifestDiff::default();

    for (path, hash) in current {
        match signed.get(path) {
            Some(signed_hash) if signed_hash != hash => diff.modified.push(path.clone()),
            None => diff.added.push(path.clone()),
            _ => {}
        }
    }

    for path in signed.keys() {
        if !current.contains_key(path) {
            diff.removed.push(path.clone());
        }
    }

    diff
}

/// Find files whose inode carries more links than this tree accounts for,
/// i.e. files also linked from outside the skill root, which would let the
/// content be rewritten after verification through the sibling link.
///
/// Returns the relative paths of offending files. Install-time verification
/// treats any hit as fatal; runtime verification skips this audit by default
/// (installers may hardlink for dedup).
#[cfg(unix)]
pub fn audit_hardlinks(skill_root: &Path) -> Result<Vec<String>, Error> {
    use std::os::unix::fs::MetadataExt;

    let mut inodes: HashMap<(u64, u64), (u64, Vec<String>)> = HashMap::new();
    let mut pending: Vec<PathBuf> = vec![skill_root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = read_dir_sorted(&dir)?;
        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = fs::symlink_metadata(&path).map_err(|e| Error::Walk {
                path: path.clone(),
                source: e,
            })?;

            if meta.is_symlink() {
                continue;
            }
            if meta.is_dir() {
                if !EXCLUDED_DIRS.contains(&name.as_str()) {
                    pending.push(path);
                }
                continue;
            }
            if !meta.is_file() || EXCLUDED_FILES.contains(&name.as_str()) {
                continue;
            }

            let rel = relative_posix(skill_root, &path)?;
            let slot = inodes
                .entry((meta.dev(), meta.ino()))
                .or_insert_with(|| (meta.nlink(), Vec::new()));
            slot.1.push(rel);
        }
    }

    let mut violations: Vec<String> = inodes
        .into_values()
        .filter(|(nlink, paths)| *nlink as usize > paths.len())
        .flat_map(|(_, paths)| paths)
        .collect();
    violations.sort();
    Ok(violations)
}

#[cfg(not(unix))]
pub fn audit_hardlinks(_skill_root: &Path) -> Result<Vec<String>, Error> {
    Ok(Vec::new())
}

/// Sorted recursive walk recording regular files.
fn walk_sorted(
    base: &Path,
    base_resolved: &Path,
    dir: &Path,
    files: &mut BTreeMap<String, String>,
) -> Result<(), Error> {
    for entry in read_dir_sorted(dir)? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = fs::symlink_metadata(&path).map_err(|e| Error::Walk {
            path: path.clone(),
            source: e,
        })?;

        if meta.is_symlink() {
            check_symlink_target(base_resolved, &path)?;
            continue;
        }

        if meta.is_dir() {
            if !EXCLUDED_DIRS.contains(&name.as_str()) {
                walk_sorted(base, base_resolved, &path, files)?;
            }
            continue;
        }

        if meta.is_file() {
            if EXCLUDED_FILES.contains(&name.as_str()) {
                continue;
            }
            let rel = relative_posix(base, &path)?;
            let bytes = fs::read(&path).map_err(|e| Error::Walk {
                path: path.clone(),
                source: e,
            })?;
            let digest = hex::encode(Sha256::digest(&bytes));
            files.insert(rel, format!("sha256:{}", digest));
            continue;
        }

        // Neither file, directory, nor symlink: device, socket, or fifo.
        return Err(Error::UnsafeTree {
            path,
            reason: "special file (device, socket, or fifo)".to_string(),
        });
    }
    Ok(())
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<fs::DirEntry>, Error> {
    let mut entries: Vec<fs::DirEntry> = fs::read_dir(dir)
        .map_err(|e| Error::Walk {
            path: dir.to_path_buf(),
            source: e,
        })?
        .collect::<Result<_, _>>()
        .map_err(|e| Error::Walk {
            path: dir.to_path_buf(),
            source: e,
        })?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// A symlink is acceptable only when its fully resolved target stays under
/// the (resolved) skill root.
fn check_symlink_target(base_resolved: &Path, link: &Path) -> Result<(), Error> {
    let target = fs::canonicalize(link).map_err(|_| Error::UnsafeTree {
        path: link.to_path_buf(),
        reason: "unresolvable symlink".to_string(),
    })?;
    if !target.starts_with(base_resolved) {
        return Err(Error::UnsafeTree {
            path: link.to_path_buf(),
            reason: "symlink escapes skill root".to_string(),
        });
    }
    Ok(())
}

/// Forward-slash relative path, rejecting anything that climbs out of the
/// base.
fn relative_posix(base: &Path, path: &Path) -> Result<String, Error> {
    let rel = path.strip_prefix(base).map_err(|_| Error::UnsafeTree {
        path: path.to_path_buf(),
        reason: "path outside skill root".to_string(),
    })?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}
