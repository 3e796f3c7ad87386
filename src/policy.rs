//! Permissions normalization and compilation into an OS sandbox policy.
//!
//! The declared permissions document arrives in one of two shapes: the
//! canonical form with everything under `declared`, or the legacy form with
//! the same fields at the top level. Normalization folds both into one typed
//! [`Policy`] up front; nothing downstream ever sees the loose shapes.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use tempfile::{Builder, TempDir, TempPath};

use crate::canonical;
use crate::error::Error;
use crate::profile;
use crate::types::attestation::SCHEMA_VERSION;
use crate::types::permissions::{AgentCapabilities, DeclaredPermissions, NetworkDeclaration, PermissionsDocument};

/// Normalized network policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPolicy {
    None,
    All,
    Allowlist(Vec<String>),
}

/// Normalized filesystem policy with paths resolved against the skill root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemPolicy {
    pub read: Vec<PathBuf>,
    pub write: Vec<PathBuf>,
}

/// The single policy form all later stages consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub filesystem: FilesystemPolicy,
    pub network: NetworkPolicy,
    pub exec: bool,
    pub agent_capabilities: AgentCapabilities,
}

impl Policy {
    /// The deny-everything policy an absent permissions document implies.
    pub fn deny_all() -> Self {
        Self {
            filesystem: FilesystemPolicy::default(),
            network: NetworkPolicy::None,
            exec: false,
            agent_capabilities: AgentCapabilities::default(),
        }
    }
}

/// Fold a raw JSON permissions value (canonical or legacy shape) into the
/// canonical typed document. `None` yields the deny-all document.
pub fn normalize_document(value: Option<&Value>) -> Result<PermissionsDocument, Error> {
    let declared = match value {
        None => DeclaredPermissions::default(),
        Some(Value::Object(map)) => {
            if let Some(version) = map.get("schema_version").and_then(Value::as_str) {
                if version != SCHEMA_VERSION {
                    return Err(Error::Permissions(format!(
                        "unknown permissions schema_version: {}",
                        version
                    )));
                }
            }
            let inner = match map.get("declared") {
                Some(declared) => declared.clone(),
                // Legacy shape: the declared fields sit at the top level.
                None => Value::Object(map.clone()),
            };
            serde_json::from_value::<DeclaredPermissions>(inner)?
        }
        Some(other) => {
            return Err(Error::Permissions(format!(
                "permissions document must be an object, got {}",
                json_type_name(other)
            )));
        }
    };

    if let NetworkDeclaration::Mode(mode) = &declared.network {
        if mode != "none" && mode != "all" {
            return Err(Error::Permissions(format!(
                "unknown network mode: {:?} (expected \"none\", \"all\", or a host list)",
                mode
            )));
        }
    }

    Ok(PermissionsDocument {
        schema_version: SCHEMA_VERSION.to_string(),
        declared,
    })
}

/// The `permissions_hash` an attestation binds for this document: SHA-256
/// over the canonical encoding of the normalized form.
pub fn permissions_hash(doc: &PermissionsDocument) -> Result<String, Error> {
    let value = serde_json::to_value(doc)?;
    Ok(canonical::sha256_hex(&canonical::encode(&value)))
}

/// Resolve a normalized document into the policy consumed by the compiler
/// and the post-hoc analyzer. Relative paths resolve against the skill root;
/// absolute paths pass through.
pub fn resolve_policy(doc: &PermissionsDocument, skill_root: &Path) -> Policy {
    let declared = &doc.declared;
    Policy {
        filesystem: FilesystemPolicy {
            read: declared
                .filesystem
                .read
                .iter()
                .map(|p| resolve_declared_path(skill_root, p))
                .collect(),
            write: declared
                .filesystem
                .write
                .iter()
                .map(|p| resolve_declared_path(skill_root, p))
                .collect(),
        },
        network: match &declared.network {
            NetworkDeclaration::Mode(m) if m == "all" => NetworkPolicy::All,
            NetworkDeclaration::Mode(_) => NetworkPolicy::None,
            NetworkDeclaration::Allowlist(hosts) => NetworkPolicy::Allowlist(hosts.clone()),
        },
        exec: !declared.exec.is_empty(),
        agent_capabilities: declared.agent_capabilities,
    }
}

/// Lexical resolution: strips `.`, folds `..`, anchors relative paths at the
/// skill root.
fn resolve_declared_path(skill_root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    let mut out = if path.is_absolute() {
        PathBuf::new()
    } else {
        skill_root.to_path_buf()
    };
    for comp in path.components() {
        match comp {
            Component::CurDir | Component::Prefix(_) => {}
            Component::RootDir => out.push("/"),
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
        }
    }
    out
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A concrete OS confinement mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxBackendKind {
    /// macOS `sandbox-exec` with a generated profile.
    DarwinSandbox,
    /// Landlock LSM driven through the launcher's `LL_FS_RO`/`LL_FS_RW`
    /// environment contract.
    LinuxLandlock,
    /// The child runtime's own permission flags; weakest, always available.
    RuntimePermissions,
}

impl SandboxBackendKind {
    /// Default backend for the host OS.
    pub fn host_default() -> Self {
        #[cfg(target_os = "macos")]
        return SandboxBackendKind::DarwinSandbox;
        #[cfg(target_os = "linux")]
        return SandboxBackendKind::LinuxLandlock;
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        return SandboxBackendKind::RuntimePermissions;
    }

    pub fn name(&self) -> &'static str {
        match self {
            SandboxBackendKind::DarwinSandbox => "darwin-sandbox",
            SandboxBackendKind::LinuxLandlock => "linux-landlock",
            SandboxBackendKind::RuntimePermissions => "runtime-permissions",
        }
    }
}

/// Which axes the chosen backend actually enforces, as opposed to merely
/// documenting. Post-hoc analysis leans on these to stay honest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcedAxes {
    pub filesystem: bool,
    pub network: bool,
    pub exec: bool,
}

/// The compiled spawn recipe handed to the runner.
///
/// Owns its profile tempfile and scratch directory; both are removed when
/// the policy is dropped, on every exit path.
#[derive(Debug)]
pub struct SpawnPolicy {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
    pub backend: SandboxBackendKind,
    pub enforced: EnforcedAxes,
    profile: Option<TempPath>,
    scratch: TempDir,
}

impl SpawnPolicy {
    pub fn profile_path(&self) -> Option<&Path> {
        self.profile.as_deref()
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Compile a policy plus a child command line into a [`SpawnPolicy`] for the
/// given backend.
pub fn compile_spawn_policy(
    policy: &Policy,
    command: &[String],
    skill_root: &Path,
    backend: SandboxBackendKind,
) -> Result<SpawnPolicy, Error> {
    let (program, rest) = command
        .split_first()
        .ok_or_else(|| Error::Sandbox("empty command".to_string()))?;

    let scratch = Builder::new()
        .prefix("haldir-scratch-")
        .tempdir()
        .map_err(|e| Error::Sandbox(format!("cannot create scratch dir: {}", e)))?;

    let mut env = vec![(
        "TMPDIR".to_string(),
        scratch.path().to_string_lossy().into_owned(),
    )];

    let spawn = match backend {
        SandboxBackendKind::DarwinSandbox => {
            let text = profile::generate_darwin_profile(policy, skill_root, scratch.path());
            let mut file = Builder::new()
                .prefix("haldir-profile-")
                .suffix(".sb")
                .tempfile()
                .map_err(|e| Error::Sandbox(format!("cannot create profile tempfile: {}", e)))?;
            file.write_all(text.as_bytes())
                .map_err(|e| Error::Sandbox(format!("cannot write profile: {}", e)))?;
            let profile_path = file.into_temp_path();

            let mut args = vec![
                "-f".to_string(),
                profile_path.to_string_lossy().into_owned(),
            ];
            args.push(program.clone());
            args.extend(rest.iter().cloned());

            tracing::debug!(backend = "darwin-sandbox", profile = %profile_path.display(), "compiled spawn policy");
            SpawnPolicy {
                command: "sandbox-exec".to_string(),
                args,
                env,
                cwd: skill_root.to_path_buf(),
                backend,
                enforced: EnforcedAxes {
                    filesystem: true,
                    // Allowlist filtering is policy-level only; see the
                    // profile's annotation.
                    network: !matches!(policy.network, NetworkPolicy::Allowlist(_)),
                    // The profile must allow process-exec for the child
                    // runtime itself, so the exec axis is not kernel-held.
                    exec: false,
                },
                profile: Some(profile_path),
                scratch,
            }
        }
        SandboxBackendKind::LinuxLandlock => {
            let mut ro: Vec<String> = vec![
                "/usr".to_string(),
                "/lib".to_string(),
                "/lib64".to_string(),
                "/etc".to_string(),
                skill_root.to_string_lossy().into_owned(),
            ];
            ro.extend(
                policy
                    .filesystem
                    .read
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );
            let mut rw: Vec<String> = vec![
                "/dev/null".to_string(),
                scratch.path().to_string_lossy().into_owned(),
            ];
            rw.extend(
                policy
                    .filesystem
                    .write
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );
            env.push(("LL_FS_RO".to_string(), ro.join(":")));
            env.push(("LL_FS_RW".to_string(), rw.join(":")));

            tracing::debug!(backend = "linux-landlock", "compiled spawn policy");
            SpawnPolicy {
                command: program.clone(),
                args: rest.to_vec(),
                env,
                cwd: skill_root.to_path_buf(),
                backend,
                enforced: EnforcedAxes {
                    filesystem: true,
                    // Landlock as driven here covers filesystem only; a
                    // network policy of "all" imposes nothing, so it is
                    // vacuously in effect.
                    network: matches!(policy.network, NetworkPolicy::All),
                    exec: false,
                },
                profile: None,
                scratch,
            }
        }
        SandboxBackendKind::RuntimePermissions => {
            let mut read = vec![
                skill_root.to_string_lossy().into_owned(),
                scratch.path().to_string_lossy().into_owned(),
            ];
            read.extend(
                policy
                    .filesystem
                    .read
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );
            let mut write = vec![scratch.path().to_string_lossy().into_owned()];
            write.extend(
                policy
                    .filesystem
                    .write
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned()),
            );

            let mut args = vec![
                "--permission".to_string(),
                format!("--allow-fs-read={}", read.join(",")),
                format!("--allow-fs-write={}", write.join(",")),
            ];
            if policy.exec {
                args.push("--allow-child-process".to_string());
            }
            args.extend(rest.iter().cloned());

            tracing::debug!(backend = "runtime-permissions", "compiled spawn policy");
            SpawnPolicy {
                command: program.clone(),
                args,
                env,
                cwd: skill_root.to_path_buf(),
                backend,
                enforced: EnforcedAxes {
                    filesystem: true,
                    network: matches!(policy.network, NetworkPolicy::All),
                    exec: true,
                },
                profile: None,
                scratch,
            }
        }
    };

    Ok(spawn)
}
