//! macOS Seatbelt profile generation.
//!
//! Translates a normalized [`Policy`](crate::policy::Policy) into the
//! Scheme-like profile text consumed by `sandbox-exec -f`.

use std::path::Path;

use crate::policy::{NetworkPolicy, Policy};

/// Generate a deny-by-default Seatbelt profile for a policy.
///
/// The allowances beyond the declared paths exist to keep the child runtime
/// bootable at all: exec/fork for the interpreter, sysctl and mach rules for
/// libSystem, dyld's system directories, and the scratch directory.
pub fn generate_darwin_profile(policy: &Policy, skill_root: &Path, scratch_dir: &Path) -> String {
    let mut profile = String::new();

    profile.push_str("(version 1)\n");
    profile.push_str("(deny default)\n\n");

    profile.push_str("; process bootstrap for the child runtime\n");
    profile.push_str("(allow process-exec)\n");
    profile.push_str("(allow process-fork)\n");
    profile.push_str("(allow sysctl-read)\n");
    profile.push_str("(allow mach-lookup)\n");
    profile.push_str("(allow mach-register)\n");
    profile.push_str("(allow signal (target self))\n\n");

    profile.push_str("; dynamic linker and system libraries\n");
    profile.push_str("(allow file-read-metadata)\n");
    profile.push_str("(allow file-read* (subpath \"/usr/lib\"))\n");
    profile.push_str("(allow file-read* (subpath \"/System/Library\"))\n");
    profile.push_str("(allow file-read* (subpath \"/Library\"))\n");
    profile.push_str("(allow file-read* (subpath \"/dev\"))\n");
    profile.push_str("(allow file-read* (literal \"/private/etc/localtime\"))\n\n");

    profile.push_str("; skill tree and scratch directory\n");
    profile.push_str(&format!(
        "(allow file-read* (subpath \"{}\"))\n",
        escape_profile_path(&skill_root.to_string_lossy())
    ));
    profile.push_str(&format!(
        "(allow file-read* (subpath \"{}\"))\n",
        escape_profile_path(&scratch_dir.to_string_lossy())
    ));

    if !policy.filesystem.read.is_empty() {
        profile.push_str("\n; declared read paths\n");
        for path in &policy.filesystem.read {
            profile.push_str(&format!(
                "(allow file-read* (subpath \"{}\"))\n",
                escape_profile_path(&path.to_string_lossy())
            ));
        }
    }

    profile.push_str("\n; writes: scratch directory plus declared write paths\n");
    profile.push_str(&format!(
        "(allow file-write* (subpath \"{}\"))\n",
        escape_profile_path(&scratch_dir.to_string_lossy())
    ));
    for path in &policy.filesystem.write {
        profile.push_str(&format!(
            "(allow file-write* (subpath \"{}\"))\n",
            escape_profile_path(&path.to_string_lossy())
        ));
    }

    match &policy.network {
        NetworkPolicy::None => {
            // Deny-default already blocks the network; no rule emitted.
        }
        NetworkPolicy::All => {
            profile.push_str("\n; network: full access declared\n");
            profile.push_str("(allow network*)\n");
        }
        NetworkPolicy::Allowlist(hosts) => {
            profile.push_str("\n; network: outbound TCP only\n");
            profile.push_str("; per-host filtering is policy-level, not kernel-enforced\n");
            for host in hosts {
                profile.push_str(&format!("; allowlisted host: {}\n", host));
            }
            profile.push_str("(allow network-outbound (remote tcp))\n");
        }
    }

    profile
}

/// Escape `"` and `\` for embedding in profile string literals.
fn escape_profile_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out
}
