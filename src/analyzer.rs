//! Post-hoc analysis of confined runs.
//!
//! After the child exits, its stdout and stderr are scanned for indicators
//! of capabilities the declared policy never granted. Runner metadata
//! (timeout, memory kill, terminating signal) feeds in as well.

use serde::{Deserialize, Serialize};

use crate::policy::{NetworkPolicy, Policy};
use crate::runner::{KillReason, RunOutcome};

const NETWORK_INDICATORS: &[&str] = &["fetch(", "http://", "https://", "curl "];
const EXEC_INDICATORS: &[&str] = &["spawn(", "subprocess", "child_process", "execve", "exec("];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Network,
    Exec,
    FilesystemWrite,
    Timeout,
    Memory,
    Crash,
}

/// One piece of undeclared-capability evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    pub severity: Severity,
    pub evidence: String,
}

/// Overall disposition of a run, from the highest severity seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Flag,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub status: RunStatus,
    pub violations: Vec<Violation>,
    pub duration_ms: u64,
}

/// Cross-reference a run's output and metadata with the declared policy.
pub fn analyze_run(outcome: &RunOutcome, policy: &Policy) -> AnalysisResult {
    let mut violations = Vec::new();

    if policy.network == NetworkPolicy::None {
        if let Some(line) = find_indicator_line(outcome, NETWORK_INDICATORS) {
            violations.push(Violation {
                kind: ViolationKind::Network,
                severity: Severity::High,
                evidence: line,
            });
        }
    }

    if !policy.exec {
        if let Some(line) = find_indicator_line(outcome, EXEC_INDICATORS) {
            violations.push(Violation {
                kind: ViolationKind::Exec,
                severity: Severity::Critical,
                evidence: line,
            });
        }
    }

    // EACCES/EPERM with a nonzero exit means the kernel denied an operation
    // the child attempted; for a write-restricted sandbox that is the
    // sandbox working, and worth surfacing.
    if outcome.exit_code != 0
        && (outcome.stderr.contains("EACCES") || outcome.stderr.contains("EPERM"))
    {
        let line = outcome
            .stderr
            .lines()
            .find(|l| l.contains("EACCES") || l.contains("EPERM"))
            .unwrap_or("")
            .trim()
            .to_string();
        violations.push(Violation {
            kind: ViolationKind::FilesystemWrite,
            severity: Severity::Medium,
            evidence: line,
        });
    }

    if outcome.timed_out {
        violations.push(Violation {
            kind: ViolationKind::Timeout,
            severity: Severity::Medium,
            evidence: format!("run exceeded its wall-clock timeout ({:?})", outcome.duration),
        });
    }

    if outcome.kill_reason == Some(KillReason::MemoryLimit) {
        violations.push(Violation {
            kind: ViolationKind::Memory,
            severity: Severity::Medium,
            evidence: "run exceeded its memory cap".to_string(),
        });
    }

    if let Some(signal) = outcome.signal {
        if !outcome.timed_out {
            violations.push(Violation {
                kind: ViolationKind::Crash,
                severity: Severity::Medium,
                evidence: format!("child terminated by signal {}", signal),
            });
        }
    }

    let status = match violations.iter().map(|v| v.severity).max() {
        Some(Severity::Critical) => RunStatus::Reject,
        Some(Severity::High) => RunStatus::Flag,
        _ => RunStatus::Pass,
    };

    if status != RunStatus::Pass {
        tracing::warn!(?status, violations = violations.len(), "run flagged by analyzer");
    }

    AnalysisResult {
        status,
        violations,
        duration_ms: outcome.duration.as_millis() as u64,
    }
}

/// First output line containing any of the indicators.
fn find_indicator_line(outcome: &RunOutcome, indicators: &[&str]) -> Option<String> {
    outcome
        .stdout
        .lines()
        .chain(outcome.stderr.lines())
        .find(|line| indicators.iter().any(|needle| line.contains(needle)))
        .map(|line| line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(stdout: &str, stderr: &str, exit_code: i32) -> RunOutcome {
        RunOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            signal: None,
            timed_out: false,
            kill_reason: None,
            duration: Duration::from_millis(120),
        }
    }

    #[test]
    fn test_clean_run_passes() {
        let result = analyze_run(&outcome("all good\n", "", 0), &Policy::deny_all());
        assert_eq!(result.status, RunStatus::Pass);
        assert!(result.violations.is_empty());
        assert_eq!(result.duration_ms, 120);
    }

    #[test]
    fn test_undeclared_network_flags() {
        let result = analyze_run(
            &outcome("fetch(\"https://x\")\n", "", 0),
            &Policy::deny_all(),
        );
        assert_eq!(result.status, RunStatus::Flag);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::Network);
        assert_eq!(result.violations[0].severity, Severity::High);
    }

    #[test]
    fn test_declared_network_not_flagged() {
        let mut policy = Policy::deny_all();
        policy.network = NetworkPolicy::All;
        let result = analyze_run(&outcome("curl https://example.com\n", "", 0), &policy);
        assert_eq!(result.status, RunStatus::Pass);
    }

    #[test]
    fn test_undeclared_exec_rejects() {
        let result = analyze_run(
            &outcome("", "spawning subprocess worker\n", 0),
            &Policy::deny_all(),
        );
        assert_eq!(result.status, RunStatus::Reject);
        assert_eq!(result.violations[0].kind, ViolationKind::Exec);
        assert_eq!(result.violations[0].severity, Severity::Critical);
    }

    #[test]
    fn test_declared_exec_not_flagged() {
        let mut policy = Policy::deny_all();
        policy.exec = true;
        let result = analyze_run(&outcome("spawn(worker)\n", "", 0), &policy);
        assert_eq!(result.status, RunStatus::Pass);
    }

    #[test]
    fn test_denied_write_reported() {
        let result = analyze_run(
            &outcome("", "open /etc/passwd: EACCES permission denied\n", 1),
            &Policy::deny_all(),
        );
        assert_eq!(result.status, RunStatus::Pass);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].kind, ViolationKind::FilesystemWrite);
        assert!(result.violations[0].evidence.contains("EACCES"));
    }

    #[test]
    fn test_eacces_with_zero_exit_ignored() {
        let result = analyze_run(
            &outcome("", "transient EACCES retried ok\n", 0),
            &Policy::deny_all(),
        );
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_timeout_and_memory_metadata() {
        let mut timed = outcome("", "", -1);
        timed.timed_out = true;
        timed.kill_reason = Some(KillReason::Timeout);
        let result = analyze_run(&timed, &Policy::deny_all());
        assert_eq!(result.violations[0].kind, ViolationKind::Timeout);
        assert_eq!(result.status, RunStatus::Pass);

        let mut oom = outcome("", "", -1);
        oom.kill_reason = Some(KillReason::MemoryLimit);
        let result = analyze_run(&oom, &Policy::deny_all());
        assert_eq!(result.violations[0].kind, ViolationKind::Memory);
    }

    #[test]
    fn test_crash_is_data() {
        let mut crashed = outcome("", "", -1);
        crashed.signal = Some(11);
        let result = analyze_run(&crashed, &Policy::deny_all());
        assert_eq!(result.violations[0].kind, ViolationKind::Crash);
        assert!(result.violations[0].evidence.contains("11"));
        assert_eq!(result.status, RunStatus::Pass);
    }

    #[test]
    fn test_highest_severity_wins() {
        let result = analyze_run(
            &outcome("fetch(\"https://x\")\nspawn(worker)\n", "", 0),
            &Policy::deny_all(),
        );
        assert_eq!(result.status, RunStatus::Reject);
        assert_eq!(result.violations.len(), 2);
    }

    #[test]
    fn test_violation_wire_shape() {
        let violation = Violation {
            kind: ViolationKind::Network,
            severity: Severity::High,
            evidence: "curl https://x".to_string(),
        };
        let json = serde_json::to_string(&violation).unwrap();
        assert!(json.contains("\"type\":\"network\""));
        assert!(json.contains("\"severity\":\"high\""));
    }
}
