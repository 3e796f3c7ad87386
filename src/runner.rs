//! Confined child execution.
//!
//! One child per call. Stdout and stderr are drained on background threads
//! while the child runs; without that, output past the pipe buffer would
//! block the child and deadlock the wait loop. The wall-clock timeout and
//! the optional memory cap kill the child and return whatever output was
//! captured so far.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::policy::SpawnPolicy;

/// Default wall-clock timeout for a confined run.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const MEMORY_CHECK_INTERVAL_MS: u64 = 100;

/// Resource limits for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout_secs: u64,
    pub max_memory_mb: Option<u64>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_memory_mb: None,
        }
    }
}

impl RunLimits {
    /// Load limits from `HALDIR_TIMEOUT_SECS` / `HALDIR_MAX_MEMORY_MB`,
    /// falling back to the defaults.
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("HALDIR_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let max_memory_mb = std::env::var("HALDIR_MAX_MEMORY_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok());
        Self {
            timeout_secs,
            max_memory_mb,
        }
    }
}

/// Why the runner killed the child, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Timeout,
    MemoryLimit,
}

/// Everything observed about one confined run. A crash is data here, not an
/// error; `Err` from the runner means the child could not be spawned at all.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Terminating signal, when the child died to one (unix only).
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub kill_reason: Option<KillReason>,
    pub duration: Duration,
}

/// Spawn the compiled policy's command and babysit it to completion.
///
/// The policy's profile tempfile and scratch directory stay alive for the
/// duration of the call because the caller still owns the `SpawnPolicy`;
/// both are removed when it drops, on every exit path.
pub fn run_confined(policy: &SpawnPolicy, limits: &RunLimits) -> Result<RunOutcome, Error> {
    let start = Instant::now();
    let timeout = Duration::from_secs(limits.timeout_secs);
    let check_interval = Duration::from_millis(MEMORY_CHECK_INTERVAL_MS);

    tracing::info!(
        backend = policy.backend.name(),
        command = %policy.command,
        timeout_secs = limits.timeout_secs,
        "spawning confined child"
    );

    let mut cmd = Command::new(&policy.command);
    cmd.args(&policy.args);
    cmd.current_dir(&policy.cwd);
    for (key, value) in &policy.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    #[cfg(unix)]
    if let Some(max_memory_mb) = limits.max_memory_mb {
        use std::os::unix::process::CommandExt;
        let limit_bytes = max_memory_mb * 1024 * 1024;
        unsafe {
            cmd.pre_exec(move || {
                let limit = libc::rlimit {
                    rlim_cur: limit_bytes,
                    rlim_max: limit_bytes,
                };
                libc::setrlimit(libc::RLIMIT_AS, &limit);
                Ok(())
            });
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Sandbox(format!("failed to spawn {}: {}", policy.command, e)))?;

    let stdout_handle = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut s = String::new();
            let _ = out.read_to_string(&mut s);
            s
        })
    });
    let stderr_handle = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut s = String::new();
            let _ = err.read_to_string(&mut s);
            s
        })
    });

    let join_output = |stdout_handle: Option<thread::JoinHandle<String>>,
                       stderr_handle: Option<thread::JoinHandle<String>>| {
        (
            stdout_handle
                .map(|h| h.join().unwrap_or_default())
                .unwrap_or_default(),
            stderr_handle
                .map(|h| h.join().unwrap_or_default())
                .unwrap_or_default(),
        )
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let (stdout, stderr) = join_output(stdout_handle, stderr_handle);
                let signal = terminating_signal(&status);
                let outcome = RunOutcome {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    signal,
                    timed_out: false,
                    kill_reason: None,
                    duration: start.elapsed(),
                };
                tracing::info!(exit_code = outcome.exit_code, "confined child exited");
                return Ok(outcome);
            }
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = join_output(stdout_handle, stderr_handle);
                return Err(Error::Sandbox(format!("failed to wait for child: {}", e)));
            }
        }

        if start.elapsed() > timeout {
            tracing::warn!(timeout_secs = limits.timeout_secs, "confined child timed out");
            let _ = child.kill();
            let _ = child.wait();
            let (stdout, stderr) = join_output(stdout_handle, stderr_handle);
            return Ok(RunOutcome {
                stdout,
                stderr,
                exit_code: -1,
                signal: None,
                timed_out: true,
                kill_reason: Some(KillReason::Timeout),
                duration: start.elapsed(),
            });
        }

        if let Some(limit_mb) = limits.max_memory_mb {
            if let Some(rss) = get_process_memory(child.id()) {
                if rss > limit_mb * 1024 * 1024 {
                    tracing::warn!(rss_bytes = rss, "confined child exceeded memory cap");
                    let _ = child.kill();
                    let _ = child.wait();
                    let (stdout, stderr) = join_output(stdout_handle, stderr_handle);
                    return Ok(RunOutcome {
                        stdout,
                        stderr,
                        exit_code: -1,
                        signal: None,
                        timed_out: false,
                        kill_reason: Some(KillReason::MemoryLimit),
                        duration: start.elapsed(),
                    });
                }
            }
        }

        thread::sleep(check_interval);
    }
}

#[cfg(unix)]
fn terminating_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Resident set size of a process in bytes, via `/proc` on Linux.
#[cfg(target_os = "linux")]
fn get_process_memory(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.split_whitespace().next()?.parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// Resident set size of a process in bytes, via `ps` on macOS.
#[cfg(target_os = "macos")]
fn get_process_memory(pid: u32) -> Option<u64> {
    let output = Command::new("ps")
        .args(["-o", "rss=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rss_kb: u64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
    Some(rss_kb * 1024)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn get_process_memory(_pid: u32) -> Option<u64> {
    None
}
