//! Process Supervisor
//!
//! Spawns emulator child processes detached from the tool's lifetime and
//! probes or terminates them later, possibly from a different tool
//! invocation. A spawned process is identified by its pid plus, on Linux,
//! the start time read from `/proc/<pid>/stat`, which disambiguates a
//! recycled pid from the process we actually started.

use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Supervisor errors
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Identity of a spawned child: pid and, where available, its start time
/// in kernel clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStamp {
    pub pid: u32,
    #[serde(default)]
    pub start_ticks: Option<u64>,
}

/// Launch a child process detached from the calling terminal: own process
/// group, null stdio. The child keeps running after this tool exits.
pub fn spawn_detached(
    program: &Path,
    args: &[String],
    env: &[(String, String)],
) -> Result<ProcessStamp, SupervisorError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    for (key, value) in env {
        command.env(key, value);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    debug!("Spawning {:?} {:?}", program, args);

    let child = command.spawn().map_err(|source| SupervisorError::SpawnFailed {
        program: program.display().to_string(),
        source,
    })?;

    let pid = child.id();
    // The Child handle is dropped without wait(); the process is not ours
    // to reap once recorded in the state file.
    Ok(ProcessStamp {
        pid,
        start_ticks: read_start_ticks(pid),
    })
}

/// Probe whether the stamped process is still running. Never errors: a
/// reaped or recycled pid reports `false`.
pub fn is_alive(stamp: &ProcessStamp) -> bool {
    if !pid_exists(stamp.pid) {
        return false;
    }
    match read_proc_stat(stamp.pid) {
        Some(stat) => {
            // An unreaped exited child still answers kill(0).
            if stat.state == 'Z' || stat.state == 'X' {
                return false;
            }
            match stamp.start_ticks {
                Some(recorded) => recorded == stat.start_ticks,
                None => true,
            }
        }
        // No procfs on this system; the plain probe stands.
        None => true,
    }
}

/// Ask the stamped process to exit (SIGTERM), or kill it outright when
/// `forceful`. Terminating an already-dead process is a no-op.
pub fn terminate(stamp: &ProcessStamp, forceful: bool) {
    if !is_alive(stamp) {
        return;
    }

    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(stamp.pid) else {
            return;
        };
        let signal = if forceful { libc::SIGKILL } else { libc::SIGTERM };
        let rc = unsafe { libc::kill(pid, signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!("kill({}, {}) failed: {}", stamp.pid, signal, err);
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = forceful;
        warn!("Process termination is not supported on this platform");
    }
}

#[cfg(unix)]
fn pid_exists(pid: u32) -> bool {
    // A pid outside pid_t range cannot name a live process, and a
    // negative cast would address a process group instead.
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM means the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_exists(_pid: u32) -> bool {
    false
}

struct ProcStat {
    state: char,
    start_ticks: u64,
}

fn read_start_ticks(pid: u32) -> Option<u64> {
    read_proc_stat(pid).map(|s| s.start_ticks)
}

/// Process state and start time (clock ticks since boot, field 22) from
/// `/proc/<pid>/stat`. `None` where procfs is unavailable.
#[cfg(target_os = "linux")]
fn read_proc_stat(pid: u32) -> Option<ProcStat> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm (field 2) may contain spaces; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let start_ticks = fields.nth(18)?.parse().ok()?;
    Some(ProcStat { state, start_ticks })
}

#[cfg(not(target_os = "linux"))]
fn read_proc_stat(_pid: u32) -> Option<ProcStat> {
    None
}
