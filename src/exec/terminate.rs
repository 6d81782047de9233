// src/exec/terminate.rs

//! Platform-specific termination of a spawned process tree.
//!
//! On Unix every tool is started as the leader of its own process group, so
//! signalling the negated pid reaches helpers it forked (an ffmpeg launched
//! by a wrapper script, for example). On Windows plain termination does not
//! reach the tree, so `taskkill /T` is used for both steps.

use std::io;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

/// Ask the process tree rooted at `pid` to exit.
#[cfg(unix)]
pub fn request_terminate(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGTERM)
}

/// Unconditionally kill the process tree rooted at `pid`.
#[cfg(unix)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    signal_group(pid, libc::SIGKILL)
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group led by the child we spawned.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        // ESRCH: the group is already gone.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(windows)]
pub fn request_terminate(pid: u32) -> io::Result<()> {
    taskkill(pid)
}

#[cfg(windows)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    taskkill(pid)
}

#[cfg(windows)]
fn taskkill(pid: u32) -> io::Result<()> {
    std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(|_| ())
}

/// Put the child in its own process group so [`request_terminate`] can
/// address the whole tree.
pub fn isolate(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Terminate `child` cooperatively, escalating to a forced kill once
/// `grace` has elapsed. Always returns once the child has been reaped.
pub async fn terminate_with_grace(
    child: &mut Child,
    grace: Duration,
) -> io::Result<std::process::ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.wait().await;
    };

    if let Err(e) = request_terminate(pid) {
        warn!(pid, error = %e, "cooperative terminate failed; killing");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid, ?grace, "process ignored terminate request; forcing kill");
            if let Err(e) = force_kill(pid) {
                debug!(pid, error = %e, "group kill failed; falling back to direct kill");
            }
            if let Err(e) = child.start_kill() {
                debug!(pid, error = %e, "direct kill failed (process likely gone)");
            }
            child.wait().await
        }
    }
}
