//! Termination of the external snmptrapd process.
//!
//! The daemon owns the snmptrapd lifecycle on shutdown: it reads the
//! PID from the well-known PID file, sends SIGTERM, and waits for the
//! process to go away. snmptrapd closing its stdout is what ends the
//! framer scan loop.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use trap2json_snmp::trapd::PID_FILE_PATH;

const WAIT_INTERVAL: Duration = Duration::from_millis(100);
const WAIT_LIMIT: Duration = Duration::from_secs(10);

fn read_pid(path: &Path) -> Result<Pid> {
    let raw = std::fs::read_to_string(path).context("failed opening pid file")?;
    let pid: i32 = raw.trim().parse().context("corrupted pid file")?;
    Ok(Pid::from_raw(pid))
}

/// Send SIGTERM to snmptrapd and wait for it to exit.
///
/// Failures are logged but never fatal: shutdown proceeds either way.
pub async fn terminate() {
    tracing::info!("terminating snmptrapd process");
    let pid = match read_pid(Path::new(PID_FILE_PATH)) {
        Ok(pid) => pid,
        Err(e) => {
            tracing::warn!(error = %e, "failed getting snmptrapd process");
            return;
        }
    };
    if let Err(e) = kill(pid, Signal::SIGTERM) {
        tracing::warn!(error = %e, "failed sending terminate signal");
        return;
    }
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    // signal 0 probes process existence
    while kill(pid, None).is_ok() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("can't terminate process");
            return;
        }
        tokio::time::sleep(WAIT_INTERVAL).await;
    }
    tracing::info!("snmptrapd terminated");
}
