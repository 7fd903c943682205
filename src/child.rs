//! Transcoder child process helpers
//!
//! The stream supervisor and the recording manager are policy layers over
//! the same substrate: spawn an ffmpeg child, confirm it survived startup,
//! stop it gracefully, run one-shot finalize commands. That substrate lives
//! here.
//!
//! Graceful stop writes `q` to the child's stdin (ffmpeg's interactive quit,
//! which flushes the muxer) and falls back to SIGKILL after the grace
//! period. `kill_on_drop` guarantees no orphan ffmpeg survives a dropped
//! handle.

use crate::error::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

/// How long a freshly spawned child must stay alive before the spawn is
/// considered successful (the Starting -> Running proxy).
pub const STARTUP_PROBE: Duration = Duration::from_millis(250);

/// Grace period between the quit request and SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// Spawn a long-lived transcoder child with piped stdin for the graceful
/// quit path.
pub fn spawn(bin: &str, args: &[String]) -> Result<Child> {
    tracing::debug!(bin = %bin, args = ?args, "Spawning transcoder child");

    Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ProcessFailed(format!("Failed to spawn {bin}: {e}")))
}

/// Confirm the child survived its first moments. A transcoder that dies
/// inside the probe window almost always failed to open its input.
pub async fn confirm_started(child: &mut Child) -> Result<()> {
    tokio::time::sleep(STARTUP_PROBE).await;

    match child.try_wait() {
        Ok(Some(status)) => Err(Error::ProcessFailed(format!(
            "Transcoder exited immediately with {status}"
        ))),
        Ok(None) => Ok(()),
        Err(e) => Err(Error::ProcessFailed(format!(
            "Could not poll transcoder: {e}"
        ))),
    }
}

/// Graceful-then-forced stop: request quit on stdin, wait out the grace
/// period, then SIGKILL.
pub async fn stop(child: &mut Child) {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
        // Dropping stdin closes the pipe; ffmpeg also quits on EOF
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(status = %status, "Transcoder stopped gracefully");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Transcoder wait failed, killing");
            let _ = child.kill().await;
        }
        Err(_) => {
            tracing::warn!("Transcoder ignored quit request, killing");
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

/// Run a short one-shot ffmpeg invocation (remux, thumbnail, self-test) to
/// completion and fail on a non-zero exit.
pub async fn run_to_completion(bin: &str, args: &[String], what: &str) -> Result<()> {
    let output = Command::new(bin)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::ProcessFailed(format!("Failed to run {what}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        return Err(Error::ProcessFailed(format!(
            "{what} failed ({}): {}",
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
        )));
    }

    Ok(())
}
