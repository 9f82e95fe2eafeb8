//! Process supervision and interrupt handling.
//!
//! `supervise` runs `collect` in a child process and owns its shutdown:
//! on Ctrl-C or SIGTERM the child is sent SIGTERM and gets [`SHUTDOWN_GRACE`]
//! to exit on its own before it is killed. Inside `collect`,
//! [`run_until_interrupted`] gives the in-flight run the same grace period
//! before dropping it.

use std::error::Error;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::signal;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Spawn `<this binary> collect <args..>` and wait for it.
#[instrument(level = "info")]
pub async fn supervise(collect_args: &[String]) -> Result<ExitStatus, Box<dyn Error>> {
    let exe = std::env::current_exe()?;
    let mut child = Command::new(&exe)
        .arg("collect")
        .args(collect_args)
        .kill_on_drop(true)
        .spawn()?;
    info!(pid = ?child.id(), exe = %exe.display(), "Started collector process");

    let exited = tokio::select! {
        status = child.wait() => Some(status?),
        _ = shutdown_signal() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Stopping collector");
            if let Err(e) = terminate_child(&mut child) {
                warn!(error = %e, "Cannot signal collector");
            }
            stop_child(&mut child, SHUTDOWN_GRACE).await?
        }
    };

    if status.success() {
        info!(%status, "Collector exited");
    } else {
        error!(%status, "Collector exited with failure");
    }
    Ok(status)
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal as unix_signal};

        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM; only Ctrl-C stops the run");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}

/// Ask `child` to stop: SIGTERM on unix, a kill elsewhere.
pub fn terminate_child(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // Already reaped.
        let Some(pid) = child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM)?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        child.start_kill()
    }
}

/// Give `child` up to `grace` to exit, then kill it.
pub async fn stop_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = ?child.id(), "Collector did not stop in time; killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

/// Drive `work` to completion unless `interrupt` fires first; after an
/// interrupt `work` gets `grace` more time and is then dropped.
pub async fn run_with_grace<F, I>(work: F, interrupt: I, grace: Duration) -> Option<F::Output>
where
    F: Future,
    I: Future,
{
    tokio::pin!(work);
    tokio::select! {
        out = &mut work => return Some(out),
        _ = interrupt => {
            warn!(grace_secs = grace.as_secs(), "Interrupt received; letting in-flight work finish");
        }
    }
    match timeout(grace, work).await {
        Ok(out) => Some(out),
        Err(_) => {
            warn!("Grace period elapsed; abandoning in-flight work");
            None
        }
    }
}

/// [`run_with_grace`] bound to [`shutdown_signal`] and [`SHUTDOWN_GRACE`].
pub async fn run_until_interrupted<F: Future>(work: F) -> Option<F::Output> {
    run_with_grace(work, shutdown_signal(), SHUTDOWN_GRACE).await
}
