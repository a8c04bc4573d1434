//! Daemon lifecycle: pid file management and signal-driven shutdown.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

/// The daemon's pid file: written on start, removed on drop.
///
/// A stale pid file (no such process) is replaced; a live one means
/// another daemon owns this project.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(pid) = content.trim().parse::<u32>() {
                if process_alive(pid) {
                    bail!(
                        "daemon already running with pid {pid} (pid file {})",
                        path.display()
                    );
                }
                tracing::warn!(pid, path = %path.display(), "removing stale pid file");
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
        tracing::info!(pid = std::process::id(), path = %path.display(), "pid file written");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Whether a process with `pid` exists (null-signal probe).
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // EPERM means the process exists but belongs to someone else.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

/// Block until SIGTERM or Ctrl-C, then fire the shutdown broadcast.
///
/// The scheduler and all watchers subscribe to the same sender; one signal
/// cancels every job and closes every watcher.
pub async fn wait_for_shutdown(shutdown: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received");
    }
    let _ = shutdown.send(());
}
