//! Single-listener-per-channel guard.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::os::process_alive;
use crate::error::{QueueError, Result};

/// `{dir}/{channel}-master.pid`, removed again on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn path_for(dir: impl AsRef<Path>, channel: &str) -> PathBuf {
        dir.as_ref().join(format!("{}-master.pid", channel))
    }

    /// Claim the channel for this process.
    ///
    /// A file naming a live process (this one included) is an
    /// [`QueueError::AlreadyRunning`]; a stale file is overwritten.
    pub fn acquire(dir: impl AsRef<Path>, channel: &str) -> Result<Self> {
        let path = Self::path_for(&dir, channel);

        if let Some(pid) = Self::read(&path)? {
            if process_alive(pid) {
                return Err(QueueError::AlreadyRunning {
                    channel: channel.to_string(),
                    pid,
                });
            }
            warn!("Replacing stale pid file {} (pid {})", path.display(), pid);
        }

        fs::create_dir_all(dir.as_ref())?;
        fs::write(&path, std::process::id().to_string())?;
        debug!("Wrote pid file {}", path.display());
        Ok(Self { path })
    }

    /// Pid recorded in the file, if the file exists and holds one.
    pub fn read(path: impl AsRef<Path>) -> Result<Option<u32>> {
        match fs::read_to_string(path.as_ref()) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pid of the live listener for a channel.
    pub fn running_pid(dir: impl AsRef<Path>, channel: &str) -> Result<Option<u32>> {
        Ok(Self::read(Self::path_for(dir, channel))?.filter(|pid| process_alive(*pid)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("Could not remove pid file {}: {}", self.path.display(), e);
        }
    }
}
