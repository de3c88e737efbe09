//! Thin wrappers over the process syscalls the supervisor needs.

use std::io;

use super::WorkerSignal;
use crate::error::{QueueError, Result};

/// Deliver a worker signal to another process.
pub fn send_signal(pid: u32, signal: WorkerSignal) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| QueueError::configuration(format!("pid {} out of range", pid)))?;

    // SAFETY: kill has no memory preconditions.
    if unsafe { libc::kill(pid, signal.as_raw()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

/// Whether a process with this pid exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 only performs the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Resident set size of the current process in megabytes.
///
/// Reads `/proc/self/statm`; returns 0 where procfs is unavailable.
pub fn resident_memory_mb() -> u64 {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|field| field.parse().ok())
        .unwrap_or(0);

    // SAFETY: sysconf is a read-only query.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = u64::try_from(page_size).unwrap_or(4096);

    pages * page_size / (1024 * 1024)
}
