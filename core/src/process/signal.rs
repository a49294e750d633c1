//! Signal delivery to child processes

/// Signals the supervisor sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to exit (SIGTERM)
    Terminate,
    /// Kill the process unconditionally (SIGKILL)
    Kill,
}

/// Send a signal to every process in the group led by `pgid`
///
/// Returns `Err` if the signal could not be delivered.
#[cfg(unix)]
pub fn send_group(pgid: u32, signal: Signal) -> Result<(), std::io::Error> {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let ret = unsafe { libc::kill(-(pgid as libc::pid_t), signo) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Send a signal to a process group. Only supported on unix.
#[cfg(not(unix))]
pub fn send_group(_pgid: u32, _signal: Signal) -> Result<(), std::io::Error> {
    Err(unsupported())
}

#[cfg(not(unix))]
fn unsupported() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process signals are only supported on unix",
    )
}
