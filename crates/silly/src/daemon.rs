//! Process daemonization: fork, detach from the controlling terminal,
//! redirect stdio. Follows the conventional single-fork daemonize pattern
//! rather than a double-fork -- this process doesn't need to guard against
//! re-acquiring a controlling terminal, just to stop blocking a shell.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;

use tracing::warn;

/// Forks, exits the parent, detaches the child from its controlling
/// terminal via `setsid`, and redirects stdin/stdout/stderr to
/// `/tmp/<progname>-<pid>.log`.
///
/// Returns in the child only; the parent calls `std::process::exit(0)`
/// directly from inside this function, since there is nothing left for it
/// to do once the child has forked off.
pub fn daemonize(progname: &str) -> io::Result<()> {
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => std::process::exit(0),
    }

    if unsafe { libc::setsid() } == -1 {
        warn!("daemonize: setsid failed, continuing attached to the controlling terminal");
    }

    let pid = std::process::id();
    let log_path = format!("/tmp/{progname}-{pid}.log");
    let log = OpenOptions::new().create(true).append(true).open(&log_path)?;
    let fd = log.as_raw_fd();

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    // `log`'s own fd is no longer needed once stdio has been redirected onto it.
    drop(log);

    Ok(())
}
