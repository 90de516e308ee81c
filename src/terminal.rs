use std::io;

use crate::process::Pid;

/// Owns the question of which process group holds the controlling terminal.
#[derive(Debug, Clone, Copy)]
pub struct TerminalController {
    tty_fd: Option<libc::c_int>,
    shell_pgid: Pid,
}

impl TerminalController {
    /// Capture the shell's own group. Without a terminal on stdin every
    /// operation is a no-op.
    pub fn new(shell_pgid: Pid) -> Self {
        let tty_fd = if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            Some(libc::STDIN_FILENO)
        } else {
            None
        };
        Self { tty_fd, shell_pgid }
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    pub(crate) fn tty_fd(&self) -> Option<libc::c_int> {
        self.tty_fd
    }

    /// Give the terminal to `pgid` until the returned guard is dropped.
    pub fn handoff(&self, pgid: Pid) -> io::Result<Foreground<'_>> {
        if let Some(fd) = self.tty_fd {
            set_terminal_foreground(fd, pgid)?;
            tracing::debug!(pgid, "terminal handed to job");
        }
        Ok(Foreground { controller: self })
    }

    /// Make the shell's group the terminal's foreground group again.
    pub fn reclaim(&self) {
        if let Some(fd) = self.tty_fd {
            if let Err(err) = set_terminal_foreground(fd, self.shell_pgid) {
                tracing::warn!(%err, "failed to reclaim the terminal");
            }
        }
    }
}

/// A foreground job's hold on the terminal; dropping it reclaims.
pub struct Foreground<'a> {
    controller: &'a TerminalController,
}

impl Drop for Foreground<'_> {
    fn drop(&mut self) {
        self.controller.reclaim();
    }
}

struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}

fn set_terminal_foreground(fd: libc::c_int, pgid: Pid) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    // tcsetpgrp from a background group raises SIGTTOU.
    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}
