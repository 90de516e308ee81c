use std::io;
use std::os::fd::RawFd;

use crate::command::ExecImage;
use crate::terminal::TerminalController;

pub type Pid = libc::pid_t;

/// The two continuations of `fork`.
pub(crate) enum Fork {
    Parent(Pid),
    /// Only [`Child::exec`] or [`Child::exit`] may end this branch.
    Child(Child),
}

pub(crate) fn fork() -> io::Result<Fork> {
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(Fork::Child(Child { _priv: () })),
        pid => Ok(Fork::Parent(pid)),
    }
}

/// Handle for code running in a freshly forked child.
///
/// Everything reachable from here is restricted to async-signal-safe
/// calls: no allocation, no locks, no formatting.
pub(crate) struct Child {
    _priv: (),
}

/// Signals the shell ignores or handles and a job must see with their
/// default disposition. SIGPIPE is ignored by the Rust runtime and an
/// ignored disposition survives exec.
const JOB_SIGNALS: [libc::c_int; 7] = [
    libc::SIGPIPE,
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGCHLD,
];

impl Child {
    pub(crate) fn reset_signals(&self) {
        for sig in JOB_SIGNALS {
            unsafe {
                libc::signal(sig, libc::SIG_DFL);
            }
        }
    }

    /// Join `pgid`, or lead a new group when `pgid` is 0.
    pub(crate) fn join_group(&self, pgid: Pid) {
        unsafe {
            libc::setpgid(0, pgid);
        }
    }

    /// Take the terminal for the group just joined, so the stage can read
    /// from it even before the parent's handoff lands.
    pub(crate) fn claim_terminal(&self, terminal: &TerminalController) {
        if let Some(fd) = terminal.tty_fd() {
            unsafe {
                libc::tcsetpgrp(fd, libc::getpgrp());
            }
        }
    }

    pub(crate) fn unblock_signals(&self, previous: &libc::sigset_t) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, previous, std::ptr::null_mut());
        }
    }

    /// Duplicate `fd` onto `target` and close the original.
    ///
    /// An fd already sitting on `target` only loses its close-on-exec flag.
    pub(crate) fn move_fd(&self, fd: RawFd, target: RawFd) {
        if fd == target {
            unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    self.fail(b"fcntl", 1);
                }
            }
            return;
        }
        unsafe {
            if libc::dup2(fd, target) < 0 {
                self.fail(b"dup2", 1);
            }
            libc::close(fd);
        }
    }

    /// Close every descriptor above stderr. Stage wiring must be done first.
    pub(crate) fn close_inherited_fds(&self) {
        #[cfg(target_os = "linux")]
        {
            // close_range(2) needs Linux 5.9; older kernels fall through.
            let rc = unsafe {
                libc::syscall(
                    libc::SYS_close_range,
                    3 as libc::c_uint,
                    libc::c_uint::MAX,
                    0 as libc::c_uint,
                )
            };
            if rc == 0 {
                return;
            }
        }

        let max = match unsafe { libc::sysconf(libc::_SC_OPEN_MAX) } {
            n if n > 0 => n.min(65_536) as RawFd,
            _ => 1024,
        };
        for fd in 3..max {
            unsafe {
                libc::close(fd);
            }
        }
    }

    pub(crate) fn redirect(&self, image: &ExecImage) {
        if let Some(path) = &image.input {
            let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY) };
            if fd < 0 {
                self.fail(path.as_bytes(), 1);
            }
            self.move_fd(fd, libc::STDIN_FILENO);
        }
        if let Some(path) = &image.output {
            let mode: libc::c_uint = 0o644;
            let fd = unsafe {
                libc::open(
                    path.as_ptr(),
                    libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                    mode,
                )
            };
            if fd < 0 {
                self.fail(path.as_bytes(), 1);
            }
            self.move_fd(fd, libc::STDOUT_FILENO);
        }
    }

    /// Replace the process image. Never returns.
    pub(crate) fn exec(self, image: &ExecImage) -> ! {
        unsafe {
            libc::execvp(image.program().as_ptr(), image.argv_ptr());
        }
        let errno = io::Error::last_os_error().raw_os_error();
        let program = image.program().as_bytes();
        match errno {
            Some(libc::ENOENT) => {
                write_stderr(&[b"jsh: ", program, b": command not found\n"]);
                self.exit(127)
            }
            _ => self.fail(program, 126),
        }
    }

    /// Report `context` with the current errno and exit.
    pub(crate) fn fail(&self, context: &[u8], code: libc::c_int) -> ! {
        let reason: &[u8] = match io::Error::last_os_error().raw_os_error() {
            Some(libc::ENOENT) => b"No such file or directory",
            Some(libc::EACCES) => b"Permission denied",
            Some(libc::EISDIR) => b"Is a directory",
            Some(libc::ENOEXEC) => b"Exec format error",
            Some(libc::ENOTDIR) => b"Not a directory",
            Some(libc::EMFILE) => b"Too many open files",
            _ => b"Operation failed",
        };
        write_stderr(&[b"jsh: ", context, b": ", reason, b"\n"]);
        self.exit(code)
    }

    pub(crate) fn exit(&self, code: libc::c_int) -> ! {
        unsafe { libc::_exit(code) }
    }
}

fn write_stderr(parts: &[&[u8]]) {
    for part in parts {
        let mut rest = *part;
        while !rest.is_empty() {
            let n = unsafe { libc::write(libc::STDERR_FILENO, rest.as_ptr().cast(), rest.len()) };
            if n <= 0 {
                return;
            }
            rest = &rest[n as usize..];
        }
    }
}

pub(crate) fn set_process_group(pid: Pid, pgid: Pid) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::setpgid(pid, pgid) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; the child's own setpgid covers it.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

pub(crate) fn current_process_group() -> Pid {
    unsafe { libc::getpgrp() }
}

pub(crate) fn send_signal(pid: Pid, signal: libc::c_int) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::kill(pid, signal) };
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

pub(crate) fn signal_group(pgid: Pid, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }
    send_signal(-pgid, signal)
}

/// Whether the kernel still knows about the process group.
pub(crate) fn group_exists(pgid: Pid) -> bool {
    match signal_group(pgid, 0) {
        Ok(()) => true,
        Err(err) => err.raw_os_error() == Some(libc::EPERM),
    }
}

pub(crate) enum WaitOutcome {
    Exited(i32),
    Stopped,
}

pub(crate) fn wait_for_pid(pid: Pid) -> io::Result<WaitOutcome> {
    let mut raw_status: libc::c_int = 0;

    loop {
        let rc = unsafe { libc::waitpid(pid, &mut raw_status, libc::WUNTRACED) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        if unsafe { libc::WIFSTOPPED(raw_status) } {
            return Ok(WaitOutcome::Stopped);
        }

        if let Some(code) = crate::status::exit_code_from_wait_status(raw_status) {
            return Ok(WaitOutcome::Exited(code));
        }
    }
}

/// Blocks a set of signals for the lifetime of the guard.
pub(crate) struct SignalBlock {
    previous: libc::sigset_t,
}

impl SignalBlock {
    pub(crate) fn new(signals: &[libc::c_int]) -> io::Result<Self> {
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut set);
            for &sig in signals {
                libc::sigaddset(&mut set, sig);
            }
            let mut previous: libc::sigset_t = std::mem::zeroed();
            if libc::sigprocmask(libc::SIG_BLOCK, &set, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { previous })
        }
    }

    /// The mask that was in effect before the guard; children restore it
    /// before exec.
    pub(crate) fn previous(&self) -> &libc::sigset_t {
        &self.previous
    }
}

impl Drop for SignalBlock {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.previous, std::ptr::null_mut());
        }
    }
}

/// Ignore the job-control signals in the shell itself.
pub(crate) fn ignore_job_control_signals() -> io::Result<()> {
    for sig in [libc::SIGQUIT, libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
        if unsafe { libc::signal(sig, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
