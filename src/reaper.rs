//! SIGCHLD handling.
//!
//! The handler reaps every exited child without blocking and updates the
//! shared [`ReapState`]. It allocates nothing and prints nothing; notices
//! are produced later by `JobTable::drain_completions` on the main loop.

use std::io;

use nix::errno::Errno;

use crate::jobs::ReapState;

static REAP_STATE: ReapState = ReapState::new();

/// The process-wide reaper state the handler writes into.
pub fn state() -> &'static ReapState {
    &REAP_STATE
}

extern "C" fn on_sigchld(_signal: libc::c_int) {
    preserving_errno(|| reap_all(&REAP_STATE));
}

/// Run `f` without letting it clobber the errno of the code it interrupted.
fn preserving_errno(f: impl FnOnce()) {
    let saved = Errno::last_raw();
    f();
    Errno::set_raw(saved);
}

/// Collect every exited child without blocking.
fn reap_all(state: &ReapState) {
    let mut status: libc::c_int = 0;
    loop {
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        state.remove_member(pid);
    }
}

/// Install the SIGCHLD handler.
pub fn install() -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigchld as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    tracing::debug!("SIGCHLD reaper installed");
    Ok(())
}
