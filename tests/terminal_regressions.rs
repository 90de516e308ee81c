#![cfg(target_os = "linux")]

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

const PROMPT: &str = "jsh-ready> ";

/// A jsh process running as session leader on its own pseudo-terminal.
struct PtyShell {
    child: std::process::Child,
    master: File,
    output: Receiver<Vec<u8>>,
    seen: String,
    prompts: usize,
}

impl PtyShell {
    fn spawn(envs: &[(&str, &str)]) -> Option<Self> {
        let mut master_fd = -1;
        let mut slave_fd = -1;
        let rc = unsafe {
            libc::openpty(
                &mut master_fd,
                &mut slave_fd,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            eprintln!("skipping: openpty failed: {}", std::io::Error::last_os_error());
            return None;
        }
        let master = unsafe { File::from_raw_fd(master_fd) };
        let slave = unsafe { OwnedFd::from_raw_fd(slave_fd) };

        let mut command = Command::new(env!("CARGO_BIN_EXE_jsh"));
        command
            .current_dir(std::env::temp_dir())
            .env("JSH_PROMPT", PROMPT)
            .envs(envs.iter().copied())
            .stdin(Stdio::from(slave.try_clone().expect("dup slave")))
            .stdout(Stdio::from(slave.try_clone().expect("dup slave")))
            .stderr(Stdio::from(slave.try_clone().expect("dup slave")));
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() < 0 || libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let child = command.spawn().expect("spawn jsh on a pty");
        drop(slave);

        let (tx, output) = mpsc::channel();
        let mut reader = master.try_clone().expect("dup master");
        std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            // EIO once every slave end is closed.
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 || tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });

        let mut shell = PtyShell {
            child,
            master,
            output,
            seen: String::new(),
            prompts: 0,
        };
        shell.wait_for_prompt();
        Some(shell)
    }

    fn wait_for_prompt(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let target = self.prompts + 1;
        while self.seen.matches(PROMPT).count() < target {
            let left = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("no prompt; output so far:\n{}", self.seen));
            match self.output.recv_timeout(left) {
                Ok(chunk) => self.seen.push_str(&String::from_utf8_lossy(&chunk)),
                Err(_) => panic!("no prompt; output so far:\n{}", self.seen),
            }
        }
        self.prompts = target;
    }

    /// Send one line and wait until the shell prompts again.
    fn run(&mut self, line: &str) {
        writeln!(self.master, "{line}").expect("write line");
        self.wait_for_prompt();
    }

    fn foreground_group(&self) -> libc::pid_t {
        unsafe { libc::tcgetpgrp(self.master.as_raw_fd()) }
    }

    fn shell_pid(&self) -> libc::pid_t {
        self.child.id() as libc::pid_t
    }

    fn exit(mut self) -> String {
        writeln!(self.master, "exit").expect("write exit");
        let status = self.child.wait().expect("wait jsh");
        assert!(status.success(), "jsh exited with {status}");
        self.seen
    }
}

#[test]
fn shell_owns_the_terminal_after_every_launch() {
    let Some(mut shell) = PtyShell::spawn(&[("JSH_MAX_BG", "2")]) else {
        return;
    };
    let pid = shell.shell_pid();
    assert_eq!(shell.foreground_group(), pid);

    for line in [
        "true",
        "echo hi | cat",
        "cat < /definitely/not/here.txt",
        "no_such_command_jsh",
        "no_such_command_jsh | cat",
        "sleep 2 | sleep 2 | sleep 2 &",
        "sleep 1 &",
    ] {
        shell.run(line);
        assert_eq!(
            shell.foreground_group(),
            pid,
            "terminal not reclaimed after `{line}`"
        );
    }

    let output = shell.exit();
    assert!(output.contains("exceed the limit (2)"), "output was:\n{output}");
    assert!(output.contains("command not found"), "output was:\n{output}");
    assert!(output.contains("Running  sleep 1"), "output was:\n{output}");
}

#[test]
fn interrupt_kills_the_foreground_job_not_the_shell() {
    let Some(mut shell) = PtyShell::spawn(&[]) else {
        return;
    };
    let pid = shell.shell_pid();

    writeln!(shell.master, "sleep 10").expect("write line");
    // Give the job time to take the terminal before interrupting it.
    let start = Instant::now();
    while shell.foreground_group() == pid && start.elapsed() < Duration::from_secs(5) {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_ne!(shell.foreground_group(), pid, "job never took the terminal");

    shell.master.write_all(&[0x03]).expect("send ^C");
    shell.wait_for_prompt();
    assert!(start.elapsed() < Duration::from_secs(8));
    assert_eq!(shell.foreground_group(), pid);

    // The pty echoes input, so match on text only the command produces.
    shell.run("printf still-%s\\n here");
    let output = shell.exit();
    assert!(output.contains("still-here"), "output was:\n{output}");
}
