use std::ops::Range;
use std::os::fd::{AsRawFd, RawFd};

use os_pipe::{PipeReader, PipeWriter};

use crate::command::{CommandSpec, ExecImage};
use crate::error::LaunchError;
use crate::jobs::JobTable;
use crate::process::{self, Child, Fork, Pid, SignalBlock, WaitOutcome};
use crate::terminal::TerminalController;
use crate::token::{self, Token};

/// Signals held back while a job is being assembled: SIGCHLD so no member
/// is reaped before it is tracked or waited for, SIGTTOU so no stage is
/// stopped before it has joined its group.
const LAUNCH_BLOCKED: [libc::c_int; 2] = [libc::SIGCHLD, libc::SIGTTOU];

/// Where one stage's standard streams come from before file redirections.
struct StageIo<'a> {
    stdin: Option<&'a PipeReader>,
    stdout: Option<&'a PipeWriter>,
}

/// Everything a forked child needs, captured before `fork`.
struct ChildPlan<'a> {
    /// Group to join; 0 makes the child its own leader.
    pgid: Pid,
    foreground: Option<&'a TerminalController>,
    mask: &'a libc::sigset_t,
}

/// Run `tokens` as a foreground or background job.
///
/// Returns the pid of the first stage, which is also the job's pgid.
pub fn launch(
    jobs: &mut JobTable,
    terminal: &TerminalController,
    tokens: &[Token],
    background: bool,
) -> Result<Pid, LaunchError> {
    let ranges = stage_ranges(tokens);
    if background {
        jobs.check_capacity(ranges.len())?;
    }

    let images = prepare_stages(tokens, &ranges)?;
    let label = token::render(tokens);

    let block =
        SignalBlock::new(&LAUNCH_BLOCKED).map_err(|e| LaunchError::resource("block signals", e))?;
    let foreground = (!background).then_some(terminal);

    if images.len() == 1 {
        launch_single(jobs, foreground, &images[0], label, block.previous())
    } else {
        launch_pipeline(jobs, foreground, &images, label, block.previous())
    }
}

/// Token sub-ranges of each pipeline stage.
fn stage_ranges(tokens: &[Token]) -> Vec<Range<usize>> {
    let mut ranges = Vec::with_capacity(token::count_pipes(tokens) + 1);
    let mut start = 0;
    for (i, tok) in tokens.iter().enumerate() {
        if *tok == Token::Pipe {
            ranges.push(start..i);
            start = i + 1;
        }
    }
    ranges.push(start..tokens.len());
    ranges
}

/// Build every stage before anything is forked, so a bad stage aborts the
/// line without leaving processes behind.
fn prepare_stages(tokens: &[Token], ranges: &[Range<usize>]) -> Result<Vec<ExecImage>, LaunchError> {
    ranges
        .iter()
        .map(|range| {
            let spec = CommandSpec::build(tokens, range.clone())?;
            check_input(&spec)?;
            spec.prepare()
        })
        .collect()
}

fn check_input(spec: &CommandSpec) -> Result<(), LaunchError> {
    if let Some(path) = &spec.input {
        std::fs::File::open(path).map_err(|source| LaunchError::PermissionOrMissingFile {
            path: path.clone(),
            source,
        })?;
    }
    Ok(())
}

fn launch_single(
    jobs: &mut JobTable,
    foreground: Option<&TerminalController>,
    image: &ExecImage,
    label: String,
    mask: &libc::sigset_t,
) -> Result<Pid, LaunchError> {
    let plan = ChildPlan {
        pgid: 0,
        foreground,
        mask,
    };

    let pid = match process::fork() {
        Err(e) => return Err(LaunchError::resource("fork", e)),
        Ok(Fork::Child(child)) => run_child(child, &plan, StageIo { stdin: None, stdout: None }, image),
        Ok(Fork::Parent(pid)) => pid,
    };

    if let Err(err) = process::set_process_group(pid, pid) {
        tracing::warn!(pid, %err, "setpgid failed");
    }
    tracing::debug!(pid, command = %label, "spawned");

    finish(jobs, foreground, pid, &[pid], label)
}

fn launch_pipeline(
    jobs: &mut JobTable,
    foreground: Option<&TerminalController>,
    images: &[ExecImage],
    label: String,
    mask: &libc::sigset_t,
) -> Result<Pid, LaunchError> {
    let mut members: Vec<Pid> = Vec::with_capacity(images.len());
    let mut pgid: Pid = 0;
    let mut prev_read: Option<PipeReader> = None;

    for (i, image) in images.iter().enumerate() {
        let pipe = if i + 1 < images.len() {
            match os_pipe::pipe() {
                Ok(pipe) => Some(pipe),
                Err(e) => {
                    abort_pipeline(&members, foreground);
                    return Err(LaunchError::resource("create pipe", e));
                }
            }
        } else {
            None
        };

        let plan = ChildPlan {
            pgid,
            foreground,
            mask,
        };
        let pid = match process::fork() {
            Err(e) => {
                abort_pipeline(&members, foreground);
                return Err(LaunchError::resource("fork", e));
            }
            Ok(Fork::Child(child)) => {
                let io = StageIo {
                    stdin: prev_read.as_ref(),
                    stdout: pipe.as_ref().map(|(_, writer)| writer),
                };
                run_child(child, &plan, io, image)
            }
            Ok(Fork::Parent(pid)) => pid,
        };

        if pgid == 0 {
            pgid = pid;
        }
        if let Err(err) = process::set_process_group(pid, pgid) {
            tracing::warn!(pid, pgid, %err, "setpgid failed");
        }
        members.push(pid);
        tracing::debug!(pid, pgid, stage = i, "spawned pipeline stage");

        // The parent keeps only the read end feeding the next stage; the
        // previous one and this write end close here.
        prev_read = pipe.map(|(reader, writer)| {
            drop(writer);
            reader
        });
    }

    finish(jobs, foreground, pgid, &members, label)
}

/// Parent side once every member exists: wait in the foreground, or hand
/// the members to the job table.
fn finish(
    jobs: &mut JobTable,
    foreground: Option<&TerminalController>,
    pgid: Pid,
    members: &[Pid],
    label: String,
) -> Result<Pid, LaunchError> {
    match foreground {
        Some(terminal) => {
            wait_foreground(terminal, pgid, members);
            Ok(pgid)
        }
        None => {
            if let Err(err) = jobs.register(pgid, members, label) {
                abort_pipeline(members, None);
                return Err(err);
            }
            Ok(pgid)
        }
    }
}

fn wait_foreground(terminal: &TerminalController, pgid: Pid, members: &[Pid]) {
    let held = match terminal.handoff(pgid) {
        Ok(held) => Some(held),
        Err(err) => {
            tracing::warn!(pgid, %err, "could not hand the terminal to the job");
            None
        }
    };

    for &pid in members {
        loop {
            match process::wait_for_pid(pid) {
                Ok(WaitOutcome::Exited(code)) => {
                    tracing::debug!(pid, code, "foreground member exited");
                    break;
                }
                Ok(WaitOutcome::Stopped) => {
                    eprintln!("jsh: stopped jobs are not supported; terminating [{pgid}]");
                    let _ = process::signal_group(pgid, libc::SIGTERM);
                    let _ = process::signal_group(pgid, libc::SIGCONT);
                }
                Err(err) => {
                    tracing::debug!(pid, %err, "foreground member already collected");
                    break;
                }
            }
        }
    }

    drop(held);
    // A child may have claimed the terminal even when our handoff failed.
    terminal.reclaim();
}

/// Kill and collect every stage already spawned for a pipeline that could
/// not be completed.
fn abort_pipeline(members: &[Pid], foreground: Option<&TerminalController>) {
    for &pid in members {
        if let Err(err) = process::send_signal(pid, libc::SIGKILL) {
            tracing::debug!(pid, %err, "sibling already gone");
        }
    }
    for &pid in members {
        let _ = process::wait_for_pid(pid);
    }
    if !members.is_empty() {
        tracing::warn!(killed = members.len(), "partial pipeline terminated");
    }
    if let Some(terminal) = foreground {
        terminal.reclaim();
    }
}

/// Child side of a stage. Ends in exec or exit, never returns.
fn run_child(child: Child, plan: &ChildPlan<'_>, io: StageIo<'_>, image: &ExecImage) -> ! {
    child.join_group(plan.pgid);
    if let Some(terminal) = plan.foreground {
        child.claim_terminal(terminal);
    }
    child.reset_signals();

    let stdin: Option<RawFd> = io.stdin.map(AsRawFd::as_raw_fd);
    let stdout: Option<RawFd> = io.stdout.map(AsRawFd::as_raw_fd);
    if let Some(fd) = stdin {
        child.move_fd(fd, libc::STDIN_FILENO);
    }
    if let Some(fd) = stdout {
        child.move_fd(fd, libc::STDOUT_FILENO);
    }
    child.close_inherited_fds();
    child.redirect(image);

    child.unblock_signals(plan.mask);
    child.exec(image)
}
