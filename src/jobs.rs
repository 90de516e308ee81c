use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};

use crate::error::LaunchError;
use crate::process::{self, Pid};

/// Upper bound on background member processes the reaper can track.
pub const MAX_BG_CAPACITY: usize = 16;

/// Finished jobs can pile up between two prompts: everything tracked at the
/// last drain plus one freshly launched job.
const QUEUE_CAPACITY: usize = 2 * MAX_BG_CAPACITY;

const FREE: Pid = 0;

struct Slot {
    pid: AtomicI32,
    pgid: AtomicI32,
}

impl Slot {
    const fn new() -> Self {
        Self {
            pid: AtomicI32::new(FREE),
            pgid: AtomicI32::new(FREE),
        }
    }
}

/// Single-producer single-consumer ring of finished process groups.
///
/// The reaper pushes, the main loop pops.
struct CompletionQueue {
    pgids: [AtomicI32; QUEUE_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
    overflowed: AtomicBool,
}

impl CompletionQueue {
    const fn new() -> Self {
        Self {
            pgids: [const { AtomicI32::new(FREE) }; QUEUE_CAPACITY],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    fn push(&self, pgid: Pid) {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= QUEUE_CAPACITY {
            self.overflowed.store(true, Ordering::Relaxed);
            return;
        }
        self.pgids[tail % QUEUE_CAPACITY].store(pgid, Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
    }

    fn pop(&self) -> Option<Pid> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let pgid = self.pgids[head % QUEUE_CAPACITY].load(Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(pgid)
    }
}

/// The part of the job table the SIGCHLD handler may touch.
///
/// Fixed-size and built only from atomics, so every operation on it is
/// allocation-free and safe to run from signal context.
pub struct ReapState {
    slots: [Slot; MAX_BG_CAPACITY],
    tracked: AtomicUsize,
    completions: CompletionQueue,
}

impl Default for ReapState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReapState {
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot::new() }; MAX_BG_CAPACITY],
            tracked: AtomicUsize::new(0),
            completions: CompletionQueue::new(),
        }
    }

    /// Background member processes not yet reaped.
    pub fn tracked(&self) -> usize {
        self.tracked.load(Ordering::Acquire)
    }

    fn free_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.pid.load(Ordering::Acquire) == FREE)
            .count()
    }

    fn track(&self, pid: Pid, pgid: Pid) -> bool {
        for slot in &self.slots {
            if slot.pid.load(Ordering::Acquire) == FREE {
                slot.pgid.store(pgid, Ordering::Relaxed);
                slot.pid.store(pid, Ordering::Release);
                self.tracked.fetch_add(1, Ordering::AcqRel);
                return true;
            }
        }
        false
    }

    fn has_member(&self, pid: Pid) -> bool {
        self.slots.iter().any(|s| s.pid.load(Ordering::Acquire) == pid)
    }

    fn has_group(&self, pgid: Pid) -> bool {
        self.slots.iter().any(|s| {
            s.pid.load(Ordering::Acquire) != FREE && s.pgid.load(Ordering::Relaxed) == pgid
        })
    }

    /// Forget a reaped pid. When it was the last member of its group, the
    /// group is queued for reporting.
    ///
    /// Async-signal-safe. Unknown pids (foreground children, already
    /// handled members) are ignored.
    pub fn remove_member(&self, pid: Pid) -> bool {
        if pid <= 0 {
            return false;
        }
        let Some(slot) = self
            .slots
            .iter()
            .find(|s| s.pid.load(Ordering::Acquire) == pid)
        else {
            return false;
        };

        let pgid = slot.pgid.load(Ordering::Relaxed);
        slot.pid.store(FREE, Ordering::Release);
        self.tracked.fetch_sub(1, Ordering::AcqRel);

        if !self.has_group(pgid) {
            self.completions.push(pgid);
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Done,
}

/// One background pipeline.
#[derive(Debug)]
pub struct Job {
    pub pgid: Pid,
    pub members: Vec<Pid>,
    pub label: String,
    pub state: JobState,
}

/// A finished background job, ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub pgid: Pid,
    pub label: String,
}

/// The shell's background job table.
///
/// Labels and job records live here and are only touched from the main
/// loop; membership lives in the shared [`ReapState`].
pub struct JobTable {
    reap: &'static ReapState,
    jobs: Vec<Job>,
    limit: usize,
}

impl JobTable {
    pub fn new(reap: &'static ReapState, limit: usize) -> Self {
        Self {
            reap,
            jobs: Vec::new(),
            limit: limit.clamp(1, MAX_BG_CAPACITY),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Refuse a launch that would spawn `additional` background processes
    /// past the limit.
    pub fn check_capacity(&self, additional: usize) -> Result<(), LaunchError> {
        if self.reap.tracked() + additional > self.limit {
            return Err(LaunchError::LimitExceeded { limit: self.limit });
        }
        Ok(())
    }

    /// Start tracking a background job.
    ///
    /// Must run with SIGCHLD blocked so no member can be reaped before it
    /// is tracked.
    pub fn register(&mut self, pgid: Pid, members: &[Pid], label: String) -> Result<(), LaunchError> {
        if self.reap.tracked() + members.len() > self.limit
            || self.reap.free_slots() < members.len()
        {
            return Err(LaunchError::TableFull);
        }
        for &pid in members {
            if !self.reap.track(pid, pgid) {
                return Err(LaunchError::TableFull);
            }
        }
        tracing::debug!(pgid, members = members.len(), "background job registered");
        self.jobs.push(Job {
            pgid,
            members: members.to_vec(),
            label,
            state: JobState::Running,
        });
        Ok(())
    }

    /// Report the jobs whose last member has been reaped.
    ///
    /// A finished job is promoted to `Done` here and evicted by the next
    /// drain. Call only from the main loop, never from signal context.
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        if self.reap.completions.overflowed.swap(false, Ordering::Relaxed) {
            tracing::warn!("completion queue overflowed; some job notices were lost");
        }

        self.jobs.retain(|j| j.state == JobState::Running);
        let reap = self.reap;
        for job in &mut self.jobs {
            job.members.retain(|&pid| reap.has_member(pid));
        }

        let mut done = Vec::new();
        while let Some(pgid) = self.reap.completions.pop() {
            let Some(job) = self
                .jobs
                .iter_mut()
                .find(|j| j.pgid == pgid && j.state == JobState::Running)
            else {
                continue;
            };
            job.state = JobState::Done;
            tracing::debug!(pgid, remaining = job.members.len(), "background job done");
            done.push(Completion {
                pgid,
                label: job.label.clone(),
            });
        }
        done
    }

    /// Jobs still running, each re-checked against the kernel.
    pub fn list_running(&self) -> Vec<(Pid, &str)> {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Running)
            .filter(|j| self.reap.has_group(j.pgid) && process::group_exists(j.pgid))
            .map(|j| (j.pgid, j.label.as_str()))
            .collect()
    }

    /// Jobs not yet reported as done.
    pub fn running(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.state == JobState::Running)
            .count()
    }
}
