use crate::config::Config;
use crate::error::LaunchError;
use crate::jobs::{Completion, JobTable, ReapState};
use crate::launch;
use crate::process::{self, Pid};
use crate::terminal::TerminalController;
use crate::token::Token;

/// State owned by the main loop and threaded through every launch.
///
/// The only piece shared with the SIGCHLD handler is the `ReapState`
/// behind the job table.
pub struct Session {
    config: Config,
    jobs: JobTable,
    terminal: TerminalController,
}

impl Session {
    pub fn new(config: Config, reap: &'static ReapState) -> Self {
        let jobs = JobTable::new(reap, config.max_background);
        let terminal = TerminalController::new(process::current_process_group());
        tracing::debug!(
            shell_pgid = terminal.shell_pgid(),
            limit = jobs.limit(),
            "session started"
        );
        Self {
            config,
            jobs,
            terminal,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Launch a validated, builtin-free token sequence.
    pub fn launch(&mut self, tokens: &[Token], background: bool) -> Result<Pid, LaunchError> {
        let result = launch::launch(&mut self.jobs, &self.terminal, tokens, background);
        // Whatever happened, the prompt must come back with the shell in front.
        self.terminal.reclaim();
        result
    }

    pub fn drain_completions(&mut self) -> Vec<Completion> {
        self.jobs.drain_completions()
    }

    pub fn list_running_jobs(&self) -> Vec<(Pid, &str)> {
        self.jobs.list_running()
    }

    /// Jobs still tracked when the shell exits.
    pub fn outstanding_jobs(&self) -> usize {
        self.jobs.running()
    }
}
