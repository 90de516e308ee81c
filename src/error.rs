use std::io;

use thiserror::Error;

/// Failures of a single `launch` call. None of them tear the shell down.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Allocation, pipe or fork failure.
    #[error("cannot {what}: {source}")]
    ResourceExhausted {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    /// A redirection target is missing or not accessible.
    #[error("{path}: {source}")]
    PermissionOrMissingFile {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The program could not be prepared for exec.
    #[error("{program}: cannot execute: {reason}")]
    ExecFailed { program: String, reason: String },
    /// Launching would push the tracked background processes past the limit.
    #[error("total background processes exceed the limit ({limit})")]
    LimitExceeded { limit: usize },
    /// No free slot was left to register a background member.
    #[error("job table is full")]
    TableFull,
}

impl LaunchError {
    pub(crate) fn resource(what: &'static str, source: io::Error) -> Self {
        LaunchError::ResourceExhausted { what, source }
    }

    pub(crate) fn out_of_memory() -> Self {
        LaunchError::ResourceExhausted {
            what: "allocate memory",
            source: io::Error::from(io::ErrorKind::OutOfMemory),
        }
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            LaunchError::ResourceExhausted { source, .. } if source.kind() == io::ErrorKind::OutOfMemory
        )
    }
}
