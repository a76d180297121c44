//! # Remote Execution
//!
//! The [`RemoteShell`] trait is the only path by which the orchestrator touches the
//! cluster: remote commands, local helper commands (archiving), and file transfer in
//! both directions. [`SshConnection`] implements it with the system `ssh` and `scp`
//! programs; tests substitute a scripted fake.
//!
//! The [`slurm`] submodule parses the text the scheduler tools print.

pub mod slurm;
mod ssh;

pub use slurm::{JobState, parse_sacct, parse_submitted_job_id};
pub use ssh::SshConnection;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("SSH agent is not available: {0}")]
    AgentUnavailable(String),

    #[error("Could not parse scheduler output: {0}")]
    StatusParse(String),

    #[error("Local path '{path}' is not valid UTF-8", path = path.display())]
    NonUtf8Path { path: PathBuf },
}

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub trait RemoteShell {
    /// The `user@host` the shell talks to.
    fn address(&self) -> &str;

    fn run_remote(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    fn run_local(&self, program: &str, args: &[String]) -> Result<CommandOutput, RemoteError>;

    /// Copies a local file or directory to `remote` on the host.
    fn upload(&self, local: &Path, remote: &str) -> Result<CommandOutput, RemoteError>;

    /// Copies `remote` (which may contain shell patterns) into the local directory.
    fn download(&self, remote: &str, local: &Path) -> Result<CommandOutput, RemoteError>;
}

pub(crate) fn path_str(path: &Path) -> Result<&str, RemoteError> {
    path.to_str().ok_or_else(|| RemoteError::NonUtf8Path {
        path: path.to_path_buf(),
    })
}
