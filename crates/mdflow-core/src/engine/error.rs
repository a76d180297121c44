use crate::core::config::ConfigError;
use crate::core::ledger::LedgerError;
use crate::core::remote::RemoteError;
use crate::core::site::SiteError;
use crate::core::structure::StructureError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Ledger error: {source}")]
    Ledger {
        #[from]
        source: LedgerError,
    },

    #[error("Structure I/O error: {source}")]
    Structure {
        #[from]
        source: StructureError,
    },

    #[error("Remote execution error: {source}")]
    Remote {
        #[from]
        source: RemoteError,
    },

    #[error("Site profile error: {source}")]
    Site {
        #[from]
        source: SiteError,
    },

    #[error("File '{file}' was not found in any of {searched:?}", file = file.display())]
    FileNotFound { file: PathBuf, searched: Vec<PathBuf> },

    #[error("Required directory '{path}' does not exist", path = path.display())]
    MissingDirectory { path: PathBuf },

    #[error("No current {0} has been selected")]
    NotSelected(&'static str),

    #[error("The current {0} has not been loaded")]
    NotLoaded(&'static str),

    #[error("Remote execution is not configured (no SLURM section)")]
    NotConnected,

    #[error("Command '{command}' failed after {attempts} attempt(s) with exit code {code}: {stderr}")]
    TransportFailed {
        command: String,
        code: i32,
        attempts: u32,
        stderr: String,
    },

    #[error("Could not determine job status: {0}")]
    StatusParse(String),

    #[error("Log '{path}' is corrupted or incomplete: {reason}", path = path.display())]
    CorruptedLog { path: PathBuf, reason: String },

    #[error("Malformed line {line} in '{path}': '{content}'", path = path.display())]
    MalformedLine {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("No run stage matches {0}")]
    RunNotFound(String),

    #[error("No topology matches {0}")]
    TopologyNotFound(String),

    #[error("No job id is known for project '{0}'")]
    NoJobId(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("File I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| EngineError::Io { path, source }
    }
}
