use mdflow::core::config::ConfigError;
use mdflow::core::site::SiteError;
use mdflow::engine::error::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Campaign configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Site profile error: {0}")]
    Site(#[from] SiteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
