use crate::core::config::SlurmConfig;
use crate::core::remote::RemoteShell;
use crate::engine::error::EngineError;
use std::fmt;
use tracing::{debug, info, warn};

/// Remote side of a campaign: the Slurm request, the last known job id and the shell.
pub struct SlurmManager {
    config: SlurmConfig,
    shell: Box<dyn RemoteShell>,
}

impl fmt::Debug for SlurmManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlurmManager")
            .field("config", &self.config)
            .field("address", &self.shell.address())
            .finish()
    }
}

impl SlurmManager {
    /// Ensures the local download directory exists.
    pub fn new(config: SlurmConfig, shell: Box<dyn RemoteShell>) -> Result<Self, EngineError> {
        debug!("Slurm config: {:?}", config);
        let download_dir = &config.download_dir;
        if download_dir.exists() {
            warn!("Directory {:?} already exists!", download_dir);
        } else {
            std::fs::create_dir_all(download_dir).map_err(EngineError::io(download_dir))?;
            info!("Directory {:?} has been created.", download_dir);
        }
        Ok(Self { config, shell })
    }

    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SlurmConfig {
        &mut self.config
    }

    pub fn shell(&self) -> &dyn RemoteShell {
        self.shell.as_ref()
    }

    pub fn job_id(&self) -> Option<u64> {
        self.config.job_id
    }

    pub fn set_job_id(&mut self, job_id: u64) {
        info!("Tracking Slurm job {}", job_id);
        self.config.job_id = Some(job_id);
    }

    /// `<remote dir>/<project>` on the cluster.
    pub fn remote_data_dir(&self, project: &str) -> String {
        format!("{}/{}", self.config.remote_dir.display(), project)
    }

    /// `<storage dir>/<project>` on the cluster.
    pub fn storage_data_dir(&self, project: &str) -> String {
        format!("{}/{}", self.config.storage_dir.display(), project)
    }
}
