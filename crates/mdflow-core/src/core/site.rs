use super::config::{Resource, Software};
use phf::{Map, phf_map};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

static DEFAULT_MODULES: Map<&'static str, &'static str> = phf_map! {
    "gromacs-gpu" => "module load GROMACS/2021.2-fosscuda-2020b",
    "gromacs-cpu" => "module load GROMACS/2021-foss-2020b",
    "amber-gpu" => "module load Amber/22.0-foss-2021b-AmberTools-22.3-CUDA-11.4.1",
    "amber-cpu" => "module load Amber/22.0-foss-2021b-AmberTools-22.3-CUDA-11.4.1",
};

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("File I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}", path = path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("No module line for '{0}'")]
    MissingModule(String),
}

/// Cluster-specific paths and tuning that do not belong in a campaign config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SiteProfile {
    pub sbatch: String,
    pub sacct: String,
    pub modules_init: String,
    /// Module load lines keyed `<software>-<resource>`, e.g. `amber-gpu`.
    pub modules: HashMap<String, String>,
    pub poll_interval_secs: u64,
    pub transport_retries: u32,
    pub retry_delay_secs: u64,
    pub ssh: String,
    pub scp: String,
    /// Remote directory holding `slurm-<id>.out` files.
    pub slurm_log_dir: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            sbatch: "/opt/slurm/current/bin/sbatch".to_string(),
            sacct: "/opt/slurm/current/bin/sacct".to_string(),
            modules_init: "/usr/local/sbin/modules.sh".to_string(),
            modules: HashMap::new(),
            poll_interval_secs: 900,
            transport_retries: 3,
            retry_delay_secs: 60,
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            slurm_log_dir: "~".to_string(),
        }
    }
}

impl SiteProfile {
    pub fn load(path: &Path) -> Result<Self, SiteError> {
        let content = std::fs::read_to_string(path).map_err(|e| SiteError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| SiteError::Toml {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SiteError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn module_load(&self, software: Software, resource: Resource) -> Result<&str, SiteError> {
        let key = format!("{}-{}", software.as_str(), resource.as_str());
        self.modules
            .get(&key)
            .map(String::as_str)
            .or_else(|| DEFAULT_MODULES.get(key.as_str()).copied())
            .ok_or(SiteError::MissingModule(key))
    }
}
