//! # Campaign Configuration
//!
//! Typed records describing one simulation campaign and the bracket-format parser
//! that produces them.
//!
//! ## Overview
//!
//! A campaign file is a sequence of named sections:
//!
//! ```text
//! { ENVIRONMENT
//!   SOFTWARE      = amber
//!   BASENAME      = demo
//!   PROJECT_NAME  = demo
//!   RESOURCE      = cpu
//!   CPUS_PER_TASK = 4
//! }
//! ```
//!
//! Every section is discriminated by its name prefix (`ENVIRONMENT`, `SLURM`,
//! `DATABASE`, `TOPOL<N>`, `RUNMD<N>`) into one variant of [`Section`], each carrying
//! its own typed fields. [`CampaignConfig`] then groups the sections into the record
//! collections consumed by the engine.

mod parser;

pub use parser::{NamedSection, parse_sections};

use crate::core::structure::{Coordinates, Structure};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Line {line}: section '{name}' does not match any known section kind")]
    UnknownSection { line: usize, name: String },

    #[error("Line {line}: section '{name}' opened before the previous one was closed")]
    NestedSection { line: usize, name: String },

    #[error("Section '{section}' is never closed")]
    UnterminatedSection { section: String },

    #[error("Line {line}: unexpected content outside of a section: '{content}'")]
    UnexpectedLine { line: usize, content: String },

    #[error("Line {line}: key '{key}' in section '{section}' has no value")]
    MissingValue {
        line: usize,
        section: String,
        key: String,
    },

    #[error("Unknown option '{key}' in section '{section}'")]
    UnknownKey { section: String, key: String },

    #[error("Option '{key}' is given more than once in section '{section}'")]
    DuplicateKey { section: String, key: String },

    #[error("Field '{field}' in section '{section}' is not optional and is missing")]
    MissingField {
        section: String,
        field: &'static str,
    },

    #[error("Invalid value '{value}' for '{key}' in section '{section}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unable to derive an index from section name '{section}'")]
    IndexNotDerivable { section: String },

    #[error("Section '{name}' is defined more than once")]
    DuplicateSection { name: String },

    #[error("{kind} section is required but has not been set")]
    MissingSection { kind: &'static str },

    #[error("Only one {kind} section is allowed, found '{first}' and '{second}'")]
    ConflictingSections {
        kind: &'static str,
        first: String,
        second: String,
    },

    #[error("{kind} index {index} is used by more than one section")]
    DuplicateIndex { kind: &'static str, index: u32 },
}

/// One of the two supported MD engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Software {
    Amber,
    Gromacs,
}

impl Software {
    pub fn topology_extension(self) -> &'static str {
        match self {
            Software::Amber => "parm7",
            Software::Gromacs => "top",
        }
    }

    pub fn coordinates_extension(self) -> &'static str {
        match self {
            Software::Amber => "rst7",
            Software::Gromacs => "gro",
        }
    }

    /// Extension of the per-simulation log inspected for completion.
    pub fn log_extension(self) -> &'static str {
        match self {
            Software::Amber => "mdout",
            Software::Gromacs => "log",
        }
    }

    pub fn from_log_extension(ext: &str) -> Option<Self> {
        match ext {
            "mdout" => Some(Software::Amber),
            "log" => Some(Software::Gromacs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Software::Amber => "amber",
            Software::Gromacs => "gromacs",
        }
    }
}

impl FromStr for Software {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amber" => Ok(Software::Amber),
            "gromacs" | "gmx" => Ok(Software::Gromacs),
            other => Err(format!("unsupported MD engine '{}'", other)),
        }
    }
}

impl fmt::Display for Software {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute resource class requested for the simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cpu,
    Gpu,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Gpu => "gpu",
        }
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Resource::Cpu),
            "gpu" => Ok(Resource::Gpu),
            other => Err(format!("unsupported resource class '{}'", other)),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentConfig {
    pub software: Software,
    pub basename: String,
    pub project_name: String,
    pub resource: Resource,
    pub cpus_per_task: u32,
    pub root: Option<PathBuf>,
    pub param_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlurmConfig {
    pub remote_address: String,
    pub remote_dir: PathBuf,
    /// Long-term storage on the cluster where finished archives are moved.
    pub storage_dir: PathBuf,
    pub download_dir: PathBuf,
    pub nodes: u32,
    pub ntasks: u32,
    pub memory: String,
    pub time: String,
    pub account: String,
    pub partition: String,
    pub qos: Option<String>,
    pub gpu_resources: Option<String>,
    pub ngpu: Option<u32>,
    pub job_id: Option<u64>,
}

impl SlurmConfig {
    /// `gpu:<type>:<count>` request string, if GPU resources are configured.
    pub fn gres(&self) -> Option<String> {
        let resources = self.gpu_resources.as_deref()?;
        Some(format!("gpu:{}:{}", resources, self.ngpu.unwrap_or(1)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopolConfig {
    pub index: u32,
    pub name: String,
    pub ff: String,
    pub number: u32,
    pub file: PathBuf,
    pub structure: Option<Structure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub index: u32,
    pub sim_type: String,
    pub nruns: u32,
    pub config_file: PathBuf,
    pub start_coordinates_file: PathBuf,
    pub start_coordinates: Option<Coordinates>,
}

/// A parsed configuration section, discriminated by its name prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Environment(EnvironmentConfig),
    Slurm(SlurmConfig),
    Database(DatabaseConfig),
    Topol(TopolConfig),
    Run(RunConfig),
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        match self {
            Section::Environment(_) => SectionKind::Environment,
            Section::Slurm(_) => SectionKind::Slurm,
            Section::Database(_) => SectionKind::Database,
            Section::Topol(_) => SectionKind::Topol,
            Section::Run(_) => SectionKind::Run,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Environment,
    Slurm,
    Database,
    Topol,
    Run,
}

impl SectionKind {
    const PREFIXES: [(&'static str, SectionKind); 5] = [
        ("ENVIRONMENT", SectionKind::Environment),
        ("SLURM", SectionKind::Slurm),
        ("RUNMD", SectionKind::Run),
        ("TOPOL", SectionKind::Topol),
        ("DATABASE", SectionKind::Database),
    ];

    /// Matches an upper-cased section name against the known prefixes.
    pub fn from_section_name(name: &str) -> Option<Self> {
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }

    pub fn label(self) -> &'static str {
        match self {
            SectionKind::Environment => "ENVIRONMENT",
            SectionKind::Slurm => "SLURM",
            SectionKind::Database => "DATABASE",
            SectionKind::Topol => "TOPOL",
            SectionKind::Run => "RUNMD",
        }
    }
}

/// All records of one campaign, grouped by kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignConfig {
    pub environment: EnvironmentConfig,
    pub database: DatabaseConfig,
    pub topologies: Vec<TopolConfig>,
    pub runs: Vec<RunConfig>,
    pub slurm: Option<SlurmConfig>,
}

impl CampaignConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("Parsing campaign configuration from {:?}", path);
        content.parse()
    }

    pub fn from_sections(sections: Vec<NamedSection>) -> Result<Self, ConfigError> {
        let mut environment: Option<(String, EnvironmentConfig)> = None;
        let mut database: Option<(String, DatabaseConfig)> = None;
        let mut slurm: Option<(String, SlurmConfig)> = None;
        let mut topologies = Vec::new();
        let mut runs = Vec::new();

        for NamedSection { name, section } in sections {
            match section {
                Section::Environment(cfg) => {
                    set_unique(&mut environment, SectionKind::Environment, name, cfg)?
                }
                Section::Database(cfg) => {
                    set_unique(&mut database, SectionKind::Database, name, cfg)?
                }
                Section::Slurm(cfg) => set_unique(&mut slurm, SectionKind::Slurm, name, cfg)?,
                Section::Topol(cfg) => topologies.push(cfg),
                Section::Run(cfg) => runs.push(cfg),
            }
        }

        let (_, environment) = environment.ok_or(ConfigError::MissingSection {
            kind: SectionKind::Environment.label(),
        })?;
        let (_, database) = database.ok_or(ConfigError::MissingSection {
            kind: SectionKind::Database.label(),
        })?;
        if topologies.is_empty() {
            return Err(ConfigError::MissingSection {
                kind: SectionKind::Topol.label(),
            });
        }
        if runs.is_empty() {
            return Err(ConfigError::MissingSection {
                kind: SectionKind::Run.label(),
            });
        }

        topologies.sort_by_key(|t: &TopolConfig| t.index);
        runs.sort_by_key(|r: &RunConfig| r.index);
        check_unique_indices(topologies.iter().map(|t| t.index), SectionKind::Topol)?;
        check_unique_indices(runs.iter().map(|r| r.index), SectionKind::Run)?;

        Ok(Self {
            environment,
            database,
            topologies,
            runs,
            slurm: slurm.map(|(_, cfg)| cfg),
        })
    }
}

impl FromStr for CampaignConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_sections(parse_sections(s)?)
    }
}

fn set_unique<T>(
    slot: &mut Option<(String, T)>,
    kind: SectionKind,
    name: String,
    value: T,
) -> Result<(), ConfigError> {
    if let Some((first, _)) = slot {
        return Err(ConfigError::ConflictingSections {
            kind: kind.label(),
            first: first.clone(),
            second: name,
        });
    }
    *slot = Some((name, value));
    Ok(())
}

fn check_unique_indices(
    sorted: impl Iterator<Item = u32>,
    kind: SectionKind,
) -> Result<(), ConfigError> {
    let mut previous = None;
    for index in sorted {
        if previous == Some(index) {
            return Err(ConfigError::DuplicateIndex {
                kind: kind.label(),
                index,
            });
        }
        previous = Some(index);
    }
    Ok(())
}
