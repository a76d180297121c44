use super::error::EngineError;
use super::managers::{DatabaseManager, EnvironmentManager, SimulationManager, SlurmManager};
use crate::core::config::{CampaignConfig, RunConfig, TopolConfig};
use crate::core::ledger::{Column, LedgerError, LedgerRecord, Query, Stage};
use crate::core::remote::{RemoteShell, SshConnection};
use crate::core::site::SiteProfile;
use crate::core::structure::{Structure, StructureIo, TextStructureIo};
use std::path::Path;
use tracing::{debug, info};

/// Aggregate root of one campaign run.
///
/// A context whose pipeline failed part-way must not be reused: steps mutate it in
/// place and nothing is rolled back.
pub struct MdContext {
    environment: EnvironmentManager,
    database: DatabaseManager,
    slurm: Option<SlurmManager>,
    simulation: SimulationManager,
    structure_io: Box<dyn StructureIo>,
    site: SiteProfile,
}

pub struct MdContextBuilder {
    config: CampaignConfig,
    structure_io: Option<Box<dyn StructureIo>>,
    remote: Option<Box<dyn RemoteShell>>,
    site: SiteProfile,
}

impl MdContextBuilder {
    pub fn structure_io(mut self, structure_io: Box<dyn StructureIo>) -> Self {
        self.structure_io = Some(structure_io);
        self
    }

    /// Shell used when the campaign has a SLURM section. Defaults to an SSH connection.
    pub fn remote(mut self, shell: Box<dyn RemoteShell>) -> Self {
        self.remote = Some(shell);
        self
    }

    pub fn site(mut self, site: SiteProfile) -> Self {
        self.site = site;
        self
    }

    pub fn build(self) -> Result<MdContext, EngineError> {
        let CampaignConfig {
            environment,
            database,
            mut topologies,
            mut runs,
            slurm,
        } = self.config;

        let environment = EnvironmentManager::new(environment)?;

        let slurm = match slurm {
            Some(config) => {
                let shell: Box<dyn RemoteShell> = match self.remote {
                    Some(shell) => shell,
                    None => Box::new(SshConnection::connect(
                        &config.remote_address,
                        &self.site.ssh,
                        &self.site.scp,
                    )?),
                };
                Some(SlurmManager::new(config, shell)?)
            }
            None => None,
        };

        for topol in &mut topologies {
            topol.file = environment.make_absolute(&topol.file)?;
        }
        runs.sort_by_key(|r| r.index);
        for (position, run) in runs.iter_mut().enumerate() {
            if position == 0 {
                run.start_coordinates_file =
                    environment.make_absolute(&run.start_coordinates_file)?;
            }
            run.config_file = environment.make_absolute(&run.config_file)?;
        }

        let database = DatabaseManager::new(&database, environment.root_dir());
        let simulation = SimulationManager::new(topologies, runs);
        let structure_io: Box<dyn StructureIo> = match self.structure_io {
            Some(structure_io) => structure_io,
            None => Box::new(TextStructureIo::new()),
        };

        debug!("Context initialized for project '{}'", environment.project_name());
        Ok(MdContext {
            environment,
            database,
            slurm,
            simulation,
            structure_io,
            site: self.site,
        })
    }
}

impl MdContext {
    pub fn builder(config: CampaignConfig) -> MdContextBuilder {
        MdContextBuilder {
            config,
            structure_io: None,
            remote: None,
            site: SiteProfile::default(),
        }
    }

    pub fn environment(&self) -> &EnvironmentManager {
        &self.environment
    }

    pub fn simulation(&self) -> &SimulationManager {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut SimulationManager {
        &mut self.simulation
    }

    pub fn database_mut(&mut self) -> &mut DatabaseManager {
        &mut self.database
    }

    pub fn slurm(&self) -> Option<&SlurmManager> {
        self.slurm.as_ref()
    }

    pub fn slurm_mut(&mut self) -> Option<&mut SlurmManager> {
        self.slurm.as_mut()
    }

    /// The Slurm manager, or [`EngineError::NotConnected`] for local-only campaigns.
    pub fn require_slurm(&self) -> Result<&SlurmManager, EngineError> {
        self.slurm.as_ref().ok_or(EngineError::NotConnected)
    }

    pub fn require_slurm_mut(&mut self) -> Result<&mut SlurmManager, EngineError> {
        self.slurm.as_mut().ok_or(EngineError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.slurm.is_some()
    }

    pub fn structure_io(&self) -> &dyn StructureIo {
        self.structure_io.as_ref()
    }

    pub fn site(&self) -> &SiteProfile {
        &self.site
    }

    pub fn current_topol(&self) -> Result<&TopolConfig, EngineError> {
        self.simulation.current_topol()
    }

    pub fn current_topol_mut(&mut self) -> Result<&mut TopolConfig, EngineError> {
        self.simulation.current_topol_mut()
    }

    pub fn current_run(&self) -> Result<&RunConfig, EngineError> {
        self.simulation.current_run()
    }

    pub fn current_run_mut(&mut self) -> Result<&mut RunConfig, EngineError> {
        self.simulation.current_run_mut()
    }

    pub fn energy_groups(&self) -> Result<Vec<String>, EngineError> {
        self.simulation.energy_groups()
    }

    pub fn structure(&self) -> Result<Structure, EngineError> {
        self.simulation.structure()
    }

    pub fn project_query(&self) -> Query {
        Query::new().with(Column::ProjectName, self.environment.project_name())
    }

    /// Records `simulation_name` for the current topology and run as `Unfinished`.
    pub fn add_entry(&mut self, index: u64, simulation_name: &str) -> Result<(), EngineError> {
        let topol = self.current_topol()?;
        let run = self.current_run()?;
        let (remote_address, remote_dir, storage_dir, job_id) = match &self.slurm {
            Some(slurm) => {
                let cfg = slurm.config();
                (
                    cfg.remote_address.clone(),
                    cfg.remote_dir.display().to_string(),
                    cfg.storage_dir.display().to_string(),
                    cfg.job_id,
                )
            }
            None => (String::new(), String::new(), String::new(), None),
        };

        let record = LedgerRecord {
            root_dir: self.environment.root_dir().display().to_string(),
            project_name: self.environment.project_name().to_string(),
            simulation_name: simulation_name.to_string(),
            topology_file: file_name(&topol.file),
            coordinate_file: file_name(&run.start_coordinates_file),
            config_file: file_name(&run.config_file),
            stage: Stage::Unfinished,
            remote_address,
            remote_dir,
            storage_dir,
            job_id,
        };
        info!("Recording simulation {} under index {}", simulation_name, index);
        self.database.add_entry(index, record)
    }

    /// Ledger index of `simulation_name` in this project, or the next free index.
    pub fn find_index(&mut self, simulation_name: &str) -> Result<u64, EngineError> {
        let query = self
            .project_query()
            .with(Column::SimulationName, simulation_name);
        let found = self.database.find_entries(&query)?;
        match found.as_slice() {
            [] => Ok(self.database.last_index()? + 1),
            [(index, _)] => Ok(*index),
            many => Err(LedgerError::DuplicateSimulation {
                project: self.environment.project_name().to_string(),
                simulation: simulation_name.to_string(),
                indices: many.iter().map(|(index, _)| *index).collect(),
            }
            .into()),
        }
    }

    pub fn project_entries(&mut self) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
        let query = self.project_query();
        self.database.find_entries(&query)
    }

    fn find_stage(&mut self, stage: Stage) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
        let query = self.project_query().with(Column::Stage, stage.as_str());
        self.database.find_entries(&query)
    }

    pub fn find_unfinished(&mut self) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
        self.find_stage(Stage::Unfinished)
    }

    pub fn find_finished(&mut self) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
        self.find_stage(Stage::Finished)
    }

    pub fn find_downloaded(&mut self) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
        self.find_stage(Stage::Downloaded)
    }

    pub fn modify_entry(&mut self, change: (Column, &str), query: &Query) -> Result<usize, EngineError> {
        self.database.modify_entry(change, query)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
