use crate::core::config::{RunConfig, TopolConfig};
use crate::core::structure::Structure;
use crate::engine::error::EngineError;
use std::path::Path;
use tracing::{debug, info};

/// Topology and run-stage records plus the "current" selections steps operate on.
#[derive(Debug, Clone)]
pub struct SimulationManager {
    topologies: Vec<TopolConfig>,
    runs: Vec<RunConfig>,
    current_topol: Option<usize>,
    current_run: Option<usize>,
}

impl SimulationManager {
    pub fn new(mut topologies: Vec<TopolConfig>, mut runs: Vec<RunConfig>) -> Self {
        topologies.sort_by_key(|t| t.index);
        runs.sort_by_key(|r| r.index);
        for topol in &topologies {
            debug!("Topology config: {:?}", topol);
        }
        for run in &runs {
            debug!("Run config: {:?}", run);
        }
        Self {
            topologies,
            runs,
            current_topol: None,
            current_run: None,
        }
    }

    pub fn topologies(&self) -> &[TopolConfig] {
        &self.topologies
    }

    pub fn runs(&self) -> &[RunConfig] {
        &self.runs
    }

    /// Adds a topology, keeping the list sorted by index. The current selection is kept.
    pub fn push_topology(&mut self, topol: TopolConfig) {
        let selected = self.current_topol.map(|pos| self.topologies[pos].index);
        self.topologies.push(topol);
        self.topologies.sort_by_key(|t| t.index);
        self.current_topol =
            selected.and_then(|index| self.topologies.iter().position(|t| t.index == index));
    }

    pub fn select_topol(&mut self, index: u32) -> Result<(), EngineError> {
        let pos = self
            .topologies
            .iter()
            .position(|t| t.index == index)
            .ok_or_else(|| EngineError::TopologyNotFound(format!("index {index}")))?;
        self.current_topol = Some(pos);
        info!("Current topology set - index {}", index);
        Ok(())
    }

    pub fn select_run(&mut self, index: u32) -> Result<(), EngineError> {
        let pos = self
            .runs
            .iter()
            .position(|r| r.index == index)
            .ok_or_else(|| EngineError::RunNotFound(format!("index {index}")))?;
        self.current_run = Some(pos);
        info!("Current run config set - index {}", index);
        Ok(())
    }

    /// Selects the topology whose file has the given file name.
    pub fn select_topol_by_file(&mut self, file_name: &str) -> Result<(), EngineError> {
        let index = self
            .topologies
            .iter()
            .find(|t| file_name_of(&t.file) == Some(file_name))
            .map(|t| t.index)
            .ok_or_else(|| EngineError::TopologyNotFound(format!("file '{file_name}'")))?;
        self.select_topol(index)
    }

    /// Selects the run stage started from `coordinates` with options file `config`.
    pub fn select_run_by_files(&mut self, coordinates: &str, config: &str) -> Result<(), EngineError> {
        let index = self
            .runs
            .iter()
            .find(|r| {
                file_name_of(&r.start_coordinates_file) == Some(coordinates)
                    && file_name_of(&r.config_file) == Some(config)
            })
            .map(|r| r.index)
            .ok_or_else(|| {
                EngineError::RunNotFound(format!(
                    "coordinates '{coordinates}' and config '{config}'"
                ))
            })?;
        self.select_run(index)
    }

    pub fn current_topol(&self) -> Result<&TopolConfig, EngineError> {
        self.current_topol
            .map(|pos| &self.topologies[pos])
            .ok_or(EngineError::NotSelected("topology"))
    }

    pub fn current_topol_mut(&mut self) -> Result<&mut TopolConfig, EngineError> {
        match self.current_topol {
            Some(pos) => Ok(&mut self.topologies[pos]),
            None => Err(EngineError::NotSelected("topology")),
        }
    }

    pub fn current_run(&self) -> Result<&RunConfig, EngineError> {
        self.current_run
            .map(|pos| &self.runs[pos])
            .ok_or(EngineError::NotSelected("run"))
    }

    pub fn current_run_mut(&mut self) -> Result<&mut RunConfig, EngineError> {
        match self.current_run {
            Some(pos) => Ok(&mut self.runs[pos]),
            None => Err(EngineError::NotSelected("run")),
        }
    }

    /// Sorted unique residue names of the current topology's structure.
    pub fn energy_groups(&self) -> Result<Vec<String>, EngineError> {
        let structure = self
            .current_topol()?
            .structure
            .as_ref()
            .ok_or(EngineError::NotLoaded("topology structure"))?;
        Ok(structure.residue_names().into_iter().collect())
    }

    /// The current topology's structure placed at the current run's start coordinates.
    pub fn structure(&self) -> Result<Structure, EngineError> {
        let run = self.current_run()?;
        let structure = self
            .current_topol()?
            .structure
            .as_ref()
            .ok_or(EngineError::NotLoaded("topology structure"))?;
        let coordinates = run
            .start_coordinates
            .clone()
            .ok_or(EngineError::NotLoaded("start coordinates"))?;
        Ok(structure.with_coordinates(coordinates))
    }
}

fn file_name_of(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}
