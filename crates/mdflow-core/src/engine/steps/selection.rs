use crate::core::config::TopolConfig;
use crate::core::structure::Structure;
use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Flow, Step};
use tracing::{debug, info};

/// Makes a topology current, either by index or the highest-indexed one at run time.
pub struct SelectTopology {
    index: Option<u32>,
    name: String,
}

impl SelectTopology {
    pub fn new(index: u32) -> Self {
        Self {
            index: Some(index),
            name: format!("SelectTopology({index})"),
        }
    }

    /// Resolved when the step runs, so a topology merged earlier in the pipeline is seen.
    pub fn last() -> Self {
        Self {
            index: None,
            name: "SelectTopology(last)".to_string(),
        }
    }
}

impl Step<MdContext> for SelectTopology {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let index = match self.index {
            Some(index) => index,
            None => ctx
                .simulation()
                .topologies()
                .last()
                .map(|t| t.index)
                .ok_or_else(|| EngineError::TopologyNotFound("any index".to_string()))?,
        };
        ctx.simulation_mut().select_topol(index)?;
        Ok(Flow::Continue)
    }
}

pub struct SelectRun {
    index: u32,
    name: String,
}

impl SelectRun {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("SelectRun({index})"),
        }
    }
}

impl Step<MdContext> for SelectRun {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        ctx.simulation_mut().select_run(self.index)?;
        Ok(Flow::Continue)
    }
}

/// Selects the run stage recorded in a ledger row, matched on file names.
pub struct FindRunConfig {
    coordinates_file: String,
    config_file: String,
}

impl FindRunConfig {
    pub fn new(coordinates_file: impl Into<String>, config_file: impl Into<String>) -> Self {
        Self {
            coordinates_file: coordinates_file.into(),
            config_file: config_file.into(),
        }
    }
}

impl Step<MdContext> for FindRunConfig {
    fn name(&self) -> &str {
        "FindRunConfig"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        ctx.simulation_mut()
            .select_run_by_files(&self.coordinates_file, &self.config_file)?;
        Ok(Flow::Continue)
    }
}

pub struct FindTopolConfig {
    topology_file: String,
}

impl FindTopolConfig {
    pub fn new(topology_file: impl Into<String>) -> Self {
        Self {
            topology_file: topology_file.into(),
        }
    }
}

impl Step<MdContext> for FindTopolConfig {
    fn name(&self) -> &str {
        "FindTopolConfig"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        ctx.simulation_mut()
            .select_topol_by_file(&self.topology_file)?;
        Ok(Flow::Continue)
    }
}

/// Appends one topology aggregating every configured topology.
///
/// The aggregate takes the next free index, joins names and force fields with `" | "`,
/// sums the replication counts and points at `<data dir>/<basename>.<topology ext>`.
/// Its structure is the merge of every topology that has been read.
pub struct MergeTopologies;

impl Step<MdContext> for MergeTopologies {
    fn name(&self) -> &str {
        "MergeTopologies"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let topologies = ctx.simulation().topologies();
        let index = topologies
            .iter()
            .map(|t| t.index)
            .max()
            .ok_or_else(|| EngineError::TopologyNotFound("any index".to_string()))?
            + 1;

        let name = topologies.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(" | ");
        let ff = topologies.iter().map(|t| t.ff.as_str()).collect::<Vec<_>>().join(" | ");
        let number = topologies.iter().map(|t| t.number).sum();

        let loaded: Vec<&Structure> = topologies
            .iter()
            .filter_map(|t| t.structure.as_ref())
            .collect();
        let structure = (!loaded.is_empty()).then(|| Structure::merge(loaded));

        let env = ctx.environment();
        let file = env.data_dir().join(format!(
            "{}.{}",
            env.basename(),
            env.software().topology_extension()
        ));

        info!("Merged {} topologies into '{}' (index {})", topologies.len(), name, index);
        let merged = TopolConfig {
            index,
            name,
            ff,
            number,
            file,
            structure,
        };
        debug!("Merged topology: {:?}", merged);
        ctx.simulation_mut().push_topology(merged);
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Software;
    use crate::core::structure::{Component, Residue};
    use crate::engine::pipeline::Pipeline;
    use crate::engine::progress::ProgressReporter;
    use crate::testing::{campaign, local_context};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn ligand(name: &str) -> Structure {
        Structure {
            residues: vec![Residue {
                name: name.to_string(),
                atoms: vec!["C1".into()],
            }],
            components: vec![Component {
                name: name.to_string(),
                source: PathBuf::from(name),
                copies: 1,
            }],
            coordinates: None,
        }
    }

    #[test]
    fn merge_aggregates_every_topology() {
        let dir = tempdir().unwrap();
        let mut config = campaign(dir.path(), Software::Gromacs);
        std::fs::write(dir.path().join("sol.top"), "topology").unwrap();
        config.topologies.push(TopolConfig {
            index: 2,
            name: "water".into(),
            ff: "tip3p".into(),
            number: 500,
            file: PathBuf::from("sol.top"),
            structure: None,
        });
        let mut ctx = MdContext::builder(config).build().unwrap();
        ctx.simulation_mut().select_topol(1).unwrap();
        ctx.current_topol_mut().unwrap().structure = Some(ligand("LIG"));
        ctx.simulation_mut().select_topol(2).unwrap();
        ctx.current_topol_mut().unwrap().structure = Some(ligand("SOL"));

        Pipeline::new()
            .then(MergeTopologies)
            .then(SelectTopology::last())
            .run(&mut ctx, &ProgressReporter::new())
            .unwrap();

        let merged = ctx.current_topol().unwrap();
        assert_eq!(merged.index, 3);
        assert_eq!(merged.name, "ligand | water");
        assert_eq!(merged.ff, "gaff2 | tip3p");
        assert_eq!(merged.number, 501);
        assert_eq!(merged.file, dir.path().join("demo").join("demo.top"));
        assert_eq!(ctx.energy_groups().unwrap(), vec!["LIG", "SOL"]);
    }

    #[test]
    fn merge_without_loaded_structures_leaves_structure_empty() {
        let dir = tempdir().unwrap();
        let mut ctx = local_context(dir.path(), Software::Amber);

        MergeTopologies.run(&mut ctx).unwrap();

        let merged = ctx.simulation().topologies().last().unwrap();
        assert_eq!(merged.index, 2);
        assert!(merged.structure.is_none());
    }

    #[test]
    fn find_steps_select_by_file_name() {
        let dir = tempdir().unwrap();
        let mut ctx = local_context(dir.path(), Software::Amber);

        FindTopolConfig::new("lig.parm7").run(&mut ctx).unwrap();
        FindRunConfig::new("0-min.rst7", "nvt.in").run(&mut ctx).unwrap();

        assert_eq!(ctx.current_topol().unwrap().index, 1);
        assert_eq!(ctx.current_run().unwrap().sim_type, "nvt");
        assert!(matches!(
            SelectRun::new(9).run(&mut ctx),
            Err(EngineError::RunNotFound(_))
        ));
    }
}
