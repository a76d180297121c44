use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Flow, Step};
use std::path::PathBuf;
use tracing::{debug, info};

/// Reads the current topology's file and replicates it `number` times.
pub struct ReadTopology;

impl Step<MdContext> for ReadTopology {
    fn name(&self) -> &str {
        "ReadTopology"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let topol = ctx.current_topol()?;
        let (file, number) = (topol.file.clone(), topol.number);

        info!("Reading topology {:?} ({} copies)", file, number);
        let structure = ctx.structure_io().read_topology(&file)?.replicate(number);
        debug!("Topology has {} atoms", structure.atom_count());

        ctx.current_topol_mut()?.structure = Some(structure);
        Ok(Flow::Continue)
    }
}

/// Loads the current run's start coordinates and box.
///
/// Relative start files are looked up like any other input, so later stages can be
/// given their own starting coordinates.
pub struct ReadCoordinates;

impl Step<MdContext> for ReadCoordinates {
    fn name(&self) -> &str {
        "ReadCoordinates"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let file = ctx
            .environment()
            .make_absolute(&ctx.current_run()?.start_coordinates_file)?;

        info!("Reading coordinates {:?}", file);
        let coordinates = ctx.structure_io().read_coordinates(&file)?;
        debug!(
            "Read {} positions, box: {:?}",
            coordinates.positions.len(),
            coordinates.cell
        );

        ctx.current_run_mut()?.start_coordinates = Some(coordinates);
        Ok(Flow::Continue)
    }
}

/// Writes `<data dir>/<basename>.<topology ext>` and makes it the current topology's file.
pub struct WriteParameters;

impl Step<MdContext> for WriteParameters {
    fn name(&self) -> &str {
        "WriteParameters"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let env = ctx.environment();
        let path = env.data_dir().join(format!(
            "{}.{}",
            env.basename(),
            env.software().topology_extension()
        ));
        let structure = ctx.structure()?;

        env.make_duplicate(&path)?;
        ctx.structure_io().write_parameters(&structure, &path)?;
        info!("Parameters written to {:?}", path);

        ctx.current_topol_mut()?.file = path;
        Ok(Flow::Continue)
    }
}

/// Writes `<data dir>/<basename>-<index>.<coordinates ext>` and makes it the current
/// run's start file.
pub struct WriteCoordinates {
    index: u32,
    name: String,
}

impl WriteCoordinates {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            name: format!("WriteCoordinates({index})"),
        }
    }

    fn target(&self, ctx: &MdContext) -> PathBuf {
        let env = ctx.environment();
        env.data_dir().join(format!(
            "{}-{}.{}",
            env.basename(),
            self.index,
            env.software().coordinates_extension()
        ))
    }
}

impl Step<MdContext> for WriteCoordinates {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let path = self.target(ctx);
        let structure = ctx.structure()?;

        ctx.environment().make_duplicate(&path)?;
        ctx.structure_io().write_coordinates(&structure, &path)?;
        info!("Coordinates written to {:?}", path);

        ctx.current_run_mut()?.start_coordinates_file = path;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Software;
    use crate::testing::local_context;
    use tempfile::tempdir;

    #[test]
    fn read_topology_replicates_the_structure() {
        let dir = tempdir().unwrap();
        let mut ctx = local_context(dir.path(), Software::Gromacs);
        ctx.simulation_mut().select_topol(1).unwrap();
        ctx.current_topol_mut().unwrap().number = 3;

        ReadTopology.run(&mut ctx).unwrap();

        let structure = ctx.current_topol().unwrap().structure.clone().unwrap();
        assert_eq!(structure.residues.len(), 3);
        assert_eq!(ctx.energy_groups().unwrap(), vec!["LIG"]);
    }

    #[test]
    fn writing_needs_loaded_coordinates() {
        let dir = tempdir().unwrap();
        let mut ctx = local_context(dir.path(), Software::Amber);
        ctx.simulation_mut().select_topol(1).unwrap();
        ctx.simulation_mut().select_run(1).unwrap();
        ReadTopology.run(&mut ctx).unwrap();

        assert!(matches!(
            WriteParameters.run(&mut ctx),
            Err(EngineError::NotLoaded("start coordinates"))
        ));
    }

    #[test]
    fn written_files_become_the_current_inputs() {
        let dir = tempdir().unwrap();
        let mut ctx = local_context(dir.path(), Software::Amber);
        ctx.simulation_mut().select_topol(1).unwrap();
        ctx.simulation_mut().select_run(1).unwrap();
        ReadTopology.run(&mut ctx).unwrap();
        ReadCoordinates.run(&mut ctx).unwrap();

        WriteParameters.run(&mut ctx).unwrap();
        WriteCoordinates::new(0).run(&mut ctx).unwrap();
        WriteCoordinates::new(0).run(&mut ctx).unwrap();

        let data = dir.path().join("demo");
        assert_eq!(ctx.current_topol().unwrap().file, data.join("demo.parm7"));
        assert_eq!(
            ctx.current_run().unwrap().start_coordinates_file,
            data.join("demo-0.rst7")
        );
        assert!(data.join("demo.parm7").is_file());
        assert!(data.join("demo-0.rst7.bck1").is_file());
    }
}
