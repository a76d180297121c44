use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Pipeline, PipelineOutcome};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::steps::{
    MergeTopologies, ReadCoordinates, ReadTopology, SelectRun, SelectTopology, WriteCoordinates,
    WriteParameters,
};
use tracing::{info, instrument};

pub(crate) fn first_run_index(ctx: &MdContext) -> Result<u32, EngineError> {
    ctx.simulation()
        .runs()
        .first()
        .map(|r| r.index)
        .ok_or_else(|| EngineError::RunNotFound("any index".to_string()))
}

/// Reads every configured topology and appends their merge as the last topology.
#[instrument(skip_all, name = "topology_setup")]
pub fn topology_setup(
    ctx: &mut MdContext,
    reporter: &ProgressReporter,
) -> Result<PipelineOutcome, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Topology Setup",
    });
    info!("Starting topology setup.");

    let mut pipeline = Pipeline::new();
    for topol in ctx.simulation().topologies() {
        pipeline.push(SelectTopology::new(topol.index));
        pipeline.push(ReadTopology);
    }
    pipeline.push(MergeTopologies);
    let outcome = pipeline.run(ctx, reporter)?;

    reporter.report(Progress::PhaseFinish);
    Ok(outcome)
}

/// Writes the merged topology's parameters and the first stage's coordinates as
/// `<basename>-0`, which become the inputs of the first stage.
#[instrument(skip_all, name = "topology_save")]
pub fn topology_save(
    ctx: &mut MdContext,
    reporter: &ProgressReporter,
) -> Result<PipelineOutcome, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Topology Save",
    });
    info!("Saving merged topology.");

    let outcome = Pipeline::new()
        .then(SelectTopology::last())
        .then(SelectRun::new(first_run_index(ctx)?))
        .then(ReadCoordinates)
        .then(WriteParameters)
        .then(WriteCoordinates::new(0))
        .run(ctx, reporter)?;

    reporter.report(Progress::PhaseFinish);
    Ok(outcome)
}

/// Like [`topology_save`], but every stage starts from its own configured coordinates,
/// written as `<basename>-<stage index>`.
#[instrument(skip_all, name = "topology_save_per_stage")]
pub fn topology_save_per_stage(
    ctx: &mut MdContext,
    reporter: &ProgressReporter,
) -> Result<PipelineOutcome, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Topology Save",
    });
    info!("Saving merged topology with per-stage coordinates.");

    let first = first_run_index(ctx)?;
    let mut pipeline = Pipeline::new().then(SelectTopology::last());
    for run in ctx.simulation().runs() {
        pipeline.push(SelectRun::new(run.index));
        pipeline.push(ReadCoordinates);
        pipeline.push(WriteCoordinates::new(run.index));
    }
    pipeline.push(SelectRun::new(first));
    pipeline.push(WriteParameters);
    let outcome = pipeline.run(ctx, reporter)?;

    reporter.report(Progress::PhaseFinish);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Software;
    use crate::testing::{FakeStructureIo, campaign, local_context};
    use tempfile::tempdir;

    #[test]
    fn setup_then_save_stages_the_first_inputs() {
        let dir = tempdir().unwrap();
        let mut ctx = local_context(dir.path(), Software::Gromacs);
        let reporter = ProgressReporter::new();

        let setup = topology_setup(&mut ctx, &reporter).unwrap();
        assert_eq!(setup, PipelineOutcome::Completed { executed: 3 });
        topology_save(&mut ctx, &reporter).unwrap();

        let data = dir.path().join("demo");
        let merged = ctx.current_topol().unwrap();
        assert_eq!(merged.index, 2);
        assert_eq!(merged.file, data.join("demo.top"));
        assert_eq!(ctx.current_run().unwrap().index, 1);
        assert_eq!(
            ctx.current_run().unwrap().start_coordinates_file,
            data.join("demo-0.gro")
        );
        assert!(data.join("demo.top").is_file());
        assert!(data.join("demo-0.gro").is_file());
    }

    #[test]
    fn per_stage_save_writes_coordinates_for_every_stage() {
        let dir = tempdir().unwrap();
        let mut config = campaign(dir.path(), Software::Amber);
        std::fs::write(dir.path().join("eq.rst7"), "coordinates").unwrap();
        config.runs[1].start_coordinates_file = "eq.rst7".into();
        let mut ctx = MdContext::builder(config)
            .structure_io(Box::new(FakeStructureIo))
            .build()
            .unwrap();
        let reporter = ProgressReporter::new();

        topology_setup(&mut ctx, &reporter).unwrap();
        topology_save_per_stage(&mut ctx, &reporter).unwrap();

        let data = dir.path().join("demo");
        let runs = ctx.simulation().runs();
        assert_eq!(runs[0].start_coordinates_file, data.join("demo-1.rst7"));
        assert_eq!(runs[1].start_coordinates_file, data.join("demo-2.rst7"));
        assert!(data.join("demo.parm7").is_file());
        assert_eq!(ctx.current_run().unwrap().index, 1);
    }
}
