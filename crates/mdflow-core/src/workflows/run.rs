use super::setup::first_run_index;
use crate::core::config::Software;
use crate::core::ledger::{Column, LedgerError, LedgerRecord};
use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Pipeline, PipelineOutcome};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::steps::scripts::MD_RUN;
use crate::engine::steps::{
    CheckProgress, FindRunConfig, FindTopolConfig, PrepareMdOptions, RunMd, RunSlurm, SelectRun,
    SelectTopology,
};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Generates `md.run` (and `md.slurm` when connected) for every stage and repetition,
/// recording each simulation in the ledger. A previous `md.run` is kept as a backup.
#[instrument(skip_all, name = "run_workflow")]
pub fn run(ctx: &mut MdContext, reporter: &ProgressReporter) -> Result<PipelineOutcome, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Run Scripts",
    });
    info!("Generating run scripts.");

    first_run_index(ctx)?;
    let env = ctx.environment();
    env.make_duplicate(&env.data_dir().join(MD_RUN))?;

    let mut pipeline = Pipeline::new().then(SelectTopology::last());
    for run in ctx.simulation().runs() {
        pipeline.push(SelectRun::new(run.index));
        pipeline.push(PrepareMdOptions);
        for number in 0..run.nruns {
            pipeline.push(RunMd::new(number));
        }
    }
    if ctx.is_connected() {
        pipeline.push(RunSlurm);
    }
    let outcome = pipeline.run(ctx, reporter)?;

    reporter.report(Progress::PhaseFinish);
    Ok(outcome)
}

fn repetition_number(record: &LedgerRecord) -> Result<u32, LedgerError> {
    record
        .simulation_name
        .split('-')
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| LedgerError::InvalidValue {
            column: Column::SimulationName.header(),
            value: record.simulation_name.clone(),
        })
}

/// Regenerates run blocks for the project's `Unfinished` simulations without adding
/// ledger rows. Returns `None` when every simulation has finished.
///
/// Topologies and stages are matched by the file names stored in the ledger, so the
/// context must have been through [`topology_setup`](super::setup::topology_setup) and
/// [`topology_save`](super::setup::topology_save) first.
#[instrument(skip_all, name = "rerun_workflow")]
pub fn rerun(
    ctx: &mut MdContext,
    reporter: &ProgressReporter,
) -> Result<Option<PipelineOutcome>, EngineError> {
    let unfinished = ctx.find_unfinished()?;
    if unfinished.is_empty() {
        info!("All simulations have finished.");
        return Ok(None);
    }

    reporter.report(Progress::PhaseStart { name: "Rerun" });
    info!("Regenerating {} unfinished simulation(s).", unfinished.len());
    let env = ctx.environment();
    env.make_duplicate(&env.data_dir().join(MD_RUN))?;

    let mut prepared = HashSet::new();
    let mut pipeline = Pipeline::new();
    for (index, record) in &unfinished {
        debug!("Rerunning {} (index {})", record.simulation_name, index);
        pipeline.push(FindRunConfig::new(
            record.coordinate_file.as_str(),
            record.config_file.as_str(),
        ));
        pipeline.push(FindTopolConfig::new(record.topology_file.as_str()));
        if prepared.insert(record.config_file.clone()) {
            pipeline.push(PrepareMdOptions);
        }
        pipeline.push(RunMd::rerun(repetition_number(record)?));
    }
    if ctx.is_connected() {
        pipeline.push(RunSlurm);
    }
    let outcome = pipeline.run(ctx, reporter)?;

    reporter.report(Progress::PhaseFinish);
    Ok(Some(outcome))
}

/// Checks every engine log in the data directory against the ledger and returns the
/// project's rows afterwards.
#[instrument(skip_all, name = "check_runs")]
pub fn check_runs(
    ctx: &mut MdContext,
    reporter: &ProgressReporter,
) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
    let data_dir = ctx.environment().data_dir();
    let entries = std::fs::read_dir(data_dir).map_err(EngineError::io(data_dir))?;
    let mut logs = Vec::new();
    for entry in entries {
        let path: PathBuf = entry.map_err(EngineError::io(data_dir))?.path();
        let is_log = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Software::from_log_extension)
            .is_some();
        if is_log && path.is_file() {
            logs.push(path);
        }
    }
    logs.sort();
    debug!("Found logs: {:?}", logs);

    let mut pipeline = Pipeline::new();
    for log in logs {
        pipeline.push(CheckProgress::new(log));
    }
    pipeline.run(ctx, reporter)?;

    let rows = ctx.project_entries()?;
    for (index, record) in &rows {
        debug!("{} {} {}", index, record.simulation_name, record.stage);
    }
    Ok(rows)
}
