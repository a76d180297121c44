use super::{ensure_completed, load_context, progress_reporter};
use crate::cli::PrepareArgs;
use crate::error::Result;
use mdflow::engine::context::MdContext;
use mdflow::engine::progress::ProgressReporter;
use mdflow::workflows::setup;
use std::path::Path;
use tracing::info;

/// Reads and merges every topology, then writes the merged parameters and start coordinates.
pub(crate) fn prepare(ctx: &mut MdContext, per_stage: bool, reporter: &ProgressReporter) -> Result<()> {
    ensure_completed("topology setup", setup::topology_setup(ctx, reporter)?)?;
    let outcome = if per_stage {
        setup::topology_save_per_stage(ctx, reporter)?
    } else {
        setup::topology_save(ctx, reporter)?
    };
    ensure_completed("topology save", outcome)
}

pub fn run(args: PrepareArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args.campaign, site)?;
    let reporter = progress_reporter();

    info!("Invoking the topology setup and save workflows...");
    prepare(&mut ctx, args.per_stage, &reporter)?;

    println!(
        "Inputs for project '{}' written to: {}",
        ctx.environment().project_name(),
        ctx.environment().data_dir().display()
    );
    Ok(())
}
