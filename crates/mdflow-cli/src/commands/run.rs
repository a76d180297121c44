use super::prepare::prepare;
use super::{ensure_completed, load_context, progress_reporter};
use crate::cli::RunArgs;
use crate::error::Result;
use mdflow::engine::context::MdContext;
use mdflow::engine::progress::ProgressReporter;
use mdflow::workflows::{remote, run as run_workflow};
use std::path::Path;
use tracing::info;

fn submit_if_connected(ctx: &mut MdContext, no_submit: bool, reporter: &ProgressReporter) -> Result<()> {
    if !ctx.is_connected() {
        println!("No SLURM section configured; run the generated md.run locally.");
        return Ok(());
    }
    if no_submit {
        info!("Submission skipped on request.");
        println!("Scripts generated; submission skipped (--no-submit).");
        return Ok(());
    }
    let job_id = remote::submit(ctx, reporter)?;
    println!("✓ Submitted batch job {}", job_id);
    Ok(())
}

pub fn run(args: RunArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args.prepare.campaign, site)?;
    let reporter = progress_reporter();

    prepare(&mut ctx, args.prepare.per_stage, &reporter)?;

    info!("Invoking the run-script workflow...");
    ensure_completed("run", run_workflow::run(&mut ctx, &reporter)?)?;
    println!(
        "Run scripts written to: {}",
        ctx.environment().data_dir().display()
    );

    submit_if_connected(&mut ctx, args.no_submit, &reporter)
}

pub fn rerun(args: RunArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args.prepare.campaign, site)?;
    let reporter = progress_reporter();

    prepare(&mut ctx, args.prepare.per_stage, &reporter)?;

    info!("Invoking the rerun workflow...");
    match run_workflow::rerun(&mut ctx, &reporter)? {
        Some(outcome) => ensure_completed("rerun", outcome)?,
        None => {
            println!("All simulations have finished; nothing to rerun.");
            return Ok(());
        }
    }
    println!(
        "Run scripts for unfinished simulations written to: {}",
        ctx.environment().data_dir().display()
    );

    submit_if_connected(&mut ctx, args.no_submit, &reporter)
}
