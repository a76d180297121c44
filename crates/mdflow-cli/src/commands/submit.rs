use super::{load_context, progress_reporter};
use crate::cli::CampaignArgs;
use crate::error::Result;
use mdflow::workflows::remote;
use std::path::Path;
use tracing::info;

pub fn run(args: CampaignArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args, site)?;
    ctx.require_slurm()?;
    let reporter = progress_reporter();

    info!("Invoking the submission workflow...");
    let job_id = remote::submit(&mut ctx, &reporter)?;

    println!("✓ Submitted batch job {}", job_id);
    Ok(())
}
