use super::{load_context, progress_reporter};
use crate::cli::CampaignArgs;
use crate::error::Result;
use mdflow::core::ledger::Stage;
use mdflow::workflows::run::check_runs;
use std::path::Path;
use tracing::info;

pub fn run(args: CampaignArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args, site)?;
    let reporter = progress_reporter();

    info!("Checking engine logs against the ledger...");
    let rows = check_runs(&mut ctx, &reporter)?;
    if rows.is_empty() {
        println!("No simulations recorded for project '{}'.", ctx.environment().project_name());
        return Ok(());
    }

    for (index, record) in &rows {
        println!("  [{}] {:<24} {}", index, record.simulation_name, record.stage);
    }
    let unfinished = rows
        .iter()
        .filter(|(_, r)| r.stage == Stage::Unfinished)
        .count();
    println!(
        "{} simulation(s) in the ledger; {} still unfinished.",
        rows.len(),
        unfinished
    );
    Ok(())
}
