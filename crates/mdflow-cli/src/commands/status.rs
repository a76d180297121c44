use super::load_context;
use crate::cli::CampaignArgs;
use crate::error::Result;
use mdflow::core::ledger::LedgerRecord;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Tabled)]
struct LedgerTableRow {
    #[tabled(rename = "Index")]
    index: u64,
    #[tabled(rename = "Simulation")]
    simulation: String,
    #[tabled(rename = "Topology")]
    topology: String,
    #[tabled(rename = "Coordinates")]
    coordinates: String,
    #[tabled(rename = "Config")]
    config: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Job ID")]
    job_id: String,
}

impl From<&(u64, LedgerRecord)> for LedgerTableRow {
    fn from((index, record): &(u64, LedgerRecord)) -> Self {
        Self {
            index: *index,
            simulation: record.simulation_name.clone(),
            topology: record.topology_file.clone(),
            coordinates: record.coordinate_file.clone(),
            config: record.config_file.clone(),
            stage: record.stage.to_string(),
            job_id: record.job_id.map(|id| id.to_string()).unwrap_or_default(),
        }
    }
}

fn render(entries: &[(u64, LedgerRecord)]) -> String {
    let rows: Vec<LedgerTableRow> = entries.iter().map(LedgerTableRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn run(args: CampaignArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args, site)?;
    let entries = ctx.project_entries()?;
    let project = ctx.environment().project_name();

    if entries.is_empty() {
        println!("No simulations recorded for project '{}'.", project);
        return Ok(());
    }

    println!("Ledger for project '{}'", project);
    println!("{}", render(&entries));
    println!("Total: {} simulation(s)", entries.len());
    Ok(())
}
