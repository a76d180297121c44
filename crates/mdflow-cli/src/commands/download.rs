use super::load_context;
use crate::cli::DownloadArgs;
use crate::error::Result;
use mdflow::workflows::remote;
use std::path::Path;
use tracing::info;

pub fn run(args: DownloadArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args.campaign, site)?;
    let slurm = ctx.require_slurm()?;
    let download_dir = slurm.config().download_dir.clone();

    if args.logs_only {
        info!("Invoking the log download workflow...");
        remote::download_logs(&ctx)?;
        println!(
            "Logs copied into: {}",
            ctx.environment().data_dir().display()
        );
        return Ok(());
    }

    info!("Invoking the archive download workflow...");
    let downloaded = remote::download_finished(&mut ctx)?;
    if downloaded.is_empty() {
        println!("No finished simulations are waiting for download.");
    } else {
        for record in &downloaded {
            println!("  ✓ {}", record.simulation_name);
        }
        println!(
            "Downloaded {} simulation(s) into: {}",
            downloaded.len(),
            download_dir.display()
        );
    }
    Ok(())
}
