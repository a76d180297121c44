pub mod check;
pub mod download;
pub mod prepare;
pub mod run;
pub mod status;
pub mod submit;
pub mod watch;

use crate::cli::CampaignArgs;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use mdflow::core::config::CampaignConfig;
use mdflow::core::site::SiteProfile;
use mdflow::engine::context::MdContext;
use mdflow::engine::pipeline::PipelineOutcome;
use mdflow::engine::progress::ProgressReporter;
use std::path::Path;
use tracing::{debug, info};

/// Applies command-line overrides on top of the campaign file.
fn apply_overrides(config: &mut CampaignConfig, args: &CampaignArgs) -> Result<()> {
    if let Some(time) = &args.time {
        let slurm = config.slurm.as_mut().ok_or_else(|| {
            CliError::Argument("--time requires a SLURM section in the campaign file".to_string())
        })?;
        info!("Overriding Slurm wall time {} with {}", slurm.time, time);
        slurm.time = time.clone();
    }
    Ok(())
}

pub(crate) fn load_context(args: &CampaignArgs, site: Option<&Path>) -> Result<MdContext> {
    info!("Loading campaign configuration from {:?}", &args.config);
    let mut config = CampaignConfig::load(&args.config)?;
    apply_overrides(&mut config, args)?;

    let site = SiteProfile::load_or_default(site)?;
    debug!("Site profile: {:?}", site);

    Ok(MdContext::builder(config).site(site).build()?)
}

pub(crate) fn progress_reporter() -> ProgressReporter<'static> {
    let handler = CliProgressHandler::new();
    ProgressReporter::with_callback(handler.get_callback())
}

/// Turns a halted pipeline into an error naming the routine and the halting step.
pub(crate) fn ensure_completed(routine: &str, outcome: PipelineOutcome) -> Result<()> {
    match outcome {
        PipelineOutcome::Completed { executed } => {
            debug!("{} completed after {} step(s)", routine, executed);
            Ok(())
        }
        PipelineOutcome::Halted { at, step } => Err(CliError::Other(anyhow::anyhow!(
            "{} stopped at step {} ('{}')",
            routine,
            at,
            step
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const LOCAL: &str = r#"
{ ENVIRONMENT
  SOFTWARE = gromacs
  BASENAME = demo
  PROJECT_NAME = demo
  RESOURCE = gpu
  CPUS_PER_TASK = 8
}
{ DATABASE
  DATABASE_PATH = ledger.csv
}
{ TOPOL1
  NAME = ligand
  FF = gaff2
  NUMBER = 1
  FILE = lig.top
}
{ RUNMD1
  SIM_TYPE = min
  NRUNS = 1
  CONFIG_FILE = min.mdp
  START_COORDINATES_FILE = lig.gro
}
"#;

    const SLURM: &str = r#"
{ SLURM
  REMOTE_ADDRESS = user@cluster
  REMOTE_DIR = /home/user/MD
  STORAGE_DIR = /lustre/user
  DOWNLOAD_DIR = downloads
  NODES = 1
  NTASKS = 8
  MEMORY = 4GB
  TIME = 24:00:00
  ACCOUNT = grant42
  PARTITION = tesla
}
"#;

    fn args(time: Option<&str>) -> CampaignArgs {
        CampaignArgs {
            config: PathBuf::from("campaign.cfg"),
            time: time.map(str::to_string),
        }
    }

    #[test]
    fn wall_time_override_replaces_the_configured_time() {
        let mut config: CampaignConfig = format!("{LOCAL}{SLURM}").parse().unwrap();

        apply_overrides(&mut config, &args(Some("48:00:00"))).unwrap();

        assert_eq!(config.slurm.unwrap().time, "48:00:00");
    }

    #[test]
    fn wall_time_override_needs_a_slurm_section() {
        let mut config: CampaignConfig = LOCAL.parse().unwrap();

        let result = apply_overrides(&mut config, &args(Some("48:00:00")));

        assert!(matches!(result, Err(CliError::Argument(_))));
    }

    #[test]
    fn no_overrides_leave_the_config_untouched() {
        let mut config: CampaignConfig = format!("{LOCAL}{SLURM}").parse().unwrap();

        apply_overrides(&mut config, &args(None)).unwrap();

        assert_eq!(config.slurm.unwrap().time, "24:00:00");
    }

    #[test]
    fn local_campaign_loads_into_a_context() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("campaign.cfg");
        let text = LOCAL.replace(
            "{ ENVIRONMENT\n",
            &format!("{{ ENVIRONMENT\n  ROOT = {}\n", dir.path().display()),
        );
        std::fs::write(&config_path, text).unwrap();
        for name in ["lig.top", "lig.gro", "min.mdp"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }

        let ctx = load_context(
            &CampaignArgs {
                config: config_path,
                time: None,
            },
            None,
        )
        .unwrap();

        assert!(!ctx.is_connected());
        assert_eq!(ctx.environment().project_name(), "demo");
    }

    #[test]
    fn missing_campaign_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_context(
            &CampaignArgs {
                config: dir.path().join("absent.cfg"),
                time: None,
            },
            None,
        );
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn halted_pipelines_become_errors() {
        assert!(ensure_completed("run", PipelineOutcome::Completed { executed: 3 }).is_ok());

        let err = ensure_completed(
            "run",
            PipelineOutcome::Halted {
                at: 1,
                step: "select-topology".to_string(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("select-topology"));
    }
}
