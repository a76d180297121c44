use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    name = "mdflow",
    author = "mdflow contributors",
    version,
    about = "mdflow CLI - Prepare, submit and follow molecular-dynamics simulation campaigns on Slurm clusters.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Site profile (TOML) with cluster-specific executables, module lines and timings.
    #[arg(long, global = true, value_name = "PATH")]
    pub site: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read and merge the configured topologies, then write the first stage's inputs.
    Prepare(PrepareArgs),
    /// Prepare inputs, generate run scripts and submit them when a SLURM section is present.
    Run(RunArgs),
    /// Regenerate run scripts for every simulation the ledger lists as unfinished.
    Rerun(RunArgs),
    /// Upload the generated inputs and submit the batch script.
    Submit(CampaignArgs),
    /// Follow a submitted job until it leaves the queue.
    Watch(WatchArgs),
    /// Compare local engine logs with the ledger and update completion states.
    Check(CampaignArgs),
    /// Download engine logs, or the archives of finished simulations.
    Download(DownloadArgs),
    /// Show the ledger rows of the campaign.
    Status(CampaignArgs),
}

/// Arguments shared by every subcommand.
#[derive(Args, Debug)]
pub struct CampaignArgs {
    /// Path to the campaign configuration file.
    #[arg(required = true, value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override the Slurm wall time (e.g. 48:00:00) from the config file.
    #[arg(long, value_name = "HH:MM:SS")]
    pub time: Option<String>,
}

/// Arguments for the `prepare` subcommand.
#[derive(Args, Debug)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub campaign: CampaignArgs,

    /// Write start coordinates for every stage instead of only the first one.
    #[arg(long)]
    pub per_stage: bool,
}

/// Arguments for the `run` and `rerun` subcommands.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub prepare: PrepareArgs,

    /// Only generate the scripts, even when a SLURM section is present.
    #[arg(long)]
    pub no_submit: bool,
}

/// Arguments for the `watch` subcommand.
#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub campaign: CampaignArgs,

    /// Seconds between two status queries. Defaults to the site profile's interval.
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Download the archives of finished simulations once the job ends.
    #[arg(long)]
    pub fetch_results: bool,
}

/// Arguments for the `download` subcommand.
#[derive(Args, Debug)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub campaign: CampaignArgs,

    /// Fetch only the engine logs instead of the finished simulation archives.
    #[arg(long)]
    pub logs_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "mdflow", "watch", "campaign.cfg", "-vv", "--site", "site.toml", "--interval", "60",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.site, Some(PathBuf::from("site.toml")));
        match cli.command {
            Commands::Watch(args) => {
                assert_eq!(args.campaign.config, PathBuf::from("campaign.cfg"));
                assert_eq!(args.interval, Some(60));
                assert!(!args.fetch_results);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["mdflow", "status", "campaign.cfg", "-q", "-v"]);
        assert!(result.is_err());
    }

    #[test]
    fn run_flags_are_flattened() {
        let cli = Cli::try_parse_from([
            "mdflow", "run", "campaign.cfg", "--per-stage", "--no-submit", "--time", "48:00:00",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert!(args.no_submit);
        assert!(args.prepare.per_stage);
        assert_eq!(args.prepare.campaign.time.as_deref(), Some("48:00:00"));
    }

    #[test]
    fn config_path_is_required() {
        assert!(Cli::try_parse_from(["mdflow", "check"]).is_err());
    }
}
