use super::{load_context, progress_reporter};
use crate::cli::WatchArgs;
use crate::error::Result;
use mdflow::workflows::watch::{self, CancelToken, ThreadSleeper, WatchOptions, WatchOutcome};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

fn watch_options(args: &WatchArgs, defaults: WatchOptions) -> WatchOptions {
    WatchOptions {
        interval: args.interval.map(Duration::from_secs).unwrap_or(defaults.interval),
        fetch_results: args.fetch_results,
        ..defaults
    }
}

pub fn run(args: WatchArgs, site: Option<&Path>) -> Result<()> {
    let mut ctx = load_context(&args.campaign, site)?;
    ctx.require_slurm()?;

    let options = watch_options(&args, WatchOptions::from_site(ctx.site()));
    debug!("Watch options: {:?}", options);

    let cancel = CancelToken::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())?;
    }
    let mut sleeper = ThreadSleeper::default();
    let reporter = progress_reporter();

    info!(
        "Polling every {}s; press Ctrl-C to stop watching.",
        options.interval.as_secs()
    );
    match watch::watch(&mut ctx, &options, &mut sleeper, &cancel, &reporter)? {
        WatchOutcome::Finished {
            job_id,
            state,
            polls,
        } => {
            println!(
                "Job {} ended with state {} after {} status check(s).",
                job_id, state, polls
            );
        }
        WatchOutcome::Cancelled { job_id, polls } => {
            println!(
                "Stopped watching job {} after {} status check(s); the job itself keeps running.",
                job_id, polls
            );
        }
    }
    Ok(())
}
