use super::remote::{download_finished, download_logs, find_job_id};
use super::run::check_runs;
use crate::core::remote::{JobState, RemoteError, parse_sacct};
use crate::core::site::SiteProfile;
use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use chrono::Local;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Shared stop request for the polling loop, settable from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying flag, for registration with a signal handler.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Waits between polls. Implementations return early once `cancel` is set.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration, cancel: &CancelToken);
}

/// Blocks the current thread in slices, checking for cancellation between them.
#[derive(Debug, Clone)]
pub struct ThreadSleeper {
    slice: Duration,
}

impl ThreadSleeper {
    pub fn new(slice: Duration) -> Self {
        Self { slice }
    }
}

impl Default for ThreadSleeper {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration, cancel: &CancelToken) {
        let deadline = Instant::now() + duration;
        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.slice.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Attempts per status query before giving up.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Download the archives of finished simulations once the job ends.
    pub fetch_results: bool,
}

impl WatchOptions {
    pub fn from_site(site: &SiteProfile) -> Self {
        Self {
            interval: Duration::from_secs(site.poll_interval_secs),
            retries: site.transport_retries,
            retry_delay: Duration::from_secs(site.retry_delay_secs),
            fetch_results: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The job reached a terminal state.
    Finished {
        job_id: u64,
        state: JobState,
        polls: u32,
    },
    Cancelled { job_id: u64, polls: u32 },
}

/// Queries `sacct` for the job's state, retrying failed queries. `None` means the
/// wait between attempts was cancelled.
fn poll_state(
    ctx: &MdContext,
    job_id: u64,
    options: &WatchOptions,
    sleeper: &mut dyn Sleeper,
    cancel: &CancelToken,
) -> Result<Option<JobState>, EngineError> {
    let command = format!("{} --jobs={} -p -b", ctx.site().sacct, job_id);
    let allowed = options.retries.max(1);
    let mut attempts = 0;
    loop {
        attempts += 1;
        let output = ctx.require_slurm()?.shell().run_remote(&command)?;
        if output.success() {
            debug!("sacct output:\n{}", output.stdout);
            return parse_sacct(&output.stdout, job_id)
                .map(Some)
                .map_err(|e| match e {
                    RemoteError::StatusParse(reason) => EngineError::StatusParse(reason),
                    other => other.into(),
                });
        }

        warn!(
            "Status query failed (attempt {}/{}): {} - {}",
            attempts,
            allowed,
            output.code,
            output.stderr.trim()
        );
        if attempts >= allowed {
            return Err(EngineError::TransportFailed {
                command,
                code: output.code,
                attempts,
                stderr: output.stderr,
            });
        }
        sleeper.sleep(options.retry_delay, cancel);
        if cancel.is_cancelled() {
            return Ok(None);
        }
    }
}

/// Follows a submitted job until it leaves the queue or `cancel` is set.
///
/// Every poll reports the job state, downloads the engine logs and re-checks the
/// ledger. A terminal state ends the loop at once; otherwise the loop sleeps for the
/// poll interval. Without a known job id, one is looked up first.
#[instrument(skip_all, name = "watch")]
pub fn watch(
    ctx: &mut MdContext,
    options: &WatchOptions,
    sleeper: &mut dyn Sleeper,
    cancel: &CancelToken,
    reporter: &ProgressReporter,
) -> Result<WatchOutcome, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Watch" });

    let job_id = match ctx.require_slurm()?.job_id() {
        Some(job_id) => job_id,
        None => find_job_id(ctx)?,
    };
    info!("Watching job {}", job_id);

    let mut polls = 0;
    loop {
        if cancel.is_cancelled() {
            info!("Watch of job {} cancelled after {} poll(s).", job_id, polls);
            reporter.report(Progress::PhaseFinish);
            return Ok(WatchOutcome::Cancelled { job_id, polls });
        }

        let Some(state) = poll_state(ctx, job_id, options, sleeper, cancel)? else {
            continue;
        };
        polls += 1;
        reporter.report(Progress::JobStatus {
            job_id,
            state: state.to_string(),
        });
        info!("Job {} is {}", job_id, state);

        download_logs(ctx)?;
        check_runs(ctx, reporter)?;

        if !state.is_active() {
            info!("Job {} has ended with state {}.", job_id, state);
            if options.fetch_results {
                download_finished(ctx)?;
            }
            reporter.report(Progress::PhaseFinish);
            return Ok(WatchOutcome::Finished {
                job_id,
                state,
                polls,
            });
        }

        if let Ok(delta) = chrono::Duration::from_std(options.interval) {
            info!("Next check: {}", (Local::now() + delta).format("%Y-%m-%d %H:%M:%S"));
        }
        sleeper.sleep(options.interval, cancel);
    }
}
