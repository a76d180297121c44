use crate::core::config::Software;
use crate::core::ledger::{Column, Stage};
use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Flow, Step};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static AMBER_TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bnstlim\b\D*(\d+)").expect("nstlim pattern is valid"));
static AMBER_DONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bNSTEP\b\D*(\d+)").expect("NSTEP pattern is valid"));
static GROMACS_TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bnsteps\b\D*(\d+)").expect("nsteps pattern is valid"));
static GROMACS_DONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bStatistics\b\D*(\d+)").expect("Statistics pattern is valid")
});

/// Declared and completed step counts read from an engine log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogProgress {
    pub total: u64,
    pub completed: u64,
}

impl LogProgress {
    /// The total is the first integer after `nstlim` (Amber) or `nsteps` (GROMACS).
    /// The completed count is the last `NSTEP` report (Amber), or the last
    /// `Statistics over N steps` line minus one (GROMACS, which counts step zero).
    pub fn parse(software: Software, content: &str) -> Result<Self, String> {
        let (total_re, done_re) = match software {
            Software::Amber => (&*AMBER_TOTAL_RE, &*AMBER_DONE_RE),
            Software::Gromacs => (&*GROMACS_TOTAL_RE, &*GROMACS_DONE_RE),
        };
        let first_number = |re: &Regex, line: &str| -> Option<u64> {
            re.captures(line)?.get(1)?.as_str().parse().ok()
        };

        let total = content
            .lines()
            .find_map(|line| first_number(total_re, line))
            .ok_or_else(|| format!("no '{}' value found", total_re.as_str()))?;
        let mut completed = content
            .lines()
            .filter_map(|line| first_number(done_re, line))
            .last()
            .ok_or_else(|| format!("no '{}' line found", done_re.as_str()))?;
        if software == Software::Gromacs {
            completed = completed.saturating_sub(1);
        }
        Ok(Self { total, completed })
    }

    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }
}

/// Compares a log's completed steps with its declared total and records the result
/// on the simulation's ledger row.
///
/// Rows already `Finished` or `DOWNLOADED` are left alone without reading the log. A
/// log without a ledger row is skipped with a warning.
pub struct CheckProgress {
    log: PathBuf,
    name: String,
}

impl CheckProgress {
    pub fn new(log: impl Into<PathBuf>) -> Self {
        let log = log.into();
        let name = format!("CheckProgress({})", log.display());
        Self { log, name }
    }
}

impl Step<MdContext> for CheckProgress {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let extension = self
            .log
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let software = Software::from_log_extension(extension)
            .ok_or_else(|| EngineError::Unsupported(format!("log file {:?}", self.log)))?;
        let simulation = self
            .log
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let query = ctx
            .project_query()
            .with(Column::SimulationName, simulation.as_str());
        let entries = ctx.database_mut().find_entries(&query)?;
        let Some((index, record)) = entries.first() else {
            warn!("No ledger entry for {}; skipping {:?}", simulation, self.log);
            return Ok(Flow::Continue);
        };
        if record.stage.is_done() {
            debug!("Simulation {} (index {}) is already {}", simulation, index, record.stage);
            return Ok(Flow::Continue);
        }

        let content = std::fs::read_to_string(&self.log).map_err(EngineError::io(&self.log))?;
        let progress =
            LogProgress::parse(software, &content).map_err(|reason| EngineError::CorruptedLog {
                path: self.log.clone(),
                reason,
            })?;
        let stage = if progress.is_finished() {
            Stage::Finished
        } else {
            Stage::Unfinished
        };

        info!(
            "{}: {}/{} steps, {}",
            simulation, progress.completed, progress.total, stage
        );
        ctx.modify_entry((Column::Stage, stage.as_str()), &query)?;
        Ok(Flow::Continue)
    }
}
