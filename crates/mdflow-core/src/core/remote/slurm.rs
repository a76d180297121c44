use super::RemoteError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static SUBMITTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Submitted batch job (\d+)").expect("submission pattern is valid")
});

/// Scheduler state of a batch job, as reported by `sacct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    OutOfMemory,
    NodeFail,
    Other(String),
}

impl JobState {
    /// Running and pending jobs keep the polling loop alive; every other state is terminal.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Pending)
    }

    fn from_sacct(state: &str) -> Self {
        // "CANCELLED by 1234" carries the cancelling uid after the state word.
        match state.split_whitespace().next().unwrap_or_default() {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "COMPLETED" => JobState::Completed,
            "FAILED" => JobState::Failed,
            "CANCELLED" => JobState::Cancelled,
            "TIMEOUT" => JobState::Timeout,
            "OUT_OF_MEMORY" => JobState::OutOfMemory,
            "NODE_FAIL" => JobState::NodeFail,
            other => JobState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::Timeout => "TIMEOUT",
            JobState::OutOfMemory => "OUT_OF_MEMORY",
            JobState::NodeFail => "NODE_FAIL",
            JobState::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// Extracts the state of `job_id` from `sacct -p -b` output.
///
/// The header row locates the `JobID` and `State` columns; step rows such as
/// `1234.batch` are ignored in favour of the allocation row.
pub fn parse_sacct(output: &str, job_id: u64) -> Result<JobState, RemoteError> {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    let header = lines
        .next()
        .ok_or_else(|| RemoteError::StatusParse("empty sacct output".to_string()))?;
    let columns: Vec<&str> = header.split('|').map(str::trim).collect();
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| RemoteError::StatusParse(format!("no '{name}' column in '{header}'")))
    };
    let id_col = column("JobID")?;
    let state_col = column("State")?;

    let wanted = job_id.to_string();
    for line in lines {
        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.get(id_col) == Some(&wanted.as_str()) {
            return fields
                .get(state_col)
                .filter(|s| !s.is_empty())
                .map(|s| JobState::from_sacct(s))
                .ok_or_else(|| RemoteError::StatusParse(format!("row '{line}' has no state")));
        }
    }
    Err(RemoteError::StatusParse(format!(
        "job {job_id} not listed by sacct"
    )))
}

pub fn parse_submitted_job_id(stdout: &str) -> Option<u64> {
    SUBMITTED_RE
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SACCT: &str = "JobID|State|ExitCode|\n\
                         4242|RUNNING|0:0|\n\
                         4242.batch|RUNNING|0:0|\n\
                         4242.0|COMPLETED|0:0|\n";

    #[test]
    fn picks_the_allocation_row() {
        let state = parse_sacct(SACCT, 4242).unwrap();
        assert_eq!(state, JobState::Running);
        assert!(state.is_active());
    }

    #[rstest]
    #[case("PENDING", JobState::Pending)]
    #[case("COMPLETED", JobState::Completed)]
    #[case("CANCELLED by 1001", JobState::Cancelled)]
    #[case("OUT_OF_MEMORY", JobState::OutOfMemory)]
    #[case("REQUEUED", JobState::Other("REQUEUED".to_string()))]
    fn maps_state_words(#[case] raw: &str, #[case] expected: JobState) {
        let output = format!("JobID|State|ExitCode|\n7|{raw}|0:0|\n");
        assert_eq!(parse_sacct(&output, 7).unwrap(), expected);
    }

    #[test]
    fn column_order_comes_from_the_header() {
        let output = "State|JobID|\nFAILED|9|\n";
        assert_eq!(parse_sacct(output, 9).unwrap(), JobState::Failed);
        assert!(!JobState::Failed.is_active());
    }

    #[rstest]
    #[case("")]
    #[case("JobID|ExitCode|\n1|0:0|\n")]
    #[case("JobID|State|\n2|RUNNING|\n")]
    #[case("JobID|State|\n1||\n")]
    fn unusable_output_is_an_error(#[case] output: &str) {
        assert!(matches!(
            parse_sacct(output, 1),
            Err(RemoteError::StatusParse(_))
        ));
    }

    #[test]
    fn parses_sbatch_reply() {
        assert_eq!(
            parse_submitted_job_id("Submitted batch job 123456\n"),
            Some(123456)
        );
        assert_eq!(parse_submitted_job_id("sbatch: error: invalid account"), None);
    }
}
