//! # Job Ledger
//!
//! Durable table of simulation attempts, one row per (project, simulation) pair.
//!
//! New rows are staged and flushed to disk on every [`Ledger::add_entry`]; the whole
//! table is rewritten on [`Ledger::save`] through a temporary file in the same
//! directory followed by a rename, so a crash never leaves a truncated ledger behind.
//! Queries are conjunctions of exact column equalities.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const HEADERS: [&str; 12] = [
    "INDEX",
    "ROOT DIR",
    "PROJECT NAME",
    "SIMULATION NAME",
    "TOPOLOGY FILE",
    "COORDINATE FILE",
    "CONFIG FILE",
    "STAGE",
    "REMOTE ADDRESS",
    "REMOTE DIR",
    "STORAGE DIR",
    "JOB ID",
];

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Ledger CSV error for '{path}': {source}", path = path.display())]
    Csv { path: PathBuf, source: csv::Error },

    #[error("Ledger index {index} already holds '{existing}', refusing to store '{incoming}'")]
    IndexConflict {
        index: u64,
        existing: String,
        incoming: String,
    },

    #[error("Simulation '{simulation}' of project '{project}' is recorded under indices {indices:?}")]
    DuplicateSimulation {
        project: String,
        simulation: String,
        indices: Vec<u64>,
    },

    #[error("Invalid value '{value}' for ledger column '{column}'")]
    InvalidValue { column: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Unfinished,
    Finished,
    #[serde(rename = "DOWNLOADED")]
    Downloaded,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Unfinished => "Unfinished",
            Stage::Finished => "Finished",
            Stage::Downloaded => "DOWNLOADED",
        }
    }

    /// Finished and downloaded rows need no further checking.
    pub fn is_done(self) -> bool {
        matches!(self, Stage::Finished | Stage::Downloaded)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unfinished" => Ok(Stage::Unfinished),
            "Finished" => Ok(Stage::Finished),
            "DOWNLOADED" => Ok(Stage::Downloaded),
            other => Err(LedgerError::InvalidValue {
                column: Column::Stage.header(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub root_dir: String,
    pub project_name: String,
    pub simulation_name: String,
    pub topology_file: String,
    pub coordinate_file: String,
    pub config_file: String,
    pub stage: Stage,
    pub remote_address: String,
    pub remote_dir: String,
    pub storage_dir: String,
    pub job_id: Option<u64>,
}

impl LedgerRecord {
    fn identity(&self) -> String {
        format!("{}/{}", self.project_name, self.simulation_name)
    }

    fn same_simulation(&self, other: &LedgerRecord) -> bool {
        self.project_name == other.project_name && self.simulation_name == other.simulation_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    RootDir,
    ProjectName,
    SimulationName,
    TopologyFile,
    CoordinateFile,
    ConfigFile,
    Stage,
    RemoteAddress,
    RemoteDir,
    StorageDir,
    JobId,
}

impl Column {
    pub fn header(self) -> &'static str {
        match self {
            Column::RootDir => "ROOT DIR",
            Column::ProjectName => "PROJECT NAME",
            Column::SimulationName => "SIMULATION NAME",
            Column::TopologyFile => "TOPOLOGY FILE",
            Column::CoordinateFile => "COORDINATE FILE",
            Column::ConfigFile => "CONFIG FILE",
            Column::Stage => "STAGE",
            Column::RemoteAddress => "REMOTE ADDRESS",
            Column::RemoteDir => "REMOTE DIR",
            Column::StorageDir => "STORAGE DIR",
            Column::JobId => "JOB ID",
        }
    }

    /// The cell as it is stored on disk.
    pub fn get(self, record: &LedgerRecord) -> String {
        match self {
            Column::RootDir => record.root_dir.clone(),
            Column::ProjectName => record.project_name.clone(),
            Column::SimulationName => record.simulation_name.clone(),
            Column::TopologyFile => record.topology_file.clone(),
            Column::CoordinateFile => record.coordinate_file.clone(),
            Column::ConfigFile => record.config_file.clone(),
            Column::Stage => record.stage.to_string(),
            Column::RemoteAddress => record.remote_address.clone(),
            Column::RemoteDir => record.remote_dir.clone(),
            Column::StorageDir => record.storage_dir.clone(),
            Column::JobId => record.job_id.map(|id| id.to_string()).unwrap_or_default(),
        }
    }

    pub fn set(self, record: &mut LedgerRecord, value: &str) -> Result<(), LedgerError> {
        match self {
            Column::RootDir => record.root_dir = value.to_string(),
            Column::ProjectName => record.project_name = value.to_string(),
            Column::SimulationName => record.simulation_name = value.to_string(),
            Column::TopologyFile => record.topology_file = value.to_string(),
            Column::CoordinateFile => record.coordinate_file = value.to_string(),
            Column::ConfigFile => record.config_file = value.to_string(),
            Column::Stage => record.stage = value.parse()?,
            Column::RemoteAddress => record.remote_address = value.to_string(),
            Column::RemoteDir => record.remote_dir = value.to_string(),
            Column::StorageDir => record.storage_dir = value.to_string(),
            Column::JobId => {
                record.job_id = if value.is_empty() {
                    None
                } else {
                    Some(value.parse().map_err(|_| LedgerError::InvalidValue {
                        column: self.header(),
                        value: value.to_string(),
                    })?)
                }
            }
        }
        Ok(())
    }
}

/// Conjunction of exact column equalities. An empty query matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    predicates: Vec<(Column, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: Column, value: impl Into<String>) -> Self {
        self.predicates.push((column, value.into()));
        self
    }

    pub fn matches(&self, record: &LedgerRecord) -> bool {
        self.predicates
            .iter()
            .all(|(column, value)| column.get(record) == *value)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Row {
    #[serde(rename = "INDEX")]
    index: u64,
    #[serde(rename = "ROOT DIR")]
    root_dir: String,
    #[serde(rename = "PROJECT NAME")]
    project_name: String,
    #[serde(rename = "SIMULATION NAME")]
    simulation_name: String,
    #[serde(rename = "TOPOLOGY FILE")]
    topology_file: String,
    #[serde(rename = "COORDINATE FILE")]
    coordinate_file: String,
    #[serde(rename = "CONFIG FILE")]
    config_file: String,
    #[serde(rename = "STAGE")]
    stage: Stage,
    #[serde(rename = "REMOTE ADDRESS")]
    remote_address: String,
    #[serde(rename = "REMOTE DIR")]
    remote_dir: String,
    #[serde(rename = "STORAGE DIR")]
    storage_dir: String,
    #[serde(rename = "JOB ID")]
    job_id: Option<u64>,
}

impl Row {
    fn new(index: u64, r: &LedgerRecord) -> Self {
        Self {
            index,
            root_dir: r.root_dir.clone(),
            project_name: r.project_name.clone(),
            simulation_name: r.simulation_name.clone(),
            topology_file: r.topology_file.clone(),
            coordinate_file: r.coordinate_file.clone(),
            config_file: r.config_file.clone(),
            stage: r.stage,
            remote_address: r.remote_address.clone(),
            remote_dir: r.remote_dir.clone(),
            storage_dir: r.storage_dir.clone(),
            job_id: r.job_id,
        }
    }

    fn into_record(self) -> (u64, LedgerRecord) {
        (
            self.index,
            LedgerRecord {
                root_dir: self.root_dir,
                project_name: self.project_name,
                simulation_name: self.simulation_name,
                topology_file: self.topology_file,
                coordinate_file: self.coordinate_file,
                config_file: self.config_file,
                stage: self.stage,
                remote_address: self.remote_address,
                remote_dir: self.remote_dir,
                storage_dir: self.storage_dir,
                job_id: self.job_id,
            },
        )
    }
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    rows: BTreeMap<u64, LedgerRecord>,
    staged: BTreeMap<u64, LedgerRecord>,
}

impl Ledger {
    /// Creates an empty ledger and writes its header to `path`.
    pub fn create(path: &Path) -> Result<Self, LedgerError> {
        warn!("Creating a new ledger at {:?}", path);
        let mut ledger = Self {
            path: path.to_path_buf(),
            rows: BTreeMap::new(),
            staged: BTreeMap::new(),
        };
        ledger.save()?;
        Ok(ledger)
    }

    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        info!("Opening ledger at {:?}", path);
        let csv_err = |source| LedgerError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let mut rows = BTreeMap::new();
        for result in reader.deserialize::<Row>() {
            let (index, record) = result.map_err(csv_err)?.into_record();
            if let Some(existing) = rows.insert(index, record) {
                return Err(LedgerError::IndexConflict {
                    index,
                    existing: existing.identity(),
                    incoming: rows[&index].identity(),
                });
            }
        }
        debug!("Loaded {} ledger row(s)", rows.len());
        Ok(Self {
            path: path.to_path_buf(),
            rows,
            staged: BTreeMap::new(),
        })
    }

    pub fn open_or_create(path: &Path) -> Result<Self, LedgerError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Highest index in use, or 0 for an empty ledger.
    pub fn last_index(&self) -> u64 {
        let committed = self.rows.keys().next_back().copied().unwrap_or(0);
        let staged = self.staged.keys().next_back().copied().unwrap_or(0);
        committed.max(staged)
    }

    pub fn records(&self) -> impl Iterator<Item = (u64, &LedgerRecord)> {
        self.rows.iter().map(|(index, record)| (*index, record))
    }

    pub fn get(&self, index: u64) -> Option<&LedgerRecord> {
        self.rows.get(&index)
    }

    /// Stages `record` under `index` and saves immediately.
    ///
    /// Re-adding a simulation at its own index replaces the row. An index held by a
    /// different simulation, or a simulation already stored under another index, is
    /// rejected.
    pub fn add_entry(&mut self, index: u64, record: LedgerRecord) -> Result<(), LedgerError> {
        let existing = self.rows.iter().chain(self.staged.iter());
        for (other_index, other) in existing {
            let same_index = *other_index == index;
            let same_simulation = other.same_simulation(&record);
            if same_index && !same_simulation {
                return Err(LedgerError::IndexConflict {
                    index,
                    existing: other.identity(),
                    incoming: record.identity(),
                });
            }
            if !same_index && same_simulation {
                return Err(LedgerError::DuplicateSimulation {
                    project: record.project_name.clone(),
                    simulation: record.simulation_name.clone(),
                    indices: vec![*other_index, index],
                });
            }
        }
        debug!("Staging ledger entry {} -> {}", index, record.identity());
        self.staged.insert(index, record);
        self.save()
    }

    pub fn find_entries(&self, query: &Query) -> Vec<(u64, &LedgerRecord)> {
        self.records().filter(|(_, r)| query.matches(r)).collect()
    }

    /// Sets `column` to `value` on every committed row matching `query` and returns how
    /// many rows were touched. Changes are in memory until the next [`Ledger::save`].
    pub fn modify_entry(
        &mut self,
        (column, value): (Column, &str),
        query: &Query,
    ) -> Result<usize, LedgerError> {
        let mut affected = 0;
        for record in self.rows.values_mut().filter(|r| query.matches(r)) {
            column.set(record, value)?;
            affected += 1;
        }
        debug!(
            "Set '{}' = '{}' on {} ledger row(s)",
            column.header(),
            value,
            affected
        );
        Ok(affected)
    }

    /// Flushes staged rows into the table and rewrites the file atomically.
    pub fn save(&mut self) -> Result<(), LedgerError> {
        self.rows.append(&mut self.staged);

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            let csv_err = |source| LedgerError::Csv {
                path: self.path.clone(),
                source,
            };
            writer.write_record(HEADERS).map_err(csv_err)?;
            for (index, record) in &self.rows {
                writer.serialize(Row::new(*index, record)).map_err(csv_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        tmp.as_file_mut().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!("Saved {} ledger row(s) to {:?}", self.rows.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(project: &str, simulation: &str) -> LedgerRecord {
        LedgerRecord {
            root_dir: "/work".into(),
            project_name: project.into(),
            simulation_name: simulation.into(),
            topology_file: "demo.parm7".into(),
            coordinate_file: "demo-0.rst7".into(),
            config_file: "min.in".into(),
            stage: Stage::Unfinished,
            remote_address: String::new(),
            remote_dir: String::new(),
            storage_dir: String::new(),
            job_id: None,
        }
    }

    #[test]
    fn new_ledger_is_written_with_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.csv");

        let ledger = Ledger::create(&path).unwrap();

        assert!(ledger.is_empty());
        assert_eq!(ledger.last_index(), 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), HEADERS.join(","));
        assert!(Ledger::open(&path).unwrap().is_empty());
    }

    #[test]
    fn add_entry_is_durable_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut ledger = Ledger::create(&path).unwrap();

        ledger.add_entry(1, record("demo", "0-min")).unwrap();

        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(1), Some(&record("demo", "0-min")));
        assert_eq!(reopened.last_index(), 1);
    }

    #[test]
    fn save_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut ledger = Ledger::create(&path).unwrap();
        ledger.add_entry(1, record("demo", "0-min")).unwrap();
        let mut with_job = record("demo", "0-nvt");
        with_job.job_id = Some(987);
        ledger.add_entry(2, with_job).unwrap();

        ledger.save().unwrap();
        let once = std::fs::read(&path).unwrap();
        ledger.save().unwrap();
        let twice = std::fs::read(&path).unwrap();

        assert_eq!(once, twice);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("ledger.csv")]);
    }

    #[test]
    fn find_entries_requires_every_predicate() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::create(&dir.path().join("l.csv")).unwrap();
        ledger.add_entry(1, record("a", "0-min")).unwrap();
        ledger.add_entry(2, record("a", "1-min")).unwrap();
        ledger.add_entry(3, record("b", "0-min")).unwrap();

        let query = Query::new()
            .with(Column::ProjectName, "a")
            .with(Column::SimulationName, "0-min");
        let found = ledger.find_entries(&query);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 1);
        assert_eq!(ledger.find_entries(&Query::new()).len(), 3);
        assert_eq!(
            ledger
                .find_entries(&Query::new().with(Column::JobId, ""))
                .len(),
            3
        );
    }

    #[test]
    fn modify_entry_touches_only_matching_rows() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::create(&dir.path().join("l.csv")).unwrap();
        ledger.add_entry(1, record("a", "0-min")).unwrap();
        ledger.add_entry(2, record("a", "1-min")).unwrap();
        ledger.add_entry(3, record("b", "0-min")).unwrap();
        let untouched = ledger.get(3).cloned().unwrap();

        let affected = ledger
            .modify_entry(
                (Column::Stage, "Finished"),
                &Query::new().with(Column::ProjectName, "a"),
            )
            .unwrap();

        assert_eq!(affected, 2);
        assert_eq!(ledger.get(1).unwrap().stage, Stage::Finished);
        assert_eq!(ledger.get(2).unwrap().stage, Stage::Finished);
        assert_eq!(ledger.get(3), Some(&untouched));

        let none = ledger
            .modify_entry((Column::JobId, "5"), &Query::new().with(Column::ProjectName, "zzz"))
            .unwrap();
        assert_eq!(none, 0);
    }

    #[test]
    fn modify_entry_rejects_unparsable_values() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::create(&dir.path().join("l.csv")).unwrap();
        ledger.add_entry(1, record("a", "0-min")).unwrap();

        let err = ledger
            .modify_entry((Column::Stage, "Done"), &Query::new())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidValue { column: "STAGE", .. }));
        assert!(ledger.modify_entry((Column::JobId, "x1"), &Query::new()).is_err());
    }

    #[test]
    fn re_adding_a_simulation_at_its_index_replaces_the_row() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::create(&dir.path().join("l.csv")).unwrap();
        ledger.add_entry(1, record("a", "0-min")).unwrap();
        let mut updated = record("a", "0-min");
        updated.config_file = "min2.in".into();

        ledger.add_entry(1, updated.clone()).unwrap();

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(1), Some(&updated));
    }

    #[test]
    fn index_collisions_are_rejected() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::create(&dir.path().join("l.csv")).unwrap();
        ledger.add_entry(1, record("a", "0-min")).unwrap();

        let conflict = ledger.add_entry(1, record("a", "1-min")).unwrap_err();
        assert!(matches!(conflict, LedgerError::IndexConflict { index: 1, .. }));

        let duplicate = ledger.add_entry(2, record("a", "0-min")).unwrap_err();
        assert!(matches!(duplicate, LedgerError::DuplicateSimulation { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn stage_uses_on_disk_spelling() {
        assert_eq!(Stage::Downloaded.to_string(), "DOWNLOADED");
        assert_eq!("Finished".parse::<Stage>().unwrap(), Stage::Finished);
        assert!(Stage::Downloaded.is_done());
        assert!(!Stage::Unfinished.is_done());
    }
}
