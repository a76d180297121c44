use crate::core::config::DatabaseConfig;
use crate::core::ledger::{Column, Ledger, LedgerRecord, Query};
use crate::engine::error::EngineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Gatekeeper of the job ledger. The ledger file is opened on first use.
#[derive(Debug)]
pub struct DatabaseManager {
    path: PathBuf,
    ledger: Option<Ledger>,
}

impl DatabaseManager {
    /// Relative database paths are taken relative to `root`.
    pub fn new(config: &DatabaseConfig, root: &Path) -> Self {
        let path = if config.database_path.is_absolute() {
            config.database_path.clone()
        } else {
            root.join(&config.database_path)
        };
        debug!("Ledger path resolved to {:?}", path);
        Self { path, ledger: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ledger(&mut self) -> Result<&mut Ledger, EngineError> {
        let ledger = match self.ledger.take() {
            Some(ledger) => ledger,
            None => {
                info!("Initializing ledger at {:?}", self.path);
                Ledger::open_or_create(&self.path)?
            }
        };
        Ok(self.ledger.insert(ledger))
    }

    pub fn add_entry(&mut self, index: u64, record: LedgerRecord) -> Result<(), EngineError> {
        self.ledger()?.add_entry(index, record)?;
        Ok(())
    }

    pub fn find_entries(&mut self, query: &Query) -> Result<Vec<(u64, LedgerRecord)>, EngineError> {
        Ok(self
            .ledger()?
            .find_entries(query)
            .into_iter()
            .map(|(index, record)| (index, record.clone()))
            .collect())
    }

    /// Applies the change and persists the ledger when any row was touched.
    pub fn modify_entry(
        &mut self,
        change: (Column, &str),
        query: &Query,
    ) -> Result<usize, EngineError> {
        let ledger = self.ledger()?;
        let affected = ledger.modify_entry(change, query)?;
        if affected > 0 {
            ledger.save()?;
        }
        Ok(affected)
    }

    pub fn last_index(&mut self) -> Result<u64, EngineError> {
        Ok(self.ledger()?.last_index())
    }

    pub fn save(&mut self) -> Result<(), EngineError> {
        self.ledger()?.save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::Stage;
    use tempfile::tempdir;

    fn record(simulation: &str) -> LedgerRecord {
        LedgerRecord {
            root_dir: "/work".into(),
            project_name: "demo".into(),
            simulation_name: simulation.into(),
            topology_file: "demo.top".into(),
            coordinate_file: "demo-0.gro".into(),
            config_file: "nvt.mdp".into(),
            stage: Stage::Unfinished,
            remote_address: String::new(),
            remote_dir: String::new(),
            storage_dir: String::new(),
            job_id: None,
        }
    }

    #[test]
    fn ledger_is_created_lazily_relative_to_root() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            database_path: PathBuf::from("ledger.csv"),
        };
        let mut db = DatabaseManager::new(&config, dir.path());

        assert_eq!(db.path(), dir.path().join("ledger.csv"));
        assert!(!db.path().exists());
        assert_eq!(db.last_index().unwrap(), 0);
        assert!(db.path().exists());
    }

    #[test]
    fn modify_entry_persists_changes() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            database_path: dir.path().join("ledger.csv"),
        };
        let mut db = DatabaseManager::new(&config, Path::new("/unused"));
        db.add_entry(1, record("0-nvt")).unwrap();

        let affected = db
            .modify_entry(
                (Column::Stage, "Finished"),
                &Query::new().with(Column::SimulationName, "0-nvt"),
            )
            .unwrap();
        assert_eq!(affected, 1);

        let reopened = Ledger::open(db.path()).unwrap();
        assert_eq!(reopened.get(1).unwrap().stage, Stage::Finished);
    }
}
