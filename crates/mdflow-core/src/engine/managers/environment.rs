use crate::core::config::{EnvironmentConfig, Software};
use crate::engine::error::EngineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Owns the governing directories of a campaign and the file lookups made against them.
#[derive(Debug, Clone)]
pub struct EnvironmentManager {
    config: EnvironmentConfig,
    root: PathBuf,
    param_dir: PathBuf,
    data_dir: PathBuf,
}

impl EnvironmentManager {
    /// Fills in defaulted directories, checks that root and parameter directories exist
    /// and creates the data directory when it is missing.
    pub fn new(mut config: EnvironmentConfig) -> Result<Self, EngineError> {
        info!("Initializing environment for project '{}'", config.project_name);
        debug!("Environment config: {:?}", config);

        let root = match &config.root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(EngineError::io("."))?,
        };
        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| root.join(&config.project_name));
        let param_dir = config.param_dir.clone().unwrap_or_else(|| root.clone());

        for dir in [&root, &param_dir] {
            if !dir.is_dir() {
                return Err(EngineError::MissingDirectory { path: dir.clone() });
            }
        }

        if data_dir.exists() {
            warn!("Directory {:?} already exists!", data_dir);
        } else {
            std::fs::create_dir_all(&data_dir).map_err(EngineError::io(&data_dir))?;
            info!("Directory {:?} has been created.", data_dir);
        }

        config.root = Some(root.clone());
        config.param_dir = Some(param_dir.clone());
        config.data_dir = Some(data_dir.clone());

        Ok(Self {
            config,
            root,
            param_dir,
            data_dir,
        })
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn software(&self) -> Software {
        self.config.software
    }

    pub fn project_name(&self) -> &str {
        &self.config.project_name
    }

    pub fn basename(&self) -> &str {
        &self.config.basename
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    pub fn param_dir(&self) -> &Path {
        &self.param_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Resolves `file` against root, parameter and data directories, in that order.
    pub fn make_absolute(&self, file: &Path) -> Result<PathBuf, EngineError> {
        if file.is_absolute() {
            if file.exists() {
                return Ok(file.to_path_buf());
            }
            return Err(EngineError::FileNotFound {
                file: file.to_path_buf(),
                searched: Vec::new(),
            });
        }

        let searched = [&self.root, &self.param_dir, &self.data_dir];
        for dir in searched {
            let candidate = dir.join(file);
            if candidate.exists() {
                debug!("{:?} found at {:?}", file, dir);
                return Ok(candidate);
            }
        }
        Err(EngineError::FileNotFound {
            file: file.to_path_buf(),
            searched: searched.into_iter().cloned().collect(),
        })
    }

    /// Moves an existing file in the data directory aside before it is regenerated.
    ///
    /// The backup is named `<name>.bck<N>`, where N counts the data-directory entries
    /// whose names start with `<name>` (the file itself included). Returns the backup
    /// path, or `None` when there was nothing to move.
    pub fn make_duplicate(&self, file: &Path) -> Result<Option<PathBuf>, EngineError> {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let current = self.data_dir.join(name);
        if !current.exists() {
            debug!("No duplicate of {} was found.", name);
            return Ok(None);
        }

        let entries = std::fs::read_dir(&self.data_dir).map_err(EngineError::io(&self.data_dir))?;
        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(EngineError::io(&self.data_dir))?;
            if entry.file_name().to_string_lossy().starts_with(name) {
                count += 1;
            }
        }

        let mut backup = self.data_dir.join(format!("{name}.bck{count}"));
        while backup.exists() {
            count += 1;
            backup = self.data_dir.join(format!("{name}.bck{count}"));
        }

        debug!("Making duplicate of {}. Duplicate number {}.", name, count);
        std::fs::rename(&current, &backup).map_err(EngineError::io(&current))?;
        Ok(Some(backup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Resource;
    use std::fs;
    use tempfile::tempdir;

    fn config(root: &Path) -> EnvironmentConfig {
        EnvironmentConfig {
            software: Software::Amber,
            basename: "demo".into(),
            project_name: "demo".into(),
            resource: Resource::Cpu,
            cpus_per_task: 4,
            root: Some(root.to_path_buf()),
            param_dir: None,
            data_dir: None,
        }
    }

    #[test]
    fn directories_default_to_root_and_project() {
        let dir = tempdir().unwrap();
        let env = EnvironmentManager::new(config(dir.path())).unwrap();

        assert_eq!(env.param_dir(), dir.path());
        assert_eq!(env.data_dir(), dir.path().join("demo"));
        assert!(env.data_dir().is_dir());
        assert_eq!(env.config().data_dir.as_deref(), Some(env.data_dir()));
    }

    #[test]
    fn missing_parameter_directory_is_fatal() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.param_dir = Some(dir.path().join("params"));

        let err = EnvironmentManager::new(cfg).unwrap_err();
        assert!(matches!(err, EngineError::MissingDirectory { .. }));
    }

    #[test]
    fn make_absolute_searches_root_then_param_then_data() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("params")).unwrap();
        let mut cfg = config(dir.path());
        cfg.param_dir = Some(dir.path().join("params"));
        let env = EnvironmentManager::new(cfg).unwrap();

        fs::write(env.data_dir().join("a.in"), "").unwrap();
        fs::write(env.param_dir().join("a.in"), "").unwrap();
        fs::write(env.data_dir().join("b.in"), "").unwrap();

        assert_eq!(
            env.make_absolute(Path::new("a.in")).unwrap(),
            dir.path().join("params/a.in")
        );
        assert_eq!(
            env.make_absolute(Path::new("b.in")).unwrap(),
            env.data_dir().join("b.in")
        );

        fs::write(dir.path().join("a.in"), "").unwrap();
        assert_eq!(
            env.make_absolute(Path::new("a.in")).unwrap(),
            dir.path().join("a.in")
        );

        let err = env.make_absolute(Path::new("missing.in")).unwrap_err();
        assert!(
            matches!(err, EngineError::FileNotFound { ref searched, .. } if searched.len() == 3)
        );
    }

    #[test]
    fn make_duplicate_never_reuses_a_suffix() {
        let dir = tempdir().unwrap();
        let env = EnvironmentManager::new(config(dir.path())).unwrap();
        let file = env.data_dir().join("run.top");

        for expected in 1..=3 {
            fs::write(&file, format!("v{expected}")).unwrap();
            let backup = env.make_duplicate(&file).unwrap().unwrap();
            assert_eq!(backup, env.data_dir().join(format!("run.top.bck{expected}")));
            assert_eq!(fs::read_to_string(&backup).unwrap(), format!("v{expected}"));
            assert!(!file.exists());
        }
    }

    #[test]
    fn make_duplicate_skips_a_gap_left_by_deleted_backups() {
        let dir = tempdir().unwrap();
        let env = EnvironmentManager::new(config(dir.path())).unwrap();
        let file = env.data_dir().join("md.run");
        fs::write(env.data_dir().join("md.run.bck2"), "old").unwrap();
        fs::write(&file, "new").unwrap();

        let backup = env.make_duplicate(&file).unwrap().unwrap();

        assert_eq!(backup, env.data_dir().join("md.run.bck3"));
        assert_eq!(fs::read_to_string(env.data_dir().join("md.run.bck2")).unwrap(), "old");
    }

    #[test]
    fn make_duplicate_without_a_file_does_nothing() {
        let dir = tempdir().unwrap();
        let env = EnvironmentManager::new(config(dir.path())).unwrap();

        assert_eq!(env.make_duplicate(Path::new("md.slurm")).unwrap(), None);
    }
}
