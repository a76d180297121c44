use crate::core::config::Software;
use crate::engine::context::MdContext;
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Flow, Step};
use std::path::Path;
use tracing::{debug, info};

const ANNEALING_KEYS: [&str; 4] = [
    "annealing",
    "annealing-npoints",
    "annealing-time",
    "annealing-temp",
];

/// Places the current run's option file in the data directory.
///
/// Amber input files are copied as they are. GROMACS `.mdp` files are rewritten so that
/// temperature coupling covers every energy group: `tc-grps` lists the groups and the
/// per-group keys (`ref_t`, `tau_t`, and the annealing keys when annealing is on) are
/// repeated once per group.
pub struct PrepareMdOptions;

impl Step<MdContext> for PrepareMdOptions {
    fn name(&self) -> &str {
        "PrepareMdOptions"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let source = ctx.current_run()?.config_file.clone();
        let file_name = source
            .file_name()
            .ok_or_else(|| EngineError::RunNotFound(format!("config file {:?}", source)))?;
        let target = ctx.environment().data_dir().join(file_name);
        info!("Setting up options file {:?}", source);

        let content = std::fs::read_to_string(&source).map_err(EngineError::io(&source))?;
        let content = match ctx.environment().software() {
            Software::Amber => content,
            Software::Gromacs => {
                let mut options = MdpOptions::parse(&content, &source)?;
                options.apply_energy_groups(&ctx.energy_groups()?);
                options.render()
            }
        };

        ctx.environment().make_duplicate(&target)?;
        std::fs::write(&target, content).map_err(EngineError::io(&target))?;
        debug!("Options saved to {:?}", target);
        Ok(Flow::Continue)
    }
}

/// Ordered `key = value` pairs of a GROMACS parameter file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct MdpOptions {
    entries: Vec<(String, String)>,
}

impl MdpOptions {
    fn parse(content: &str, path: &Path) -> Result<Self, EngineError> {
        let mut options = Self::default();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| EngineError::MalformedLine {
                    path: path.to_path_buf(),
                    line: number + 1,
                    content: line.to_string(),
                })?;
            options.set(key.trim(), value.trim().to_string());
        }
        Ok(options)
    }

    /// GROMACS treats `-` and `_` in option names as the same character.
    fn position(&self, key: &str) -> Option<usize> {
        let wanted = key.replace('_', "-");
        self.entries
            .iter()
            .position(|(k, _)| k.replace('_', "-") == wanted)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|pos| self.entries[pos].1.as_str())
    }

    fn set(&mut self, key: &str, value: String) {
        match self.position(key) {
            Some(pos) => self.entries[pos].1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    fn repeat(&mut self, key: &str, times: usize) {
        if let Some(value) = self.get(key) {
            let repeated = vec![value; times].join(" ");
            self.set(key, repeated);
        }
    }

    fn apply_energy_groups(&mut self, groups: &[String]) {
        self.set("tc-grps", groups.join(" "));
        self.repeat("ref_t", groups.len());
        self.repeat("tau_t", groups.len());

        if self.get("annealing").is_some() {
            for key in ANNEALING_KEYS {
                self.repeat(key, groups.len());
            }
        }
        debug!("Temperature coupling set for groups {:?}", groups);
    }

    fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key} = {value}\n"))
            .collect()
    }
}
