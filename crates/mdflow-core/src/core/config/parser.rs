use super::{
    ConfigError, DatabaseConfig, EnvironmentConfig, RunConfig, Section, SectionKind, SlurmConfig,
    TopolConfig,
};
use phf::{Map, phf_map};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;

/// Spellings accepted for compatibility with older campaign files.
static KEY_ALIASES: Map<&'static str, &'static str> = phf_map! {
    "REMOTE_ADRESS" => "REMOTE_ADDRESS",
    "LUSTRE_DIR" => "STORAGE_DIR",
    "PID" => "JOB_ID",
    "START_POSITIONS_FILE" => "START_COORDINATES_FILE",
};

const ENVIRONMENT_KEYS: &[&str] = &[
    "SOFTWARE",
    "BASENAME",
    "PROJECT_NAME",
    "RESOURCE",
    "CPUS_PER_TASK",
    "ROOT",
    "PARAM_DIR",
    "DATA_DIR",
];

const SLURM_KEYS: &[&str] = &[
    "REMOTE_ADDRESS",
    "REMOTE_DIR",
    "STORAGE_DIR",
    "DOWNLOAD_DIR",
    "NODES",
    "NTASKS",
    "MEMORY",
    "TIME",
    "ACCOUNT",
    "PARTITION",
    "QOS",
    "GPU_RESOURCES",
    "NGPU",
    "JOB_ID",
];

const DATABASE_KEYS: &[&str] = &["DATABASE_PATH"];

const TOPOL_KEYS: &[&str] = &["INDEX", "NAME", "FF", "NUMBER", "FILE"];

const RUN_KEYS: &[&str] = &[
    "INDEX",
    "SIM_TYPE",
    "NRUNS",
    "CONFIG_FILE",
    "START_COORDINATES_FILE",
];

/// A typed section together with the (upper-cased) name it was declared under.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedSection {
    pub name: String,
    pub section: Section,
}

#[derive(Debug)]
struct RawSection {
    name: String,
    line: usize,
    entries: Vec<RawEntry>,
}

#[derive(Debug)]
struct RawEntry {
    key: String,
    value: String,
}

/// Parses bracket-format text into one typed record per section, in file order.
pub fn parse_sections(text: &str) -> Result<Vec<NamedSection>, ConfigError> {
    let mut seen = HashSet::new();
    let mut sections = Vec::new();

    for raw in tokenize(text)? {
        if !seen.insert(raw.name.clone()) {
            return Err(ConfigError::DuplicateSection { name: raw.name });
        }
        let kind =
            SectionKind::from_section_name(&raw.name).ok_or_else(|| ConfigError::UnknownSection {
                line: raw.line,
                name: raw.name.clone(),
            })?;
        let name = raw.name.clone();
        let section = build_section(kind, raw)?;
        sections.push(NamedSection { name, section });
    }

    Ok(sections)
}

fn tokenize(text: &str) -> Result<Vec<RawSection>, ConfigError> {
    let mut sections = Vec::new();
    let mut current: Option<RawSection> = None;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('{') {
            let name = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| ConfigError::UnexpectedLine {
                    line: line_no,
                    content: line.to_string(),
                })?
                .to_ascii_uppercase();
            if current.is_some() {
                return Err(ConfigError::NestedSection {
                    line: line_no,
                    name,
                });
            }
            current = Some(RawSection {
                name,
                line: line_no,
                entries: Vec::new(),
            });
            continue;
        }

        if line.starts_with('}') {
            match current.take() {
                Some(section) => sections.push(section),
                None => {
                    return Err(ConfigError::UnexpectedLine {
                        line: line_no,
                        content: line.to_string(),
                    });
                }
            }
            continue;
        }

        let Some(section) = current.as_mut() else {
            return Err(ConfigError::UnexpectedLine {
                line: line_no,
                content: line.to_string(),
            });
        };

        let (key, value) = split_entry(line);
        if key.is_empty() {
            return Err(ConfigError::UnexpectedLine {
                line: line_no,
                content: line.to_string(),
            });
        }
        let key = canonical_key(key);
        let value = value.ok_or_else(|| ConfigError::MissingValue {
            line: line_no,
            section: section.name.clone(),
            key: key.clone(),
        })?;
        section.entries.push(RawEntry {
            key,
            value: value.to_string(),
        });
    }

    if let Some(open) = current {
        return Err(ConfigError::UnterminatedSection { section: open.name });
    }

    Ok(sections)
}

/// Splits `KEY = VALUE`, `KEY=VALUE` or `KEY VALUE`; tokens after the value are ignored.
fn split_entry(line: &str) -> (&str, Option<&str>) {
    match line.split_once('=') {
        Some((key, rest)) => (
            key.split_whitespace().next().unwrap_or_default(),
            rest.split_whitespace().next(),
        ),
        None => {
            let mut tokens = line.split_whitespace();
            (tokens.next().unwrap_or_default(), tokens.next())
        }
    }
}

fn canonical_key(key: &str) -> String {
    let upper = key.to_ascii_uppercase();
    match KEY_ALIASES.get(upper.as_str()) {
        Some(alias) => (*alias).to_string(),
        None => upper,
    }
}

fn build_section(kind: SectionKind, raw: RawSection) -> Result<Section, ConfigError> {
    match kind {
        SectionKind::Environment => {
            let mut f = Fields::new(raw, ENVIRONMENT_KEYS)?;
            Ok(Section::Environment(EnvironmentConfig {
                software: f.parsed("SOFTWARE")?,
                basename: f.required("BASENAME")?,
                project_name: f.required("PROJECT_NAME")?,
                resource: f.parsed("RESOURCE")?,
                cpus_per_task: f.integer("CPUS_PER_TASK")?,
                root: f.optional("ROOT").map(PathBuf::from),
                param_dir: f.optional("PARAM_DIR").map(PathBuf::from),
                data_dir: f.optional("DATA_DIR").map(PathBuf::from),
            }))
        }
        SectionKind::Slurm => {
            let mut f = Fields::new(raw, SLURM_KEYS)?;
            Ok(Section::Slurm(SlurmConfig {
                remote_address: f.required("REMOTE_ADDRESS")?,
                remote_dir: f.required("REMOTE_DIR")?.into(),
                storage_dir: f.required("STORAGE_DIR")?.into(),
                download_dir: f.required("DOWNLOAD_DIR")?.into(),
                nodes: f.integer("NODES")?,
                ntasks: f.integer("NTASKS")?,
                memory: f.required("MEMORY")?,
                time: f.required("TIME")?,
                account: f.required("ACCOUNT")?,
                partition: f.required("PARTITION")?,
                qos: f.optional("QOS"),
                gpu_resources: f.optional("GPU_RESOURCES"),
                ngpu: f.optional_integer("NGPU")?,
                job_id: f.optional_integer("JOB_ID")?,
            }))
        }
        SectionKind::Database => {
            let mut f = Fields::new(raw, DATABASE_KEYS)?;
            Ok(Section::Database(DatabaseConfig {
                database_path: f.required("DATABASE_PATH")?.into(),
            }))
        }
        SectionKind::Topol => {
            let mut f = Fields::new(raw, TOPOL_KEYS)?;
            Ok(Section::Topol(TopolConfig {
                index: f.index()?,
                name: f.required("NAME")?,
                ff: f.required("FF")?,
                number: f.integer("NUMBER")?,
                file: f.required("FILE")?.into(),
                structure: None,
            }))
        }
        SectionKind::Run => {
            let mut f = Fields::new(raw, RUN_KEYS)?;
            Ok(Section::Run(RunConfig {
                index: f.index()?,
                sim_type: f.required("SIM_TYPE")?,
                nruns: f.integer("NRUNS")?,
                config_file: f.required("CONFIG_FILE")?.into(),
                start_coordinates_file: f.required("START_COORDINATES_FILE")?.into(),
                start_coordinates: None,
            }))
        }
    }
}

struct Fields {
    section: String,
    values: BTreeMap<String, String>,
}

impl Fields {
    fn new(raw: RawSection, allowed: &[&str]) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for entry in raw.entries {
            if !allowed.contains(&entry.key.as_str()) {
                return Err(ConfigError::UnknownKey {
                    section: raw.name,
                    key: entry.key,
                });
            }
            if values.contains_key(&entry.key) {
                return Err(ConfigError::DuplicateKey {
                    section: raw.name,
                    key: entry.key,
                });
            }
            values.insert(entry.key, entry.value);
        }
        Ok(Self {
            section: raw.name,
            values,
        })
    }

    fn optional(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    fn required(&mut self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or_else(|| ConfigError::MissingField {
            section: self.section.clone(),
            field: key,
        })
    }

    fn parsed<T: FromStr<Err = String>>(&mut self, key: &'static str) -> Result<T, ConfigError> {
        let value = self.required(key)?;
        value.parse().map_err(|reason| ConfigError::InvalidValue {
            section: self.section.clone(),
            key: key.to_string(),
            value,
            reason,
        })
    }

    fn integer<T: FromStr>(&mut self, key: &'static str) -> Result<T, ConfigError> {
        let value = self.required(key)?;
        self.to_integer(key, value)
    }

    fn optional_integer<T: FromStr>(&mut self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.optional(key) {
            Some(value) => self.to_integer(key, value).map(Some),
            None => Ok(None),
        }
    }

    fn to_integer<T: FromStr>(&self, key: &str, value: String) -> Result<T, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            section: self.section.clone(),
            key: key.to_string(),
            value: value.clone(),
            reason: reason.to_string(),
        };
        if !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("expected a non-negative integer"));
        }
        value.parse().map_err(|_| invalid("integer out of range"))
    }

    /// `INDEX` when given, otherwise the digits embedded in the section name.
    fn index(&mut self) -> Result<u32, ConfigError> {
        if let Some(index) = self.optional_integer("INDEX")? {
            return Ok(index);
        }
        let digits: String = self
            .section
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits
            .parse()
            .map_err(|_| ConfigError::IndexNotDerivable {
                section: self.section.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn topol(name: &str, body: &str) -> String {
        format!("{{ {}\n{}\n}}\n", name, body)
    }

    const TOPOL_BODY: &str = "NAME = water\nFF = tip3p\nNUMBER = 10\nFILE = water.top";

    #[test]
    fn every_section_becomes_one_record() {
        let text = format!(
            "; campaign\n{}{}{}{}",
            topol("TOPOL1", TOPOL_BODY),
            topol("TOPOL2", TOPOL_BODY),
            "{ DATABASE\n DATABASE_PATH = db.csv\n}\n",
            "{ RUNMD1\n SIM_TYPE = nvt\n NRUNS = 2\n CONFIG_FILE = nvt.mdp\n START_COORDINATES_FILE = start.gro\n}\n",
        );

        let sections = parse_sections(&text).unwrap();

        assert_eq!(sections.len(), 4);
        let kinds: Vec<_> = sections.iter().map(|s| s.section.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Topol,
                SectionKind::Topol,
                SectionKind::Database,
                SectionKind::Run
            ]
        );
    }

    #[test]
    fn unknown_section_prefix_is_named_in_the_error() {
        let err = parse_sections("{ FORCEFIELD\n NAME = x\n}\n").unwrap_err();
        match err {
            ConfigError::UnknownSection { line, name } => {
                assert_eq!(line, 1);
                assert_eq!(name, "FORCEFIELD");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn index_is_derived_from_section_name_digits() {
        let sections = parse_sections(&topol("topol12", TOPOL_BODY)).unwrap();
        match &sections[0].section {
            Section::Topol(t) => {
                assert_eq!(t.index, 12);
                assert_eq!(t.number, 10);
                assert_eq!(t.file, PathBuf::from("water.top"));
            }
            other => panic!("unexpected section: {other:?}"),
        }
        assert_eq!(sections[0].name, "TOPOL12");
    }

    #[test]
    fn explicit_index_wins_over_section_name() {
        let body = format!("INDEX = 7\n{}", TOPOL_BODY);
        let sections = parse_sections(&topol("TOPOL1", &body)).unwrap();
        assert!(matches!(&sections[0].section, Section::Topol(t) if t.index == 7));
    }

    #[test]
    fn missing_index_without_digits_is_an_error() {
        let err = parse_sections(&topol("TOPOL", TOPOL_BODY)).unwrap_err();
        assert!(matches!(err, ConfigError::IndexNotDerivable { .. }));
    }

    #[test]
    fn whitespace_separated_pairs_and_trailing_tokens_are_accepted() {
        let text = "{ RUNMD3\n sim_type   prod  ; production\n NRUNS 4 extra\n CONFIG_FILE=prod.in\n START_POSITIONS_FILE = 0-eq.rst7\n}\n";
        let sections = parse_sections(text).unwrap();
        match &sections[0].section {
            Section::Run(run) => {
                assert_eq!(run.index, 3);
                assert_eq!(run.sim_type, "prod");
                assert_eq!(run.nruns, 4);
                assert_eq!(run.config_file, PathBuf::from("prod.in"));
                assert_eq!(run.start_coordinates_file, PathBuf::from("0-eq.rst7"));
            }
            other => panic!("unexpected section: {other:?}"),
        }
    }

    #[test]
    fn legacy_slurm_spellings_are_accepted() {
        let text = "{ SLURM\n REMOTE_ADRESS = me@cluster\n REMOTE_DIR = /home/me/MD\n LUSTRE_DIR = /lustre/me\n DOWNLOAD_DIR = /data/dl\n NODES = 1\n NTASKS = 8\n MEMORY = 4GB\n TIME = 24:00:00\n ACCOUNT = grant\n PARTITION = tesla\n PID = 4242\n}\n";
        let sections = parse_sections(text).unwrap();
        match &sections[0].section {
            Section::Slurm(slurm) => {
                assert_eq!(slurm.remote_address, "me@cluster");
                assert_eq!(slurm.storage_dir, PathBuf::from("/lustre/me"));
                assert_eq!(slurm.job_id, Some(4242));
                assert_eq!(slurm.ngpu, None);
            }
            other => panic!("unexpected section: {other:?}"),
        }
    }

    #[rstest]
    #[case::unknown_key("{ DATABASE\n DATABASE_PATH = a.csv\n COLOR = red\n}\n")]
    #[case::missing_field("{ DATABASE\n}\n")]
    #[case::duplicate_section("{ DATABASE\n DATABASE_PATH = a\n}\n{ DATABASE\n DATABASE_PATH = b\n}\n")]
    #[case::duplicate_key("{ DATABASE\n DATABASE_PATH = a\n DATABASE_PATH = b\n}\n")]
    #[case::nested("{ DATABASE\n{ SLURM\n}\n")]
    #[case::unterminated("{ DATABASE\n DATABASE_PATH = a\n")]
    #[case::stray_entry("DATABASE_PATH = a\n")]
    #[case::stray_close("}\n")]
    #[case::missing_value("{ DATABASE\n DATABASE_PATH\n}\n")]
    #[case::not_an_integer(&topol("TOPOL1", "NAME = a\nFF = b\nNUMBER = ten\nFILE = a.top"))]
    #[case::negative_integer(&topol("TOPOL1", "NAME = a\nFF = b\nNUMBER = -1\nFILE = a.top"))]
    #[case::unknown_engine("{ ENVIRONMENT\n SOFTWARE = namd\n BASENAME = a\n PROJECT_NAME = b\n RESOURCE = cpu\n CPUS_PER_TASK = 1\n}\n")]
    fn malformed_input_is_rejected(#[case] text: &str) {
        assert!(parse_sections(text).is_err());
    }

    #[test]
    fn unknown_key_is_reported_before_missing_fields() {
        let err = parse_sections("{ TOPOL1\n COLOR = red\n}\n").unwrap_err();
        match err {
            ConfigError::UnknownKey { section, key } => {
                assert_eq!(section, "TOPOL1");
                assert_eq!(key, "COLOR");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn comments_and_blank_lines_inside_sections_are_skipped() {
        let text = "{ DATABASE\n\n ; where the ledger lives\n DATABASE_PATH = ledger.csv\n}\n";
        let sections = parse_sections(text).unwrap();
        assert_eq!(sections.len(), 1);
    }
}
