//! Shared fakes for unit tests.

use crate::core::config::{
    CampaignConfig, DatabaseConfig, EnvironmentConfig, Resource, RunConfig, SlurmConfig, Software,
    TopolConfig,
};
use crate::core::remote::{CommandOutput, RemoteError, RemoteShell};
use crate::core::structure::{
    Component, Coordinates, Residue, SimulationBox, Structure, StructureError, StructureIo,
};
use crate::engine::context::MdContext;
use nalgebra::Point3;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Default)]
struct ShellState {
    calls: Vec<String>,
    replies: Vec<(String, VecDeque<(i32, String)>)>,
    served: Vec<(String, String, String)>,
}

/// Scripted remote shell. Clones share state, so a test keeps one handle for
/// inspection while the context owns another.
#[derive(Clone, Default)]
pub(crate) struct FakeShell {
    state: Rc<RefCell<ShellState>>,
}

impl FakeShell {
    /// Queues a reply for the next command containing `pattern`. The last queued
    /// reply for a pattern is repeated once the queue runs dry.
    pub fn reply(&self, pattern: &str, code: i32, stdout: &str) -> &Self {
        let mut state = self.state.borrow_mut();
        let reply = (code, stdout.to_string());
        match state.replies.iter_mut().find(|(p, _)| p == pattern) {
            Some((_, queue)) => queue.push_back(reply),
            None => state
                .replies
                .push((pattern.to_string(), VecDeque::from([reply]))),
        }
        self
    }

    /// Materializes `name` with `content` in the local target of any download whose
    /// remote path contains `pattern`.
    pub fn serve(&self, pattern: &str, name: &str, content: &str) -> &Self {
        self.state.borrow_mut().served.push((
            pattern.to_string(),
            name.to_string(),
            content.to_string(),
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    fn respond(&self, command: String) -> CommandOutput {
        let mut state = self.state.borrow_mut();
        state.calls.push(command.clone());
        let (code, stdout) = state
            .replies
            .iter_mut()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .and_then(|(_, queue)| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
            .unwrap_or((0, String::new()));
        CommandOutput {
            command,
            code,
            stdout,
            stderr: if code == 0 { String::new() } else { "scripted failure".to_string() },
        }
    }
}

impl RemoteShell for FakeShell {
    fn address(&self) -> &str {
        "user@cluster"
    }

    fn run_remote(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        Ok(self.respond(command.to_string()))
    }

    fn run_local(&self, program: &str, args: &[String]) -> Result<CommandOutput, RemoteError> {
        Ok(self.respond(format!("{} {}", program, args.join(" "))))
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<CommandOutput, RemoteError> {
        Ok(self.respond(format!("upload {} {}", local.display(), remote)))
    }

    fn download(&self, remote: &str, local: &Path) -> Result<CommandOutput, RemoteError> {
        let served: Vec<_> = self
            .state
            .borrow()
            .served
            .iter()
            .filter(|(pattern, _, _)| remote.contains(pattern.as_str()))
            .map(|(_, name, content)| (name.clone(), content.clone()))
            .collect();
        for (name, content) in served {
            std::fs::write(local.join(name), content).map_err(|source| RemoteError::Spawn {
                program: "download".to_string(),
                source,
            })?;
        }
        Ok(self.respond(format!("download {} {}", remote, local.display())))
    }
}

/// Structure I/O that invents one residue per topology file, named after its stem.
pub(crate) struct FakeStructureIo;

impl StructureIo for FakeStructureIo {
    fn read_topology(&self, path: &Path) -> Result<Structure, StructureError> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        Ok(Structure {
            residues: vec![Residue {
                name: name.clone(),
                atoms: vec!["C1".into(), "C2".into()],
            }],
            components: vec![Component {
                name,
                source: path.to_path_buf(),
                copies: 1,
            }],
            coordinates: None,
        })
    }

    fn read_coordinates(&self, path: &Path) -> Result<Coordinates, StructureError> {
        if !path.exists() {
            return Err(StructureError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(Coordinates {
            positions: vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.5, 0.0, 0.0)],
            cell: Some(SimulationBox::rectangular(30.0, 30.0, 30.0)),
        })
    }

    fn write_parameters(&self, structure: &Structure, path: &Path) -> Result<(), StructureError> {
        let names: Vec<_> = structure.components.iter().map(|c| c.name.as_str()).collect();
        std::fs::write(path, names.join("\n")).map_err(|source| StructureError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_coordinates(&self, structure: &Structure, path: &Path) -> Result<(), StructureError> {
        let coordinates = structure
            .coordinates
            .as_ref()
            .ok_or(StructureError::MissingCoordinates)?;
        std::fs::write(path, format!("{}\n", coordinates.positions.len())).map_err(|source| {
            StructureError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

/// Campaign in `root` with one topology and two chained stages; inputs are created.
pub(crate) fn campaign(root: &Path, software: Software) -> CampaignConfig {
    let (top, crd, first, second) = match software {
        Software::Amber => ("lig.parm7", "lig.rst7", "min.in", "nvt.in"),
        Software::Gromacs => ("lig.top", "lig.gro", "min.mdp", "nvt.mdp"),
    };
    std::fs::write(root.join(top), "topology").unwrap();
    std::fs::write(root.join(crd), "coordinates").unwrap();
    std::fs::write(root.join(first), "nsteps = 100\nref_t = 300\ntau_t = 0.1\n").unwrap();
    std::fs::write(root.join(second), "nsteps = 200\nref_t = 300\ntau_t = 0.1\n").unwrap();

    CampaignConfig {
        environment: EnvironmentConfig {
            software,
            basename: "demo".into(),
            project_name: "demo".into(),
            resource: Resource::Cpu,
            cpus_per_task: 4,
            root: Some(root.to_path_buf()),
            param_dir: None,
            data_dir: None,
        },
        database: DatabaseConfig {
            database_path: PathBuf::from("ledger.csv"),
        },
        topologies: vec![TopolConfig {
            index: 1,
            name: "ligand".into(),
            ff: "gaff2".into(),
            number: 1,
            file: PathBuf::from(top),
            structure: None,
        }],
        runs: vec![
            RunConfig {
                index: 1,
                sim_type: "min".into(),
                nruns: 1,
                config_file: PathBuf::from(first),
                start_coordinates_file: PathBuf::from(crd),
                start_coordinates: None,
            },
            RunConfig {
                index: 2,
                sim_type: "nvt".into(),
                nruns: 1,
                config_file: PathBuf::from(second),
                start_coordinates_file: PathBuf::from(format!(
                    "0-min.{}",
                    software.coordinates_extension()
                )),
                start_coordinates: None,
            },
        ],
        slurm: None,
    }
}

pub(crate) fn slurm_config(root: &Path) -> SlurmConfig {
    SlurmConfig {
        remote_address: "user@cluster".into(),
        remote_dir: PathBuf::from("/home/user/MD"),
        storage_dir: PathBuf::from("/lustre/user"),
        download_dir: root.join("downloads"),
        nodes: 1,
        ntasks: 8,
        memory: "4GB".into(),
        time: "24:00:00".into(),
        account: "grant42".into(),
        partition: "tesla".into(),
        qos: None,
        gpu_resources: None,
        ngpu: None,
        job_id: None,
    }
}

pub(crate) fn local_context(root: &Path, software: Software) -> MdContext {
    MdContext::builder(campaign(root, software))
        .structure_io(Box::new(FakeStructureIo))
        .build()
        .unwrap()
}

pub(crate) fn remote_context(root: &Path, software: Software, shell: &FakeShell) -> MdContext {
    let mut config = campaign(root, software);
    config.slurm = Some(slurm_config(root));
    MdContext::builder(config)
        .structure_io(Box::new(FakeStructureIo))
        .remote(Box::new(shell.clone()))
        .build()
        .unwrap()
}
