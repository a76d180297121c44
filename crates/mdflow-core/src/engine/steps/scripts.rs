use crate::core::config::{Resource, Software};
use crate::engine::context::{MdContext, file_name};
use crate::engine::error::EngineError;
use crate::engine::pipeline::{Flow, Step};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Local run script, one block per simulation.
pub const MD_RUN: &str = "md.run";
/// Batch script wrapping `md.run` for Slurm.
pub const MD_SLURM: &str = "md.slurm";

/// File names one simulation block refers to. Every command runs inside the data
/// directory (or its scratch copy), so only bare names appear in scripts.
struct BlockInputs<'a> {
    simulation: &'a str,
    config: &'a str,
    topology: &'a str,
    coordinates: &'a str,
}

fn render_block(
    software: Software,
    resource: Resource,
    ntasks: u32,
    cpus_per_task: u32,
    inputs: &BlockInputs,
) -> String {
    let BlockInputs {
        simulation: name,
        config,
        topology,
        coordinates,
    } = inputs;
    let mut block = String::new();

    match software {
        Software::Amber => {
            let program = match resource {
                Resource::Cpu => format!("mpirun -np {ntasks} pmemd.MPI"),
                Resource::Gpu => "pmemd.cuda.MPI".to_string(),
            };
            block.push_str(&format!(
                "{program} -O -i {config} -p {topology} -c {coordinates} \
                 -r {name}.rst7 -x {name}.nc -v {name}.vel -e {name}.ene \
                 -inf {name}.info -l {name}.mdlog -o {name}.mdout\n"
            ));
        }
        Software::Gromacs => {
            block.push_str(&format!(
                "gmx grompp -f {config} -p {topology} -c {coordinates} -o {name}.tpr\n"
            ));
            block.push_str(&format!(
                "gmx mdrun -deffnm {name} -ntmpi 1 -ntomp {cpus_per_task}\n"
            ));
        }
    }
    block.push_str(&format!(
        "tar cfv {name}.sim.tar {name}.* {config} {topology} {coordinates}\n"
    ));
    block
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path).map_err(EngineError::io(path))?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).map_err(EngineError::io(path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), EngineError> {
    Ok(())
}

/// Appends the commands of repetition `number` of the current run to `md.run`.
///
/// Unless `rerun` is set, the simulation `<number>-<sim_type>` is also recorded in the
/// ledger as `Unfinished` (reusing its index when it is already there).
pub struct RunMd {
    number: u32,
    rerun: bool,
    name: String,
}

impl RunMd {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            rerun: false,
            name: format!("RunMd({number})"),
        }
    }

    /// A block for a simulation that already has a ledger row.
    pub fn rerun(number: u32) -> Self {
        Self {
            rerun: true,
            ..Self::new(number)
        }
    }
}

impl Step<MdContext> for RunMd {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let run = ctx.current_run()?;
        let topol = ctx.current_topol()?;
        let simulation = format!("{}-{}", self.number, run.sim_type);
        let config = file_name(&run.config_file);
        let topology = file_name(&topol.file);
        let coordinates = file_name(&run.start_coordinates_file);

        let env = ctx.environment().config();
        let ntasks = ctx
            .slurm()
            .map(|slurm| slurm.config().ntasks)
            .unwrap_or(env.cpus_per_task);
        let block = render_block(
            env.software,
            env.resource,
            ntasks,
            env.cpus_per_task,
            &BlockInputs {
                simulation: &simulation,
                config: &config,
                topology: &topology,
                coordinates: &coordinates,
            },
        );

        if !self.rerun {
            let index = ctx.find_index(&simulation)?;
            ctx.add_entry(index, &simulation)?;
        }

        let path = ctx.environment().data_dir().join(MD_RUN);
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(EngineError::io(&path))?;
        if is_new {
            file.write_all(b"#!/bin/bash\n").map_err(EngineError::io(&path))?;
        }
        file.write_all(block.as_bytes()).map_err(EngineError::io(&path))?;
        make_executable(&path)?;

        info!("Prepared simulation {}", simulation);
        debug!("Appended to {:?}:\n{}", path, block);
        Ok(Flow::Continue)
    }
}

/// Writes `md.slurm`: the batch directives, environment setup, a copy of the remote
/// data directory into scratch space, and the `md.run` blocks. After every archive
/// command the archive is moved to long-term storage and the engine log is copied back
/// to the remote data directory, where the polling loop picks it up.
pub struct RunSlurm;

impl Step<MdContext> for RunSlurm {
    fn name(&self) -> &str {
        "RunSlurm"
    }

    fn run(&mut self, ctx: &mut MdContext) -> Result<Flow, EngineError> {
        let slurm = ctx.require_slurm()?;
        let env = ctx.environment();
        let cfg = slurm.config();
        let env_cfg = env.config();
        let project = env.project_name();
        let storage = slurm.storage_data_dir(project);
        let remote = slurm.remote_data_dir(project);
        let module = ctx.site().module_load(env_cfg.software, env_cfg.resource)?;

        let mut script = String::from("#!/bin/bash\n");
        script.push_str(&format!("#SBATCH --nodes={}\n", cfg.nodes));
        script.push_str(&format!("#SBATCH --cpus-per-task={}\n", env_cfg.cpus_per_task));
        script.push_str(&format!("#SBATCH --ntasks={}\n", cfg.ntasks));
        script.push_str(&format!("#SBATCH --mem={}\n", cfg.memory));
        script.push_str(&format!("#SBATCH --time={}\n", cfg.time));
        script.push_str(&format!("#SBATCH --job-name={}\n", env.basename()));
        script.push_str(&format!("#SBATCH --account={}\n", cfg.account));
        if env_cfg.resource == Resource::Gpu {
            script.push_str(&format!("#SBATCH --partition={}\n", cfg.partition));
            if let Some(qos) = &cfg.qos {
                script.push_str(&format!("#SBATCH --qos={}\n", qos));
            }
            if let Some(gres) = cfg.gres() {
                script.push_str(&format!("#SBATCH --gres={}\n", gres));
            }
        }
        script.push('\n');
        script.push_str(&format!("source {}\n", ctx.site().modules_init));
        script.push_str(&format!(
            "if [ ! -d {storage} ]; then\n    mkdir -p {storage}\nfi\n"
        ));
        script.push_str(module);
        script.push('\n');
        script.push_str(&format!("cp {remote}/* $TMPDIR/ -rf\n"));
        script.push_str("echo $TMPDIR\ncd $TMPDIR\n");

        let md_run = env.data_dir().join(MD_RUN);
        let commands = fs::read_to_string(&md_run).map_err(EngineError::io(&md_run))?;
        let log_ext = env_cfg.software.log_extension();
        for (number, line) in commands.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("#!") {
                continue;
            }
            script.push_str(line);
            script.push('\n');
            if trimmed.starts_with("tar") {
                let simulation = trimmed
                    .split_whitespace()
                    .nth(2)
                    .and_then(|archive| archive.split('.').next())
                    .ok_or_else(|| EngineError::MalformedLine {
                        path: md_run.clone(),
                        line: number + 1,
                        content: trimmed.to_string(),
                    })?;
                script.push_str(&format!("mv -v {simulation}.sim.tar {storage}/\n"));
                script.push_str(&format!("cp -v {simulation}.{log_ext} {remote}/\n"));
            }
        }

        let path = env.data_dir().join(MD_SLURM);
        env.make_duplicate(&path)?;
        fs::write(&path, script).map_err(EngineError::io(&path))?;
        make_executable(&path)?;

        info!("Slurm batch file created at {:?}", path);
        Ok(Flow::Continue)
    }
}
