use crate::core::ledger::{Column, LedgerRecord, Stage};
use crate::core::remote::{CommandOutput, RemoteError, parse_submitted_job_id};
use crate::engine::context::{MdContext, file_name};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::steps::scripts::MD_SLURM;
use tracing::{debug, info, instrument, warn};

fn checked(output: Result<CommandOutput, RemoteError>) -> Result<CommandOutput, EngineError> {
    let output = output?;
    debug!("'{}' exited with {}", output.command, output.code);
    if output.success() {
        Ok(output)
    } else {
        Err(EngineError::TransportFailed {
            command: output.command,
            code: output.code,
            attempts: 1,
            stderr: output.stderr,
        })
    }
}

/// Packs the staged inputs, copies them to `<remote dir>/<project>` and submits
/// `md.slurm` there. The new job id is kept on the context and written to the
/// project's unfinished ledger rows.
#[instrument(skip_all, name = "submit")]
pub fn submit(ctx: &mut MdContext, reporter: &ProgressReporter) -> Result<u64, EngineError> {
    reporter.report(Progress::PhaseStart { name: "Submission" });

    let env = ctx.environment();
    let slurm = ctx.require_slurm()?;
    let project = env.project_name().to_string();
    let data_dir = env.data_dir();
    let remote = slurm.remote_data_dir(&project);

    let mut files = vec![format!(
        "{}.{}",
        env.basename(),
        env.software().topology_extension()
    )];
    for run in ctx.simulation().runs() {
        let coordinates = file_name(&run.start_coordinates_file);
        if data_dir.join(&coordinates).is_file() && !files.contains(&coordinates) {
            files.push(coordinates);
        }
    }
    for run in ctx.simulation().runs() {
        let config = file_name(&run.config_file);
        if !files.contains(&config) {
            files.push(config);
        }
    }
    files.push(MD_SLURM.to_string());
    debug!("Submitting files: {:?}", files);

    let archive_name = format!("{}.tar", env.basename());
    let archive = data_dir.join(&archive_name);
    let mut args = vec![
        "cfv".to_string(),
        archive.display().to_string(),
        "-C".to_string(),
        data_dir.display().to_string(),
    ];
    args.extend(files);

    let shell = slurm.shell();
    checked(shell.run_remote(&format!("mkdir -p {remote}")))?;
    checked(shell.run_local("tar", &args))?;
    checked(shell.upload(&archive, &format!("{remote}/")))?;
    checked(shell.run_remote(&format!("tar xfv {remote}/{archive_name} -C {remote}")))?;
    let output = checked(shell.run_remote(&format!(
        "cd {remote} && {} {MD_SLURM}",
        ctx.site().sbatch
    )))?;

    let job_id = parse_submitted_job_id(&output.stdout)
        .ok_or_else(|| EngineError::NoJobId(project.clone()))?;
    info!("Submitted batch job {}", job_id);

    ctx.require_slurm_mut()?.set_job_id(job_id);
    let query = ctx.project_query().with(Column::Stage, Stage::Unfinished.as_str());
    ctx.modify_entry((Column::JobId, &job_id.to_string()), &query)?;

    reporter.report(Progress::PhaseFinish);
    Ok(job_id)
}

/// The job id of the project's latest submission: the highest one in the ledger, or
/// failing that, the newest Slurm output file on the cluster mentioning the project.
#[instrument(skip_all, name = "find_job_id")]
pub fn find_job_id(ctx: &mut MdContext) -> Result<u64, EngineError> {
    let project = ctx.environment().project_name().to_string();
    let rows = ctx.project_entries()?;

    let job_id = match rows.iter().filter_map(|(_, r)| r.job_id).max() {
        Some(job_id) => {
            debug!("Job id {} found in the ledger", job_id);
            job_id
        }
        None => {
            warn!("No job id in the ledger; searching Slurm output files.");
            let command = format!(
                "grep -m 1 {project} {}/slurm-* | grep -oP '(?<=slurm-)\\d+'",
                ctx.site().slurm_log_dir
            );
            let output = ctx.require_slurm()?.shell().run_remote(&command)?;
            output
                .stdout
                .lines()
                .filter_map(|line| line.trim().parse::<u64>().ok())
                .last()
                .filter(|_| output.success())
                .ok_or_else(|| EngineError::NoJobId(project.clone()))?
        }
    };

    ctx.require_slurm_mut()?.set_job_id(job_id);
    let query = ctx.project_query();
    ctx.modify_entry((Column::JobId, &job_id.to_string()), &query)?;
    Ok(job_id)
}

/// Copies the engine logs from the remote data directory into the local one.
///
/// A failed copy is only logged: before the first stage writes output there is
/// nothing to fetch.
pub fn download_logs(ctx: &MdContext) -> Result<(), EngineError> {
    let env = ctx.environment();
    let slurm = ctx.require_slurm()?;
    let pattern = format!(
        "{}/*.{}",
        slurm.remote_data_dir(env.project_name()),
        env.software().log_extension()
    );
    info!("Downloading logs from {}", pattern);

    let output = slurm.shell().download(&pattern, env.data_dir())?;
    if !output.success() {
        warn!("Log download failed ({}): {}", output.code, output.stderr.trim());
    }
    Ok(())
}

/// Fetches the archives of `Finished` simulations from storage into the download
/// directory, marks them `DOWNLOADED`, unpacks them and removes the archives.
#[instrument(skip_all, name = "download_finished")]
pub fn download_finished(ctx: &mut MdContext) -> Result<Vec<LedgerRecord>, EngineError> {
    let finished = ctx.find_finished()?;
    if finished.is_empty() {
        info!("No finished simulations to download.");
        return Ok(Vec::new());
    }

    let names: Vec<&str> = finished
        .iter()
        .map(|(_, r)| r.simulation_name.as_str())
        .collect();
    let archives = match names.as_slice() {
        [single] => format!("{single}.sim.tar"),
        many => format!("{{{}}}.sim.tar", many.join(",")),
    };

    let slurm = ctx.require_slurm()?;
    let download_dir = slurm.config().download_dir.clone();
    let remote = format!(
        "{}/{}",
        slurm.storage_data_dir(ctx.environment().project_name()),
        archives
    );
    info!("Downloading {} archive(s) from {}", names.len(), remote);
    checked(slurm.shell().download(&remote, &download_dir))?;

    for name in &names {
        let archive = download_dir.join(format!("{name}.sim.tar"));
        let args = vec![
            "xfv".to_string(),
            archive.display().to_string(),
            "-C".to_string(),
            download_dir.display().to_string(),
        ];
        checked(slurm.shell().run_local("tar", &args))?;
        if archive.exists() {
            std::fs::remove_file(&archive).map_err(EngineError::io(&archive))?;
        }
    }

    for name in names {
        let query = ctx.project_query().with(Column::SimulationName, name);
        ctx.modify_entry((Column::Stage, Stage::Downloaded.as_str()), &query)?;
    }
    Ok(finished.into_iter().map(|(_, record)| record).collect())
}
