//! Turning a validated experiment into an epoch of job files.
//!
//! All expansion, queue lookup and link checks happen in memory first; the
//! epoch directories are only created once every job has been rendered.

use crate::epoch::new_epoch_id;
use crate::error::{SweepError, SweepResult};
use crate::expand::{expand, JobSpec, ResultMetadata};
use crate::experiment::Experiment;
use crate::layout::{atomic_write_bytes, ensure_dir, Layout, Marker};
use crate::machine::{JobScript, Machine};
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TRIAL_VAR: &str = "SWEEP_TRIAL_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generated {
    pub epoch: String,
    pub jobs: usize,
    pub commands: usize,
}

/// Host description written next to the job files.
#[derive(Debug, Clone, Serialize)]
struct MachineRecord {
    machine: String,
    hostname: String,
    os: &'static str,
    arch: &'static str,
    generated_at: DateTime<Utc>,
}

struct PlannedJob {
    file: PathBuf,
    contents: String,
    workspace: Option<PathBuf>,
    metadata: Vec<(PathBuf, ResultMetadata)>,
}

fn shell_value(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.contains(' ') {
        format!("\"{}\"", text)
    } else {
        text
    }
}

/// Shell body shared by every machine template.
fn script_body(
    layout: &Layout,
    exp: &Experiment,
    epoch: &str,
    job: &JobSpec,
    cmd_ids: &[(String, String)],
    workdir: &Path,
) -> String {
    let mut body = String::new();
    for (key, value) in &exp.env {
        body.push_str(&format!("export {}={}\n", key, value));
    }
    for (key, value) in job.args.iter().chain(job.weak.iter()) {
        body.push_str(&format!("{}={}\n", key, shell_value(value)));
    }
    body.push_str(&format!("export {}={}\n", exp.depthvar, job.depth));
    body.push_str(&format!("\ncd {}\n", workdir.display()));
    body.push_str(&format!(
        "\nfor {} in $(seq 0 {})\ndo\n",
        TRIAL_VAR,
        exp.trials - 1
    ));
    for (cmd_id, command) in cmd_ids {
        let result = layout.result_file(epoch, cmd_id);
        body.push_str(&format!(
            "  touch {}\n",
            layout.marker_file(epoch, Marker::Started, cmd_id).display()
        ));
        body.push_str(&format!("  $MPIRUN {} >> {} 2>&1\n", command, result.display()));
        body.push_str("  SWEEP_STATUS=$?\n");
        body.push_str("  if [ $SWEEP_STATUS -eq 0 ]; then\n");
        body.push_str(&format!(
            "    touch {}\n",
            layout.marker_file(epoch, Marker::Done, cmd_id).display()
        ));
        body.push_str("  else\n");
        body.push_str(&format!(
            "    touch {}\n",
            layout.marker_file(epoch, Marker::Failed, cmd_id).display()
        ));
        body.push_str("  fi\n");
    }
    body.push_str("done\n");
    if let Some(epilogue) = &exp.epilogue {
        body.push('\n');
        body.push_str(epilogue);
        if !epilogue.ends_with('\n') {
            body.push('\n');
        }
    }
    body
}

fn check_links(layout: &Layout, exp: &Experiment) -> SweepResult<()> {
    for link in exp.workspace_links.iter().flatten() {
        let source = layout.build(link);
        if !source.exists() {
            return Err(SweepError::Validation(format!(
                "creating a link in a workspace for a non-existent file {}",
                link
            )));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

fn setup_workspace(layout: &Layout, exp: &Experiment, dir: &Path) -> SweepResult<()> {
    ensure_dir(dir)?;
    for link in exp.workspace_links.iter().flatten() {
        let dst = dir.join(link);
        if let Some(parent) = dst.parent() {
            ensure_dir(parent)?;
        }
        symlink(&layout.build(link), &dst).map_err(|e| SweepError::io(&dst, e))?;
    }
    let back = dir.join("experiments");
    symlink(&layout.experiments_root(), &back).map_err(|e| SweepError::io(&back, e))
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn plan_jobs(
    layout: &Layout,
    exp: &Experiment,
    machine: &dyn Machine,
    epoch: &str,
) -> SweepResult<Vec<PlannedJob>> {
    let specs = expand(exp)?;
    check_links(layout, exp)?;
    let mut planned = Vec::with_capacity(specs.len());
    for job in &specs {
        let file = layout.job_file(epoch, &job.name);
        let workspace = exp
            .workspace_links
            .as_ref()
            .map(|_| layout.workspace_dir(epoch, &job.name));
        let workdir = workspace.clone().unwrap_or_else(|| layout.base().to_path_buf());

        let instances = job.instances(exp);
        let cmd_ids: Vec<(String, String)> = instances
            .iter()
            .map(|i| (i.cmd_id.clone(), i.command.clone()))
            .collect();
        let job_display = file
            .strip_prefix(layout.base())
            .unwrap_or(&file)
            .display()
            .to_string();
        let metadata = instances
            .iter()
            .map(|i| (layout.metadata_file(epoch, &i.cmd_id), job.metadata(i, &job_display)))
            .collect();

        let script = JobScript {
            name: job.name.clone(),
            width: job.p * job.depth,
            p: job.p,
            depth: job.depth,
            wall: exp.wall.clone(),
            epoch: epoch.to_string(),
            body: script_body(layout, exp, epoch, job, &cmd_ids, &workdir),
            queue: job.queue.clone(),
            cwd: layout.base().to_path_buf(),
            raw_headers: exp.raw_headers.clone(),
            run_flags: exp.run_flags.clone(),
        };
        planned.push(PlannedJob {
            file,
            contents: machine.render(&script),
            workspace,
            metadata,
        });
    }
    Ok(planned)
}

/// Generate a new epoch for `exp` stamped with `now`.
pub fn generate(
    layout: &Layout,
    exp: &Experiment,
    machine: &dyn Machine,
    now: DateTime<Local>,
) -> SweepResult<Generated> {
    layout.ensure_initialized()?;
    let epoch = new_epoch_id(&now);
    if layout.jobs_dir(&epoch).exists() {
        return Err(SweepError::EpochExists(epoch));
    }

    let planned = plan_jobs(layout, exp, machine, &epoch)?;

    for dir in layout.epoch_dirs(&epoch) {
        ensure_dir(&dir)?;
    }
    let mut commands = 0;
    for job in &planned {
        if let Some(dir) = &job.workspace {
            setup_workspace(layout, exp, dir)?;
        }
        atomic_write_bytes(&job.file, job.contents.as_bytes())?;
        for (path, md) in &job.metadata {
            atomic_write_bytes(path, serde_yaml::to_string(md)?.as_bytes())?;
            commands += 1;
        }
    }
    atomic_write_bytes(
        &layout.run_file(&epoch),
        serde_yaml::to_string(&exp.file)?.as_bytes(),
    )?;
    let record = MachineRecord {
        machine: machine.name().to_string(),
        hostname: hostname(),
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        generated_at: now.with_timezone(&Utc),
    };
    atomic_write_bytes(
        &layout.machine_file(&epoch),
        serde_yaml::to_string(&record)?.as_bytes(),
    )?;

    info!(epoch = %epoch, jobs = planned.len(), commands, "generated epoch");
    Ok(Generated {
        epoch,
        jobs: planned.len(),
        commands,
    })
}
