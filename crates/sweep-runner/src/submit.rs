//! Handing job files to a scheduler, and taking them back.

use crate::error::{SweepError, SweepResult};
use crate::layout::{atomic_write_bytes, list_entries, Layout};
use crate::machine::Machine;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// One entry of `.submitted.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub file: String,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub dry_run: bool,
    pub force: bool,
    pub stagger: bool,
    pub batch: usize,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            stagger: false,
            batch: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCommand {
    pub batch: usize,
    pub argv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub epoch: String,
    pub dry_run: bool,
    pub commands: Vec<PlannedCommand>,
    pub submitted: Vec<SubmittedJob>,
}

/// Split sorted job files into dependency batches.
///
/// Without staggering everything goes out in one batch; with it, batch `k`
/// waits on batch `k - 1`.
pub fn plan_submission(job_files: &[PathBuf], stagger: bool, batch: usize) -> Vec<Vec<PathBuf>> {
    let mut files = job_files.to_vec();
    files.sort();
    if files.is_empty() {
        return Vec::new();
    }
    if !stagger {
        return vec![files];
    }
    files.chunks(batch.max(1)).map(<[PathBuf]>::to_vec).collect()
}

pub fn job_files(layout: &Layout, epoch: &str) -> SweepResult<Vec<PathBuf>> {
    let dir = layout.jobs_dir(epoch);
    Ok(list_entries(&dir)?
        .into_iter()
        .filter(|e| e.name.ends_with(".job"))
        .map(|e| dir.join(e.name))
        .collect())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn submission_argv(machine: &dyn Machine, depend: Option<String>, file: &Path) -> Vec<String> {
    let mut argv = vec![machine.submit_command().to_string()];
    if let Some(flag) = depend {
        argv.extend(flag.split_whitespace().map(str::to_string));
    }
    argv.push(file.display().to_string());
    argv
}

/// The machine reads the scheduler id from stdout; silent submitters are
/// identified by file name.
fn run_submission(machine: &dyn Machine, argv: &[String], file: &Path) -> SweepResult<String> {
    let output = Command::new(&argv[0])
        .args(&argv[1..])
        .output()
        .map_err(|e| SweepError::Submission(format!("cannot run {}: {}", argv[0], e)))?;
    if !output.status.success() {
        return Err(SweepError::Submission(format!(
            "{} exited with {} for {}: {}",
            argv[0],
            output.status,
            file.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(machine.job_id(&stdout).unwrap_or_else(|| file_name(file)))
}

fn write_record(layout: &Layout, epoch: &str, submitted: &[SubmittedJob]) -> SweepResult<()> {
    atomic_write_bytes(
        &layout.submitted_file(epoch),
        &serde_json::to_vec_pretty(submitted)?,
    )
}

pub fn read_record(layout: &Layout, epoch: &str) -> SweepResult<Vec<SubmittedJob>> {
    let path = layout.submitted_file(epoch);
    let bytes = fs::read(&path).map_err(|_| {
        SweepError::Validation(format!(
            "error reading job information file {}; epoch {} might not have been submitted",
            path.display(),
            epoch
        ))
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Submit every job file of `epoch` through `machine`.
pub fn submit_epoch(
    layout: &Layout,
    epoch: &str,
    machine: &dyn Machine,
    options: SubmitOptions,
) -> SweepResult<SubmitOutcome> {
    if layout.submitted_file(epoch).exists() && !options.force && !options.dry_run {
        return Err(SweepError::Validation(format!(
            "epoch {} was already submitted; use --force to submit again",
            epoch
        )));
    }
    let batches = plan_submission(&job_files(layout, epoch)?, options.stagger, options.batch);

    let mut commands = Vec::new();
    let mut submitted: Vec<SubmittedJob> = Vec::new();
    let mut previous: Vec<String> = Vec::new();
    for (idx, batch) in batches.iter().enumerate() {
        let depend = machine.depend_flag(&previous);
        if idx > 0 && depend.is_none() {
            debug!(machine = machine.name(), "machine has no dependency flag; batches run unordered");
        }
        let mut current = Vec::with_capacity(batch.len());
        for file in batch {
            let argv = submission_argv(machine, depend.clone(), file);
            commands.push(PlannedCommand {
                batch: idx,
                argv: argv.clone(),
            });
            if options.dry_run {
                current.push(format!("<{}>", file_name(file)));
                continue;
            }
            match run_submission(machine, &argv, file) {
                Ok(id) => {
                    debug!(file = %file.display(), id = %id, "submitted");
                    current.push(id.clone());
                    submitted.push(SubmittedJob {
                        file: file_name(file),
                        id,
                    });
                }
                Err(e) => {
                    if !submitted.is_empty() {
                        write_record(layout, epoch, &submitted)?;
                    }
                    return Err(e);
                }
            }
        }
        previous = current;
    }

    if !options.dry_run {
        write_record(layout, epoch, &submitted)?;
        info!(epoch, jobs = submitted.len(), "submitted epoch");
    }
    Ok(SubmitOutcome {
        epoch: epoch.to_string(),
        dry_run: options.dry_run,
        commands,
        submitted,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillOutcome {
    pub epoch: String,
    pub requested: usize,
    pub killed: usize,
}

/// Cancel every job recorded for `epoch`; returns how many cancellations succeeded.
pub fn kill_epoch(layout: &Layout, epoch: &str, machine: &dyn Machine) -> SweepResult<KillOutcome> {
    let kill = machine.kill_command().ok_or_else(|| {
        SweepError::Validation(format!("machine {} cannot cancel jobs", machine.name()))
    })?;
    let jobs = read_record(layout, epoch)?;
    let mut killed = 0;
    for job in &jobs {
        match Command::new(kill).arg(&job.id).output() {
            Ok(out) if out.status.success() => {
                info!(id = %job.id, "killed");
                killed += 1;
            }
            Ok(out) => warn!(
                id = %job.id,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "cannot kill job"
            ),
            Err(e) => warn!(id = %job.id, error = %e, "cannot run kill command"),
        }
    }
    Ok(KillOutcome {
        epoch: epoch.to_string(),
        requested: jobs.len(),
        killed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ensure_dir;
    use crate::machine::{DebugDump, JobScript, Slurm};
    use chrono::Utc;

    const EPOCH: &str = "20240101-000000";

    struct Fake;

    impl Machine for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        fn render(&self, job: &JobScript) -> String {
            job.body.clone()
        }

        fn submit_command(&self) -> &str {
            "/bin/true"
        }

        fn depend_flag(&self, prev_ids: &[String]) -> Option<String> {
            (!prev_ids.is_empty()).then(|| format!("--after {}", prev_ids.join(",")))
        }

        fn kill_command(&self) -> Option<&str> {
            Some("/bin/true")
        }
    }

    fn scratch(tag: &str, jobs: &[&str]) -> Layout {
        let root = std::env::temp_dir().join(format!(
            "sweep_submit_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let layout = Layout::at(root);
        ensure_dir(&layout.jobs_dir(EPOCH)).expect("mkdir");
        for job in jobs {
            fs::write(layout.job_file(EPOCH, job), "#!/bin/sh\n").expect("job");
        }
        fs::write(layout.run_file(EPOCH), "name: x\n").expect("run.yml");
        layout
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn staggering_chunks_sorted_files() {
        let files = paths(&["c.job", "a.job", "b.job", "d.job", "e.job"]);
        assert_eq!(plan_submission(&files, false, 2), vec![paths(&["a.job", "b.job", "c.job", "d.job", "e.job"])]);
        assert_eq!(
            plan_submission(&files, true, 2),
            vec![paths(&["a.job", "b.job"]), paths(&["c.job", "d.job"]), paths(&["e.job"])]
        );
        assert_eq!(plan_submission(&files, true, 0).len(), 5);
        assert!(plan_submission(&[], true, 3).is_empty());
    }

    #[test]
    fn dry_run_only_reports_commands() {
        let layout = scratch("dry", &["j-1", "j-2", "j-3"]);
        let options = SubmitOptions { dry_run: true, stagger: true, batch: 2, ..SubmitOptions::default() };
        let out = submit_epoch(&layout, EPOCH, &Fake, options).expect("dry run");
        assert_eq!(out.commands.len(), 3);
        assert!(out.submitted.is_empty());
        assert_eq!(out.commands[0].argv.len(), 2);
        assert_eq!(out.commands[2].batch, 1);
        assert_eq!(out.commands[2].argv[1], "--after");
        assert_eq!(out.commands[2].argv[2], "<j-1.job>,<j-2.job>");
        assert!(!layout.submitted_file(EPOCH).exists());
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn submission_is_recorded_and_not_repeated() {
        let layout = scratch("record", &["j-1", "j-2"]);
        let out = submit_epoch(&layout, EPOCH, &DebugDump, SubmitOptions::default()).expect("submit");
        assert_eq!(
            out.submitted,
            vec![
                SubmittedJob { file: "j-1.job".into(), id: "j-1.job".into() },
                SubmittedJob { file: "j-2.job".into(), id: "j-2.job".into() },
            ]
        );
        assert_eq!(read_record(&layout, EPOCH).expect("record"), out.submitted);

        let err = submit_epoch(&layout, EPOCH, &DebugDump, SubmitOptions::default()).expect_err("repeat");
        assert!(err.to_string().contains("--force"), "{}", err);
        let forced = SubmitOptions { force: true, ..SubmitOptions::default() };
        submit_epoch(&layout, EPOCH, &DebugDump, forced).expect("forced");
        let _ = fs::remove_dir_all(layout.base());
    }

    /// Slurm flags and id parsing around a stand-in `sbatch` script.
    struct FakeSbatch {
        program: String,
    }

    impl Machine for FakeSbatch {
        fn name(&self) -> &str {
            "fake-sbatch"
        }

        fn render(&self, job: &JobScript) -> String {
            Slurm.render(job)
        }

        fn submit_command(&self) -> &str {
            &self.program
        }

        fn depend_flag(&self, prev_ids: &[String]) -> Option<String> {
            Slurm.depend_flag(prev_ids)
        }

        fn job_id(&self, stdout: &str) -> Option<String> {
            Slurm.job_id(stdout)
        }
    }

    #[cfg(unix)]
    #[test]
    fn staggered_batches_depend_on_parsed_scheduler_ids() {
        use std::os::unix::fs::PermissionsExt;

        let layout = scratch("sbatch", &["j-1", "j-2", "j-3"]);
        let program = layout.base().join("sbatch");
        fs::write(
            &program,
            r#"#!/bin/sh
log="$(dirname "$0")/calls.log"
echo "$@" >> "$log"
n=$(wc -l < "$log")
echo "Submitted batch job $((100 + n))"
"#,
        )
        .expect("script");
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).expect("chmod");
        let machine = FakeSbatch {
            program: program.display().to_string(),
        };
        let options = SubmitOptions { stagger: true, batch: 2, ..SubmitOptions::default() };
        let out = submit_epoch(&layout, EPOCH, &machine, options).expect("submit");
        let ids: Vec<&str> = out.submitted.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["101", "102", "103"]);

        let calls = fs::read_to_string(layout.base().join("calls.log")).expect("log");
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].ends_with("j-1.job"), "{}", calls[0]);
        assert!(calls[2].starts_with("-d afterany:101:102 "), "{}", calls[2]);
        assert!(calls[2].ends_with("j-3.job"), "{}", calls[2]);
        assert_eq!(read_record(&layout, EPOCH).expect("record")[2].id, "103");
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn kill_uses_the_recorded_ids() {
        let layout = scratch("kill", &["j-1"]);
        assert!(matches!(
            kill_epoch(&layout, EPOCH, &Fake),
            Err(SweepError::Validation(_))
        ));
        submit_epoch(&layout, EPOCH, &Fake, SubmitOptions::default()).expect("submit");
        let out = kill_epoch(&layout, EPOCH, &Fake).expect("kill");
        assert_eq!((out.requested, out.killed), (1, 1));
        assert!(kill_epoch(&layout, EPOCH, &DebugDump).is_err());
        let _ = fs::remove_dir_all(layout.base());
    }
}
