//! Job-script templates and the scheduler commands that go with them.

use crate::error::{SweepError, SweepResult};
use serde::Serialize;
use std::path::PathBuf;

/// Everything a template needs to render one job file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobScript {
    pub name: String,
    /// `p * depth`, the total number of hardware threads requested.
    pub width: u64,
    pub p: u64,
    pub depth: u64,
    pub wall: String,
    pub epoch: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub cwd: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub raw_headers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_flags: Vec<String>,
}

impl JobScript {
    fn log_path(&self, stream: &str, suffix: &str) -> String {
        format!(
            "{}/experiments/results/{}/{}/{}{}",
            self.cwd.display(),
            self.epoch,
            stream,
            self.name,
            suffix
        )
    }

    fn run_flags(&self) -> String {
        self.run_flags.join(" ")
    }
}

pub trait Machine {
    fn name(&self) -> &str;

    /// Pure: the same script always renders to the same text.
    fn render(&self, job: &JobScript) -> String;

    /// Program used to submit one rendered job file.
    fn submit_command(&self) -> &str;

    /// Extra submission argument making a job wait on `prev_ids`.
    fn depend_flag(&self, _prev_ids: &[String]) -> Option<String> {
        None
    }

    fn kill_command(&self) -> Option<&str> {
        None
    }

    /// Scheduler id from the submitter's stdout; the last non-empty line by default.
    fn job_id(&self, stdout: &str) -> Option<String> {
        last_line(stdout).map(str::to_string)
    }
}

fn last_line(stdout: &str) -> Option<&str> {
    stdout.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Runs jobs directly through `/bin/sh`.
#[derive(Debug, Default)]
pub struct Local;

impl Machine for Local {
    fn name(&self) -> &str {
        "local"
    }

    fn render(&self, job: &JobScript) -> String {
        let flags = job.run_flags();
        let mpirun = if flags.is_empty() {
            format!("mpirun -n {}", job.p)
        } else {
            format!("mpirun -n {} {}", job.p, flags)
        };
        format!("#!/bin/sh\nMPIRUN=\"{}\"\n\n{}", mpirun, job.body)
    }

    fn submit_command(&self) -> &str {
        "/bin/sh"
    }
}

/// Dumps the job description instead of a script; submission is a no-op.
#[derive(Debug, Default)]
pub struct DebugDump;

impl Machine for DebugDump {
    fn name(&self) -> &str {
        "debug"
    }

    fn render(&self, job: &JobScript) -> String {
        serde_yaml::to_string(job).unwrap_or_else(|e| format!("# cannot render {}: {}\n", job.name, e))
    }

    fn submit_command(&self) -> &str {
        "/bin/true"
    }
}

/// PBS/Torque batch systems.
#[derive(Debug, Default)]
pub struct Pbs;

impl Machine for Pbs {
    fn name(&self) -> &str {
        "pbs"
    }

    fn render(&self, job: &JobScript) -> String {
        let mut out = String::from("#!/bin/bash\n");
        out.push_str(&format!("#PBS -N {}\n", job.name));
        out.push_str(&format!("#PBS -l nodes=1:ppn={}\n", job.width));
        out.push_str(&format!("#PBS -l walltime={}\n", job.wall));
        if let Some(q) = &job.queue {
            out.push_str(&format!("#PBS -q {}\n", q));
        }
        out.push_str(&format!("#PBS -e {}\n", job.log_path("stderr", ".err")));
        out.push_str(&format!("#PBS -o {}\n", job.log_path("stdout", ".out")));
        out.push_str("#PBS -V\n");
        for header in &job.raw_headers {
            out.push_str(&format!("#PBS {}\n", header));
        }
        out.push_str(&format!(
            "\nMPIRUN=\"mpirun -n {} {}\"\n\n",
            job.p,
            job.run_flags()
        ));
        out.push_str(&job.body);
        out
    }

    fn submit_command(&self) -> &str {
        "qsub"
    }

    fn depend_flag(&self, prev_ids: &[String]) -> Option<String> {
        if prev_ids.is_empty() {
            return None;
        }
        Some(format!("-W depend=afterany:{}", prev_ids.join(":")))
    }

    fn kill_command(&self) -> Option<&str> {
        Some("qdel")
    }
}

/// SLURM clusters.
#[derive(Debug, Default)]
pub struct Slurm;

impl Machine for Slurm {
    fn name(&self) -> &str {
        "slurm"
    }

    fn render(&self, job: &JobScript) -> String {
        let mut out = String::from("#!/bin/bash -l\n");
        out.push_str(&format!("#SBATCH -J {}\n", job.name));
        if let Some(q) = &job.queue {
            out.push_str(&format!("#SBATCH -p {}\n", q));
        }
        out.push_str(&format!("#SBATCH -n {}\n", job.p));
        out.push_str(&format!("#SBATCH -c {}\n", job.depth));
        out.push_str(&format!("#SBATCH -t {}\n", job.wall));
        out.push_str(&format!("#SBATCH -D {}\n", job.cwd.display()));
        out.push_str(&format!("#SBATCH -e {}\n", job.log_path("stderr", ".err")));
        out.push_str(&format!("#SBATCH -o {}\n", job.log_path("stdout", ".out")));
        for header in &job.raw_headers {
            out.push_str(&format!("#SBATCH {}\n", header));
        }
        out.push_str(&format!(
            "\nMPIRUN=\"srun -n {} -c {} --cpu_bind=cores {}\"\n\n",
            job.p,
            job.depth,
            job.run_flags()
        ));
        out.push_str(&job.body);
        out
    }

    fn submit_command(&self) -> &str {
        "sbatch"
    }

    fn depend_flag(&self, prev_ids: &[String]) -> Option<String> {
        if prev_ids.is_empty() {
            return None;
        }
        Some(format!("-d afterany:{}", prev_ids.join(":")))
    }

    fn kill_command(&self) -> Option<&str> {
        Some("scancel")
    }

    /// `Submitted batch job 12345`, or `12345;cluster` under `--parsable`.
    fn job_id(&self, stdout: &str) -> Option<String> {
        let token = last_line(stdout)?.split_whitespace().last()?;
        token.split(';').next().filter(|id| !id.is_empty()).map(str::to_string)
    }
}

pub const MACHINE_NAMES: [&str; 4] = ["local", "debug", "pbs", "slurm"];

pub fn machine_by_name(name: &str) -> SweepResult<Box<dyn Machine>> {
    match name {
        "local" => Ok(Box::new(Local)),
        "debug" => Ok(Box::new(DebugDump)),
        "pbs" => Ok(Box::new(Pbs)),
        "slurm" => Ok(Box::new(Slurm)),
        other => Err(SweepError::UnknownMachine(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobScript {
        JobScript {
            name: "heat-4-2".to_string(),
            width: 8,
            p: 4,
            depth: 2,
            wall: "00:10:00".to_string(),
            epoch: "20240101-000000".to_string(),
            body: "echo hi\n".to_string(),
            queue: Some("debug".to_string()),
            cwd: PathBuf::from("/work"),
            raw_headers: vec!["-A proj".to_string()],
            run_flags: Vec::new(),
        }
    }

    #[test]
    fn every_builtin_resolves_by_name() {
        for name in MACHINE_NAMES {
            let machine = machine_by_name(name).expect("builtin");
            assert_eq!(machine.name(), name);
        }
        assert!(matches!(
            machine_by_name("cray"),
            Err(SweepError::UnknownMachine(_))
        ));
    }

    #[test]
    fn local_script_defines_mpirun() {
        let text = Local.render(&job());
        assert!(text.starts_with("#!/bin/sh\nMPIRUN=\"mpirun -n 4\"\n"));
        assert!(text.ends_with("echo hi\n"));
        assert_eq!(Local.depend_flag(&["1".to_string()]), None);
    }

    #[test]
    fn batch_headers_carry_queue_and_raw_lines() {
        let text = Slurm.render(&job());
        assert!(text.contains("#SBATCH -p debug\n"));
        assert!(text.contains("#SBATCH -A proj\n"));
        assert!(text.contains("#SBATCH -e /work/experiments/results/20240101-000000/stderr/heat-4-2.err\n"));
        let text = Pbs.render(&job());
        assert!(text.contains("#PBS -l walltime=00:10:00\n"));
        assert!(text.contains("#PBS -q debug\n"));
    }

    #[test]
    fn dependency_flags_join_previous_ids() {
        let ids = vec!["11".to_string(), "12".to_string()];
        assert_eq!(Slurm.depend_flag(&ids).as_deref(), Some("-d afterany:11:12"));
        assert_eq!(Pbs.depend_flag(&ids).as_deref(), Some("-W depend=afterany:11:12"));
        assert_eq!(Pbs.depend_flag(&[]), None);
    }

    #[test]
    fn job_ids_come_from_submitter_output() {
        assert_eq!(Slurm.job_id("Submitted batch job 12345\n").as_deref(), Some("12345"));
        assert_eq!(Slurm.job_id("77;cluster\n").as_deref(), Some("77"));
        assert_eq!(Slurm.job_id("\n  \n"), None);
        assert_eq!(Pbs.job_id("warning: low quota\n4021.sdb\n\n").as_deref(), Some("4021.sdb"));
        assert_eq!(Local.job_id(""), None);
    }

    #[test]
    fn debug_machine_dumps_yaml() {
        let text = DebugDump.render(&job());
        let parsed: serde_yaml::Value = serde_yaml::from_str(&text).expect("yaml");
        assert_eq!(parsed["name"], serde_yaml::Value::from("heat-4-2"));
        assert_eq!(parsed["width"], serde_yaml::Value::from(8));
    }
}
