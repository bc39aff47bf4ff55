//! On-disk layout of an experiment set.
//!
//! ```text
//! <base>/experiments/jobs/<epoch>/<name>.job
//! <base>/experiments/jobs/<epoch>/run.yml
//! <base>/experiments/results/<epoch>/<cmd_id>
//! <base>/experiments/results/<epoch>/.md/<cmd_id>.yml
//! <base>/experiments/results/<epoch>/{.started,.done,.fail}/<cmd_id>
//! <base>/experiments/workspaces/<epoch>/<name>/
//! ```
//!
//! Every other module builds paths through [`Layout`].

use crate::error::{SweepError, SweepResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const EXPERIMENTS_DIR: &str = "experiments";
const METADATA_DIR: &str = ".md";
const PARSED_DIR: &str = ".parsed";

/// Marker namespaces populated by the execution side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Started,
    Done,
    Failed,
}

impl Marker {
    pub fn dir_name(self) -> &'static str {
        match self {
            Marker::Started => ".started",
            Marker::Done => ".done",
            Marker::Failed => ".fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    /// Use `cwd` as the base, or its parent when `cwd` is the experiments dir itself.
    pub fn discover(cwd: &Path) -> Self {
        if cwd.file_name().and_then(|s| s.to_str()) == Some(EXPERIMENTS_DIR) {
            if let Some(parent) = cwd.parent() {
                return Self::at(parent);
            }
        }
        Self::at(cwd)
    }

    pub fn at(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn build(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.base.join(relative)
    }

    pub fn experiments_root(&self) -> PathBuf {
        self.base.join(EXPERIMENTS_DIR)
    }

    pub fn jobs_root(&self) -> PathBuf {
        self.experiments_root().join("jobs")
    }

    pub fn results_root(&self) -> PathBuf {
        self.experiments_root().join("results")
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.experiments_root().join("workspaces")
    }

    pub fn jobs_dir(&self, epoch: &str) -> PathBuf {
        self.jobs_root().join(epoch)
    }

    pub fn job_file(&self, epoch: &str, job_name: &str) -> PathBuf {
        self.jobs_dir(epoch).join(format!("{}.job", job_name))
    }

    pub fn run_file(&self, epoch: &str) -> PathBuf {
        self.jobs_dir(epoch).join("run.yml")
    }

    pub fn machine_file(&self, epoch: &str) -> PathBuf {
        self.jobs_dir(epoch).join("machine.yml")
    }

    pub fn submitted_file(&self, epoch: &str) -> PathBuf {
        self.jobs_dir(epoch).join(".submitted.json")
    }

    pub fn results_dir(&self, epoch: &str) -> PathBuf {
        self.results_root().join(epoch)
    }

    pub fn result_file(&self, epoch: &str, cmd_id: &str) -> PathBuf {
        self.results_dir(epoch).join(cmd_id)
    }

    pub fn stdout_dir(&self, epoch: &str) -> PathBuf {
        self.results_dir(epoch).join("stdout")
    }

    pub fn stderr_dir(&self, epoch: &str) -> PathBuf {
        self.results_dir(epoch).join("stderr")
    }

    pub fn marker_dir(&self, epoch: &str, marker: Marker) -> PathBuf {
        self.results_dir(epoch).join(marker.dir_name())
    }

    pub fn marker_file(&self, epoch: &str, marker: Marker, cmd_id: &str) -> PathBuf {
        self.marker_dir(epoch, marker).join(cmd_id)
    }

    pub fn metadata_dir(&self, epoch: &str) -> PathBuf {
        self.results_dir(epoch).join(METADATA_DIR)
    }

    pub fn metadata_file(&self, epoch: &str, cmd_id: &str) -> PathBuf {
        self.metadata_dir(epoch).join(format!("{}.yml", cmd_id))
    }

    pub fn parsed_file(&self, epoch: &str) -> PathBuf {
        self.results_dir(epoch).join(PARSED_DIR).join("results.json")
    }

    pub fn workspace_dir(&self, epoch: &str, job_name: &str) -> PathBuf {
        self.workspaces_root().join(epoch).join(job_name)
    }

    /// Every directory that must exist before jobs of `epoch` can run.
    pub fn epoch_dirs(&self, epoch: &str) -> Vec<PathBuf> {
        vec![
            self.jobs_dir(epoch),
            self.results_dir(epoch),
            self.stderr_dir(epoch),
            self.stdout_dir(epoch),
            self.marker_dir(epoch, Marker::Failed),
            self.marker_dir(epoch, Marker::Done),
            self.marker_dir(epoch, Marker::Started),
            self.metadata_dir(epoch),
        ]
    }

    /// Create the `experiments/{jobs,results}` skeleton.
    pub fn init(&self) -> SweepResult<()> {
        for dir in [self.jobs_root(), self.results_root()] {
            ensure_dir(&dir)?;
        }
        Ok(())
    }

    pub fn ensure_initialized(&self) -> SweepResult<()> {
        for dir in [self.experiments_root(), self.jobs_root(), self.results_root()] {
            if !dir.is_dir() {
                let shown = dir.strip_prefix(&self.base).unwrap_or(&dir);
                return Err(SweepError::Validation(format!(
                    "directory '{}' does not exist. Perhaps run sweep init?",
                    shown.display()
                )));
            }
        }
        Ok(())
    }
}

/// A directory entry together with its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub modified: DateTime<Utc>,
}

pub fn ensure_dir(path: &Path) -> SweepResult<()> {
    fs::create_dir_all(path).map_err(|e| SweepError::io(path, e))
}

/// Entries of `dir` sorted by name; a missing directory yields an empty list.
pub fn list_entries(dir: &Path) -> SweepResult<Vec<Entry>> {
    let reader = match fs::read_dir(dir) {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SweepError::io(dir, e)),
    };
    let mut entries = Vec::new();
    for item in reader {
        let item = item.map_err(|e| SweepError::io(dir, e))?;
        let name = item.file_name().to_string_lossy().into_owned();
        // Entries can vanish between listing and stat while jobs are running.
        let modified = match item.metadata().and_then(|m| m.modified()) {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(_) => continue,
        };
        entries.push(Entry { name, modified });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> SweepResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| SweepError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_steps_out_of_experiments_dir() {
        let layout = Layout::discover(Path::new("/work/proj/experiments"));
        assert_eq!(layout.base(), Path::new("/work/proj"));
        let layout = Layout::discover(Path::new("/work/proj"));
        assert_eq!(layout.base(), Path::new("/work/proj"));
    }

    #[test]
    fn paths_follow_layout() {
        let layout = Layout::at("/p");
        assert_eq!(
            layout.job_file("20240101-000000", "heat-4-1"),
            PathBuf::from("/p/experiments/jobs/20240101-000000/heat-4-1.job")
        );
        assert_eq!(
            layout.metadata_file("20240101-000000", "solve-4-1"),
            PathBuf::from("/p/experiments/results/20240101-000000/.md/solve-4-1.yml")
        );
        assert_eq!(
            layout.marker_file("20240101-000000", Marker::Failed, "solve-4-1"),
            PathBuf::from("/p/experiments/results/20240101-000000/.fail/solve-4-1")
        );
    }

    #[test]
    fn ensure_initialized_reports_missing_dirs() {
        let root = std::env::temp_dir().join(format!(
            "sweep_layout_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let layout = Layout::at(&root);
        let err = layout.ensure_initialized().expect_err("fresh dir is not initialized");
        assert!(err.to_string().contains("experiments"), "{}", err);
        layout.init().expect("init");
        layout.ensure_initialized().expect("initialized");
        assert!(list_entries(&layout.jobs_root()).expect("list").is_empty());
        assert!(list_entries(&root.join("missing")).expect("list").is_empty());
        let _ = fs::remove_dir_all(root);
    }
}
