//! Lifecycle classification derived purely from marker files.
//!
//! Nothing here writes to disk: calling [`epoch_status`] twice over an
//! unchanged tree yields the same answer.

use crate::epoch::list_epochs;
use crate::error::SweepResult;
use crate::expand::ResultMetadata;
use crate::experiment::parse_wall;
use crate::layout::{list_entries, Entry, Layout, Marker};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Started,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Started => "started",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }
}

/// Whether a stale `started` marker is reclassified as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub enabled: bool,
    /// Seconds; replaces the wall budget recorded in `run.yml`.
    pub wall_override: Option<u64>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            wall_override: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatus {
    pub cmd_id: String,
    pub state: JobState,
    pub timed_out: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Modification time of the newest marker seen for this instance.
    pub modified: Option<DateTime<Utc>>,
    pub metadata: Option<ResultMetadata>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub expected: usize,
    pub waiting: usize,
    pub started: usize,
    pub done: usize,
    pub failed: usize,
}

impl StateCounts {
    fn record(&mut self, state: JobState) {
        self.expected += 1;
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Started => self.started += 1,
            JobState::Done => self.done += 1,
            JobState::Failed => self.failed += 1,
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.done + self.failed == self.expected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStatus {
    pub epoch: String,
    pub wall_seconds: Option<u64>,
    pub counts: StateCounts,
    pub instances: Vec<InstanceStatus>,
}

fn marker_times(entries: Vec<Entry>) -> BTreeMap<String, DateTime<Utc>> {
    entries.into_iter().map(|e| (e.name, e.modified)).collect()
}

/// Raw result files: everything in the results dir that is not bookkeeping.
pub fn is_result_name(name: &str) -> bool {
    !name.starts_with('.') && name != "stdout" && name != "stderr" && !name.ends_with(".yml")
}

fn run_yml_value(layout: &Layout, epoch: &str) -> Option<serde_yaml::Value> {
    let text = fs::read_to_string(layout.run_file(epoch)).ok()?;
    serde_yaml::from_str(&text).ok()
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Wall budget in seconds as recorded in `run.yml`; `None` when unreadable.
pub fn recorded_wall(layout: &Layout, epoch: &str) -> Option<u64> {
    let run = run_yml_value(layout, epoch)?;
    let wall = yaml_scalar(run.get("wall")?)?;
    parse_wall(&wall)
}

pub fn recorded_description(layout: &Layout, epoch: &str) -> Option<String> {
    let run = run_yml_value(layout, epoch)?;
    run.get("desc").and_then(yaml_scalar)
}

fn read_metadata(layout: &Layout, epoch: &str, cmd_id: &str) -> Option<ResultMetadata> {
    let path = layout.metadata_file(epoch, cmd_id);
    let parsed = fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|text| serde_yaml::from_str(&text).map_err(|e| e.to_string()));
    match parsed {
        Ok(md) => Some(md),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable result metadata");
            None
        }
    }
}

/// Ids of every planned command instance, read from `.md/`.
pub fn expected_instances(layout: &Layout, epoch: &str) -> SweepResult<Vec<String>> {
    Ok(list_entries(&layout.metadata_dir(epoch))?
        .into_iter()
        .filter_map(|e| e.name.strip_suffix(".yml").map(str::to_string))
        .collect())
}

/// Classify every expected instance of `epoch` as of `now`.
pub fn epoch_status(
    layout: &Layout,
    epoch: &str,
    policy: TimeoutPolicy,
    now: DateTime<Utc>,
) -> SweepResult<EpochStatus> {
    let expected = expected_instances(layout, epoch)?;
    let done = marker_times(list_entries(&layout.marker_dir(epoch, Marker::Done))?);
    let failed = marker_times(list_entries(&layout.marker_dir(epoch, Marker::Failed))?);
    let started_dir = layout.marker_dir(epoch, Marker::Started);
    let started = if started_dir.is_dir() {
        marker_times(list_entries(&started_dir)?)
    } else {
        debug!(epoch, "no .started directory; using result files as start markers");
        marker_times(
            list_entries(&layout.results_dir(epoch))?
                .into_iter()
                .filter(|e| is_result_name(&e.name))
                .collect(),
        )
    };

    let wall_seconds = policy.wall_override.or_else(|| recorded_wall(layout, epoch));
    let budget = match (policy.enabled, wall_seconds) {
        (true, Some(secs)) => i64::try_from(secs).ok().map(Duration::seconds),
        _ => None,
    };

    let mut counts = StateCounts::default();
    let mut instances = Vec::with_capacity(expected.len());
    for cmd_id in expected {
        let started_at = started.get(&cmd_id).copied();
        let mut timed_out = false;
        let (state, finished_at) = if let Some(at) = done.get(&cmd_id) {
            (JobState::Done, Some(*at))
        } else if let Some(at) = failed.get(&cmd_id) {
            (JobState::Failed, Some(*at))
        } else if let Some(at) = started_at {
            match budget {
                Some(wall) if at + wall < now => {
                    timed_out = true;
                    (JobState::Failed, Some(at + wall))
                }
                _ => (JobState::Started, None),
            }
        } else {
            (JobState::Waiting, None)
        };
        let modified = [started_at, done.get(&cmd_id).copied(), failed.get(&cmd_id).copied()]
            .into_iter()
            .flatten()
            .max();
        counts.record(state);
        let metadata = read_metadata(layout, epoch, &cmd_id);
        instances.push(InstanceStatus {
            cmd_id,
            state,
            timed_out,
            started_at,
            finished_at,
            modified,
            metadata,
        });
    }

    Ok(EpochStatus {
        epoch: epoch.to_string(),
        wall_seconds,
        counts,
        instances,
    })
}

/// One observable lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activity {
    pub name: String,
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// Start and terminal events of every instance, oldest first.
pub fn activities(status: &EpochStatus) -> Vec<Activity> {
    let mut out = Vec::new();
    for inst in &status.instances {
        if let Some(at) = inst.started_at {
            out.push(Activity {
                name: inst.cmd_id.clone(),
                state: JobState::Started,
                at,
            });
        }
        if let (true, Some(at)) = (inst.state.is_terminal(), inst.finished_at) {
            out.push(Activity {
                name: inst.cmd_id.clone(),
                state: inst.state,
                at,
            });
        }
    }
    out.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.name.cmp(&b.name)));
    out
}

/// Yields each activity once across successive status snapshots.
#[derive(Debug, Default)]
pub struct ActivityStream {
    seen: BTreeSet<(String, JobState)>,
}

impl ActivityStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_batch(&mut self, status: &EpochStatus) -> Vec<Activity> {
        activities(status)
            .into_iter()
            .filter(|a| self.seen.insert((a.name.clone(), a.state)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochSummary {
    pub epoch: String,
    pub desc: Option<String>,
    #[serde(flatten)]
    pub counts: StateCounts,
}

/// Counts for every epoch, most recent first.
pub fn summary(
    layout: &Layout,
    policy: TimeoutPolicy,
    now: DateTime<Utc>,
) -> SweepResult<Vec<EpochSummary>> {
    let mut out = Vec::new();
    for epoch in list_epochs(layout)? {
        let status = epoch_status(layout, &epoch, policy, now)?;
        out.push(EpochSummary {
            desc: recorded_description(layout, &epoch),
            epoch,
            counts: status.counts,
        });
    }
    Ok(out)
}
