//! Epoch ids and symbolic references (`HEAD`, `HEAD~`, `HEAD~3`, ...).

use crate::error::{SweepError, SweepResult};
use crate::layout::{list_entries, Layout};
use chrono::{DateTime, TimeZone};
use serde::Serialize;
use std::fs;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const EPOCH_FORMAT: &str = "%Y%m%d-%H%M%S";
const SYMBOLIC_PREFIX: &str = "HEAD";

pub fn new_epoch_id<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    now.format(EPOCH_FORMAT).to_string()
}

/// Timestamp-formatted ids start with the century digit.
pub fn is_concrete_epoch(reference: &str) -> bool {
    reference.starts_with('2') && reference.chars().all(|c| c.is_ascii_digit() || c == '-')
}

/// Offset encoded by a symbolic reference: one per `~` plus `n - 1` per digit run.
///
/// Offsets too large for `usize` saturate, so they fail as out of range.
fn symbolic_offset(reference: &str) -> SweepResult<usize> {
    let tail = &reference[SYMBOLIC_PREFIX.len()..];
    let mut offset: i128 = 0;
    let mut digits = String::new();
    let flush = |digits: &mut String, offset: &mut i128| {
        if digits.is_empty() {
            return;
        }
        // Only ASCII digits are collected, so parsing fails on overflow alone.
        let n: i128 = digits.parse().unwrap_or(i128::MAX);
        *offset = offset.saturating_add(n.saturating_sub(1));
        digits.clear();
    };
    for c in tail.chars() {
        match c {
            '~' => {
                flush(&mut digits, &mut offset);
                offset = offset.saturating_add(1);
            }
            '0'..='9' => digits.push(c),
            _ => return Err(SweepError::UnresolvableReference(reference.to_string())),
        }
    }
    flush(&mut digits, &mut offset);
    if offset < 0 {
        return Err(SweepError::UnresolvableReference(reference.to_string()));
    }
    Ok(usize::try_from(offset).unwrap_or(usize::MAX))
}

/// Resolve `reference` against `candidates`, which are sorted most recent first.
///
/// Pure: the same inputs always produce the same epoch.
pub fn resolve_reference(reference: &str, candidates: &[String]) -> SweepResult<String> {
    if is_concrete_epoch(reference) {
        if candidates.iter().any(|c| c == reference) {
            return Ok(reference.to_string());
        }
        return Err(SweepError::UnresolvableReference(reference.to_string()));
    }
    if !reference.starts_with(SYMBOLIC_PREFIX) {
        return Err(SweepError::UnresolvableReference(reference.to_string()));
    }
    if candidates.is_empty() {
        return Err(SweepError::EmptyEpochSet);
    }
    let offset = symbolic_offset(reference)?;
    let resolved = candidates
        .get(offset)
        .cloned()
        .ok_or_else(|| SweepError::OutOfRangeReference {
            reference: reference.to_string(),
            offset,
            available: candidates.len(),
        })?;
    debug!(reference, resolved = %resolved, "resolved epoch");
    Ok(resolved)
}

/// Concrete epochs under `jobs/`, most recent first.
pub fn list_epochs(layout: &Layout) -> SweepResult<Vec<String>> {
    let mut epochs: Vec<String> = list_entries(&layout.jobs_root())?
        .into_iter()
        .map(|e| e.name)
        .filter(|name| is_concrete_epoch(name))
        .collect();
    epochs.sort();
    epochs.reverse();
    Ok(epochs)
}

pub fn resolve_epoch(layout: &Layout, reference: &str) -> SweepResult<String> {
    let epochs = list_epochs(layout)?;
    let resolved = resolve_reference(reference, &epochs)?;
    if !layout.jobs_dir(&resolved).is_dir() {
        return Err(SweepError::UnresolvableReference(resolved));
    }
    Ok(resolved)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removed {
    pub epoch: String,
    pub files: usize,
}

/// Delete the jobs, results and workspaces trees of `epoch`.
pub fn remove_epoch(layout: &Layout, epoch: &str) -> SweepResult<Removed> {
    let roots = [
        layout.jobs_dir(epoch),
        layout.results_dir(epoch),
        layout.workspaces_root().join(epoch),
    ];
    let mut files = 0;
    for root in roots.iter().filter(|r| r.exists()) {
        files += WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| !e.file_type().is_dir())
            .count();
        fs::remove_dir_all(root).map_err(|e| SweepError::io(root, e))?;
    }
    info!(epoch, files, "removed epoch");
    Ok(Removed {
        epoch: epoch.to_string(),
        files,
    })
}
