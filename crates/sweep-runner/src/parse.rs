//! Result parsing: raw output files back into observations and a table.

use crate::error::{SweepError, SweepResult};
use crate::expand::ResultMetadata;
use crate::expr::number_to_json;
use crate::extract::{LineExtractor, ParsedLine};
use crate::layout::{atomic_write_bytes, list_entries, Layout};
use crate::stats::aggregate;
use crate::status::is_result_name;
use crate::table::{Table, PROVENANCE_PREFIX};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-file problems. None of them abort an epoch parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    DuplicateKey { key: String },
    ParserThrew { line: usize, message: String },
    FileUnreadable { message: String },
    NoInformation,
    NonNumericSample { key: String, value: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::DuplicateKey { key } => write!(f, "file contains same key '{}' twice", key),
            FailureKind::ParserThrew { line, message } => {
                write!(f, "parser threw on line {}: {}", line, message)
            }
            FailureKind::FileUnreadable { message } => write!(f, "unreadable: {}", message),
            FailureKind::NoInformation => write!(f, "result has no information"),
            FailureKind::NonNumericSample { key, value } => {
                write!(f, "cannot aggregate '{}': sample '{}' is not numeric", key, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseFailure {
    pub file: String,
    pub reasons: Vec<FailureKind>,
}

/// One record extracted from a result file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub file: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseOptions<'a> {
    pub tag: Option<&'a str>,
    pub aggregate: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileParse {
    pub observations: Vec<Observation>,
    pub failures: Vec<FailureKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseReport {
    #[serde(flatten)]
    pub table: Table,
    pub failed: Vec<ParseFailure>,
}

fn prefixed(name: &str) -> String {
    format!("{}{}", PROVENANCE_PREFIX, name)
}

/// Provenance and parameter columns every observation of a file starts with.
pub fn seed_columns(file: &str, metadata: Option<&ResultMetadata>) -> Vec<(String, Value)> {
    let mut seed = vec![(prefixed("file"), Value::String(file.to_string()))];
    if let Some(md) = metadata {
        seed.push((prefixed("cmd"), Value::String(md.cmd.clone())));
        seed.push((prefixed("p"), Value::from(md.p)));
        seed.push((prefixed("depth"), Value::from(md.depth)));
        for (key, value) in &md.params {
            seed.push((prefixed(key), value.clone()));
        }
    }
    seed
}

/// Numeric-looking strings become numbers.
fn coerce(value: Value) -> Value {
    match &value {
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => number_to_json(n),
            _ => value,
        },
        _ => value,
    }
}

fn build_observation(
    file: &str,
    seed: &[(String, Value)],
    pairs: Vec<(String, Value)>,
    allow_aggregate: bool,
    failures: &mut Vec<FailureKind>,
) -> Observation {
    let seeded: BTreeSet<&str> = seed.iter().map(|(k, _)| k.as_str()).collect();
    let mut all = seed.to_vec();
    all.extend(pairs);
    let (mut values, issues) = aggregate(all, allow_aggregate);
    for issue in issues {
        if !failures.contains(&issue) {
            failures.push(issue);
        }
    }
    for (key, value) in values.iter_mut() {
        if !seeded.contains(key.as_str()) {
            *value = coerce(value.take());
        }
    }
    Observation {
        file: file.to_string(),
        values,
    }
}

/// Parse one result file.
///
/// Single pairs accumulate into one file-level observation; every batch line
/// becomes an observation of its own. Both start from the seed columns.
pub fn parse_file(
    path: &Path,
    name: &str,
    metadata: Option<&ResultMetadata>,
    extractor: &mut dyn LineExtractor,
    options: ParseOptions<'_>,
) -> FileParse {
    let mut out = FileParse::default();
    let contents = match fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "failed to read result");
            out.failures.push(FailureKind::FileUnreadable {
                message: e.to_string(),
            });
            return out;
        }
    };
    extractor.on_new_file(name);

    let seed = seed_columns(name, metadata);
    let mut pairs = Vec::new();
    let mut batches = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let parsed = match extractor.parse_line(line) {
            Ok(parsed) => parsed,
            Err(message) => {
                warn!(file = name, line = idx + 1, error = %message, "parser threw");
                out.failures.push(FailureKind::ParserThrew {
                    line: idx + 1,
                    message,
                });
                continue;
            }
        };
        if !parsed.accepted_by(options.tag) {
            continue;
        }
        match parsed {
            ParsedLine::NoMatch => {}
            ParsedLine::Pair { key, value, .. } => pairs.push((key, value)),
            ParsedLine::Batch { kvs, .. } => batches.push(kvs),
        }
    }

    if !pairs.is_empty() {
        let obs = build_observation(name, &seed, pairs, options.aggregate, &mut out.failures);
        out.observations.push(obs);
    }
    for kvs in batches {
        let obs = build_observation(name, &seed, kvs, options.aggregate, &mut out.failures);
        out.observations.push(obs);
    }
    if out.observations.is_empty() {
        warn!(file = name, "result has no information");
        out.failures.push(FailureKind::NoInformation);
    }
    out
}

fn read_metadata(layout: &Layout, epoch: &str, name: &str) -> Option<ResultMetadata> {
    let path = layout.metadata_file(epoch, name);
    let text = fs::read_to_string(&path).ok()?;
    match serde_yaml::from_str(&text) {
        Ok(md) => Some(md),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed result metadata");
            None
        }
    }
}

/// Parse every result file of `epoch` into a table plus a failure report.
pub fn parse_epoch(
    layout: &Layout,
    epoch: &str,
    extractor: &mut dyn LineExtractor,
    options: ParseOptions<'_>,
) -> SweepResult<ParseReport> {
    let dir = layout.results_dir(epoch);
    if !dir.is_dir() {
        return Err(SweepError::Validation(format!(
            "failed to open results directory {}",
            dir.display()
        )));
    }
    let mut observations = Vec::new();
    let mut failed = Vec::new();
    for entry in list_entries(&dir)? {
        if !is_result_name(&entry.name) || !dir.join(&entry.name).is_file() {
            continue;
        }
        let metadata = read_metadata(layout, epoch, &entry.name);
        if metadata.is_none() {
            debug!(file = %entry.name, "no metadata for result");
        }
        let parsed = parse_file(
            &dir.join(&entry.name),
            &entry.name,
            metadata.as_ref(),
            extractor,
            options,
        );
        if !parsed.failures.is_empty() {
            failed.push(ParseFailure {
                file: entry.name.clone(),
                reasons: parsed.failures,
            });
        }
        observations.extend(parsed.observations);
    }
    debug!(epoch, observations = observations.len(), failed = failed.len(), "parsed epoch");
    Ok(ParseReport {
        table: Table::from_observations(&observations),
        failed,
    })
}

pub fn extractor_digest(extractor: &dyn LineExtractor) -> String {
    format!(
        "sha256:{}",
        hex::encode(Sha256::digest(extractor.definition().as_bytes()))
    )
}

/// Write `.parsed/results.json` for `epoch`.
pub fn dump_report(
    layout: &Layout,
    epoch: &str,
    report: &ParseReport,
    extractor: &dyn LineExtractor,
    params: &[String],
) -> SweepResult<PathBuf> {
    let doc = json!({
        "kv": {
            "header": report.table.header,
            "rows": report.table.rows,
        },
        "extractor": {
            "name": extractor.name(),
            "params": params,
            "sha256": extractor_digest(extractor),
        },
        "failed": report.failed,
    });
    let path = layout.parsed_file(epoch);
    atomic_write_bytes(&path, &serde_json::to_vec_pretty(&doc)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DefaultKeyValue;
    use crate::layout::ensure_dir;
    use chrono::Utc;

    const EPOCH: &str = "20240101-000000";

    fn scratch(tag: &str) -> Layout {
        let root = std::env::temp_dir().join(format!(
            "sweep_parse_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let layout = Layout::at(root);
        for dir in layout.epoch_dirs(EPOCH) {
            ensure_dir(&dir).expect("mkdir");
        }
        layout
    }

    fn metadata(p: u64, params: Value) -> ResultMetadata {
        ResultMetadata {
            job: "experiments/jobs/x/j.job".to_string(),
            cmd: "solve".to_string(),
            p,
            depth: 1,
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    fn write_result(layout: &Layout, name: &str, md: Option<&ResultMetadata>, body: &str) {
        fs::write(layout.result_file(EPOCH, name), body).expect("result");
        if let Some(md) = md {
            fs::write(
                layout.metadata_file(EPOCH, name),
                serde_yaml::to_string(md).expect("yaml"),
            )
            .expect("metadata");
        }
    }

    #[test]
    fn observations_are_seeded_with_parameters() {
        let layout = scratch("seed");
        let md = metadata(4, json!({"mode": "fast", "n": 10}));
        write_result(&layout, "solve-4", Some(&md), "noise\ndbx.kv time: 1.5\ndbx.kv status: ok\n");
        let parsed = parse_file(
            &layout.result_file(EPOCH, "solve-4"),
            "solve-4",
            Some(&md),
            &mut DefaultKeyValue,
            ParseOptions::default(),
        );
        assert!(parsed.failures.is_empty(), "{:?}", parsed.failures);
        let keys: Vec<&str> = parsed.observations[0].values.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["_file", "_cmd", "_p", "_depth", "_mode", "_n", "time", "status"]);
        let values = &parsed.observations[0].values;
        assert_eq!(values["_p"], json!(4));
        assert_eq!(values["_n"], json!(10));
        assert_eq!(values["time"], json!(1.5));
        assert_eq!(values["status"], json!("ok"));
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn batches_become_separate_observations() {
        let layout = scratch("batches");
        let body = "dbx.kv total: 3\ndbx.obs {\"step\": 1, \"err\": 0.5}\ndbx.obs {\"step\": 2, \"err\": 0.25}\n";
        write_result(&layout, "r", None, body);
        let parsed = parse_file(
            &layout.result_file(EPOCH, "r"),
            "r",
            None,
            &mut DefaultKeyValue,
            ParseOptions::default(),
        );
        assert_eq!(parsed.observations.len(), 3);
        assert_eq!(parsed.observations[0].values["total"], json!(3));
        assert_eq!(parsed.observations[2].values["step"], json!(2));
        assert_eq!(parsed.observations[2].values["_file"], json!("r"));
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn bad_lines_are_reported_but_parsing_continues() {
        let layout = scratch("throws");
        write_result(&layout, "r", None, "dbx.kv : 1\ndbx.kv ok: 2\ndbx.kv ok: 3\n");
        let parsed = parse_file(
            &layout.result_file(EPOCH, "r"),
            "r",
            None,
            &mut DefaultKeyValue,
            ParseOptions::default(),
        );
        assert_eq!(parsed.observations.len(), 1);
        assert_eq!(parsed.observations[0].values["ok"], json!(2));
        assert!(matches!(parsed.failures[0], FailureKind::ParserThrew { line: 1, .. }));
        assert_eq!(parsed.failures[1], FailureKind::DuplicateKey { key: "ok".to_string() });
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn tags_and_aggregation() {
        let layout = scratch("agg");
        let body = "dbx.kv.setup t: 100\ndbx.kv t: 2\ndbx.kv t: 4\ndbx.kv t: 6\n";
        write_result(&layout, "r", None, body);
        let path = layout.result_file(EPOCH, "r");
        let parsed = parse_file(
            &path,
            "r",
            None,
            &mut DefaultKeyValue,
            ParseOptions { tag: None, aggregate: true },
        );
        let values = &parsed.observations[0].values;
        assert_eq!(values["t_mean"], json!(4));
        assert_eq!(values["t_min"], json!(2));
        assert_eq!(values["t_samples"], json!(3));

        let parsed = parse_file(
            &path,
            "r",
            None,
            &mut DefaultKeyValue,
            ParseOptions { tag: Some("setup"), aggregate: true },
        );
        assert_eq!(parsed.observations.len(), 1);
        let values = &parsed.observations[0].values;
        assert_eq!(values["t"], json!(100));
        assert!(values.get("t_samples").is_none());
        assert!(parsed.failures.is_empty());

        let parsed = parse_file(
            &path,
            "r",
            None,
            &mut DefaultKeyValue,
            ParseOptions { tag: Some("solve"), aggregate: true },
        );
        assert!(parsed.observations.is_empty());
        assert_eq!(parsed.failures, vec![FailureKind::NoInformation]);
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn epoch_report_flags_empty_and_missing_files() {
        let layout = scratch("epoch");
        let md = metadata(1, json!({}));
        write_result(&layout, "a-1", Some(&md), "dbx.kv time: 1\ndbx.kv iters: 3\n");
        write_result(&layout, "a-2", Some(&metadata(2, json!({}))), "dbx.kv time: 2\n");
        write_result(&layout, "a-3", None, "nothing useful\n");
        let mut extractor = DefaultKeyValue;
        let report = parse_epoch(&layout, EPOCH, &mut extractor, ParseOptions::default()).expect("parse");
        assert_eq!(
            report.table.header,
            vec!["_file", "_cmd", "_p", "_depth", "time", "iters"]
        );
        assert_eq!(report.table.rows.len(), 2);
        assert_eq!(report.table.rows[1][5], Value::Null);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file, "a-3");
        assert_eq!(report.failed[0].reasons, vec![FailureKind::NoInformation]);

        let path = dump_report(&layout, EPOCH, &report, &extractor, &[]).expect("dump");
        let doc: Value = serde_json::from_slice(&fs::read(path).expect("read")).expect("json");
        assert_eq!(doc["kv"]["header"][0], json!("_file"));
        assert_eq!(doc["extractor"]["name"], json!("default-key-value"));
        assert!(doc["extractor"]["sha256"].as_str().unwrap().starts_with("sha256:"));
        assert_eq!(doc["failed"][0]["reasons"][0]["kind"], json!("no_information"));
        let _ = fs::remove_dir_all(layout.base());
    }

    #[test]
    fn unreadable_files_yield_no_observations() {
        let mut extractor = DefaultKeyValue;
        let parsed = parse_file(
            Path::new("/definitely/not/here"),
            "ghost",
            None,
            &mut extractor,
            ParseOptions::default(),
        );
        assert!(parsed.observations.is_empty());
        assert!(matches!(parsed.failures[0], FailureKind::FileUnreadable { .. }));
    }
}
