//! Experiment descriptors: loading, defaults and validation.
//!
//! A descriptor is validated completely before anything touches the
//! filesystem, so a malformed file never leaves a half-created epoch behind.

use crate::error::{SweepError, SweepResult};
use crate::expr::Program;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Column names that parameters may not shadow.
const RESERVED_NAMES: [&str; 4] = ["p", "depth", "cmd", "file"];

/// The descriptor as written by the user (and re-serialized to `run.yml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default)]
    pub p: Value,
    #[serde(default = "default_depth")]
    pub depth: Value,
    #[serde(default = "default_depthvar")]
    pub depthvar: String,
    #[serde(default)]
    pub cmds: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub optargs: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub pairargs: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub weakargs: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub env: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub q: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub workspace: Value,
    #[serde(default = "default_trials")]
    pub trials: Value,
    #[serde(default = "default_wall")]
    pub wall: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epilogue: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub raw: Value,
}

fn default_name() -> String {
    "job".to_string()
}

fn default_depth() -> Value {
    Value::Array(vec![Value::from(1)])
}

fn default_depthvar() -> String {
    "OMP_NUM_THREADS".to_string()
}

fn default_trials() -> Value {
    Value::from(1)
}

fn default_wall() -> Value {
    Value::String("00:30:00".to_string())
}

/// A validated experiment. Maps keep declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub name: String,
    pub desc: Option<String>,
    pub p: Vec<u64>,
    pub depth: Vec<u64>,
    pub depthvar: String,
    pub cmds: Vec<(String, String)>,
    pub optargs: Vec<(String, Vec<Value>)>,
    pub pairargs: Vec<(String, Vec<Value>)>,
    pub weakargs: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub queues: Vec<(String, u64)>,
    pub workspace_links: Option<Vec<String>>,
    pub trials: u64,
    pub wall: String,
    pub wall_seconds: u64,
    pub epilogue: Option<String>,
    pub raw_headers: Vec<String>,
    pub run_flags: Vec<String>,
    pub file: ExperimentFile,
}

impl Experiment {
    /// Names visible to weak-argument expressions, in binding order.
    pub fn expression_scope(&self) -> Vec<String> {
        let mut names = vec!["p".to_string(), "depth".to_string()];
        names.extend(self.optargs.iter().map(|(k, _)| k.clone()));
        names.extend(self.pairargs.iter().map(|(k, _)| k.clone()));
        names.extend(self.weakargs.iter().map(|(k, _)| k.clone()));
        names
    }
}

pub fn load_experiment(path: &Path) -> SweepResult<Experiment> {
    let contents = fs::read_to_string(path).map_err(|e| {
        SweepError::Validation(format!(
            "cannot open file {} for reading: {}",
            path.display(),
            e
        ))
    })?;
    debug!(path = %path.display(), "read experiment file");
    parse_experiment(&contents).map_err(|e| match e {
        SweepError::Validation(msg) => {
            SweepError::Validation(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

pub fn parse_experiment(contents: &str) -> SweepResult<Experiment> {
    if contents.trim().is_empty() {
        return Err(SweepError::Validation("file is empty".to_string()));
    }
    let file: ExperimentFile = serde_yaml::from_str(contents)
        .map_err(|e| SweepError::Validation(format!("failed to parse as a valid YAML file: {}", e)))?;
    validate_experiment(file)
}

fn invalid(msg: impl Into<String>) -> SweepError {
    SweepError::Validation(msg.into())
}

fn object<'a>(value: &'a Value, field: &str, what: &str) -> SweepResult<Option<&'a Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        _ => Err(invalid(format!("{} ({})", what, field))),
    }
}

fn counts(value: &Value, what: &str) -> SweepResult<Vec<u64>> {
    let list = match value {
        Value::Null => return Err(invalid(format!("No {}", what))),
        Value::Array(list) => list,
        _ => return Err(invalid(format!("{} must be an array of numbers", what))),
    };
    if list.is_empty() {
        return Err(invalid(format!("{} must be a non-empty array", what)));
    }
    list.iter()
        .map(|v| match v.as_u64() {
            Some(n) if n > 0 => Ok(n),
            _ => Err(invalid(format!(
                "{} must be an array of positive integers (found {})",
                what, v
            ))),
        })
        .collect()
}

fn scalar_list(name: &str, value: &Value, what: &str) -> SweepResult<Vec<Value>> {
    let list = value
        .as_array()
        .ok_or_else(|| invalid(format!("{} must be key-value pairs of arrays ({})", what, name)))?;
    if list.is_empty() {
        return Err(invalid(format!("{} '{}' must not be empty", what, name)));
    }
    for v in list {
        if !(v.is_number() || v.is_string() || v.is_boolean()) {
            return Err(invalid(format!(
                "{} '{}' contains a non-scalar value {}",
                what, name, v
            )));
        }
    }
    Ok(list.clone())
}

fn string_list(value: Option<&Value>, what: &str) -> SweepResult<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(list)) => list
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(format!("{} must be an array of strings", what)))
            })
            .collect(),
        Some(_) => Err(invalid(format!("{} must be an array of strings", what))),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts `HH:MM:SS`, `MM:SS`, plain seconds, or `D-HH:MM:SS`.
pub fn parse_wall(wall: &str) -> Option<u64> {
    let (days, rest) = match wall.split_once('-') {
        Some((d, rest)) => (d.trim().parse::<u64>().ok()?, rest),
        None => (0, wall),
    };
    let mut seconds = 0u64;
    let parts: Vec<&str> = rest.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for part in parts {
        seconds = seconds * 60 + part.trim().parse::<u64>().ok()?;
    }
    Some(days * 86_400 + seconds)
}

pub fn validate_experiment(file: ExperimentFile) -> SweepResult<Experiment> {
    if file.name.trim().is_empty() {
        return Err(invalid("No name field"));
    }
    let p = counts(&file.p, "processor counts")?;
    let depth = counts(&file.depth, "depth counts")?;

    let cmds_map = object(&file.cmds, "cmds", "Commands must be key-value pairs of name -> command")?
        .ok_or_else(|| invalid("No cmds"))?;
    if cmds_map.is_empty() {
        return Err(invalid("No cmds"));
    }
    let mut cmds = Vec::new();
    for (name, cmd) in cmds_map {
        let cmd = cmd
            .as_str()
            .ok_or_else(|| invalid("Commands must be key-value pairs of name -> command"))?;
        cmds.push((name.clone(), cmd.to_string()));
    }

    let mut optargs = Vec::new();
    if let Some(map) = object(&file.optargs, "optargs", "Optional args must be key-value pairs of arrays")? {
        for (name, values) in map {
            optargs.push((name.clone(), scalar_list(name, values, "Optional args")?));
        }
    }

    let mut pairargs: Vec<(String, Vec<Value>)> = Vec::new();
    if let Some(map) = object(&file.pairargs, "pairargs", "Paired args must be key-value pairs of arrays")? {
        for (name, values) in map {
            pairargs.push((name.clone(), scalar_list(name, values, "Paired args")?));
        }
    }
    if let Some((first, first_values)) = pairargs.first() {
        for (name, values) in &pairargs[1..] {
            if values.len() != first_values.len() {
                return Err(invalid(format!(
                    "Paired args must all have the same length ('{}' has {}, '{}' has {})",
                    first,
                    first_values.len(),
                    name,
                    values.len()
                )));
            }
        }
    }

    let mut weakargs = Vec::new();
    if let Some(map) = object(&file.weakargs, "weakargs", "Weak args must be key-value pairs")? {
        for (name, expr) in map {
            let expr = scalar_to_string(expr)
                .ok_or_else(|| invalid(format!("Weak arg '{}' must be an expression string", name)))?;
            weakargs.push((name.clone(), expr));
        }
    }

    let mut env = Vec::new();
    if let Some(map) = object(&file.env, "env", "Environment variables must be key-value pairs")? {
        for (name, value) in map {
            let value = scalar_to_string(value)
                .ok_or_else(|| invalid(format!("Environment variable '{}' must be a scalar", name)))?;
            env.push((name.clone(), value));
        }
    }

    let mut queues = Vec::new();
    if let Some(map) = object(
        &file.q,
        "q",
        "Queue must be key-value pairs of queue name and max processor count for that queue (inclusive)",
    )? {
        for (name, bound) in map {
            let bound = bound.as_u64().ok_or_else(|| {
                invalid("Queue must be key-value pairs of queue name and max processor count for that queue (inclusive)")
            })?;
            queues.push((name.clone(), bound));
        }
    }

    let workspace_links = match &file.workspace {
        Value::Null => None,
        Value::Object(map) => match map.get("links") {
            Some(links) => Some(string_list(Some(links), "Workspace links")?),
            None => {
                return Err(invalid(
                    "Workspace must have links field as an array of strings",
                ))
            }
        },
        _ => return Err(invalid("workspace must be an object")),
    };

    let trials = file
        .trials
        .as_u64()
        .filter(|n| *n > 0)
        .ok_or_else(|| invalid("Trials must be a positive number"))?;

    let wall = scalar_to_string(&file.wall).ok_or_else(|| invalid("wall must be a string"))?;
    let wall_seconds =
        parse_wall(&wall).ok_or_else(|| invalid(format!("wall '{}' is not HH:MM:SS", wall)))?;

    let (raw_headers, run_flags) = match &file.raw {
        Value::Null => (Vec::new(), Vec::new()),
        Value::Object(map) => {
            if !map.contains_key("headers") && !map.contains_key("runFlags") {
                return Err(invalid("raw field must have a headers or runFlags subfield"));
            }
            (
                string_list(map.get("headers"), "Raw headers")?,
                string_list(map.get("runFlags"), "Raw runFlags")?,
            )
        }
        _ => return Err(invalid("raw field must be an object")),
    };

    let experiment = Experiment {
        name: file.name.clone(),
        desc: file.desc.clone(),
        p,
        depth,
        depthvar: file.depthvar.clone(),
        cmds,
        optargs,
        pairargs,
        weakargs,
        env,
        queues,
        workspace_links,
        trials,
        wall,
        wall_seconds,
        epilogue: file.epilogue.clone(),
        raw_headers,
        run_flags,
        file,
    };
    check_parameter_names(&experiment)?;
    check_weak_expressions(&experiment)?;
    Ok(experiment)
}

fn check_parameter_names(exp: &Experiment) -> SweepResult<()> {
    let mut seen: Vec<&str> = Vec::new();
    let names = exp
        .optargs
        .iter()
        .map(|(k, _)| k)
        .chain(exp.pairargs.iter().map(|(k, _)| k))
        .chain(exp.weakargs.iter().map(|(k, _)| k));
    for name in names {
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(invalid(format!("argument name '{}' is reserved", name)));
        }
        if seen.contains(&name.as_str()) {
            return Err(invalid(format!("argument '{}' is declared twice", name)));
        }
        seen.push(name);
    }
    Ok(())
}

/// Weak arguments may refer to `p`, `depth`, the swept arguments and any
/// weak argument declared before them.
fn check_weak_expressions(exp: &Experiment) -> SweepResult<()> {
    let scope = exp.expression_scope();
    let fixed = 2 + exp.optargs.len() + exp.pairargs.len();
    for (idx, (name, expr)) in exp.weakargs.iter().enumerate() {
        let visible = &scope[..fixed + idx];
        Program::compile(expr, |ident| visible.iter().position(|n| n == ident))
            .map_err(|e| invalid(format!("weak arg '{}': {}", name, e)))?;
    }
    Ok(())
}
