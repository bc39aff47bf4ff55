//! Parameter-space expansion and canonical naming.

use crate::error::{SweepError, SweepResult};
use crate::experiment::Experiment;
use crate::expr::{ExprValue, Program};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// One point of the expanded parameter space.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub p: u64,
    pub depth: u64,
    /// Optional then paired arguments, in declaration order.
    pub args: Vec<(String, Value)>,
    pub weak: Vec<(String, Value)>,
    pub queue: Option<String>,
}

/// One (job, command) pair; owns one result file and one metadata descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInstance {
    pub cmd_id: String,
    pub cmd_name: String,
    pub command: String,
}

/// Descriptor persisted to `.md/<cmd_id>.yml` before anything runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub job: String,
    pub cmd: String,
    pub p: u64,
    pub depth: u64,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl JobSpec {
    /// Every value that contributes to the name, in naming order.
    pub fn naming_values(&self) -> Vec<Value> {
        let mut values = vec![Value::from(self.p), Value::from(self.depth)];
        values.extend(self.args.iter().map(|(_, v)| v.clone()));
        values.extend(self.weak.iter().map(|(_, v)| v.clone()));
        values
    }

    pub fn instances(&self, exp: &Experiment) -> Vec<CommandInstance> {
        let values = self.naming_values();
        exp.cmds
            .iter()
            .map(|(cmd_name, command)| CommandInstance {
                cmd_id: name_of(cmd_name, &values),
                cmd_name: cmd_name.clone(),
                command: command.clone(),
            })
            .collect()
    }

    pub fn metadata(&self, instance: &CommandInstance, job_file: &str) -> ResultMetadata {
        let mut params = Map::new();
        for (k, v) in self.args.iter().chain(self.weak.iter()) {
            params.insert(k.clone(), v.clone());
        }
        ResultMetadata {
            job: job_file.to_string(),
            cmd: instance.cmd_name.clone(),
            p: self.p,
            depth: self.depth,
            params,
        }
    }
}

/// Fold a value into a filename-safe, lowercase token.
pub fn name_token(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut token = String::with_capacity(raw.len());
    let mut rest = raw.trim();
    if let Some(stripped) = rest.strip_prefix('-') {
        if stripped.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            token.push_str("neg");
            rest = stripped;
        }
    }
    let mut pending_sep = false;
    for c in rest.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !token.is_empty() {
                token.push('_');
            }
            pending_sep = false;
            token.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if token.is_empty() {
        token.push('_');
    }
    token
}

/// `prefix-v1-v2-...` with every component folded by [`name_token`].
pub fn name_of(prefix: &str, values: &[Value]) -> String {
    let mut parts = Vec::with_capacity(values.len() + 1);
    parts.push(name_token(&Value::String(prefix.to_string())));
    parts.extend(values.iter().map(name_token));
    parts.join("-")
}

/// Pick the first queue whose inclusive upper bound admits `p`.
pub fn determine_queue(queues: &[(String, u64)], p: u64) -> SweepResult<Option<String>> {
    if queues.is_empty() {
        return Ok(None);
    }
    let mut sorted: Vec<&(String, u64)> = queues.iter().collect();
    sorted.sort_by_key(|(_, bound)| *bound);
    let idx = sorted.partition_point(|(_, bound)| *bound < p);
    match sorted.get(idx) {
        Some((name, _)) => Ok(Some(name.clone())),
        None => Err(SweepError::QueueUnspecified { p }),
    }
}

fn cartesian(dims: &[Vec<Value>]) -> Vec<Vec<Value>> {
    dims.iter().fold(vec![Vec::new()], |acc, dim| {
        let mut next = Vec::with_capacity(acc.len() * dim.len());
        for prefix in &acc {
            for value in dim {
                let mut row = prefix.clone();
                row.push(value.clone());
                next.push(row);
            }
        }
        next
    })
}

fn eval_weak(exp: &Experiment, bound: &[ExprValue]) -> SweepResult<Vec<(String, Value)>> {
    let scope = exp.expression_scope();
    let mut values: Vec<ExprValue> = bound.to_vec();
    let mut weak = Vec::with_capacity(exp.weakargs.len());
    for (name, expr) in &exp.weakargs {
        let visible = &scope[..values.len()];
        let program = Program::compile(expr, |ident| visible.iter().position(|n| n == ident))
            .map_err(|e| SweepError::Validation(format!("weak arg '{}': {}", name, e)))?;
        let result = program.eval(|slot| values[slot].clone());
        let json = match &result {
            ExprValue::Num(n) if n.is_finite() => result.to_json(),
            ExprValue::Str(_) | ExprValue::Bool(_) => result.to_json(),
            _ => {
                return Err(SweepError::Validation(format!(
                    "weak arg '{}' = {} did not produce a finite value (got {})",
                    name, expr, result
                )))
            }
        };
        values.push(result);
        weak.push((name.clone(), json));
    }
    Ok(weak)
}

/// Expand `exp` into job specifications.
///
/// The base product is `p × depth × optargs...`; paired arguments are zipped
/// into atomic tuples and crossed with the base. Fails without side effects.
pub fn expand(exp: &Experiment) -> SweepResult<Vec<JobSpec>> {
    let mut dims: Vec<Vec<Value>> = vec![
        exp.p.iter().map(|p| Value::from(*p)).collect(),
        exp.depth.iter().map(|d| Value::from(*d)).collect(),
    ];
    dims.extend(exp.optargs.iter().map(|(_, values)| values.clone()));
    let base = cartesian(&dims);

    let pair_len = exp.pairargs.first().map(|(_, v)| v.len()).unwrap_or(0);
    let pairs: Vec<Vec<Value>> = if exp.pairargs.is_empty() {
        vec![Vec::new()]
    } else {
        (0..pair_len)
            .map(|i| exp.pairargs.iter().map(|(_, v)| v[i].clone()).collect())
            .collect()
    };

    let arg_names: Vec<&String> = exp
        .optargs
        .iter()
        .chain(exp.pairargs.iter())
        .map(|(k, _)| k)
        .collect();

    let mut jobs = Vec::with_capacity(base.len() * pairs.len());
    let mut seen_jobs = BTreeSet::new();
    let mut seen_cmds = BTreeSet::new();
    for tuple in &base {
        for pair in &pairs {
            let p = tuple[0].as_u64().unwrap_or_default();
            let depth = tuple[1].as_u64().unwrap_or_default();
            let values: Vec<Value> = tuple[2..].iter().chain(pair.iter()).cloned().collect();
            let args: Vec<(String, Value)> = arg_names
                .iter()
                .map(|k| (*k).clone())
                .zip(values.iter().cloned())
                .collect();

            let bound: Vec<ExprValue> = tuple[..2]
                .iter()
                .chain(values.iter())
                .map(ExprValue::from_json)
                .collect();
            let weak = eval_weak(exp, &bound)?;
            let queue = determine_queue(&exp.queues, p)?;

            let mut job = JobSpec {
                name: String::new(),
                p,
                depth,
                args,
                weak,
                queue,
            };
            job.name = name_of(&exp.name, &job.naming_values());
            if !seen_jobs.insert(job.name.clone()) {
                return Err(SweepError::Validation(format!(
                    "job name {} is produced by two different parameter tuples",
                    job.name
                )));
            }
            for instance in job.instances(exp) {
                if !seen_cmds.insert(instance.cmd_id.clone()) {
                    return Err(SweepError::Validation(format!(
                        "command id {} is produced twice; command names or values collide after normalization",
                        instance.cmd_id
                    )));
                }
            }
            jobs.push(job);
        }
    }
    debug!(jobs = jobs.len(), "expanded parameter space");
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::parse_experiment;

    fn exp(src: &str) -> Experiment {
        parse_experiment(src).expect("valid experiment")
    }

    const BASE: &str = "name: hello\np: [1, 2, 4, 8, 16]\ncmds: {hello: ./hello}\n";

    #[test]
    fn cardinality_is_product_of_dimensions() {
        let e = exp(&format!(
            "{}optargs:\n  k: [0, 1]\n  q: [a, b, c]\n  w: ['my string', 'your string']\n",
            BASE
        ));
        assert_eq!(expand(&e).unwrap().len(), 5 * 2 * 3 * 2);
    }

    #[test]
    fn paired_arguments_are_zipped() {
        let paired = "pairargs:\n  a: [0, 1, 2]\n  b: [20, 30, 40]\n  c: [100, 200, 300]\n";
        let e = exp(&format!("{}{}", BASE, paired));
        let jobs = expand(&e).unwrap();
        assert_eq!(jobs.len(), 5 * 3);
        for job in &jobs {
            let a = job.args[0].1.as_u64().unwrap();
            let b = job.args[1].1.as_u64().unwrap();
            assert_eq!(b, 20 + 10 * a, "paired tuple split in {}", job.name);
        }

        let e = exp(&format!(
            "{}depth: [1, 2]\noptargs:\n  k: [0, 1]\n  q: [a, b, c]\n{}",
            BASE, paired
        ));
        assert_eq!(expand(&e).unwrap().len(), 5 * 2 * 2 * 3 * 3);
    }

    #[test]
    fn names_are_unique_and_whitespace_free() {
        let e = exp(&format!(
            "{}optargs:\n  w: ['my string', 'your string', 'Mixed-Case.v2']\n",
            BASE
        ));
        let jobs = expand(&e).unwrap();
        let names: BTreeSet<_> = jobs.iter().map(|j| j.name.clone()).collect();
        assert_eq!(names.len(), jobs.len());
        for name in &names {
            assert!(!name.chars().any(char::is_whitespace), "{}", name);
        }
        assert!(names.contains("hello-1-1-my_string"));
        assert!(names.contains("hello-16-1-mixed_case_v2"));
    }

    #[test]
    fn names_follow_declaration_order() {
        let e = exp(
            "name: heat\np: [4]\ndepth: [2]\ncmds: {solve: ./s, check: ./c}\n\
             optargs:\n  n: [10]\npairargs:\n  a: [1]\n  b: [x]\nweakargs:\n  nodes: ceil(p * depth / 3)\n",
        );
        let jobs = expand(&e).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "heat-4-2-10-1-x-3");
        let ids: Vec<String> = jobs[0].instances(&e).into_iter().map(|i| i.cmd_id).collect();
        assert_eq!(ids, vec!["solve-4-2-10-1-x-3", "check-4-2-10-1-x-3"]);
    }

    #[test]
    fn weak_arguments_do_not_multiply_jobs() {
        let e = exp(&format!("{}weakargs:\n  nodes: ceil(p / 4)\n  half: p / 2\n", BASE));
        let jobs = expand(&e).unwrap();
        assert_eq!(jobs.len(), 5);
        let last = jobs.last().unwrap();
        assert_eq!(last.weak[0], ("nodes".to_string(), serde_json::json!(4)));
        assert_eq!(last.weak[1], ("half".to_string(), serde_json::json!(8)));
        assert_eq!(jobs[0].weak[1].1, serde_json::json!(0.5));
        assert_eq!(jobs[0].name, "hello-1-1-1-0_5");
    }

    #[test]
    fn non_finite_weak_results_rejected() {
        let e = exp(&format!("{}weakargs:\n  w: 1 / (p - p)\n", BASE));
        assert!(matches!(expand(&e), Err(SweepError::Validation(_))));
    }

    #[test]
    fn normalization_collisions_are_detected() {
        let e = exp(&format!("{}optargs:\n  w: ['a b', 'a_b']\n", BASE));
        let err = expand(&e).expect_err("collision");
        assert!(err.to_string().contains("hello-1-1-a_b"), "{}", err);
    }

    #[test]
    fn negative_numbers_do_not_collide_with_positive() {
        assert_eq!(name_token(&serde_json::json!(-1)), "neg1");
        assert_eq!(name_token(&serde_json::json!(1)), "1");
        assert_eq!(name_token(&serde_json::json!(1.5)), "1_5");
        assert_eq!(name_token(&serde_json::json!("  ")), "_");
    }

    #[test]
    fn queue_lookup_uses_inclusive_bounds() {
        let queues = vec![
            ("regular".to_string(), 4096),
            ("debug".to_string(), 64),
            ("small".to_string(), 256),
        ];
        assert_eq!(determine_queue(&queues, 1).unwrap().as_deref(), Some("debug"));
        assert_eq!(determine_queue(&queues, 64).unwrap().as_deref(), Some("debug"));
        assert_eq!(determine_queue(&queues, 65).unwrap().as_deref(), Some("small"));
        assert_eq!(determine_queue(&queues, 4096).unwrap().as_deref(), Some("regular"));
        assert!(matches!(
            determine_queue(&queues, 4097),
            Err(SweepError::QueueUnspecified { p: 4097 })
        ));
        assert_eq!(determine_queue(&[], 10).unwrap(), None);
    }

    #[test]
    fn metadata_carries_every_parameter() {
        let e = exp(&format!(
            "{}optargs:\n  mode: [fast]\nweakargs:\n  nodes: ceil(p / 4)\n",
            BASE
        ));
        let jobs = expand(&e).unwrap();
        let job = &jobs[2];
        let inst = &job.instances(&e)[0];
        let md = job.metadata(inst, "experiments/jobs/x/hello.job");
        assert_eq!(md.cmd, "hello");
        assert_eq!(md.p, 4);
        assert_eq!(md.params.get("mode"), Some(&serde_json::json!("fast")));
        assert_eq!(md.params.get("nodes"), Some(&serde_json::json!(1)));
    }
}
