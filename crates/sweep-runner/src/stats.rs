//! Repeated-measurement aggregation.

use crate::parse::FailureKind;
use serde_json::{Map, Value};

/// Two-sided 95% Student's t critical values for 1..=30 degrees of freedom.
const T_TABLE: [f64; 30] = [
    12.70620, 4.30265, 3.18245, 2.77645, 2.57058, 2.44691, 2.36462, 2.30600, 2.26216, 2.22814,
    2.20099, 2.17881, 2.16037, 2.14479, 2.13145, 2.11991, 2.10982, 2.10092, 2.09302, 2.08596,
    2.07961, 2.07387, 2.06866, 2.06390, 2.05954, 2.05553, 2.05183, 2.04841, 2.04523, 2.04227,
];
const T_INFINITY: f64 = 1.95996;
const SIGNIFICANT_DIGITS: i32 = 6;

pub const AGGREGATE_SUFFIXES: [&str; 6] = ["mean", "conf", "stddev", "min", "max", "samples"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
    /// Half-width of the 95% confidence interval around `mean`.
    pub conf: f64,
}

/// Critical value for a sample of `samples` values (`samples - 1` degrees of freedom).
pub fn t_critical(samples: usize) -> f64 {
    if samples > T_TABLE.len() {
        return T_INFINITY;
    }
    match samples.checked_sub(2) {
        Some(idx) => T_TABLE[idx],
        None => 0.0,
    }
}

/// Population statistics; `None` for an empty slice.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let conf = t_critical(values.len()) * stddev / n.sqrt();
    Some(Summary {
        mean,
        stddev,
        min,
        max,
        samples: values.len(),
        conf,
    })
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Six significant digits; exponential outside `[1e-4, 1e6)`.
pub fn format_significant(x: f64) -> String {
    if x == 0.0 {
        return "0".to_string();
    }
    if !x.is_finite() {
        return x.to_string();
    }
    let magnitude = x.abs();
    if (1e-4..1e6).contains(&magnitude) {
        let exponent = magnitude.log10().floor() as i32;
        let decimals = (SIGNIFICANT_DIGITS - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, x)).to_string()
    } else {
        let text = format!("{:.*e}", (SIGNIFICANT_DIGITS - 1) as usize, x);
        match text.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", trim_fraction(mantissa), exp),
            None => text,
        }
    }
}

/// Interpret a raw extracted value as a number.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|x| x.is_finite()),
        _ => None,
    }
}

/// Fold repeated keys of one observation.
///
/// Single keys pass through. Repeated keys keep their first value unless
/// `allow_aggregate` is set, in which case they expand into the six summary
/// columns at the position of the first occurrence.
pub fn aggregate(pairs: Vec<(String, Value)>, allow_aggregate: bool) -> (Map<String, Value>, Vec<FailureKind>) {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (key, value) in pairs {
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => grouped.push((key, vec![value])),
        }
    }

    let mut out = Map::new();
    let mut issues = Vec::new();
    for (key, mut values) in grouped {
        if values.len() == 1 {
            out.insert(key, values.remove(0));
            continue;
        }
        if !allow_aggregate {
            issues.push(FailureKind::DuplicateKey { key: key.clone() });
            out.insert(key, values.remove(0));
            continue;
        }
        let numbers: Result<Vec<f64>, &Value> = values
            .iter()
            .map(|v| as_number(v).ok_or(v))
            .collect();
        match numbers.ok().as_deref().and_then(summarize) {
            Some(s) => {
                let fields = [s.mean, s.conf, s.stddev, s.min, s.max];
                for (suffix, x) in AGGREGATE_SUFFIXES.iter().zip(fields) {
                    out.insert(format!("{}_{}", key, suffix), Value::String(format_significant(x)));
                }
                out.insert(format!("{}_samples", key), Value::from(s.samples));
            }
            None => {
                let bad = values
                    .iter()
                    .find(|v| as_number(v).is_none())
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                issues.push(FailureKind::NonNumericSample { key: key.clone(), value: bad });
                out.insert(key, values.remove(0));
            }
        }
    }
    (out, issues)
}
