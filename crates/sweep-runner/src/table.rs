//! Normalized result tables and the select/order/filter query engine.

use crate::error::{SweepError, SweepResult};
use crate::expr::{ExprError, ExprValue, Program};
use crate::parse::Observation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::warn;

/// Marks provenance and parameter columns (`_file`, `_cmd`, `_p`, ...).
pub const PROVENANCE_PREFIX: &str = "_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Header comes from the observation with the most keys (first one wins a
    /// tie); missing values become `null`.
    pub fn from_observations(observations: &[Observation]) -> Table {
        let Some(widest) = observations
            .iter()
            .rev()
            .max_by_key(|o| o.values.len())
        else {
            return Table::default();
        };
        let header: Vec<String> = widest.values.keys().cloned().collect();
        let rows = observations
            .iter()
            .map(|obs| {
                if obs.values.len() > header.len() {
                    warn!(
                        file = %obs.file,
                        keys = obs.values.len(),
                        header = header.len(),
                        "observation has more keys than the header"
                    );
                }
                header
                    .iter()
                    .map(|key| match obs.values.get(key) {
                        Some(v) => v.clone(),
                        None => {
                            warn!(file = %obs.file, key = %key, "key missing from observation");
                            Value::Null
                        }
                    })
                    .collect()
            })
            .collect();
        Table { header, rows }
    }

    /// Exact header name first, then the same name with the provenance prefix.
    pub fn resolve_column(&self, name: &str) -> SweepResult<usize> {
        if let Some(idx) = self.header.iter().position(|h| h == name) {
            return Ok(idx);
        }
        let prefixed = format!("{}{}", PROVENANCE_PREFIX, name);
        self.header
            .iter()
            .position(|h| *h == prefixed)
            .ok_or_else(|| SweepError::UnknownColumn(name.to_string()))
    }

    pub fn select(&self, columns: &[String]) -> SweepResult<Table> {
        let indices = columns
            .iter()
            .map(|c| self.resolve_column(c))
            .collect::<SweepResult<Vec<_>>>()?;
        Ok(Table {
            header: indices.iter().map(|&i| self.header[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Stable multi-key sort; a leading `~` sorts that key descending.
    pub fn order(&self, keys: &[String]) -> SweepResult<Table> {
        let keys = self.sort_keys(keys)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            keys.iter()
                .map(|&(idx, descending)| compare_values(&a[idx], &b[idx], descending))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(Table {
            header: self.header.clone(),
            rows,
        })
    }

    fn sort_keys(&self, keys: &[String]) -> SweepResult<Vec<(usize, bool)>> {
        keys.iter()
            .map(|key| {
                let (name, descending) = match key.strip_prefix('~') {
                    Some(rest) => (rest, true),
                    None => (key.as_str(), false),
                };
                Ok((self.resolve_column(name)?, descending))
            })
            .collect()
    }

    /// Keep rows for which `expression` is truthy.
    pub fn filter(&self, expression: &str) -> SweepResult<Table> {
        let program = self.compile_filter(expression)?;
        let rows = self
            .rows
            .iter()
            .filter(|row| {
                program
                    .eval(|slot| ExprValue::from_json(&row[slot]))
                    .truthy()
            })
            .cloned()
            .collect();
        Ok(Table {
            header: self.header.clone(),
            rows,
        })
    }

    fn compile_filter(&self, expression: &str) -> SweepResult<Program> {
        Program::compile(expression, |ident| self.resolve_column(ident).ok()).map_err(|e| match e {
            ExprError::UnknownIdentifier { name, .. } => SweepError::UnknownColumn(name),
            syntax => SweepError::InvalidFilterExpression(syntax.to_string()),
        })
    }

    pub fn to_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| self.header.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Number(_) => 0,
        Value::Bool(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) | Value::Object(_) => 3,
        Value::Null => 4,
    }
}

/// Numbers before booleans before strings; nulls always last.
fn compare_values(a: &Value, b: &Value, descending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    let ord = match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    };
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

/// Comma-separated column list, tolerant of spaces and empty entries.
pub fn parse_column_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Filter, then order, then select.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<String>,
    pub order: Vec<String>,
    pub select: Vec<String>,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        self.filter.is_none() && self.order.is_empty() && self.select.is_empty()
    }

    /// Every column reference is checked before any row is touched.
    pub fn apply(&self, table: &Table) -> SweepResult<Table> {
        for column in &self.select {
            table.resolve_column(column)?;
        }
        table.sort_keys(&self.order)?;
        let filtered = match &self.filter {
            Some(expr) => table.filter(expr)?,
            None => table.clone(),
        };
        let ordered = if self.order.is_empty() {
            filtered
        } else {
            filtered.order(&self.order)?
        };
        if self.select.is_empty() {
            Ok(ordered)
        } else {
            ordered.select(&self.select)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tsv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tsv" => Ok(OutputFormat::Tsv),
            "json" => Ok(OutputFormat::Json),
            other => Err(SweepError::Validation(format!(
                "unknown output format '{}' (expected tsv or json)",
                other
            ))),
        }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn render(table: &Table, format: OutputFormat) -> SweepResult<String> {
    match format {
        OutputFormat::Tsv => {
            let mut out = table.header.join("\t");
            out.push('\n');
            for row in &table.rows {
                let cells: Vec<String> = row.iter().map(cell).collect();
                out.push_str(&cells.join("\t"));
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => {
            let mut out = serde_json::to_string_pretty(&table.to_objects())?;
            out.push('\n');
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(header: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table {
            header: header.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    fn cols(text: &str) -> Vec<String> {
        parse_column_list(text)
    }

    fn df() -> Table {
        table(
            &["a", "b", "c", "_d"],
            vec![
                vec![json!(0.1), json!(2), json!("a"), json!(0)],
                vec![json!(0.5), json!(20), json!("z"), json!(1)],
                vec![json!(10.1), json!(-2), json!("!foo"), json!(2)],
            ],
        )
    }

    fn df2() -> Table {
        table(
            &["a", "b", "_c"],
            vec![
                vec![json!(2), json!(20), json!("a")],
                vec![json!(2), json!(0), json!("z")],
                vec![json!(3), json!(-2), json!("!foo")],
                vec![json!(13), json!(-500), json!("!bar")],
            ],
        )
    }

    fn obs(file: &str, pairs: &[(&str, Value)]) -> Observation {
        Observation {
            file: file.to_string(),
            values: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn select_projects_and_reorders() {
        let m = df().select(&cols("c,b")).expect("select");
        assert_eq!(m.header, vec!["c", "b"]);
        assert_eq!(m.rows[2], vec![json!("!foo"), json!(-2)]);
        assert_eq!(df().select(&cols("a, b ,c,_d")).expect("all"), df());
        assert!(matches!(
            df().select(&cols("x")),
            Err(SweepError::UnknownColumn(c)) if c == "x"
        ));
    }

    #[test]
    fn bare_names_fall_back_to_provenance_columns() {
        let m = df().select(&cols("a,d")).expect("select");
        assert_eq!(m.header, vec!["a", "_d"]);
        assert_eq!(m.rows[1], vec![json!(0.5), json!(1)]);

        let ambiguous = table(&["p", "_p"], vec![vec![json!(0), json!(2)]]);
        let m = ambiguous.select(&cols("p")).expect("exact");
        assert_eq!(m.header, vec!["p"]);
        assert_eq!(m.rows[0], vec![json!(0)]);
        let m = ambiguous.select(&cols("_p")).expect("prefixed");
        assert_eq!(m.rows[0], vec![json!(2)]);
    }

    #[test]
    fn order_is_stable_with_descending_keys() {
        let m = df2().order(&cols("a,b")).expect("order");
        assert_eq!(m.rows[0], vec![json!(2), json!(0), json!("z")]);
        assert_eq!(m.rows[1], vec![json!(2), json!(20), json!("a")]);
        assert_eq!(m.rows[3], vec![json!(13), json!(-500), json!("!bar")]);

        for spec in ["~b,_c", "~b,c"] {
            let m = df2().order(&cols(spec)).expect("order");
            let firsts: Vec<Value> = m.rows.iter().map(|r| r[1].clone()).collect();
            assert_eq!(firsts, vec![json!(20), json!(0), json!(-2), json!(-500)]);
        }

        let m = df2().order(&cols("a")).expect("order");
        assert_eq!(m.rows[0][2], json!("a"), "ties keep input order");
        assert_eq!(m.rows[1][2], json!("z"));
    }

    #[test]
    fn nulls_sort_last_either_way() {
        let t = table(&["x"], vec![vec![Value::Null], vec![json!(1)], vec![json!(3)]]);
        let asc = t.order(&cols("x")).expect("asc");
        assert_eq!(asc.rows.last().unwrap()[0], Value::Null);
        let desc = t.order(&cols("~x")).expect("desc");
        assert_eq!(desc.rows[0][0], json!(3));
        assert_eq!(desc.rows.last().unwrap()[0], Value::Null);
    }

    #[test]
    fn filter_is_compiled_once_and_sandboxed() {
        let m = df().filter("b > 0 && d < 2").expect("filter");
        assert_eq!(m.rows.len(), 2);
        let m = df().filter("c == \"z\" || abs(b) == 2").expect("filter");
        assert_eq!(m.rows.len(), 3);
        assert!(matches!(
            df().filter("b >"),
            Err(SweepError::InvalidFilterExpression(_))
        ));
        assert!(matches!(
            df().filter("missing > 1"),
            Err(SweepError::UnknownColumn(c)) if c == "missing"
        ));
    }

    #[test]
    fn query_validates_everything_up_front() {
        let q = Query {
            filter: Some("b >= 0".to_string()),
            order: cols("~a"),
            select: cols("c,a"),
        };
        let m = q.apply(&df()).expect("query");
        assert_eq!(m.header, vec!["c", "a"]);
        assert_eq!(m.rows, vec![vec![json!("z"), json!(0.5)], vec![json!("a"), json!(0.1)]]);

        let bad = Query {
            filter: None,
            order: cols("nope"),
            select: Vec::new(),
        };
        assert!(matches!(bad.apply(&df()), Err(SweepError::UnknownColumn(_))));
    }

    #[test]
    fn header_comes_from_the_widest_observation() {
        let observations = vec![
            obs("r1", &[("_p", json!(1)), ("a", json!(1)), ("b", json!(2))]),
            obs("r2", &[("_p", json!(2)), ("a", json!(1)), ("b", json!(2))]),
            obs(
                "r3",
                &[("_p", json!(4)), ("a", json!(1)), ("b", json!(2)), ("c", json!(3)), ("d", json!(4))],
            ),
        ];
        let t = Table::from_observations(&observations);
        assert_eq!(t.header, vec!["_p", "a", "b", "c", "d"]);
        assert_eq!(t.rows[0], vec![json!(1), json!(1), json!(2), Value::Null, Value::Null]);
        assert_eq!(t.rows.len(), 3);
        assert!(t.rows.iter().all(|r| r.len() == t.header.len()));

        let tie = vec![obs("x", &[("first", json!(1))]), obs("y", &[("second", json!(1))])];
        assert_eq!(Table::from_observations(&tie).header, vec!["first"]);
        assert_eq!(Table::from_observations(&[]), Table::default());
    }

    #[test]
    fn rendering() {
        let t = table(&["a", "b"], vec![vec![json!(1), Value::Null], vec![json!("x y"), json!(2.5)]]);
        assert_eq!(render(&t, OutputFormat::Tsv).unwrap(), "a\tb\n1\tnull\nx y\t2.5\n");
        let json: Value = serde_json::from_str(&render(&t, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[1]["a"], json!("x y"));
        assert_eq!(json[0]["b"], Value::Null);
        assert!("csv".parse::<OutputFormat>().is_err());
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
    }
}
