//! Line extractors: turning free-form program output into key/value pairs.
//!
//! An extractor is built once per parse run from its parameters, told about
//! each new file, then fed every line. Its state lives in the value itself.

use crate::error::{SweepError, SweepResult};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_EXTRACTOR: &str = "default-key-value";
pub const BUILTIN_EXTRACTORS: [&str; 3] = [DEFAULT_EXTRACTOR, "regex", "regex-observation"];
/// Tag of untagged lines, and the tag selected when none is requested.
pub const DEFAULT_TAG: &str = "default";

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    NoMatch,
    Pair {
        key: String,
        value: Value,
        tag: Option<String>,
    },
    /// One sub-observation.
    Batch {
        kvs: Vec<(String, Value)>,
        tag: Option<String>,
    },
}

impl ParsedLine {
    pub fn tag(&self) -> Option<&str> {
        match self {
            ParsedLine::NoMatch => None,
            ParsedLine::Pair { tag, .. } | ParsedLine::Batch { tag, .. } => tag.as_deref(),
        }
    }

    /// A line passes only under its own tag; untagged lines carry [`DEFAULT_TAG`].
    pub fn accepted_by(&self, filter: Option<&str>) -> bool {
        self.tag().unwrap_or(DEFAULT_TAG) == filter.unwrap_or(DEFAULT_TAG)
    }
}

pub trait LineExtractor {
    fn name(&self) -> &str;

    /// Text identifying this extractor and its parameters, hashed into the parse dump.
    fn definition(&self) -> String;

    fn on_new_file(&mut self, _file: &str) {}

    /// `Err` marks the line as unparseable; the caller keeps going.
    fn parse_line(&mut self, line: &str) -> Result<ParsedLine, String>;
}

/// Split on the first `:` into a trimmed key and value.
fn split_key_value(text: &str) -> Result<(String, String), String> {
    let (key, value) = text
        .split_once(':')
        .ok_or_else(|| format!("expected 'key: value' in '{}'", text.trim()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("key needs to have length > 0".to_string());
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Lines of the form `dbx.kv key: value`, `dbx.kv.<tag> key: value` and
/// `dbx.obs {"key": value, ...}`.
#[derive(Debug, Default)]
pub struct DefaultKeyValue;

impl LineExtractor for DefaultKeyValue {
    fn name(&self) -> &str {
        DEFAULT_EXTRACTOR
    }

    fn definition(&self) -> String {
        DEFAULT_EXTRACTOR.to_string()
    }

    fn parse_line(&mut self, line: &str) -> Result<ParsedLine, String> {
        let Some(rest) = line.strip_prefix("dbx.") else {
            return Ok(ParsedLine::NoMatch);
        };
        if let Some(tagged) = rest.strip_prefix("kv.") {
            let (tag, kv) = tagged.split_once(char::is_whitespace).unwrap_or((tagged, ""));
            let (key, value) = split_key_value(kv)?;
            return Ok(ParsedLine::Pair {
                key,
                value: Value::String(value),
                tag: Some(tag.to_string()),
            });
        }
        if let Some(kv) = rest.strip_prefix("kv") {
            let (key, value) = split_key_value(kv)?;
            return Ok(ParsedLine::Pair {
                key,
                value: Value::String(value),
                tag: None,
            });
        }
        if let Some(json) = rest.strip_prefix("obs") {
            let parsed: Value = serde_json::from_str(json.trim()).map_err(|e| e.to_string())?;
            let Value::Object(map) = parsed else {
                return Err("dbx.obs payload must be a JSON object".to_string());
            };
            return Ok(ParsedLine::Batch {
                kvs: map.into_iter().collect(),
                tag: None,
            });
        }
        Err(format!("unknown dbx type in '{}'", line.trim()))
    }
}

/// Lowercase words joined by `_`, splitting camelCase and punctuation.
pub fn snake_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if c.is_alphanumeric() {
            let boundary = match prev {
                None => false,
                Some(p) if !p.is_alphanumeric() => !out.is_empty(),
                Some(p) => c.is_uppercase() && (p.is_lowercase() || p.is_ascii_digit()),
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        }
        prev = Some(c);
    }
    out
}

fn compile(pattern: &str) -> SweepResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| SweepError::Validation(format!("invalid extractor regex '{}': {}", pattern, e)))
}

/// Each parameter is a regex with two capture groups: key and value.
#[derive(Debug)]
pub struct RegexPairs {
    patterns: Vec<Regex>,
    definition: String,
}

impl RegexPairs {
    pub fn new(params: &[String], definition: String) -> SweepResult<Self> {
        if params.is_empty() {
            return Err(SweepError::Validation(
                "the regex extractor needs at least one pattern".to_string(),
            ));
        }
        let patterns = params.iter().map(|p| compile(p)).collect::<SweepResult<Vec<_>>>()?;
        for re in &patterns {
            if re.captures_len() < 3 {
                return Err(SweepError::Validation(format!(
                    "extractor regex '{}' needs two capture groups (key and value)",
                    re.as_str()
                )));
            }
        }
        Ok(Self {
            patterns,
            definition,
        })
    }
}

impl LineExtractor for RegexPairs {
    fn name(&self) -> &str {
        "regex"
    }

    fn definition(&self) -> String {
        self.definition.clone()
    }

    fn parse_line(&mut self, line: &str) -> Result<ParsedLine, String> {
        for re in &self.patterns {
            if let Some(caps) = re.captures(line) {
                let key = caps.get(1).map(|m| snake_case(m.as_str())).unwrap_or_default();
                let value = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
                if key.is_empty() {
                    return Err(format!("regex '{}' captured an empty key", re.as_str()));
                }
                return Ok(ParsedLine::Pair {
                    key,
                    value: Value::String(value),
                    tag: None,
                });
            }
        }
        Ok(ParsedLine::NoMatch)
    }
}

/// First parameter selects lines; the rest name the whitespace-separated
/// values that follow the first token. Every matching line is one observation.
#[derive(Debug)]
pub struct RegexObservation {
    line: Regex,
    keys: Vec<String>,
    definition: String,
}

impl RegexObservation {
    pub fn new(params: &[String], definition: String) -> SweepResult<Self> {
        let (first, keys) = params.split_first().ok_or_else(|| {
            SweepError::Validation(
                "the regex-observation extractor needs a line regex followed by value names".to_string(),
            )
        })?;
        Ok(Self {
            line: compile(first)?,
            keys: keys.to_vec(),
            definition,
        })
    }
}

impl LineExtractor for RegexObservation {
    fn name(&self) -> &str {
        "regex-observation"
    }

    fn definition(&self) -> String {
        self.definition.clone()
    }

    fn parse_line(&mut self, line: &str) -> Result<ParsedLine, String> {
        if !self.line.is_match(line) {
            return Ok(ParsedLine::NoMatch);
        }
        let kvs = self
            .keys
            .iter()
            .cloned()
            .zip(line.split_whitespace().skip(1).map(|v| Value::String(v.to_string())))
            .collect();
        Ok(ParsedLine::Batch { kvs, tag: None })
    }
}

/// `$SWEEP_HOME/parsers/<name>.yml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct UserExtractor {
    kind: String,
    #[serde(default)]
    params: Vec<String>,
}

fn builtin_definition(name: &str, params: &[String]) -> String {
    let mut text = name.to_string();
    for p in params {
        text.push('\n');
        text.push_str(p);
    }
    text
}

fn build(kind: &str, params: &[String], definition: String) -> SweepResult<Option<Box<dyn LineExtractor>>> {
    let extractor: Box<dyn LineExtractor> = match kind {
        DEFAULT_EXTRACTOR => Box::new(DefaultKeyValue),
        "regex" => Box::new(RegexPairs::new(params, definition)?),
        "regex-observation" => Box::new(RegexObservation::new(params, definition)?),
        _ => return Ok(None),
    };
    Ok(Some(extractor))
}

/// Late-bind an extractor by name; user definitions shadow built-ins.
pub fn extractor_by_name(
    name: &str,
    params: &[String],
    sweep_home: Option<&Path>,
) -> SweepResult<Box<dyn LineExtractor>> {
    if let Some(home) = sweep_home {
        let path = home.join("parsers").join(format!("{}.yml", name));
        if path.is_file() {
            let text = fs::read_to_string(&path).map_err(|e| SweepError::io(&path, e))?;
            let user: UserExtractor = serde_yaml::from_str(&text).map_err(|e| {
                SweepError::Validation(format!("extractor {}: {}", path.display(), e))
            })?;
            let mut all = user.params.clone();
            all.extend(params.iter().cloned());
            debug!(name, kind = %user.kind, path = %path.display(), "loaded user extractor");
            let definition = format!("{}\n{}", text, all.join("\n"));
            return build(&user.kind, &all, definition)?
                .ok_or_else(|| SweepError::UnknownExtractor(format!("{} (kind {})", name, user.kind)));
        }
    }
    build(name, params, builtin_definition(name, params))?
        .ok_or_else(|| SweepError::UnknownExtractor(name.to_string()))
}
