//! Generic Attribute Filter Engine
//!
//! Narrows a collection of heterogeneous records with a list of clauses:
//!
//! ```json
//! [{"Name": "Placement.AvailabilityZone", "Values": ["us-east-1a"]},
//!  {"Name": "object_count", "Values": [100], "check": "gt"},
//!  {"Name": "Name", "Values": ["^web-"], "regex": true}]
//! ```
//!
//! Each matching clause counts once per record. In `Any` mode a record is kept
//! when at least one clause matched, in `All` mode when every clause did. A
//! clause whose path resolves to nothing (or `null`) does not count.

use crate::error::InvalidFilterSpec;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// How a clause compares the resolved value with its `Values`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Eq,
    Gt,
    Lt,
}

/// How per-clause matches combine for one record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregation {
    /// Logical OR
    #[default]
    Any,
    /// Logical AND
    All,
}

#[derive(Debug, Clone)]
pub struct FilterClause {
    /// Attribute path, dotted (`Placement.AvailabilityZone`, `Instances.0.State`)
    pub name: String,
    pub values: Vec<Value>,
    pub check: Comparison,
    pub regex: bool,
    patterns: Vec<Regex>,
    bounds: Vec<f64>,
}

impl FilterClause {
    /// Build a validated clause. `index` only labels errors.
    pub fn new(
        index: usize,
        name: impl Into<String>,
        values: Vec<Value>,
        check: Comparison,
        regex: bool,
    ) -> Result<Self, InvalidFilterSpec> {
        let name = name.into();
        let invalid = |reason: String| InvalidFilterSpec::Clause { index, reason };

        if name.is_empty() {
            return Err(invalid("Name must not be empty".to_string()));
        }
        if values.is_empty() {
            return Err(invalid("Values must be a non-empty list".to_string()));
        }
        if regex && check != Comparison::Eq {
            return Err(invalid("regex clauses cannot use gt/lt".to_string()));
        }

        let mut patterns = Vec::new();
        if regex {
            for value in &values {
                let Some(pattern) = value.as_str() else {
                    return Err(invalid(format!("regex value {} is not a string", value)));
                };
                let compiled = Regex::new(&format!("^(?:{})", pattern))
                    .map_err(|e| invalid(format!("bad regex '{}': {}", pattern, e)))?;
                patterns.push(compiled);
            }
        }

        let mut bounds = Vec::new();
        if check != Comparison::Eq {
            for value in &values {
                let Some(bound) = as_number(value) else {
                    return Err(invalid(format!("{} is not numeric", value)));
                };
                bounds.push(bound);
            }
        }

        Ok(Self {
            name,
            values,
            check,
            regex,
            patterns,
            bounds,
        })
    }

    /// Parse a command-line expression: `KEY=v1,v2`, `KEY~regex`, `KEY>n`, `KEY<n`
    pub fn parse_expression(index: usize, expr: &str) -> Result<Self, InvalidFilterSpec> {
        let bad = || InvalidFilterSpec::Expression(expr.to_string());

        let Some(pos) = expr.find(['=', '~', '>', '<']) else {
            return Err(bad());
        };
        let key = expr[..pos].trim();
        let rest = &expr[pos + 1..];
        if key.is_empty() || rest.is_empty() {
            return Err(bad());
        }

        match &expr[pos..pos + 1] {
            "=" => {
                let values = rest
                    .split(',')
                    .map(|v| Value::String(v.trim().to_string()))
                    .collect();
                Self::new(index, key, values, Comparison::Eq, false)
            }
            "~" => Self::new(
                index,
                key,
                vec![Value::String(rest.to_string())],
                Comparison::Eq,
                true,
            ),
            op => {
                let bound: f64 = rest.trim().parse().map_err(|_| bad())?;
                let check = if op == ">" {
                    Comparison::Gt
                } else {
                    Comparison::Lt
                };
                let value = serde_json::Number::from_f64(bound)
                    .map(Value::Number)
                    .ok_or_else(bad)?;
                Self::new(index, key, vec![value], check, false)
            }
        }
    }

    /// Whether this clause counts as a match for `record`
    pub fn matches(&self, record: &Value) -> bool {
        let Some(resolved) = resolve_path(record, &self.name) else {
            return false;
        };

        let candidates: Vec<&Value> = match resolved {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        if self.regex {
            return candidates.iter().any(|candidate| {
                scalar_text(candidate)
                    .is_some_and(|text| self.patterns.iter().any(|re| re.is_match(&text)))
            });
        }

        match self.check {
            Comparison::Eq => candidates.iter().any(|candidate| self.eq_match(candidate)),
            Comparison::Gt => self.numeric_match(&candidates, |a, b| a > b),
            Comparison::Lt => self.numeric_match(&candidates, |a, b| a < b),
        }
    }

    fn eq_match(&self, candidate: &Value) -> bool {
        match candidate {
            Value::Object(fields) => self.values.iter().any(|value| {
                value.as_object().is_some_and(|wanted| {
                    wanted
                        .iter()
                        .any(|(k, v)| fields.get(k).is_some_and(|have| loose_eq(have, v)))
                })
            }),
            scalar => self.values.iter().any(|value| loose_eq(scalar, value)),
        }
    }

    fn numeric_match(&self, candidates: &[&Value], cmp: impl Fn(f64, f64) -> bool) -> bool {
        candidates
            .iter()
            .filter_map(|c| as_number(c))
            .any(|n| self.bounds.iter().any(|bound| cmp(n, *bound)))
    }
}

/// An ordered, validated list of clauses plus the aggregation mode
#[derive(Debug, Clone)]
pub struct FilterSpec {
    clauses: Vec<FilterClause>,
    aggregation: Aggregation,
}

#[derive(Deserialize)]
struct RawClause {
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Values")]
    values: Option<Value>,
    #[serde(default)]
    check: Option<String>,
    #[serde(default)]
    regex: bool,
}

impl FilterSpec {
    pub fn new(clauses: Vec<FilterClause>) -> Result<Self, InvalidFilterSpec> {
        if clauses.is_empty() {
            return Err(InvalidFilterSpec::Empty);
        }
        Ok(Self {
            clauses,
            aggregation: Aggregation::Any,
        })
    }

    /// Read a JSON clause list (`[{"Name": .., "Values": [..], "check": .., "regex": ..}]`)
    pub fn from_json(spec: &Value) -> Result<Self, InvalidFilterSpec> {
        let Some(entries) = spec.as_array() else {
            return Err(InvalidFilterSpec::Empty);
        };

        let mut clauses = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let invalid = |reason: &str| InvalidFilterSpec::Clause {
                index,
                reason: reason.to_string(),
            };
            let raw: RawClause = serde_json::from_value(entry.clone())
                .map_err(|_| invalid("clause must be an object"))?;
            let name = raw.name.ok_or_else(|| invalid("missing Name"))?;
            let Some(Value::Array(values)) = raw.values else {
                return Err(invalid("Values must be a list"));
            };
            let check = match raw.check.as_deref() {
                None | Some("eq") => Comparison::Eq,
                Some("gt") => Comparison::Gt,
                Some("lt") => Comparison::Lt,
                Some(_) => return Err(invalid("check must be one of eq, gt, lt")),
            };
            clauses.push(FilterClause::new(index, name, values, check, raw.regex)?);
        }

        Self::new(clauses)
    }

    /// Parse a JSON clause list from text
    pub fn from_json_str(text: &str) -> Result<Self, InvalidFilterSpec> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| InvalidFilterSpec::Expression(format!("{}: {}", text, e)))?;
        Self::from_json(&value)
    }

    /// Build from command-line expressions
    pub fn from_expressions<S: AsRef<str>>(exprs: &[S]) -> Result<Self, InvalidFilterSpec> {
        let clauses = exprs
            .iter()
            .enumerate()
            .map(|(index, expr)| FilterClause::parse_expression(index, expr.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(clauses)
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Append clauses from another spec, keeping this spec's aggregation
    pub fn extend(&mut self, other: FilterSpec) {
        self.clauses.extend(other.clauses);
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn matches(&self, record: &Value) -> bool {
        let count = self.clauses.iter().filter(|c| c.matches(record)).count();
        match self.aggregation {
            Aggregation::Any => count >= 1,
            Aggregation::All => count == self.clauses.len(),
        }
    }

    /// Keep matching records, original relative order preserved
    pub fn filter_records(&self, records: Vec<Value>) -> Vec<Value> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }

    /// Keep matching entries of a keyed mapping; keys are untouched
    pub fn filter_keyed(&self, records: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        records
            .into_iter()
            .filter(|(_, record)| self.matches(record))
            .collect()
    }
}

/// Resolve a dotted path. A segment is a map key, or an index into an array.
/// `null` counts as absent.
pub fn resolve_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then_some(current)
}

/// JSON equality, with numbers equal to strings spelling the same number
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => match (as_integer(a), as_integer(b)) {
            (Some(x), Some(y)) => x == y,
            _ => matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y),
        },
        _ => false,
    }
}

/// Exact value of an integral number or integer string
fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
