// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 labflow contributors

//! Stage iteration
//!
//! Expands `iterate_over` axes into concrete values, builds the engine's
//! matrix descriptor, and rewrites `{arg}` placeholders into the engine's
//! per-item syntax (`${item.arg}`).
//!
//! Independent axes become one matrix key each and the engine takes their
//! cartesian product. A linked axis (`arg_name: [a, b]`) becomes a single
//! synthetic key `_arg<i>` whose items are `{a: .., b: ..}` objects, so the
//! engine iterates the tuples pairwise without knowing about linking.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::sync::OnceLock;

use crate::errors::{LabflowError, LabflowResult};
use crate::pipeline::{ArgName, IterValue, Range, Stage, StageIteration};

/// Project-level named parameters
pub type Parameters = IndexMap<String, Value>;

/// Result of expanding one axis
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    /// Values for a single argument name
    Values(Vec<Value>),
    /// One tuple per declared entry, keyed by argument name
    Tuples(Vec<IndexMap<String, Value>>),
}

/// Expand a single iteration axis of `stage`
pub fn expand(
    iteration: &StageIteration,
    parameters: &Parameters,
    stage: &str,
) -> LabflowResult<Expansion> {
    let axis = iteration.arg_name.to_string();
    let malformed = |reason: String| LabflowError::MalformedIteration {
        stage: stage.to_string(),
        axis: axis.clone(),
        reason,
    };

    if iteration.values.is_empty() {
        return Err(malformed("no values to iterate over".into()));
    }

    match &iteration.arg_name {
        ArgName::Single(_) => {
            let mut visiting = Vec::new();
            let values = expand_values(&iteration.values, parameters, stage, &axis, &mut visiting)?;
            Ok(Expansion::Values(values))
        }
        ArgName::Linked(names) => {
            if names.is_empty() {
                return Err(malformed("linked argument list is empty".into()));
            }

            let mut tuples = Vec::with_capacity(iteration.values.len());
            for (i, entry) in iteration.values.iter().enumerate() {
                let IterValue::Literal(Value::Array(items)) = entry else {
                    return Err(malformed(format!(
                        "entry {} must be a list of {} literal values",
                        i,
                        names.len()
                    )));
                };
                if items.len() != names.len() {
                    return Err(malformed(format!(
                        "entry {} has {} values, expected {}",
                        i,
                        items.len(),
                        names.len()
                    )));
                }
                if items.iter().any(is_range_or_parameter) {
                    return Err(malformed(format!(
                        "entry {} contains a range or parameter reference",
                        i
                    )));
                }

                tuples.push(names.iter().cloned().zip(items.iter().cloned()).collect());
            }
            Ok(Expansion::Tuples(tuples))
        }
    }
}

fn expand_values(
    values: &[IterValue],
    parameters: &Parameters,
    stage: &str,
    axis: &str,
    visiting: &mut Vec<String>,
) -> LabflowResult<Vec<Value>> {
    let mut out = Vec::new();

    for value in values {
        match value {
            IterValue::Literal(v) => out.push(v.clone()),
            IterValue::Range(r) => {
                let expanded = expand_range(&r.range).map_err(|reason| {
                    LabflowError::MalformedIteration {
                        stage: stage.to_string(),
                        axis: axis.to_string(),
                        reason,
                    }
                })?;
                out.extend(expanded);
            }
            IterValue::Parameter(p) => {
                let name = &p.parameter;
                if visiting.contains(name) {
                    return Err(LabflowError::MalformedIteration {
                        stage: stage.to_string(),
                        axis: axis.to_string(),
                        reason: format!("parameter '{}' refers to itself", name),
                    });
                }
                let param = parameters.get(name).ok_or_else(|| LabflowError::ParameterNotFound {
                    stage: stage.to_string(),
                    parameter: name.clone(),
                })?;

                let nested = match param {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| serde_json::from_value(item.clone()))
                        .collect::<Result<Vec<IterValue>, _>>()?,
                    scalar => vec![IterValue::Literal(scalar.clone())],
                };

                visiting.push(name.clone());
                out.extend(expand_values(&nested, parameters, stage, axis, visiting)?);
                visiting.pop();
            }
        }
    }

    Ok(out)
}

/// Largest number of values a single range may expand to
pub const MAX_RANGE_VALUES: usize = 100_000;

/// Expand a half-open range by repeated addition
///
/// Integer bounds produce integers. Otherwise values are floats and the
/// step is accumulated as-is, so drift is visible (`0.7 + 0.2` yields
/// `0.8999999999999999`).
pub fn expand_range(range: &Range) -> Result<Vec<Value>, String> {
    if let (Some(start), Some(stop), Some(step)) =
        (range.start.as_i64(), range.stop.as_i64(), range.step.as_i64())
    {
        if step <= 0 {
            return Err(format!("range step must be positive, got {}", step));
        }
        let span = (stop as i128 - start as i128).max(0);
        check_range_size((span + step as i128 - 1) / step as i128)?;

        let mut values = Vec::new();
        let mut current = start;
        while current < stop {
            values.push(Value::from(current));
            match current.checked_add(step) {
                Some(next) => current = next,
                None => break,
            }
        }
        return Ok(values);
    }

    let as_f64 = |n: &Number| n.as_f64().ok_or_else(|| format!("'{}' is not a number", n));
    let (start, stop, step) = (as_f64(&range.start)?, as_f64(&range.stop)?, as_f64(&range.step)?);
    if step <= 0.0 || !step.is_finite() {
        return Err(format!("range step must be positive, got {}", step));
    }
    if stop > start {
        // One extra value of slack for accumulated drift
        let estimate = ((stop - start) / step).ceil();
        if !estimate.is_finite() || estimate > (MAX_RANGE_VALUES + 1) as f64 {
            return Err(format!(
                "range would produce more than {} values",
                MAX_RANGE_VALUES
            ));
        }
    }

    let mut values = Vec::new();
    let mut current = start;
    while current < stop {
        let n = Number::from_f64(current).ok_or_else(|| "range produced a non-finite value".to_string())?;
        values.push(Value::Number(n));
        current += step;
    }
    if values.len() > MAX_RANGE_VALUES {
        return Err(format!(
            "range would produce more than {} values",
            MAX_RANGE_VALUES
        ));
    }
    Ok(values)
}

fn check_range_size(count: i128) -> Result<(), String> {
    if count > MAX_RANGE_VALUES as i128 {
        return Err(format!(
            "range would produce {} values, at most {} are allowed",
            count, MAX_RANGE_VALUES
        ));
    }
    Ok(())
}

fn is_range_or_parameter(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.len() == 1 && (map.contains_key("range") || map.contains_key("parameter"))
        }
        _ => false,
    }
}

/// The engine's iteration construct: matrix key to ordered items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Matrix(pub IndexMap<String, Vec<Value>>);

impl Matrix {
    /// Matrix keys in axis order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of stage instances the engine will create
    pub fn len(&self) -> usize {
        if self.0.is_empty() {
            return 0;
        }
        self.0.values().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cartesian product over all keys, first key varying slowest
    pub fn combinations(&self) -> Vec<IndexMap<String, Value>> {
        if self.0.is_empty() {
            return vec![];
        }

        let mut combos: Vec<IndexMap<String, Value>> = vec![IndexMap::new()];
        for (key, items) in &self.0 {
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    items.iter().map(move |item| {
                        let mut next = combo.clone();
                        next.insert(key.clone(), item.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }
}

/// Matrix plus the placeholder rewrites that go with it
#[derive(Debug, Clone, PartialEq)]
pub struct IterationPlan {
    pub matrix: Matrix,
    pub templater: Templater,
}

/// Build the iteration plan for a stage, or `None` if it does not iterate
pub fn plan(stage: &Stage, parameters: &Parameters) -> LabflowResult<Option<IterationPlan>> {
    let Some(iterations) = &stage.iterate_over else {
        return Ok(None);
    };
    if iterations.is_empty() {
        return Ok(None);
    }

    let mut matrix = IndexMap::new();
    let mut rewrites = IndexMap::new();

    for (index, iteration) in iterations.iter().enumerate() {
        for name in iteration.arg_name.names() {
            if !is_identifier(name) {
                return Err(LabflowError::MalformedIteration {
                    stage: stage.name.clone(),
                    axis: iteration.arg_name.to_string(),
                    reason: format!("'{}' is not a valid argument name", name),
                });
            }
            if rewrites.contains_key(name) {
                return Err(LabflowError::MalformedIteration {
                    stage: stage.name.clone(),
                    axis: iteration.arg_name.to_string(),
                    reason: format!("argument '{}' is iterated more than once", name),
                });
            }
        }

        match expand(iteration, parameters, &stage.name)? {
            Expansion::Values(values) => {
                let name = iteration.arg_name.to_string();
                rewrites.insert(name.clone(), format!("${{item.{}}}", name));
                matrix.insert(name, values);
            }
            Expansion::Tuples(tuples) => {
                let key = format!("_arg{}", index);
                for name in iteration.arg_name.names() {
                    rewrites.insert(name.to_string(), format!("${{item.{}.{}}}", key, name));
                }
                let items = tuples
                    .into_iter()
                    .map(|t| Value::Object(t.into_iter().collect()))
                    .collect();
                matrix.insert(key, items);
            }
        }
    }

    Ok(Some(IterationPlan {
        matrix: Matrix(matrix),
        templater: Templater { rewrites },
    }))
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Names of all `{name}` placeholders in `text`, in order of appearance
pub fn placeholders_in(text: &str) -> Vec<&str> {
    placeholder_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Rewrites `{arg}` tokens into engine per-item expressions
///
/// Braces around names that are not iteration arguments are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Templater {
    rewrites: IndexMap<String, String>,
}

impl Templater {
    pub fn render(&self, text: &str) -> String {
        placeholder_regex()
            .replace_all(text, |caps: &regex::Captures<'_>| match self.rewrites.get(&caps[1]) {
                Some(expr) => expr.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
