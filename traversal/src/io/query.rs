//! Query files: seeds, an optional graph, and one repeat step.
//!
//! ```toml
//! seeds = ["marko"]
//! limit = 50
//!
//! [graph]
//! edges = [["marko", "josh"], ["josh", "ripple"]]
//!
//! [repeat]
//! body = [{ op = "out" }, { op = "count", key = "hops" }]
//! until = { loops_at_least = 2 }
//! emit = { loops_at_least = 1, mode = "after_each" }
//! ```
//!
//! A condition is exactly one of `loops_at_least`, `value_at_least`,
//! `value_equals`, `always = true` or `never = true`, plus an optional `mode`.
//! Conditions without an explicit `mode` are attached after the loop body,
//! so they run in `after_each` mode.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::predicate::{LoopPredicate, Predicate, PredicateMode, from_fn, try_from_fn};
use crate::core::traverser::Traverser;
use crate::io::graph::{Graph, GraphSpec};
use crate::pipeline::Pipeline;
use crate::step::RepeatStep;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct QueryFile {
    /// Values fed into the query's start, in order.
    pub seeds: Vec<Value>,
    /// Stop after this many outputs. Overrides the config's `max_outputs`.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub graph: GraphSpec,
    pub repeat: RepeatSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepeatSpec {
    pub body: Vec<BodyOp>,
    pub until: Option<ConditionSpec>,
    pub emit: Option<ConditionSpec>,
}

/// One step of the loop body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BodyOp {
    /// Multiply an integer value.
    Mul { by: i64 },
    /// Add to an integer value.
    Add { by: i64 },
    /// Replace a vertex id with each of its outgoing neighbours.
    Out,
    /// Increment the side-effect counter `key`.
    Count { key: String },
}

impl BodyOp {
    pub fn label(&self) -> String {
        match self {
            BodyOp::Mul { by } => format!("mul({by})"),
            BodyOp::Add { by } => format!("add({by})"),
            BodyOp::Out => "out".to_string(),
            BodyOp::Count { key } => format!("count({key})"),
        }
    }
}

const TESTS: &str = "loops_at_least, value_at_least, value_equals, always, never";

/// A single test plus an optional mode. Exactly one test must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConditionSpec {
    pub loops_at_least: Option<u32>,
    pub value_at_least: Option<i64>,
    pub value_equals: Option<Value>,
    pub always: bool,
    pub never: bool,
    pub mode: Option<PredicateMode>,
}

impl ConditionSpec {
    fn validate(&self, slot: &str) -> Result<()> {
        let tests = [
            self.loops_at_least.is_some(),
            self.value_at_least.is_some(),
            self.value_equals.is_some(),
            self.always,
            self.never,
        ];
        match tests.iter().filter(|set| **set).count() {
            1 => Ok(()),
            0 => bail!("repeat.{slot}: one of {TESTS} is required"),
            _ => bail!("repeat.{slot}: only one of {TESTS} may be set"),
        }
    }

    fn predicate(&self) -> Result<Box<dyn Predicate<Value>>> {
        if let Some(loops) = self.loops_at_least {
            return Ok(Box::new(LoopPredicate::new(loops)));
        }
        if let Some(min) = self.value_at_least {
            return Ok(Box::new(try_from_fn(
                format!("value>={min}"),
                move |t: &Traverser<Value>| Ok(integer(t.value())? >= min),
            )));
        }
        if let Some(expected) = self.value_equals.clone() {
            return Ok(Box::new(from_fn(
                format!("value=={expected}"),
                move |t: &Traverser<Value>| *t.value() == expected,
            )));
        }
        if self.always {
            return Ok(Box::new(from_fn("always", |_: &Traverser<Value>| true)));
        }
        if self.never {
            return Ok(Box::new(from_fn("never", |_: &Traverser<Value>| false)));
        }
        Err(anyhow!("condition has no test"))
    }
}

impl QueryFile {
    pub fn validate(&self) -> Result<()> {
        if self.limit == Some(0) {
            return Err(anyhow!("limit must be > 0"));
        }
        for (from, to) in &self.graph.edges {
            if from.trim().is_empty() || to.trim().is_empty() {
                return Err(anyhow!("graph.edges: vertex ids must be non-empty"));
            }
        }
        for op in &self.repeat.body {
            if let BodyOp::Count { key } = op
                && key.trim().is_empty()
            {
                return Err(anyhow!("repeat.body: count key must be non-empty"));
            }
        }
        if let Some(until) = &self.repeat.until {
            until.validate("until")?;
        }
        if let Some(emit) = &self.repeat.emit {
            emit.validate("emit")?;
        }
        Ok(())
    }

    /// Build the query pipeline with every seed already fed.
    ///
    /// The loop body is attached before the conditions, so conditions without
    /// an explicit mode run after each iteration.
    pub fn compile(&self) -> Result<Pipeline<Value>> {
        self.validate()?;
        let graph = Rc::new(Graph::from_spec(&self.graph));

        let mut pipeline = Pipeline::new();
        let mut body = Pipeline::new();
        for op in &self.repeat.body {
            add_op(&mut body, op, &graph)?;
        }

        let mut repeat = RepeatStep::new(pipeline.side_effects());
        repeat
            .attach_loop_body(body)
            .context("attach loop body")?;
        if let Some(until) = &self.repeat.until {
            let predicate = until.predicate()?;
            match until.mode {
                Some(mode) => repeat.attach_until_with_mode(predicate, mode),
                None => repeat.attach_until(predicate),
            };
        }
        if let Some(emit) = &self.repeat.emit {
            let predicate = emit.predicate()?;
            match emit.mode {
                Some(mode) => repeat.attach_emit_with_mode(predicate, mode),
                None => repeat.attach_emit(predicate),
            };
        }
        pipeline.add_repeat(repeat).context("add repeat step")?;

        for seed in &self.seeds {
            pipeline.add_start_value(seed.clone());
        }
        debug!(pipeline = %pipeline, seeds = self.seeds.len(), "compiled query");
        Ok(pipeline)
    }
}

/// Load and validate a query file.
pub fn load_query(path: &Path) -> Result<QueryFile> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let query: QueryFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    query
        .validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(query)
}

fn add_op(body: &mut Pipeline<Value>, op: &BodyOp, graph: &Rc<Graph>) -> Result<()> {
    let label = op.label();
    match op.clone() {
        BodyOp::Mul { by } => {
            body.map(label, move |t: &Traverser<Value>| {
                let value = integer(t.value())?;
                value
                    .checked_mul(by)
                    .map(Value::from)
                    .ok_or_else(|| anyhow!("integer overflow: {value} * {by}"))
            })?;
        }
        BodyOp::Add { by } => {
            body.map(label, move |t: &Traverser<Value>| {
                let value = integer(t.value())?;
                value
                    .checked_add(by)
                    .map(Value::from)
                    .ok_or_else(|| anyhow!("integer overflow: {value} + {by}"))
            })?;
        }
        BodyOp::Out => {
            let graph = Rc::clone(graph);
            body.flat_map(label, move |t: &Traverser<Value>| {
                let vertex = t
                    .value()
                    .as_str()
                    .ok_or_else(|| anyhow!("out expects a vertex id, got {}", t.value()))?;
                Ok(graph
                    .out(vertex)
                    .iter()
                    .map(|neighbour| Value::String(neighbour.clone()))
                    .collect())
            })?;
        }
        BodyOp::Count { key } => {
            body.side_effect(label, move |t: &Traverser<Value>| {
                t.side_effects().update(key.as_str(), |current| {
                    Value::from(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1)
                });
                Ok(())
            })?;
        }
    }
    Ok(())
}

fn integer(value: &Value) -> anyhow::Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("expected an integer value, got {value}"))
}
