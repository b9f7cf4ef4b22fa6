//! Test-only helpers for building sources, loop bodies and query files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::core::predicate::{Predicate, try_from_fn};
use crate::core::side_effects::SideEffects;
use crate::core::traverser::Traverser;
use crate::pipeline::Pipeline;
use crate::step::{RepeatStep, SourceStep, Step, drain};

/// Upstream step yielding `values` in order, bound to `side_effects`.
pub fn source<T: 'static>(values: Vec<T>, side_effects: &SideEffects) -> Box<dyn Step<T>> {
    Box::new(SourceStep::new(values, side_effects))
}

/// Loop body that doubles its input.
pub fn doubling_body() -> Pipeline<i64> {
    let mut body = Pipeline::new();
    body.map("x2", |t: &Traverser<i64>| Ok(t.value() * 2))
        .expect("map step");
    body
}

/// Loop body that passes values through and increments `key` in the
/// side-effect context once per element.
pub fn counting_body(key: &str) -> Pipeline<i64> {
    let key = key.to_string();
    let mut body = Pipeline::new();
    body.side_effect(format!("count({key})"), move |t: &Traverser<i64>| {
        t.side_effects().update(key.as_str(), |current| {
            json!(current.and_then(|v| v.as_i64()).unwrap_or(0) + 1)
        });
        Ok(())
    })
    .expect("side effect step");
    body
}

/// Repeat step over `values` with a fresh context and no configuration yet.
pub fn repeat_over(values: Vec<i64>) -> (RepeatStep<i64>, SideEffects) {
    let side_effects = SideEffects::new();
    let mut repeat = RepeatStep::new(&side_effects);
    repeat.add_starts(source(values, &side_effects));
    (repeat, side_effects)
}

/// Predicate that fails once a value reaches `threshold`.
pub fn failing_at(threshold: i64) -> impl Predicate<i64> + 'static {
    try_from_fn("failing", move |t: &Traverser<i64>| {
        if *t.value() >= threshold {
            Err(anyhow!("predicate failed at {}", t.value()))
        } else {
            Ok(false)
        }
    })
}

/// Drain `step` into `(value, loops)` pairs.
pub fn outputs<S: Step<i64> + ?Sized>(step: &mut S) -> Vec<(i64, u32)> {
    drain(step)
        .expect("drain")
        .into_iter()
        .map(|t| (*t.value(), t.loops()))
        .collect()
}

/// A query file written into its own temp directory.
pub struct TempQuery {
    dir: TempDir,
    path: PathBuf,
}

impl TempQuery {
    pub fn new(contents: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp dir")?;
        let path = dir.path().join("query.toml");
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the query; usable as a working directory.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file next to the query, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}
