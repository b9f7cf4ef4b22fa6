//! Orchestration for `traversal run`: compile a query and pull its outputs.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::io::config::TraversalConfig;
use crate::io::query::{QueryFile, load_query};
use crate::step::Step;

/// One traverser surfaced by the query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Output {
    pub value: Value,
    pub loops: u32,
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub outputs: Vec<Output>,
    /// Pulling stopped at the limit, not at exhaustion.
    pub limit_reached: bool,
    pub side_effects: BTreeMap<String, Value>,
}

/// Pull at most `limit` outputs from `query`, calling `on_output` for each as
/// it is produced.
///
/// Stops immediately on a step failure; outputs already handed to
/// `on_output` stay delivered.
#[instrument(skip_all, fields(limit = limit, seeds = query.seeds.len()))]
pub fn run_query<F>(query: &QueryFile, limit: usize, mut on_output: F) -> Result<RunOutcome>
where
    F: FnMut(&Output) -> Result<()>,
{
    let mut pipeline = query.compile().context("compile query")?;

    let mut outputs = Vec::new();
    let mut limit_reached = false;
    loop {
        if outputs.len() >= limit {
            limit_reached = true;
            break;
        }
        let Some(traverser) = pipeline.next()? else {
            break;
        };
        let output = Output {
            loops: traverser.loops(),
            value: traverser.into_value(),
        };
        on_output(&output)?;
        outputs.push(output);
    }

    info!(outputs = outputs.len(), limit_reached, "query finished");
    Ok(RunOutcome {
        outputs,
        limit_reached,
        side_effects: pipeline.side_effects().snapshot(),
    })
}

/// Load `path` and run it. The limit is `limit`, else the query's own
/// `limit`, else the config's `max_outputs`.
pub fn run_query_file<F>(
    path: &Path,
    config: &TraversalConfig,
    limit: Option<usize>,
    on_output: F,
) -> Result<RunOutcome>
where
    F: FnMut(&Output) -> Result<()>,
{
    let query = load_query(path)?;
    let limit = limit.or(query.limit).unwrap_or(config.max_outputs);
    run_query(&query, limit, on_output)
}
