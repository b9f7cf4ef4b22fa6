//! File-backed inputs for the traversal CLI.

pub mod config;
pub mod graph;
pub mod query;
