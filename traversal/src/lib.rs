//! Lazy, pull-driven traversal pipelines with a repeat step.
//!
//! A [`pipeline::Pipeline`] is an ordered chain of steps. Results are pulled
//! from its end one traverser at a time; nothing runs until someone asks.
//! [`step::RepeatStep`] loops each traverser through a nested pipeline until an
//! `until` predicate holds, optionally surfacing intermediate copies through an
//! `emit` predicate.
//!
//! - **[`core`]**: Traversers, predicates and the shared side-effect context.
//!   No I/O.
//! - **[`step`]** and **[`pipeline`]**: The pull protocol and the steps built
//!   on it.
//! - **[`io`]**: Config and query files for the `traversal` CLI.
//!
//! [`run`] compiles a query file and drains it for `traversal run`.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod run;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
