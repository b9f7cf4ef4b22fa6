//! Deterministic, pure logic of the traversal engine.
//!
//! Core modules are free of I/O. They operate on in-memory traversers and
//! predicates and are fully testable in isolation.

pub mod predicate;
pub mod side_effects;
pub mod traverser;
