//! Hierarchical browser acceptance-test execution engine.
//!
//! This crate drives a suite of browser acceptance tests organized as a tree
//! of categories and tests, with per-category setup/teardown, shared run
//! context, failure isolation and persisted run history. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (entity model, result
//!   derivation, plan building, name matching). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (filesystem discovery, context
//!   store, run storage, heal requests, configuration).
//!
//! Orchestration modules ([`engine`], [`service`], [`stress`]) coordinate
//! core logic with I/O behind the [`executor`] and [`session`] boundaries,
//! which the embedding application implements for its actual browser stack.

pub mod core;
pub mod engine;
pub mod events;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod reporter;
pub mod service;
pub mod session;
pub mod stress;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
