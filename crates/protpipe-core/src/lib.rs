//! # protpipe Core Library
//!
//! A job-orchestration library for computational protein-design pipelines:
//! it prepares command batches for external structural-biology executables,
//! dispatches them through a job starter, and reconciles the scattered
//! per-invocation score records and structure artifacts they leave behind
//! into one consistent, uniquely indexed pose table.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to keep the
//! pure bookkeeping separate from filesystem mutation and process dispatch.
//!
//! - **[`core`]: The Foundation.** Stateless data models and pure functions:
//!   the decoy-name grammar (`naming`), per-invocation score records
//!   (`record`) and the consolidated score table with its CSV/JSON-lines
//!   persistence (`table`).
//!
//! - **[`engine`]: The Logic Core.** Stateful orchestration primitives: the
//!   bounded retry policy (`retry`), the score reconciler that merges records
//!   and renames artifacts in place (`reconcile`), and local job dispatch
//!   (`jobstarter`).
//!
//! - **[`workflows`]: The Public API.** Complete pipeline stages tying the
//!   layers together: the scoring stage that drives an external modeling
//!   executable end to end (`scoring`) and the sharded batch-script stage
//!   (`batch`), configured through TOML stage descriptions (`config`).

pub mod core;
pub mod engine;
pub mod workflows;
