//! # Workflows Module
//!
//! High-level pipeline stages: the top-level entry points for users of the
//! library. Each stage validates its inputs, honors the persisted score table
//! as a completion marker so finished stages are skipped on re-run, dispatches
//! its command batch through a job starter and reconciles the outputs.
//!
//! ## Architecture
//!
//! - **Scoring** ([`scoring`]) - Drives an external modeling executable over a
//!   set of poses with per-replica output prefixes, then collects the scores.
//! - **Batch scripts** ([`batch`]) - Shards per-pose argument maps into JSON
//!   input files for auxiliary batch scripts, one command per shard.
//! - **Options** ([`options`]) - Merging and rendering of external-tool
//!   option strings, with screening of reserved options.
//! - **Configuration** ([`config`]) - TOML-backed stage configuration.
//! - **Errors** ([`error`]) - Stage-level error taxonomy.

pub mod batch;
pub mod config;
pub mod error;
pub mod options;
pub mod scoring;
