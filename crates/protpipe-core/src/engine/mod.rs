//! # Engine Module
//!
//! Stateful orchestration primitives sitting between the pure data models in
//! [`crate::core`] and the user-facing stages in [`crate::workflows`].
//!
//! ## Architecture
//!
//! - **Retry** ([`retry`]) - Bounded polling for externally caused filesystem
//!   convergence, replacing ad-hoc sleep loops with an explicit policy.
//! - **Reconciliation** ([`reconcile`]) - The score reconciler: merges
//!   scattered per-invocation records into one table and renames raw
//!   artifacts to their stable identifiers, in place.
//! - **Job dispatch** ([`jobstarter`]) - The job-starter abstraction the
//!   stages submit command batches through, with a local multi-core
//!   implementation.
//! - **Errors** ([`error`]) - Reconciliation error taxonomy.

pub mod error;
pub mod jobstarter;
pub mod reconcile;
pub mod retry;
