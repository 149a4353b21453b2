//! # Core Module
//!
//! Stateless building blocks of the pipeline: the naming grammar that ties
//! external-tool outputs back to their invocations, the per-invocation score
//! records those tools write, and the consolidated table the pipeline hands
//! back to the pose registry.
//!
//! ## Architecture
//!
//! - **Naming** ([`naming`]) - The decoy-name grammar: parsing compound
//!   invocation names and deriving the stable reindexed identifiers.
//! - **Records** ([`record`]) - Flat JSON score records written by each
//!   external scoring invocation.
//! - **Table** ([`table`]) - The consolidated score table, its column-union
//!   semantics and CSV/JSON-lines persistence.
//!
//! Everything in this module is pure with respect to the working directory:
//! no function here renames or deletes files.

pub mod naming;
pub mod record;
pub mod table;
