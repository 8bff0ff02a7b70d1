//! Core types and algorithms for the Likeness identity registry.
//!
//! An identity clusters detected faces believed to show the same person. This
//! crate holds the data model, the merge and undo planners, rejection memory,
//! the best-linkage neighbor matcher, the ingestion grouper and name search.
//! It has no HTTP or database dependencies.

pub mod error;
pub mod face;
pub mod grouper;
pub mod history;
pub mod identity;
pub mod ingest;
pub mod matcher;
pub mod merge;
pub mod mutation;
pub mod rejection;
pub mod search;
pub mod store;

pub use error::{Error, Result, StoreError};
