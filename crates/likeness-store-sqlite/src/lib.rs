//! SQLite backend for the Likeness identity registry.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every mutation is one `IMMEDIATE`
//! transaction, so SQLite's write lock serialises writers across processes.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
