//! Local image catalog.
//!
//! SQLite-backed storage for ingested image records. Records are only
//! written after a successful ingestion.

mod store;

pub use store::{ImageStore, StateStoreError};
