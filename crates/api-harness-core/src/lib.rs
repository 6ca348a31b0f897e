//! # API Harness Core
//!
//! Runtime-agnostic logic shared by the API Harness binary and library:
//! catalog data models, the document status state machine, the
//! [`store::CatalogStore`] abstraction with an in-memory implementation,
//! and parsing of structured (JSON) output from generative models.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies.

pub mod models;
pub mod store;
pub mod structured;
