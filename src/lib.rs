//! # API Harness
//!
//! Discovers API surface in unstructured documentation with generative AI,
//! persists the catalog, and executes the discovered endpoints, including
//! autonomous runs that chain session tokens between calls.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌────────────┐   ┌──────────┐
//! │ Upload   │──▶│  Pipeline   │──▶│  Analyzer   │──▶│  SQLite  │
//! │ CLI/HTTP │   │ stage+queue │   │ (inference) │   │ catalog  │
//! └──────────┘   └────────────┘   └──────┬─────┘   └────┬─────┘
//!                                        │              │
//!                                 ┌──────▼─────┐  ┌─────▼──────┐
//!                                 │ Dispatcher │  │ Execution  │──▶ target APIs
//!                                 │ retry+JSON │  │   engine   │
//!                                 └────────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`inference`] | Backend trait, Gemini/OpenAI backends, retrying dispatcher |
//! | [`analyzer`] | Catalog extraction prompt and contract |
//! | [`extract`] | Text extraction from uploaded files |
//! | [`file_store`] | Remote file staging with active-wait |
//! | [`pipeline`] | Document lifecycle and background analysis queue |
//! | [`execution`] | Auth, request building, single/batch/auto execution |
//! | [`insights`] | Business insights and dashboard suggestions |
//! | [`sqlite_store`] | SQLite implementation of the catalog store |
//! | [`context`] | Component wiring |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analyzer;
pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod execution;
pub mod extract;
pub mod file_store;
pub mod inference;
pub mod insights;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
