//! Execution engine for discovered API endpoints.
//!
//! Three modes share one request-building primitive:
//!
//! | Mode | Entry point | Behaviour |
//! |------|-------------|-----------|
//! | Single | [`ExecutionEngine::execute`] | One call, one result |
//! | Batch | [`ExecutionEngine::batch`] | Sequential calls with shared auth |
//! | Auto-execute | [`ExecutionEngine::auto_execute`] | Every endpoint in catalog order, token chaining, parameter inference |
//!
//! Network errors, non-2xx responses and unparseable bodies are returned
//! as [`ExecutionResult`] data; none of the modes fails because a target
//! API failed. Each call that reaches the engine's HTTP step persists
//! exactly one execution record.

pub mod auth;
pub mod auto;
pub mod engine;
pub mod request;

pub use auth::{AuthParts, AuthScheme};
pub use auto::{AutoExecuteError, AutoExecuteReport, AutoExecuteSummary};
pub use engine::{BatchItem, ExecutionEngine, ExecutionResult, TrustPolicy};
pub use request::{build_request, PreparedRequest, RequestError};
