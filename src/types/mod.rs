//! Core types for the gateway.
//!
//! - **Errors**: the single structured error, its codes and taxonomy
//! - **Config**: engine, sweep, handler and observability configuration
//! - **IDs**: strongly-typed identifiers (ExecutionId, CallerId)

mod config;
mod errors;
mod ids;

pub use config::{Config, EngineConfig, HandlerConfig, ObservabilityConfig, SweepConfig};
pub use errors::{Error, ErrorClass, ErrorCode, Result};
pub use ids::{CallerId, ExecutionId};
