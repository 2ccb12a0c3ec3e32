//! # toolgate - Tool-Execution Gateway
//!
//! Fronts heterogeneous operations (text analysis, translation, web
//! retrieval, structured-data parsing) behind one calling convention:
//! - Per-tool fixed-window rate limiting (optionally per caller)
//! - TTL response cache with single-flight coalescing of identical calls
//! - Input validation and sanitization against each tool's schema
//! - Bounded retries with exponential backoff and per-attempt timeouts
//! - One uniform result or exactly one classified error
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────────┐
//!   execute() →   │            ExecutionEngine               │
//!                 │  ┌────────────┐ ┌─────────┐ ┌──────────┐ │
//!                 │  │ RateLimiter│ │TtlCache │ │Validator │ │
//!                 │  └────────────┘ └─────────┘ └──────────┘ │
//!                 │  ┌────────────┐ ┌──────────────────────┐ │
//!                 │  │SingleFlight│ │RetryExecutor+timeout │ │
//!                 │  └────────────┘ └──────────────────────┘ │
//!                 └──────────────────┬───────────────────────┘
//!                                    ▼
//!                       ToolRegistry → ToolHandler
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod engine;
pub mod tools;
pub mod types;

pub mod observability;
pub mod stdio;

pub use engine::{ExecutionEngine, ExecutionResult};
pub use tools::{ToolDescriptor, ToolHandler, ToolRegistry};
pub use types::{Config, Error, ErrorCode, Result};
