//! Tool infrastructure: handler seam, registry, validation, built-ins.

pub mod builtin;
pub mod catalog;
pub mod handler;
pub mod validation;

pub use builtin::default_registry;
pub use catalog::{ParamDef, ParamType, RateLimit, ToolCategory, ToolDescriptor, ToolRegistry};
pub use handler::{handler_fn, ToolHandler};
pub use validation::Validator;
