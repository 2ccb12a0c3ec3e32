//! Tool registry: descriptors, parameter types, lookup.
//!
//! A [`ToolDescriptor`] is built once at startup and never mutated; the
//! registry hands out `Arc`s so the engine can keep a descriptor alive across
//! await points without holding any lock.

use crate::tools::handler::ToolHandler;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Parameter types
// =============================================================================

/// Parameter type for tool inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    /// Free text; sanitized before it reaches the handler.
    Text,
    /// Absolute `http`/`https` URL.
    Url,
    Int,
    Float,
    Bool,
    StringList,
    Object,
    Enum(Vec<String>),
    Optional(Box<ParamType>),
}

impl ParamType {
    /// Validate a JSON value against this parameter type.
    ///
    /// URL scheme checks live in the validator; here a URL is just a string.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        let ok = match self {
            ParamType::String | ParamType::Text | ParamType::Url => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Bool => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::StringList => {
                let Some(items) = value.as_array() else {
                    return Err(format!("expected array, got {}", value_type_name(value)));
                };
                if let Some((i, item)) = items.iter().enumerate().find(|(_, v)| !v.is_string()) {
                    return Err(format!(
                        "expected string at index {}, got {}",
                        i,
                        value_type_name(item)
                    ));
                }
                true
            }
            ParamType::Enum(variants) => {
                let Some(s) = value.as_str() else {
                    return Err(format!("expected string for enum, got {}", value_type_name(value)));
                };
                if !variants.iter().any(|v| v == s) {
                    return Err(format!(
                        "invalid enum value '{}', expected one of: {}",
                        s,
                        variants.join(", ")
                    ));
                }
                true
            }
            ParamType::Optional(inner) => {
                return if value.is_null() { Ok(()) } else { inner.validate(value) };
            }
        };

        if ok {
            Ok(())
        } else {
            Err(format!(
                "expected {}, got {}",
                self.display_name(),
                value_type_name(value)
            ))
        }
    }

    /// Human-readable type name.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Text => "text".to_string(),
            ParamType::Url => "url".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::StringList => "string[]".to_string(),
            ParamType::Object => "object".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }

    /// The type with any `Optional` wrappers removed.
    pub fn base(&self) -> &ParamType {
        match self {
            ParamType::Optional(inner) => inner.base(),
            other => other,
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self::required(name, ParamType::Optional(Box::new(param_type)), description)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }
}

// =============================================================================
// Tool descriptor
// =============================================================================

/// Tool category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    TextAnalysis,
    Translation,
    WebRetrieval,
    DataProcessing,
    Utility,
}

/// Admission limit: at most `max_calls` per `window`. A zero window falls
/// back to the engine's default rate window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Complete, immutable tool description.
#[derive(Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<ParamDef>,
    pub is_free: bool,
    /// Whether results may be served from the response cache.
    pub cacheable: bool,
    pub rate_limit: Option<RateLimit>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts the retry loop may make.
    pub max_retries: u32,
    #[serde(skip)]
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// New descriptor with gateway defaults: cacheable, not free, no rate
    /// limit, 30s timeout, 3 attempts.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters: Vec::new(),
            is_free: false,
            cacheable: true,
            rate_limit: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            handler,
        }
    }

    pub fn with_param(mut self, param: ParamDef) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_rate_limit(mut self, max_calls: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimit { max_calls, window });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn free(mut self) -> Self {
        self.is_free = true;
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Names of the required parameters.
    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|p| p.is_required())
            .map(|p| p.name.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&ParamDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// One-line signature, e.g. `translation(text: text, target: string, source?: string?)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let optional = if p.is_required() { "" } else { "?" };
                format!("{}{}: {}", p.name, optional, p.param_type.display_name())
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("parameters", &self.parameters)
            .field("is_free", &self.is_free)
            .field("cacheable", &self.cacheable)
            .field("rate_limit", &self.rate_limit)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tool registry
// =============================================================================

/// Static name → descriptor mapping.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    entries: HashMap<String, Arc<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a tool. Re-registering a name replaces the previous descriptor.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::configuration("Tool name cannot be empty"));
        }
        if descriptor.rate_limit.is_some_and(|limit| limit.max_calls == 0) {
            return Err(Error::configuration(format!(
                "Tool {} declares a rate limit of zero calls",
                descriptor.name
            )));
        }

        let name = descriptor.name.clone();
        if self.entries.insert(name.clone(), Arc::new(descriptor)).is_some() {
            tracing::warn!("tool_reregistered: name={}", name);
        } else {
            tracing::debug!("tool_registered: name={}", name);
        }
        Ok(())
    }

    /// Look up a descriptor.
    pub fn lookup(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        self.entries.get(name).cloned()
    }

    /// Look up a descriptor, surfacing absence as `TOOL_NOT_FOUND`.
    pub fn require(&self, name: &str) -> Result<Arc<ToolDescriptor>> {
        self.lookup(name).ok_or_else(|| Error::tool_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
        let mut entries: Vec<Arc<ToolDescriptor>> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
