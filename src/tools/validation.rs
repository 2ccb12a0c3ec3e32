//! Input validation and sanitization against a tool's parameter schema.

use crate::tools::catalog::{ParamType, ToolDescriptor};
use crate::types::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};

const SCRIPT_BLOCK: &str = r"(?is)<script\b[^>]*>.*?</script\s*>";
const JAVASCRIPT_SCHEME: &str = r"(?i)javascript:";

/// Checks caller parameters and returns the sanitized copy handed to the handler.
#[derive(Debug, Clone)]
pub struct Validator {
    script_block: Regex,
    javascript_scheme: Regex,
}

impl Validator {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::internal(format!("invalid sanitizer pattern: {}", e)))
        };
        Ok(Self {
            script_block: compile(SCRIPT_BLOCK)?,
            javascript_scheme: compile(JAVASCRIPT_SCHEME)?,
        })
    }

    /// Validate `params` against `descriptor` and return the sanitized copy.
    ///
    /// Fails with `VALIDATION_ERROR` for a non-object, missing required or
    /// mistyped fields (every problem is listed in the error context), and
    /// `INVALID_URL` for URL fields that are not absolute http(s) URLs.
    /// Fields the descriptor does not declare pass through untouched.
    pub fn validate(&self, descriptor: &ToolDescriptor, params: &Value) -> Result<Value> {
        let Some(object) = params.as_object() else {
            return Err(Error::validation("Parameters must be an object"));
        };

        let mut problems = Vec::new();
        for name in descriptor.required_params() {
            if object.get(name).map_or(true, Value::is_null) {
                problems.push(format!("Missing required parameter: {}", name));
            }
        }
        for def in &descriptor.parameters {
            if let Some(value) = object.get(&def.name) {
                if let Err(msg) = def.param_type.validate(value) {
                    problems.push(format!("{}: {}", def.name, msg));
                }
            }
        }

        if !problems.is_empty() {
            let message = problems.join("; ");
            tracing::debug!("validation_failed: tool={}, problems={}", descriptor.name, message);
            return Err(Error::validation(message)
                .with_context(serde_json::json!({ "problems": problems })));
        }

        let mut sanitized = Map::with_capacity(object.len());
        for (key, value) in object {
            let cleaned = match descriptor.param(key).map(|def| def.param_type.base()) {
                Some(ParamType::Url) => {
                    if let Some(raw) = value.as_str() {
                        check_url(key, raw)?;
                    }
                    value.clone()
                }
                Some(ParamType::Text) => match value.as_str() {
                    Some(text) => Value::String(self.sanitize(text)),
                    None => value.clone(),
                },
                _ => value.clone(),
            };
            sanitized.insert(key.clone(), cleaned);
        }
        Ok(Value::Object(sanitized))
    }

    /// Strip `<script>` blocks and `javascript:` schemes from free text.
    pub fn sanitize(&self, text: &str) -> String {
        let without_scripts = self.script_block.replace_all(text, "");
        self.javascript_scheme
            .replace_all(&without_scripts, "")
            .into_owned()
    }
}

fn check_url(field: &str, raw: &str) -> Result<()> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| Error::invalid_url(field, format!("Invalid URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::invalid_url(
            field,
            format!("Unsupported URL scheme '{}': only http and https are allowed", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::{ParamDef, ToolCategory};
    use crate::tools::handler::handler_fn;
    use crate::types::ErrorCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "probe",
            "validation probe",
            ToolCategory::Utility,
            handler_fn(|p| async move { Ok(p) }),
        )
        .with_param(ParamDef::required("text", ParamType::Text, "free text"))
        .with_param(ParamDef::optional("url", ParamType::Url, "page"))
        .with_param(ParamDef::optional("limit", ParamType::Int, "max items"))
    }

    fn validator() -> Validator {
        Validator::new().unwrap()
    }

    #[test]
    fn test_missing_required_field() {
        let err = validator().validate(&descriptor(), &json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("text"));
        assert!(!err.retryable);
    }

    #[test]
    fn test_null_required_field_is_missing() {
        let err = validator()
            .validate(&descriptor(), &json!({"text": null}))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_non_object_params_rejected() {
        let err = validator().validate(&descriptor(), &json!(["text"])).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn test_all_problems_reported() {
        let err = validator()
            .validate(&descriptor(), &json!({"limit": "ten"}))
            .unwrap_err();
        let problems = err.context.unwrap()["problems"].as_array().unwrap().len();
        assert_eq!(problems, 2);
    }

    #[test]
    fn test_script_blocks_and_javascript_removed() {
        let params = json!({
            "text": "hello <SCRIPT type=\"x\">\nalert(1)\n</script > world JavaScript:void(0)"
        });
        let out = validator().validate(&descriptor(), &params).unwrap();
        assert_eq!(out["text"], "hello  world void(0)");
    }

    #[test]
    fn test_undeclared_fields_pass_through() {
        let params = json!({"text": "hi", "extra": "<script>x</script>"});
        let out = validator().validate(&descriptor(), &params).unwrap();
        assert_eq!(out["extra"], "<script>x</script>");
    }

    #[test]
    fn test_non_http_url_rejected() {
        let err = validator()
            .validate(&descriptor(), &json!({"text": "x", "url": "ftp://x"}))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUrl);
        assert_eq!(err.context.unwrap()["field"], "url");
    }

    #[test]
    fn test_unparseable_url_rejected() {
        let err = validator()
            .validate(&descriptor(), &json!({"text": "x", "url": "not a url"}))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidUrl);
    }

    #[test]
    fn test_https_url_accepted() {
        let out = validator()
            .validate(&descriptor(), &json!({"text": "x", "url": "https://example.com/a"}))
            .unwrap();
        assert_eq!(out["url"], "https://example.com/a");
    }
}
