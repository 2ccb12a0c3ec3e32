//! Machine translation through a LibreTranslate-compatible HTTP endpoint.

use crate::tools::catalog::{ParamDef, ParamType, ToolCategory, ToolDescriptor};
use crate::tools::handler::ToolHandler;
use crate::types::{Error, ErrorCode, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
    #[serde(default)]
    detected_language: Option<DetectedLanguage>,
}

#[derive(Debug, Deserialize)]
struct DetectedLanguage {
    language: String,
    #[serde(default)]
    confidence: f64,
}

/// Posts `{q, source, target, format}` to the configured endpoint.
#[derive(Debug, Clone)]
pub struct TranslationHandler {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl TranslationHandler {
    pub fn new(client: reqwest::Client, endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl ToolHandler for TranslationHandler {
    async fn call(&self, params: Value) -> Result<Value> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(Error::fatal(
                ErrorCode::TranslationError,
                "No translation endpoint configured",
            ));
        };

        let text = str_param(&params, "text")?;
        let target = str_param(&params, "target")?;
        let source = params.get("source").and_then(Value::as_str).unwrap_or("auto");

        let request = TranslateRequest {
            q: text,
            source,
            target,
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                Error::transient(ErrorCode::TranslationError, format!("Translation request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Translation service returned {}: {}", status, body.trim());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::transient(ErrorCode::TranslationError, message)
            } else {
                Error::fatal(ErrorCode::TranslationError, message)
            });
        }

        let parsed: TranslateResponse = response.json().await.map_err(|e| {
            Error::fatal(
                ErrorCode::TranslationError,
                format!("Malformed translation response: {}", e),
            )
        })?;

        let (detected, confidence) = match parsed.detected_language {
            Some(d) => (Some(d.language), Some(d.confidence)),
            None => (None, None),
        };

        Ok(json!({
            "translated_text": parsed.translated_text,
            "source": source,
            "target": target,
            "detected_language": detected,
            "detection_confidence": confidence,
        }))
    }
}

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::validation(format!("{} must be a string", name)))
}

pub fn descriptor(handler: TranslationHandler) -> ToolDescriptor {
    ToolDescriptor::new(
        "translation",
        "Translate text between languages",
        ToolCategory::Translation,
        Arc::new(handler),
    )
    .with_param(ParamDef::required("text", ParamType::Text, "Text to translate"))
    .with_param(ParamDef::required("target", ParamType::String, "Target language code"))
    .with_param(
        ParamDef::optional("source", ParamType::String, "Source language code")
            .with_default(json!("auto")),
    )
    .with_rate_limit(10, Duration::from_secs(60))
    .with_timeout(Duration::from_secs(15))
    .with_max_retries(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_endpoint_is_not_retryable() {
        let handler = TranslationHandler::new(reqwest::Client::new(), None, None);
        let err = handler
            .call(json!({"text": "hola", "target": "en"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TranslationError);
        assert!(!err.retryable);
    }

    #[test]
    fn test_request_shape() {
        let request = TranslateRequest {
            q: "hola",
            source: "auto",
            target: "en",
            format: "text",
            api_key: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"q": "hola", "source": "auto", "target": "en", "format": "text"})
        );
    }

    #[test]
    fn test_response_parsing() {
        let parsed: TranslateResponse = serde_json::from_value(json!({
            "translatedText": "hello",
            "detectedLanguage": {"language": "es", "confidence": 90.0}
        }))
        .unwrap();
        assert_eq!(parsed.translated_text, "hello");
        assert_eq!(parsed.detected_language.unwrap().language, "es");
    }
}
