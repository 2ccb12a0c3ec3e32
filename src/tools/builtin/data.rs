//! Structured-data parsing (JSON and CSV) with a shape summary.

use crate::tools::catalog::{ParamDef, ParamType, ToolCategory, ToolDescriptor};
use crate::tools::handler::ToolHandler;
use crate::types::{Error, ErrorCode, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_ROWS: usize = 5;

/// Parses `data` according to `format` and reports rows and fields.
#[derive(Debug, Default)]
pub struct DataProcessingHandler;

#[async_trait]
impl ToolHandler for DataProcessingHandler {
    async fn call(&self, params: Value) -> Result<Value> {
        let data = params
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("data must be a string"))?;
        let format = params.get("format").and_then(Value::as_str).unwrap_or("json");

        match format.to_ascii_lowercase().as_str() {
            "json" => summarize_json(data),
            "csv" => summarize_csv(data),
            _ => Err(Error::unsupported_format(format)),
        }
    }
}

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "data_processing",
        "Parse JSON or CSV data and summarize its structure",
        ToolCategory::DataProcessing,
        Arc::new(DataProcessingHandler),
    )
    .with_param(ParamDef::required("data", ParamType::String, "Raw data"))
    .with_param(
        ParamDef::optional("format", ParamType::String, "json or csv").with_default(json!("json")),
    )
    .with_timeout(Duration::from_secs(5))
    .free()
}

fn parse_error(format: &str, detail: impl std::fmt::Display) -> Error {
    Error::fatal(
        ErrorCode::DataProcessingError,
        format!("Failed to parse {}: {}", format, detail),
    )
}

fn summarize_json(data: &str) -> Result<Value> {
    let parsed: Value = serde_json::from_str(data).map_err(|e| parse_error("json", e))?;

    let (kind, rows, fields, sample) = match &parsed {
        Value::Array(items) => {
            let mut fields = BTreeSet::new();
            for item in items {
                if let Value::Object(obj) = item {
                    fields.extend(obj.keys().cloned());
                }
            }
            let sample: Vec<Value> = items.iter().take(SAMPLE_ROWS).cloned().collect();
            ("array", items.len(), fields, sample)
        }
        Value::Object(obj) => (
            "object",
            1,
            obj.keys().cloned().collect(),
            vec![parsed.clone()],
        ),
        _ => ("scalar", 1, BTreeSet::new(), vec![parsed.clone()]),
    };

    Ok(json!({
        "format": "json",
        "kind": kind,
        "row_count": rows,
        "fields": fields,
        "sample": sample,
    }))
}

fn summarize_csv(data: &str) -> Result<Value> {
    let mut lines = data.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Err(parse_error("csv", "no header row"));
    };
    let headers = split_csv_line(header_line).map_err(|e| parse_error("csv", e))?;

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let cells = split_csv_line(line).map_err(|e| parse_error("csv", e))?;
        if cells.len() != headers.len() {
            return Err(parse_error(
                "csv",
                format!(
                    "row {} has {} fields, expected {}",
                    i + 1,
                    cells.len(),
                    headers.len()
                ),
            ));
        }
        let row: Map<String, Value> = headers
            .iter()
            .cloned()
            .zip(cells.into_iter().map(Value::String))
            .collect();
        rows.push(Value::Object(row));
    }

    let sample: Vec<Value> = rows.iter().take(SAMPLE_ROWS).cloned().collect();
    Ok(json!({
        "format": "csv",
        "kind": "table",
        "row_count": rows.len(),
        "fields": headers,
        "sample": sample,
    }))
}

/// Split one CSV record, honouring double-quoted cells and `""` escapes.
fn split_csv_line(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if cell.is_empty() => in_quotes = true,
            (',', false) => cells.push(std::mem::take(&mut cell).trim().to_string()),
            (c, _) => cell.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    cells.push(cell.trim().to_string());
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(params: Value) -> Result<Value> {
        DataProcessingHandler.call(params).await
    }

    #[tokio::test]
    async fn test_json_array_summary() {
        let out = run(json!({"data": r#"[{"a":1},{"a":2,"b":3}]"#, "format": "json"}))
            .await
            .unwrap();
        assert_eq!(out["kind"], "array");
        assert_eq!(out["row_count"], 2);
        assert_eq!(out["fields"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_csv_summary_with_quotes() {
        let data = "name,city\n\"Doe, Jane\",Paris\nBob,\"Rio \"\"de\"\" Janeiro\"\n";
        let out = run(json!({"data": data, "format": "csv"})).await.unwrap();
        assert_eq!(out["row_count"], 2);
        assert_eq!(out["fields"], json!(["name", "city"]));
        assert_eq!(out["sample"][0]["name"], "Doe, Jane");
        assert_eq!(out["sample"][1]["city"], "Rio \"de\" Janeiro");
    }

    #[tokio::test]
    async fn test_default_format_is_json() {
        let out = run(json!({"data": "{\"k\": true}"})).await.unwrap();
        assert_eq!(out["kind"], "object");
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let err = run(json!({"data": "<a/>", "format": "xml"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedFormat);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_parse_failures_are_not_retryable() {
        let err = run(json!({"data": "{not json", "format": "json"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DataProcessingError);
        assert!(!err.retryable);

        let err = run(json!({"data": "a,b\n1,2,3", "format": "csv"})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DataProcessingError);
    }
}
