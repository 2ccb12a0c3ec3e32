//! Web page retrieval with lightweight HTML extraction.

use crate::tools::catalog::{ParamDef, ParamType, ToolCategory, ToolDescriptor};
use crate::tools::handler::ToolHandler;
use crate::types::{Error, ErrorCode, Result};
use async_trait::async_trait;
use bytes::BytesMut;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone)]
struct Extractors {
    title: Regex,
    meta_description: Regex,
    invisible: Regex,
    tag: Regex,
    link: Regex,
    whitespace: Regex,
}

impl Extractors {
    fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::internal(format!("invalid extractor pattern: {}", e)))
        };
        Ok(Self {
            title: compile(r"(?is)<title[^>]*>(.*?)</title\s*>")?,
            meta_description: compile(
                r#"(?is)<meta\s+[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']"#,
            )?,
            invisible: compile(r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)\s*>")?,
            tag: compile(r"(?s)<[^>]*>")?,
            link: compile(r"(?i)<a\s[^>]*href\s*=")?,
            whitespace: compile(r"\s+")?,
        })
    }
}

/// Fetches `url` and summarizes the page.
#[derive(Debug, Clone)]
pub struct ScrapingHandler {
    client: reqwest::Client,
    max_bytes: usize,
    extractors: Extractors,
}

impl ScrapingHandler {
    pub fn new(client: reqwest::Client, max_bytes: usize) -> Result<Self> {
        Ok(Self {
            client,
            max_bytes,
            extractors: Extractors::new()?,
        })
    }

    async fn fetch(&self, url: &str) -> Result<(u16, Option<String>, String, bool)> {
        let mut response = self.client.get(url).send().await.map_err(|e| {
            Error::transient(ErrorCode::ScrapingError, format!("Request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("{} returned {}", url, status);
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                Error::transient(ErrorCode::ScrapingError, message)
            } else {
                Error::fatal(ErrorCode::ScrapingError, message)
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::with_capacity(self.max_bytes.min(64 * 1024));
        let mut truncated = false;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            Error::transient(ErrorCode::ScrapingError, format!("Reading {} failed: {}", url, e))
        })? {
            let room = self.max_bytes.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(&chunk[..room]);
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok((
            status.as_u16(),
            content_type,
            String::from_utf8_lossy(&body).into_owned(),
            truncated,
        ))
    }

    pub(crate) fn extract(&self, html: &str) -> Value {
        let ex = &self.extractors;
        let collapse = |s: &str| ex.whitespace.replace_all(s, " ").trim().to_string();

        let title = ex
            .title
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| collapse(m.as_str()));
        let description = ex
            .meta_description
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| collapse(m.as_str()));

        let visible = ex.invisible.replace_all(html, " ");
        let text = collapse(&ex.tag.replace_all(&visible, " "));
        let excerpt: String = text.chars().take(EXCERPT_CHARS).collect();

        json!({
            "title": title,
            "description": description,
            "text_excerpt": excerpt,
            "text_length": text.chars().count(),
            "link_count": ex.link.find_iter(html).count(),
        })
    }
}

#[async_trait]
impl ToolHandler for ScrapingHandler {
    async fn call(&self, params: Value) -> Result<Value> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("url must be a string"))?;

        let (status, content_type, body, truncated) = self.fetch(url).await?;
        tracing::debug!(
            "page_fetched: url={}, status={}, bytes={}, truncated={}",
            url,
            status,
            body.len(),
            truncated
        );

        let mut summary = self.extract(&body);
        summary["url"] = json!(url);
        summary["status"] = json!(status);
        summary["content_type"] = json!(content_type);
        summary["truncated"] = json!(truncated);
        Ok(summary)
    }
}

pub fn descriptor(handler: ScrapingHandler) -> ToolDescriptor {
    ToolDescriptor::new(
        "web_scraping",
        "Fetch a web page and extract its title, description and text",
        ToolCategory::WebRetrieval,
        Arc::new(handler),
    )
    .with_param(ParamDef::required("url", ParamType::Url, "Page to fetch (http or https)"))
    .with_rate_limit(20, Duration::from_secs(60))
    .with_timeout(Duration::from_secs(10))
    .with_max_retries(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> ScrapingHandler {
        ScrapingHandler::new(reqwest::Client::new(), 1024).unwrap()
    }

    #[test]
    fn test_extract_page_summary() {
        let html = r#"<html><head><title> Example
            Domain </title><meta name="description" content="An example page">
            <style>body { color: red }</style></head>
            <body><h1>Hello</h1><script>var x = 1;</script>
            <p>Some <b>bold</b> text.</p>
            <a href="/a">A</a> <a class="x" href="/b">B</a></body></html>"#;

        let out = handler().extract(html);
        assert_eq!(out["title"], "Example Domain");
        assert_eq!(out["description"], "An example page");
        assert_eq!(out["text_excerpt"], "Hello Some bold text. A B");
        assert_eq!(out["link_count"], 2);
    }

    #[test]
    fn test_extract_without_markup() {
        let out = handler().extract("plain body");
        assert!(out["title"].is_null());
        assert_eq!(out["text_excerpt"], "plain body");
        assert_eq!(out["link_count"], 0);
    }
}
