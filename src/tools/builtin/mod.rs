//! Built-in tools: sentiment, translation, web_scraping, data_processing.

mod data;
mod scraping;
mod sentiment;
mod translation;

pub use data::DataProcessingHandler;
pub use scraping::ScrapingHandler;
pub use sentiment::SentimentHandler;
pub use translation::TranslationHandler;

use crate::tools::catalog::ToolRegistry;
use crate::types::{Error, HandlerConfig, Result};

/// Registry with every built-in tool, wired from `config`.
pub fn default_registry(config: &HandlerConfig) -> Result<ToolRegistry> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {}", e)))?;

    let mut registry = ToolRegistry::new();
    registry.register(sentiment::descriptor())?;
    registry.register(translation::descriptor(TranslationHandler::new(
        client.clone(),
        config.translation_endpoint.clone(),
        config.translation_api_key.clone(),
    )))?;
    registry.register(scraping::descriptor(ScrapingHandler::new(
        client,
        config.scrape_max_bytes,
    )?))?;
    registry.register(data::descriptor())?;

    tracing::info!("builtin_tools_registered: count={}", registry.len());
    Ok(registry)
}
