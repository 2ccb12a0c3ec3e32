//! Lexicon-based sentiment scoring.

use crate::tools::catalog::{ParamDef, ParamType, ToolCategory, ToolDescriptor};
use crate::tools::handler::ToolHandler;
use crate::types::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const POSITIVE: &[&str] = &[
    "good", "great", "excellent", "amazing", "awesome", "fantastic", "wonderful", "love",
    "like", "happy", "glad", "best", "nice", "perfect", "brilliant", "enjoy", "helpful",
    "pleased", "positive", "recommend",
];

const NEGATIVE: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "hate", "dislike", "worst", "poor", "sad",
    "angry", "broken", "useless", "disappointing", "disappointed", "annoying", "negative",
    "fail", "failed", "slow", "buggy",
];

const NEGATORS: &[&str] = &["not", "no", "never", "don't", "isn't", "wasn't", "can't"];

/// Scores `text` by counting lexicon hits; a negator flips the next word.
#[derive(Debug, Default)]
pub struct SentimentHandler;

#[async_trait]
impl ToolHandler for SentimentHandler {
    async fn call(&self, params: Value) -> Result<Value> {
        let text = params
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("text must be a string"))?;
        Ok(analyze(text))
    }
}

pub fn descriptor() -> ToolDescriptor {
    ToolDescriptor::new(
        "sentiment",
        "Classify the sentiment of a piece of text",
        ToolCategory::TextAnalysis,
        Arc::new(SentimentHandler),
    )
    .with_param(ParamDef::required("text", ParamType::Text, "Text to analyze"))
    .with_rate_limit(30, Duration::from_secs(60))
    .with_timeout(Duration::from_secs(5))
    .free()
}

pub(crate) fn analyze(text: &str) -> Value {
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    let mut negate = false;
    let mut words = 0usize;

    for raw in text.split_whitespace() {
        let word = raw
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
            .to_lowercase();
        if word.is_empty() {
            continue;
        }
        words += 1;

        if NEGATORS.contains(&word.as_str()) {
            negate = true;
            continue;
        }

        let polarity = if POSITIVE.contains(&word.as_str()) {
            1
        } else if NEGATIVE.contains(&word.as_str()) {
            -1
        } else {
            0
        };
        match (polarity, negate) {
            (1, false) | (-1, true) => positive.push(word),
            (-1, false) | (1, true) => negative.push(word),
            _ => {}
        }
        negate = false;
    }

    let hits = positive.len() + negative.len();
    let score = if hits == 0 {
        0.0
    } else {
        (positive.len() as f64 - negative.len() as f64) / hits as f64
    };
    let label = if score > 0.1 {
        "positive"
    } else if score < -0.1 {
        "negative"
    } else {
        "neutral"
    };
    let confidence = if words == 0 {
        0.0
    } else {
        (hits as f64 / words as f64).min(1.0)
    };

    json!({
        "label": label,
        "score": score,
        "confidence": confidence,
        "positive_words": positive,
        "negative_words": negative,
    })
}
