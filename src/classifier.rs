//! Message classification through an OpenAI-compatible chat completions endpoint.
//!
//! Any failure (network, status, unparseable reply) degrades to the `other`
//! category with zero confidence, so classification never stops a run.

use std::sync::PoisonError;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::config::LlmConfig;
use crate::email::{Category, Classification, EmailInfo};
use crate::memory::SharedMemory;

const SYSTEM_PROMPT: &str = "You are an email categorization assistant. Respond only with valid JSON.";

const CLASSIFICATION_PROMPT: &str = r#"Analyze the following email and categorize it into one of these categories: {categories}

Email Details:
From: {from}
Subject: {subject}
Body (first 500 chars): {body}
{history}
Provide your response in this JSON format:
{
    "category": "category_name",
    "confidence": 0.95,
    "is_newsletter": true,
    "reason": "brief explanation"
}

Only respond with valid JSON, no additional text."#;

/// Message -> category. Treated as a black box by the pipeline.
pub trait Classifier: Send + Sync {
    fn classify<'a>(&'a self, email: &'a EmailInfo) -> BoxFuture<'a, Classification>;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    category: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    is_newsletter: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct LlmClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    memory: Option<SharedMemory>,
}

impl LlmClassifier {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Unable to build HTTP client for the classifier")?;

        let base = config.url.trim_end_matches('/');
        let endpoint = if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        };

        info!("LLM classifier: {} via {}", config.model, endpoint);
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            memory: None,
        })
    }

    /// Feed what earlier runs learned about the sender into each prompt
    pub fn with_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    fn build_prompt(email: &EmailInfo, history: Option<&str>) -> String {
        let categories = Category::ALL
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let body_preview = email.text_body
            .as_deref()
            .or(email.html_body.as_deref())
            .unwrap_or("")
            .chars()
            .take(500)
            .collect::<String>();

        CLASSIFICATION_PROMPT
            .replace("{categories}", &categories)
            .replace("{from}", &email.sender_display)
            .replace("{subject}", &email.subject)
            .replace("{body}", &body_preview)
            .replace(
                "{history}",
                &history
                    .map(|h| format!("\nContext from previous emails:\n{}\n", h))
                    .unwrap_or_default(),
            )
    }

    pub async fn classify_email(&self, email: &EmailInfo) -> Result<Classification> {
        let history = self.memory.as_ref().and_then(|memory| {
            memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .context_for(&email.sender)
        });
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::build_prompt(email, history.as_deref())},
            ],
            "temperature": 0.3,
            "max_tokens": 200,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.context("LLM request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("LLM returned status: {}", response.status());
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;
        let content = parsed.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("LLM response has no choices")?;

        debug!("LLM reply for {}: {}", email.id, content);
        parse_response(&content)
    }
}

impl Classifier for LlmClassifier {
    fn classify<'a>(&'a self, email: &'a EmailInfo) -> BoxFuture<'a, Classification> {
        Box::pin(async move {
            match self.classify_email(email).await {
                Ok(classification) => {
                    info!("🏷️  '{}' -> {}", email.subject, classification.category);
                    classification
                }
                Err(e) => {
                    warn!("Failed to categorize email {}: {:#}", email.id, e);
                    Classification::fallback(format!("Categorization failed: {}", e))
                }
            }
        })
    }
}

/// Read the JSON verdict out of a reply that may be fenced or padded with prose
pub fn parse_response(content: &str) -> Result<Classification> {
    let start = content.find('{').context("No JSON object in LLM reply")?;
    let end = content.rfind('}').context("No JSON object in LLM reply")?;
    if end < start {
        anyhow::bail!("Malformed JSON object in LLM reply");
    }

    let raw: RawVerdict = serde_json::from_str(&content[start..=end])
        .context("Invalid JSON in LLM reply")?;

    let category = Category::from_label(&raw.category);
    Ok(Classification {
        category,
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        is_newsletter: raw.is_newsletter.unwrap_or(category == Category::Newsletter),
        reason: raw.reason.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let c = parse_response(r#"{"category": "newsletter", "confidence": 0.92, "is_newsletter": true, "reason": "weekly digest"}"#).unwrap();
        assert_eq!(c.category, Category::Newsletter);
        assert!(c.is_newsletter);
        assert_eq!(c.reason, "weekly digest");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Sure! Here it is:\n```json\n{\"category\": \"Promotional\", \"confidence\": 1.7}\n```";
        let c = parse_response(reply).unwrap();
        assert_eq!(c.category, Category::Promotional);
        assert_eq!(c.confidence, 1.0);
        assert!(!c.is_newsletter);
    }

    #[test]
    fn test_unknown_category_is_other() {
        let c = parse_response(r#"{"category": "marketing-blast"}"#).unwrap();
        assert_eq!(c.category, Category::Other);
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(parse_response("I think it is a newsletter").is_err());
        assert!(parse_response("} nope {").is_err());
    }

    #[test]
    fn test_endpoint_building() {
        let config = LlmConfig {
            api_key: None,
            model: "m".to_string(),
            url: "http://127.0.0.1:1234/v1/".to_string(),
        };
        let classifier = LlmClassifier::new(&config).unwrap();
        assert_eq!(classifier.endpoint, "http://127.0.0.1:1234/v1/chat/completions");
    }

    #[test]
    fn test_prompt_carries_sender_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut memory = crate::memory::SenderMemory::in_dir(dir.path()).unwrap();
        let raw = b"From: News <news@x.test>\r\nSubject: Issue 1\r\n\r\nbody\r\n";
        let email = EmailInfo::parse("1", raw, true).unwrap();
        memory
            .remember(&crate::email::Message::new(email.clone(), Classification::new(Category::Newsletter)))
            .unwrap();

        let plain = LlmClassifier::build_prompt(&email, None);
        assert!(!plain.contains("Context from previous emails"));

        let context = memory.context_for(&email.sender);
        let prompt = LlmClassifier::build_prompt(&email, context.as_deref());
        assert!(prompt.contains("Context from previous emails"));
        assert!(prompt.contains("previously categorized as 'newsletter'"));
        assert!(prompt.contains("From: News <news@x.test>"));
    }

    #[tokio::test]
    async fn test_unreachable_llm_falls_back() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let classifier = LlmClassifier::new(&LlmConfig {
            api_key: Some("k".to_string()),
            model: "m".to_string(),
            url,
        })
        .unwrap();
        let raw = b"From: a@x.test\r\nSubject: hi\r\n\r\nbody\r\n";
        let email = EmailInfo::parse("1", raw, true).unwrap();
        let c = classifier.classify(&email).await;
        assert_eq!(c.category, Category::Other);
        assert_eq!(c.confidence, 0.0);
    }
}
