// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Ollama API client for local AI inference

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::classifier::ChatBackend;
use crate::{Result, SiftError};

/// Ollama API client
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// Model names, or a single placeholder when they could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelList {
    pub models: Vec<String>,
    pub error: bool,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SiftError::Config(format!("Failed to create HTTP client: {}", e)))?;

        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/v1/chat/completions", "")
            .replace("/api/tags", "")
            .trim_end_matches('/')
            .to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                SiftError::OllamaUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            SiftError::OllamaUnavailable(format!("Cannot connect to Ollama: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(SiftError::BadReply(format!(
                "Unable to fetch models (status {})",
                response.status()
            )));
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// List models without failing: errors become a one-entry placeholder list
    pub async fn list_models_or_placeholder(&self) -> ModelList {
        match self.list_models().await {
            Ok(models) => ModelList { models, error: false },
            Err(e) => {
                warn!("Model listing failed: {}", e);
                let placeholder = match e {
                    SiftError::OllamaUnavailable(_) => "Error: Cannot connect to Ollama",
                    _ => "Error: Unable to fetch models",
                };
                ModelList {
                    models: vec![placeholder.to_string()],
                    error: true,
                }
            }
        }
    }

    /// Send one user message to the chat completion endpoint
    pub async fn chat_completion(&self, model: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };

        debug!("Sending request to Ollama: model={}", model);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(SiftError::BadReply(format!(
                "Ollama returned status {}",
                response.status()
            )));
        }

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SiftError::BadReply("reply had no choices".to_string()))
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, model: &str, prompt: &str) -> Result<String> {
        self.chat_completion(model, prompt).await
    }
}
