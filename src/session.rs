//! Conversation session against an Ollama-compatible `/api/chat` endpoint.
//!
//! The session keeps the persona and the running history itself, so each
//! call only needs the newest user message. One attempt per turn, no retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;

/// Spoken and shown in place of any failed reply.
pub const APOLOGY: &str =
    "I'm sorry, I'm having trouble answering right now. Please try again in a moment.";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("cannot connect to chat service at {0}")]
    Connect(String),
    #[error("chat request timed out")]
    Timeout,
    #[error("chat service returned status {0}")]
    Status(u16),
    #[error("malformed chat response: {0}")]
    Malformed(String),
    #[error("chat service returned an empty reply")]
    EmptyReply,
    #[error("chat request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait ChatSession: Send {
    /// Send one user message and return the assistant's full reply.
    async fn send(&mut self, text: &str) -> Result<String, ChatError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

pub struct OllamaChat {
    config: ChatConfig,
    client: Client,
    history: Vec<ChatMessage>,
}

impl OllamaChat {
    pub fn new(config: ChatConfig, persona: &str) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Request(e.to_string()))?;

        info!("Chat session ready (model: {}, host: {})", config.model, config.host);

        Ok(Self {
            config,
            client,
            history: vec![ChatMessage::new("system", persona)],
        })
    }

    async fn request(&self) -> Result<String, ChatError> {
        let body = json!({
            "model": self.config.model,
            "messages": self.history,
            "stream": false,
            "options": {
                "temperature": self.config.temperature
            }
        });

        let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_connect() {
                ChatError::Connect(self.config.host.clone())
            } else if e.is_timeout() {
                ChatError::Timeout
            } else {
                ChatError::Request(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            return Err(ChatError::Status(resp.status().as_u16()));
        }

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ChatError::Malformed(e.to_string()))?;

        let reply = data.message.content.trim().to_string();
        if reply.is_empty() {
            return Err(ChatError::EmptyReply);
        }
        Ok(reply)
    }
}

#[async_trait]
impl ChatSession for OllamaChat {
    async fn send(&mut self, text: &str) -> Result<String, ChatError> {
        debug!("Sending to chat model '{}': {text}", self.config.model);
        self.history.push(ChatMessage::new("user", text));

        match self.request().await {
            Ok(reply) => {
                debug!("Chat reply: '{reply}'");
                self.history.push(ChatMessage::new("assistant", &reply));
                Ok(reply)
            }
            Err(e) => {
                warn!("Chat request failed: {e}");
                // Keep the history alternating user/assistant.
                self.history.pop();
                Err(e)
            }
        }
    }
}
