use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::config::{BackendKind, ResolvedBackend};

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One chat-completion provider. Implementations do a blocking HTTP call and
/// return the completion text.
pub trait ChatBackend: Send + Sync {
    fn name(&self) -> &str;
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub fn build_backend(resolved: ResolvedBackend) -> Result<Box<dyn ChatBackend>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(resolved.timeout)
        .build()
        .context("build http client")?;
    Ok(match resolved.kind {
        BackendKind::Deepseek => Box::new(DeepSeekBackend { client, resolved }),
        BackendKind::Ollama => Box::new(OllamaBackend { client, resolved }),
    })
}

/// Retry wrapper used by the worker pool: each failure backs off linearly,
/// the last error is surfaced when attempts run out.
pub fn complete_with_retries(
    backend: &dyn ChatBackend,
    messages: &[ChatMessage],
    max_retries: u32,
) -> Result<String> {
    let attempts = max_retries.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match backend.complete(messages) {
            Ok(text) => return Ok(text),
            Err(err) => {
                last_err = Some(err);
                if attempt < attempts {
                    std::thread::sleep(Duration::from_secs(2 * u64::from(attempt)));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no attempts made")))
}

/// OpenAI-compatible chat endpoint (`/chat/completions`, bearer auth).
pub struct DeepSeekBackend {
    client: reqwest::blocking::Client,
    resolved: ResolvedBackend,
}

impl ChatBackend for DeepSeekBackend {
    fn name(&self) -> &str {
        &self.resolved.name
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.resolved.base_url);
        let key = self
            .resolved
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("backend {} has no API key", self.resolved.name))?;
        let body = serde_json::json!({
            "model": self.resolved.model,
            "messages": messages,
            "temperature": self.resolved.temperature,
            "max_tokens": self.resolved.max_tokens,
            "stream": false,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .with_context(|| format!("request to {url}"))?;

        let status = response.status();
        let payload = response.text().context("read response body")?;
        if !status.is_success() {
            bail!(
                "{} returned {}: {}",
                self.resolved.name,
                status,
                parse_error_message(&payload)
            );
        }
        parse_chat_content(&payload)
            .ok_or_else(|| anyhow!("{}: malformed completion response", self.resolved.name))
    }
}

/// Ollama's native `/api/generate` endpoint; chat messages are flattened
/// into a single prompt.
pub struct OllamaBackend {
    client: reqwest::blocking::Client,
    resolved: ResolvedBackend,
}

impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        &self.resolved.name
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/api/generate", self.resolved.base_url);
        let body = serde_json::json!({
            "model": self.resolved.model,
            "prompt": flatten_messages(messages),
            "stream": false,
            "temperature": self.resolved.temperature,
            "options": {
                "num_predict": self.resolved.max_tokens,
                "top_p": 0.9,
                "top_k": 40,
                "repeat_penalty": 1.1,
            },
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("request to {url}"))?;

        let status = response.status();
        let payload = response.text().context("read response body")?;
        if !status.is_success() {
            bail!(
                "{} returned {}: {}",
                self.resolved.name,
                status,
                parse_error_message(&payload)
            );
        }
        parse_generate_content(&payload)
            .ok_or_else(|| anyhow!("{}: malformed generate response", self.resolved.name))
    }
}

fn flatten_messages(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str(&msg.content);
    }
    prompt
}

fn parse_chat_content(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let content = value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?;
    Some(content.trim().to_string())
}

fn parse_generate_content(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    Some(value.get("response")?.as_str()?.trim().to_string())
}

fn parse_error_message(payload: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
    }
    let snippet: String = payload.chars().take(200).collect();
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_content_extraction() {
        let payload =
            r#"{"choices": [{"message": {"role": "assistant", "content": "  Привет  "}}]}"#;
        assert_eq!(parse_chat_content(payload).as_deref(), Some("Привет"));
        assert!(parse_chat_content(r#"{"choices": []}"#).is_none());
        assert!(parse_chat_content("not json").is_none());
    }

    #[test]
    fn generate_content_extraction() {
        let payload = r#"{"model": "llama3.1:8b", "response": "translated text", "done": true}"#;
        assert_eq!(
            parse_generate_content(payload).as_deref(),
            Some("translated text")
        );
    }

    #[test]
    fn error_message_parsing_prefers_structured_errors() {
        let payload = r#"{"error": {"message": "Invalid API key", "code": "auth"}}"#;
        assert_eq!(parse_error_message(payload), "Invalid API key");
        assert_eq!(parse_error_message("plain failure"), "plain failure");
    }

    #[test]
    fn messages_flatten_in_order() {
        let messages = [
            ChatMessage::system("You translate books."),
            ChatMessage::user("Translate: hello"),
        ];
        let prompt = flatten_messages(&messages);
        assert!(prompt.starts_with("You translate books."));
        assert!(prompt.ends_with("Translate: hello"));
    }
}
