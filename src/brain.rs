use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

/// The planning service: given the system and user prompts, return the raw
/// text of the next decision. Decoding happens in the loop.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_action(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// OpenAI-compatible chat-completions client.
pub struct Brain {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl Brain {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("Planning API key is empty"));
        }
        Ok(Self {
            client: Client::new(),
            api_base: api_base.into(),
            api_key,
            model: model.into(),
            temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Planner for Brain {
    async fn next_action(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let messages = [
            ChatMessage {
                role: "system",
                content: system_prompt.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user_prompt.to_string(),
            },
        ];

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": self.temperature,
            }))
            .send()
            .await?;

        let status = response.status();
        let json_resp: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            error!("Planning API error ({status}): {err_msg}");
            return Err(anyhow!("Planning API error ({}): {}", status, err_msg));
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("No content in planner response: {}", json_resp))?;

        debug!(model = %self.model, "Planner replied with {} chars", content.len());
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_without_double_slash() {
        let brain = Brain::new("http://localhost:8080/v1/", "k", "m", 0.2).unwrap();
        assert_eq!(brain.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(brain.model(), "m");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(Brain::new("http://x", "  ", "m", 0.2).is_err());
    }

    #[test]
    fn messages_serialize_as_chat_roles() {
        let msg = ChatMessage {
            role: "system",
            content: "hi".into(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"role": "system", "content": "hi"})
        );
    }
}
