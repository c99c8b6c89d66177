//! Gemini REST transport for the model collaborator.
//!
//! Uses the `generateContent` endpoint. History roles map to the API's
//! `user`/`model` convention; system and tool messages travel as user turns
//! since the API only accepts the two.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Model;
use crate::state::{ChatMessage, Role};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini-backed model client
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }
}

// --- Wire types ---

#[derive(Serialize)]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

fn to_contents(messages: &[ChatMessage]) -> Vec<Content> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                // system/tool context rides along as user turns
                Role::System | Role::User | Role::Tool => "user",
            };
            Content {
                role: Some(role.to_string()),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            }
        })
        .collect()
}

#[async_trait]
impl Model for GeminiModel {
    async fn invoke(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<String> {
        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let request = GenerateRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            }),
            contents: to_contents(messages),
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "model returned {status}: {}",
                body.chars().take(300).collect::<String>()
            ));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to decode model response")?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(anyhow!("model returned an empty candidate"));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_roles_map_to_api_roles() {
        let contents = to_contents(&[
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
            ChatMessage::tool("Tool Result (read_file):\nok"),
        ]);

        let roles: Vec<_> = contents.iter().filter_map(|c| c.role.as_deref()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }
}
