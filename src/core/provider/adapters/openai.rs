use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{read_json, script_prompt};
use crate::core::config::ProviderConfig;
use crate::core::provider::{Artifact, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput};

const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

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
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageOwned,
}

#[derive(Deserialize)]
struct ChatMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI and API-compatible gateways such as OpenRouter.
pub struct OpenAiCompatibleAdapter {
    id: String,
    url: String,
    model: String,
    api_key: String,
    headers: BTreeMap<String, String>,
    client: Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(cfg: &ProviderConfig, api_key: String, client: Client) -> Self {
        Self {
            id: cfg.id.clone(),
            url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            model: cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            headers: cfg.headers.clone(),
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Script
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        let prompt = script_prompt(&input.topic);
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let mut request = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let res = request.send().await?;
        let parsed: ChatResponse = read_json(res, &self.id).await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{} returned no script",
                self.id
            )));
        }
        Ok(Artifact::text(content))
    }
}
