use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{endpoint, read_json, script_prompt};
use crate::core::config::ProviderConfig;
use crate::core::provider::{Artifact, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput};

const DEFAULT_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent";
const DEFAULT_MODEL: &str = "gemini-pro";

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResContent>,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    #[serde(default)]
    text: String,
}

pub struct GeminiAdapter {
    id: String,
    url: String,
    api_key: String,
    client: Client,
}

impl GeminiAdapter {
    pub fn new(cfg: &ProviderConfig, api_key: String, client: Client) -> Self {
        let model = cfg.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let url = cfg
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_URL)
            .replace("{model}", model);
        Self {
            id: cfg.id.clone(),
            url,
            api_key,
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Script
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        let req = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: script_prompt(&input.topic),
                }],
            }],
        };

        let url = endpoint(&self.url, &[("key", self.api_key.as_str())])?;
        let res = self
            .client
            .post(url)
            .json(&req)
            .send()
            .await?;
        let parsed: GeminiResponse = read_json(res, &self.id).await?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{} did not return content",
                self.id
            )));
        }
        Ok(Artifact::text(text))
    }
}
