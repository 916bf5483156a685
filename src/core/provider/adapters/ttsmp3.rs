use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::read_json;
use crate::core::config::ProviderConfig;
use crate::core::provider::{
    Artifact, AudioClip, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput,
};

const DEFAULT_URL: &str = "https://ttsmp3.com/makemp3_new.php";
const DEFAULT_VOICE: &str = "Joey";

#[derive(Deserialize)]
struct MakeMp3Response {
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(rename = "Error", default)]
    error: Option<serde_json::Value>,
}

/// ttsmp3 renders speech on its side and answers with a link to the MP3.
pub struct Ttsmp3Adapter {
    id: String,
    url: String,
    voice: String,
    client: Client,
}

impl Ttsmp3Adapter {
    pub fn new(cfg: &ProviderConfig, client: Client) -> Self {
        Self {
            id: cfg.id.clone(),
            url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            voice: cfg.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            client,
        }
    }
}

/// `Error` is `0` on success and a message otherwise.
fn vendor_error(error: &serde_json::Value) -> Option<String> {
    match error {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) if n.as_u64() == Some(0) => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn hosted_clip(vendor: &str, body: MakeMp3Response) -> Result<AudioClip, ProviderError> {
    if let Some(message) = body.error.as_ref().and_then(vendor_error) {
        return Err(ProviderError::Permanent(format!("{}: {}", vendor, message)));
    }
    match body.url.map(|u| u.trim().to_string()) {
        Some(url) if !url.is_empty() => Ok(AudioClip::remote("audio/mpeg", url)),
        _ => Err(ProviderError::EmptyResult(format!(
            "{} returned no audio URL",
            vendor
        ))),
    }
}

#[async_trait]
impl ProviderAdapter for Ttsmp3Adapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Voice
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        let text = input.narration();
        if text.trim().is_empty() {
            return Err(ProviderError::Permanent("nothing to narrate".to_string()));
        }

        let res = self
            .client
            .post(&self.url)
            .form(&[
                ("msg", text),
                ("lang", self.voice.as_str()),
                ("source", "ttsmp3"),
            ])
            .send()
            .await?;
        let body: MakeMp3Response = read_json(res, &self.id).await?;
        Ok(Artifact::Audio(hosted_clip(&self.id, body)?))
    }
}
