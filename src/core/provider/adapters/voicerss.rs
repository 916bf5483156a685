use async_trait::async_trait;
use reqwest::Client;

use super::{endpoint, ensure_success};
use crate::core::config::ProviderConfig;
use crate::core::provider::{
    Artifact, AudioClip, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput,
};

const DEFAULT_URL: &str = "https://api.voicerss.org/";
const DEFAULT_LANGUAGE: &str = "en-us";

pub struct VoiceRssAdapter {
    id: String,
    url: String,
    language: String,
    api_key: String,
    client: Client,
}

impl VoiceRssAdapter {
    pub fn new(cfg: &ProviderConfig, api_key: String, client: Client) -> Self {
        Self {
            id: cfg.id.clone(),
            url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            language: cfg
                .voice
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            api_key,
            client,
        }
    }
}

/// VoiceRSS reports failures as a 200 response whose body starts with `ERROR`.
fn in_band_error(body: &[u8]) -> Option<String> {
    let head = &body[..body.len().min(256)];
    let text = std::str::from_utf8(head).ok()?;
    text.trim_start()
        .starts_with("ERROR")
        .then(|| text.trim().to_string())
}

#[async_trait]
impl ProviderAdapter for VoiceRssAdapter {
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

        let url = endpoint(
            &self.url,
            &[
                ("key", self.api_key.as_str()),
                ("hl", self.language.as_str()),
                ("c", "MP3"),
                ("f", "44khz_16bit_stereo"),
                ("src", text),
            ],
        )?;
        let res = self.client.get(url).send().await?;
        let res = ensure_success(res, &self.id).await?;
        let bytes = res.bytes().await?;

        if let Some(message) = in_band_error(&bytes) {
            return Err(ProviderError::Permanent(format!("{}: {}", self.id, message)));
        }
        if bytes.is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{} returned an empty audio stream",
                self.id
            )));
        }

        Ok(Artifact::Audio(AudioClip::inline("audio/mpeg", bytes)))
    }
}
