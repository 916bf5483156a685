use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::ensure_success;
use crate::core::config::ProviderConfig;
use crate::core::provider::{
    Artifact, AudioClip, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput,
};

const DEFAULT_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_MODEL: &str = "eleven_monolingual_v1";

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

pub struct ElevenLabsAdapter {
    id: String,
    url: String,
    model: String,
    api_key: String,
    client: Client,
}

impl ElevenLabsAdapter {
    pub fn new(cfg: &ProviderConfig, api_key: String, client: Client) -> Self {
        let base = cfg.base_url.as_deref().unwrap_or(DEFAULT_URL).trim_end_matches('/');
        let voice = cfg.voice.as_deref().unwrap_or(DEFAULT_VOICE);
        Self {
            id: cfg.id.clone(),
            url: format!("{}/{}", base, voice),
            model: cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key,
            client,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ElevenLabsAdapter {
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

        let req = SpeechRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };
        let res = self
            .client
            .post(&self.url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&req)
            .send()
            .await?;
        let res = ensure_success(res, &self.id).await?;
        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{} returned an empty audio stream",
                self.id
            )));
        }

        Ok(Artifact::Audio(AudioClip::inline("audio/mpeg", bytes)))
    }
}
