//! Vendor adapters. Each one owns its request/response shapes and maps vendor
//! failures onto [`ProviderError`] classes.

mod elevenlabs;
mod gemini;
mod manifest;
mod openai;
mod pexels;
mod suggest;
mod ttsmp3;
mod voicerss;

use std::sync::Arc;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

pub use elevenlabs::ElevenLabsAdapter;
pub use gemini::GeminiAdapter;
pub use manifest::ManifestAdapter;
pub use openai::OpenAiCompatibleAdapter;
pub use pexels::PexelsAdapter;
pub use suggest::GoogleSuggestAdapter;
pub use ttsmp3::Ttsmp3Adapter;
pub use voicerss::VoiceRssAdapter;

use super::{ProviderAdapter, ProviderError};
use crate::core::config::{AdapterKind, ConfigError, ProviderConfig};

/// Construct the adapter described by `cfg`. Credentials are taken from the
/// already-resolved config, never from the environment.
pub fn build(cfg: &ProviderConfig, client: Client) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
    let api_key = || {
        cfg.credentials
            .api_key()
            .map(str::to_string)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "missing API key (set {})",
                    cfg.api_key_env.as_deref().unwrap_or("api_key_env")
                ))
            })
    };

    let adapter: Arc<dyn ProviderAdapter> = match cfg.adapter {
        AdapterKind::OpenaiCompatible => {
            Arc::new(OpenAiCompatibleAdapter::new(cfg, api_key()?, client))
        }
        AdapterKind::Gemini => Arc::new(GeminiAdapter::new(cfg, api_key()?, client)),
        AdapterKind::Elevenlabs => Arc::new(ElevenLabsAdapter::new(cfg, api_key()?, client)),
        AdapterKind::Voicerss => Arc::new(VoiceRssAdapter::new(cfg, api_key()?, client)),
        AdapterKind::Ttsmp3 => Arc::new(Ttsmp3Adapter::new(cfg, client)),
        AdapterKind::Pexels => Arc::new(PexelsAdapter::new(cfg, api_key()?, client)),
        AdapterKind::GoogleSuggest => Arc::new(GoogleSuggestAdapter::new(cfg, client)),
        AdapterKind::Manifest => Arc::new(ManifestAdapter::new(cfg)),
    };
    Ok(adapter)
}

/// Prompt shared by the script adapters.
pub(crate) fn script_prompt(topic: &str) -> String {
    format!(
        "Write a 2-minute YouTube video script on the topic: \"{}\". Make it engaging and informative, with a strong hook, a clear body and a call to action at the end.",
        topic
    )
}

/// Append query parameters to a vendor endpoint.
pub(crate) fn endpoint(base: &str, params: &[(&str, &str)]) -> Result<url::Url, ProviderError> {
    url::Url::parse_with_params(base, params)
        .map_err(|e| ProviderError::Permanent(format!("invalid endpoint '{}': {}", base, e)))
}

/// Fail with a classified error unless the response is 2xx.
pub(crate) async fn ensure_success(res: Response, vendor: &str) -> Result<Response, ProviderError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(ProviderError::from_status(vendor, status, &body))
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    res: Response,
    vendor: &str,
) -> Result<T, ProviderError> {
    let res = ensure_success(res, vendor).await?;
    res.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            ProviderError::Permanent(format!("{} returned an unexpected body: {}", vendor, e))
        } else {
            ProviderError::Transient(format!("{} response was interrupted: {}", vendor, e))
        }
    })
}
