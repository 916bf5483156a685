pub mod adapters;
mod registry;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};

pub use registry::{Provider, ProviderRegistry};

/// The kind of external function a provider performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Script,
    Voice,
    Visuals,
    Trends,
    Assembly,
}

impl CapabilityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityKind::Script => "script",
            CapabilityKind::Voice => "voice",
            CapabilityKind::Visuals => "visuals",
            CapabilityKind::Trends => "trends",
            CapabilityKind::Assembly => "assembly",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "script" => Some(CapabilityKind::Script),
            "voice" => Some(CapabilityKind::Voice),
            "visuals" => Some(CapabilityKind::Visuals),
            "trends" => Some(CapabilityKind::Trends),
            "assembly" => Some(CapabilityKind::Assembly),
            _ => None,
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-level failure, classified so the executor knows whether to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "class", content = "message", rename_all = "snake_case")]
pub enum ProviderError {
    /// Network failure, timeout or rate limit. Retryable.
    #[error("transient: {0}")]
    Transient(String),
    /// Bad input or auth failure. Never retried.
    #[error("permanent: {0}")]
    Permanent(String),
    /// Successful response without usable content. Retried under a lower ceiling.
    #[error("empty result: {0}")]
    EmptyResult(String),
}

impl ProviderError {
    pub fn class(&self) -> &'static str {
        match self {
            ProviderError::Transient(_) => "transient",
            ProviderError::Permanent(_) => "permanent",
            ProviderError::EmptyResult(_) => "empty_result",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Transient(m)
            | ProviderError::Permanent(m)
            | ProviderError::EmptyResult(m) => m,
        }
    }

    /// Classify a non-success HTTP status returned by a vendor.
    pub fn from_status(vendor: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("{} API error ({}): {}", vendor, status.as_u16(), truncate(body, 300));
        match status.as_u16() {
            408 | 425 | 429 => ProviderError::Transient(detail),
            500..=599 => ProviderError::Transient(detail),
            _ => ProviderError::Permanent(detail),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ProviderError::from_status("provider", status, &e.to_string());
        }
        if e.is_decode() || e.is_builder() {
            ProviderError::Permanent(e.to_string())
        } else {
            ProviderError::Transient(e.to_string())
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Synthesized speech. Either inline bytes or a URL the vendor hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioClip {
    pub mime_type: String,
    #[serde(serialize_with = "serialize_base64")]
    pub bytes: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl AudioClip {
    pub fn inline(mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
            url: None,
        }
    }

    pub fn remote(mime_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: Bytes::new(),
            url: Some(url.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.url.as_deref().is_none_or(|u| u.trim().is_empty())
    }
}

fn serialize_base64<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    pub photographer: Option<String>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSummary {
    pub mime_type: String,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Description of the final piece, standing in for a rendered video.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyManifest {
    pub topic: String,
    pub script: Option<String>,
    pub audio: Option<AudioSummary>,
    pub images: Vec<String>,
    pub output_path: Option<String>,
}

/// Opaque stage output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Text { text: String },
    Audio(AudioClip),
    Images { images: Vec<ImageRef> },
    Topics { topics: Vec<String> },
    Manifest(AssemblyManifest),
}

impl Artifact {
    pub fn text(text: impl Into<String>) -> Self {
        Artifact::Text { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Text { .. } => "text",
            Artifact::Audio(_) => "audio",
            Artifact::Images { .. } => "images",
            Artifact::Topics { .. } => "topics",
            Artifact::Manifest(_) => "manifest",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Artifact::Text { text } => text.trim().is_empty(),
            Artifact::Audio(clip) => clip.is_empty(),
            Artifact::Images { images } => images.is_empty(),
            Artifact::Topics { topics } => topics.is_empty(),
            Artifact::Manifest(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Artifact::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Everything a provider may consume. Built by the orchestrator from the
/// request topic and the artifacts of earlier stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderInput {
    pub topic: String,
    pub script: Option<String>,
    pub audio: Option<AudioClip>,
    pub images: Vec<ImageRef>,
    pub keyword: Option<String>,
}

impl ProviderInput {
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn for_keyword(keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        Self {
            topic: keyword.clone(),
            keyword: Some(keyword),
            ..Default::default()
        }
    }

    /// Text a voice provider should narrate: the script when one exists.
    pub fn narration(&self) -> &str {
        self.script.as_deref().unwrap_or(&self.topic)
    }

    /// Fold a produced artifact into the input for later stages.
    pub fn absorb(&mut self, artifact: &Artifact) {
        match artifact {
            Artifact::Text { text } => self.script = Some(text.clone()),
            Artifact::Audio(clip) => self.audio = Some(clip.clone()),
            Artifact::Images { images } => self.images = images.clone(),
            Artifact::Topics { .. } | Artifact::Manifest(_) => {}
        }
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn capability(&self) -> CapabilityKind;

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_is_empty_without_bytes_or_url() {
        assert!(AudioClip::inline("audio/mpeg", Vec::new()).is_empty());
        assert!(AudioClip::remote("audio/mpeg", " ").is_empty());
        assert!(!AudioClip::remote("audio/mpeg", "https://cdn.example/a.mp3").is_empty());
        assert!(!Artifact::Audio(AudioClip::inline("audio/mpeg", vec![1u8])).is_empty());
    }

    #[test]
    fn status_classification_splits_retryable_codes() {
        use reqwest::StatusCode;
        assert!(matches!(
            ProviderError::from_status("x", StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            ProviderError::from_status("x", StatusCode::BAD_GATEWAY, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            ProviderError::from_status("x", StatusCode::UNAUTHORIZED, ""),
            ProviderError::Permanent(_)
        ));
        assert!(matches!(
            ProviderError::from_status("x", StatusCode::BAD_REQUEST, ""),
            ProviderError::Permanent(_)
        ));
    }

    #[test]
    fn absorb_carries_script_forward_as_narration() {
        let mut input = ProviderInput::for_topic("cats");
        assert_eq!(input.narration(), "cats");
        input.absorb(&Artifact::text("Cats rule the internet."));
        assert_eq!(input.narration(), "Cats rule the internet.");
    }

    #[test]
    fn empty_artifacts_are_detected() {
        assert!(Artifact::text("   ").is_empty());
        assert!(Artifact::Images { images: vec![] }.is_empty());
        assert!(!Artifact::Topics {
            topics: vec!["ai news".to_string()]
        }
        .is_empty());
    }

    #[test]
    fn provider_error_serializes_with_class() {
        let json = serde_json::to_value(ProviderError::EmptyResult("nothing".into())).unwrap();
        assert_eq!(json["class"], "empty_result");
        assert_eq!(json["message"], "nothing");
    }
}
