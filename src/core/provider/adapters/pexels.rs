use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{endpoint, read_json};
use crate::core::config::ProviderConfig;
use crate::core::provider::{
    Artifact, CapabilityKind, ImageRef, ProviderAdapter, ProviderError, ProviderInput,
};

const DEFAULT_URL: &str = "https://api.pexels.com/v1/search";
const DEFAULT_PER_PAGE: u32 = 3;

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Deserialize)]
struct Photo {
    id: u64,
    url: String,
    #[serde(default)]
    photographer: Option<String>,
    #[serde(default)]
    alt: Option<String>,
    #[serde(default)]
    src: Option<PhotoSources>,
}

#[derive(Deserialize)]
struct PhotoSources {
    #[serde(default)]
    large: Option<String>,
}

pub struct PexelsAdapter {
    id: String,
    url: String,
    per_page: u32,
    api_key: String,
    client: Client,
}

impl PexelsAdapter {
    pub fn new(cfg: &ProviderConfig, api_key: String, client: Client) -> Self {
        Self {
            id: cfg.id.clone(),
            url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            per_page: cfg.per_page.unwrap_or(DEFAULT_PER_PAGE).max(1),
            api_key,
            client,
        }
    }
}

fn to_image_ref(photo: Photo) -> ImageRef {
    let url = photo
        .src
        .and_then(|s| s.large)
        .unwrap_or(photo.url);
    ImageRef {
        id: photo.id.to_string(),
        url,
        photographer: photo.photographer,
        alt: photo.alt.filter(|a| !a.is_empty()),
    }
}

#[async_trait]
impl ProviderAdapter for PexelsAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Visuals
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        let per_page = self.per_page.to_string();
        let url = endpoint(
            &self.url,
            &[("query", input.topic.as_str()), ("per_page", per_page.as_str())],
        )?;
        // Pexels takes the raw key, no Bearer prefix.
        let res = self
            .client
            .get(url)
            .header("Authorization", &self.api_key)
            .send()
            .await?;
        let parsed: SearchResponse = read_json(res, &self.id).await?;

        let images: Vec<ImageRef> = parsed.photos.into_iter().map(to_image_ref).collect();
        if images.is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{} found no photos for '{}'",
                self.id, input.topic
            )));
        }
        Ok(Artifact::Images { images })
    }
}
