use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{endpoint, read_json};
use crate::core::config::ProviderConfig;
use crate::core::provider::{Artifact, CapabilityKind, ProviderAdapter, ProviderError, ProviderInput};

const DEFAULT_URL: &str = "https://suggestqueries.google.com/complete/search";

/// YouTube search suggestions used as a lightweight trend signal.
pub struct GoogleSuggestAdapter {
    id: String,
    url: String,
    client: Client,
}

impl GoogleSuggestAdapter {
    pub fn new(cfg: &ProviderConfig, client: Client) -> Self {
        Self {
            id: cfg.id.clone(),
            url: cfg.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
            client,
        }
    }
}

/// The endpoint answers `[query, [suggestion, ...], ...]`.
fn parse_suggestions(body: &Value) -> Result<Vec<String>, ProviderError> {
    let list = body
        .get(1)
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Permanent("unexpected suggestion payload".to_string()))?;
    Ok(list
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

#[async_trait]
impl ProviderAdapter for GoogleSuggestAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Trends
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        let keyword = input.keyword.as_deref().unwrap_or(&input.topic);
        let url = endpoint(
            &self.url,
            &[("client", "firefox"), ("ds", "yt"), ("q", keyword)],
        )?;
        let res = self.client.get(url).send().await?;
        let body: Value = read_json(res, &self.id).await?;

        let topics = parse_suggestions(&body)?;
        if topics.is_empty() {
            return Err(ProviderError::EmptyResult(format!(
                "{} had no suggestions for '{}'",
                self.id, keyword
            )));
        }
        Ok(Artifact::Topics { topics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_second_element_as_suggestions() {
        let body: Value =
            serde_json::from_str(r#"["ai", ["ai news", " ", "ai tools"], [], {}]"#).unwrap();
        assert_eq!(
            parse_suggestions(&body).unwrap(),
            vec!["ai news".to_string(), "ai tools".to_string()]
        );
    }

    #[test]
    fn malformed_payload_is_permanent() {
        let body: Value = serde_json::from_str(r#"{"error": "nope"}"#).unwrap();
        assert!(matches!(
            parse_suggestions(&body),
            Err(ProviderError::Permanent(_))
        ));
    }
}
