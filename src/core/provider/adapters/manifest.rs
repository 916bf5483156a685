use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::config::ProviderConfig;
use crate::core::pipeline::fingerprint::input_digest;
use crate::core::provider::{
    Artifact, AssemblyManifest, AudioSummary, CapabilityKind, ProviderAdapter, ProviderError,
    ProviderInput,
};

/// Local assembly step. Describes the finished piece from the artifacts of
/// earlier stages and, when `output_dir` is configured, writes it to disk.
pub struct ManifestAdapter {
    id: String,
    output_dir: Option<PathBuf>,
}

impl ManifestAdapter {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            output_dir: cfg.output_dir.clone(),
        }
    }

    async fn export(
        &self,
        dir: &Path,
        stem: &str,
        input: &ProviderInput,
        manifest: &AssemblyManifest,
    ) -> Result<(), ProviderError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| ProviderError::Transient(format!("create {}: {}", dir.display(), e)))?;

        if let Some(audio) = input.audio.as_ref().filter(|a| !a.bytes.is_empty()) {
            let path = dir.join(format!("{}.mp3", stem));
            tokio::fs::write(&path, &audio.bytes)
                .await
                .map_err(|e| ProviderError::Transient(format!("write {}: {}", path.display(), e)))?;
        }

        let body = serde_json::to_vec_pretty(manifest)
            .map_err(|e| ProviderError::Permanent(format!("encode manifest: {}", e)))?;
        let path = dir.join(format!("{}.json", stem));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| ProviderError::Transient(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for ManifestAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn capability(&self) -> CapabilityKind {
        CapabilityKind::Assembly
    }

    async fn invoke(&self, input: &ProviderInput) -> Result<Artifact, ProviderError> {
        if input.script.is_none() && input.audio.is_none() && input.images.is_empty() {
            return Err(ProviderError::Permanent(
                "nothing to assemble: no script, audio or visuals".to_string(),
            ));
        }

        let stem = input_digest(CapabilityKind::Assembly, input);
        let output_path = self
            .output_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", stem)).display().to_string());

        let manifest = AssemblyManifest {
            topic: input.topic.clone(),
            script: input.script.clone(),
            audio: input.audio.as_ref().map(|clip| AudioSummary {
                mime_type: clip.mime_type.clone(),
                size_bytes: clip.bytes.len(),
                url: clip.url.clone(),
            }),
            images: input.images.iter().map(|i| i.url.clone()).collect(),
            output_path,
        };

        if let Some(dir) = &self.output_dir {
            self.export(dir, &stem, input, &manifest).await?;
            tracing::info!(provider = %self.id, topic = %input.topic, "Wrote assembly manifest to {}", dir.display());
        }

        Ok(Artifact::Manifest(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AdapterKind, ProviderConfig};
    use crate::core::provider::{AudioClip, ImageRef};

    fn input() -> ProviderInput {
        ProviderInput {
            topic: "cats".to_string(),
            script: Some("Cats rule.".to_string()),
            audio: Some(AudioClip::inline(
                "audio/mpeg",
                bytes::Bytes::from_static(b"ID3"),
            )),
            images: vec![ImageRef {
                id: "1".to_string(),
                url: "https://img/1.jpg".to_string(),
                photographer: None,
                alt: None,
            }],
            keyword: None,
        }
    }

    #[tokio::test]
    async fn writes_manifest_named_by_input_digest() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ProviderConfig::new("manifest", AdapterKind::Manifest);
        cfg.output_dir = Some(dir.path().to_path_buf());
        let adapter = ManifestAdapter::new(&cfg);

        let input = input();
        let artifact = adapter.invoke(&input).await.unwrap();
        let Artifact::Manifest(manifest) = artifact else {
            panic!("expected a manifest");
        };

        let stem = input_digest(CapabilityKind::Assembly, &input);
        assert!(dir.path().join(format!("{}.json", stem)).exists());
        assert!(dir.path().join(format!("{}.mp3", stem)).exists());
        assert_eq!(manifest.images, vec!["https://img/1.jpg".to_string()]);
        assert_eq!(manifest.audio.unwrap().size_bytes, 3);
    }

    #[tokio::test]
    async fn hosted_audio_is_referenced_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = ProviderConfig::new("manifest", AdapterKind::Manifest);
        cfg.output_dir = Some(dir.path().to_path_buf());
        let adapter = ManifestAdapter::new(&cfg);

        let mut input = input();
        input.audio = Some(AudioClip::remote("audio/mpeg", "https://cdn.example/cats.mp3"));
        let Artifact::Manifest(manifest) = adapter.invoke(&input).await.unwrap() else {
            panic!("expected a manifest");
        };

        let stem = input_digest(CapabilityKind::Assembly, &input);
        assert!(!dir.path().join(format!("{}.mp3", stem)).exists());
        let audio = manifest.audio.unwrap();
        assert_eq!(audio.url.as_deref(), Some("https://cdn.example/cats.mp3"));
        assert_eq!(audio.size_bytes, 0);
    }

    #[tokio::test]
    async fn refuses_to_assemble_nothing() {
        let adapter = ManifestAdapter::new(&ProviderConfig::new("manifest", AdapterKind::Manifest));
        let err = adapter
            .invoke(&ProviderInput::for_topic("cats"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Permanent(_)));
    }
}
