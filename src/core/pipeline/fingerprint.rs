//! Deterministic cache keys.
//!
//! A fingerprint covers the capability, the part of the input that capability
//! actually consumes, and the provider id. Two requests that would send the
//! same thing to the same provider share a fingerprint.

use sha2::{Digest, Sha256};

use crate::core::provider::{CapabilityKind, ProviderInput};

/// Trim and collapse internal whitespace. Case is preserved.
pub fn normalize_topic(topic: &str) -> String {
    topic.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest of the input as seen by `capability`.
pub fn input_digest(capability: CapabilityKind, input: &ProviderInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(capability.as_str().as_bytes());
    hasher.update(b"\n");

    let topic = normalize_topic(&input.topic);
    match capability {
        CapabilityKind::Script | CapabilityKind::Visuals => {
            field(&mut hasher, "topic", topic.as_bytes());
        }
        CapabilityKind::Voice => {
            let narration = match &input.script {
                Some(script) => script.trim().to_string(),
                None => topic,
            };
            field(&mut hasher, "narration", narration.as_bytes());
        }
        CapabilityKind::Trends => {
            let keyword = input
                .keyword
                .as_deref()
                .map(normalize_topic)
                .unwrap_or(topic);
            field(&mut hasher, "keyword", keyword.as_bytes());
        }
        CapabilityKind::Assembly => {
            field(&mut hasher, "topic", topic.as_bytes());
            if let Some(script) = &input.script {
                field(&mut hasher, "script", sha256_hex(script.as_bytes()).as_bytes());
            }
            if let Some(audio) = &input.audio {
                match &audio.url {
                    Some(url) => field(&mut hasher, "audio_url", url.as_bytes()),
                    None => field(&mut hasher, "audio", sha256_hex(&audio.bytes).as_bytes()),
                }
            }
            for image in &input.images {
                field(&mut hasher, "image", image.url.as_bytes());
            }
        }
    }
    hex::encode(hasher.finalize())
}

fn field(hasher: &mut Sha256, name: &str, value: &[u8]) {
    hasher.update(name.as_bytes());
    hasher.update(b"=");
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value);
    hasher.update(b"\n");
}

/// Cache key for one provider producing one capability from one input.
pub fn fingerprint(capability: CapabilityKind, input_digest: &str, provider_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(capability.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(input_digest.as_bytes());
    hasher.update(b"\n");
    hasher.update(provider_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_does_not_change_the_digest() {
        let a = input_digest(CapabilityKind::Script, &ProviderInput::for_topic("  cute   cats "));
        let b = input_digest(CapabilityKind::Script, &ProviderInput::for_topic("cute cats"));
        assert_eq!(a, b);
        let c = input_digest(CapabilityKind::Script, &ProviderInput::for_topic("Cute cats"));
        assert_ne!(a, c);
    }

    #[test]
    fn provider_and_capability_separate_fingerprints() {
        let digest = input_digest(CapabilityKind::Script, &ProviderInput::for_topic("cats"));
        let a = fingerprint(CapabilityKind::Script, &digest, "a");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint(CapabilityKind::Script, &digest, "a"));
        assert_ne!(a, fingerprint(CapabilityKind::Script, &digest, "b"));
        assert_ne!(a, fingerprint(CapabilityKind::Visuals, &digest, "a"));
    }

    #[test]
    fn assembly_digest_follows_hosted_audio_url() {
        use crate::core::provider::AudioClip;

        let mut a = ProviderInput::for_topic("cats");
        a.audio = Some(AudioClip::remote("audio/mpeg", "https://cdn.example/1.mp3"));
        let mut b = a.clone();
        b.audio = Some(AudioClip::remote("audio/mpeg", "https://cdn.example/2.mp3"));
        assert_ne!(
            input_digest(CapabilityKind::Assembly, &a),
            input_digest(CapabilityKind::Assembly, &b)
        );
    }

    #[test]
    fn visuals_ignore_the_script() {
        let bare = ProviderInput::for_topic("cats");
        let mut scripted = bare.clone();
        scripted.script = Some("Cats are great.".into());
        assert_eq!(
            input_digest(CapabilityKind::Visuals, &bare),
            input_digest(CapabilityKind::Visuals, &scripted)
        );
        assert_ne!(
            input_digest(CapabilityKind::Voice, &bare),
            input_digest(CapabilityKind::Voice, &scripted)
        );
    }
}
