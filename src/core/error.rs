use crate::core::pipeline::CacheProductionFailed;
use crate::core::provider::{CapabilityKind, ProviderError};

/// Failures surfaced by the pipeline to its callers.
///
/// Transient provider errors are recovered inside the stage executor, so the
/// provider variants only appear as the `last_error` of an exhausted stage.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("provider '{provider_id}' failed (transient): {message}")]
    ProviderTransient { provider_id: String, message: String },

    #[error("provider '{provider_id}' failed (permanent): {message}")]
    ProviderPermanent { provider_id: String, message: String },

    #[error(
        "all providers exhausted for {capability} after {attempts} attempt(s){}",
        describe_last(.last_error)
    )]
    AllProvidersExhausted {
        capability: CapabilityKind,
        attempts: u32,
        last_error: Option<Box<PipelineError>>,
    },

    #[error(transparent)]
    CacheProductionFailed(#[from] CacheProductionFailed),

    #[error("{capability} stage exceeded its {ceiling_ms} ms ceiling")]
    StageTimedOut {
        capability: CapabilityKind,
        ceiling_ms: u64,
    },

    #[error("request '{0}' was cancelled")]
    Cancelled(String),

    #[error("{0} not found")]
    NotFound(String),
}

fn describe_last(last: &Option<Box<PipelineError>>) -> String {
    match last {
        Some(err) => format!(": {}", err),
        None => ": no provider configured".to_string(),
    }
}

impl PipelineError {
    /// Stable machine-readable code, used in job state and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input_error",
            PipelineError::ProviderTransient { .. } => "provider_transient",
            PipelineError::ProviderPermanent { .. } => "provider_permanent",
            PipelineError::AllProvidersExhausted { .. } => "all_providers_exhausted",
            PipelineError::CacheProductionFailed(_) => "cache_production_failed",
            PipelineError::StageTimedOut { .. } => "stage_timed_out",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::NotFound(_) => "not_found",
        }
    }

    /// Lift an adapter error into the pipeline taxonomy. Empty results count
    /// as transient.
    pub fn from_provider(provider_id: &str, err: &ProviderError) -> Self {
        let provider_id = provider_id.to_string();
        match err {
            ProviderError::Permanent(message) => PipelineError::ProviderPermanent {
                provider_id,
                message: message.clone(),
            },
            ProviderError::Transient(message) | ProviderError::EmptyResult(message) => {
                PipelineError::ProviderTransient {
                    provider_id,
                    message: message.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_message_includes_last_error() {
        let err = PipelineError::AllProvidersExhausted {
            capability: CapabilityKind::Script,
            attempts: 2,
            last_error: Some(Box::new(PipelineError::from_provider(
                "b",
                &ProviderError::Permanent("401".into()),
            ))),
        };
        assert_eq!(err.code(), "all_providers_exhausted");
        assert_eq!(
            err.to_string(),
            "all providers exhausted for script after 2 attempt(s): provider 'b' failed (permanent): 401"
        );
    }

    #[test]
    fn empty_results_lift_to_transient() {
        let err = PipelineError::from_provider("a", &ProviderError::EmptyResult("none".into()));
        assert_eq!(err.code(), "provider_transient");
    }

    #[test]
    fn no_provider_is_described() {
        let err = PipelineError::AllProvidersExhausted {
            capability: CapabilityKind::Voice,
            attempts: 0,
            last_error: None,
        };
        assert!(err.to_string().ends_with("no provider configured"));
    }
}
