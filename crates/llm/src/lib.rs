//! Completion-provider boundary: a transport trait, the OpenAI-compatible
//! HTTP adapter behind it, and credential/model-listing helpers.

use std::sync::Arc;

pub mod model;
pub mod openai;
pub mod provider;
mod sse;

pub use model::{DEFAULT_MODEL, DEFAULT_MODEL_PREFIXES, filter_model_ids};
pub use openai::{OPENAI_DEFAULT_BASE_URL, OPENAI_PROVIDER_ID, OpenAiProvider};
pub use provider::{
    BoxFuture, CompletionProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderResult, ProviderStreamHandle, ProviderWorker, StreamEvent, make_event_stream,
};

use provider::UnsupportedProviderSnafu;

/// Instantiates the provider named by `config.provider_id`; an empty id
/// means the OpenAI-compatible default.
pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn CompletionProvider>> {
    if config.provider_id.is_empty() {
        config.provider_id = OPENAI_PROVIDER_ID.to_string();
    }
    match config.provider_id.as_str() {
        OPENAI_PROVIDER_ID => Ok(Arc::new(OpenAiProvider::new(config)?)),
        _ => UnsupportedProviderSnafu {
            stage: "create-provider",
            provider_id: config.provider_id,
        }
        .fail(),
    }
}

/// Lists selectable model ids, filtered by prefix. Listing failures are
/// reported as an empty list so the caller can fall back to manual entry.
pub async fn list_models(provider: &dyn CompletionProvider, prefixes: &[&str]) -> Vec<String> {
    match provider.fetch_models().await {
        Ok(ids) => filter_model_ids(ids, prefixes),
        Err(error) => {
            tracing::warn!(%error, provider = provider.id(), "model listing failed");
            Vec::new()
        }
    }
}

/// A key is considered valid when the model listing succeeds with it.
pub async fn validate_credentials(provider: &dyn CompletionProvider) -> bool {
    provider.fetch_models().await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::PayloadParseSnafu;
    use serde_json::Value;

    struct ScriptedProvider {
        models: ProviderResult<Vec<String>>,
    }

    impl ScriptedProvider {
        fn listing(ids: &[&str]) -> Self {
            Self {
                models: Ok(ids.iter().map(|id| id.to_string()).collect()),
            }
        }

        fn failing() -> Self {
            Self {
                models: PayloadParseSnafu {
                    stage: "test",
                    details: "scripted failure".to_string(),
                }
                .fail(),
            }
        }
    }

    impl CompletionProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            DEFAULT_MODEL
        }

        fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<String>>> {
            let models = match &self.models {
                Ok(ids) => Ok(ids.clone()),
                Err(_) => PayloadParseSnafu {
                    stage: "test",
                    details: "scripted failure".to_string(),
                }
                .fail(),
            };
            Box::pin(async move { models })
        }

        fn complete<'a>(&'a self, payload: Value) -> BoxFuture<'a, ProviderResult<Value>> {
            Box::pin(async move { Ok(payload) })
        }

        fn stream(&self, _payload: Value) -> ProviderResult<ProviderStreamHandle> {
            let (event_tx, stream, _cancel_rx) = make_event_stream();
            let worker: ProviderWorker = Box::pin(async move {
                let _ = event_tx.send(StreamEvent::Done);
            });
            Ok(ProviderStreamHandle { stream, worker })
        }
    }

    #[test]
    fn create_provider_dispatches_on_id() {
        let config = ProviderConfig::new("", "sk-test", "", None);
        let provider = create_provider(config).unwrap();
        assert_eq!(provider.id(), OPENAI_PROVIDER_ID);

        let config = ProviderConfig::new("acme", "sk-test", "", None);
        assert!(matches!(
            create_provider(config),
            Err(ProviderError::UnsupportedProvider { .. })
        ));
    }

    #[tokio::test]
    async fn listing_filters_by_prefix_and_degrades_to_empty() {
        let provider = ScriptedProvider::listing(&["gpt-4", "whisper-1", "gpt-3.5-turbo"]);
        assert_eq!(
            list_models(&provider, DEFAULT_MODEL_PREFIXES).await,
            vec!["gpt-4", "gpt-3.5-turbo"],
        );

        let provider = ScriptedProvider::failing();
        assert!(list_models(&provider, DEFAULT_MODEL_PREFIXES).await.is_empty());
    }

    #[tokio::test]
    async fn credentials_are_valid_when_listing_succeeds() {
        assert!(validate_credentials(&ScriptedProvider::listing(&["gpt-4"])).await);
        assert!(!validate_credentials(&ScriptedProvider::failing()).await);
    }
}
