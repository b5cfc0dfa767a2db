use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use snafu::{ResultExt, ensure};

use crate::model::DEFAULT_MODEL;
use crate::provider::{
    BoxFuture, CompletionProvider, CompletionStatusSnafu, HttpRequestSnafu, MissingApiKeySnafu,
    ModelFetchStatusSnafu, PayloadParseSnafu, ProviderConfig, ProviderError, ProviderResult,
    ProviderStreamHandle, ProviderWorker, StreamEvent, make_event_stream,
};
use crate::sse::{SseLine, drain_lines, parse_line};

pub const OPENAI_PROVIDER_ID: &str = "openai";
pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible HTTP adapter: `/models` for listing,
/// `/chat/completions` for blocking and streamed completions.
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(mut config: ProviderConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "openai-new",
                provider_id: config.provider_id.clone(),
            }
        );
        if config.base_url.is_empty() {
            config.base_url = OPENAI_DEFAULT_BASE_URL.to_string();
        }
        Ok(Self {
            config,
            client: Client::new(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/'),
        )
    }

    async fn fetch_models_inner(&self) -> ProviderResult<Vec<String>> {
        let response = self
            .client
            .get(self.endpoint("/models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .context(HttpRequestSnafu {
                stage: "send-model-request",
            })?;
        let status = response.status();
        let body = response.text().await.context(HttpRequestSnafu {
            stage: "read-model-response",
        })?;
        ensure!(
            status.is_success(),
            ModelFetchStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                body,
            }
        );
        let payload: Value =
            serde_json::from_str(&body).map_err(|source| ProviderError::PayloadParse {
                stage: "parse-model-response",
                details: source.to_string(),
            })?;
        let ids = extract_model_ids(&payload);
        ensure!(
            !ids.is_empty(),
            PayloadParseSnafu {
                stage: "parse-model-response",
                details: "no model identifiers in listing".to_string(),
            }
        );
        Ok(ids)
    }

    async fn complete_inner(&self, payload: Value) -> ProviderResult<Value> {
        let response = self
            .client
            .post(self.endpoint("/chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .context(HttpRequestSnafu {
                stage: "send-completion",
            })?;
        let status = response.status();
        let body = response.text().await.context(HttpRequestSnafu {
            stage: "read-completion",
        })?;
        ensure!(
            status.is_success(),
            CompletionStatusSnafu {
                stage: "completion-http-status",
                status: status.as_u16(),
                body,
            }
        );
        serde_json::from_str(&body).map_err(|source| ProviderError::PayloadParse {
            stage: "parse-completion",
            details: source.to_string(),
        })
    }
}

impl CompletionProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<String>>> {
        Box::pin(self.fetch_models_inner())
    }

    fn complete<'a>(&'a self, payload: Value) -> BoxFuture<'a, ProviderResult<Value>> {
        Box::pin(self.complete_inner(payload))
    }

    fn stream(&self, payload: Value) -> ProviderResult<ProviderStreamHandle> {
        let (event_tx, stream, mut cancel_rx) = make_event_stream();
        let client = self.client.clone();
        let url = self.endpoint("/chat/completions");
        let api_key = self.config.api_key.clone();

        let worker: ProviderWorker = Box::pin(async move {
            let request = client.post(url).bearer_auth(api_key).json(&payload).send();
            let response = tokio::select! {
                _ = &mut cancel_rx => return,
                response = request => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    let _ = event_tx.send(StreamEvent::Error(error.to_string()));
                    return;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let _ = event_tx.send(StreamEvent::Error(format!(
                    "completion endpoint returned status {status}: {body}"
                )));
                return;
            }

            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            loop {
                let chunk = tokio::select! {
                    _ = &mut cancel_rx => return,
                    chunk = body.next() => chunk,
                };
                let Some(chunk) = chunk else {
                    break;
                };
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        let _ = event_tx.send(StreamEvent::Error(error.to_string()));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));
                for line in drain_lines(&mut buffer) {
                    match parse_line(&line) {
                        Some(SseLine::Payload(payload)) => {
                            let _ = event_tx.send(StreamEvent::Chunk(payload));
                        }
                        Some(SseLine::Done) => {
                            let _ = event_tx.send(StreamEvent::Done);
                            return;
                        }
                        None => {}
                    }
                }
            }
            // stream closed without a [DONE] marker
            let _ = event_tx.send(StreamEvent::Done);
        });

        Ok(ProviderStreamHandle { stream, worker })
    }
}

fn extract_model_ids(payload: &Value) -> Vec<String> {
    payload
        .get("data")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|model| model.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
