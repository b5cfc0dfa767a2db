use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::{mpsc, oneshot};

use tangent_chat::{Chat, CompletionParams, Message, Response};
use tangent_llm::{CompletionProvider, ProviderError, ProviderStreamHandle, StreamEvent};

/// How long one submission may run before it is abandoned.
pub const SUBMISSION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    #[snafu(display("a submission is already in flight"))]
    SubmissionInFlight { stage: &'static str },
    #[snafu(display("provider call failed on `{stage}`, {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("completion stream failed: {message}"))]
    StreamFailed {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("completion response was malformed"))]
    MalformedResponse { stage: &'static str },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Progress report for one submission, in arrival order. Exactly one
/// terminal event follows any number of `Delta`s.
#[derive(Debug)]
pub enum SubmissionEvent {
    /// Streamed content fragment for the live display buffer.
    Delta(String),
    Completed(Response),
    Failed { message: String },
    TimedOut,
    Cancelled,
}

impl SubmissionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }
}

/// Receiver side of one in-flight submission. Dropping it cancels the
/// request.
pub struct SubmissionHandle {
    events: mpsc::UnboundedReceiver<SubmissionEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl SubmissionHandle {
    pub async fn recv(&mut self) -> Option<SubmissionEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SubmissionEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for SubmissionHandle {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives one completion request at a time against a provider.
///
/// The tree mutation happens synchronously in [`submit`](Self::submit);
/// the network round trip runs on a spawned task that reports through the
/// returned handle. A timed-out, failed or cancelled submission leaves the
/// tree exactly as `submit` left it.
pub struct SubmissionPipeline {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl SubmissionPipeline {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            timeout: SUBMISSION_TIMEOUT,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Submits `message` at the cursor position and starts the request.
    ///
    /// An editable current entry is rewritten in place; otherwise the
    /// message forks a sibling under the cursor. The request context is
    /// the linearized history down to the (new) current entry.
    pub fn submit(
        &self,
        chat: &mut Chat,
        params: &CompletionParams,
        message: Message,
    ) -> PipelineResult<SubmissionHandle> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return SubmissionInFlightSnafu { stage: "submit" }.fail();
        }
        let guard = FlightGuard(Arc::clone(&self.in_flight));

        if chat.is_editable() {
            let current = chat.current();
            let entry = chat.entry_mut(current);
            entry.set_prompt_role(message.role);
            entry.set_prompt_content(message.content);
        } else {
            chat.add_sibling(message, Response::default());
        }

        let mut params = params.clone();
        params.set_messages(chat.messages_of(chat.current()));
        let streaming = params.stream();
        let payload = params.to_request_payload();

        let (event_tx, events) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let provider = Arc::clone(&self.provider);
        let timeout = self.timeout;

        tokio::spawn(async move {
            let _guard = guard;
            run_submission(provider, payload, streaming, timeout, cancel_rx, event_tx).await;
        });

        Ok(SubmissionHandle {
            events,
            cancel_tx: Some(cancel_tx),
        })
    }
}

/// Feeds a completed response back into the tree: attach it to the current
/// entry, snap the view back, then seed the next editable turn.
pub fn apply_response(chat: &mut Chat, response: Response) {
    let current = chat.current();
    chat.entry_mut(current).set_response(response);
    chat.return_to_current();
    chat.add_descendant(Message::default(), Response::default());
}

async fn run_submission(
    provider: Arc<dyn CompletionProvider>,
    payload: Value,
    streaming: bool,
    timeout: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
    event_tx: mpsc::UnboundedSender<SubmissionEvent>,
) {
    let request = request_response(provider.as_ref(), payload, streaming, &event_tx);
    let outcome = tokio::select! {
        _ = &mut cancel_rx => {
            tracing::info!("submission cancelled, partial results discarded");
            let _ = event_tx.send(SubmissionEvent::Cancelled);
            return;
        }
        outcome = tokio::time::timeout(timeout, request) => outcome,
    };
    match outcome {
        Err(_) => {
            tracing::warn!(?timeout, "submission timed out");
            let _ = event_tx.send(SubmissionEvent::TimedOut);
        }
        Ok(Ok(response)) => {
            let _ = event_tx.send(SubmissionEvent::Completed(response));
        }
        Ok(Err(error)) => {
            tracing::warn!(%error, "submission failed");
            let _ = event_tx.send(SubmissionEvent::Failed {
                message: error.to_string(),
            });
        }
    }
}

async fn request_response(
    provider: &dyn CompletionProvider,
    payload: Value,
    streaming: bool,
    event_tx: &mpsc::UnboundedSender<SubmissionEvent>,
) -> PipelineResult<Response> {
    if !streaming {
        let value = provider
            .complete(payload)
            .await
            .context(ProviderSnafu { stage: "complete" })?;
        return Response::from_api_response(&value).context(MalformedResponseSnafu {
            stage: "parse-completion",
        });
    }

    let ProviderStreamHandle { mut stream, worker } = provider
        .stream(payload)
        .context(ProviderSnafu { stage: "open-stream" })?;
    tokio::spawn(worker);

    let mut chunks = Vec::new();
    while let Some(event) = stream.recv().await {
        match event {
            StreamEvent::Chunk(chunk) => {
                // role-only and finish-reason chunks carry no text and are
                // not part of the fold
                let Some(delta) = delta_text(&chunk) else {
                    continue;
                };
                let _ = event_tx.send(SubmissionEvent::Delta(delta));
                chunks.push(chunk);
            }
            StreamEvent::Done => break,
            StreamEvent::Error(message) => {
                return StreamFailedSnafu {
                    stage: "stream-event",
                    message,
                }
                .fail();
            }
        }
    }

    Response::from_api_responses(&chunks).context(MalformedResponseSnafu {
        stage: "fold-stream",
    })
}

fn delta_text(chunk: &Value) -> Option<String> {
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tangent_chat::Role;
    use tangent_llm::{
        BoxFuture, ProviderResult, ProviderWorker, make_event_stream,
    };

    struct ScriptedProvider {
        response: Value,
        chunks: Vec<Value>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn streaming(chunks: Vec<Value>) -> Self {
            Self {
                response: Value::Null,
                chunks,
                delay: None,
            }
        }

        fn blocking(response: Value) -> Self {
            Self {
                response,
                chunks: Vec::new(),
                delay: None,
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    impl CompletionProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "gpt-test"
        }

        fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<String>>> {
            Box::pin(async { Ok(vec!["gpt-test".to_string()]) })
        }

        fn complete<'a>(&'a self, _payload: Value) -> BoxFuture<'a, ProviderResult<Value>> {
            let response = self.response.clone();
            let delay = self.delay;
            Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            })
        }

        fn stream(&self, _payload: Value) -> ProviderResult<ProviderStreamHandle> {
            let (event_tx, stream, mut cancel_rx) = make_event_stream();
            let chunks = self.chunks.clone();
            let delay = self.delay;
            let worker: ProviderWorker = Box::pin(async move {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = &mut cancel_rx => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                for chunk in chunks {
                    let _ = event_tx.send(StreamEvent::Chunk(chunk));
                }
                let _ = event_tx.send(StreamEvent::Done);
            });
            Ok(ProviderStreamHandle { stream, worker })
        }
    }

    fn chunk(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "created": 1_700_000_000,
            "model": "gpt-test",
            "object": "chat.completion.chunk",
            "choices": [{"delta": {"content": content}}],
        })
    }

    fn role_only_chunk() -> Value {
        json!({
            "id": "chatcmpl-1",
            "created": 1_700_000_000,
            "model": "gpt-test",
            "object": "chat.completion.chunk",
            "choices": [{"delta": {"role": "assistant"}}],
        })
    }

    fn full_response(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "created": 1_700_000_000,
            "model": "gpt-test",
            "object": "chat.completion",
            "choices": [{"message": {"role": "assistant", "content": content}}],
        })
    }

    fn params() -> CompletionParams {
        CompletionParams::new("gpt-test").unwrap()
    }

    async fn drain(handle: &mut SubmissionHandle) -> (Vec<String>, SubmissionEvent) {
        let mut deltas = Vec::new();
        loop {
            let event = handle.recv().await.unwrap();
            match event {
                SubmissionEvent::Delta(delta) => deltas.push(delta),
                terminal => return (deltas, terminal),
            }
        }
    }

    #[tokio::test]
    async fn streamed_submission_reports_deltas_then_completes() {
        let provider = Arc::new(ScriptedProvider::streaming(vec![
            role_only_chunk(),
            chunk("Hel"),
            chunk("lo"),
            chunk("!"),
        ]));
        let pipeline = SubmissionPipeline::new(provider);
        let mut chat = Chat::new();

        let mut handle = pipeline
            .submit(&mut chat, &params(), Message::new(Role::User, "hi"))
            .unwrap();
        let (deltas, terminal) = drain(&mut handle).await;
        assert_eq!(deltas, vec!["Hel", "lo", "!"]);

        let SubmissionEvent::Completed(response) = terminal else {
            panic!("expected completion, got {terminal:?}");
        };
        assert_eq!(response.first_message().unwrap().content, "Hello!");

        apply_response(&mut chat, response);
        let current = chat.current_entry();
        assert!(current.prompt().is_default());
        let parent = current.parent().unwrap();
        assert_eq!(
            chat.entry(parent).response().first_message().unwrap().content,
            "Hello!",
        );
        // answered turn plus the empty draft prompt linearize for the next turn
        let messages = chat.api_messages_of(chat.current());
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[1].content, "Hello!");
        assert_eq!(messages[2].content, "");
    }

    #[tokio::test]
    async fn blocking_submission_parses_the_full_response() {
        let provider = Arc::new(ScriptedProvider::blocking(full_response("pong")));
        let pipeline = SubmissionPipeline::new(provider);
        let mut chat = Chat::new();
        let mut params = params();
        params.set_stream(false);

        let mut handle = pipeline
            .submit(&mut chat, &params, Message::new(Role::User, "ping"))
            .unwrap();
        let (deltas, terminal) = drain(&mut handle).await;
        assert!(deltas.is_empty());
        let SubmissionEvent::Completed(response) = terminal else {
            panic!("expected completion, got {terminal:?}");
        };
        assert_eq!(response.first_message().unwrap().content, "pong");
    }

    #[tokio::test]
    async fn only_one_submission_may_be_in_flight() {
        let provider = Arc::new(
            ScriptedProvider::streaming(vec![chunk("slow")]).delayed(Duration::from_secs(5)),
        );
        let pipeline = SubmissionPipeline::new(provider);
        let mut chat = Chat::new();

        let mut handle = pipeline
            .submit(&mut chat, &params(), Message::new(Role::User, "first"))
            .unwrap();
        assert!(pipeline.is_in_flight());
        assert!(matches!(
            pipeline.submit(&mut chat, &params(), Message::new(Role::User, "second")),
            Err(PipelineError::SubmissionInFlight { .. })
        ));

        assert!(handle.cancel());
        let (deltas, terminal) = drain(&mut handle).await;
        assert!(deltas.is_empty());
        assert!(matches!(terminal, SubmissionEvent::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_leaves_the_tree_as_submit_left_it() {
        let provider = Arc::new(
            ScriptedProvider::streaming(vec![chunk("never")]).delayed(Duration::from_secs(5)),
        );
        let pipeline = SubmissionPipeline::new(provider);
        let mut chat = Chat::new();

        let mut handle = pipeline
            .submit(&mut chat, &params(), Message::new(Role::User, "hi"))
            .unwrap();
        handle.cancel();
        let (_, terminal) = drain(&mut handle).await;
        assert!(matches!(terminal, SubmissionEvent::Cancelled));

        assert_eq!(chat.current_entry().prompt().content, "hi");
        assert!(chat.current_entry().response().is_default());
        assert!(chat.is_editable());
    }

    #[tokio::test]
    async fn slow_providers_time_out() {
        let provider = Arc::new(
            ScriptedProvider::streaming(vec![chunk("late")]).delayed(Duration::from_millis(200)),
        );
        let pipeline =
            SubmissionPipeline::new(provider).with_timeout(Duration::from_millis(20));
        let mut chat = Chat::new();

        let mut handle = pipeline
            .submit(&mut chat, &params(), Message::new(Role::User, "hi"))
            .unwrap();
        let (_, terminal) = drain(&mut handle).await;
        assert!(matches!(terminal, SubmissionEvent::TimedOut));
        assert!(chat.current_entry().response().is_default());
    }

    #[tokio::test]
    async fn resubmitting_history_forks_while_fresh_entries_edit_in_place() {
        let provider = Arc::new(ScriptedProvider::streaming(vec![chunk("one")]));
        let pipeline = SubmissionPipeline::new(provider);
        let mut chat = Chat::new();

        // first turn fills the seeded entry in place
        let mut handle = pipeline
            .submit(&mut chat, &params(), Message::new(Role::User, "q1"))
            .unwrap();
        let (_, terminal) = drain(&mut handle).await;
        let SubmissionEvent::Completed(response) = terminal else {
            panic!("expected completion");
        };
        apply_response(&mut chat, response);
        let draft = chat.current();
        let first_turn = chat.current_entry().parent().unwrap();
        assert_eq!(chat.entry(first_turn).children().len(), 1);
        drop(handle);

        // moving back onto the answered first turn and submitting forks it
        chat.up();
        assert_eq!(chat.cursor(), first_turn);
        let provider = Arc::new(ScriptedProvider::streaming(vec![chunk("two")]));
        let pipeline = SubmissionPipeline::new(provider);
        let mut handle = pipeline
            .submit(&mut chat, &params(), Message::new(Role::User, "q1-redo"))
            .unwrap();
        let (_, terminal) = drain(&mut handle).await;
        assert!(matches!(terminal, SubmissionEvent::Completed(_)));

        assert_ne!(chat.current(), first_turn);
        assert_eq!(chat.current_entry().prompt().content, "q1-redo");
        assert_eq!(
            chat.current_entry().parent(),
            chat.entry(first_turn).parent(),
        );
        // the answered turn survives; only the abandoned draft was blanked
        assert_eq!(chat.entry(first_turn).prompt().content, "q1");
        assert!(chat.entry(draft).prompt().content.is_empty());
    }
}
