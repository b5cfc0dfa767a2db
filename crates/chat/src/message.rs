use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Sentinel timestamp for messages that have not touched the API yet.
pub const DEFAULT_CREATED: i64 = 0;

/// Sentinel message id (nil UUID), rendered in string form.
pub fn default_id() -> String {
    Uuid::nil().to_string()
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parses an API role string. Unknown roles are a parse failure, not a panic.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Wire shape the completion API accepts for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

/// One complete chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub id: String,
    pub created: i64,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            role: Role::default(),
            content: String::new(),
            id: default_id(),
            created: DEFAULT_CREATED,
        }
    }
}

impl Message {
    /// Creates a message that has not been through the API (sentinel id/timestamp).
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ..Self::default()
        }
    }

    /// Attribute-wise comparison against the "no content yet" sentinel.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_api_message(&self) -> ApiMessage {
        ApiMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }

    /// Parses a bare `{role, content}` message object.
    pub fn from_api_message(payload: &Value) -> Option<Self> {
        let payload = payload.as_object()?;
        let role = Role::parse(payload.get("role")?.as_str()?)?;
        let content = payload.get("content")?.as_str()?;
        Some(Self::new(role, content))
    }

    /// Parses the first choice of a full completion response into a message.
    ///
    /// A `delta` choice implies `role = assistant`; this API never carries a
    /// role field on streaming deltas.
    pub fn from_api_response(payload: &Value) -> Option<Self> {
        let (id, created, choices) = response_header(payload)?;
        let choice = choice_message(choices.first()?, &id, created)?;
        Some(choice.to_message())
    }
}

/// Streamed response still being assembled from content deltas.
///
/// Fragments share one `role`/`id`/`created` and are kept as an append-only
/// buffer; the only consumer concatenates them in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingMessage {
    pub role: Role,
    pub id: String,
    pub created: i64,
    deltas: Vec<String>,
}

impl StreamingMessage {
    pub fn new(role: Role, id: impl Into<String>, created: i64) -> Self {
        Self {
            role,
            id: id.into(),
            created,
            deltas: Vec::new(),
        }
    }

    /// Appends one content fragment in arrival order.
    pub fn push_delta(&mut self, delta: impl Into<String>) {
        self.deltas.push(delta.into());
    }

    pub fn deltas(&self) -> &[String] {
        &self.deltas
    }

    /// Collapses the fragment buffer into a complete message.
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.deltas.concat(),
            id: self.id.clone(),
            created: self.created,
        }
    }

    pub fn to_api_message(&self) -> ApiMessage {
        ApiMessage {
            role: self.role,
            content: self.deltas.concat(),
        }
    }

    /// Parses one streamed chunk; the chunk must carry a `delta` choice.
    pub fn from_api_chunk(payload: &Value) -> Option<Self> {
        let (id, created, choices) = response_header(payload)?;
        let content = delta_content(choices.first()?)?;
        let mut streaming = Self::new(Role::Assistant, id, created);
        streaming.push_delta(content);
        Some(streaming)
    }

    /// Folds an ordered batch of streamed chunks into one message-in-progress.
    ///
    /// The shared header comes from the first chunk. Any structurally invalid
    /// chunk fails the whole fold.
    pub fn from_api_chunks(payloads: &[Value]) -> Option<Self> {
        let (first, rest) = payloads.split_first()?;
        let mut streaming = Self::from_api_chunk(first)?;
        for payload in rest {
            let (_, _, choices) = response_header(payload)?;
            streaming.push_delta(delta_content(choices.first()?)?);
        }
        Some(streaming)
    }
}

/// One response choice: a complete message or a stream still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Message(Message),
    Streaming(StreamingMessage),
}

impl Choice {
    /// Collapses the choice into a plain message (identity for the plain arm).
    pub fn to_message(&self) -> Message {
        match self {
            Self::Message(message) => message.clone(),
            Self::Streaming(streaming) => streaming.to_message(),
        }
    }

    pub fn to_api_message(&self) -> ApiMessage {
        match self {
            Self::Message(message) => message.to_api_message(),
            Self::Streaming(streaming) => streaming.to_api_message(),
        }
    }
}

/// Validates the fields every completion payload must carry: `id` (string),
/// `created` (integer) and a non-empty `choices` array.
pub(crate) fn response_header(payload: &Value) -> Option<(String, i64, &Vec<Value>)> {
    let payload = payload.as_object()?;
    let id = payload.get("id")?.as_str()?.to_string();
    let created = payload.get("created")?.as_i64()?;
    let choices = payload.get("choices")?.as_array()?;
    if choices.is_empty() {
        return None;
    }
    Some((id, created, choices))
}

/// Parses one choice object into a `Choice`, resolving `message` vs `delta`.
pub(crate) fn choice_message(choice: &Value, id: &str, created: i64) -> Option<Choice> {
    let choice = choice.as_object()?;
    if let Some(message) = choice.get("message") {
        let message = message.as_object()?;
        let role = Role::parse(message.get("role")?.as_str()?)?;
        let content = message.get("content")?.as_str()?;
        return Some(Choice::Message(Message {
            role,
            content: content.to_string(),
            id: id.to_string(),
            created,
        }));
    }
    let delta = choice.get("delta")?.as_object()?;
    let content = delta.get("content")?.as_str()?;
    let mut streaming = StreamingMessage::new(Role::Assistant, id, created);
    streaming.push_delta(content);
    Some(Choice::Streaming(streaming))
}

fn delta_content(choice: &Value) -> Option<String> {
    let delta = choice.as_object()?.get("delta")?.as_object()?;
    Some(delta.get("content")?.as_str()?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "created": 1_700_000_000,
            "model": "gpt-3.5-turbo",
            "object": "chat.completion.chunk",
            "choices": [{"delta": {"content": content}}],
        })
    }

    #[test]
    fn default_message_matches_sentinel_attribute_wise() {
        let message = Message::new(Role::User, "");
        assert!(message.is_default());
        assert!(!Message::new(Role::User, "hi").is_default());

        let mut stamped = Message::new(Role::User, "");
        stamped.created = 12;
        assert!(!stamped.is_default());
    }

    #[test]
    fn from_api_message_rejects_missing_or_mistyped_fields() {
        assert!(Message::from_api_message(&json!({"role": "user", "content": "hi"})).is_some());
        assert!(Message::from_api_message(&json!({"role": "user"})).is_none());
        assert!(Message::from_api_message(&json!({"content": "hi"})).is_none());
        assert!(Message::from_api_message(&json!({"role": "user", "content": 3})).is_none());
        assert!(Message::from_api_message(&json!({"role": "robot", "content": "hi"})).is_none());
        assert!(Message::from_api_message(&json!("not an object")).is_none());
    }

    #[test]
    fn from_api_response_reads_message_choice_with_role() {
        let payload = json!({
            "id": "chatcmpl-1",
            "created": 42,
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
        });
        let message = Message::from_api_response(&payload).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "hello");
        assert_eq!(message.id, "chatcmpl-1");
        assert_eq!(message.created, 42);
    }

    #[test]
    fn from_api_response_defaults_delta_role_to_assistant() {
        let message = Message::from_api_response(&chunk("hi")).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "hi");
    }

    #[test]
    fn from_api_response_requires_header_fields() {
        assert!(Message::from_api_response(&json!({"created": 1, "choices": []})).is_none());
        assert!(
            Message::from_api_response(&json!({
                "id": "x",
                "created": "soon",
                "choices": [{"message": {"role": "user", "content": "hi"}}],
            }))
            .is_none()
        );
        assert!(
            Message::from_api_response(&json!({"id": "x", "created": 1, "choices": []})).is_none()
        );
        // a message choice without a role is invalid; only deltas imply one
        assert!(
            Message::from_api_response(&json!({
                "id": "x",
                "created": 1,
                "choices": [{"message": {"content": "hi"}}],
            }))
            .is_none()
        );
    }

    #[test]
    fn chunk_batch_folds_in_arrival_order() {
        let payloads = vec![chunk("Hel"), chunk("lo"), chunk(", world")];
        let streaming = StreamingMessage::from_api_chunks(&payloads).unwrap();
        assert_eq!(streaming.to_message().content, "Hello, world");
        assert_eq!(streaming.deltas().len(), 3);
        assert_eq!(streaming.role, Role::Assistant);
    }

    #[test]
    fn chunk_batch_fails_on_any_invalid_chunk() {
        let payloads = vec![chunk("ok"), json!({"id": "x", "created": 1, "choices": []})];
        assert!(StreamingMessage::from_api_chunks(&payloads).is_none());
        assert!(StreamingMessage::from_api_chunks(&[]).is_none());
    }

    #[test]
    fn streaming_to_api_message_concatenates_content() {
        let mut streaming = StreamingMessage::new(Role::Assistant, "id-1", 7);
        streaming.push_delta("a");
        streaming.push_delta("b");
        let api = streaming.to_api_message();
        assert_eq!(api.role, Role::Assistant);
        assert_eq!(api.content, "ab");
    }

    #[test]
    fn role_serializes_lowercase() {
        let api = Message::new(Role::System, "rules").to_api_message();
        let value = serde_json::to_value(&api).unwrap();
        assert_eq!(value, json!({"role": "system", "content": "rules"}));
    }
}
