use serde_json::{Value, json};

use crate::message::{Choice, Message, choice_message, response_header};

/// Token accounting reported by the completion API. All-zero means "absent".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_api_usage(&self) -> Value {
        json!({
            "prompt_tokens": self.prompt_tokens,
            "completion_tokens": self.completion_tokens,
            "total_tokens": self.total_tokens,
        })
    }

    pub fn from_api_usage(payload: &Value) -> Option<Self> {
        let payload = payload.as_object()?;
        Some(Self {
            prompt_tokens: payload.get("prompt_tokens")?.as_u64()?,
            completion_tokens: payload.get("completion_tokens")?.as_u64()?,
            total_tokens: payload.get("total_tokens")?.as_u64()?,
        })
    }
}

/// One completion API response. `choices` is empty only for the
/// not-yet-populated default; the UI layer only ever consults choice 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub choices: Vec<Choice>,
    pub created: i64,
    pub id: String,
    pub model: String,
    pub object_kind: String,
    pub usage: Usage,
}

impl Response {
    pub fn is_default(&self) -> bool {
        self.choices.is_empty()
            && self.created == 0
            && self.id.is_empty()
            && self.model.is_empty()
            && self.object_kind.is_empty()
            && self.usage.is_default()
    }

    /// The first choice collapsed into a plain message, if any.
    pub fn first_message(&self) -> Option<Message> {
        self.choices.first().map(Choice::to_message)
    }

    /// Serializes back to API shape. Choices are emitted in the parseable
    /// `{"message": {role, content}}` form; usage only when non-zero.
    pub fn to_api_response(&self) -> Value {
        let choices = self
            .choices
            .iter()
            .map(|choice| json!({"message": choice.to_api_message()}))
            .collect::<Vec<_>>();
        let mut payload = json!({
            "choices": choices,
            "created": self.created,
            "id": self.id,
            "model": self.model,
            "object": self.object_kind,
        });
        if !self.usage.is_default() {
            payload["usage"] = self.usage.to_api_usage();
        }
        payload
    }

    /// Parses one complete (or chunk) response payload.
    ///
    /// Required fields: non-empty `choices`, `id`, `created`, `model` and
    /// `object`. A present-but-mistyped `usage` fails the parse; a present
    /// usage with bad fields degrades to the absent sentinel.
    pub fn from_api_response(payload: &Value) -> Option<Self> {
        let (id, created, choices) = response_header(payload)?;
        let object = payload.as_object()?;
        let model = object.get("model")?.as_str()?.to_string();
        let object_kind = object.get("object")?.as_str()?.to_string();
        let usage = match object.get("usage") {
            Some(usage) if !usage.is_null() => {
                if !usage.is_object() {
                    return None;
                }
                Usage::from_api_usage(usage).unwrap_or_default()
            }
            _ => Usage::default(),
        };

        let mut parsed = Vec::with_capacity(choices.len());
        for choice in choices {
            parsed.push(choice_message(choice, &id, created)?);
        }

        Some(Self {
            choices: parsed,
            created,
            id,
            model,
            object_kind,
            usage,
        })
    }

    /// Folds an ordered batch of streamed chunk payloads into one response.
    ///
    /// The header comes from the first chunk; the deltas collapse into a
    /// single complete first choice.
    pub fn from_api_responses(payloads: &[Value]) -> Option<Self> {
        match payloads {
            [] => None,
            [single] => Self::from_api_response(single),
            [first, ..] => {
                let mut response = Self::from_api_response(first)?;
                let streaming = crate::message::StreamingMessage::from_api_chunks(payloads)?;
                response.choices = vec![Choice::Message(streaming.to_message())];
                Some(response)
            }
        }
    }
}
