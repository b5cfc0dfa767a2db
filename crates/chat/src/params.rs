use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use snafu::ensure;

use crate::error::{
    EmptyModelSnafu, FrequencyPenaltyOutOfRangeSnafu, NOutOfRangeSnafu, ParamsResult,
    PresencePenaltyOutOfRangeSnafu, TemperatureOutOfRangeSnafu, TooManyStopSequencesSnafu,
    TopPOutOfRangeSnafu, UserTooLongSnafu,
};
use crate::message::Message;

pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_MAX_TOKENS: u64 = 2048;
pub const DEFAULT_TOP_P: f64 = 1.0;
pub const DEFAULT_N: u8 = 1;
pub const DEFAULT_FREQUENCY_PENALTY: f64 = 0.0;
pub const DEFAULT_PRESENCE_PENALTY: f64 = 0.0;
pub const MAX_STOP_SEQUENCES: usize = 4;
pub const MAX_USER_LENGTH: usize = 256;

/// Turns words into provider token ids for logit-bias overrides.
///
/// Injected collaborator: the core carries no tokenizer of its own.
pub trait Tokenizer {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> String;
}

/// A group of token ids sharing one bias weight.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub tokens: Vec<u32>,
    pub bias: f64,
}

impl TokenSet {
    pub fn new(tokens: Vec<u32>, bias: f64) -> Self {
        Self { tokens, bias }
    }
}

/// Validated parameter bundle for one completion request.
///
/// Optional sampling controls distinguish "unset, default applies" from
/// "explicitly set to the default value"; ranges are enforced when a value
/// is assigned, not when the request is built.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    api_key: String,
    model: String,
    messages: Vec<Message>,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    top_p: Option<f64>,
    n: Option<u8>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
    stop: Option<Vec<String>>,
    stream: bool,
    logit_bias: Option<Vec<TokenSet>>,
    user: Option<String>,
}

impl CompletionParams {
    pub fn new(model: impl Into<String>) -> ParamsResult<Self> {
        let model = model.into();
        ensure!(!model.trim().is_empty(), EmptyModelSnafu { stage: "new" });
        Ok(Self {
            api_key: String::new(),
            model,
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            n: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            stream: true,
            logit_bias: None,
            user: None,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) -> ParamsResult<()> {
        let model = model.into();
        ensure!(
            !model.trim().is_empty(),
            EmptyModelSnafu { stage: "set-model" }
        );
        self.model = model;
        Ok(())
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) {
        self.api_key = api_key.into();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Effective temperature; 1.0 when unset.
    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn has_temperature(&self) -> bool {
        self.temperature.is_some()
    }

    pub fn set_temperature(&mut self, value: Option<f64>) -> ParamsResult<()> {
        if let Some(value) = value {
            ensure!(
                (0.0..=2.0).contains(&value),
                TemperatureOutOfRangeSnafu {
                    stage: "set-temperature",
                    value,
                }
            );
        }
        self.temperature = value;
        Ok(())
    }

    /// Effective completion budget; 2048 when unset.
    pub fn max_tokens(&self) -> u64 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn has_max_tokens(&self) -> bool {
        self.max_tokens.is_some()
    }

    pub fn set_max_tokens(&mut self, value: Option<u64>) {
        self.max_tokens = value;
    }

    /// Effective nucleus-sampling mass; 1.0 when unset.
    pub fn top_p(&self) -> f64 {
        self.top_p.unwrap_or(DEFAULT_TOP_P)
    }

    pub fn has_top_p(&self) -> bool {
        self.top_p.is_some()
    }

    pub fn set_top_p(&mut self, value: Option<f64>) -> ParamsResult<()> {
        if let Some(value) = value {
            ensure!(
                (0.0..=1.0).contains(&value),
                TopPOutOfRangeSnafu {
                    stage: "set-top-p",
                    value,
                }
            );
        }
        self.top_p = value;
        Ok(())
    }

    /// Effective choice count; 1 when unset. Only choice 0 is ever displayed.
    pub fn n(&self) -> u8 {
        self.n.unwrap_or(DEFAULT_N)
    }

    pub fn has_n(&self) -> bool {
        self.n.is_some()
    }

    pub fn set_n(&mut self, value: Option<u8>) -> ParamsResult<()> {
        if let Some(value) = value {
            ensure!(
                (1..=10).contains(&value),
                NOutOfRangeSnafu {
                    stage: "set-n",
                    value,
                }
            );
        }
        self.n = value;
        Ok(())
    }

    pub fn frequency_penalty(&self) -> f64 {
        self.frequency_penalty.unwrap_or(DEFAULT_FREQUENCY_PENALTY)
    }

    pub fn has_frequency_penalty(&self) -> bool {
        self.frequency_penalty.is_some()
    }

    pub fn set_frequency_penalty(&mut self, value: Option<f64>) -> ParamsResult<()> {
        if let Some(value) = value {
            ensure!(
                (-2.0..=2.0).contains(&value),
                FrequencyPenaltyOutOfRangeSnafu {
                    stage: "set-frequency-penalty",
                    value,
                }
            );
        }
        self.frequency_penalty = value;
        Ok(())
    }

    pub fn presence_penalty(&self) -> f64 {
        self.presence_penalty.unwrap_or(DEFAULT_PRESENCE_PENALTY)
    }

    pub fn has_presence_penalty(&self) -> bool {
        self.presence_penalty.is_some()
    }

    pub fn set_presence_penalty(&mut self, value: Option<f64>) -> ParamsResult<()> {
        if let Some(value) = value {
            ensure!(
                (-2.0..=2.0).contains(&value),
                PresencePenaltyOutOfRangeSnafu {
                    stage: "set-presence-penalty",
                    value,
                }
            );
        }
        self.presence_penalty = value;
        Ok(())
    }

    /// Stop sequences; empty when unset.
    pub fn stop(&self) -> &[String] {
        self.stop.as_deref().unwrap_or(&[])
    }

    pub fn has_stop(&self) -> bool {
        self.stop.is_some()
    }

    pub fn set_stop(&mut self, value: Option<Vec<String>>) -> ParamsResult<()> {
        if let Some(sequences) = &value {
            ensure!(
                sequences.len() <= MAX_STOP_SEQUENCES,
                TooManyStopSequencesSnafu {
                    stage: "set-stop",
                    count: sequences.len(),
                }
            );
        }
        self.stop = value;
        Ok(())
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.stream = stream;
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn has_user(&self) -> bool {
        self.user.is_some()
    }

    pub fn set_user(&mut self, value: Option<String>) -> ParamsResult<()> {
        if let Some(user) = &value {
            ensure!(
                user.chars().count() <= MAX_USER_LENGTH,
                UserTooLongSnafu {
                    stage: "set-user",
                    length: user.chars().count(),
                }
            );
        }
        self.user = value;
        Ok(())
    }

    pub fn logit_bias(&self) -> Option<&[TokenSet]> {
        self.logit_bias.as_deref()
    }

    pub fn has_logit_bias(&self) -> bool {
        self.logit_bias.is_some()
    }

    pub fn set_logit_bias(&mut self, value: Option<Vec<TokenSet>>) {
        self.logit_bias = value;
    }

    /// Sets the logit bias from a word → bias map.
    ///
    /// Without a tokenizer this is a no-op, not an error: bias-by-word is a
    /// convenience layered on an optional collaborator.
    pub fn set_logit_bias_words(
        &mut self,
        words: &BTreeMap<String, f64>,
        tokenizer: Option<&dyn Tokenizer>,
    ) {
        let Some(tokenizer) = tokenizer else {
            return;
        };
        let sets = words
            .iter()
            .map(|(word, bias)| TokenSet::new(tokenizer.encode(word), *bias))
            .collect();
        self.logit_bias = Some(sets);
    }

    /// Reads the logit bias back as a word → bias map; empty without a
    /// tokenizer.
    pub fn logit_bias_words(&self, tokenizer: Option<&dyn Tokenizer>) -> BTreeMap<String, f64> {
        let (Some(tokenizer), Some(sets)) = (tokenizer, &self.logit_bias) else {
            return BTreeMap::new();
        };
        sets.iter()
            .map(|set| (tokenizer.decode(&set.tokens), set.bias))
            .collect()
    }

    /// Builds the request body. Only explicitly set controls are emitted;
    /// `stream` only when true; token sets merge into one id → bias map
    /// (later sets win on collision).
    pub fn to_request_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model));
        let messages = self
            .messages
            .iter()
            .map(Message::to_api_message)
            .collect::<Vec<_>>();
        payload.insert("messages".to_string(), json!(messages));
        if let Some(temperature) = self.temperature {
            payload.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = self.max_tokens {
            payload.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if let Some(top_p) = self.top_p {
            payload.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(n) = self.n {
            payload.insert("n".to_string(), json!(n));
        }
        if let Some(frequency_penalty) = self.frequency_penalty {
            payload.insert("frequency_penalty".to_string(), json!(frequency_penalty));
        }
        if let Some(presence_penalty) = self.presence_penalty {
            payload.insert("presence_penalty".to_string(), json!(presence_penalty));
        }
        if let Some(stop) = &self.stop {
            payload.insert("stop".to_string(), json!(stop));
        }
        if self.stream {
            payload.insert("stream".to_string(), json!(true));
        }
        if let Some(sets) = &self.logit_bias {
            let mut merged = Map::new();
            for set in sets {
                for token in &set.tokens {
                    merged.insert(token.to_string(), json!(set.bias));
                }
            }
            payload.insert("logit_bias".to_string(), Value::Object(merged));
        }
        if let Some(user) = &self.user {
            payload.insert("user".to_string(), json!(user));
        }
        Value::Object(payload)
    }
}
