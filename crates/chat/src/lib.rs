//! Branching conversation model for an LLM chat client.
//!
//! The tree is the load-bearing piece: every other layer (submission
//! pipeline, UI state sync, persistence) navigates or mutates it through
//! the operations here.

pub mod error;
/// Chat-turn value types and payload parsing.
pub mod message;
pub mod params;
pub mod response;
/// The navigable conversation tree.
pub mod tree;

pub use error::{ParamsError, ParamsResult};
pub use message::{ApiMessage, Choice, DEFAULT_CREATED, Message, Role, StreamingMessage, default_id};
pub use params::{CompletionParams, TokenSet, Tokenizer};
pub use response::{Response, Usage};
pub use tree::{Chat, ChatEntry, EntryId};
