//! Session glue: the single-flight submission pipeline that connects the
//! conversation tree to a completion provider, and persisted user settings.

pub mod pipeline;
pub mod settings;

pub use pipeline::{
    PipelineError, PipelineResult, SUBMISSION_TIMEOUT, SubmissionEvent, SubmissionHandle,
    SubmissionPipeline, apply_response,
};
pub use settings::{
    KEY_API_KEY, KEY_BASE_URL, KEY_MODEL, KEY_STREAM, SettingsError, SettingsResult, SettingsStore,
};
