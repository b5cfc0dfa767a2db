use snafu::Snafu;

/// Validation failures raised at assignment time, never deferred to
/// submission.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParamsError {
    #[snafu(display("model must be a non-empty string"))]
    EmptyModel { stage: &'static str },
    #[snafu(display("temperature {value} is outside [0, 2]"))]
    TemperatureOutOfRange { stage: &'static str, value: f64 },
    #[snafu(display("top_p {value} is outside [0, 1]"))]
    TopPOutOfRange { stage: &'static str, value: f64 },
    #[snafu(display("n {value} is outside [1, 10]"))]
    NOutOfRange { stage: &'static str, value: u8 },
    #[snafu(display("frequency_penalty {value} is outside [-2, 2]"))]
    FrequencyPenaltyOutOfRange { stage: &'static str, value: f64 },
    #[snafu(display("presence_penalty {value} is outside [-2, 2]"))]
    PresencePenaltyOutOfRange { stage: &'static str, value: f64 },
    #[snafu(display("stop accepts at most 4 sequences, got {count}"))]
    TooManyStopSequences { stage: &'static str, count: usize },
    #[snafu(display("user identifier is limited to 256 characters, got {length}"))]
    UserTooLong { stage: &'static str, length: usize },
}

pub type ParamsResult<T> = Result<T, ParamsError>;
