use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("spawn error: {0}")]
    Spawn(String),
    #[error("pattern error: {0}")]
    Pattern(String),
    #[error("timed out after {seconds}s waiting for [{expected}]; last output: {tail:?}")]
    Timeout {
        expected: String,
        seconds: u64,
        tail: String,
    },
    #[error("end of stream while waiting for [{expected}]; last output: {tail:?}")]
    UnexpectedEof { expected: String, tail: String },
    #[error("session protocol violation: {0}")]
    Protocol(String),
    #[error("scenario {scenario} failed: {message}")]
    ScenarioFailed { scenario: String, message: String },
}

impl DriverError {
    /// True for failures to open the transcript or launch the child; the
    /// facade reports these as messages instead of propagating them.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Spawn(_))
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Io(reason) | Self::Spawn(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}
