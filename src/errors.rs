use thiserror::Error;

/// Failure of a single language-model call, classified where the transport
/// error is received so retry logic can match on the variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    /// Network trouble or a server-side failure; worth retrying.
    #[error("{0}")]
    Transient(String),

    /// Bad or missing credentials, or input the caller must fix.
    #[error("{0}")]
    FatalInput(String),

    /// The request or reply did not follow the expected protocol.
    #[error("{0}")]
    FatalProtocol(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return LlmError::Transient(e.to_string());
        }
        if let Some(status) = e.status() {
            return classify_status(status.as_u16(), e.to_string());
        }
        if e.is_decode() || e.is_body() {
            return LlmError::FatalProtocol(e.to_string());
        }
        LlmError::Transient(e.to_string())
    }
}

/// Maps an HTTP status returned by a provider onto the retry taxonomy.
pub fn classify_status(status: u16, message: String) -> LlmError {
    match status {
        401 | 403 => LlmError::FatalInput(message),
        408 | 429 => LlmError::Transient(message),
        s if s >= 500 => LlmError::Transient(message),
        _ => LlmError::FatalProtocol(message),
    }
}

#[derive(Debug, Error)]
pub enum WebClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    Llm(#[from] LlmError),

    #[error("Failed to complete query after {attempts} attempts. Please try again later.")]
    AttemptsExhausted { attempts: u32 },

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Unparsable action: {0}")]
    UnparsableAction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl serde::Serialize for WebClawError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type WebClawResult<T> = Result<T, WebClawError>;
