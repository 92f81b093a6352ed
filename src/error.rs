use thiserror::Error;

pub type Result<T> = std::result::Result<T, MeetprepError>;

#[derive(Debug, Error)]
pub enum MeetprepError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    /// Rate limits, 5xx responses and transport failures; safe to retry.
    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid input: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("mail delivery failed: {0}")]
    Mail(String),

    #[error("contacts API error: {0}")]
    Contacts(String),

    #[error("rate limit exceeded for `{0}`")]
    RateLimited(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl MeetprepError {
    pub(crate) fn tool(name: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        MeetprepError::ToolInvocation {
            name: name.into(),
            source: Box::new(source),
        }
    }
}
