use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),

    #[error("{provider} rejected input of {chars} chars: context length exceeded")]
    ContextLength { provider: String, chars: usize },

    #[error("boost factor for {drawing_type} must be positive and finite, got {factor}")]
    InvalidBoost { drawing_type: String, factor: f64 },
}

impl SearchError {
    pub fn is_context_length(&self) -> bool {
        matches!(self, SearchError::ContextLength { .. })
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
