use thiserror::Error;

/// Every failure the synchronization layer reports.
///
/// `Clone` because one in-flight request's outcome is handed to every caller
/// sharing it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// 401, or a protected call made without a session. The session has
    /// already been logged out by the time a caller sees this.
    #[error("{0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// No response at all. Never retried here.
    #[error("network error: {0}")]
    Network(String),

    /// Rejected client-side before any request was made.
    #[error("{0}")]
    Validation(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    /// The request belonged to a session that has since ended.
    #[error("request outlived its session")]
    SessionChanged,

    #[error("token storage error: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn not_authenticated() -> Self {
        Self::Auth("not authenticated".into())
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid value '{value}' for {var}")]
    InvalidValue { var: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
