use thiserror::Error;

/// Maximum number of response-body characters kept in [`Error::Api`].
pub const BODY_SNIPPET_LEN: usize = 500;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Decomposition error: {0}")]
    Decomposition(String),

    #[error("Task not found: #{0}")]
    TaskNotFound(u64),

    #[error("Publish failed after {attempts} attempts: {message}")]
    Publish { attempts: u32, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl Error {
    /// Build an [`Error::Api`] keeping only a prefix of the response body.
    pub fn api(status: u16, body: &str) -> Self {
        Error::Api {
            status,
            body: body.chars().take(BODY_SNIPPET_LEN).collect(),
        }
    }

    /// HTTP status carried by this error, if it came from an upstream response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
