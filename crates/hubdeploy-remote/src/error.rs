use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("encode request: {0}")]
    Encode(String),

    #[error("decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("remote rejected request (code {code}): {message}")]
    Rejected { code: i32, message: String },
}

impl RemoteError {
    /// The remote answered with 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { status: 404, .. })
    }
}
