use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Insufficient credits")]
    InsufficientCredits,

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid base URL: {0}")]
    BaseUrl(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
