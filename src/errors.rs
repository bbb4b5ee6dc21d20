use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Exchange API error: {0}")]
    Api(String),

    #[error("Unexpected data from exchange: {0}")]
    UnexpectedData(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum RateError {
    #[error("funding period must be positive, got {0}h")]
    InvalidPeriod(f64),

    #[error("funding rate must be finite, got {0}")]
    NonFiniteRate(f64),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid store url: {0}")]
    InvalidUrl(String),

    #[error("store payload error: {0}")]
    Parse(#[from] serde_json::Error),
}
