use crate::models::ConvertKitError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ConvertKit responded with status {status}{}", detail(.error))]
    Upstream {
        status: u16,
        error: Option<ConvertKitError>,
    },
    #[error("Unexpected response shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("Cannot build the HTTP client: {0}")]
    Build(reqwest::Error),
}

fn detail(error: &Option<ConvertKitError>) -> String {
    match error {
        Some(e) => format!(" ({e})"),
        None => String::new(),
    }
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
