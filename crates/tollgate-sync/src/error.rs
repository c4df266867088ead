use http::StatusCode;
use tollgate_core::HttpError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// An outbound event could not be serialized
    #[error("failed to encode sync event: {0}")]
    Encode(#[source] serde_json::Error),

    /// A client frame was not a known message
    #[error("malformed client message: {0}")]
    Decode(#[source] serde_json::Error),
}

impl HttpError for SyncError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Decode(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Encode(_) => "SERVER",
            Self::Decode(_) => "BAD_REQUEST",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Encode(_) => "failed to deliver sync event".to_owned(),
            Self::Decode(_) => self.to_string(),
        }
    }
}
