use http::StatusCode;
use tollgate_core::HttpError;

use crate::repository::RepositoryError;

/// Errors raised while admitting or charging a request
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Account storage failed
    #[error("account repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Calendar arithmetic overflowed
    #[error("time computation failed: {0}")]
    Time(#[from] jiff::Error),
}

impl HttpError for LedgerError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_type(&self) -> &str {
        "SERVER"
    }

    fn client_message(&self) -> String {
        "account ledger unavailable".to_owned()
    }
}
