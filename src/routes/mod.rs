use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::pagination::PaginationError;
use crate::storage::RepositoryError;

mod deliveries;
mod health_check;
mod newsletters;
mod owner;
mod subscribers;

pub use deliveries::*;
pub use health_check::*;
pub use newsletters::*;
pub use owner::*;
pub use subscribers::*;

/// Writes the error followed by every error in its `source()` chain.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}

fn json_error(status: StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({ "message": message }))
}

/// Failure of the list, update and delete endpoints over stored records.
#[derive(thiserror::Error)]
pub enum RecordRequestError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error("Record {0} was not found.")]
    NotFound(uuid::Uuid),
    #[error("Failed to access the stored records.")]
    Repository(#[source] RepositoryError),
}

impl From<RepositoryError> for RecordRequestError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => RecordRequestError::NotFound(id),
            other => RecordRequestError::Repository(other),
        }
    }
}

impl std::fmt::Debug for RecordRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for RecordRequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            RecordRequestError::Validation(_) => StatusCode::BAD_REQUEST,
            RecordRequestError::Pagination(_) => StatusCode::BAD_REQUEST,
            RecordRequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RecordRequestError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        json_error(self.status_code(), self.to_string())
    }
}
