use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use serde::Deserialize;
use uuid::Uuid;

use crate::dispatch::{DispatchError, DispatchRequest, RunLauncher, ShuttingDown};
use crate::engine::Engine;
use crate::import::{ImportError, RawSubscriberRecord};
use crate::routes::{error_chain_fmt, json_error, OwnerId};

#[derive(Deserialize, Debug)]
pub struct ImportSubscribersBody {
    pub subscribers: Vec<RawSubscriberRecord>,
}

#[tracing::instrument(
    name = "Importing subscribers into a newsletter type",
    skip(body, engine, owner),
    fields(
        owner_id = %owner.0,
        newsletter_type_id = %path,
        rows = body.subscribers.len()
    )
)]
pub async fn handle_import_subscribers(
    path: web::Path<Uuid>,
    owner: OwnerId,
    body: web::Json<ImportSubscribersBody>,
    engine: web::Data<Engine>,
) -> Result<HttpResponse, ImportSubscribersError> {
    let outcome = engine
        .import_subscribers(owner.0, path.into_inner(), &body.subscribers)
        .await?;

    Ok(HttpResponse::Ok().json(outcome))
}

/// Starts a run and waits for its summary. The run itself is a detached task on the main
/// runtime, so neither a client that goes away nor a stopping worker cuts SMTP transactions
/// short.
#[tracing::instrument(
    name = "Dispatching a newsletter to its subscribers",
    skip(body, engine, runs, owner),
    fields(
        owner_id = %owner.0,
        newsletter_type_id = %path,
        subject = %body.subject
    )
)]
pub async fn handle_dispatch_newsletter(
    path: web::Path<Uuid>,
    owner: OwnerId,
    body: web::Json<DispatchRequest>,
    engine: web::Data<Engine>,
    runs: web::Data<RunLauncher>,
) -> Result<HttpResponse, DispatchNewsletterError> {
    let engine = engine.into_inner();
    let owner_id = owner.0;
    let newsletter_type_id = path.into_inner();
    let request = body.into_inner();

    let run = runs.launch(move |cancel| async move {
        engine
            .dispatch(owner_id, newsletter_type_id, request, cancel)
            .await
    })?;
    let summary = run.await.map_err(DispatchNewsletterError::Aborted)??;

    Ok(HttpResponse::Ok().json(summary))
}

#[derive(thiserror::Error)]
pub enum ImportSubscribersError {
    #[error(transparent)]
    Import(#[from] ImportError),
}

impl std::fmt::Debug for ImportSubscribersError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for ImportSubscribersError {
    fn status_code(&self) -> StatusCode {
        match self {
            ImportSubscribersError::Import(ImportError::UnknownNewsletterType(_)) => {
                StatusCode::NOT_FOUND
            }
            ImportSubscribersError::Import(ImportError::BatchRolledBack { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ImportSubscribersError::Import(ImportError::Repository(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        json_error(self.status_code(), self.to_string())
    }
}

#[derive(thiserror::Error)]
pub enum DispatchNewsletterError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    ShuttingDown(#[from] ShuttingDown),
    #[error("The dispatch run ended unexpectedly.")]
    Aborted(#[source] tokio::task::JoinError),
}

impl std::fmt::Debug for DispatchNewsletterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for DispatchNewsletterError {
    fn status_code(&self) -> StatusCode {
        match self {
            DispatchNewsletterError::Dispatch(DispatchError::InvalidMessage(_)) => {
                StatusCode::BAD_REQUEST
            }
            DispatchNewsletterError::Dispatch(DispatchError::NewsletterTypeUnavailable(_)) => {
                StatusCode::NOT_FOUND
            }
            DispatchNewsletterError::Dispatch(DispatchError::MissingEmailSettings(_))
            | DispatchNewsletterError::Dispatch(DispatchError::InvalidEmailSettings(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DispatchNewsletterError::Dispatch(DispatchError::Selection(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DispatchNewsletterError::ShuttingDown(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchNewsletterError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        json_error(self.status_code(), self.to_string())
    }
}
