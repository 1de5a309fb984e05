use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::subscriber_status::SubscriberStatus;
use crate::engine::Engine;
use crate::pagination::{PageRequest, DEFAULT_PAGE_SIZE};
use crate::routes::{OwnerId, RecordRequestError};
use crate::storage::SubscriberFilter;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberListQuery {
    pub page_no: Option<u64>,
    pub page_size: Option<u64>,
    pub status: Option<String>,
    pub newsletter_type_id: Option<Uuid>,
}

#[derive(Deserialize, Debug)]
pub struct SubscriberStatusBody {
    pub status: String,
}

#[tracing::instrument(name = "Listing subscribers", skip(engine, owner), fields(owner_id = %owner.0))]
pub async fn handle_list_subscribers(
    query: web::Query<SubscriberListQuery>,
    owner: OwnerId,
    engine: web::Data<Engine>,
) -> Result<HttpResponse, RecordRequestError> {
    let query = query.into_inner();
    let request = PageRequest::new(
        query.page_no.unwrap_or(1),
        query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    )?;
    let status = query
        .status
        .map(SubscriberStatus::parse)
        .transpose()
        .map_err(RecordRequestError::Validation)?;
    let filter = SubscriberFilter {
        owner_id: Some(owner.0),
        newsletter_type_id: query.newsletter_type_id,
        status,
    };

    let page = engine.list_subscribers(&filter, request).await?;

    Ok(HttpResponse::Ok().json(page))
}

#[tracing::instrument(
    name = "Changing a subscriber status",
    skip(engine, owner),
    fields(owner_id = %owner.0, subscriber_id = %path)
)]
pub async fn handle_update_subscriber_status(
    path: web::Path<Uuid>,
    owner: OwnerId,
    body: web::Json<SubscriberStatusBody>,
    engine: web::Data<Engine>,
) -> Result<HttpResponse, RecordRequestError> {
    let status = SubscriberStatus::parse(body.into_inner().status)
        .map_err(RecordRequestError::Validation)?;

    let subscriber = engine
        .set_subscriber_status(owner.0, path.into_inner(), status)
        .await?;

    Ok(HttpResponse::Ok().json(subscriber))
}

#[tracing::instrument(
    name = "Soft deleting a subscriber",
    skip(engine, owner),
    fields(owner_id = %owner.0, subscriber_id = %path)
)]
pub async fn handle_delete_subscriber(
    path: web::Path<Uuid>,
    owner: OwnerId,
    engine: web::Data<Engine>,
) -> Result<HttpResponse, RecordRequestError> {
    engine.delete_subscriber(owner.0, path.into_inner()).await?;

    Ok(HttpResponse::NoContent().finish())
}
