use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::delivery::DeliveryState;
use crate::engine::Engine;
use crate::pagination::{PageRequest, DEFAULT_PAGE_SIZE};
use crate::routes::{OwnerId, RecordRequestError};
use crate::storage::DeliveryFilter;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryListQuery {
    pub page_no: Option<u64>,
    pub page_size: Option<u64>,
    pub status: Option<String>,
    pub newsletter_type_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
}

#[tracing::instrument(name = "Listing deliveries", skip(engine, owner), fields(owner_id = %owner.0))]
pub async fn handle_list_deliveries(
    query: web::Query<DeliveryListQuery>,
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
        .map(DeliveryState::parse)
        .transpose()
        .map_err(RecordRequestError::Validation)?;
    let filter = DeliveryFilter {
        owner_id: Some(owner.0),
        newsletter_type_id: query.newsletter_type_id,
        run_id: query.run_id,
        status,
    };

    let page = engine.list_deliveries(&filter, request).await?;

    Ok(HttpResponse::Ok().json(page))
}

#[tracing::instrument(
    name = "Marking a delivery as seen",
    skip(engine, owner),
    fields(owner_id = %owner.0, delivery_id = %path)
)]
pub async fn handle_mark_delivery_seen(
    path: web::Path<Uuid>,
    owner: OwnerId,
    engine: web::Data<Engine>,
) -> Result<HttpResponse, RecordRequestError> {
    engine.mark_delivery_seen(owner.0, path.into_inner()).await?;

    Ok(HttpResponse::NoContent().finish())
}
