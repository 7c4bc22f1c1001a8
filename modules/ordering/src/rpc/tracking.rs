use crate::entities::order::{FulfillmentType, GeoPoint, OrderStatus, StatusHistoryEntry};
use crate::protocol::TrackingSnapshot;
use crate::rpc::AppState;
use crate::rpc::error::{ApiError, ApiResponse};
use crate::rpc::middleware::CurrentActor;
use crate::services::intake::CreateOrder;
use crate::services::status_machine::TransitionOutcome;
use crate::store::FulfillmentStore;
use axum::Json;
use axum::extract::{Path, State};
use framework::processor::Processor;
use uuid::Uuid;

pub async fn track_order<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TrackingSnapshot>>, ApiError> {
    let snapshot = state.services.tracking.snapshot(order_id, actor).await?;
    Ok(ApiResponse::ok(snapshot))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub fulfillment_type: FulfillmentType,
    pub delivery_address: Option<GeoPoint>,
    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub pickup_verification_code: Option<String>,
}

pub async fn create_order<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<CreatedOrder>>, ApiError> {
    let order = state
        .services
        .intake
        .process(CreateOrder {
            user_id: actor.id,
            fulfillment_type: request.fulfillment_type,
            delivery_address: request.delivery_address,
            pickup_location: request.pickup_location,
            pickup_instructions: request.pickup_instructions,
        })
        .await?;
    Ok(ApiResponse::ok(CreatedOrder {
        order_id: order.id,
        status: order.status,
        pickup_verification_code: order.pickup_verification_code,
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
    pub note: Option<String>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    /// `false` when the order already had the requested status
    pub changed: bool,
}

pub async fn update_status<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Path(order_id): Path<Uuid>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<ApiResponse<StatusResponse>>, ApiError> {
    let outcome = state
        .services
        .tracking
        .request_transition(order_id, request.status, actor, request.note)
        .await?;
    let changed = matches!(outcome, TransitionOutcome::Applied(_));
    let order = outcome.into_order();
    Ok(ApiResponse::ok(StatusResponse {
        order_id: order.id,
        status: order.status,
        status_history: order.status_history.0,
        changed,
    }))
}
