use crate::entities::order::{ListPendingPickups, Order, OrderStatus};
use crate::rpc::error::{ApiError, ApiResponse};
use crate::rpc::middleware::CurrentActor;
use crate::rpc::{AppState, require_staff};
use crate::services::pickup_verification::{CompletePickup, VerifyPickupCode};
use crate::store::FulfillmentStore;
use axum::Json;
use axum::extract::State;
use framework::processor::Processor;
use uuid::Uuid;

/// What staff see at the counter before handing an order over.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupOrderView {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
    pub pickup_verified_by: Option<Uuid>,
    /// unix millis
    pub pickup_verified_at: Option<i64>,
}

impl From<Order> for PickupOrderView {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            pickup_location: order.pickup_location,
            pickup_instructions: order.pickup_instructions,
            pickup_verified_by: order.pickup_verified_by,
            pickup_verified_at: order.pickup_verified_at.map(framework::unix_millis),
        }
    }
}

/// Pickup orders staff still have to hand over, oldest first.
pub async fn pending_pickups<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<ApiResponse<Vec<PickupOrderView>>>, ApiError> {
    require_staff(&actor)?;
    let orders = state.services.pickup.process(ListPendingPickups).await?;
    Ok(ApiResponse::ok(orders.into_iter().map(Into::into).collect()))
}

#[derive(Debug, serde::Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

pub async fn verify_code<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<PickupOrderView>>, ApiError> {
    require_staff(&actor)?;
    let order = state
        .services
        .pickup
        .process(VerifyPickupCode { code: request.code })
        .await?;
    Ok(ApiResponse::ok(order.into()))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub order_id: Uuid,
    pub code: String,
}

pub async fn complete_pickup<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<ApiResponse<PickupOrderView>>, ApiError> {
    let order = state
        .services
        .pickup
        .process(CompletePickup {
            order_id: request.order_id,
            code: request.code,
            staff: actor,
        })
        .await?;
    Ok(ApiResponse::ok(order.into()))
}
