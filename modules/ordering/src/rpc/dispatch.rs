use crate::entities::driver::Driver;
use crate::entities::order::{
    ActorRole, CurrentLocation, DeliveryDetails, GeoPoint, ListDriverOrders, Order, OrderStatus,
};
use crate::error::FulfillmentError;
use crate::rpc::error::{ApiError, ApiResponse};
use crate::rpc::middleware::CurrentActor;
use crate::rpc::{AppState, require_staff};
use crate::services::dispatch::{AvailableDriver, Dispatch, ListAvailableDrivers, SetPresence};
use crate::store::FulfillmentStore;
use axum::Json;
use axum::extract::{Query, State};
use framework::processor::Processor;
use uuid::Uuid;

pub async fn available_drivers<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<ApiResponse<Vec<AvailableDriver>>>, ApiError> {
    require_staff(&actor)?;
    let drivers = state.services.dispatch.process(ListAvailableDrivers).await?;
    Ok(ApiResponse::ok(drivers))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub delivery_details: Option<DeliveryDetails>,
}

pub async fn dispatch_order<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<ApiResponse<DispatchResponse>>, ApiError> {
    require_staff(&actor)?;
    let order = state
        .services
        .dispatch
        .process(Dispatch {
            order_id: request.order_id,
            driver_id: request.driver_id,
            actor,
        })
        .await?;
    Ok(ApiResponse::ok(DispatchResponse {
        order_id: order.id,
        status: order.status,
        delivery_details: order.delivery().cloned(),
    }))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub online: bool,
    /// Staff may toggle any driver; drivers always toggle themselves.
    pub driver_id: Option<Uuid>,
}

pub async fn set_presence<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Json(request): Json<PresenceRequest>,
) -> Result<Json<ApiResponse<Driver>>, ApiError> {
    let driver_id = match request.driver_id {
        Some(driver_id) if driver_id != actor.id => {
            require_staff(&actor)?;
            driver_id
        }
        _ => actor.id,
    };
    let driver = state
        .services
        .dispatch
        .process(SetPresence {
            driver_id,
            online: request.online,
        })
        .await?;
    Ok(ApiResponse::ok(driver))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverOrdersQuery {
    /// `true` for the orders the driver still carries, `false` for the finished history.
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Staff may look at any driver; drivers always see their own orders.
    pub driver_id: Option<Uuid>,
}

fn default_active() -> bool {
    true
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    10
}

/// A driver's order as shown in the delivery dashboard.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverOrderView {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub delivery_address: Option<GeoPoint>,
    pub current_location: Option<CurrentLocation>,
    pub estimated_delivery_time: Option<i64>,
    /// unix millis
    pub updated_at: i64,
}

impl From<Order> for DriverOrderView {
    fn from(order: Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            delivery_address: order.destination(),
            current_location: order.location(),
            estimated_delivery_time: order
                .delivery()
                .and_then(|details| details.estimated_delivery_time),
            updated_at: framework::unix_millis(order.updated_at),
        }
    }
}

pub async fn driver_orders<S: FulfillmentStore + Clone>(
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<DriverOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<DriverOrderView>>>, ApiError> {
    let driver_id = match query.driver_id {
        Some(driver_id) if driver_id != actor.id => {
            require_staff(&actor)?;
            driver_id
        }
        _ if actor.role == ActorRole::Driver || actor.is_staff() => actor.id,
        _ => return Err(FulfillmentError::Unauthorized.into()),
    };
    if query.page < 1 {
        return Err(FulfillmentError::InvalidInput("page out of range").into());
    }
    let orders = state
        .services
        .dispatch
        .process(ListDriverOrders {
            driver_id,
            active: query.active,
            limit: query.limit,
            offset: (query.page - 1).saturating_mul(query.limit),
        })
        .await?;
    Ok(ApiResponse::ok(orders.into_iter().map(Into::into).collect()))
}
