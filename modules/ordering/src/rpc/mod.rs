//! HTTP and WebSocket surface.

use crate::entities::order::Actor;
use crate::error::FulfillmentError;
use crate::rpc::error::ApiError;
use crate::rpc::middleware::ActorLayer;
use crate::services::FulfillmentServices;
use crate::store::FulfillmentStore;
use axum::Router;
use axum::routing::{get, post};

pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod pickup;
pub mod socket;
pub mod tracking;

#[derive(Clone)]
pub struct AppState<S> {
    pub services: FulfillmentServices<S>,
}

impl<S> AppState<S> {
    pub fn new(services: FulfillmentServices<S>) -> Self {
        Self { services }
    }
}

pub(crate) fn require_staff(actor: &Actor) -> Result<(), ApiError> {
    if actor.is_staff() {
        Ok(())
    } else {
        Err(FulfillmentError::Unauthorized.into())
    }
}

pub fn router<S: FulfillmentStore + Clone>(state: AppState<S>) -> Router {
    Router::new()
        .route("/order", post(tracking::create_order::<S>))
        .route("/order/track/{order_id}", get(tracking::track_order::<S>))
        .route("/order/{order_id}/status", post(tracking::update_status::<S>))
        .route(
            "/delivery/drivers/available",
            get(dispatch::available_drivers::<S>),
        )
        .route("/delivery/dispatch", post(dispatch::dispatch_order::<S>))
        .route(
            "/delivery/drivers/presence",
            post(dispatch::set_presence::<S>),
        )
        .route("/delivery/orders", get(dispatch::driver_orders::<S>))
        .route("/pickup/pending", get(pickup::pending_pickups::<S>))
        .route("/pickup/verify", post(pickup::verify_code::<S>))
        .route("/pickup/complete", post(pickup::complete_pickup::<S>))
        .route("/ws", get(socket::tracking_socket::<S>))
        .layer(ActorLayer)
        .with_state(state)
}
