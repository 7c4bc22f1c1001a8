//! Messages exchanged over the tracking WebSocket and returned by the REST snapshot endpoint.
//!
//! Frames are JSON objects `{"event": "<name>", "data": {...}}`.

use crate::config::TrackingConfig;
use crate::entities::order::{
    CurrentLocation, DeliveryDetails, FulfillmentType, GeoPoint, Order, OrderStatus,
    StatusHistoryEntry,
};
use crate::utils::geo::{ArrivalEstimate, estimate_arrival};
use uuid::Uuid;

/// Everything a tracking view needs to render an order, as of one instant.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub order_id: Uuid,
    pub fulfillment_type: FulfillmentType,
    pub status: OrderStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    pub current_location: Option<CurrentLocation>,
    pub delivery_address: Option<GeoPoint>,
    pub delivery_details: Option<DeliveryDetails>,
    /// meters from the last known driver position to the destination
    pub distance: Option<f64>,
    /// unix millis
    pub eta: Option<i64>,
    pub duration_minutes: Option<f64>,
    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
    pub pickup_verification_code: Option<String>,
}

impl TrackingSnapshot {
    pub fn from_order(order: &Order, config: &TrackingConfig, now_millis: i64) -> Self {
        let estimate = arrival_for(order.location().map(|l| l.point()), order.destination(), config, now_millis);
        Self {
            order_id: order.id,
            fulfillment_type: order.fulfillment_type,
            status: order.status,
            status_history: order.history().to_vec(),
            current_location: order.location(),
            delivery_address: order.destination(),
            delivery_details: order.delivery().cloned(),
            distance: estimate.map(|e| e.distance_meters),
            eta: estimate.map(|e| e.arrives_at),
            duration_minutes: estimate.map(|e| e.duration_minutes),
            pickup_location: order.pickup_location.clone(),
            pickup_instructions: order.pickup_instructions.clone(),
            pickup_verification_code: order.pickup_verification_code.clone(),
        }
    }

    /// Folds a location broadcast into the snapshot so late joiners see the latest ping.
    /// Status only ever changes through [`apply_status`](Self::apply_status), so it always
    /// matches the last history entry.
    pub fn apply_location(&mut self, update: &LocationUpdate) {
        self.current_location = Some(update.location);
        self.distance = update.distance;
        self.eta = update.eta;
        self.duration_minutes = update.duration_minutes;
    }

    /// Folds a status broadcast in. Older histories than the one held are ignored.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> bool {
        if update.status_history.len() <= self.status_history.len() {
            return false;
        }
        self.status = update.status;
        self.status_history = update.status_history.clone();
        true
    }
}

pub fn arrival_for(
    from: Option<GeoPoint>,
    to: Option<GeoPoint>,
    config: &TrackingConfig,
    now_millis: i64,
) -> Option<ArrivalEstimate> {
    estimate_arrival(from?, to?, config.average_speed_kmh, now_millis)
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub order_id: Uuid,
    pub location: CurrentLocation,
    pub distance: Option<f64>,
    /// unix millis
    pub eta: Option<i64>,
    pub duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub status_history: Vec<StatusHistoryEntry>,
}

impl StatusUpdate {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            status_history: order.history().to_vec(),
        }
    }
}

/// One line of the staff pickup feed.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupFeedEntry {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
    /// unix millis of the last status change
    pub changed_at: Option<i64>,
}

impl PickupFeedEntry {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            pickup_location: order.pickup_location.clone(),
            pickup_instructions: order.pickup_instructions.clone(),
            changed_at: order.last_history_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProtocolError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    TrackingSnapshot(TrackingSnapshot),
    LocationUpdated(LocationUpdate),
    StatusUpdated(StatusUpdate),
    /// Staff pickup feed: a pickup order was placed.
    NewPickupOrder(PickupFeedEntry),
    /// Staff pickup feed: a pickup order changed status.
    PickupStatusUpdated(PickupFeedEntry),
    Error(ProtocolError),
}

impl ServerMessage {
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            ServerMessage::TrackingSnapshot(snapshot) => Some(snapshot.order_id),
            ServerMessage::LocationUpdated(update) => Some(update.order_id),
            ServerMessage::StatusUpdated(update) => Some(update.order_id),
            ServerMessage::NewPickupOrder(entry) | ServerMessage::PickupStatusUpdated(entry) => {
                Some(entry.order_id)
            }
            ServerMessage::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinOrderRoom { order_id: Uuid },
    LeaveOrderRoom { order_id: Uuid },
    /// Accepted only from the driver bound to the order.
    UpdateLocation { order_id: Uuid, location: GeoPoint },
    /// Staff only.
    JoinPickupFeed,
    LeavePickupFeed,
}
