use ordering::protocol::{ServerMessage, TrackingSnapshot};
use uuid::Uuid;

/// What the tracking screen renders. Only ever built from server data; while the socket is
/// down the last snapshot is kept and flagged as possibly stale.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingView {
    pub order_id: Uuid,
    pub snapshot: Option<TrackingSnapshot>,
    pub stale: bool,
    /// Retries are exhausted; the user has to retry by hand.
    pub unavailable: bool,
    pub last_error: Option<String>,
}

impl TrackingView {
    pub fn new(order_id: Uuid) -> Self {
        Self {
            order_id,
            snapshot: None,
            stale: false,
            unavailable: false,
            last_error: None,
        }
    }

    /// Replaces the snapshot unless it would roll the status history back.
    pub fn apply_snapshot(&mut self, snapshot: TrackingSnapshot) -> bool {
        if snapshot.order_id != self.order_id {
            return false;
        }
        let older = self
            .snapshot
            .as_ref()
            .is_some_and(|held| snapshot.status_history.len() < held.status_history.len());
        if older {
            return false;
        }
        self.snapshot = Some(snapshot);
        true
    }

    pub fn apply(&mut self, message: ServerMessage) -> bool {
        if message.order_id().is_some_and(|id| id != self.order_id) {
            return false;
        }
        match message {
            ServerMessage::TrackingSnapshot(snapshot) => self.apply_snapshot(snapshot),
            ServerMessage::LocationUpdated(update) => {
                let Some(snapshot) = self.snapshot.as_mut() else {
                    return false;
                };
                snapshot.apply_location(&update);
                true
            }
            ServerMessage::StatusUpdated(update) => self
                .snapshot
                .as_mut()
                .is_some_and(|snapshot| snapshot.apply_status(&update)),
            // the staff feed is not part of a single order's view
            ServerMessage::NewPickupOrder(_) | ServerMessage::PickupStatusUpdated(_) => false,
            ServerMessage::Error(error) => {
                self.last_error = Some(error.code);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordering::entities::order::{
        CurrentLocation, FulfillmentType, OrderStatus, StatusHistoryEntry,
    };
    use ordering::protocol::{LocationUpdate, StatusUpdate};

    fn entry(status: OrderStatus) -> StatusHistoryEntry {
        StatusHistoryEntry {
            status,
            timestamp: 0,
            actor: None,
            note: None,
            location: None,
        }
    }

    fn snapshot(order_id: Uuid, statuses: &[OrderStatus]) -> TrackingSnapshot {
        TrackingSnapshot {
            order_id,
            fulfillment_type: FulfillmentType::Delivery,
            status: *statuses.last().unwrap(),
            status_history: statuses.iter().copied().map(entry).collect(),
            current_location: None,
            delivery_address: None,
            delivery_details: None,
            distance: None,
            eta: None,
            duration_minutes: None,
            pickup_location: None,
            pickup_instructions: None,
            pickup_verification_code: None,
        }
    }

    #[test]
    fn late_location_keeps_newer_status() {
        let order_id = Uuid::new_v4();
        let mut view = TrackingView::new(order_id);
        view.apply(ServerMessage::TrackingSnapshot(snapshot(
            order_id,
            &[OrderStatus::Pending, OrderStatus::Processing],
        )));
        let stale = LocationUpdate {
            order_id,
            location: CurrentLocation {
                lat: 1.0,
                lng: 2.0,
                last_updated: 10,
            },
            distance: None,
            eta: None,
            duration_minutes: None,
            status: Some(OrderStatus::Pending),
        };
        assert!(view.apply(ServerMessage::LocationUpdated(stale)));
        let held = view.snapshot.as_ref().unwrap();
        assert_eq!(held.status, OrderStatus::Processing);
        assert!(held.current_location.is_some());
    }

    #[test]
    fn location_needs_a_snapshot_first() {
        let order_id = Uuid::new_v4();
        let mut view = TrackingView::new(order_id);
        let update = LocationUpdate {
            order_id,
            location: CurrentLocation {
                lat: 1.0,
                lng: 2.0,
                last_updated: 10,
            },
            distance: Some(100.0),
            eta: Some(20),
            duration_minutes: Some(0.2),
            status: None,
        };
        assert!(!view.apply(ServerMessage::LocationUpdated(update.clone())));
        assert!(view.snapshot.is_none());

        view.apply(ServerMessage::TrackingSnapshot(snapshot(
            order_id,
            &[OrderStatus::Pending],
        )));
        assert!(view.apply(ServerMessage::LocationUpdated(update)));
        let held = view.snapshot.as_ref().unwrap();
        assert_eq!(held.distance, Some(100.0));
        assert_eq!(held.eta, Some(20));
    }

    #[test]
    fn older_snapshots_and_statuses_are_ignored() {
        use OrderStatus::*;
        let order_id = Uuid::new_v4();
        let mut view = TrackingView::new(order_id);
        view.apply_snapshot(snapshot(order_id, &[Pending, Processing, Shipped]));

        assert!(!view.apply_snapshot(snapshot(order_id, &[Pending, Processing])));
        assert!(!view.apply(ServerMessage::StatusUpdated(StatusUpdate {
            order_id,
            status: Processing,
            status_history: vec![entry(Pending), entry(Processing)],
        })));
        assert_eq!(view.snapshot.as_ref().unwrap().status, Shipped);

        assert!(view.apply(ServerMessage::StatusUpdated(StatusUpdate {
            order_id,
            status: DriverAssigned,
            status_history: vec![
                entry(Pending),
                entry(Processing),
                entry(Shipped),
                entry(DriverAssigned)
            ],
        })));
        assert_eq!(view.snapshot.as_ref().unwrap().status, DriverAssigned);
    }

    #[test]
    fn other_orders_are_ignored() {
        let mut view = TrackingView::new(Uuid::new_v4());
        assert!(!view.apply(ServerMessage::TrackingSnapshot(snapshot(
            Uuid::new_v4(),
            &[OrderStatus::Pending]
        ))));
        assert!(view.snapshot.is_none());
    }
}
