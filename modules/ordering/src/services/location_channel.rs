//! Per-order rooms fanning location and status broadcasts out to subscribers, plus the staff
//! pickup feed.
//!
//! Room state lives behind one short-lived lock. Persistence happens before the lock is
//! taken, and delivery to subscribers is a non-blocking `try_send`.

use crate::config::TrackingConfig;
use crate::entities::order::{CurrentLocation, GeoPoint, Order};
use crate::error::FulfillmentError;
use crate::protocol::{
    LocationUpdate, PickupFeedEntry, ServerMessage, StatusUpdate, TrackingSnapshot, arrival_for,
};
use crate::store::FulfillmentStore;
use framework::cron::{BatchedJobs, JobCompleteSignal, JobResult, ScheduledJob};
use framework::processor::Processor;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::PrimitiveDateTime;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub type SubscriberId = u64;
pub type Subscriber = mpsc::Sender<ServerMessage>;

struct Room {
    members: HashMap<SubscriberId, Subscriber>,
    snapshot: TrackingSnapshot,
    idle_since: Option<Instant>,
}

impl Room {
    /// A fresh room counts as idle until its first member is admitted.
    fn new(snapshot: TrackingSnapshot) -> Self {
        Self {
            members: HashMap::new(),
            snapshot,
            idle_since: Some(Instant::now()),
        }
    }

    /// Takes whatever a newer read of the order knows that the room does not.
    fn catch_up(&mut self, fresh: TrackingSnapshot) {
        let newer_location = match (self.snapshot.current_location, fresh.current_location) {
            (None, Some(_)) => true,
            (Some(held), Some(read)) => held.last_updated < read.last_updated,
            _ => false,
        };
        if newer_location {
            self.snapshot.current_location = fresh.current_location;
            self.snapshot.distance = fresh.distance;
            self.snapshot.eta = fresh.eta;
            self.snapshot.duration_minutes = fresh.duration_minutes;
        }
        if fresh.status_history.len() > self.snapshot.status_history.len() {
            self.snapshot.status = fresh.status;
            self.snapshot.status_history = fresh.status_history;
            self.snapshot.delivery_details = fresh.delivery_details;
        }
    }

    fn broadcast(&mut self, order_id: Uuid, message: ServerMessage) {
        fan_out(&mut self.members, order_id, &message);
        if self.members.is_empty() && self.idle_since.is_none() {
            self.idle_since = Some(Instant::now());
        }
        info!(monotonic_counter.room_broadcast = 1);
    }
}

/// Delivers `message` to every member without waiting. Full queues lose the message, closed
/// ones lose their membership.
fn fan_out(members: &mut HashMap<SubscriberId, Subscriber>, order_id: Uuid, message: &ServerMessage) {
    let mut closed = Vec::new();
    for (id, member) in members.iter() {
        match member.try_send(message.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%order_id, subscriber = id, "Subscriber queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
        }
    }
    for id in closed {
        debug!(%order_id, subscriber = id, "Removing closed subscriber");
        members.remove(&id);
    }
}

/// Registry of live rooms, keyed by order id.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
    pickup_feed: Arc<RwLock<HashMap<SubscriberId, Subscriber>>>,
    next_subscriber: Arc<AtomicU64>,
    idle_timeout: Duration,
}

impl RoomRegistry {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            rooms: Arc::default(),
            pickup_feed: Arc::default(),
            next_subscriber: Arc::new(AtomicU64::new(1)),
            idle_timeout,
        }
    }

    pub fn next_subscriber_id(&self) -> SubscriberId {
        self.next_subscriber.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn member_count(&self, order_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&order_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    pub async fn pickup_feed_size(&self) -> usize {
        self.pickup_feed.read().await.len()
    }

    pub async fn snapshot(&self, order_id: Uuid) -> Option<TrackingSnapshot> {
        self.rooms
            .read()
            .await
            .get(&order_id)
            .map(|room| room.snapshot.clone())
    }

    /// Removes rooms that have had no members for at least the idle timeout.
    pub async fn sweep_idle(&self, now: Instant) -> Vec<Uuid> {
        let mut rooms = self.rooms.write().await;
        let idle: Vec<Uuid> = rooms
            .iter()
            .filter(|(_, room)| {
                room.members.is_empty()
                    && room
                        .idle_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= self.idle_timeout)
            })
            .map(|(order_id, _)| *order_id)
            .collect();
        for order_id in &idle {
            rooms.remove(order_id);
        }
        idle
    }
}

/// An idle room removed by the clock loop.
#[derive(Debug, Clone, Copy)]
pub struct IdleRoom {
    pub order_id: Uuid,
}

impl Processor<PrimitiveDateTime> for RoomRegistry {
    type Output = Box<[IdleRoom]>;
    type Error = framework::Error;
    async fn process(&self, _now: PrimitiveDateTime) -> Result<Self::Output, Self::Error> {
        let removed = self.sweep_idle(Instant::now()).await;
        Ok(removed
            .into_iter()
            .map(|order_id| IdleRoom { order_id })
            .collect())
    }
}

impl Processor<BatchedJobs<IdleRoom>> for RoomRegistry {
    type Output = Vec<JobResult<Uuid>>;
    type Error = framework::Error;
    async fn process(&self, batch: BatchedJobs<IdleRoom>) -> Result<Self::Output, Self::Error> {
        Ok(batch
            .jobs
            .iter()
            .map(|room| {
                Ok(JobCompleteSignal {
                    id: room.order_id,
                    complete_time: batch.timestamp,
                })
            })
            .collect())
    }
}

impl ScheduledJob for IdleRoom {
    type Scanner = RoomRegistry;
    type Executor = RoomRegistry;
    type Id = Uuid;

    fn id(&self) -> Self::Id {
        self.order_id
    }
}

#[derive(Clone)]
pub struct LocationChannel<S> {
    store: S,
    rooms: RoomRegistry,
    config: TrackingConfig,
}

impl<S: FulfillmentStore + Clone> LocationChannel<S> {
    pub fn new(store: S, config: TrackingConfig) -> Self {
        let idle_timeout = config
            .room_idle_timeout
            .try_into()
            .unwrap_or(Duration::from_secs(30 * 60));
        Self {
            store,
            rooms: RoomRegistry::new(idle_timeout),
            config,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Creates a subscriber queue sized by the configured buffer.
    pub fn subscriber(&self) -> (SubscriberId, Subscriber, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        (self.rooms.next_subscriber_id(), tx, rx)
    }

    /// Adds `subscriber` to the room of `order_id` and immediately sends it the last snapshot.
    #[instrument(skip(self, subscriber), err)]
    pub async fn join(
        &self,
        order_id: Uuid,
        subscriber_id: SubscriberId,
        subscriber: Subscriber,
    ) -> Result<TrackingSnapshot, FulfillmentError> {
        {
            let mut rooms = self.rooms.rooms.write().await;
            if let Some(room) = rooms.get_mut(&order_id) {
                return Ok(Self::admit(room, subscriber_id, subscriber));
            }
        }
        let first = self.load_snapshot(order_id).await?;
        self.rooms
            .rooms
            .write()
            .await
            .entry(order_id)
            .or_insert_with(|| Room::new(first));
        // a ping persisted before the room existed found nobody to apply it, so read again
        // now that every later ping lands in the room
        let latest = self.load_snapshot(order_id).await?;
        let mut rooms = self.rooms.rooms.write().await;
        let room = rooms.entry(order_id).or_insert_with(|| Room::new(latest.clone()));
        room.catch_up(latest);
        Ok(Self::admit(room, subscriber_id, subscriber))
    }

    async fn load_snapshot(&self, order_id: Uuid) -> Result<TrackingSnapshot, FulfillmentError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        Ok(TrackingSnapshot::from_order(&order, &self.config, framework::now_millis()))
    }

    fn admit(room: &mut Room, subscriber_id: SubscriberId, subscriber: Subscriber) -> TrackingSnapshot {
        let snapshot = room.snapshot.clone();
        if subscriber
            .try_send(ServerMessage::TrackingSnapshot(snapshot.clone()))
            .is_err()
        {
            warn!(order_id = %snapshot.order_id, "Could not deliver the join snapshot");
        }
        room.members.insert(subscriber_id, subscriber);
        room.idle_since = None;
        snapshot
    }

    /// Removes the subscriber. An empty room of a terminal order is dropped right away,
    /// any other empty room waits for the idle sweep.
    pub async fn leave(&self, order_id: Uuid, subscriber_id: SubscriberId) -> bool {
        let mut rooms = self.rooms.rooms.write().await;
        let Some(room) = rooms.get_mut(&order_id) else {
            return false;
        };
        let removed = room.members.remove(&subscriber_id).is_some();
        if room.members.is_empty() {
            if room.snapshot.status.is_terminal() {
                rooms.remove(&order_id);
                debug!(%order_id, "Tore down room of terminal order");
            } else if room.idle_since.is_none() {
                room.idle_since = Some(Instant::now());
            }
        }
        removed
    }

    pub async fn join_pickup_feed(&self, subscriber_id: SubscriberId, subscriber: Subscriber) {
        self.rooms
            .pickup_feed
            .write()
            .await
            .insert(subscriber_id, subscriber);
    }

    pub async fn leave_pickup_feed(&self, subscriber_id: SubscriberId) -> bool {
        self.rooms
            .pickup_feed
            .write()
            .await
            .remove(&subscriber_id)
            .is_some()
    }

    /// Tells the staff feed about a freshly placed pickup order.
    pub async fn publish_new_pickup(&self, order: &Order) {
        let message = ServerMessage::NewPickupOrder(PickupFeedEntry::from_order(order));
        fan_out(&mut *self.rooms.pickup_feed.write().await, order.id, &message);
    }

    /// Tells the staff feed that a pickup order changed status.
    pub async fn publish_pickup_status(&self, order: &Order) {
        let message = ServerMessage::PickupStatusUpdated(PickupFeedEntry::from_order(order));
        fan_out(&mut *self.rooms.pickup_feed.write().await, order.id, &message);
    }

    /// Drops the subscriber from every room it joined and from the pickup feed. Used when a
    /// connection goes away.
    pub async fn leave_all(&self, subscriber_id: SubscriberId) {
        self.leave_pickup_feed(subscriber_id).await;
        let joined: Vec<Uuid> = {
            let rooms = self.rooms.rooms.read().await;
            rooms
                .iter()
                .filter(|(_, room)| room.members.contains_key(&subscriber_id))
                .map(|(order_id, _)| *order_id)
                .collect()
        };
        for order_id in joined {
            self.leave(order_id, subscriber_id).await;
        }
    }

    /// Records a ping from the driver bound to the order and broadcasts it with the
    /// distance and ETA computed from this same position.
    #[instrument(skip(self), err)]
    pub async fn publish_location(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        point: GeoPoint,
    ) -> Result<LocationUpdate, FulfillmentError> {
        if !point.is_valid() {
            return Err(FulfillmentError::InvalidInput("location out of range"));
        }
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        if order.bound_driver() != Some(driver_id) {
            warn!(%order_id, %driver_id, "Location rejected from a driver not bound to the order");
            return Err(FulfillmentError::Unauthorized);
        }
        if order.status.is_terminal() {
            return Err(FulfillmentError::TerminalState(order.status));
        }
        let now = framework::now_millis();
        let location = CurrentLocation {
            lat: point.lat,
            lng: point.lng,
            last_updated: now,
        };
        if !self.store.update_location(order_id, location).await? {
            return Err(FulfillmentError::OrderNotFound(order_id));
        }
        let estimate = arrival_for(Some(point), order.destination(), &self.config, now);
        let mut update = LocationUpdate {
            order_id,
            location,
            distance: estimate.map(|e| e.distance_meters),
            eta: estimate.map(|e| e.arrives_at),
            duration_minutes: estimate.map(|e| e.duration_minutes),
            status: Some(order.status),
        };

        let mut rooms = self.rooms.rooms.write().await;
        if let Some(room) = rooms.get_mut(&order_id) {
            // the order read above may predate a status change that landed during the write
            update.status = Some(room.snapshot.status);
            let newer = room
                .snapshot
                .current_location
                .is_none_or(|held| held.last_updated <= location.last_updated);
            if newer {
                room.snapshot.apply_location(&update);
            }
            room.broadcast(order_id, ServerMessage::LocationUpdated(update.clone()));
        }
        Ok(update)
    }

    /// Broadcasts a persisted status change. Updates older than what the room already
    /// holds are dropped so subscribers never see a status go backwards.
    pub async fn publish_status(&self, order: &Order) {
        let update = StatusUpdate::from_order(order);
        let mut rooms = self.rooms.rooms.write().await;
        let Some(room) = rooms.get_mut(&order.id) else {
            return;
        };
        if !room.snapshot.apply_status(&update) {
            debug!(order_id = %order.id, "Skipping stale status broadcast");
            return;
        }
        if let Some(details) = order.delivery() {
            room.snapshot.delivery_details = Some(details.clone());
        }
        room.broadcast(order.id, ServerMessage::StatusUpdated(update));
        if room.members.is_empty() && order.status.is_terminal() {
            rooms.remove(&order.id);
        }
    }
}
