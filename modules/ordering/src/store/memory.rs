//! In-process store used by the test-suite and by `STORAGE_BACKEND=memory` runs.

use crate::entities::driver::Driver;
use crate::entities::order::{
    ConditionalUpdateStatus, CurrentLocation, GeoPoint, InsertOrder, ListDriverOrders,
    ListPendingPickups, Order, StatusPatch,
};
use crate::events::OrderEvent;
use crate::store::{FulfillmentStore, StoreResult};
use framework::cron::{BatchedJobs, JobCompleteSignal, JobResult, ScheduledJob};
use framework::processor::Processor;
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::PrimitiveDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Reservation {
    order_id: Uuid,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    drivers: HashMap<Uuid, Driver>,
    reservations: HashMap<Uuid, Reservation>,
    events: Vec<OrderEvent>,
    failing_status_writes: usize,
    status_write_delay: Option<Duration>,
    location_write_delay: Option<Duration>,
    driver_count_delay: Option<Duration>,
    next_order_read_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_driver(&self, driver: Driver) {
        self.inner.lock().await.drivers.insert(driver.id, driver);
    }

    /// The next `count` conditional status writes report a conflict without touching the order.
    pub async fn fail_next_status_writes(&self, count: usize) {
        self.inner.lock().await.failing_status_writes = count;
    }

    /// Stalls every conditional status write, simulating a slow database.
    pub async fn delay_status_writes(&self, delay: Option<Duration>) {
        self.inner.lock().await.status_write_delay = delay;
    }

    /// Stalls every location write before it lands.
    pub async fn delay_location_writes(&self, delay: Option<Duration>) {
        self.inner.lock().await.location_write_delay = delay;
    }

    /// Stalls every active-order count, the last read before a dispatch writes.
    pub async fn delay_driver_counts(&self, delay: Option<Duration>) {
        self.inner.lock().await.driver_count_delay = delay;
    }

    /// The next order read returns what it saw, but only after `delay`.
    pub async fn delay_next_order_read(&self, delay: Duration) {
        self.inner.lock().await.next_order_read_delay = Some(delay);
    }

    pub async fn events(&self) -> Vec<OrderEvent> {
        self.inner.lock().await.events.clone()
    }

    pub async fn reservation_of(&self, driver_id: Uuid) -> Option<Uuid> {
        let inner = self.inner.lock().await;
        inner
            .reservations
            .get(&driver_id)
            .filter(|reservation| reservation.expires_at > Instant::now())
            .map(|reservation| reservation.order_id)
    }

    /// Drops reservations whose TTL elapsed. Returns the drivers that became free.
    pub async fn purge_expired_reservations(&self, now: Instant) -> Vec<Uuid> {
        let mut inner = self.inner.lock().await;
        let expired: Vec<Uuid> = inner
            .reservations
            .iter()
            .filter(|(_, reservation)| reservation.expires_at <= now)
            .map(|(driver_id, _)| *driver_id)
            .collect();
        for driver_id in &expired {
            inner.reservations.remove(driver_id);
        }
        expired
    }
}

fn apply_patch(order: &mut Order, patch: StatusPatch) {
    match patch {
        StatusPatch::None => {}
        StatusPatch::AssignDriver(details) => {
            order.driver_id = Some(details.driver.id);
            order.delivery_details = Some(Json(details));
        }
        StatusPatch::PickupVerified { by, at } => {
            order.pickup_verified_by = Some(by);
            order.pickup_verified_at = Some(at);
        }
    }
}

impl FulfillmentStore for MemoryStore {
    async fn get_order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        let (order, delay) = {
            let mut inner = self.inner.lock().await;
            let delay = inner.next_order_read_delay.take();
            (inner.orders.get(&order_id).cloned(), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(order)
    }

    async fn find_order_by_pickup_code(&self, code: String) -> StoreResult<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .values()
            .find(|order| order.pickup_verification_code.as_deref() == Some(code.as_str()))
            .cloned())
    }

    async fn insert_order(&self, input: InsertOrder) -> StoreResult<Option<Order>> {
        let mut inner = self.inner.lock().await;
        if inner.orders.contains_key(&input.id) {
            return Ok(None);
        }
        if let Some(code) = input.pickup_verification_code.as_deref() {
            let taken = inner
                .orders
                .values()
                .any(|order| order.pickup_verification_code.as_deref() == Some(code));
            if taken {
                return Ok(None);
            }
        }
        let now = framework::now_time();
        let order = Order {
            id: input.id,
            user_id: input.user_id,
            fulfillment_type: input.fulfillment_type,
            status: input.initial_entry.status,
            status_history: Json(vec![input.initial_entry]),
            current_location: None,
            delivery_address: input.delivery_address.map(Json),
            delivery_details: None,
            driver_id: None,
            pickup_location: input.pickup_location,
            pickup_instructions: input.pickup_instructions,
            pickup_verification_code: input.pickup_verification_code,
            pickup_verified_by: None,
            pickup_verified_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.orders.insert(order.id, order.clone());
        Ok(Some(order))
    }

    async fn conditional_update_status(
        &self,
        input: ConditionalUpdateStatus,
    ) -> StoreResult<Option<Order>> {
        let delay = self.inner.lock().await.status_write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().await;
        if inner.failing_status_writes > 0 {
            inner.failing_status_writes -= 1;
            return Ok(None);
        }
        let Some(order) = inner.orders.get_mut(&input.order_id) else {
            return Ok(None);
        };
        if order.status != input.expected_status {
            return Ok(None);
        }
        order.status = input.new_status;
        order.status_history.0.push(input.entry);
        apply_patch(order, input.patch);
        order.updated_at = framework::now_time();
        Ok(Some(order.clone()))
    }

    async fn update_location(&self, order_id: Uuid, location: CurrentLocation) -> StoreResult<bool> {
        let delay = self.inner.lock().await.location_write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().await;
        let Some(order) = inner.orders.get_mut(&order_id) else {
            return Ok(false);
        };
        order.current_location = Some(Json(location));
        Ok(true)
    }

    async fn list_driver_orders(&self, query: ListDriverOrders) -> StoreResult<Vec<Order>> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|order| query.selects(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(orders
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn list_pending_pickups(&self) -> StoreResult<Vec<Order>> {
        let inner = self.inner.lock().await;
        let mut orders: Vec<Order> = inner
            .orders
            .values()
            .filter(|order| ListPendingPickups::selects(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn list_online_drivers(&self) -> StoreResult<Vec<Driver>> {
        let inner = self.inner.lock().await;
        let mut drivers: Vec<Driver> = inner
            .drivers
            .values()
            .filter(|driver| driver.online)
            .cloned()
            .collect();
        // same order as the SQL: online_since ascending, nulls last, then id
        drivers.sort_by(|a, b| {
            let since = match (a.online_since, b.online_since) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            since.then_with(|| a.id.cmp(&b.id))
        });
        Ok(drivers)
    }

    async fn find_driver(&self, driver_id: Uuid) -> StoreResult<Option<Driver>> {
        Ok(self.inner.lock().await.drivers.get(&driver_id).cloned())
    }

    async fn driver_active_order_count(&self, driver_id: Uuid) -> StoreResult<i64> {
        let delay = self.inner.lock().await.driver_count_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let inner = self.inner.lock().await;
        let count = inner
            .orders
            .values()
            .filter(|order| order.driver_id == Some(driver_id) && order.status.is_with_driver())
            .count();
        Ok(count as i64)
    }

    async fn set_driver_online(&self, driver_id: Uuid, online: bool) -> StoreResult<Option<Driver>> {
        let mut inner = self.inner.lock().await;
        let Some(driver) = inner.drivers.get_mut(&driver_id) else {
            return Ok(None);
        };
        driver.online_since = match (online, driver.online) {
            (true, true) => driver.online_since,
            (true, false) => Some(framework::now_time()),
            (false, _) => None,
        };
        driver.online = online;
        Ok(Some(driver.clone()))
    }

    async fn update_driver_location(&self, driver_id: Uuid, location: GeoPoint) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(driver) = inner.drivers.get_mut(&driver_id) {
            driver.last_location = Some(Json(location));
        }
        Ok(())
    }

    async fn reserve_driver(&self, driver_id: Uuid, order_id: Uuid, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(held) = inner.reservations.get(&driver_id)
            && held.expires_at > now
        {
            return Ok(false);
        }
        inner.reservations.insert(
            driver_id,
            Reservation {
                order_id,
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_driver(&self, driver_id: Uuid, order_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .reservations
            .get(&driver_id)
            .is_some_and(|held| held.order_id == order_id)
        {
            inner.reservations.remove(&driver_id);
        }
        Ok(())
    }

    async fn emit(&self, event: OrderEvent) -> StoreResult<()> {
        info!(monotonic_counter.order_event = 1);
        self.inner.lock().await.events.push(event);
        Ok(())
    }
}

/// A driver whose reservation has expired, freed by the clock loop.
#[derive(Debug, Clone, Copy)]
pub struct ExpiredReservation {
    pub driver_id: Uuid,
}

/// Collects expired reservations. Expiry follows the runtime clock, not the tick timestamp.
#[derive(Clone)]
pub struct ExpiredReservationScanner {
    pub store: MemoryStore,
}

impl Processor<PrimitiveDateTime> for ExpiredReservationScanner {
    type Output = Box<[ExpiredReservation]>;
    type Error = framework::Error;
    async fn process(&self, _now: PrimitiveDateTime) -> Result<Self::Output, Self::Error> {
        let freed = self.store.purge_expired_reservations(Instant::now()).await;
        Ok(freed
            .into_iter()
            .map(|driver_id| ExpiredReservation { driver_id })
            .collect())
    }
}

#[derive(Clone, Copy)]
pub struct ExpiredReservationReporter;

impl Processor<BatchedJobs<ExpiredReservation>> for ExpiredReservationReporter {
    type Output = Vec<JobResult<Uuid>>;
    type Error = framework::Error;
    async fn process(
        &self,
        batch: BatchedJobs<ExpiredReservation>,
    ) -> Result<Self::Output, Self::Error> {
        Ok(batch
            .jobs
            .iter()
            .map(|job| {
                Ok(JobCompleteSignal {
                    id: job.driver_id,
                    complete_time: batch.timestamp,
                })
            })
            .collect())
    }
}

impl ScheduledJob for ExpiredReservation {
    type Scanner = ExpiredReservationScanner;
    type Executor = ExpiredReservationReporter;
    type Id = Uuid;

    fn id(&self) -> Self::Id {
        self.driver_id
    }
}
