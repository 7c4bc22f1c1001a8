//! Persistence seam of the fulfillment services.
//!
//! Services are generic over [`FulfillmentStore`]; [`Backend`] runs every command against
//! Postgres and Redis, [`memory::MemoryStore`] keeps everything in process.

use crate::entities::driver::{
    Driver, FindDriverById, ListOnlineDrivers, SetDriverOnline, UpdateDriverLocation,
};
use crate::entities::order::{
    ConditionalUpdateStatus, CountDriverActiveOrders, CurrentLocation, FindOrderById,
    FindOrderByPickupCode, GeoPoint, InsertOrder, ListDriverOrders, ListPendingPickups, Order,
    UpdateOrderLocation,
};
use crate::entities::redis::driver_reservation::{ReleaseDriver, ReservationService, ReserveDriver};
use crate::events::OrderEvent;
use framework::processor::Processor;
use framework::redis::{RedisConnection, publish_event};
use framework::sqlx::DatabaseProcessor;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub mod memory;

pub use memory::MemoryStore;

pub type StoreResult<T> = Result<T, framework::Error>;

pub trait FulfillmentStore: Send + Sync + 'static {
    fn get_order(&self, order_id: Uuid) -> impl Future<Output = StoreResult<Option<Order>>> + Send;

    fn find_order_by_pickup_code(
        &self,
        code: String,
    ) -> impl Future<Output = StoreResult<Option<Order>>> + Send;

    /// `None` when the id or the pickup code is already taken.
    fn insert_order(&self, input: InsertOrder)
    -> impl Future<Output = StoreResult<Option<Order>>> + Send;

    /// `None` when the stored status no longer equals `expected_status`.
    fn conditional_update_status(
        &self,
        input: ConditionalUpdateStatus,
    ) -> impl Future<Output = StoreResult<Option<Order>>> + Send;

    fn update_location(
        &self,
        order_id: Uuid,
        location: CurrentLocation,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn list_driver_orders(
        &self,
        query: ListDriverOrders,
    ) -> impl Future<Output = StoreResult<Vec<Order>>> + Send;

    fn list_pending_pickups(&self) -> impl Future<Output = StoreResult<Vec<Order>>> + Send;

    fn list_online_drivers(&self) -> impl Future<Output = StoreResult<Vec<Driver>>> + Send;

    fn find_driver(&self, driver_id: Uuid)
    -> impl Future<Output = StoreResult<Option<Driver>>> + Send;

    fn driver_active_order_count(&self, driver_id: Uuid)
    -> impl Future<Output = StoreResult<i64>> + Send;

    fn set_driver_online(
        &self,
        driver_id: Uuid,
        online: bool,
    ) -> impl Future<Output = StoreResult<Option<Driver>>> + Send;

    fn update_driver_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Claims `driver_id` for `order_id` for at most `ttl`. `false` when someone else holds it.
    fn reserve_driver(
        &self,
        driver_id: Uuid,
        order_id: Uuid,
        ttl: Duration,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    fn release_driver(
        &self,
        driver_id: Uuid,
        order_id: Uuid,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn emit(&self, event: OrderEvent) -> impl Future<Output = StoreResult<()>> + Send;
}

#[derive(Clone)]
pub struct Backend {
    pub db: DatabaseProcessor,
    pub redis: RedisConnection,
}

impl Backend {
    pub fn new(db: DatabaseProcessor, redis: RedisConnection) -> Self {
        Self { db, redis }
    }

    fn reservations(&self) -> ReservationService {
        ReservationService {
            redis: self.redis.clone(),
        }
    }
}

impl FulfillmentStore for Backend {
    async fn get_order(&self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.db.process(FindOrderById { id: order_id }).await?)
    }

    async fn find_order_by_pickup_code(&self, code: String) -> StoreResult<Option<Order>> {
        Ok(self.db.process(FindOrderByPickupCode { code }).await?)
    }

    async fn insert_order(&self, input: InsertOrder) -> StoreResult<Option<Order>> {
        Ok(self.db.process(input).await?)
    }

    async fn conditional_update_status(
        &self,
        input: ConditionalUpdateStatus,
    ) -> StoreResult<Option<Order>> {
        Ok(self.db.process(input).await?)
    }

    async fn update_location(&self, order_id: Uuid, location: CurrentLocation) -> StoreResult<bool> {
        Ok(self
            .db
            .process(UpdateOrderLocation { order_id, location })
            .await?)
    }

    async fn list_driver_orders(&self, query: ListDriverOrders) -> StoreResult<Vec<Order>> {
        Ok(self.db.process(query).await?)
    }

    async fn list_pending_pickups(&self) -> StoreResult<Vec<Order>> {
        Ok(self.db.process(ListPendingPickups).await?)
    }

    async fn list_online_drivers(&self) -> StoreResult<Vec<Driver>> {
        Ok(self.db.process(ListOnlineDrivers).await?)
    }

    async fn find_driver(&self, driver_id: Uuid) -> StoreResult<Option<Driver>> {
        Ok(self.db.process(FindDriverById { id: driver_id }).await?)
    }

    async fn driver_active_order_count(&self, driver_id: Uuid) -> StoreResult<i64> {
        Ok(self.db.process(CountDriverActiveOrders { driver_id }).await?)
    }

    async fn set_driver_online(&self, driver_id: Uuid, online: bool) -> StoreResult<Option<Driver>> {
        Ok(self.db.process(SetDriverOnline { driver_id, online }).await?)
    }

    async fn update_driver_location(&self, driver_id: Uuid, location: GeoPoint) -> StoreResult<()> {
        Ok(self
            .db
            .process(UpdateDriverLocation {
                driver_id,
                location,
            })
            .await?)
    }

    async fn reserve_driver(&self, driver_id: Uuid, order_id: Uuid, ttl: Duration) -> StoreResult<bool> {
        self.reservations()
            .process(ReserveDriver {
                driver_id,
                order_id,
                ttl,
            })
            .await
    }

    async fn release_driver(&self, driver_id: Uuid, order_id: Uuid) -> StoreResult<()> {
        self.reservations()
            .process(ReleaseDriver {
                driver_id,
                order_id,
            })
            .await
    }

    async fn emit(&self, event: OrderEvent) -> StoreResult<()> {
        let mut conn = self.redis.clone();
        match event {
            OrderEvent::StatusChanged(event) => publish_event(&mut conn, &event).await,
            OrderEvent::DriverAssigned(event) => publish_event(&mut conn, &event).await,
            OrderEvent::PickupCompleted(event) => publish_event(&mut conn, &event).await,
        }
    }
}
