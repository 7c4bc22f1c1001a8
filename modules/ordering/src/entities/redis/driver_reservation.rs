use framework::processor::Processor;
use framework::redis::{KeyValue, KeyValueRead, KeyValueWrite, RedisConnection, RedisKey};
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

/// A short-lived claim on a driver while a dispatch binds them to an order.
/// The TTL releases the claim if the dispatching call never finishes.
#[derive(Debug, Clone, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct DriverReservation {
    pub driver_id: Uuid,
    pub order_id: Uuid,
}

framework::rkyv_message!(DriverReservation);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverReservationKey(pub Uuid);

impl redis::ToRedisArgs for DriverReservationKey {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + redis::RedisWrite,
    {
        let key: RedisKey = RedisKey::from(format!("dispatch_reservation:{}", self.0));
        key.write_redis_args(out);
    }
}

impl KeyValue for DriverReservation {
    type Key = DriverReservationKey;
    type Value = Self;

    fn key(&self) -> Self::Key {
        DriverReservationKey(self.driver_id)
    }

    fn value(&self) -> Self::Value {
        self.clone()
    }

    fn into_value(self) -> Self::Value {
        self
    }

    fn new(key: Self::Key, mut value: Self::Value) -> Self {
        value.driver_id = key.0;
        value
    }
}

impl KeyValueRead for DriverReservation {}
impl KeyValueWrite for DriverReservation {}

#[derive(Clone)]
pub struct ReservationService {
    pub redis: RedisConnection,
}

#[derive(Debug, Clone, Copy)]
pub struct ReserveDriver {
    pub driver_id: Uuid,
    pub order_id: Uuid,
    pub ttl: Duration,
}

impl Processor<ReserveDriver> for ReservationService {
    /// `false` when another dispatch holds the driver.
    type Output = bool;
    type Error = framework::Error;
    #[instrument(skip_all, err, fields(driver_id = %input.driver_id, order_id = %input.order_id))]
    async fn process(&self, input: ReserveDriver) -> Result<bool, framework::Error> {
        let reservation = DriverReservation {
            driver_id: input.driver_id,
            order_id: input.order_id,
        };
        reservation
            .write_if_absent_with_ttl(&mut self.redis.clone(), input.ttl)
            .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReleaseDriver {
    pub driver_id: Uuid,
    pub order_id: Uuid,
}

impl Processor<ReleaseDriver> for ReservationService {
    type Output = ();
    type Error = framework::Error;
    #[instrument(skip_all, err, fields(driver_id = %input.driver_id, order_id = %input.order_id))]
    async fn process(&self, input: ReleaseDriver) -> Result<(), framework::Error> {
        let reservation = DriverReservation {
            driver_id: input.driver_id,
            order_id: input.order_id,
        };
        // only our own claim is released; an expired-and-retaken key belongs to someone else
        reservation
            .delete_if_matches(&mut self.redis.clone())
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FindDriverReservation {
    pub driver_id: Uuid,
}

impl Processor<FindDriverReservation> for ReservationService {
    type Output = Option<DriverReservation>;
    type Error = framework::Error;
    async fn process(
        &self,
        input: FindDriverReservation,
    ) -> Result<Option<DriverReservation>, framework::Error> {
        DriverReservation::read(
            &mut self.redis.clone(),
            DriverReservationKey(input.driver_id),
        )
        .await
    }
}
