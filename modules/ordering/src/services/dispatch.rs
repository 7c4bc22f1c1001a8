use crate::config::{DispatchConfig, TrackingConfig};
use crate::entities::driver::Driver;
use crate::entities::order::{
    Actor, DeliveryDetails, FulfillmentType, ListDriverOrders, Order, OrderStatus, StatusPatch,
};
use crate::error::FulfillmentError;
use crate::events::delivery::DriverAssignedEvent;
use crate::protocol::arrival_for;
use crate::services::status_machine::{StatusMachine, Transition, TransitionOutcome};
use crate::store::FulfillmentStore;
use framework::processor::Processor;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableDriver {
    #[serde(flatten)]
    pub driver: Driver,
    pub active_orders: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ListAvailableDrivers;

#[derive(Debug, Clone, Copy)]
pub struct Dispatch {
    pub order_id: Uuid,
    /// `None` lets the assigner pick the least busy driver.
    pub driver_id: Option<Uuid>,
    pub actor: Actor,
}

#[derive(Debug, Clone, Copy)]
pub struct SetPresence {
    pub driver_id: Uuid,
    pub online: bool,
}

#[derive(Clone)]
pub struct DispatchAssigner<S> {
    store: S,
    machine: StatusMachine<S>,
    config: DispatchConfig,
    tracking: TrackingConfig,
}

impl<S: FulfillmentStore + Clone> DispatchAssigner<S> {
    pub fn new(
        store: S,
        machine: StatusMachine<S>,
        config: DispatchConfig,
        tracking: TrackingConfig,
    ) -> Self {
        Self {
            store,
            machine,
            config,
            tracking,
        }
    }

    async fn is_below_capacity(&self, driver_id: Uuid) -> Result<bool, FulfillmentError> {
        let active = self.store.driver_active_order_count(driver_id).await?;
        Ok(active < self.config.max_active_orders_per_driver)
    }

    fn estimated_delivery_time(&self, driver: &Driver, order: &Order, now: i64) -> i64 {
        arrival_for(driver.position(), order.destination(), &self.tracking, now)
            .map(|estimate| estimate.arrives_at)
            .unwrap_or_else(|| {
                now + self.config.fallback_delivery_estimate.whole_milliseconds() as i64
            })
    }

    async fn bind(
        &self,
        order: &Order,
        driver: &Driver,
        actor: Actor,
        deadline: Instant,
    ) -> Result<Order, FulfillmentError> {
        let now = framework::now_millis();
        let details = DeliveryDetails {
            driver: driver.info(),
            estimated_delivery_time: Some(self.estimated_delivery_time(driver, order, now)),
        };
        let transition = Transition::to(order.id, OrderStatus::DriverAssigned, actor)
            .with_note(format!("Assigned to {}", driver.name))
            .with_patch(StatusPatch::AssignDriver(details))
            .with_write_deadline(deadline);
        match self.machine.process(transition).await? {
            TransitionOutcome::Applied(order) => {
                info!(monotonic_counter.dispatch = 1);
                let event = DriverAssignedEvent {
                    order_id: order.id,
                    driver_id: driver.id,
                    assigned_at: order.last_history_timestamp().unwrap_or(now),
                    estimated_delivery_time: order
                        .delivery()
                        .and_then(|details| details.estimated_delivery_time),
                };
                if let Err(e) = self.store.emit(event.into()).await {
                    warn!(order_id = %order.id, "Failed to publish dispatch event: {e}");
                }
                Ok(order)
            }
            // a retried request for the same pairing is fine, anything else lost the race
            TransitionOutcome::Unchanged(order) if order.bound_driver() == Some(driver.id) => {
                Ok(order)
            }
            TransitionOutcome::Unchanged(_) => Err(FulfillmentError::ConcurrentModification),
        }
    }

    /// Reserves `driver`, re-checks its load and binds it. The reservation is always released.
    /// Steps before the status write are abandoned once the reservation TTL elapses; an issued
    /// write always runs to completion so its outcome is never lost.
    async fn try_driver(
        &self,
        order: &Order,
        driver: &Driver,
        actor: Actor,
        ttl: Duration,
    ) -> Result<Option<Order>, FulfillmentError> {
        // taken before the claim so the write is always issued while the claim still holds
        let deadline = Instant::now() + ttl;
        if !self.store.reserve_driver(driver.id, order.id, ttl).await? {
            return Ok(None);
        }
        let capacity = tokio::time::timeout_at(deadline, self.is_below_capacity(driver.id)).await;
        let result = match capacity {
            Ok(Ok(true)) => self.bind(order, driver, actor, deadline).await.map(Some),
            Ok(Ok(false)) => Ok(None),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FulfillmentError::DispatchTimedOut),
        };
        if let Err(e) = self.store.release_driver(driver.id, order.id).await {
            warn!(driver_id = %driver.id, "Failed to release driver reservation: {e}");
        }
        result
    }
}

impl<S: FulfillmentStore + Clone> Processor<ListAvailableDrivers> for DispatchAssigner<S> {
    type Output = Vec<AvailableDriver>;
    type Error = FulfillmentError;
    #[instrument(skip_all, err)]
    async fn process(&self, _: ListAvailableDrivers) -> Result<Vec<AvailableDriver>, FulfillmentError> {
        // already ordered by online_since, oldest first; the stable sort keeps that as tie-break
        let online = self.store.list_online_drivers().await?;
        let mut available = Vec::with_capacity(online.len());
        for driver in online {
            let active_orders = self.store.driver_active_order_count(driver.id).await?;
            if active_orders < self.config.max_active_orders_per_driver {
                available.push(AvailableDriver {
                    driver,
                    active_orders,
                });
            }
        }
        available.sort_by_key(|candidate| candidate.active_orders);
        Ok(available)
    }
}

impl<S: FulfillmentStore + Clone> Processor<Dispatch> for DispatchAssigner<S> {
    type Output = Order;
    type Error = FulfillmentError;
    #[instrument(skip_all, err, fields(order_id = %input.order_id, driver_id = ?input.driver_id))]
    async fn process(&self, input: Dispatch) -> Result<Order, FulfillmentError> {
        let order = self
            .store
            .get_order(input.order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(input.order_id))?;
        if order.status.is_terminal() {
            return Err(FulfillmentError::TerminalState(order.status));
        }
        if order.fulfillment_type != FulfillmentType::Delivery
            || order.status != OrderStatus::Shipped
        {
            return Err(FulfillmentError::InvalidTransition {
                from: order.status,
                to: OrderStatus::DriverAssigned,
            });
        }
        let ttl = self.config.reservation_ttl_std();

        if let Some(driver_id) = input.driver_id {
            let driver = self
                .store
                .find_driver(driver_id)
                .await?
                .ok_or(FulfillmentError::DriverNotFound(driver_id))?;
            if !driver.online {
                return Err(FulfillmentError::DriverUnavailable(driver_id));
            }
            return self
                .try_driver(&order, &driver, input.actor, ttl)
                .await?
                .ok_or(FulfillmentError::DriverUnavailable(driver_id));
        }

        let candidates = self.process(ListAvailableDrivers).await?;
        if candidates.is_empty() {
            return Err(FulfillmentError::NoDriverAvailable);
        }
        for candidate in &candidates {
            if let Some(bound) = self
                .try_driver(&order, &candidate.driver, input.actor, ttl)
                .await?
            {
                return Ok(bound);
            }
        }
        // every candidate was taken by a concurrent dispatch
        Err(FulfillmentError::NoDriverAvailable)
    }
}

impl<S: FulfillmentStore + Clone> Processor<ListDriverOrders> for DispatchAssigner<S> {
    type Output = Vec<Order>;
    type Error = FulfillmentError;
    #[instrument(skip_all, err, fields(driver_id = %input.driver_id, active = input.active))]
    async fn process(&self, input: ListDriverOrders) -> Result<Vec<Order>, FulfillmentError> {
        if input.limit < 1 || input.offset < 0 {
            return Err(FulfillmentError::InvalidInput("page out of range"));
        }
        let query = ListDriverOrders {
            limit: input.limit.min(MAX_PAGE_SIZE),
            ..input
        };
        Ok(self.store.list_driver_orders(query).await?)
    }
}

impl<S: FulfillmentStore + Clone> Processor<SetPresence> for DispatchAssigner<S> {
    type Output = Driver;
    type Error = FulfillmentError;
    #[instrument(skip_all, err, fields(driver_id = %input.driver_id, online = input.online))]
    async fn process(&self, input: SetPresence) -> Result<Driver, FulfillmentError> {
        self.store
            .set_driver_online(input.driver_id, input.online)
            .await?
            .ok_or(FulfillmentError::DriverNotFound(input.driver_id))
    }
}
