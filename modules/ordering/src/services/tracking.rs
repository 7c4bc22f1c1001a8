//! Entry point for tracking clients: access checks, driver pings and role-restricted
//! status requests on top of the channel and the status machine.

use crate::config::TrackingConfig;
use crate::entities::order::{Actor, ActorRole, GeoPoint, Order, OrderStatus};
use crate::error::FulfillmentError;
use crate::protocol::{LocationUpdate, TrackingSnapshot};
use crate::services::location_channel::{LocationChannel, Subscriber, SubscriberId};
use crate::services::status_machine::{StatusMachine, Transition, TransitionOutcome};
use crate::store::FulfillmentStore;
use framework::processor::Processor;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const NEARBY_NOTE: &str = "Driver is nearby your location";

/// The customer who placed the order, its bound driver, and staff may follow an order.
pub fn can_track(order: &Order, actor: &Actor) -> bool {
    match actor.role {
        ActorRole::Staff | ActorRole::Admin | ActorRole::System => true,
        ActorRole::Customer => order.user_id == actor.id,
        ActorRole::Driver => order.bound_driver() == Some(actor.id),
    }
}

#[derive(Clone)]
pub struct TrackingService<S> {
    store: S,
    channel: LocationChannel<S>,
    machine: StatusMachine<S>,
    config: TrackingConfig,
}

impl<S: FulfillmentStore + Clone> TrackingService<S> {
    pub fn new(
        store: S,
        channel: LocationChannel<S>,
        machine: StatusMachine<S>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            store,
            channel,
            machine,
            config,
        }
    }

    pub fn channel(&self) -> &LocationChannel<S> {
        &self.channel
    }

    async fn authorized_order(&self, order_id: Uuid, actor: &Actor) -> Result<Order, FulfillmentError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;
        if !can_track(&order, actor) {
            return Err(FulfillmentError::Unauthorized);
        }
        Ok(order)
    }

    /// Current state of the order, as served by the REST fallback.
    #[instrument(skip(self), err)]
    pub async fn snapshot(&self, order_id: Uuid, actor: Actor) -> Result<TrackingSnapshot, FulfillmentError> {
        let order = self.authorized_order(order_id, &actor).await?;
        Ok(TrackingSnapshot::from_order(
            &order,
            &self.config,
            framework::now_millis(),
        ))
    }

    pub async fn join(
        &self,
        order_id: Uuid,
        actor: Actor,
        subscriber_id: SubscriberId,
        subscriber: Subscriber,
    ) -> Result<TrackingSnapshot, FulfillmentError> {
        self.authorized_order(order_id, &actor).await?;
        self.channel.join(order_id, subscriber_id, subscriber).await
    }

    pub async fn leave(&self, order_id: Uuid, subscriber_id: SubscriberId) -> bool {
        self.channel.leave(order_id, subscriber_id).await
    }

    /// Subscribes a staff member to new pickup orders and pickup status changes.
    pub async fn join_pickup_feed(
        &self,
        actor: Actor,
        subscriber_id: SubscriberId,
        subscriber: Subscriber,
    ) -> Result<(), FulfillmentError> {
        if !actor.is_staff() {
            return Err(FulfillmentError::Unauthorized);
        }
        self.channel.join_pickup_feed(subscriber_id, subscriber).await;
        Ok(())
    }

    /// A location ping from a driver. Moves an order out for delivery to `nearby` once the
    /// driver is within the configured radius of the destination.
    #[instrument(skip(self), err)]
    pub async fn driver_ping(
        &self,
        order_id: Uuid,
        driver: Actor,
        point: GeoPoint,
    ) -> Result<LocationUpdate, FulfillmentError> {
        if driver.role != ActorRole::Driver {
            return Err(FulfillmentError::Unauthorized);
        }
        let update = self
            .channel
            .publish_location(order_id, driver.id, point)
            .await?;
        if let Err(e) = self.store.update_driver_location(driver.id, point).await {
            warn!(driver_id = %driver.id, "Failed to record driver position: {e}");
        }
        let within_radius = update
            .distance
            .is_some_and(|distance| distance <= self.config.nearby_radius_meters);
        if within_radius && update.status == Some(OrderStatus::OutForDelivery) {
            let transition = Transition::to(order_id, OrderStatus::Nearby, Actor::system())
                .with_note(NEARBY_NOTE);
            match self.machine.process(transition).await {
                Ok(_) => debug!(%order_id, "Order marked nearby"),
                Err(e) => warn!(%order_id, "Could not mark order nearby: {e}"),
            }
        }
        Ok(update)
    }

    /// A status change requested over the API. Customers may not change status, drivers
    /// may only move their own order through the last delivery steps.
    #[instrument(skip(self, note), err)]
    pub async fn request_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Actor,
        note: Option<String>,
    ) -> Result<TransitionOutcome, FulfillmentError> {
        match actor.role {
            ActorRole::Customer => return Err(FulfillmentError::Unauthorized),
            ActorRole::Driver => {
                let order = self.authorized_order(order_id, &actor).await?;
                let driver_target = matches!(
                    target,
                    OrderStatus::OutForDelivery | OrderStatus::Nearby | OrderStatus::Delivered
                );
                if !driver_target {
                    return Err(FulfillmentError::Unauthorized);
                }
                debug!(from = %order.status, "Driver status request");
            }
            ActorRole::Staff | ActorRole::Admin | ActorRole::System => {}
        }
        let mut transition = Transition::to(order_id, target, actor);
        transition.note = note;
        self.machine.process(transition).await
    }
}
