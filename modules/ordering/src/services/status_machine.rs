use crate::entities::order::{
    Actor, ConditionalUpdateStatus, FulfillmentType, Order, OrderStatus, StatusHistoryEntry,
    StatusPatch,
};
use crate::error::FulfillmentError;
use crate::events::order::OrderStatusChangedEvent;
use crate::services::location_channel::LocationChannel;
use crate::store::FulfillmentStore;
use framework::processor::Processor;
use std::future::Future;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Whether `to` directly follows `from` for this kind of order. `cancelled` follows every
/// non-terminal state.
pub fn is_allowed(kind: FulfillmentType, from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    if from.is_terminal() {
        return false;
    }
    if to == Cancelled {
        return true;
    }
    match kind {
        FulfillmentType::Delivery => matches!(
            (from, to),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, DriverAssigned)
                | (DriverAssigned, OutForDelivery)
                | (OutForDelivery, Nearby)
                | (Nearby, Delivered)
        ),
        FulfillmentType::Pickup => matches!(
            (from, to),
            (Pending, Processing)
                | (Processing, ReadyForPickup)
                | (Processing, PickedUp)
                | (ReadyForPickup, PickedUp)
        ),
    }
}

fn check_transition(
    order: &Order,
    to: OrderStatus,
    patch: &StatusPatch,
) -> Result<(), FulfillmentError> {
    if order.status.is_terminal() {
        return Err(FulfillmentError::TerminalState(order.status));
    }
    let invalid = FulfillmentError::InvalidTransition {
        from: order.status,
        to,
    };
    if !is_allowed(order.fulfillment_type, order.status, to) {
        return Err(invalid);
    }
    // binding a driver and verifying a pickup only happen together with their data
    let patch_fits = match (to, patch) {
        (OrderStatus::DriverAssigned, StatusPatch::AssignDriver(_)) => true,
        (OrderStatus::PickedUp, StatusPatch::PickupVerified { .. }) => true,
        (OrderStatus::DriverAssigned | OrderStatus::PickedUp, _) => false,
        (_, StatusPatch::None) => true,
        (_, _) => false,
    };
    if !patch_fits {
        return Err(invalid);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub order_id: Uuid,
    pub target: OrderStatus,
    pub actor: Actor,
    pub note: Option<String>,
    pub patch: StatusPatch,
    /// Latest moment the conditional write may be issued. Reads and checks before it are
    /// abandoned once it passes, the write and its announcement never are.
    pub write_deadline: Option<Instant>,
}

impl Transition {
    pub fn to(order_id: Uuid, target: OrderStatus, actor: Actor) -> Self {
        Self {
            order_id,
            target,
            actor,
            note: None,
            patch: StatusPatch::None,
            write_deadline: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_patch(mut self, patch: StatusPatch) -> Self {
        self.patch = patch;
        self
    }

    pub fn with_write_deadline(mut self, deadline: Instant) -> Self {
        self.write_deadline = Some(deadline);
        self
    }

    fn deadline_passed(&self) -> bool {
        self.write_deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(Order),
    /// The order already was in the target status; nothing was written.
    Unchanged(Order),
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            TransitionOutcome::Applied(order) | TransitionOutcome::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            TransitionOutcome::Applied(order) | TransitionOutcome::Unchanged(order) => order,
        }
    }
}

async fn within<T>(
    deadline: Option<Instant>,
    step: impl Future<Output = T>,
) -> Result<T, FulfillmentError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, step)
            .await
            .map_err(|_| FulfillmentError::DispatchTimedOut),
        None => Ok(step.await),
    }
}

/// The only writer of order status. Writes are conditional on the status read just before,
/// a lost race is retried once against the fresh order.
#[derive(Clone)]
pub struct StatusMachine<S> {
    store: S,
    channel: LocationChannel<S>,
}

impl<S: FulfillmentStore + Clone> StatusMachine<S> {
    pub fn new(store: S, channel: LocationChannel<S>) -> Self {
        Self { store, channel }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, FulfillmentError> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    async fn load_before(
        &self,
        order_id: Uuid,
        deadline: Option<Instant>,
    ) -> Result<Order, FulfillmentError> {
        within(deadline, self.load(order_id)).await?
    }

    async fn announce(&self, order: &Order) {
        self.channel.publish_status(order).await;
        if order.fulfillment_type == FulfillmentType::Pickup {
            self.channel.publish_pickup_status(order).await;
        }
        let event = OrderStatusChangedEvent {
            order_id: order.id,
            new_status: order.status,
            changed_at: order.last_history_timestamp().unwrap_or_else(framework::now_millis),
            history_len: order.history().len() as u32,
        };
        if let Err(e) = self.store.emit(event.into()).await {
            warn!(order_id = %order.id, "Failed to publish status event: {e}");
        }
    }
}

impl<S: FulfillmentStore + Clone> Processor<Transition> for StatusMachine<S> {
    type Output = TransitionOutcome;
    type Error = FulfillmentError;
    #[instrument(skip_all, err, fields(order_id = %input.order_id, to_status = %input.target))]
    async fn process(&self, input: Transition) -> Result<TransitionOutcome, FulfillmentError> {
        let mut order = self.load_before(input.order_id, input.write_deadline).await?;
        for attempt in 0..2 {
            if order.status == input.target {
                return Ok(TransitionOutcome::Unchanged(order));
            }
            check_transition(&order, input.target, &input.patch)?;
            let timestamp = order
                .last_history_timestamp()
                .map_or_else(framework::now_millis, |last| last.max(framework::now_millis()));
            let entry = StatusHistoryEntry {
                status: input.target,
                timestamp,
                actor: Some(input.actor),
                note: input.note.clone(),
                location: order.location().map(|location| location.point()),
            };
            let write = ConditionalUpdateStatus {
                order_id: order.id,
                expected_status: order.status,
                new_status: input.target,
                entry,
                patch: input.patch.clone(),
            };
            if input.deadline_passed() {
                return Err(FulfillmentError::DispatchTimedOut);
            }
            if let Some(updated) = self.store.conditional_update_status(write).await? {
                info!(monotonic_counter.status_transition = 1);
                self.announce(&updated).await;
                return Ok(TransitionOutcome::Applied(updated));
            }
            warn!(attempt, from = %order.status, "Conditional status write lost a race");
            if attempt == 0 {
                order = self.load_before(input.order_id, input.write_deadline).await?;
            }
        }
        Err(FulfillmentError::ConcurrentModification)
    }
}
