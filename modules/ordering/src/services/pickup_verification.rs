use crate::entities::order::{
    Actor, FulfillmentType, ListPendingPickups, Order, OrderStatus, StatusPatch,
};
use crate::error::FulfillmentError;
use crate::events::pickup::PickupCompletedEvent;
use crate::services::status_machine::{StatusMachine, Transition, TransitionOutcome};
use crate::store::FulfillmentStore;
use framework::processor::Processor;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Read-only lookup of the order a customer's pickup code belongs to.
#[derive(Debug, Clone)]
pub struct VerifyPickupCode {
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct CompletePickup {
    pub order_id: Uuid,
    pub code: String,
    pub staff: Actor,
}

#[derive(Clone)]
pub struct PickupVerification<S> {
    store: S,
    machine: StatusMachine<S>,
}

impl<S: FulfillmentStore + Clone> PickupVerification<S> {
    pub fn new(store: S, machine: StatusMachine<S>) -> Self {
        Self { store, machine }
    }
}

impl<S: FulfillmentStore + Clone> Processor<VerifyPickupCode> for PickupVerification<S> {
    type Output = Order;
    type Error = FulfillmentError;
    #[instrument(skip_all, err)]
    async fn process(&self, input: VerifyPickupCode) -> Result<Order, FulfillmentError> {
        let code = input.code.trim().to_owned();
        if code.is_empty() {
            return Err(FulfillmentError::CodeNotFound);
        }
        let Some(order) = self.store.find_order_by_pickup_code(code).await? else {
            return Err(FulfillmentError::CodeNotFound);
        };
        match order.status {
            OrderStatus::PickedUp => Err(FulfillmentError::AlreadyUsed),
            OrderStatus::Cancelled => Err(FulfillmentError::CodeNotFound),
            _ => Ok(order),
        }
    }
}

impl<S: FulfillmentStore + Clone> Processor<ListPendingPickups> for PickupVerification<S> {
    type Output = Vec<Order>;
    type Error = FulfillmentError;
    #[instrument(skip_all, err)]
    async fn process(&self, _: ListPendingPickups) -> Result<Vec<Order>, FulfillmentError> {
        Ok(self.store.list_pending_pickups().await?)
    }
}

impl<S: FulfillmentStore + Clone> Processor<CompletePickup> for PickupVerification<S> {
    type Output = Order;
    type Error = FulfillmentError;
    #[instrument(skip_all, err, fields(order_id = %input.order_id, staff = %input.staff.id))]
    async fn process(&self, input: CompletePickup) -> Result<Order, FulfillmentError> {
        if !input.staff.is_staff() {
            return Err(FulfillmentError::Unauthorized);
        }
        let order = self
            .store
            .get_order(input.order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(input.order_id))?;
        if order.fulfillment_type != FulfillmentType::Pickup {
            return Err(FulfillmentError::InvalidTransition {
                from: order.status,
                to: OrderStatus::PickedUp,
            });
        }
        if order.pickup_verification_code.as_deref() != Some(input.code.trim()) {
            return Err(FulfillmentError::CodeMismatch);
        }
        if order.status == OrderStatus::PickedUp {
            return Err(FulfillmentError::AlreadyUsed);
        }
        if order.status.is_terminal() {
            return Err(FulfillmentError::TerminalState(order.status));
        }

        let verified_at = framework::now_time();
        let transition = Transition::to(order.id, OrderStatus::PickedUp, input.staff)
            .with_note("Picked up in store")
            .with_patch(StatusPatch::PickupVerified {
                by: input.staff.id,
                at: verified_at,
            });
        match self.machine.process(transition).await? {
            TransitionOutcome::Applied(order) => {
                info!(monotonic_counter.pickup_completed = 1);
                let event = PickupCompletedEvent {
                    order_id: order.id,
                    verified_by: input.staff.id,
                    verified_at: framework::unix_millis(verified_at),
                };
                if let Err(e) = self.store.emit(event.into()).await {
                    warn!(order_id = %order.id, "Failed to publish pickup event: {e}");
                }
                Ok(order)
            }
            // another staff session completed it between our read and our write
            TransitionOutcome::Unchanged(_) => Err(FulfillmentError::AlreadyUsed),
        }
    }
}
