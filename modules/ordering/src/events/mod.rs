use crate::events::delivery::DriverAssignedEvent;
use crate::events::order::OrderStatusChangedEvent;
use crate::events::pickup::PickupCompletedEvent;

pub mod delivery;
pub mod order;
pub mod pickup;

/// Every event the fulfillment services announce to the rest of the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    StatusChanged(OrderStatusChangedEvent),
    DriverAssigned(DriverAssignedEvent),
    PickupCompleted(PickupCompletedEvent),
}

impl From<OrderStatusChangedEvent> for OrderEvent {
    fn from(value: OrderStatusChangedEvent) -> Self {
        Self::StatusChanged(value)
    }
}

impl From<DriverAssignedEvent> for OrderEvent {
    fn from(value: DriverAssignedEvent) -> Self {
        Self::DriverAssigned(value)
    }
}

impl From<PickupCompletedEvent> for OrderEvent {
    fn from(value: PickupCompletedEvent) -> Self {
        Self::PickupCompleted(value)
    }
}
