use crate::entities::order::OrderStatus;
use framework::redis::EventRouting;

#[derive(Debug, Clone, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct OrderStatusChangedEvent {
    pub order_id: uuid::Uuid,
    pub new_status: OrderStatus,
    pub changed_at: i64,
    /// Length of the status history after the change, usable as a version number.
    pub history_len: u32,
}

framework::rkyv_message!(OrderStatusChangedEvent);

impl EventRouting for OrderStatusChangedEvent {
    const CHANNEL: &'static str = "ordering:order_status_changed";
}
