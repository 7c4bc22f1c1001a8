use framework::redis::EventRouting;

#[derive(Debug, Clone, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct DriverAssignedEvent {
    pub order_id: uuid::Uuid,
    pub driver_id: uuid::Uuid,
    pub assigned_at: i64,
    pub estimated_delivery_time: Option<i64>,
}

framework::rkyv_message!(DriverAssignedEvent);

impl EventRouting for DriverAssignedEvent {
    const CHANNEL: &'static str = "ordering:driver_assigned";
}
