use framework::redis::EventRouting;

#[derive(Debug, Clone, PartialEq, Eq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PickupCompletedEvent {
    pub order_id: uuid::Uuid,
    pub verified_by: uuid::Uuid,
    pub verified_at: i64,
}

framework::rkyv_message!(PickupCompletedEvent);

impl EventRouting for PickupCompletedEvent {
    const CHANNEL: &'static str = "ordering:pickup_completed";
}
