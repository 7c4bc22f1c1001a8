use crate::config::PickupConfig;
use crate::entities::order::{
    Actor, ActorRole, FulfillmentType, GeoPoint, InsertOrder, Order, OrderStatus,
    StatusHistoryEntry,
};
use crate::error::FulfillmentError;
use crate::services::location_channel::LocationChannel;
use crate::store::FulfillmentStore;
use crate::utils::pickup_code::generate_pickup_code;
use framework::processor::Processor;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const PICKUP_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Uuid,
    pub fulfillment_type: FulfillmentType,
    pub delivery_address: Option<GeoPoint>,
    pub pickup_location: Option<String>,
    pub pickup_instructions: Option<String>,
}

/// Creates orders in `pending`. Pickup orders receive their one and only verification code here
/// and are announced on the staff pickup feed.
#[derive(Clone)]
pub struct OrderIntake<S> {
    store: S,
    channel: LocationChannel<S>,
    config: PickupConfig,
}

impl<S: FulfillmentStore + Clone> OrderIntake<S> {
    pub fn new(store: S, channel: LocationChannel<S>, config: PickupConfig) -> Self {
        Self {
            store,
            channel,
            config,
        }
    }
}

impl<S: FulfillmentStore + Clone> Processor<CreateOrder> for OrderIntake<S> {
    type Output = Order;
    type Error = FulfillmentError;
    #[instrument(skip_all, err, fields(user_id = %input.user_id))]
    async fn process(&self, input: CreateOrder) -> Result<Order, FulfillmentError> {
        let (delivery_address, pickup_location, pickup_instructions) = match input.fulfillment_type
        {
            FulfillmentType::Delivery => {
                let Some(address) = input.delivery_address.filter(GeoPoint::is_valid) else {
                    return Err(FulfillmentError::InvalidInput(
                        "delivery orders need a valid delivery address",
                    ));
                };
                (Some(address), None, None)
            }
            FulfillmentType::Pickup => (None, input.pickup_location, input.pickup_instructions),
        };
        let order_id = Uuid::new_v4();
        let initial_entry = StatusHistoryEntry {
            status: OrderStatus::Pending,
            timestamp: framework::now_millis(),
            actor: Some(Actor {
                id: input.user_id,
                role: ActorRole::Customer,
            }),
            note: Some("Order placed".to_owned()),
            location: None,
        };
        let attempts = match input.fulfillment_type {
            FulfillmentType::Delivery => 1,
            FulfillmentType::Pickup => PICKUP_CODE_ATTEMPTS,
        };
        for _ in 0..attempts {
            let pickup_verification_code = match input.fulfillment_type {
                FulfillmentType::Delivery => None,
                FulfillmentType::Pickup => Some(generate_pickup_code(
                    &self.config.code_prefix,
                    framework::now_millis(),
                )),
            };
            let insert = InsertOrder {
                id: order_id,
                user_id: input.user_id,
                fulfillment_type: input.fulfillment_type,
                initial_entry: initial_entry.clone(),
                delivery_address,
                pickup_location: pickup_location.clone(),
                pickup_instructions: pickup_instructions.clone(),
                pickup_verification_code,
            };
            if let Some(order) = self.store.insert_order(insert).await? {
                info!(monotonic_counter.order_created = 1);
                if order.fulfillment_type == FulfillmentType::Pickup {
                    self.channel.publish_new_pickup(&order).await;
                }
                return Ok(order);
            }
            warn!(%order_id, "Order insert conflicted, generating another pickup code");
        }
        Err(framework::Error::BusinessPanic(anyhow::anyhow!(
            "could not allocate a unique pickup code for order {order_id}"
        ))
        .into())
    }
}
