#![allow(dead_code)]

use framework::processor::Processor;
use ordering::config::FulfillmentConfig;
use ordering::entities::driver::Driver;
use ordering::entities::order::{Actor, ActorRole, FulfillmentType, GeoPoint, Order, OrderStatus};
use ordering::services::FulfillmentServices;
use ordering::services::dispatch::Dispatch;
use ordering::services::intake::CreateOrder;
use ordering::services::status_machine::Transition;
use ordering::store::MemoryStore;
use uuid::Uuid;

pub const DESTINATION: GeoPoint = GeoPoint {
    lat: -1.2921,
    lng: 36.8219,
};

/// Roughly 5.5 km north of [`DESTINATION`].
pub const FAR_AWAY: GeoPoint = GeoPoint {
    lat: -1.2421,
    lng: 36.8219,
};

/// Roughly 220 m north of [`DESTINATION`].
pub const AROUND_THE_CORNER: GeoPoint = GeoPoint {
    lat: -1.2901,
    lng: 36.8219,
};

pub struct Fixture {
    pub store: MemoryStore,
    pub services: FulfillmentServices<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(FulfillmentConfig::default())
    }

    pub fn with_config(config: FulfillmentConfig) -> Self {
        let store = MemoryStore::new();
        let services = FulfillmentServices::new(store.clone(), config);
        Self { store, services }
    }

    pub async fn order(&self, order_id: Uuid) -> Order {
        use ordering::store::FulfillmentStore;
        self.store
            .get_order(order_id)
            .await
            .unwrap()
            .expect("order exists")
    }

    pub async fn delivery_order(&self, customer: Actor) -> Order {
        self.services
            .intake
            .process(CreateOrder {
                user_id: customer.id,
                fulfillment_type: FulfillmentType::Delivery,
                delivery_address: Some(DESTINATION),
                pickup_location: None,
                pickup_instructions: None,
            })
            .await
            .unwrap()
    }

    pub async fn advance(&self, order_id: Uuid, path: &[OrderStatus]) -> Order {
        let mut last = None;
        for status in path {
            let outcome = self
                .services
                .machine
                .process(Transition::to(order_id, *status, staff()))
                .await
                .unwrap();
            last = Some(outcome.into_order());
        }
        last.expect("non-empty path")
    }

    pub async fn shipped_order(&self, customer: Actor) -> Order {
        let order = self.delivery_order(customer).await;
        self.advance(order.id, &[OrderStatus::Processing, OrderStatus::Shipped])
            .await
    }

    /// A shipped order dispatched to `driver` and set out for delivery.
    pub async fn order_on_the_road(&self, customer: Actor, driver: &Driver) -> Order {
        let order = self.shipped_order(customer).await;
        self.services
            .dispatch
            .process(Dispatch {
                order_id: order.id,
                driver_id: Some(driver.id),
                actor: staff(),
            })
            .await
            .unwrap();
        self.advance(order.id, &[OrderStatus::OutForDelivery]).await
    }

    pub async fn online_driver(&self, name: &str, online_minutes_ago: i64) -> Driver {
        let driver = Driver {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            phone: Some("+254700000000".to_owned()),
            vehicle_type: Some("motorbike".to_owned()),
            online: true,
            online_since: Some(framework::now_time() - time::Duration::minutes(online_minutes_ago)),
            last_location: None,
        };
        self.store.insert_driver(driver.clone()).await;
        driver
    }
}

pub fn staff() -> Actor {
    Actor {
        id: Uuid::new_v4(),
        role: ActorRole::Staff,
    }
}

pub fn customer() -> Actor {
    Actor {
        id: Uuid::new_v4(),
        role: ActorRole::Customer,
    }
}

pub fn as_driver(driver: &Driver) -> Actor {
    Actor {
        id: driver.id,
        role: ActorRole::Driver,
    }
}
