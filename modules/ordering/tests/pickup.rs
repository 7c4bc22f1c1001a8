mod common;

use common::{Fixture, customer, staff};
use framework::processor::Processor;
use ordering::entities::order::{
    Actor, ActorRole, FulfillmentType, InsertOrder, ListPendingPickups, Order, OrderStatus,
    StatusHistoryEntry,
};
use ordering::error::FulfillmentError;
use ordering::protocol::ServerMessage;
use ordering::services::intake::CreateOrder;
use ordering::services::pickup_verification::{CompletePickup, VerifyPickupCode};
use ordering::store::FulfillmentStore;
use uuid::Uuid;

async fn pickup_order_with_code(f: &Fixture, code: &str) -> Order {
    let order = f
        .store
        .insert_order(InsertOrder {
            id: Uuid::new_v4(),
            user_id: customer().id,
            fulfillment_type: FulfillmentType::Pickup,
            initial_entry: StatusHistoryEntry {
                status: OrderStatus::Pending,
                timestamp: framework::now_millis(),
                actor: None,
                note: Some("Order placed".to_owned()),
                location: None,
            },
            delivery_address: None,
            pickup_location: Some("Westlands branch".to_owned()),
            pickup_instructions: Some("Counter 2".to_owned()),
            pickup_verification_code: Some(code.to_owned()),
        })
        .await
        .unwrap()
        .unwrap();
    f.advance(order.id, &[OrderStatus::Processing, OrderStatus::ReadyForPickup])
        .await
}

fn complete(order_id: Uuid, code: &str, staff: Actor) -> CompletePickup {
    CompletePickup {
        order_id,
        code: code.to_owned(),
        staff,
    }
}

#[tokio::test]
async fn verify_then_complete_once() {
    let f = Fixture::new();
    let order = pickup_order_with_code(&f, "ABC123").await;

    let found = f
        .services
        .pickup
        .process(VerifyPickupCode {
            code: "ABC123".to_owned(),
        })
        .await
        .unwrap();
    assert_eq!(found.id, order.id);
    // verification alone changes nothing
    assert_eq!(f.order(order.id).await, found);

    let counter = staff();
    let done = f
        .services
        .pickup
        .process(complete(order.id, "ABC123", counter))
        .await
        .unwrap();
    assert_eq!(done.status, OrderStatus::PickedUp);
    assert_eq!(done.pickup_verified_by, Some(counter.id));
    let verified_at = done.pickup_verified_at;
    assert!(verified_at.is_some());

    let err = f
        .services
        .pickup
        .process(complete(order.id, "ABC123", staff()))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::AlreadyUsed));

    let stored = f.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::PickedUp);
    assert_eq!(stored.pickup_verified_at, verified_at);
    assert_eq!(stored.pickup_verified_by, Some(counter.id));

    let err = f
        .services
        .pickup
        .process(VerifyPickupCode {
            code: "ABC123".to_owned(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::AlreadyUsed));
}

#[tokio::test]
async fn unknown_code_is_not_found() {
    let f = Fixture::new();
    pickup_order_with_code(&f, "ABC123").await;
    let err = f
        .services
        .pickup
        .process(VerifyPickupCode {
            code: "ZZZ999".to_owned(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::CodeNotFound));
}

#[tokio::test]
async fn cancelled_orders_hide_their_code() {
    let f = Fixture::new();
    let order = pickup_order_with_code(&f, "CAN001").await;
    f.advance(order.id, &[OrderStatus::Cancelled]).await;
    let err = f
        .services
        .pickup
        .process(VerifyPickupCode {
            code: "CAN001".to_owned(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::CodeNotFound));
}

#[tokio::test]
async fn wrong_code_does_not_complete() {
    let f = Fixture::new();
    let order = pickup_order_with_code(&f, "ABC123").await;
    let err = f
        .services
        .pickup
        .process(complete(order.id, "ABC124", staff()))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::CodeMismatch));
    let stored = f.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::ReadyForPickup);
    assert_eq!(stored.pickup_verified_at, None);
}

#[tokio::test]
async fn only_staff_complete_pickups() {
    let f = Fixture::new();
    let order = pickup_order_with_code(&f, "ABC123").await;
    let shopper = Actor {
        id: order.user_id,
        role: ActorRole::Customer,
    };
    let err = f
        .services
        .pickup
        .process(complete(order.id, "ABC123", shopper))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Unauthorized));
}

#[tokio::test]
async fn racing_staff_sessions_complete_once() {
    let f = Fixture::new();
    let order = pickup_order_with_code(&f, "RACE42").await;
    let (a, b) = tokio::join!(
        f.services.pickup.process(complete(order.id, "RACE42", staff())),
        f.services.pickup.process(complete(order.id, "RACE42", staff()))
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(FulfillmentError::AlreadyUsed)))
    );
    let stored = f.order(order.id).await;
    assert_eq!(
        stored
            .history()
            .iter()
            .filter(|entry| entry.status == OrderStatus::PickedUp)
            .count(),
        1
    );
}

#[tokio::test]
async fn pending_pickups_list_until_handed_over() {
    let f = Fixture::new();
    let first = pickup_order_with_code(&f, "PND001").await;
    let second = pickup_order_with_code(&f, "PND002").await;
    f.delivery_order(customer()).await;

    let pending = f.services.pickup.process(ListPendingPickups).await.unwrap();
    let mut ids: Vec<Uuid> = pending.iter().map(|order| order.id).collect();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);

    f.services
        .pickup
        .process(complete(first.id, "PND001", staff()))
        .await
        .unwrap();
    let pending = f.services.pickup.process(ListPendingPickups).await.unwrap();
    assert_eq!(
        pending.iter().map(|order| order.id).collect::<Vec<_>>(),
        vec![second.id]
    );
}

#[tokio::test]
async fn staff_feed_hears_new_and_updated_pickups() {
    let f = Fixture::new();
    let (id, tx, mut rx) = f.services.channel.subscriber();
    let err = f
        .services
        .tracking
        .join_pickup_feed(customer(), id, tx.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Unauthorized));
    assert_eq!(f.services.channel.rooms().pickup_feed_size().await, 0);
    f.services
        .tracking
        .join_pickup_feed(staff(), id, tx)
        .await
        .unwrap();

    let owner = customer();
    let order = f
        .services
        .intake
        .process(CreateOrder {
            user_id: owner.id,
            fulfillment_type: FulfillmentType::Pickup,
            delivery_address: None,
            pickup_location: Some("Westlands branch".to_owned()),
            pickup_instructions: None,
        })
        .await
        .unwrap();
    f.delivery_order(customer()).await;
    f.advance(order.id, &[OrderStatus::Processing]).await;

    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    assert!(matches!(
        messages.as_slice(),
        [
            ServerMessage::NewPickupOrder(placed),
            ServerMessage::PickupStatusUpdated(updated),
        ] if placed.order_id == order.id
            && placed.user_id == owner.id
            && placed.status == OrderStatus::Pending
            && updated.order_id == order.id
            && updated.status == OrderStatus::Processing
    ));

    f.services.channel.leave_all(id).await;
    assert_eq!(f.services.channel.rooms().pickup_feed_size().await, 0);
}
