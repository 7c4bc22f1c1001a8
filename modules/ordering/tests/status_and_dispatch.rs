mod common;

use common::{Fixture, customer, staff};
use framework::processor::Processor;
use ordering::config::FulfillmentConfig;
use ordering::entities::order::{FulfillmentType, ListDriverOrders, OrderStatus};
use ordering::error::FulfillmentError;
use ordering::events::OrderEvent;
use ordering::protocol::ServerMessage;
use ordering::services::dispatch::{Dispatch, ListAvailableDrivers};
use ordering::services::intake::CreateOrder;
use ordering::services::status_machine::{Transition, TransitionOutcome};
use ordering::store::FulfillmentStore;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn delivery_order_dispatches_to_least_busy_driver() {
    let mut config = FulfillmentConfig::default();
    config.dispatch.max_active_orders_per_driver = 2;
    let f = Fixture::with_config(config);

    // the idle driver came online last, so load has to beat seniority
    let busy_a = f.online_driver("Amina", 60).await;
    let busy_b = f.online_driver("Baraka", 50).await;
    let idle = f.online_driver("Chege", 5).await;
    f.order_on_the_road(customer(), &busy_a).await;
    f.order_on_the_road(customer(), &busy_b).await;

    let order = f.delivery_order(customer()).await;
    assert_eq!(order.status, OrderStatus::Pending);
    f.advance(order.id, &[OrderStatus::Processing, OrderStatus::Shipped])
        .await;

    let available = f.services.dispatch.process(ListAvailableDrivers).await.unwrap();
    let counts: Vec<_> = available.iter().map(|c| c.active_orders).collect();
    assert_eq!(counts, vec![0, 1, 1]);
    assert_eq!(available[0].driver.id, idle.id);

    let dispatched = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: None,
            actor: staff(),
        })
        .await
        .unwrap();
    assert_eq!(dispatched.status, OrderStatus::DriverAssigned);
    assert_eq!(dispatched.bound_driver(), Some(idle.id));
    let details = dispatched.delivery().unwrap();
    assert_eq!(details.driver.name, "Chege");
    assert!(details.estimated_delivery_time.is_some());
    assert_eq!(f.store.reservation_of(idle.id).await, None);

    let events = f.store.events().await;
    assert!(events.iter().any(|event| matches!(
        event,
        OrderEvent::DriverAssigned(assigned) if assigned.order_id == order.id && assigned.driver_id == idle.id
    )));
}

#[tokio::test]
async fn oldest_online_driver_wins_a_tie() {
    let f = Fixture::new();
    let newer = f.online_driver("Newer", 1).await;
    let older = f.online_driver("Older", 90).await;
    let order = f.shipped_order(customer()).await;

    let dispatched = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: None,
            actor: staff(),
        })
        .await
        .unwrap();
    assert_eq!(dispatched.bound_driver(), Some(older.id));
    assert_ne!(dispatched.bound_driver(), Some(newer.id));
}

#[tokio::test]
async fn history_stays_ordered_and_ends_with_current_status() {
    let f = Fixture::new();
    let driver = f.online_driver("Dalia", 10).await;
    let order = f.order_on_the_road(customer(), &driver).await;
    let order = f
        .advance(order.id, &[OrderStatus::Nearby, OrderStatus::Delivered])
        .await;

    let history = order.history();
    let statuses: Vec<_> = history.iter().map(|entry| entry.status).collect();
    assert_eq!(
        statuses,
        vec![
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::DriverAssigned,
            OrderStatus::OutForDelivery,
            OrderStatus::Nearby,
            OrderStatus::Delivered,
        ]
    );
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(history.last().map(|entry| entry.status), Some(order.status));
}

#[tokio::test]
async fn resubmitting_current_status_is_a_no_op() {
    let f = Fixture::new();
    let order = f.delivery_order(customer()).await;
    let first = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Processing, staff()))
        .await
        .unwrap();
    let second = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Processing, staff()))
        .await
        .unwrap();
    assert!(matches!(first, TransitionOutcome::Applied(_)));
    assert!(matches!(second, TransitionOutcome::Unchanged(_)));
    assert_eq!(first.order().history().len(), second.order().history().len());
}

#[tokio::test]
async fn skipping_ahead_is_rejected_without_side_effects() {
    let f = Fixture::new();
    let order = f.delivery_order(customer()).await;
    let err = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Shipped, staff()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Shipped
        }
    ));
    let stored = f.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.history().len(), 1);
}

#[tokio::test]
async fn pickup_orders_reject_delivery_states() {
    let f = Fixture::new();
    let order = f
        .services
        .intake
        .process(CreateOrder {
            user_id: customer().id,
            fulfillment_type: FulfillmentType::Pickup,
            delivery_address: None,
            pickup_location: Some("Main street store".to_owned()),
            pickup_instructions: None,
        })
        .await
        .unwrap();
    assert!(order.pickup_verification_code.as_deref().is_some_and(|c| c.starts_with("PICK")));
    f.advance(order.id, &[OrderStatus::Processing]).await;

    let err = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Shipped, staff()))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
    // picked_up is reserved for the verification flow
    let err = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::PickedUp, staff()))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
    assert_eq!(f.order(order.id).await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn terminal_orders_stay_terminal() {
    let f = Fixture::new();
    let order = f.delivery_order(customer()).await;
    f.advance(order.id, &[OrderStatus::Cancelled]).await;
    let err = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Processing, staff()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::TerminalState(OrderStatus::Cancelled)
    ));
}

#[tokio::test]
async fn lost_write_is_retried_once() {
    let f = Fixture::new();
    let order = f.delivery_order(customer()).await;

    f.store.fail_next_status_writes(1).await;
    let outcome = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Processing, staff()))
        .await
        .unwrap();
    assert!(matches!(outcome, TransitionOutcome::Applied(_)));

    f.store.fail_next_status_writes(2).await;
    let err = f
        .services
        .machine
        .process(Transition::to(order.id, OrderStatus::Shipped, staff()))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::ConcurrentModification));
    assert_eq!(f.order(order.id).await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn empty_pool_leaves_order_shipped() {
    let f = Fixture::new();
    let order = f.shipped_order(customer()).await;
    let err = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: None,
            actor: staff(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::NoDriverAvailable));
    assert_eq!(f.order(order.id).await.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn explicit_driver_must_still_be_free() {
    let f = Fixture::new();
    let driver = f.online_driver("Esther", 10).await;
    f.order_on_the_road(customer(), &driver).await;
    let order = f.shipped_order(customer()).await;

    let err = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: Some(driver.id),
            actor: staff(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::DriverUnavailable(id) if id == driver.id));

    use ordering::services::dispatch::SetPresence;
    let other = f.online_driver("Faith", 10).await;
    f.services
        .dispatch
        .process(SetPresence {
            driver_id: other.id,
            online: false,
        })
        .await
        .unwrap();
    let err = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: Some(other.id),
            actor: staff(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::DriverUnavailable(_)));
    assert_eq!(f.order(order.id).await.status, OrderStatus::Shipped);
}

#[tokio::test]
async fn dispatch_requires_shipped() {
    let f = Fixture::new();
    f.online_driver("Gitau", 10).await;
    let order = f.delivery_order(customer()).await;
    let err = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: None,
            actor: staff(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FulfillmentError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::DriverAssigned
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn racing_dispatches_bind_exactly_one_driver() {
    let f = Fixture::new();
    let first = f.online_driver("Halima", 30).await;
    let second = f.online_driver("Imani", 20).await;
    let order = f.shipped_order(customer()).await;
    f.store
        .delay_status_writes(Some(Duration::from_millis(50)))
        .await;

    let request = Dispatch {
        order_id: order.id,
        driver_id: None,
        actor: staff(),
    };
    let (a, b) = tokio::join!(
        f.services.dispatch.process(request),
        f.services.dispatch.process(request)
    );

    let wins = [&a, &b].iter().filter(|result| result.is_ok()).count();
    assert_eq!(wins, 1, "{a:?} / {b:?}");
    let stored = f.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::DriverAssigned);
    assert_eq!(
        stored
            .history()
            .iter()
            .filter(|entry| entry.status == OrderStatus::DriverAssigned)
            .count(),
        1
    );
    let bound = stored.bound_driver().unwrap();
    assert!(bound == first.id || bound == second.id);
    assert_eq!(f.store.reservation_of(first.id).await, None);
    assert_eq!(f.store.reservation_of(second.id).await, None);
}

#[tokio::test(start_paused = true)]
async fn stalled_dispatch_times_out_and_frees_driver() {
    let f = Fixture::new();
    let driver = f.online_driver("Juma", 10).await;
    let order = f.shipped_order(customer()).await;
    f.store
        .delay_driver_counts(Some(Duration::from_secs(60)))
        .await;

    let err = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: Some(driver.id),
            actor: staff(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::DispatchTimedOut));
    assert_eq!(f.store.reservation_of(driver.id).await, None);
    assert_eq!(f.order(order.id).await.status, OrderStatus::Shipped);
    assert!(f.store.events().await.iter().all(|event| !matches!(
        event,
        OrderEvent::DriverAssigned(_)
    )));

    f.store.delay_driver_counts(None).await;
    let available = f.services.dispatch.process(ListAvailableDrivers).await.unwrap();
    assert_eq!(available.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_assignment_write_still_lands_and_is_announced() {
    let f = Fixture::new();
    let driver = f.online_driver("Kioko", 10).await;
    let owner = customer();
    let order = f.shipped_order(owner).await;
    let (id, tx, mut rx) = f.services.channel.subscriber();
    f.services.tracking.join(order.id, owner, id, tx).await.unwrap();
    // longer than the 15s reservation
    f.store
        .delay_status_writes(Some(Duration::from_secs(60)))
        .await;

    let bound = f
        .services
        .dispatch
        .process(Dispatch {
            order_id: order.id,
            driver_id: Some(driver.id),
            actor: staff(),
        })
        .await
        .unwrap();
    assert_eq!(bound.status, OrderStatus::DriverAssigned);
    assert_eq!(bound.bound_driver(), Some(driver.id));
    assert_eq!(f.order(order.id).await.status, OrderStatus::DriverAssigned);

    let events = f.store.events().await;
    assert!(events.iter().any(|event| matches!(
        event,
        OrderEvent::StatusChanged(changed)
            if changed.order_id == order.id && changed.new_status == OrderStatus::DriverAssigned
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        OrderEvent::DriverAssigned(assigned) if assigned.driver_id == driver.id
    )));
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    assert!(messages.iter().any(|message| matches!(
        message,
        ServerMessage::StatusUpdated(update) if update.status == OrderStatus::DriverAssigned
    )));
    assert_eq!(f.store.reservation_of(driver.id).await, None);
}

#[tokio::test(start_paused = true)]
async fn orders_racing_for_one_driver_bind_it_once() {
    let f = Fixture::new();
    let driver = f.online_driver("Lerato", 10).await;
    let first = f.shipped_order(customer()).await;
    let second = f.shipped_order(customer()).await;
    f.store
        .delay_status_writes(Some(Duration::from_millis(50)))
        .await;

    let dispatch = |order_id| Dispatch {
        order_id,
        driver_id: None,
        actor: staff(),
    };
    let (a, b) = tokio::join!(
        f.services.dispatch.process(dispatch(first.id)),
        f.services.dispatch.process(dispatch(second.id))
    );

    let (winner, loser) = match (&a, &b) {
        (Ok(_), Err(e)) => (first.id, (second.id, e)),
        (Err(e), Ok(_)) => (second.id, (first.id, e)),
        _ => panic!("exactly one dispatch must win: {a:?} / {b:?}"),
    };
    assert!(matches!(loser.1, FulfillmentError::NoDriverAvailable));
    assert_eq!(f.order(winner).await.bound_driver(), Some(driver.id));
    let lost = f.order(loser.0).await;
    assert_eq!(lost.status, OrderStatus::Shipped);
    assert_eq!(lost.bound_driver(), None);
    assert_eq!(
        f.store.driver_active_order_count(driver.id).await.unwrap(),
        1
    );
    assert_eq!(f.store.reservation_of(driver.id).await, None);
}

fn driver_orders(driver_id: Uuid, active: bool, limit: i64, offset: i64) -> ListDriverOrders {
    ListDriverOrders {
        driver_id,
        active,
        limit,
        offset,
    }
}

#[tokio::test]
async fn driver_sees_active_then_finished_orders() {
    let f = Fixture::new();
    let driver = f.online_driver("Mosi", 10).await;
    let other = f.online_driver("Nala", 10).await;
    let first = f.order_on_the_road(customer(), &driver).await;

    let active = f
        .services
        .dispatch
        .process(driver_orders(driver.id, true, 10, 0))
        .await
        .unwrap();
    assert_eq!(active.iter().map(|o| o.id).collect::<Vec<_>>(), vec![first.id]);
    assert!(f
        .services
        .dispatch
        .process(driver_orders(driver.id, false, 10, 0))
        .await
        .unwrap()
        .is_empty());
    assert!(f
        .services
        .dispatch
        .process(driver_orders(other.id, true, 10, 0))
        .await
        .unwrap()
        .is_empty());

    f.advance(first.id, &[OrderStatus::Nearby, OrderStatus::Delivered])
        .await;
    let second = f.order_on_the_road(customer(), &driver).await;
    f.advance(second.id, &[OrderStatus::Cancelled]).await;

    assert!(f
        .services
        .dispatch
        .process(driver_orders(driver.id, true, 10, 0))
        .await
        .unwrap()
        .is_empty());
    let history = f
        .services
        .dispatch
        .process(driver_orders(driver.id, false, 10, 0))
        .await
        .unwrap();
    let mut ids: Vec<Uuid> = history.iter().map(|o| o.id).collect();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);

    let page = f
        .services
        .dispatch
        .process(driver_orders(driver.id, false, 1, 1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, history[1].id);

    let err = f
        .services
        .dispatch
        .process(driver_orders(driver.id, false, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InvalidInput(_)));
}
