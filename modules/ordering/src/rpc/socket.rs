//! Tracking rooms and the staff pickup feed over WebSocket. One queue per connection; every
//! joined room feeds it.

use crate::entities::order::Actor;
use crate::error::FulfillmentError;
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::rpc::AppState;
use crate::rpc::middleware::CurrentActor;
use crate::services::location_channel::{Subscriber, SubscriberId};
use crate::store::FulfillmentStore;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

pub async fn tracking_socket<S: FulfillmentStore + Clone>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
    CurrentActor(actor): CurrentActor,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state, actor))
}

fn report(subscriber: &Subscriber, error: &FulfillmentError) {
    let message = ServerMessage::Error(ProtocolError {
        code: error.code().to_owned(),
        message: error.to_string(),
    });
    if subscriber.try_send(message).is_err() {
        debug!("Dropped error frame for a saturated connection");
    }
}

async fn handle_frame<S: FulfillmentStore + Clone>(
    state: &AppState<S>,
    actor: Actor,
    subscriber_id: SubscriberId,
    subscriber: &Subscriber,
    frame: ClientMessage,
) -> Result<(), FulfillmentError> {
    let tracking = &state.services.tracking;
    match frame {
        ClientMessage::JoinOrderRoom { order_id } => {
            tracking
                .join(order_id, actor, subscriber_id, subscriber.clone())
                .await?;
        }
        ClientMessage::LeaveOrderRoom { order_id } => {
            tracking.leave(order_id, subscriber_id).await;
        }
        ClientMessage::UpdateLocation { order_id, location } => {
            tracking.driver_ping(order_id, actor, location).await?;
        }
        ClientMessage::JoinPickupFeed => {
            tracking
                .join_pickup_feed(actor, subscriber_id, subscriber.clone())
                .await?;
        }
        ClientMessage::LeavePickupFeed => {
            tracking.channel().leave_pickup_feed(subscriber_id).await;
        }
    }
    Ok(())
}

async fn serve_socket<S: FulfillmentStore + Clone>(socket: WebSocket, state: AppState<S>, actor: Actor) {
    let channel = state.services.tracking.channel().clone();
    let (subscriber_id, subscriber, mut outbox) = channel.subscriber();
    let (mut sink, mut stream) = socket.split();
    info!(monotonic_counter.socket_connected = 1);
    debug!(subscriber_id, actor = %actor.id, "Tracking socket opened");

    let writer = async {
        while let Some(message) = outbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode server message: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(Ok(frame)) = stream.next().await {
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(frame) => {
                    if let Err(e) =
                        handle_frame(&state, actor, subscriber_id, &subscriber, frame).await
                    {
                        report(&subscriber, &e);
                    }
                }
                Err(e) => {
                    debug!("Malformed client frame: {e}");
                    report(
                        &subscriber,
                        &FulfillmentError::InvalidInput("malformed frame"),
                    )
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }
    // a vanished client must not stay in any room
    channel.leave_all(subscriber_id).await;
    debug!(subscriber_id, "Tracking socket closed");
}
