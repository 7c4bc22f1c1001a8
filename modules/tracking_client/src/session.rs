//! Runs a [`ConnectionSupervisor`] against a real transport and snapshot source.

use crate::supervisor::{
    ConnectionState, ConnectionSupervisor, ReconnectPolicy, SupervisorAction, SupervisorEvent,
};
use crate::snapshot::SnapshotSource;
use crate::transport::Transport;
use crate::view::TrackingView;
use ordering::protocol::ClientMessage;
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    NetworkOffline,
    NetworkOnline,
    Retry,
    Stop,
}

pub struct TrackingSession<T, R> {
    transport: T,
    snapshots: R,
    supervisor: ConnectionSupervisor,
    view: TrackingView,
    updates: watch::Sender<TrackingView>,
    commands: mpsc::Receiver<SessionCommand>,
    retry_at: Option<Instant>,
    stale_at: Option<Instant>,
}

/// Owned by the tracking screen. Dropping it stops the session, which leaves the room.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<TrackingView>,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn view(&self) -> watch::Receiver<TrackingView> {
        self.view.clone()
    }

    pub async fn send(&self, command: SessionCommand) {
        if self.commands.send(command).await.is_err() {
            debug!("Tracking session already finished");
        }
    }

    /// Stops the session and waits until it has left the room.
    pub async fn stop(mut self) {
        self.send(SessionCommand::Stop).await;
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("Tracking session task failed: {e}");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            // the session also stops when the command channel closes
            let _ = self.commands.try_send(SessionCommand::Stop);
        }
    }
}

impl<T, R> TrackingSession<T, R>
where
    T: Transport + 'static,
    R: SnapshotSource + 'static,
{
    pub fn new(
        order_id: Uuid,
        transport: T,
        snapshots: R,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Sender<SessionCommand>, watch::Receiver<TrackingView>) {
        let view = TrackingView::new(order_id);
        let (updates, view_rx) = watch::channel(view.clone());
        let (command_tx, commands) = mpsc::channel(16);
        let session = Self {
            transport,
            snapshots,
            supervisor: ConnectionSupervisor::new(order_id, policy),
            view,
            updates,
            commands,
            retry_at: None,
            stale_at: None,
        };
        (session, command_tx, view_rx)
    }

    pub fn spawn(order_id: Uuid, transport: T, snapshots: R, policy: ReconnectPolicy) -> SessionHandle {
        let (session, commands, view) = Self::new(order_id, transport, snapshots, policy);
        let task = tokio::spawn(session.run());
        SessionHandle {
            commands,
            view,
            task: Some(task),
        }
    }

    fn publish(&self) {
        self.updates.send_replace(self.view.clone());
    }

    async fn execute(&mut self, action: SupervisorAction) -> Option<SupervisorEvent> {
        let order_id = self.supervisor.order_id();
        match action {
            SupervisorAction::Connect => {
                let timeout = self.supervisor.policy().connect_timeout;
                match tokio::time::timeout(timeout, self.transport.connect()).await {
                    Ok(Ok(())) => return Some(SupervisorEvent::Connected),
                    Ok(Err(e)) => debug!("Connect failed: {e}"),
                    Err(_) => debug!("Connect timed out"),
                }
                self.view.last_error = Some("NETWORK_ERROR".to_owned());
                self.publish();
                return Some(SupervisorEvent::ConnectFailed);
            }
            SupervisorAction::Join(order_id) => {
                if let Err(e) = self
                    .transport
                    .send(ClientMessage::JoinOrderRoom { order_id })
                    .await
                {
                    debug!("Join failed: {e}");
                    return Some(SupervisorEvent::Disconnected { by_client: false });
                }
            }
            SupervisorAction::Leave(order_id) => {
                if let Err(e) = self
                    .transport
                    .send(ClientMessage::LeaveOrderRoom { order_id })
                    .await
                {
                    debug!("Leave failed: {e}");
                }
            }
            SupervisorAction::Close => self.transport.close().await,
            SupervisorAction::ScheduleRetry(delay) => self.retry_at = Some(Instant::now() + delay),
            SupervisorAction::ScheduleStaleCheck(delay) => {
                self.stale_at = Some(Instant::now() + delay)
            }
            SupervisorAction::FetchSnapshot => match self.snapshots.fetch(order_id).await {
                Ok(snapshot) => {
                    self.view.apply_snapshot(snapshot);
                    self.publish();
                }
                Err(e) => {
                    // keep whatever we had; it is already flagged when stale
                    self.view.last_error = Some(e.code().to_owned());
                    self.publish();
                }
            },
            SupervisorAction::MarkStale => {
                self.view.stale = true;
                self.publish();
            }
            SupervisorAction::MarkLive => {
                self.view.stale = false;
                self.view.unavailable = false;
                self.view.last_error = None;
                self.publish();
            }
            SupervisorAction::SurfaceUnavailable => {
                self.view.unavailable = true;
                self.publish();
            }
        }
        None
    }

    async fn dispatch(&mut self, event: SupervisorEvent) {
        let mut actions: VecDeque<_> = self.supervisor.handle(event).into();
        while let Some(action) = actions.pop_front() {
            if let Some(follow_up) = self.execute(action).await {
                actions.extend(self.supervisor.handle(follow_up));
            }
        }
    }

    fn command_event(command: Option<SessionCommand>) -> SupervisorEvent {
        match command {
            Some(SessionCommand::NetworkOffline) => SupervisorEvent::NetworkOffline,
            Some(SessionCommand::NetworkOnline) => SupervisorEvent::NetworkOnline,
            Some(SessionCommand::Retry) => SupervisorEvent::ManualRetry,
            Some(SessionCommand::Stop) | None => SupervisorEvent::Stop,
        }
    }

    pub async fn run(mut self) {
        info!(order_id = %self.supervisor.order_id(), "Tracking session started");
        self.dispatch(SupervisorEvent::Start).await;
        loop {
            let connected = self.supervisor.state() == ConnectionState::Connected;
            let retry_at = self.retry_at;
            let stale_at = self.stale_at;
            let event = tokio::select! {
                message = self.transport.next_message(), if connected => match message {
                    Some(message) => {
                        if self.view.apply(message) {
                            self.publish();
                        }
                        continue;
                    }
                    None => SupervisorEvent::Disconnected { by_client: false },
                },
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    SupervisorEvent::RetryTimerFired
                }
                _ = sleep_until(stale_at.unwrap_or_else(Instant::now)), if stale_at.is_some() => {
                    self.stale_at = None;
                    SupervisorEvent::StaleTimerFired
                }
                command = self.commands.recv() => Self::command_event(command),
            };
            let stopping = event == SupervisorEvent::Stop;
            self.dispatch(event).await;
            if stopping {
                break;
            }
        }
        info!(order_id = %self.supervisor.order_id(), "Tracking session stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use ordering::entities::order::{FulfillmentType, OrderStatus, StatusHistoryEntry};
    use ordering::protocol::{ServerMessage, StatusUpdate, TrackingSnapshot};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Script {
        sent: Arc<Mutex<Vec<ClientMessage>>>,
        connects: Arc<Mutex<u32>>,
        refuse: Arc<Mutex<bool>>,
    }

    struct FakeTransport {
        script: Script,
        inbound: mpsc::UnboundedReceiver<Option<ServerMessage>>,
        connected: bool,
    }

    impl Transport for FakeTransport {
        async fn connect(&mut self) -> Result<(), ClientError> {
            *self.script.connects.lock().unwrap() += 1;
            if *self.script.refuse.lock().unwrap() {
                return Err(ClientError::Network("refused".to_owned()));
            }
            self.connected = true;
            Ok(())
        }

        async fn send(&mut self, message: ClientMessage) -> Result<(), ClientError> {
            self.script.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn next_message(&mut self) -> Option<ServerMessage> {
            if !self.connected {
                return None;
            }
            match self.inbound.recv().await {
                Some(Some(message)) => Some(message),
                // `Some(None)` simulates the server dropping the connection
                Some(None) | None => {
                    self.connected = false;
                    None
                }
            }
        }

        async fn close(&mut self) {
            self.connected = false;
        }
    }

    struct FixedSnapshot(TrackingSnapshot);

    impl SnapshotSource for FixedSnapshot {
        async fn fetch(&self, _order_id: Uuid) -> Result<TrackingSnapshot, ClientError> {
            Ok(self.0.clone())
        }
    }

    fn entry(status: OrderStatus) -> StatusHistoryEntry {
        StatusHistoryEntry {
            status,
            timestamp: 0,
            actor: None,
            note: None,
            location: None,
        }
    }

    fn snapshot(order_id: Uuid) -> TrackingSnapshot {
        TrackingSnapshot {
            order_id,
            fulfillment_type: FulfillmentType::Delivery,
            status: OrderStatus::Shipped,
            status_history: vec![
                entry(OrderStatus::Pending),
                entry(OrderStatus::Processing),
                entry(OrderStatus::Shipped),
            ],
            current_location: None,
            delivery_address: None,
            delivery_details: None,
            distance: None,
            eta: None,
            duration_minutes: None,
            pickup_location: None,
            pickup_instructions: None,
            pickup_verification_code: None,
        }
    }

    fn joins(script: &Script, order_id: Uuid) -> usize {
        script
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| **m == ClientMessage::JoinOrderRoom { order_id })
            .count()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejoins_after_server_drop_and_leaves_on_stop() {
        let order_id = Uuid::new_v4();
        let script = Script::default();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let transport = FakeTransport {
            script: script.clone(),
            inbound,
            connected: false,
        };
        let handle = TrackingSession::spawn(
            order_id,
            transport,
            FixedSnapshot(snapshot(order_id)),
            ReconnectPolicy::default(),
        );
        let view = handle.view();
        settle().await;
        assert_eq!(joins(&script, order_id), 1);
        assert_eq!(
            view.borrow().snapshot.as_ref().map(|s| s.status),
            Some(OrderStatus::Shipped)
        );

        let mut history = snapshot(order_id).status_history;
        history.push(entry(OrderStatus::DriverAssigned));
        inbound_tx
            .send(Some(ServerMessage::StatusUpdated(StatusUpdate {
                order_id,
                status: OrderStatus::DriverAssigned,
                status_history: history,
            })))
            .unwrap();
        settle().await;
        assert_eq!(
            view.borrow().snapshot.as_ref().map(|s| s.status),
            Some(OrderStatus::DriverAssigned)
        );

        inbound_tx.send(None).unwrap();
        settle().await;
        assert_eq!(joins(&script, order_id), 1);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        settle().await;
        assert_eq!(joins(&script, order_id), 2);
        // the REST fallback must not roll back what the socket already delivered
        assert_eq!(
            view.borrow().snapshot.as_ref().map(|s| s.status),
            Some(OrderStatus::DriverAssigned)
        );

        handle.stop().await;
        let sent = script.sent.lock().unwrap().clone();
        assert_eq!(sent.last(), Some(&ClientMessage::LeaveOrderRoom { order_id }));
    }

    #[tokio::test(start_paused = true)]
    async fn marks_view_stale_and_gives_up() {
        let order_id = Uuid::new_v4();
        let script = Script::default();
        *script.refuse.lock().unwrap() = true;
        let (_inbound_tx, inbound) = mpsc::unbounded_channel();
        let transport = FakeTransport {
            script: script.clone(),
            inbound,
            connected: false,
        };
        let handle = TrackingSession::spawn(
            order_id,
            transport,
            FixedSnapshot(snapshot(order_id)),
            ReconnectPolicy::default(),
        );
        let view = handle.view();
        settle().await;
        assert!(!view.borrow().stale);
        assert_eq!(view.borrow().last_error.as_deref(), Some("NETWORK_ERROR"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert!(view.borrow().stale);
        // the last snapshot stays visible
        assert!(view.borrow().snapshot.is_some());

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert!(view.borrow().unavailable);
        assert_eq!(*script.connects.lock().unwrap(), 11);

        *script.refuse.lock().unwrap() = false;
        handle.send(SessionCommand::Retry).await;
        settle().await;
        assert_eq!(joins(&script, order_id), 1);
        let current = view.borrow().clone();
        assert!(!current.stale);
        assert!(!current.unavailable);
        handle.stop().await;
    }
}
