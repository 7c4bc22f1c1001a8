//! Connection lifecycle of one tracking view as an explicit state machine.
//!
//! The supervisor does no I/O: it turns [`SupervisorEvent`]s into [`SupervisorAction`]s that
//! the session executes.

use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// How long the socket may be down before the view falls back to a REST snapshot.
    pub stale_after: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            max_attempts: 10,
            stale_after: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectPolicy {
    /// Doubling delay before reconnect attempt `attempt` (1-based), capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The device reported no network; nothing is attempted until it comes back.
    Offline,
    /// Retries are exhausted. Only a manual retry leaves this state.
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    Start,
    Connected,
    ConnectFailed,
    Disconnected { by_client: bool },
    RetryTimerFired,
    StaleTimerFired,
    NetworkOffline,
    NetworkOnline,
    ManualRetry,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Connect,
    Join(Uuid),
    Leave(Uuid),
    Close,
    ScheduleRetry(Duration),
    ScheduleStaleCheck(Duration),
    FetchSnapshot,
    MarkStale,
    MarkLive,
    SurfaceUnavailable,
}

#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    order_id: Uuid,
    policy: ReconnectPolicy,
    state: ConnectionState,
    /// Attempt number of the connect in flight; 0 for the first connect.
    attempt: u32,
    stale: bool,
}

impl ConnectionSupervisor {
    pub fn new(order_id: Uuid, policy: ReconnectPolicy) -> Self {
        Self {
            order_id,
            policy,
            state: ConnectionState::Idle,
            attempt: 0,
            stale: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn connect(&mut self, attempt: u32) -> Vec<SupervisorAction> {
        self.state = ConnectionState::Connecting;
        self.attempt = attempt;
        vec![SupervisorAction::Connect]
    }

    fn lost(&mut self, first_loss: bool) -> Vec<SupervisorAction> {
        let next = self.attempt + 1;
        if next > self.policy.max_attempts {
            self.state = ConnectionState::GaveUp;
            self.stale = true;
            return vec![
                SupervisorAction::MarkStale,
                SupervisorAction::SurfaceUnavailable,
            ];
        }
        self.state = ConnectionState::Reconnecting { attempt: next };
        let mut actions = vec![SupervisorAction::ScheduleRetry(self.policy.delay(next))];
        if first_loss {
            actions.push(SupervisorAction::ScheduleStaleCheck(self.policy.stale_after));
        }
        actions
    }

    pub fn handle(&mut self, event: SupervisorEvent) -> Vec<SupervisorAction> {
        use ConnectionState as S;
        use SupervisorAction as A;
        use SupervisorEvent as E;

        match (self.state, event) {
            (_, E::Stop) => {
                let mut actions = Vec::new();
                if self.state == S::Connected {
                    actions.push(A::Leave(self.order_id));
                }
                if self.state != S::Idle {
                    actions.push(A::Close);
                }
                self.state = S::Idle;
                self.attempt = 0;
                actions
            }
            (S::Idle, E::Start) => {
                let mut actions = vec![A::FetchSnapshot];
                actions.extend(self.connect(0));
                actions
            }
            (S::Connecting, E::Connected) => {
                self.state = S::Connected;
                self.attempt = 0;
                // rooms are not remembered across a transport reconnect
                let mut actions = vec![A::Join(self.order_id)];
                if self.stale {
                    self.stale = false;
                    actions.push(A::MarkLive);
                }
                actions
            }
            (S::Connecting, E::ConnectFailed) => {
                let first_loss = self.attempt == 0;
                self.lost(first_loss)
            }
            (S::Connected, E::Disconnected { by_client: true }) => {
                self.state = S::Idle;
                Vec::new()
            }
            (S::Connected, E::Disconnected { by_client: false }) => {
                self.attempt = 0;
                self.lost(true)
            }
            (S::Reconnecting { attempt }, E::RetryTimerFired) => self.connect(attempt),
            (S::Connected | S::Idle, E::StaleTimerFired) => Vec::new(),
            (_, E::StaleTimerFired) => {
                self.stale = true;
                vec![A::MarkStale, A::FetchSnapshot]
            }
            (S::Idle, E::NetworkOffline) => Vec::new(),
            (_, E::NetworkOffline) => {
                self.state = S::Offline;
                self.stale = true;
                vec![A::Close, A::MarkStale]
            }
            (S::Offline, E::NetworkOnline) => {
                let mut actions = vec![A::FetchSnapshot];
                actions.extend(self.connect(0));
                actions
            }
            (S::GaveUp, E::ManualRetry) => {
                let mut actions = vec![A::FetchSnapshot];
                actions.extend(self.connect(0));
                actions
            }
            // late timers and duplicate notifications
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SupervisorAction as A;
    use SupervisorEvent as E;

    fn started() -> (ConnectionSupervisor, Uuid) {
        let order_id = Uuid::new_v4();
        let mut supervisor = ConnectionSupervisor::new(order_id, ReconnectPolicy::default());
        assert_eq!(
            supervisor.handle(E::Start),
            vec![A::FetchSnapshot, A::Connect]
        );
        (supervisor, order_id)
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (1..=5).map(|attempt| policy.delay(attempt).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
        assert_eq!(policy.delay(40), policy.max_delay);
    }

    #[test]
    fn joins_on_every_connect() {
        let (mut supervisor, order_id) = started();
        assert_eq!(supervisor.handle(E::Connected), vec![A::Join(order_id)]);

        let actions = supervisor.handle(E::Disconnected { by_client: false });
        assert_eq!(
            actions,
            vec![
                A::ScheduleRetry(Duration::from_secs(1)),
                A::ScheduleStaleCheck(Duration::from_secs(5)),
            ]
        );
        assert_eq!(
            supervisor.state(),
            ConnectionState::Reconnecting { attempt: 1 }
        );
        assert_eq!(supervisor.handle(E::RetryTimerFired), vec![A::Connect]);
        assert_eq!(supervisor.handle(E::Connected), vec![A::Join(order_id)]);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[test]
    fn stale_while_down_then_live_again() {
        let (mut supervisor, order_id) = started();
        supervisor.handle(E::Connected);
        supervisor.handle(E::Disconnected { by_client: false });
        assert_eq!(
            supervisor.handle(E::StaleTimerFired),
            vec![A::MarkStale, A::FetchSnapshot]
        );
        assert!(supervisor.is_stale());
        supervisor.handle(E::RetryTimerFired);
        assert_eq!(
            supervisor.handle(E::Connected),
            vec![A::Join(order_id), A::MarkLive]
        );
        assert!(!supervisor.is_stale());
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let (mut supervisor, _) = started();
        supervisor.handle(E::Connected);
        supervisor.handle(E::Disconnected { by_client: false });
        for attempt in 1..10 {
            assert_eq!(supervisor.handle(E::RetryTimerFired), vec![A::Connect]);
            let actions = supervisor.handle(E::ConnectFailed);
            assert_eq!(
                supervisor.state(),
                ConnectionState::Reconnecting {
                    attempt: attempt + 1
                }
            );
            assert_eq!(
                actions,
                vec![A::ScheduleRetry(
                    ReconnectPolicy::default().delay(attempt + 1)
                )]
            );
        }
        supervisor.handle(E::RetryTimerFired);
        assert_eq!(
            supervisor.handle(E::ConnectFailed),
            vec![A::MarkStale, A::SurfaceUnavailable]
        );
        assert_eq!(supervisor.state(), ConnectionState::GaveUp);
        // stray timers do nothing once given up
        assert!(supervisor.handle(E::RetryTimerFired).is_empty());
        assert_eq!(
            supervisor.handle(E::ManualRetry),
            vec![A::FetchSnapshot, A::Connect]
        );
    }

    #[test]
    fn offline_waits_for_network() {
        let (mut supervisor, _) = started();
        supervisor.handle(E::Connected);
        assert_eq!(
            supervisor.handle(E::NetworkOffline),
            vec![A::Close, A::MarkStale]
        );
        assert_eq!(supervisor.state(), ConnectionState::Offline);
        assert!(supervisor.handle(E::RetryTimerFired).is_empty());
        assert_eq!(
            supervisor.handle(E::NetworkOnline),
            vec![A::FetchSnapshot, A::Connect]
        );
    }

    #[test]
    fn stop_leaves_the_room() {
        let (mut supervisor, order_id) = started();
        supervisor.handle(E::Connected);
        assert_eq!(
            supervisor.handle(E::Stop),
            vec![A::Leave(order_id), A::Close]
        );
        assert_eq!(supervisor.state(), ConnectionState::Idle);
        assert!(supervisor.handle(E::Stop).is_empty());
    }

    #[test]
    fn first_connect_failure_starts_backoff() {
        let (mut supervisor, _) = started();
        assert_eq!(
            supervisor.handle(E::ConnectFailed),
            vec![
                A::ScheduleRetry(Duration::from_secs(1)),
                A::ScheduleStaleCheck(Duration::from_secs(5)),
            ]
        );
    }
}
