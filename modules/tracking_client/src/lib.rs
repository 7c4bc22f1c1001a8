#![forbid(unsafe_code, clippy::unwrap_used, clippy::panic, clippy::expect_used)]

//! Client side of order tracking: keeps one view of an order live over the tracking socket,
//! reconnecting with backoff and falling back to REST snapshots while the socket is down.

pub mod error;
pub mod session;
pub mod snapshot;
pub mod supervisor;
pub mod transport;
pub mod view;

pub use error::ClientError;
pub use session::{SessionCommand, SessionHandle, TrackingSession};
pub use snapshot::{RestSnapshotClient, SnapshotSource};
pub use transport::{Transport, WsTransport};
pub use supervisor::{ConnectionState, ConnectionSupervisor, ReconnectPolicy};
pub use view::TrackingView;
