use crate::entities::order::OrderStatus;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FulfillmentError {
    #[error("Order {0} not found")]
    OrderNotFound(Uuid),
    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    #[error("Order is already {0}")]
    TerminalState(OrderStatus),
    #[error("Order was modified concurrently, reload and retry")]
    ConcurrentModification,
    #[error("No driver is available for dispatch")]
    NoDriverAvailable,
    #[error("Driver {0} not found")]
    DriverNotFound(Uuid),
    #[error("Driver {0} is no longer available")]
    DriverUnavailable(Uuid),
    #[error("Dispatch could not write the assignment before the driver reservation expired")]
    DispatchTimedOut,
    #[error("Actor is not allowed to perform this operation")]
    Unauthorized,
    #[error("Pickup code not found")]
    CodeNotFound,
    #[error("Pickup code has already been used")]
    AlreadyUsed,
    #[error("Pickup code does not match the order")]
    CodeMismatch,
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Framework(#[from] framework::Error),
}

impl FulfillmentError {
    /// Stable machine-readable code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            FulfillmentError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            FulfillmentError::InvalidTransition { .. } => "INVALID_TRANSITION",
            FulfillmentError::TerminalState(_) => "TERMINAL_STATE",
            FulfillmentError::ConcurrentModification => "CONCURRENT_MODIFICATION",
            FulfillmentError::NoDriverAvailable => "NO_DRIVER_AVAILABLE",
            FulfillmentError::DriverNotFound(_) => "DRIVER_NOT_FOUND",
            FulfillmentError::DriverUnavailable(_) => "DRIVER_UNAVAILABLE",
            FulfillmentError::DispatchTimedOut => "DISPATCH_TIMED_OUT",
            FulfillmentError::Unauthorized => "UNAUTHORIZED_ACCESS",
            FulfillmentError::CodeNotFound => "CODE_NOT_FOUND",
            FulfillmentError::AlreadyUsed => "ALREADY_USED",
            FulfillmentError::CodeMismatch => "CODE_MISMATCH",
            FulfillmentError::InvalidInput(_) => "INVALID_INPUT",
            FulfillmentError::Framework(_) => "SERVER_ERROR",
        }
    }
}
