#![forbid(unsafe_code, clippy::unwrap_used, clippy::panic, clippy::expect_used)]

pub mod config;
pub mod entities;
pub mod error;
pub mod events;
pub mod protocol;
pub mod rpc;
pub mod services;
pub mod store;
pub mod utils;
