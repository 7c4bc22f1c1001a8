#![forbid(unsafe_code, clippy::unwrap_used, clippy::panic, clippy::expect_used)]

pub mod config;
pub mod cron;
pub mod error;
pub mod processor;
pub mod redis;
pub mod sqlx;

pub use error::Error;

pub fn now_time() -> time::PrimitiveDateTime {
    let now = time::OffsetDateTime::now_utc();
    time::PrimitiveDateTime::new(now.date(), now.time())
}

/// Milliseconds since the unix epoch, the timestamp unit used in messages and history entries.
pub fn now_millis() -> i64 {
    unix_millis(now_time())
}

pub fn unix_millis(time: time::PrimitiveDateTime) -> i64 {
    (time.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
