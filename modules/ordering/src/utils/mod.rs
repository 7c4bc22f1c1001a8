pub mod geo;
pub mod pickup_code;
