pub mod config;
pub mod error;
pub mod event;
pub mod telemetry;

pub use error::{EventBusError, GatewayError};
