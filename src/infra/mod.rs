//! Infrastructure adapters: filesystem artifacts, HTTP surface and telemetry.

pub mod artifacts;
pub mod error;
pub mod http;
pub mod telemetry;
