pub mod config;
pub mod lifecycle;
pub mod service;
pub mod streaming;
pub mod telemetry;
pub mod tls;
