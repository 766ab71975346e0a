#![doc = include_str!("../README.md")]

pub mod server;

pub use server::{
    config::{ChatPolicy, CliArgs, ServerConfig, TransportSecurity},
    lifecycle::{ServerHandle, shutdown_signal},
    service::handler::FarmService,
};
