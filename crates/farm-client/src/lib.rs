#![doc = include_str!("../README.md")]

pub mod client;
pub mod config;
pub mod demo;
pub mod observer;

pub use client::{FarmClient, SummarizeCall};
pub use config::{ClientArgs, ClientConfig, ClientSecurity};
pub use observer::LoggingObserver;
