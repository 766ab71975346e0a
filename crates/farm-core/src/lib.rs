#![doc = include_str!("../README.md")]

pub mod abort;
mod common;
pub mod interceptor;
pub mod session;
pub mod store;

pub use common::*;
