//! gRPC service implementation and shutdown coordination.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`FarmService`).
//! - [`state`] - in-flight call accounting and the shared shutdown token.

pub mod handler;
pub mod state;
