//! Error types for the farm service.
//!
//! This module defines the central `Error` enum shared by the server, the
//! client and the core building blocks. It implements `From<Error>` for
//! `tonic::Status` so handlers can surface failures with a matching gRPC
//! status code.
//!
//! ## Error Cases
//! - `Load` / `Parse`: the dataset could not be read or decoded. Fatal at
//!   startup.
//! - `ChannelError`: an internal task-to-task channel closed unexpectedly.
//! - `InvalidRequest`: the request was malformed.
//! - `ServiceShutdown`: a call arrived while the service was draining.
//! - `Tls`: certificate or key material could not be read.
//! - `Transport`: connecting or serving failed at the HTTP/2 layer.
//! - `Status`: a call completed with a non-OK gRPC status.

use std::path::PathBuf;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the farm service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The dataset file could not be opened or read.
    #[error("Failed to read dataset {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The dataset was readable but is not a valid record database.
    #[error("Failed to parse dataset: {0}")]
    Parse(#[from] serde_json::Error),

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// TLS material could not be loaded.
    #[error("Failed to read TLS material {path}: {source}")]
    Tls {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP/2 transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A call finished with a non-OK status.
    #[error("RPC failed: {0}")]
    Status(#[from] Status),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Load { .. } | Error::Parse(_) | Error::Tls { .. } => {
                Status::internal(err.to_string())
            }
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::Transport(e) => Status::unavailable(format!("Transport error: {}", e)),
            Error::Status(status) => status,
        }
    }
}
