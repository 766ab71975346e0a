//! gRPC service and message definitions generated from `proto/farm.proto`.
//!
//! ## Service
//!
//! - `GetRecord` - unary exact lookup by `(guid, source_id)`.
//! - `ListRecords` - server streaming, filtered by a four-slot
//!   [`RequestWrapper`].
//! - `ListRecordsBySmallWrapper` - server streaming, filtered by a one-slot
//!   [`RequestWrapperSmall`].
//! - `Summarize` - client streaming of [`Item`]s answered by one [`Summary`].
//! - `Chat` - bidirectional stream of [`Note`]s.
//!
//! [`Item`], [`Record`] and [`RecordDatabase`] also implement
//! `serde::Deserialize` for dataset loading.

tonic::include_proto!("farm");

/// Encoded file descriptor set for `farm.proto`, registered with the gRPC
/// reflection service.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("farm_descriptor");
