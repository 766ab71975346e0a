//! gRPC service implementation for the farm record service.
//!
//! This module defines [`FarmService`], the concrete implementation of the
//! [`Farm`] gRPC service. It serves the four call shapes over a shared,
//! read-only [`RecordStore`]:
//!
//! - unary `GetRecord` lookups by `(guid, source_id)`,
//! - server-streaming `ListRecords` / `ListRecordsBySmallWrapper`,
//! - client-streaming `Summarize`,
//! - bidirectional `Chat`.
//!
//! Streaming calls are produced by spawned tasks feeding a bounded channel, so
//! slow clients apply backpressure and every call observes graceful shutdown.

use crate::server::{
    config::ServerConfig,
    service::state::ServiceState,
    streaming::{
        coordinator::feed_records,
        processor::{count_items, relay_notes},
    },
    telemetry::{
        increment_records_streamed, increment_requests, increment_stream_errors,
        record_items_per_summary, record_stream_duration,
    },
};
use core::pin::Pin;
use farm_core::{
    proto::{
        Item, Note, Record, RecordRequest, RequestWrapper, RequestWrapperSmall, Summary,
        farm_server::Farm,
    },
    store::RecordStore,
    types::SlotFilter,
};
use futures::TryStreamExt;
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Record, Status>> + Send>>;
pub type NoteStream = Pin<Box<dyn Stream<Item = Result<Note, Status>> + Send>>;

/// The farm gRPC service.
///
/// Cheap to clone; clones share the store and shutdown state.
#[derive(Clone)]
pub struct FarmService {
    config: ServerConfig,
    store: Arc<RecordStore>,
    state: Arc<ServiceState>,
}

impl FarmService {
    pub fn new(config: ServerConfig, store: Arc<RecordStore>) -> Self {
        Self {
            config,
            store,
            state: ServiceState::new(),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Number of streaming calls currently in flight.
    pub fn inflight(&self) -> usize {
        self.state.inflight()
    }

    /// Number of streaming calls that ended with an error, including calls
    /// whose client aborted the request stream.
    pub fn failed_calls(&self) -> usize {
        self.state.failures()
    }

    /// Initiates a graceful shutdown.
    ///
    /// New calls fail with `UNAVAILABLE`. In-flight streams get the configured
    /// shutdown timeout to drain before they are cancelled.
    pub async fn shutdown(&self) {
        self.state.shutdown(self.config.shutdown_timeout).await;
    }

    /// Spawns a producer streaming every existing record, gated by `request`.
    fn stream_records<F>(&self, request: F) -> Result<Response<RecordStream>, Status>
    where
        F: SlotFilter + Send + 'static,
    {
        self.state.ensure_serving()?;
        increment_requests();

        let start = Instant::now();
        let guard = self.state.track();
        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<Record, Status>>(self.config.stream_buffer_size);
        let store = Arc::clone(&self.store);
        let state = Arc::clone(&self.state);
        let shutdown = self.state.shutdown_token();

        let fut = async move {
            let _guard = guard;
            match feed_records(request, store, resp_tx, shutdown).await {
                Ok(sent) => {
                    tracing::debug!(sent, "Record stream finished");
                    record_stream_duration(start.elapsed().as_millis() as f64);
                }
                Err(e) => {
                    state.record_failure();
                    tracing::warn!("Record stream ended early: {}", e);
                }
            }
        };
        tokio::spawn(fut.instrument(tracing::info_span!("streaming")));

        let stream = ReceiverStream::new(resp_rx)
            .inspect_ok(|_| increment_records_streamed(1))
            .inspect_err(|_| increment_stream_errors());

        Ok(Response::new(Box::pin(stream)))
    }
}

#[tonic::async_trait]
impl Farm for FarmService {
    type ListRecordsStream = RecordStream;
    type ListRecordsBySmallWrapperStream = RecordStream;
    type ChatStream = NoteStream;

    /// Looks up a single record.
    ///
    /// A miss is not an error: the call succeeds with an empty record, which
    /// callers detect with [`Record::exists`].
    #[tracing::instrument(skip_all)]
    async fn get_record(
        &self,
        req: Request<RecordRequest>,
    ) -> Result<Response<Record>, Status> {
        self.state.ensure_serving()?;
        increment_requests();

        let item = req.into_inner().item.unwrap_or_default();
        match self.store.lookup(&item.guid, item.source_id) {
            Some(record) => Ok(Response::new(record.clone())),
            None => {
                tracing::info!(
                    guid = %item.guid,
                    source_id = item.source_id,
                    "No record was found"
                );
                Ok(Response::new(Record::not_found()))
            }
        }
    }

    /// Streams every existing record when all four request slots are set;
    /// otherwise the stream is empty.
    #[tracing::instrument(skip_all)]
    async fn list_records(
        &self,
        req: Request<RequestWrapper>,
    ) -> Result<Response<Self::ListRecordsStream>, Status> {
        self.stream_records(req.into_inner())
    }

    /// Streams every existing record when the single request slot is set.
    #[tracing::instrument(skip_all)]
    async fn list_records_by_small_wrapper(
        &self,
        req: Request<RequestWrapperSmall>,
    ) -> Result<Response<Self::ListRecordsBySmallWrapperStream>, Status> {
        self.stream_records(req.into_inner())
    }

    #[tracing::instrument(skip_all)]
    async fn summarize(&self, req: Request<Streaming<Item>>) -> Result<Response<Summary>, Status> {
        self.state.ensure_serving()?;
        increment_requests();

        let start = Instant::now();
        let _guard = self.state.track();
        let summary = count_items(req.into_inner(), self.state.shutdown_token())
            .await
            .inspect_err(|_| self.state.record_failure())?;

        tracing::info!(count = summary.count, "Summarized client stream");
        record_items_per_summary(f64::from(summary.count));
        record_stream_duration(start.elapsed().as_millis() as f64);
        Ok(Response::new(summary))
    }

    /// Receives notes until the client half-closes, handling each according
    /// to the configured chat policy.
    #[tracing::instrument(skip_all, fields(policy = ?self.config.chat_policy))]
    async fn chat(
        &self,
        req: Request<Streaming<Note>>,
    ) -> Result<Response<Self::ChatStream>, Status> {
        self.state.ensure_serving()?;
        increment_requests();

        let start = Instant::now();
        let inbound = req.into_inner();
        let guard = self.state.track();
        let (tx, rx) = mpsc::channel::<Result<Note, Status>>(self.config.stream_buffer_size);
        let policy = self.config.chat_policy;
        let state = Arc::clone(&self.state);
        let shutdown = self.state.shutdown_token();

        let fut = async move {
            let _guard = guard;
            match relay_notes(inbound, policy, tx, shutdown).await {
                Ok(received) => {
                    tracing::info!(received, "Chat finished");
                    record_stream_duration(start.elapsed().as_millis() as f64);
                }
                Err(e) => {
                    state.record_failure();
                    tracing::warn!("Chat ended early: {}", e);
                }
            }
        };
        tokio::spawn(fut.instrument(tracing::info_span!("chat")));

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
