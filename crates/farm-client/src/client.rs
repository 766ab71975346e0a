//! Typed client for the farm service.
//!
//! [`FarmClient`] wraps the generated stub over a channel with the client
//! interceptor chain installed, so every call shape carries the same
//! metadata. Failed calls are logged at `warn` and returned as
//! [`Error::Status`]; they never panic.
//!
//! Streaming requests carry an [`AbortSignal`], so a client-streaming or
//! bidirectional call can be failed from this side instead of being
//! half-closed.

use crate::config::ClientConfig;
use farm_core::{
    Error, Result,
    abort::{AbortService, AbortSignal},
    interceptor::{ClientChain, ClientInterceptorService},
    proto::{
        Item, Note, Record, RecordRequest, RequestWrapper, RequestWrapperSmall, Summary,
        farm_client::FarmClient as GrpcFarmClient,
    },
    session::{DuplexSession, StreamObserver},
};
use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Status, Streaming, codec::CompressionEncoding, transport::Channel};

pub type InterceptedChannel = ClientInterceptorService<AbortService<Channel>>;

/// Outbound buffer used for client-streaming and bidirectional calls.
const OUTBOUND_BUFFER: usize = 16;

#[derive(Clone)]
pub struct FarmClient {
    inner: GrpcFarmClient<InterceptedChannel>,
}

impl FarmClient {
    /// Connects to `config.server_url` with the configured transport security
    /// and interceptors.
    ///
    /// # Errors
    ///
    /// - [`Error::Tls`] if TLS material cannot be read.
    /// - [`Error::Transport`] if the URL is invalid or the connection fails.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let channel = config.endpoint()?.connect().await?;
        Ok(Self::with_channel(channel, config.interceptors.clone()))
    }

    /// Builds a client over an existing channel.
    pub fn with_channel(channel: Channel, interceptors: ClientChain) -> Self {
        let transport = ClientInterceptorService::new(AbortService::new(channel), interceptors);
        let inner = GrpcFarmClient::new(transport)
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Deflate);
        Self { inner }
    }

    /// Looks up the record stored under `(guid, source_id)`.
    ///
    /// Returns `Ok(None)` when the server answered with the empty "not found"
    /// record.
    pub async fn get_record(&mut self, guid: &str, source_id: i32) -> Result<Option<Record>> {
        tracing::info!("*** GetRecord: guid={} source_id={}", guid, source_id);

        let record = self
            .inner
            .get_record(RecordRequest::for_item(guid, source_id))
            .await
            .map_err(rpc_failed)?
            .into_inner();

        if record.exists() {
            let owner = record
                .item
                .as_ref()
                .map(|item| item.owner.as_str())
                .unwrap_or_default();
            tracing::info!(owner, "Found record at ({}, {})", guid, source_id);
            Ok(Some(record))
        } else {
            tracing::info!("Found no record at ({}, {})", guid, source_id);
            Ok(None)
        }
    }

    /// Streams every record the server admits for a four-slot request.
    pub async fn list_records(&mut self, wrapper: RequestWrapper) -> Result<Vec<Record>> {
        tracing::info!("*** ListRecords");
        let stream = self
            .inner
            .list_records(wrapper)
            .await
            .map_err(rpc_failed)?
            .into_inner();
        drain_records(stream).await
    }

    /// Streams every record the server admits for a single-slot request.
    pub async fn list_records_by_small_wrapper(
        &mut self,
        wrapper: RequestWrapperSmall,
    ) -> Result<Vec<Record>> {
        tracing::info!("*** ListRecordsBySmallWrapper");
        let stream = self
            .inner
            .list_records_by_small_wrapper(wrapper)
            .await
            .map_err(rpc_failed)?
            .into_inner();
        drain_records(stream).await
    }

    /// Opens a client-streaming summary call.
    ///
    /// Push items through the returned [`SummarizeCall`] and finish it to get
    /// the server's [`Summary`], or abort it to fail the call.
    pub fn summarize(&self) -> SummarizeCall {
        let (items, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let abort = AbortSignal::new();

        let mut request = tonic::Request::new(ReceiverStream::new(rx));
        request.extensions_mut().insert(abort.clone());

        let mut inner = self.inner.clone();
        let reply = tokio::spawn(async move {
            inner
                .summarize(request)
                .await
                .map(tonic::Response::into_inner)
                .map_err(rpc_failed)
        });
        SummarizeCall {
            items: Some(items),
            abort,
            reply: Some(reply),
        }
    }

    /// Sends `items` in one client-streaming call and returns the summary.
    pub async fn summarize_items<I>(&mut self, items: I) -> Result<Summary>
    where
        I: IntoIterator<Item = Item>,
        I::IntoIter: Send + 'static,
    {
        tracing::info!("*** Summarize");
        let summary = self
            .inner
            .summarize(tokio_stream::iter(items))
            .await
            .map_err(rpc_failed)?
            .into_inner();
        tracing::info!("Finished summary with {} items", summary.count);
        Ok(summary)
    }

    /// Opens a bidirectional chat and attaches `observer` to the server's
    /// notes.
    ///
    /// The returned session sends notes, half-closes with
    /// [`DuplexSession::close_send`] and signals completion once the server
    /// ends the stream or it fails.
    pub async fn chat<O>(&mut self, observer: O) -> Result<DuplexSession<Note>>
    where
        O: StreamObserver<Note>,
    {
        tracing::info!("*** Chat");
        let (session, outbound) = DuplexSession::open(OUTBOUND_BUFFER);

        let mut request = tonic::Request::new(outbound);
        request.extensions_mut().insert(session.abort_signal());

        let inbound = match self.inner.chat(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                session.cancel(&status).await;
                return Err(rpc_failed(status));
            }
        };

        session.attach(inbound, observer);
        Ok(session)
    }
}

/// A client-streaming summary call in progress.
///
/// Dropping a call that was neither finished nor aborted aborts it, so the
/// server never produces a summary for partial input.
pub struct SummarizeCall {
    items: Option<mpsc::Sender<Item>>,
    abort: AbortSignal,
    reply: Option<JoinHandle<Result<Summary>>>,
}

impl SummarizeCall {
    /// Pushes one item. Returns `false` if the call already ended.
    pub async fn push(&self, item: Item) -> bool {
        match &self.items {
            Some(items) => items.send(item).await.is_ok(),
            None => false,
        }
    }

    /// Ends the input and waits for the server's summary.
    pub async fn finish(mut self) -> Result<Summary> {
        self.items.take();
        let summary = self.reply().await?;
        tracing::info!("Finished summary with {} items", summary.count);
        Ok(summary)
    }

    /// Fails the call with `status` instead of half-closing it.
    ///
    /// The server sees its inbound stream fail and sends no summary. Returns
    /// the error the call ended with.
    pub async fn abort(mut self, status: &Status) -> Error {
        tracing::warn!(code = ?status.code(), "Aborting summarize: {}", status.message());
        self.abort.abort();
        self.items.take();
        match self.reply().await {
            Ok(summary) => Error::ChannelError {
                context: format!("Summary of {} items arrived before the abort", summary.count),
            },
            Err(e) => e,
        }
    }

    async fn reply(&mut self) -> Result<Summary> {
        let Some(reply) = self.reply.take() else {
            return Err(Error::ChannelError {
                context: "Summarize call already ended".to_owned(),
            });
        };
        reply.await.map_err(|e| Error::ChannelError {
            context: format!("Summarize task failed: {e}"),
        })?
    }
}

impl Drop for SummarizeCall {
    fn drop(&mut self) {
        if self.reply.is_some() {
            tracing::debug!("Summarize call dropped before finishing; aborting");
            // Fired while `items` is still alive, so the body cannot end cleanly.
            self.abort.abort();
        }
    }
}

async fn drain_records(mut stream: Streaming<Record>) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    while let Some(next) = stream.next().await {
        let record = next.map_err(rpc_failed)?;
        if let Some(item) = record.item.as_ref() {
            tracing::info!(
                owner = %item.owner,
                "Record found at ({}, {})",
                item.guid,
                item.source_id
            );
        }
        records.push(record);
    }
    Ok(records)
}

fn rpc_failed(status: Status) -> Error {
    tracing::warn!(code = ?status.code(), "RPC failed: {}", status.message());
    Error::Status(status)
}
