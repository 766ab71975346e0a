use farm_core::{Error, proto::Record, store::RecordStore, types::SlotFilter};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Streams every existing record of `store` into `resp_tx`, gated by the
/// request envelope.
///
/// An envelope that does not admit records produces an empty stream. Records
/// are sent in store order, one at a time, so a slow client applies
/// backpressure through the bounded channel.
///
/// # Behavior
///
/// - Returns the number of records sent once the store is exhausted. Dropping
///   `resp_tx` on return ends the response stream.
/// - If the client disconnects mid-stream, returns [`Error::ChannelError`].
/// - If `shutdown` fires, makes a best effort to surface `UNAVAILABLE` to the
///   client and returns [`Error::ServiceShutdown`].
pub async fn feed_records<F>(
    request: F,
    store: Arc<RecordStore>,
    resp_tx: mpsc::Sender<Result<Record, Status>>,
    shutdown: CancellationToken,
) -> farm_core::Result<usize>
where
    F: SlotFilter,
{
    if !request.admits() {
        tracing::debug!(slots = F::SLOTS, "Request envelope incomplete; no records emitted");
        return Ok(0);
    }

    let mut sent = 0;
    for record in store.existing() {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                // The client may already be gone or not reading; never block
                // shutdown on it.
                if let Err(e) = resp_tx.try_send(Err(Error::ServiceShutdown.into())) {
                    tracing::warn!("Failed to forward shutdown status: {}", e);
                }
                return Err(Error::ServiceShutdown);
            }
            res = resp_tx.send(Ok(record.clone())) => {
                if let Err(e) = res {
                    return Err(Error::ChannelError {
                        context: format!("Failed to forward record: {e}"),
                    });
                }
            }
        }
        sent += 1;
    }

    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_core::proto::{Item, RecordRequest, RequestWrapper, RequestWrapperSmall};
    use tonic::Code;

    fn store() -> Arc<RecordStore> {
        Arc::new(RecordStore::new(vec![
            Record::new(Item::new("1", 1)),
            Record::new(Item::new("", 0)),
            Record::new(Item::new("3", 3)),
        ]))
    }

    fn small() -> RequestWrapperSmall {
        RequestWrapperSmall {
            req1: Some(RecordRequest::for_item("1", 1)),
        }
    }

    #[tokio::test]
    async fn streams_existing_records_in_order() {
        let (tx, mut rx) = mpsc::channel(1);
        let producer = tokio::spawn(feed_records(small(), store(), tx, CancellationToken::new()));

        let mut guids = Vec::new();
        while let Some(record) = rx.recv().await {
            guids.push(record.unwrap().item.unwrap().guid);
        }
        assert_eq!(guids, ["1", "3"]);
        assert_eq!(producer.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn incomplete_envelope_emits_nothing() {
        let partial = RequestWrapper {
            req1: Some(RecordRequest::for_item("1", 1)),
            req2: Some(RecordRequest::for_item("3", 3)),
            ..Default::default()
        };
        let (tx, mut rx) = mpsc::channel(4);

        let sent = feed_records(partial, store(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(rx.recv().await.is_none());

        let (tx, mut rx) = mpsc::channel(4);
        let empty = RequestWrapperSmall::default();
        let sent = feed_records(empty, store(), tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn client_disconnect_is_a_channel_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = feed_records(small(), store(), tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelError { .. }));
    }

    #[tokio::test]
    async fn shutdown_surfaces_unavailable() {
        let token = CancellationToken::new();
        token.cancel();
        let (tx, mut rx) = mpsc::channel(4);

        let err = feed_records(small(), store(), tx, token).await.unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
        let status = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert!(rx.recv().await.is_none());
    }
}
