use crate::server::config::ChatPolicy;
use farm_core::{
    Error,
    proto::{Item, Note, Summary},
};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Drains a client stream of items and counts them.
///
/// The summary is only produced once the client half-closes. A failed inbound
/// stream fails the call with the received status; no partial summary is sent.
pub async fn count_items<S>(mut inbound: S, shutdown: CancellationToken) -> Result<Summary, Status>
where
    S: Stream<Item = Result<Item, Status>> + Unpin,
{
    let mut count: i32 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(Error::ServiceShutdown.into()),
            next = inbound.next() => next,
        };

        match next {
            Some(Ok(item)) => {
                tracing::debug!(guid = %item.guid, source_id = item.source_id, "Item received");
                count = count.saturating_add(1);
            }
            Some(Err(status)) => {
                tracing::warn!(
                    code = ?status.code(),
                    "Summarize stream failed after {} items",
                    count
                );
                return Err(status);
            }
            None => break,
        }
    }

    Ok(Summary { count })
}

/// Receives chat notes until the client half-closes, applying `policy` to
/// each.
///
/// Returns the number of notes received. Dropping `tx` on return completes the
/// response stream.
///
/// # Errors
///
/// - [`Error::Status`] if the inbound stream failed.
/// - [`Error::ChannelError`] if the client stopped reading echoed notes.
/// - [`Error::ServiceShutdown`] if `shutdown` fired first.
pub async fn relay_notes<S>(
    mut inbound: S,
    policy: ChatPolicy,
    tx: mpsc::Sender<Result<Note, Status>>,
    shutdown: CancellationToken,
) -> farm_core::Result<usize>
where
    S: Stream<Item = Result<Note, Status>> + Unpin,
{
    let mut received = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                if let Err(e) = tx.try_send(Err(Error::ServiceShutdown.into())) {
                    tracing::warn!("Failed to forward shutdown status: {}", e);
                }
                return Err(Error::ServiceShutdown);
            }
            next = inbound.next() => next,
        };

        let note = match next {
            Some(Ok(note)) => note,
            Some(Err(status)) => return Err(status.into()),
            None => return Ok(received),
        };
        received += 1;

        let guid = note.item.as_ref().map(|item| item.guid.as_str()).unwrap_or_default();
        tracing::info!(note = %note.message, guid, "Note received");

        if policy == ChatPolicy::Echo {
            // A client that stopped reading must not hold up shutdown.
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    if let Err(e) = tx.try_send(Err(Error::ServiceShutdown.into())) {
                        tracing::warn!("Failed to forward shutdown status: {}", e);
                    }
                    return Err(Error::ServiceShutdown);
                }
                res = tx.send(Ok(note)) => {
                    if let Err(e) = res {
                        return Err(Error::ChannelError {
                            context: format!("Failed to echo note: {e}"),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use tonic::Code;

    fn items(n: usize) -> Vec<Result<Item, Status>> {
        (0..n).map(|i| Ok(Item::new(i.to_string(), i as i32))).collect()
    }

    fn notes() -> Vec<Result<Note, Status>> {
        ["first", "second", "third"]
            .into_iter()
            .map(|m| Ok(Note::new(m, Item::new("1", 1))))
            .collect()
    }

    #[tokio::test]
    async fn counts_every_item() {
        for n in [0, 1, 25] {
            let summary = count_items(stream::iter(items(n)), CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(summary.count, n as i32);
        }
    }

    #[tokio::test]
    async fn inbound_failure_fails_the_summary() {
        let mut inbound = items(2);
        inbound.push(Err(Status::aborted("client went away")));
        inbound.extend(items(3));

        let status = count_items(stream::iter(inbound), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Aborted);
    }

    #[tokio::test]
    async fn shutdown_interrupts_summary() {
        let token = CancellationToken::new();
        token.cancel();
        let status = count_items(stream::pending(), token).await.unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn sink_sends_nothing_back() {
        let (tx, mut rx) = mpsc::channel(4);
        let inbound = stream::iter(notes());
        let received = relay_notes(inbound, ChatPolicy::Sink, tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(received, 3);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn echo_returns_notes_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let relay = tokio::spawn(relay_notes(
            stream::iter(notes()),
            ChatPolicy::Echo,
            tx,
            CancellationToken::new(),
        ));

        let mut messages = Vec::new();
        while let Some(note) = rx.recv().await {
            messages.push(note.unwrap().message);
        }
        assert_eq!(messages, ["first", "second", "third"]);
        assert_eq!(relay.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn inbound_failure_ends_the_relay() {
        let inbound = vec![
            Ok(Note::new("first", Item::default())),
            Err(Status::cancelled("gone")),
        ];
        let (tx, _rx) = mpsc::channel(4);
        let err = relay_notes(stream::iter(inbound), ChatPolicy::Echo, tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Status(status) if status.code() == Code::Cancelled));
    }

    #[tokio::test]
    async fn shutdown_unblocks_echo_to_a_stalled_reader() {
        let inbound = (0..8).map(|i| Ok(Note::new(i.to_string(), Item::new("1", 1))));
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();

        let relay = tokio::spawn(relay_notes(
            stream::iter(inbound.collect::<Vec<_>>()),
            ChatPolicy::Echo,
            tx,
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let err = tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay stayed blocked on a full channel")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
    }
}
