//! The demo sequence run by the `farm-client` binary.
//!
//! Every call shape is exercised once. A failed RPC is logged by the client
//! and the sequence moves on to the next step.

use crate::{FarmClient, LoggingObserver};
use core::time::Duration;
use farm_core::proto::{Item, Note, RecordRequest, RequestWrapper, RequestWrapperSmall};
use rand::Rng;

const CHAT_MESSAGES: [&str; 4] = [
    "First message",
    "Second message",
    "Third message",
    "Fourth message",
];

/// Runs the demo against `client`, sampling summaries and chat notes from
/// `items`. Returns the number of steps that failed.
pub async fn run(client: &mut FarmClient, items: &[Item], chat_timeout: Duration) -> usize {
    let mut failed = 0;

    // Unary: a known record, then a miss.
    failed += usize::from(client.get_record("407838352", 456124).await.is_err());
    failed += usize::from(client.get_record("0", 0).await.is_err());

    // Server streaming.
    let request = RecordRequest::for_item("407838352", 456124);
    let small = RequestWrapperSmall {
        req1: Some(request.clone()),
    };
    failed += usize::from(client.list_records_by_small_wrapper(small).await.is_err());
    let full = RequestWrapper {
        req1: Some(request.clone()),
        req2: Some(request.clone()),
        req3: Some(request.clone()),
        req4: Some(request),
    };
    failed += usize::from(client.list_records(full).await.is_err());

    // Client streaming: a random sample of known items.
    if !items.is_empty() {
        let call = client.summarize();
        let picks: Vec<Item> = {
            let mut rng = rand::rng();
            (0..10)
                .map(|_| items[rng.random_range(0..items.len())].clone())
                .collect()
        };
        for item in picks {
            if !call.push(item).await {
                break;
            }
        }
        failed += usize::from(call.finish().await.is_err());
    }

    // Bidirectional.
    let Ok(session) = client.chat(LoggingObserver::default()).await else {
        return failed + 1;
    };
    for (message, item) in CHAT_MESSAGES.into_iter().zip(items.iter().cycle()) {
        tracing::info!(
            "Sending message \"{}\" at ({}, {})",
            message,
            item.guid,
            item.source_id
        );
        if !session.send(Note::new(message, item.clone())).await {
            break;
        }
    }
    session.close_send().await;
    let finished = session.await_completion(chat_timeout).await;
    let completed = session.completion().outcome().is_some_and(|o| o.is_completed());
    failed += usize::from(!(finished && completed));

    failed
}
