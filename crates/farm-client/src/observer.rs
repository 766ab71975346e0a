use farm_core::{proto::Note, session::StreamObserver};
use tonic::Status;

/// Logs every note the server sends on a chat, and how the chat ended.
#[derive(Debug, Default)]
pub struct LoggingObserver {
    received: usize,
}

impl StreamObserver<Note> for LoggingObserver {
    fn on_message(&mut self, note: Note) {
        self.received += 1;
        match note.item {
            Some(item) => tracing::info!(
                "Got message \"{}\" at ({}, {})",
                note.message,
                item.guid,
                item.source_id
            ),
            None => tracing::info!("Got message \"{}\"", note.message),
        }
    }

    fn on_error(&mut self, status: &Status) {
        tracing::warn!(code = ?status.code(), "Chat failed: {}", status.message());
    }

    fn on_complete(&mut self) {
        tracing::info!("Finished chat after {} notes", self.received);
    }
}
