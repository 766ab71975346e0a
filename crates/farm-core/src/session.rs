//! Lifecycle coordination for one bidirectional stream.
//!
//! A [`DuplexSession`] owns the outbound half of a duplex call and drives the
//! inbound half from a single reader task. Inbound traffic is turned into
//! tagged [`StreamEvent`]s and dispatched, in arrival order, to a
//! [`StreamObserver`]. Because only the reader task ever calls the observer,
//! observers are never re-entered.
//!
//! ## Completion
//!
//! Each session carries one [`Completion`] signal. It fires exactly once,
//! either when the inbound stream ends normally or when it fails, whichever
//! happens first. Firing it:
//!
//! - releases every task waiting in [`DuplexSession::await_completion`],
//! - turns further [`DuplexSession::send`] calls into no-ops,
//! - closes the outbound half, so the transport stops waiting on it.
//!
//! A local [`DuplexSession::cancel`] also fires the session's [`AbortSignal`].
//! When the signal rides in the call's request extensions, the transport
//! resets the stream and the peer sees a failed call instead of a clean
//! half-close.
//!
//! ## Sending
//!
//! `send` may be called from many tasks at once. Sends are serialized by a
//! per-session mutex and keep their order on the wire. A send that is blocked
//! on backpressure is released as soon as the session completes.

use crate::abort::AbortSignal;
use core::time::Duration;
use futures::{Stream, StreamExt};
use std::sync::{Arc, OnceLock};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

/// One inbound event, as produced by the reader loop.
#[derive(Debug)]
pub enum StreamEvent<T> {
    Data(T),
    Error(Status),
    Complete,
}

/// Receives the inbound events of a [`DuplexSession`].
///
/// All methods are called from the session's reader task, one at a time and
/// in arrival order. After `on_error` or `on_complete` no further calls are
/// made.
pub trait StreamObserver<T>: Send + 'static {
    fn on_message(&mut self, message: T);

    fn on_error(&mut self, _status: &Status) {}

    fn on_complete(&mut self) {}
}

/// How a session finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The peer closed its half cleanly.
    Completed,
    /// The inbound stream failed or the session was cancelled locally.
    Failed { code: Code, message: String },
}

impl Outcome {
    pub fn failed(status: &Status) -> Self {
        Self::Failed {
            code: status.code(),
            message: status.message().to_owned(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A signal that moves from pending to done at most once.
#[derive(Clone, Debug, Default)]
pub struct Completion {
    outcome: Arc<OnceLock<Outcome>>,
    done: CancellationToken,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `outcome` and releases all waiters.
    ///
    /// Returns `true` only for the call that actually fired the signal; every
    /// later call is ignored and returns `false`.
    pub fn fire(&self, outcome: Outcome) -> bool {
        if self.outcome.set(outcome).is_ok() {
            self.done.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    /// Waits up to `timeout` for the signal. Returns `false` on timeout.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Owns one bidirectional stream: its outbound sender, its inbound reader
/// loop and its completion signal.
///
/// Cloning yields another handle to the same session.
pub struct DuplexSession<T> {
    sender: Arc<Mutex<Option<mpsc::Sender<T>>>>,
    completion: Completion,
    abort: AbortSignal,
    reader: Arc<OnceLock<JoinHandle<()>>>,
}

impl<T> Clone for DuplexSession<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            completion: self.completion.clone(),
            abort: self.abort.clone(),
            reader: Arc::clone(&self.reader),
        }
    }
}

impl<T: Send + 'static> DuplexSession<T> {
    /// Opens a session whose outbound half is buffered by `buffer` messages.
    ///
    /// The returned stream is the request body to hand to the transport.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is zero.
    pub fn open(buffer: usize) -> (Self, ReceiverStream<T>) {
        let (tx, rx) = mpsc::channel(buffer);
        let session = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            completion: Completion::new(),
            abort: AbortSignal::new(),
            reader: Arc::new(OnceLock::new()),
        };
        (session, ReceiverStream::new(rx))
    }

    /// Starts the reader loop over `inbound`, dispatching to `observer`.
    ///
    /// Only the first call has an effect; a session reads one inbound stream.
    pub fn attach<S, U, O>(&self, inbound: S, mut observer: O)
    where
        S: Stream<Item = Result<U, Status>> + Send + Unpin + 'static,
        U: Send + 'static,
        O: StreamObserver<U>,
    {
        if self.reader.get().is_some() {
            tracing::warn!("Inbound stream already attached to this session");
            return;
        }

        let session = self.clone();
        let mut inbound = inbound;
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    // Local cancellation wins over anything still queued.
                    biased;
                    () = session.completion.wait() => {
                        let outcome = session.completion.outcome();
                        if let Some(Outcome::Failed { code, message }) = outcome {
                            observer.on_error(&Status::new(*code, message.clone()));
                        }
                        break;
                    }
                    next = inbound.next() => match next {
                        Some(Ok(message)) => StreamEvent::Data(message),
                        Some(Err(status)) => StreamEvent::Error(status),
                        None => StreamEvent::Complete,
                    },
                };

                match event {
                    StreamEvent::Data(message) => observer.on_message(message),
                    StreamEvent::Error(status) => {
                        tracing::warn!(
                            code = ?status.code(),
                            message = status.message(),
                            "Inbound stream failed"
                        );
                        if session.completion.fire(Outcome::failed(&status)) {
                            observer.on_error(&status);
                        }
                        break;
                    }
                    StreamEvent::Complete => {
                        if session.completion.fire(Outcome::Completed) {
                            observer.on_complete();
                        }
                        break;
                    }
                }
            }

            session.close_send().await;
        });

        if let Err(handle) = self.reader.set(handle) {
            handle.abort();
        }
    }

    /// Sends `message` on the outbound half.
    ///
    /// Returns `false` without sending if the session has completed, the
    /// outbound half was closed, or the transport dropped the stream.
    pub async fn send(&self, message: T) -> bool {
        if self.completion.is_done() {
            tracing::debug!("Dropping message sent after session completion");
            return false;
        }

        let guard = self.sender.lock().await;
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        tokio::select! {
            biased;
            () = self.completion.wait() => false,
            sent = tx.send(message) => match sent {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("Outbound stream closed by transport");
                    false
                }
            },
        }
    }

    /// Half-closes the outbound direction, signalling end of input to the
    /// peer. Idempotent.
    pub async fn close_send(&self) {
        self.sender.lock().await.take();
    }

    /// Fails the session locally, as if the inbound stream had errored with
    /// `status`, and aborts the outbound half so the peer sees the call fail.
    /// Returns `false` if the session had already completed.
    pub async fn cancel(&self, status: &Status) -> bool {
        let fired = self.completion.fire(Outcome::failed(status));
        if fired {
            tracing::debug!(code = ?status.code(), "Aborting session");
            // Must fire before the sender drops, or the body ends cleanly.
            self.abort.abort();
        }
        self.close_send().await;
        fired
    }

    /// The signal fired by [`cancel`](Self::cancel). Attach it to the call's
    /// request extensions so a local cancel resets the stream.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Waits up to `timeout` for the session to finish.
    ///
    /// A timeout is logged and reported as `false`; the call itself may still
    /// be in flight.
    pub async fn await_completion(&self, timeout: Duration) -> bool {
        let done = self.completion.wait_timeout(timeout).await;
        if !done {
            tracing::warn!(?timeout, "Session did not finish within the timeout");
        }
        done
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<StdMutex<Vec<String>>>,
    }

    impl StreamObserver<u32> for Recorder {
        fn on_message(&mut self, message: u32) {
            self.events.lock().unwrap().push(format!("data:{message}"));
        }

        fn on_error(&mut self, status: &Status) {
            self.events
                .lock()
                .unwrap()
                .push(format!("error:{:?}", status.code()));
        }

        fn on_complete(&mut self) {
            self.events.lock().unwrap().push("complete".to_owned());
        }
    }

    #[test]
    fn completion_fires_once() {
        let completion = Completion::new();
        assert!(!completion.is_done());
        assert!(completion.fire(Outcome::Completed));
        assert!(!completion.fire(Outcome::failed(&Status::cancelled("late"))));
        assert_eq!(completion.outcome(), Some(&Outcome::Completed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_completion_and_error_fire_exactly_once() {
        for _ in 0..256 {
            let completion = Completion::new();
            let a = completion.clone();
            let b = completion.clone();
            let (ra, rb) = tokio::join!(
                tokio::spawn(async move { a.fire(Outcome::Completed) }),
                tokio::spawn(async move { b.fire(Outcome::failed(&Status::internal("boom"))) }),
            );
            assert!(ra.unwrap() ^ rb.unwrap());
            assert!(completion.is_done());
        }
    }

    #[tokio::test]
    async fn dispatches_in_order_then_completes() {
        let (session, _outbound) = DuplexSession::<u32>::open(4);
        let recorder = Recorder::default();
        session.attach(
            stream::iter(vec![Ok(1_u32), Ok(2), Ok(3)]),
            recorder.clone(),
        );

        assert!(session.await_completion(Duration::from_secs(5)).await);
        assert_eq!(session.completion().outcome(), Some(&Outcome::Completed));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            ["data:1", "data:2", "data:3", "complete"]
        );
    }

    #[tokio::test]
    async fn inbound_error_releases_waiters_and_stops_sends() {
        let (session, mut outbound) = DuplexSession::<u32>::open(4);
        let recorder = Recorder::default();

        assert!(session.send(7).await);
        assert_eq!(outbound.next().await, Some(7));

        session.attach(
            stream::iter(vec![Ok(1_u32), Err(Status::unavailable("gone"))]),
            recorder.clone(),
        );

        assert!(session.await_completion(Duration::from_secs(5)).await);
        assert!(matches!(
            session.completion().outcome(),
            Some(Outcome::Failed { code: Code::Unavailable, .. })
        ));
        assert!(!session.send(8).await);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            ["data:1", "error:Unavailable"]
        );

        // The reader closed the outbound half.
        assert_eq!(outbound.next().await, None);
    }

    #[tokio::test]
    async fn blocked_sender_is_released_on_cancel() {
        let (session, _outbound) = DuplexSession::<u32>::open(1);
        assert!(session.send(1).await);

        let blocked = {
            let session = session.clone();
            tokio::spawn(async move { session.send(2).await })
        };
        tokio::task::yield_now().await;

        assert!(session.cancel(&Status::cancelled("local")).await);
        assert!(!blocked.await.unwrap());
        assert!(!session.cancel(&Status::cancelled("again")).await);
    }

    #[tokio::test]
    async fn cancel_fires_the_abort_signal_before_closing() {
        let (session, mut outbound) = DuplexSession::<u32>::open(4);
        let signal = session.abort_signal();
        assert!(session.send(1).await);
        assert!(!signal.is_aborted());

        assert!(session.cancel(&Status::cancelled("local")).await);
        assert!(signal.is_aborted());
        assert_eq!(outbound.next().await, Some(1));
        assert_eq!(outbound.next().await, None);
    }

    #[tokio::test]
    async fn clean_completion_leaves_the_abort_signal_alone() {
        let (session, _outbound) = DuplexSession::<u32>::open(4);
        session.attach(stream::iter(vec![Ok(1_u32)]), Recorder::default());
        assert!(session.await_completion(Duration::from_secs(5)).await);
        assert!(!session.abort_signal().is_aborted());
    }

    #[tokio::test]
    async fn local_cancel_reports_error_to_observer() {
        let (session, _outbound) = DuplexSession::<u32>::open(1);
        let recorder = Recorder::default();
        session.attach(stream::pending::<Result<u32, Status>>(), recorder.clone());

        assert!(session.cancel(&Status::cancelled("local")).await);
        assert!(session.await_completion(Duration::from_secs(5)).await);

        // The reader task observes the cancellation asynchronously.
        for _ in 0..100 {
            if !recorder.events.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*recorder.events.lock().unwrap(), ["error:Cancelled"]);
    }

    #[tokio::test]
    async fn concurrent_senders_are_serialized() {
        let (session, outbound) = DuplexSession::<u32>::open(8);
        let mut tasks = Vec::new();
        for producer in 0..4_u32 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    assert!(session.send(producer * 100 + i).await);
                }
            }));
        }

        let collector = tokio::spawn(outbound.collect::<Vec<_>>());
        for task in tasks {
            task.await.unwrap();
        }
        session.close_send().await;

        let received = collector.await.unwrap();
        assert_eq!(received.len(), 100);
        // Each producer's messages keep their relative order.
        for producer in 0..4_u32 {
            let mine: Vec<_> = received
                .iter()
                .copied()
                .filter(|v| v / 100 == producer)
                .collect();
            let expected: Vec<_> = (0..25).map(|i| producer * 100 + i).collect();
            assert_eq!(mine, expected);
        }
    }

    #[tokio::test]
    async fn await_completion_times_out_without_failing() {
        let (session, _outbound) = DuplexSession::<u32>::open(1);
        session.attach(stream::pending::<Result<u32, Status>>(), Recorder::default());
        assert!(!session.await_completion(Duration::from_millis(20)).await);
        assert!(!session.is_done());
    }
}
