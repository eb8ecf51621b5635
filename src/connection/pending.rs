//! One-shot promise/reply pairs
//!
//! The cross-thread contract between caller threads and the reactor: the
//! caller obtains a [`PendingReply`] immediately and blocks on it, the
//! reactor fulfills the paired [`Promise`] exactly once. Built on a
//! rendezvous-capacity `sync_channel`, which provides both the one-shot
//! result cell and the wake-up in one primitive.
//!
//! Dropping the reply side is how callers abandon a request: a later
//! `fulfill` on the orphaned promise is silently discarded, which is exactly
//! the timeout semantics the engine wants.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::time::Duration;

use super::{ConnectionError, Result};

/// Reactor-side half: fulfilled or failed exactly once.
#[derive(Debug)]
pub struct Promise<T> {
    tx: SyncSender<Result<T>>,
}

impl<T> Promise<T> {
    /// Deliver the result to the waiting caller.
    pub fn fulfill(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Deliver a failure to the waiting caller.
    pub fn fail(self, error: ConnectionError) {
        let _ = self.tx.send(Err(error));
    }
}

/// Caller-side half: blocks until the reactor resolves the promise.
#[derive(Debug)]
pub struct PendingReply<T> {
    rx: Receiver<Result<T>>,
}

impl<T> PendingReply<T> {
    /// Block until the promise is resolved.
    ///
    /// # Errors
    ///
    /// Returns the reactor's failure, or [`ConnectionError::ConnectionClosed`]
    /// if the promise was dropped unresolved (reactor gone).
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| ConnectionError::ConnectionClosed)?
    }

    /// Block with a deadline.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Timeout`] if the deadline passes first; the
    /// reactor-side request stays registered and its eventual result is
    /// discarded.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ConnectionError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::ConnectionClosed),
        }
    }
}

/// Create a linked promise/reply pair.
#[must_use]
pub fn pending<T>() -> (Promise<T>, PendingReply<T>) {
    let (tx, rx) = sync_channel(1);
    (Promise { tx }, PendingReply { rx })
}
