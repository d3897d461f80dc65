//! Cooperative cancellation of an in-flight parse.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable token which signals an in-flight parse to stop.
///
/// Cancellation is observed by the byte source before every read and by
/// the parse driver before every state machine re-entry, so a cancelled
/// parse stops promptly, releases every rented arena block, and surfaces
/// [`Error::Cancelled`](crate::Error::Cancelled).
///
/// A token can be cancelled from any thread, before or during the parse.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

impl Default for Inner {
    fn default() -> Self {
        let (notify_tx, notify_rx) = bounded(1);
        Inner {
            flag: AtomicBool::new(false),
            notify_tx,
            notify_rx,
        }
    }
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation.
    ///
    /// Idempotent; also wakes a parse currently waiting on its pipe.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let _ = self.inner.notify_tx.try_send(());
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// The channel end used to wake blocked pipe operations.
    pub(crate) fn notified(&self) -> &Receiver<()> {
        &self.inner.notify_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_sticky_and_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn cancel_wakes_a_waiter() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.notified().try_recv().is_ok());
    }
}
