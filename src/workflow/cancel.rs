//! Run-scoped cancellation signal

use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;

struct Inner {
    sender: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn cancel(&self) {
        self.sender.send_replace(true);
        let children = match self.children.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cancellation token shared by a run, its node bodies and sub-workflows.
///
/// Cloning yields a handle to the same signal. Child tokens are cancelled
/// with their parent but can also be cancelled on their own.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    /// Create a new cancellation token
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                sender,
                children: Mutex::new(Vec::new()),
            }),
            receiver,
        }
    }

    /// Token cancelled whenever `self` is, or when cancelled directly
    pub fn child(&self) -> Self {
        let child = Self::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        if let Ok(mut children) = self.inner.children.lock() {
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // Parent may have been cancelled between the check and the push
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Cancel the token
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives in `self.inner`, so `changed` cannot fail here
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
