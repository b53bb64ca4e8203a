//! Cooperative cancellation tokens.
//!
//! Every suspending operation in the library observes a [`CancelToken`]:
//! engine start takes one, each peer derives a linked child from its
//! engine's token, and per-call tokens may be supplied to `send`
//! operations. Cancelling a parent cancels all of its children;
//! cancelling a child leaves the parent untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        })
    }
}

/// A cancellation token for cooperative shutdown.
///
/// Clones share the same state. Supports both polling
/// ([`is_cancelled`](Self::is_cancelled)) and async waiting
/// ([`cancelled`](Self::cancelled)), plus parent→child linking via
/// [`child`](Self::child).
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

impl CancelToken {
    /// Create a new, un-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: CancelState::new(),
        }
    }

    /// Check if cancellation has been requested on this token or any of
    /// its ancestors.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Sets the flag, wakes all waiters, and propagates to every linked
    /// child token.
    pub fn cancel(&self) {
        Self::cancel_state(&self.inner);
    }

    fn cancel_state(state: &Arc<CancelState>) {
        if !state.cancelled.swap(true, Ordering::Release) {
            state.notify.notify_waiters();
            let children = std::mem::take(&mut *state.children.lock());
            for child in children {
                if let Some(child) = child.upgrade() {
                    Self::cancel_state(&child);
                }
            }
        }
    }

    /// Create a linked child token.
    ///
    /// The child is cancelled when this token is cancelled (now or
    /// later); cancelling the child does not affect this token.
    pub fn child(&self) -> CancelToken {
        let child = CancelState::new();
        self.inner.children.lock().push(Arc::downgrade(&child));
        // A parent cancelled concurrently with the registration above
        // may have missed the new entry; settle it here.
        if self.is_cancelled() {
            Self::cancel_state(&child);
        }
        CancelToken { inner: child }
    }

    /// Wait asynchronously until cancellation is requested.
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
