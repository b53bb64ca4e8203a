//! Signal/slot system for event delivery.
//!
//! Endpoints and peers expose their lifecycle through [`Signal`] fields.
//! A signal holds any number of connected slots (closures) and invokes
//! them, in connection order, every time it is emitted.
//!
//! Slots are invoked directly on the emitting task. A slot that panics is
//! contained: the panic is caught, reported through `tracing`, and the
//! remaining slots still run, so a misbehaving subscriber can never take
//! down the I/O task that emitted the signal.
//!
//! # Example
//!
//! ```
//! use seine::Signal;
//!
//! let frame_arrived = Signal::<Vec<u8>>::new();
//!
//! let id = frame_arrived.connect(|frame| {
//!     println!("got {} bytes", frame.len());
//! });
//!
//! frame_arrived.emit(vec![1, 2, 3]);
//! frame_arrived.disconnect(id);
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Identifier for a signal-slot connection, returned by
    /// [`Signal::connect`] and accepted by [`Signal::disconnect`].
    pub struct SlotId;
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

struct SignalInner<Args> {
    slots: Mutex<SlotMap<SlotId, Slot<Args>>>,
    blocked: AtomicBool,
}

/// A multi-subscriber event channel.
///
/// Signals are cheaply cloneable handles over shared state: every clone
/// emits to, and manages, the same set of slots. This is what lets the
/// library's internal tasks hold real handles to the signals an endpoint
/// exposes as public fields.
pub struct Signal<Args> {
    inner: Arc<SignalInner<Args>>,
}

impl<Args> Clone for Signal<Args> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Args> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                slots: Mutex::new(SlotMap::with_key()),
                blocked: AtomicBool::new(false),
            }),
        }
    }

    /// Connect a slot. Returns an id usable with [`disconnect`](Self::disconnect).
    pub fn connect<F>(&self, slot: F) -> SlotId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.inner.slots.lock().insert(Arc::new(slot))
    }

    /// Connect a slot and get an RAII guard that disconnects it on drop.
    pub fn connect_guard<F>(&self, slot: F) -> ConnectionGuard<Args>
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let id = self.connect(slot);
        ConnectionGuard {
            signal: self.clone(),
            id,
        }
    }

    /// Disconnect a slot by id. Returns `true` if it was connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        self.inner.slots.lock().remove(id).is_some()
    }

    /// Disconnect all slots.
    pub fn disconnect_all(&self) {
        self.inner.slots.lock().clear();
    }

    /// Number of connected slots.
    pub fn connection_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Block or unblock emission. While blocked, `emit` does nothing.
    pub fn set_blocked(&self, blocked: bool) {
        self.inner.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Whether emission is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.inner.blocked.load(Ordering::SeqCst)
    }

    /// Emit the signal, invoking every connected slot with `args`.
    ///
    /// Slots run in connection order on the calling task. Panics are
    /// caught per slot and reported through `tracing`; the return value
    /// is the number of slots that panicked (normally zero).
    pub fn emit(&self, args: Args) -> usize {
        if self.is_blocked() {
            return 0;
        }

        // Snapshot the slots so handlers may connect/disconnect on this
        // same signal without deadlocking on the slot table.
        let slots: Vec<Slot<Args>> = self.inner.slots.lock().values().cloned().collect();

        let mut panicked = 0;
        for slot in slots {
            if catch_unwind(AssertUnwindSafe(|| slot(&args))).is_err() {
                panicked += 1;
                tracing::error!(target: "seine::signal", "connected slot panicked during emit");
            }
        }
        panicked
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connection_count())
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

/// RAII guard returned by [`Signal::connect_guard`]; disconnects the slot
/// when dropped.
pub struct ConnectionGuard<Args> {
    signal: Signal<Args>,
    id: SlotId,
}

impl<Args> ConnectionGuard<Args> {
    /// The id of the guarded connection.
    pub fn id(&self) -> SlotId {
        self.id
    }
}

impl<Args> Drop for ConnectionGuard<Args> {
    fn drop(&mut self) {
        self.signal.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_reaches_all_slots_in_order() {
        let signal = Signal::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = seen.clone();
        signal.connect(move |n| seen_a.lock().push(("a", *n)));
        let seen_b = seen.clone();
        signal.connect(move |n| seen_b.lock().push(("b", *n)));

        signal.emit(7);
        assert_eq!(&*seen.lock(), &[("a", 7), ("b", 7)]);
    }

    #[test]
    fn disconnect_removes_slot() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        let id = signal.connect(move |()| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.emit(());
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_disconnects_on_drop() {
        let signal = Signal::<()>::new();
        {
            let _guard = signal.connect_guard(|()| {});
            assert_eq!(signal.connection_count(), 1);
        }
        assert_eq!(signal.connection_count(), 0);
    }

    #[test]
    fn panicking_slot_does_not_stop_others() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        signal.connect(|()| panic!("bad handler"));
        let hits_clone = hits.clone();
        signal.connect(move |()| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(signal.emit(()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocked_signal_does_not_emit() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        signal.connect(move |()| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        signal.set_blocked(true);
        signal.emit(());
        signal.set_blocked(false);
        signal.emit(());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_slots() {
        let signal = Signal::<()>::new();
        let other = signal.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        signal.connect(move |()| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        other.emit(());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
