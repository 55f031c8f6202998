//! Connection state manager (C9).
//!
//! Tracks the link state the rest of the stack (queue, management) waits on,
//! and notifies registered callbacks in registration order. A transition to
//! the state already held is a no-op: no callback runs, no waiter wakes.

use std::sync::Mutex;

use tokio::sync::watch;

/// Link state of the underlying interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type Callback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Current link state plus a `watch` channel `CONNECTED` waiters can await,
/// and a list of callbacks run synchronously on every genuine transition.
pub struct ConnectionManager {
    tx: watch::Sender<ConnectionState>,
    callbacks: Mutex<Vec<Callback>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Register a callback invoked, in registration order, on every state
    /// transition that actually changes the state.
    pub fn on_transition(&self, callback: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.callbacks.lock().expect("connection manager mutex poisoned").push(Box::new(callback));
    }

    /// Move to `state`. No-op (no callbacks run, no waiters wake) if already
    /// in that state.
    pub fn transition(&self, state: ConnectionState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if !changed {
            return;
        }
        let callbacks = self.callbacks.lock().expect("connection manager mutex poisoned");
        for callback in callbacks.iter() {
            callback(state);
        }
    }

    /// Suspend until the state becomes `CONNECTED`.
    pub async fn wait_connected(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() == ConnectionState::Connected {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() == ConnectionState::Connected {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn repeated_transition_to_same_state_is_a_no_op() {
        let manager = ConnectionManager::new(ConnectionState::Disconnected);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        manager.on_transition(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.transition(ConnectionState::Disconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        manager.transition(ConnectionState::Connecting);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_connected_resolves_after_transition() {
        let manager = Arc::new(ConnectionManager::new(ConnectionState::Connecting));
        let waiter = Arc::clone(&manager);
        let handle = tokio::spawn(async move { waiter.wait_connected().await });
        manager.transition(ConnectionState::Connected);
        handle.await.unwrap();
    }
}
