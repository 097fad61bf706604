//! Listener registry for connection and message events
//!
//! Each event kind keeps its own ordered set of listeners. The transport
//! invokes them synchronously from its event-loop task, in registration
//! order, with no buffering or filtering.

use crate::models::{ConnectedEventArgs, DisconnectedEventArgs, ReceivedMessageEventArgs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Event kinds a listener can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageReceived,
    Connected,
    Disconnected,
}

/// Identifies one registered listener so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    kind: EventKind,
    id: u64,
}

impl ListenerHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct Listeners<F: ?Sized> {
    entries: RwLock<Vec<(u64, Arc<F>)>>,
}

impl<F: ?Sized> Default for Listeners<F> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> Listeners<F> {
    fn add(&self, id: u64, listener: Arc<F>) {
        match self.entries.write() {
            Ok(mut entries) => entries.push((id, listener)),
            Err(poisoned) => poisoned.into_inner().push((id, listener)),
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Clone the current listeners so callbacks run without holding the lock
    fn snapshot(&self) -> Vec<Arc<F>> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().map(|(_, listener)| listener.clone()).collect()
    }

    fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    message_received: Listeners<dyn Fn(&ReceivedMessageEventArgs) + Send + Sync>,
    connected: Listeners<dyn Fn(&ConnectedEventArgs) + Send + Sync>,
    disconnected: Listeners<dyn Fn(&DisconnectedEventArgs) + Send + Sync>,
}

/// Shared handle to the listener registry
///
/// Cloning is cheap; every clone sees the same listeners. The client keeps
/// one clone for registration and hands another to the transport for
/// dispatch.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("message_received", &self.listener_count(EventKind::MessageReceived))
            .field("connected", &self.listener_count(EventKind::Connected))
            .field("disconnected", &self.listener_count(EventKind::Disconnected))
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&self, kind: EventKind) -> ListenerHandle {
        ListenerHandle {
            kind,
            id: self.registry.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn on_message_received<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ReceivedMessageEventArgs) + Send + Sync + 'static,
    {
        let handle = self.next_handle(EventKind::MessageReceived);
        self.registry
            .message_received
            .add(handle.id, Arc::new(listener));
        handle
    }

    pub fn on_connected<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&ConnectedEventArgs) + Send + Sync + 'static,
    {
        let handle = self.next_handle(EventKind::Connected);
        self.registry.connected.add(handle.id, Arc::new(listener));
        handle
    }

    pub fn on_disconnected<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&DisconnectedEventArgs) + Send + Sync + 'static,
    {
        let handle = self.next_handle(EventKind::Disconnected);
        self.registry.disconnected.add(handle.id, Arc::new(listener));
        handle
    }

    /// Remove a listener; returns false if it was already gone
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        match handle.kind {
            EventKind::MessageReceived => self.registry.message_received.remove(handle.id),
            EventKind::Connected => self.registry.connected.remove(handle.id),
            EventKind::Disconnected => self.registry.disconnected.remove(handle.id),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::MessageReceived => self.registry.message_received.len(),
            EventKind::Connected => self.registry.connected.len(),
            EventKind::Disconnected => self.registry.disconnected.len(),
        }
    }

    pub fn emit_message_received(&self, args: &ReceivedMessageEventArgs) {
        let listeners = self.registry.message_received.snapshot();
        if listeners.is_empty() {
            warn!(topic = %args.topic, "Message received but no listener registered - dropped");
        }
        for listener in listeners {
            listener(args);
        }
    }

    pub fn emit_connected(&self, args: &ConnectedEventArgs) {
        for listener in self.registry.connected.snapshot() {
            listener(args);
        }
    }

    pub fn emit_disconnected(&self, args: &DisconnectedEventArgs) {
        for listener in self.registry.disconnected.snapshot() {
            listener(args);
        }
    }
}
