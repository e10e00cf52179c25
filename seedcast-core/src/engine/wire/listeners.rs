//! Listener registry for server messages

use std::collections::HashMap;
use std::sync::Arc;

use super::message::{EventKind, ServerMessage};

/// Callback invoked for a dispatched server message.
pub type Listener = Arc<dyn Fn(&ServerMessage) + Send + Sync>;

/// Handle returned by `attach`, used for targeted `detach`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-kind listeners plus a single wildcard listener.
///
/// The wildcard fires first for every message, then the listeners registered
/// for that message kind in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    wildcard: Option<(ListenerId, Listener)>,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    /// Registers a listener for one message kind.
    pub fn attach<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Installs the wildcard listener, replacing any previous one.
    pub fn attach_wildcard<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.wildcard = Some((id, Arc::new(listener)));
        id
    }

    /// Removes registrations.
    ///
    /// With neither argument every registration is cleared. A kind alone
    /// clears that kind; an id alone removes that listener wherever it is.
    pub fn detach(&mut self, kind: Option<EventKind>, id: Option<ListenerId>) {
        match (kind, id) {
            (None, None) => {
                self.wildcard = None;
                self.by_kind.clear();
            }
            (Some(kind), None) => {
                self.by_kind.remove(&kind);
            }
            (Some(kind), Some(id)) => {
                if let Some(listeners) = self.by_kind.get_mut(&kind) {
                    listeners.retain(|(existing, _)| *existing != id);
                }
            }
            (None, Some(id)) => {
                if self.wildcard.as_ref().is_some_and(|(existing, _)| *existing == id) {
                    self.wildcard = None;
                }
                for listeners in self.by_kind.values_mut() {
                    listeners.retain(|(existing, _)| *existing != id);
                }
            }
        }
    }

    /// Listeners to run for a message, wildcard first.
    ///
    /// Returned as owned handles so the caller can invoke them without
    /// holding the registry lock.
    pub fn listeners_for(&self, kind: EventKind) -> Vec<Listener> {
        let mut selected = Vec::new();
        if let Some((_, wildcard)) = &self.wildcard {
            selected.push(Arc::clone(wildcard));
        }
        if let Some(listeners) = self.by_kind.get(&kind) {
            selected.extend(listeners.iter().map(|(_, listener)| Arc::clone(listener)));
        }
        selected
    }

    /// Invokes every matching listener in order.
    pub fn dispatch(&self, message: &ServerMessage) {
        for listener in self.listeners_for(message.kind()) {
            listener(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wildcard.is_none() && self.by_kind.values().all(Vec::is_empty)
    }
}
