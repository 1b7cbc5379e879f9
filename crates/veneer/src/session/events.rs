//! Per-window publish/subscribe surface.
//!
//! Subscribers run synchronously, in registration order, at the point the
//! owning operation fires the event. Dispatch works on a snapshot of the
//! subscriber list, so `on`/`off` calls made by a handler only take effect
//! from the next dispatch.

use crate::dom::{NodeId, WindowId};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Events a window's sandbox fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A form is about to be submitted; cancelable.
    BeforeFormSubmit,
    /// The window is about to unload.
    BeforeUnload,
    /// The window unloaded.
    Unload,
    /// A nested frame got its own sandbox and is ready for page scripts.
    IframeReadyToInit,
    /// A cross-window message arrived.
    Message,
    /// This window opened a new top-level window.
    WindowOpened,
}

/// A `message` event as page script sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub data: serde_json::Value,
    /// Destination origin of the sender.
    pub origin: String,
    pub source: WindowId,
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    FormSubmit {
        form: NodeId,
        /// Action with original (destination) semantics.
        action: String,
        target: Option<String>,
    },
    Unload,
    FrameReady {
        frame: NodeId,
        window: WindowId,
    },
    Message(MessageEvent),
    WindowOpened {
        window: WindowId,
        url: String,
    },
}

/// An event in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    window: WindowId,
    data: EventData,
    prevented: bool,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, window: WindowId, data: EventData) -> Self {
        Self {
            kind,
            window,
            data,
            prevented: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Window whose sandbox fired the event.
    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    #[must_use]
    pub fn data(&self) -> &EventData {
        &self.data
    }

    /// Cancel the operation that fired the event, where it is cancelable.
    pub fn prevent_default(&mut self) {
        self.prevented = true;
    }

    #[must_use]
    pub fn is_prevented(&self) -> bool {
        self.prevented
    }
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Rc<dyn Fn(&mut Event)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Handler)>>,
}

/// Ordered multi-subscriber event bus. Clones share subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<RefCell<Listeners>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let counts: HashMap<_, _> = inner.by_kind.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind`.
    pub fn on(&self, kind: EventKind, handler: impl Fn(&mut Event) + 'static) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Rc::new(handler)));
        id
    }

    /// Remove a subscription. Returns true if it existed.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let mut removed = false;
        let mut became_empty = false;
        if let Some(subs) = inner.by_kind.get_mut(&kind) {
            let before = subs.len();
            subs.retain(|(sid, _)| *sid != id);
            removed = subs.len() != before;
            became_empty = subs.is_empty();
        }
        if became_empty {
            inner.by_kind.remove(&kind);
        }
        removed
    }

    /// Remove every subscription for `kind`. Returns how many were removed.
    pub fn off_all(&self, kind: EventKind) -> usize {
        self.inner
            .borrow_mut()
            .by_kind
            .remove(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner
            .borrow()
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Run every subscriber of the event's kind, in registration order.
    pub fn emit(&self, event: &mut Event) {
        let snapshot: Vec<Handler> = match self.inner.borrow().by_kind.get(&event.kind) {
            Some(subs) => subs.iter().map(|(_, h)| Rc::clone(h)).collect(),
            None => return,
        };
        for handler in snapshot {
            handler(event);
        }
    }
}
