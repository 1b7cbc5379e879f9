//! Session/context coordination across the windows of one proxy session.
//!
//! Every window or frame gets its own [`SessionContext`]: a sandbox with a
//! freshly captured native catalogue, an event bus and a message inbox.
//! The [`Coordinator`] owns the shared DOM and the frame tree, bootstraps
//! nested frames as they are attached, relays cross-window messages and
//! tears windows down on unload. Page scripts reach their window through a
//! [`WindowHandle`].

mod context;
mod coordinator;
mod environment;
mod events;

pub use context::SessionContext;
pub use coordinator::{Coordinator, Navigation, WindowHandle};
pub use environment::{Engine, Environment, Platform};
pub use events::{Event, EventBus, EventData, EventKind, ListenerId, MessageEvent};

use crate::dom::WindowId;
use serde::{Deserialize, Serialize};

/// A structured message in transit between two windows.
///
/// The payload is carried untouched. `source_origin` is the destination
/// origin of the sending document, which is what the receiving page sees
/// as `event.origin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub source: WindowId,
    pub source_origin: String,
    /// `*` or the destination origin the receiver must have.
    pub target_origin: String,
    pub data: serde_json::Value,
}
