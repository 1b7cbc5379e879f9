//! Audit logging for sandbox decisions.
//!
//! Emits structured `tracing` events for every URL rewrite, rejected
//! operation and cross-window relay. Message payloads and attribute values
//! other than URLs are never included.

use crate::dom::WindowId;
use crate::resource::ResourceKind;
use tracing::{debug, info, warn};

/// Where a rewrite originated.
#[derive(Debug, Clone, Copy)]
pub enum RewriteSource {
    /// Walk of a created, cloned or parsed subtree.
    Creation,
    /// Walk of a subtree inserted into the tree.
    Insertion,
    /// Explicit attribute or property set.
    Attribute,
}

impl std::fmt::Display for RewriteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteSource::Creation => write!(f, "creation"),
            RewriteSource::Insertion => write!(f, "insertion"),
            RewriteSource::Attribute => write!(f, "attribute"),
        }
    }
}

/// Log a URL attribute rewritten to proxy form.
pub fn log_rewrite(
    window: WindowId,
    source: RewriteSource,
    attr: &str,
    kind: ResourceKind,
    proxy_url: &str,
) {
    debug!(
        target: "veneer::audit",
        window = %window,
        source = %source,
        attr = attr,
        kind = %kind,
        proxy_url = proxy_url,
        "url attribute rewritten"
    );
}

/// Log a staged rewrite rolled back after a native failure.
pub fn log_rollback(window: WindowId, operation: &str, entries: usize, reason: &str) {
    warn!(
        target: "veneer::audit",
        window = %window,
        operation = operation,
        entries = entries,
        reason = reason,
        "native operation failed, rewrite rolled back"
    );
}

/// Log a service worker registration decision.
pub fn log_service_worker(window: WindowId, script: &str, decision: &str) {
    info!(
        target: "veneer::audit",
        window = %window,
        script = script,
        decision = decision,
        "service worker registration"
    );
}

/// Log a form submission after subscribers ran.
pub fn log_form_submit(window: WindowId, action: &str, cancelled: bool) {
    info!(
        target: "veneer::audit",
        window = %window,
        action = action,
        decision = if cancelled { "cancel" } else { "submit" },
        "form submission"
    );
}

/// Log a message relayed between windows (payload omitted).
pub fn log_relay(from: WindowId, to: WindowId, origin: &str, delivered: bool) {
    debug!(
        target: "veneer::audit",
        from = %from,
        to = %to,
        origin = origin,
        decision = if delivered { "deliver" } else { "drop" },
        "cross-window message"
    );
}

/// Log a window lifecycle change.
pub fn log_window(window: WindowId, event: &str, url: &str) {
    info!(
        target: "veneer::audit",
        window = %window,
        event = event,
        url = url,
        "window lifecycle"
    );
}
