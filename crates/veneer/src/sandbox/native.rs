//! The catalogue of unwrapped platform operations.
//!
//! Each window captures its own [`NativeMethods`] when its sandbox is
//! built. Wrapped operations call through these entries, never through the
//! DOM directly, so the catalogue is the single seam between the sandbox
//! and the platform.

use crate::dom::{AdjacentPosition, CanvasContextId, CanvasImageSource, Dom, DomResult, NodeId};
use crate::session::MessageEnvelope;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Arguments of a service worker registration, as the platform sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceWorkerRequest {
    pub script_url: String,
    pub scope: String,
}

/// A completed service worker registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub script_url: String,
    pub scope: String,
}

/// Pending outcome of a service worker registration.
pub type RegistrationFuture = Pin<Box<dyn Future<Output = DomResult<Registration>>>>;

/// Unwrapped implementations, captured once per window.
pub struct NativeMethods {
    pub create_element: fn(&mut Dom, NodeId, &str) -> DomResult<NodeId>,
    pub create_element_ns: fn(&mut Dom, NodeId, Option<&str>, &str) -> DomResult<NodeId>,
    pub create_document_fragment: fn(&mut Dom, NodeId) -> NodeId,
    pub clone_node: fn(&mut Dom, NodeId, bool) -> DomResult<NodeId>,
    pub append_child: fn(&mut Dom, NodeId, NodeId) -> DomResult<NodeId>,
    pub insert_before: fn(&mut Dom, NodeId, NodeId, Option<NodeId>) -> DomResult<NodeId>,
    pub remove_child: fn(&mut Dom, NodeId, NodeId) -> DomResult<NodeId>,
    /// Markup parsed in an element's context (`insertAdjacentHTML`'s parse step).
    pub parse_fragment: fn(&mut Dom, NodeId, &str) -> DomResult<Vec<NodeId>>,
    /// `insertAdjacentHTML`'s insertion step, given the parsed fragment.
    pub insert_adjacent_fragment: fn(&mut Dom, NodeId, AdjacentPosition, NodeId) -> DomResult<()>,
    pub insert_table_row: fn(&mut Dom, NodeId, i64) -> DomResult<NodeId>,
    pub insert_tbody_row: fn(&mut Dom, NodeId, i64) -> DomResult<NodeId>,
    pub insert_cell: fn(&mut Dom, NodeId, i64) -> DomResult<NodeId>,
    pub get_attribute: fn(&Dom, NodeId, &str) -> Option<String>,
    pub set_attribute: fn(&mut Dom, NodeId, &str, &str) -> DomResult<()>,
    pub remove_attribute: fn(&mut Dom, NodeId, &str) -> DomResult<()>,
    pub get_attribute_ns: fn(&Dom, NodeId, Option<&str>, &str) -> Option<String>,
    pub set_attribute_ns: fn(&mut Dom, NodeId, Option<&str>, &str, &str) -> DomResult<()>,
    pub remove_attribute_ns: fn(&mut Dom, NodeId, Option<&str>, &str) -> DomResult<()>,
    /// Reflected URL getters (`anchorHrefGetter`, `imageSrcGetter`, ...),
    /// keyed by attribute name.
    pub url_property_getter: fn(&Dom, NodeId, &str) -> String,
    pub url_property_setter: fn(&mut Dom, NodeId, &str, &str) -> DomResult<()>,
    pub create_contextual_fragment: fn(&mut Dom, NodeId, &str) -> DomResult<NodeId>,
    pub parse_from_string: fn(&mut Dom, NodeId, &str, Option<&str>) -> DomResult<NodeId>,
    pub canvas_context_draw_image:
        fn(&mut Dom, CanvasContextId, CanvasImageSource, &[f64]) -> DomResult<()>,
    pub register_service_worker: fn(ServiceWorkerRequest) -> RegistrationFuture,
    pub form_submit: fn(&mut Dom, NodeId) -> DomResult<()>,
    pub post_message: fn(&UnboundedSender<MessageEnvelope>, MessageEnvelope) -> DomResult<()>,
}

impl NativeMethods {
    /// Capture the platform implementations for a new window.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            create_element: Dom::create_element,
            create_element_ns: Dom::create_element_ns,
            create_document_fragment: Dom::create_document_fragment,
            clone_node: Dom::clone_node,
            append_child: Dom::append_child,
            insert_before: Dom::insert_before,
            remove_child: Dom::remove_child,
            parse_fragment: Dom::parse_fragment,
            insert_adjacent_fragment: Dom::insert_adjacent_fragment,
            insert_table_row: Dom::insert_table_row,
            insert_tbody_row: Dom::insert_section_row,
            insert_cell: Dom::insert_cell,
            get_attribute: Dom::get_attribute,
            set_attribute: Dom::set_attribute,
            remove_attribute: Dom::remove_attribute,
            get_attribute_ns: Dom::get_attribute_ns,
            set_attribute_ns: Dom::set_attribute_ns,
            remove_attribute_ns: Dom::remove_attribute_ns,
            url_property_getter: Dom::reflect_url,
            url_property_setter: Dom::set_attribute,
            create_contextual_fragment: Dom::create_contextual_fragment,
            parse_from_string: Dom::parse_from_string,
            canvas_context_draw_image: Dom::draw_image,
            register_service_worker: native_register_service_worker,
            form_submit: Dom::submit_form,
            post_message: native_post_message,
        }
    }
}

impl fmt::Debug for NativeMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethods").finish_non_exhaustive()
    }
}

fn native_register_service_worker(request: ServiceWorkerRequest) -> RegistrationFuture {
    Box::pin(async move {
        Ok(Registration {
            script_url: request.script_url,
            scope: request.scope,
        })
    })
}

fn native_post_message(
    channel: &UnboundedSender<MessageEnvelope>,
    envelope: MessageEnvelope,
) -> DomResult<()> {
    let source = envelope.source;
    if channel.send(envelope).is_err() {
        // Posting to a closed window is silently dropped by the platform.
        debug!("message from {} dropped: target window is gone", source);
    }
    Ok(())
}
