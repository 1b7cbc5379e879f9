//! Interception layer.
//!
//! A [`Sandbox`] belongs to one window. It owns that window's
//! [`NativeMethods`] catalogue and exposes the wrapped version of every
//! operation that can introduce or reveal a URL. Page code calls the
//! wrapped operations; the wrapped operations call the catalogue.
//!
//! The invariant kept for every URL-bearing attribute of a processed node:
//! the public attribute holds the proxy URL the network must see, and the
//! shadow attribute named by [`attrs::stored_attr_name`] holds the original
//! the page wrote. Reads through the sandbox return the original.

pub mod attrs;
mod canvas;
mod journal;
pub mod marker;
pub mod native;
mod worker;

use crate::audit::{self, RewriteSource};
use crate::codec::{should_rewrite, ProxyPort, ProxyUrlDescriptor, UrlCodec};
use crate::dom::{AdjacentPosition, Attr, Dom, DomResult, NodeId, WindowId};
use crate::session::{Event, EventBus, EventData, EventKind};
use crate::session_id::SessionId;
use attrs::{affects_url_kind, is_stored_attr_name, is_url_attr, stored_attr_name, url_attr_kind};
use journal::RewriteJournal;
use native::NativeMethods;
use tracing::debug;
use url::Url;

/// Per-window interception layer.
#[derive(Debug)]
pub struct Sandbox {
    window: WindowId,
    document: NodeId,
    session: SessionId,
    port: ProxyPort,
    codec: UrlCodec,
    natives: NativeMethods,
    events: EventBus,
    sandboxed_frame: bool,
    substitutes: canvas::SubstituteCache,
}

impl Sandbox {
    /// Build the sandbox of `window`, whose document is `document` and
    /// which is served from the proxy's `port`.
    #[must_use]
    pub fn new(
        window: WindowId,
        document: NodeId,
        session: SessionId,
        port: ProxyPort,
        codec: UrlCodec,
        natives: NativeMethods,
    ) -> Self {
        Self {
            window,
            document,
            session,
            port,
            codec,
            natives,
            events: EventBus::new(),
            sandboxed_frame: false,
            substitutes: canvas::SubstituteCache::default(),
        }
    }

    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    #[must_use]
    pub fn document(&self) -> NodeId {
        self.document
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    #[must_use]
    pub fn port(&self) -> ProxyPort {
        self.port
    }

    #[must_use]
    pub fn codec(&self) -> &UrlCodec {
        &self.codec
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The unwrapped operations of this window.
    #[must_use]
    pub fn native(&self) -> &NativeMethods {
        &self.natives
    }

    #[cfg(test)]
    pub(crate) fn native_mut(&mut self) -> &mut NativeMethods {
        &mut self.natives
    }

    /// Mark this window as a frame with a `sandbox` attribute.
    pub(crate) fn set_sandboxed_frame(&mut self, sandboxed: bool) {
        self.sandboxed_frame = sandboxed;
    }

    /// Whether `node` carries this window's processed marker.
    #[must_use]
    pub fn is_processed(&self, dom: &Dom, node: NodeId) -> bool {
        dom.markers.is_processed_by(node, self.window)
    }

    // ------------------------------------------------------------------
    // Destinations
    // ------------------------------------------------------------------

    /// Destination address of a document (its real address decoded).
    #[must_use]
    pub fn document_destination(&self, dom: &Dom, doc: NodeId) -> Option<Url> {
        let url = dom.document_url(doc);
        match self.codec.decode(url) {
            Some(descriptor) => Some(descriptor.destination().clone()),
            None => Url::parse(url).ok().filter(|u| !u.cannot_be_a_base()),
        }
    }

    /// Base that relative references in `node`'s document resolve against:
    /// the first `<base href>`, else the document's destination.
    #[must_use]
    pub fn destination_base(&self, dom: &Dom, node: NodeId) -> Option<Url> {
        self.document_base(dom, dom.owner_document(node))
    }

    fn document_base(&self, dom: &Dom, doc: NodeId) -> Option<Url> {
        let doc_destination = self.document_destination(dom, doc)?;
        let base_href = dom.find_first_by_tag(doc, "base").and_then(|base| {
            (self.natives.get_attribute)(dom, base, &stored_attr_name("href"))
                .or_else(|| (self.natives.get_attribute)(dom, base, "href"))
        });
        if let Some(href) = base_href {
            if let Ok(url) = self.codec.resolve_as_destination(&href, &doc_destination) {
                return Some(url);
            }
        }
        Some(doc_destination)
    }

    /// Proxy form of `original` written to `attr` of `node` living in
    /// document `doc`, or `None` when the value must stay verbatim.
    fn proxy_value(
        &self,
        dom: &Dom,
        doc: NodeId,
        node: NodeId,
        attr: &str,
        original: &str,
    ) -> Option<String> {
        if !should_rewrite(original) {
            return None;
        }
        let base = self.document_base(dom, doc)?;
        let destination = self.codec.resolve_as_destination(original, &base).ok()?;
        let kind = url_attr_kind(dom, node, attr);
        let tag = dom.tag_name(node).unwrap_or_default();

        let port = if matches!(tag.as_str(), "iframe" | "frame") {
            self.frame_port(dom, doc, &destination)
        } else {
            self.port
        };

        let mut descriptor = ProxyUrlDescriptor::new(destination, self.session.clone())
            .with_kind(kind)
            .with_port(port);
        if matches!(tag.as_str(), "script" | "link") {
            if let Some(charset) = (self.natives.get_attribute)(dom, node, "charset") {
                if let Ok(with_charset) = descriptor.clone().with_charset(charset) {
                    descriptor = with_charset;
                }
            }
        }
        Some(self.codec.encode(&descriptor))
    }

    /// Frames whose destination origin differs from their embedder's are
    /// served from the other proxy port, so the platform isolates them.
    fn frame_port(&self, dom: &Dom, doc: NodeId, destination: &Url) -> ProxyPort {
        let embedder = self.document_destination(dom, doc);
        match embedder {
            Some(embedder) if embedder.origin() != destination.origin() => self.port.other(),
            _ => self.port,
        }
    }

    // ------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------

    fn rewrite_url_attr(
        &self,
        dom: &mut Dom,
        doc: NodeId,
        node: NodeId,
        attr: &Attr,
        source: RewriteSource,
        journal: &mut RewriteJournal,
    ) -> DomResult<()> {
        let namespace = attr.namespace.as_deref();
        let stored_local = stored_attr_name(&attr.local_name);
        let original = (self.natives.get_attribute_ns)(dom, node, namespace, &stored_local)
            .unwrap_or_else(|| attr.value.clone());
        let public = self
            .proxy_value(dom, doc, node, &attr.local_name, &original)
            .unwrap_or_else(|| original.clone());
        let stored_qualified = match attr.prefix {
            Some(ref prefix) => format!("{}:{}", prefix, stored_local),
            None => stored_local,
        };

        journal.save_attrs(dom, node);
        (self.natives.set_attribute_ns)(dom, node, namespace, &attr.qualified_name(), &public)?;
        (self.natives.set_attribute_ns)(dom, node, namespace, &stored_qualified, &original)?;
        audit::log_rewrite(
            self.window,
            source,
            &attr.local_name,
            url_attr_kind(dom, node, &attr.local_name),
            &public,
        );
        Ok(())
    }

    fn rewrite_element(
        &self,
        dom: &mut Dom,
        doc: NodeId,
        node: NodeId,
        source: RewriteSource,
        journal: &mut RewriteJournal,
    ) -> DomResult<()> {
        let Some(tag) = dom.tag_name(node) else {
            return Ok(());
        };
        for attr in dom.attributes(node) {
            if is_stored_attr_name(&attr.local_name) || !is_url_attr(&tag, &attr.local_name) {
                continue;
            }
            self.rewrite_url_attr(dom, doc, node, &attr, source, journal)?;
        }
        Ok(())
    }

    /// Walk `root` and its descendants, rewriting and stamping every node
    /// not yet processed by this window. URLs resolve against `doc`, the
    /// document the subtree lives in (or is about to). Stamping happens
    /// before rewriting, so a nested walk over the same node is a no-op.
    fn process_subtree(
        &self,
        dom: &mut Dom,
        doc: NodeId,
        root: NodeId,
        source: RewriteSource,
        journal: &mut RewriteJournal,
    ) -> DomResult<()> {
        for node in dom.inclusive_descendants(root) {
            if dom.markers.is_processed_by(node, self.window) {
                continue;
            }
            let previous = dom.markers.stamp(node, self.window);
            journal.save_marker(node, previous);
            if let Some(other) = previous {
                debug!("{} adopts {} processed by {}", self.window, node, other);
            }
            self.rewrite_element(dom, doc, node, source, journal)?;
        }
        Ok(())
    }

    fn process_new(&self, dom: &mut Dom, root: NodeId) -> DomResult<()> {
        let mut journal = RewriteJournal::default();
        let doc = dom.owner_document(root);
        self.process_subtree(dom, doc, root, RewriteSource::Creation, &mut journal)
    }

    /// Process `node` for an insertion, run the native insertion and roll
    /// the rewrite back if the native call fails.
    fn insert_staged<T>(
        &self,
        dom: &mut Dom,
        parent: NodeId,
        node: NodeId,
        operation: &str,
        call: impl FnOnce(&mut Dom) -> DomResult<T>,
    ) -> DomResult<T> {
        let mut journal = RewriteJournal::default();
        let doc = dom.owner_document(parent);
        let staged = self.process_subtree(dom, doc, node, RewriteSource::Insertion, &mut journal);
        let outcome = match staged {
            Ok(()) => call(dom),
            Err(e) => Err(e),
        };
        if let Err(ref e) = outcome {
            audit::log_rollback(self.window, operation, journal.len(), &e.to_string());
            journal.rollback(dom);
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// `document.createElement`.
    pub fn create_element(&self, dom: &mut Dom, tag: &str) -> DomResult<NodeId> {
        let node = (self.natives.create_element)(dom, self.document, tag)?;
        self.process_new(dom, node)?;
        Ok(node)
    }

    /// `document.createElementNS`.
    pub fn create_element_ns(
        &self,
        dom: &mut Dom,
        namespace: Option<&str>,
        qualified: &str,
    ) -> DomResult<NodeId> {
        let node = (self.natives.create_element_ns)(dom, self.document, namespace, qualified)?;
        self.process_new(dom, node)?;
        Ok(node)
    }

    /// `document.createDocumentFragment`.
    pub fn create_document_fragment(&self, dom: &mut Dom) -> DomResult<NodeId> {
        let node = (self.natives.create_document_fragment)(dom, self.document);
        self.process_new(dom, node)?;
        Ok(node)
    }

    /// `node.cloneNode`. The copy has no marker of its own until processed
    /// here, and its URLs are recomputed from the copied originals.
    pub fn clone_node(&self, dom: &mut Dom, node: NodeId, deep: bool) -> DomResult<NodeId> {
        let copy = (self.natives.clone_node)(dom, node, deep)?;
        self.process_new(dom, copy)?;
        Ok(copy)
    }

    /// `range.createContextualFragment` with the range inside `context`.
    pub fn create_contextual_fragment(
        &self,
        dom: &mut Dom,
        context: NodeId,
        markup: &str,
    ) -> DomResult<NodeId> {
        let fragment = (self.natives.create_contextual_fragment)(dom, context, markup)?;
        self.process_new(dom, fragment)?;
        Ok(fragment)
    }

    /// `new DOMParser().parseFromString`. Only HTML documents are
    /// rewritten; XML keeps its attribute text.
    pub fn parse_from_string(
        &self,
        dom: &mut Dom,
        markup: &str,
        mime_type: Option<&str>,
    ) -> DomResult<NodeId> {
        let doc = (self.natives.parse_from_string)(dom, self.document, markup, mime_type)?;
        if mime_type == Some("text/html") {
            self.process_new(dom, doc)?;
        }
        Ok(doc)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// `parent.appendChild(child)`; returns `child`.
    pub fn append_child(&self, dom: &mut Dom, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        let native = self.natives.append_child;
        self.insert_staged(dom, parent, child, "appendChild", |dom| native(dom, parent, child))
    }

    /// `parent.insertBefore(child, reference)`; returns `child`.
    pub fn insert_before(
        &self,
        dom: &mut Dom,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<NodeId> {
        let native = self.natives.insert_before;
        self.insert_staged(dom, parent, child, "insertBefore", |dom| {
            native(dom, parent, child, reference)
        })
    }

    /// `parent.removeChild(child)`. Nothing to rewrite.
    pub fn remove_child(&self, dom: &mut Dom, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        (self.natives.remove_child)(dom, parent, child)
    }

    /// `element.insertAdjacentHTML`. The markup is parsed into a detached
    /// fragment and rewritten before the native insertion sees it, so no
    /// inserted node is ever live with an unproxied URL.
    pub fn insert_adjacent_html(
        &self,
        dom: &mut Dom,
        element: NodeId,
        position: &str,
        markup: &str,
    ) -> DomResult<()> {
        let position = AdjacentPosition::parse(position)?;
        let context = dom.adjacent_context(element, position)?;
        let nodes = (self.natives.parse_fragment)(dom, context, markup)?;
        let doc = dom.owner_document(context);
        let fragment = (self.natives.create_document_fragment)(dom, doc);
        for node in nodes {
            (self.natives.append_child)(dom, fragment, node)?;
        }
        let native = self.natives.insert_adjacent_fragment;
        self.insert_staged(dom, context, fragment, "insertAdjacentHTML", |dom| {
            native(dom, element, position, fragment)
        })
    }

    /// `table.insertRow(index)`.
    pub fn insert_table_row(&self, dom: &mut Dom, table: NodeId, index: i64) -> DomResult<NodeId> {
        let row = (self.natives.insert_table_row)(dom, table, index)?;
        self.process_new(dom, row)?;
        Ok(row)
    }

    /// `tbody.insertRow(index)` (also thead/tfoot).
    pub fn insert_tbody_row(&self, dom: &mut Dom, section: NodeId, index: i64) -> DomResult<NodeId> {
        let row = (self.natives.insert_tbody_row)(dom, section, index)?;
        self.process_new(dom, row)?;
        Ok(row)
    }

    /// `row.insertCell(index)`.
    pub fn insert_cell(&self, dom: &mut Dom, row: NodeId, index: i64) -> DomResult<NodeId> {
        let cell = (self.natives.insert_cell)(dom, row, index)?;
        self.process_new(dom, cell)?;
        Ok(cell)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn is_url_attr_of(&self, dom: &Dom, element: NodeId, name: &str) -> bool {
        dom.tag_name(element)
            .is_some_and(|tag| is_url_attr(&tag, local_part(name)))
    }

    fn ensure_processed(&self, dom: &mut Dom, element: NodeId) -> DomResult<()> {
        if self.is_processed(dom, element) {
            return Ok(());
        }
        self.process_new(dom, element)
    }

    /// Recompute the proxy form of every URL attribute of `element` after
    /// an attribute that feeds its classification changed.
    fn refresh_url_attrs(&self, dom: &mut Dom, element: NodeId) -> DomResult<()> {
        if !self.is_processed(dom, element) {
            return Ok(());
        }
        let mut journal = RewriteJournal::default();
        let doc = dom.owner_document(element);
        self.rewrite_element(dom, doc, element, RewriteSource::Attribute, &mut journal)
    }

    /// Run a sequence of native attribute writes on `element`, restoring its
    /// attributes if any of them fails.
    fn attribute_staged(
        &self,
        dom: &mut Dom,
        element: NodeId,
        operation: &str,
        call: impl FnOnce(&mut Dom) -> DomResult<()>,
    ) -> DomResult<()> {
        let mut journal = RewriteJournal::default();
        journal.save_attrs(dom, element);
        let outcome = call(dom);
        if let Err(ref e) = outcome {
            audit::log_rollback(self.window, operation, journal.len(), &e.to_string());
            journal.rollback(dom);
        }
        outcome
    }

    /// `element.getAttribute`: URL attributes read as the original.
    #[must_use]
    pub fn get_attribute(&self, dom: &Dom, element: NodeId, name: &str) -> Option<String> {
        if self.is_url_attr_of(dom, element, name) {
            if let Some(stored) = (self.natives.get_attribute)(dom, element, &stored_attr_name(name)) {
                return Some(stored);
            }
        }
        (self.natives.get_attribute)(dom, element, name)
    }

    /// `element.setAttribute`.
    pub fn set_attribute(&self, dom: &mut Dom, element: NodeId, name: &str, value: &str) -> DomResult<()> {
        if !self.is_url_attr_of(dom, element, name) {
            (self.natives.set_attribute)(dom, element, name, value)?;
            if affects_url_kind(name) {
                self.refresh_url_attrs(dom, element)?;
            }
            return Ok(());
        }
        self.ensure_processed(dom, element)?;
        let public = self
            .proxy_value(dom, dom.owner_document(element), element, name, value)
            .unwrap_or_else(|| value.to_string());
        let set = self.natives.set_attribute;
        self.attribute_staged(dom, element, "setAttribute", |dom| {
            set(dom, element, name, &public)?;
            set(dom, element, &stored_attr_name(name), value)
        })?;
        audit::log_rewrite(
            self.window,
            RewriteSource::Attribute,
            name,
            url_attr_kind(dom, element, name),
            &public,
        );
        Ok(())
    }

    /// `element.removeAttribute`: drops the public and stored forms.
    pub fn remove_attribute(&self, dom: &mut Dom, element: NodeId, name: &str) -> DomResult<()> {
        let url_attr = self.is_url_attr_of(dom, element, name);
        let remove = self.natives.remove_attribute;
        self.attribute_staged(dom, element, "removeAttribute", |dom| {
            remove(dom, element, name)?;
            if url_attr {
                remove(dom, element, &stored_attr_name(name))?;
            }
            Ok(())
        })
    }

    /// `element.getAttributeNS`.
    #[must_use]
    pub fn get_attribute_ns(
        &self,
        dom: &Dom,
        element: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> Option<String> {
        if self.is_url_attr_of(dom, element, local) {
            let stored = (self.natives.get_attribute_ns)(dom, element, namespace, &stored_attr_name(local));
            if stored.is_some() {
                return stored;
            }
        }
        (self.natives.get_attribute_ns)(dom, element, namespace, local)
    }

    /// `element.setAttributeNS`.
    pub fn set_attribute_ns(
        &self,
        dom: &mut Dom,
        element: NodeId,
        namespace: Option<&str>,
        qualified: &str,
        value: &str,
    ) -> DomResult<()> {
        if !self.is_url_attr_of(dom, element, qualified) {
            return (self.natives.set_attribute_ns)(dom, element, namespace, qualified, value);
        }
        self.ensure_processed(dom, element)?;
        let local = local_part(qualified);
        let public = self
            .proxy_value(dom, dom.owner_document(element), element, local, value)
            .unwrap_or_else(|| value.to_string());
        let stored_qualified = match qualified.split_once(':') {
            Some((prefix, local)) => format!("{}:{}", prefix, stored_attr_name(local)),
            None => stored_attr_name(qualified),
        };
        let set = self.natives.set_attribute_ns;
        self.attribute_staged(dom, element, "setAttributeNS", |dom| {
            set(dom, element, namespace, qualified, &public)?;
            set(dom, element, namespace, &stored_qualified, value)
        })?;
        audit::log_rewrite(
            self.window,
            RewriteSource::Attribute,
            local,
            url_attr_kind(dom, element, local),
            &public,
        );
        Ok(())
    }

    /// `element.removeAttributeNS`.
    pub fn remove_attribute_ns(
        &self,
        dom: &mut Dom,
        element: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> DomResult<()> {
        let url_attr = self.is_url_attr_of(dom, element, local);
        let remove = self.natives.remove_attribute_ns;
        self.attribute_staged(dom, element, "removeAttributeNS", |dom| {
            remove(dom, element, namespace, local)?;
            if url_attr {
                remove(dom, element, namespace, &stored_attr_name(local))?;
            }
            Ok(())
        })
    }

    /// Reflected URL property getter (`a.href`, `img.src`, `form.action`):
    /// the original resolved against the destination base. A form without
    /// an action reflects its document's destination.
    #[must_use]
    pub fn get_url_property(&self, dom: &Dom, element: NodeId, attr: &str) -> String {
        let Some(original) = self.get_attribute(dom, element, attr) else {
            if attr == "action" && dom.tag_name(element).as_deref() == Some("form") {
                return self
                    .document_destination(dom, dom.owner_document(element))
                    .map(|url| url.to_string())
                    .unwrap_or_default();
            }
            return String::new();
        };
        self.destination_base(dom, element)
            .and_then(|base| self.codec.resolve_as_destination(&original, &base).ok())
            .map(|url| url.to_string())
            .unwrap_or(original)
    }

    /// Reflected URL property setter.
    pub fn set_url_property(&self, dom: &mut Dom, element: NodeId, attr: &str, value: &str) -> DomResult<()> {
        self.ensure_processed(dom, element)?;
        let public = self
            .proxy_value(dom, dom.owner_document(element), element, attr, value)
            .unwrap_or_else(|| value.to_string());
        let (set_property, set) = (self.natives.url_property_setter, self.natives.set_attribute);
        self.attribute_staged(dom, element, "setUrlProperty", |dom| {
            set_property(dom, element, attr, &public)?;
            set(dom, element, &stored_attr_name(attr), value)
        })
    }

    // ------------------------------------------------------------------
    // Forms
    // ------------------------------------------------------------------

    /// `form.submit()`. Subscribers of [`EventKind::BeforeFormSubmit`] see
    /// the original action and may cancel; returns whether the form was
    /// sent.
    pub fn submit_form(&self, dom: &mut Dom, form: NodeId) -> DomResult<bool> {
        if dom.tag_name(form).as_deref() != Some("form") {
            (self.natives.form_submit)(dom, form)?;
            return Ok(true);
        }
        let action = self.get_url_property(dom, form, "action");
        let target = (self.natives.get_attribute)(dom, form, "target");

        let mut event = Event::new(
            EventKind::BeforeFormSubmit,
            self.window,
            EventData::FormSubmit {
                form,
                action: action.clone(),
                target,
            },
        );
        self.events.emit(&mut event);
        let cancelled = event.is_prevented();
        audit::log_form_submit(self.window, &action, cancelled);
        if cancelled {
            return Ok(false);
        }

        self.ensure_processed(dom, form)?;
        (self.natives.form_submit)(dom, form)?;
        Ok(true)
    }
}

/// Local part of a possibly prefixed attribute name.
fn local_part(name: &str) -> &str {
    name.split_once(':').map_or(name, |(_, local)| local)
}
