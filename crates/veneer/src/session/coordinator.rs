//! Frame tree, window lifecycle and cross-window message relay.

use super::{
    Environment, Event, EventBus, EventData, EventKind, MessageEnvelope, MessageEvent,
    SessionContext,
};
use crate::audit;
use crate::codec::{should_rewrite, ProxyPort, ProxyUrlDescriptor, UrlCodec};
use crate::dom::{CanvasContextId, CanvasImageSource, Dom, DomException, DomResult, NodeId, WindowId};
use crate::error::{Result, VeneerError};
use crate::resource::{classify, LoadContext, NavigationType};
use crate::sandbox::native::{NativeMethods, RegistrationFuture};
use crate::sandbox::Sandbox;
use crate::session_id::SessionId;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

/// A location change recorded by [`WindowHandle::navigate`] or by a frame
/// whose `src` changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub window: WindowId,
    pub destination: String,
    pub proxy_url: String,
}

/// A frame element's window and the `src` that window was loaded from.
#[derive(Debug, Clone)]
struct HostedFrame {
    window: WindowId,
    src: Option<String>,
}

/// Owner of every window of one proxy session.
#[derive(Debug)]
pub struct Coordinator {
    dom: Dom,
    codec: UrlCodec,
    session: SessionId,
    environment: Environment,
    windows: BTreeMap<WindowId, SessionContext>,
    frames: HashMap<NodeId, HostedFrame>,
    next_window: u32,
    navigations: Vec<Navigation>,
}

impl Coordinator {
    #[must_use]
    pub fn new(codec: UrlCodec, session: SessionId, environment: Environment) -> Self {
        Self {
            dom: Dom::new(),
            codec,
            session,
            environment,
            windows: BTreeMap::new(),
            frames: HashMap::new(),
            next_window: 0,
            navigations: Vec::new(),
        }
    }

    /// Open a top-level window showing `destination` through the primary
    /// proxy port.
    pub fn open_top_level(&mut self, destination: &str) -> Result<WindowId> {
        let url = Url::parse(destination).map_err(|e| VeneerError::InvalidUrl {
            url: destination.to_string(),
            reason: e.to_string(),
        })?;
        let proxy_url = self.codec.encode(
            &ProxyUrlDescriptor::new(url, self.session.clone()).with_port(ProxyPort::Primary),
        );
        Ok(self.create_window(&proxy_url, ProxyPort::Primary, None, None, None))
    }

    #[must_use]
    pub fn dom(&self) -> &Dom {
        &self.dom
    }

    #[must_use]
    pub fn codec(&self) -> &UrlCodec {
        &self.codec
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn context(&self, window: WindowId) -> Option<&SessionContext> {
        self.windows.get(&window)
    }

    /// Live windows in creation order.
    pub fn windows(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.windows.keys().copied()
    }

    /// The page-script view of `window`.
    pub fn window(&mut self, window: WindowId) -> Result<WindowHandle<'_>> {
        let ctx = self
            .windows
            .get(&window)
            .ok_or(VeneerError::UnknownWindow(window.0))?;
        let document = ctx.sandbox().document();
        let events = ctx.sandbox().events().clone();
        Ok(WindowHandle {
            coordinator: self,
            window,
            document,
            events,
        })
    }

    #[must_use]
    pub fn parent_of(&self, window: WindowId) -> Option<WindowId> {
        self.windows.get(&window).and_then(SessionContext::parent)
    }

    /// Outermost ancestor of `window`.
    #[must_use]
    pub fn top(&self, window: WindowId) -> WindowId {
        let mut current = window;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        current
    }

    /// Windows nested directly in `window`.
    #[must_use]
    pub fn frames_of(&self, window: WindowId) -> Vec<WindowId> {
        self.windows
            .values()
            .filter(|ctx| ctx.parent() == Some(window))
            .map(SessionContext::window)
            .collect()
    }

    /// `frame.contentWindow`.
    #[must_use]
    pub fn frame_window(&self, frame: NodeId) -> Option<WindowId> {
        self.frames.get(&frame).map(|hosted| hosted.window)
    }

    #[must_use]
    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    /// Deliver the messages queued for `window`, firing one
    /// [`EventKind::Message`] per accepted message. Messages whose target
    /// origin does not match the window's destination origin are dropped.
    /// Returns the number delivered.
    pub fn dispatch_messages(&mut self, window: WindowId) -> Result<usize> {
        let ctx = self
            .windows
            .get_mut(&window)
            .ok_or(VeneerError::UnknownWindow(window.0))?;
        let mut queued = Vec::new();
        while let Some(envelope) = ctx.next_message() {
            queued.push(envelope);
        }

        let sandbox = ctx.sandbox();
        let receiver_origin = destination_origin(sandbox, &self.dom);
        let bus = sandbox.events().clone();
        let mut delivered = 0;
        for envelope in queued {
            let accepted = envelope.target_origin == "*" || envelope.target_origin == receiver_origin;
            audit::log_relay(envelope.source, window, &envelope.source_origin, accepted);
            if !accepted {
                continue;
            }
            let mut event = Event::new(
                EventKind::Message,
                window,
                EventData::Message(MessageEvent {
                    data: envelope.data,
                    origin: envelope.source_origin,
                    source: envelope.source,
                }),
            );
            bus.emit(&mut event);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Run one message turn for every window.
    pub fn dispatch_all(&mut self) -> usize {
        let windows: Vec<WindowId> = self.windows.keys().copied().collect();
        windows
            .into_iter()
            .filter_map(|window| self.dispatch_messages(window).ok())
            .sum()
    }

    /// Unload `window`: fire [`EventKind::BeforeUnload`] and
    /// [`EventKind::Unload`], then tear down its frames and drop its
    /// context. Messages still queued for it are discarded.
    pub fn unload(&mut self, window: WindowId) -> Result<()> {
        let ctx = self
            .windows
            .get(&window)
            .ok_or(VeneerError::UnknownWindow(window.0))?;
        let bus = ctx.sandbox().events().clone();
        let url = self.dom.document_url(ctx.sandbox().document()).to_string();

        bus.emit(&mut Event::new(EventKind::BeforeUnload, window, EventData::Unload));
        bus.emit(&mut Event::new(EventKind::Unload, window, EventData::Unload));

        for child in self.frames_of(window) {
            self.unload(child)?;
        }
        self.windows.remove(&window);
        self.frames.retain(|_, hosted| hosted.window != window);
        audit::log_window(window, "unload", &url);
        Ok(())
    }

    /// `window.open(url)` from `opener`.
    pub fn open_window(&mut self, opener: WindowId, url: &str) -> Result<WindowId> {
        Ok(self.window(opener)?.open_window(url)?)
    }

    fn create_window(
        &mut self,
        document_url: &str,
        port: ProxyPort,
        parent: Option<WindowId>,
        opener: Option<WindowId>,
        frame: Option<NodeId>,
    ) -> WindowId {
        self.next_window += 1;
        let window = WindowId(self.next_window);
        let document = self.dom.create_html_document(document_url);
        let sandbox = Sandbox::new(
            window,
            document,
            self.session.clone(),
            port,
            self.codec.clone(),
            NativeMethods::capture(),
        );
        self.windows
            .insert(window, SessionContext::new(sandbox, parent, opener, frame));
        audit::log_window(window, "open", document_url);
        window
    }

    /// Bring the frame tree in line with the DOM: windows whose frame
    /// element left the tree are unloaded, frames whose `src` changed load
    /// a new window, and every connected frame element without a window
    /// gets one.
    fn settle_frames(&mut self) {
        let detached: Vec<WindowId> = self
            .frames
            .iter()
            .filter(|(frame, _)| !self.dom.is_connected(**frame))
            .map(|(_, hosted)| hosted.window)
            .collect();
        for window in detached {
            if self.windows.contains_key(&window) {
                if let Err(e) = self.unload(window) {
                    debug!("unloading detached {} failed: {}", window, e);
                }
            }
        }
        let dom = &self.dom;
        self.frames.retain(|frame, _| dom.is_connected(*frame));

        let mut retargeted: Vec<NodeId> = self
            .frames
            .iter()
            .filter(|(frame, hosted)| frame_src(&self.dom, **frame) != hosted.src)
            .map(|(frame, _)| *frame)
            .collect();
        retargeted.sort();
        for frame in retargeted {
            self.frame_src_changed(frame);
        }

        let hosts: Vec<(WindowId, NodeId)> = self
            .windows
            .values()
            .map(|ctx| (ctx.window(), ctx.sandbox().document()))
            .collect();
        for (host, document) in hosts {
            let pending: Vec<NodeId> = self
                .dom
                .inclusive_descendants(document)
                .into_iter()
                .filter(|node| is_frame_element(&self.dom, *node) && !self.frames.contains_key(node))
                .collect();
            for frame in pending {
                self.bootstrap_frame(host, frame);
            }
        }
    }

    /// Install a fresh window, with its own native catalogue, for the frame
    /// element `frame` living in `parent`'s document.
    fn bootstrap_frame(&mut self, parent: WindowId, frame: NodeId) -> Option<WindowId> {
        let parent_ctx = self.windows.get(&parent)?;
        let parent_bus = parent_ctx.sandbox().events().clone();
        let parent_url = self.dom.document_url(parent_ctx.sandbox().document()).to_string();
        let parent_port = parent_ctx.sandbox().port();

        let src = frame_src(&self.dom, frame);
        let (document_url, port) = match src.clone() {
            Some(src) => match self.codec.decode(&src) {
                Some(descriptor) => (src, descriptor.port()),
                None if src.eq_ignore_ascii_case("about:blank") => (parent_url, parent_port),
                None => (src, parent_port),
            },
            None => (parent_url, parent_port),
        };

        let window = self.create_window(&document_url, port, Some(parent), None, Some(frame));
        let sandboxed = self.dom.has_attribute(frame, "sandbox");
        if let Some(ctx) = self.windows.get_mut(&window) {
            ctx.sandbox_mut().set_sandboxed_frame(sandboxed);
        }
        self.frames.insert(frame, HostedFrame { window, src });
        debug!("{} bootstrapped for frame {} of {}", window, frame, parent);

        parent_bus.emit(&mut Event::new(
            EventKind::IframeReadyToInit,
            parent,
            EventData::FrameReady { frame, window },
        ));
        Some(window)
    }

    /// A frame whose `src` changed loads a new document in a new window.
    fn frame_src_changed(&mut self, frame: NodeId) {
        let Some(old) = self.frame_window(frame) else {
            return;
        };
        let Some(parent) = self.parent_of(old) else {
            return;
        };
        if let Err(e) = self.unload(old) {
            debug!("unloading navigated {} failed: {}", old, e);
            return;
        }
        if let Some(window) = self.bootstrap_frame(parent, frame) {
            let proxy_url = self
                .windows
                .get(&window)
                .map(|ctx| self.dom.document_url(ctx.sandbox().document()).to_string())
                .unwrap_or_default();
            let destination = self
                .codec
                .decode(&proxy_url)
                .map(|d| d.destination().to_string())
                .unwrap_or_else(|| proxy_url.clone());
            audit::log_window(window, "navigate", &proxy_url);
            self.navigations.push(Navigation {
                window,
                destination,
                proxy_url,
            });
        }
    }
}

fn is_frame_element(dom: &Dom, node: NodeId) -> bool {
    matches!(dom.tag_name(node).as_deref(), Some("iframe" | "frame"))
}

/// Network-visible `src` of a frame element; empty counts as absent.
fn frame_src(dom: &Dom, frame: NodeId) -> Option<String> {
    dom.get_attribute(frame, "src").filter(|s| !s.is_empty())
}

/// ASCII origin of the destination a sandbox's document shows, `null`
/// when it has none.
fn destination_origin(sandbox: &Sandbox, dom: &Dom) -> String {
    sandbox
        .document_destination(dom, sandbox.document())
        .map(|url| url.origin().ascii_serialization())
        .unwrap_or_else(|| "null".to_string())
}

fn window_gone(window: WindowId) -> DomException {
    DomException::InvalidState(format!("{} has been unloaded", window))
}

/// What page script in one window sees: the wrapped DOM operations of that
/// window's sandbox, its event bus, its native catalogue and the browser
/// environment.
///
/// Every mutating operation settles the frame tree before returning, so
/// attaching, detaching or retargeting a frame element is reflected in
/// [`Coordinator::frame_window`] right away.
pub struct WindowHandle<'a> {
    coordinator: &'a mut Coordinator,
    window: WindowId,
    document: NodeId,
    events: EventBus,
}

impl WindowHandle<'_> {
    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    #[must_use]
    pub fn document(&self) -> NodeId {
        self.document
    }

    /// The window's event bus (`on`/`off`).
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.coordinator.environment
    }

    #[must_use]
    pub fn dom(&self) -> &Dom {
        &self.coordinator.dom
    }

    /// The unwrapped operations captured for this window.
    pub fn native(&self) -> DomResult<&NativeMethods> {
        Ok(self.sandbox()?.native())
    }

    #[must_use]
    pub fn parent(&self) -> Option<WindowId> {
        self.coordinator.parent_of(self.window)
    }

    /// `frame.contentWindow`.
    #[must_use]
    pub fn content_window(&self, frame: NodeId) -> Option<WindowId> {
        self.coordinator.frame_window(frame)
    }

    fn sandbox(&self) -> DomResult<&Sandbox> {
        self.coordinator
            .windows
            .get(&self.window)
            .map(SessionContext::sandbox)
            .ok_or_else(|| window_gone(self.window))
    }

    fn settled<T>(&mut self, outcome: DomResult<T>) -> DomResult<T> {
        self.coordinator.settle_frames();
        outcome
    }

    fn split(&mut self) -> DomResult<(&Sandbox, &mut Dom)> {
        let window = self.window;
        let coordinator = &mut *self.coordinator;
        let ctx = coordinator
            .windows
            .get(&window)
            .ok_or_else(|| window_gone(window))?;
        Ok((ctx.sandbox(), &mut coordinator.dom))
    }

    pub fn create_element(&mut self, tag: &str) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        sandbox.create_element(dom, tag)
    }

    pub fn create_element_ns(&mut self, namespace: Option<&str>, qualified: &str) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        sandbox.create_element_ns(dom, namespace, qualified)
    }

    pub fn create_document_fragment(&mut self) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        sandbox.create_document_fragment(dom)
    }

    pub fn clone_node(&mut self, node: NodeId, deep: bool) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        sandbox.clone_node(dom, node, deep)
    }

    pub fn create_contextual_fragment(&mut self, context: NodeId, markup: &str) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        sandbox.create_contextual_fragment(dom, context, markup)
    }

    pub fn parse_from_string(&mut self, markup: &str, mime_type: Option<&str>) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        sandbox.parse_from_string(dom, markup, mime_type)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.append_child(dom, parent, child);
        self.settled(outcome)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.insert_before(dom, parent, child, reference);
        self.settled(outcome)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.remove_child(dom, parent, child);
        self.settled(outcome)
    }

    pub fn insert_adjacent_html(&mut self, element: NodeId, position: &str, markup: &str) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.insert_adjacent_html(dom, element, position, markup);
        self.settled(outcome)
    }

    pub fn insert_table_row(&mut self, table: NodeId, index: i64) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.insert_table_row(dom, table, index);
        self.settled(outcome)
    }

    pub fn insert_tbody_row(&mut self, section: NodeId, index: i64) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.insert_tbody_row(dom, section, index);
        self.settled(outcome)
    }

    pub fn insert_cell(&mut self, row: NodeId, index: i64) -> DomResult<NodeId> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.insert_cell(dom, row, index);
        self.settled(outcome)
    }

    pub fn get_attribute(&self, element: NodeId, name: &str) -> DomResult<Option<String>> {
        Ok(self.sandbox()?.get_attribute(&self.coordinator.dom, element, name))
    }

    pub fn set_attribute(&mut self, element: NodeId, name: &str, value: &str) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.set_attribute(dom, element, name, value);
        self.settled(outcome)
    }

    pub fn remove_attribute(&mut self, element: NodeId, name: &str) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.remove_attribute(dom, element, name);
        self.settled(outcome)
    }

    pub fn get_attribute_ns(
        &self,
        element: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> DomResult<Option<String>> {
        Ok(self
            .sandbox()?
            .get_attribute_ns(&self.coordinator.dom, element, namespace, local))
    }

    pub fn set_attribute_ns(
        &mut self,
        element: NodeId,
        namespace: Option<&str>,
        qualified: &str,
        value: &str,
    ) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.set_attribute_ns(dom, element, namespace, qualified, value);
        self.settled(outcome)
    }

    pub fn remove_attribute_ns(&mut self, element: NodeId, namespace: Option<&str>, local: &str) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.remove_attribute_ns(dom, element, namespace, local);
        self.settled(outcome)
    }

    pub fn get_url_property(&self, element: NodeId, attr: &str) -> DomResult<String> {
        Ok(self
            .sandbox()?
            .get_url_property(&self.coordinator.dom, element, attr))
    }

    pub fn set_url_property(&mut self, element: NodeId, attr: &str, value: &str) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        let outcome = sandbox.set_url_property(dom, element, attr, value);
        self.settled(outcome)
    }

    /// `form.submit()`; returns whether the form was sent.
    pub fn submit_form(&mut self, form: NodeId) -> DomResult<bool> {
        let (sandbox, dom) = self.split()?;
        sandbox.submit_form(dom, form)
    }

    /// `canvas.getContext("2d")`.
    pub fn canvas_context(&mut self, canvas: NodeId) -> DomResult<CanvasContextId> {
        self.coordinator.dom.canvas_context(canvas)
    }

    pub fn draw_image(
        &mut self,
        ctx: CanvasContextId,
        source: CanvasImageSource,
        args: &[f64],
    ) -> DomResult<()> {
        let (sandbox, dom) = self.split()?;
        sandbox.draw_image(dom, ctx, source, args)
    }

    /// `navigator.serviceWorker.register(script_url, { scope })`.
    pub fn register_service_worker(&self, script_url: &str, scope: Option<&str>) -> RegistrationFuture {
        match self.sandbox() {
            Ok(sandbox) => sandbox.register_service_worker(&self.coordinator.dom, script_url, scope),
            Err(e) => Box::pin(std::future::ready(Err(e))),
        }
    }

    /// `target.postMessage(data, target_origin)`.
    ///
    /// The message travels over the target window's channel and is
    /// delivered on its next message turn. `target_origin` is `*`, `/`
    /// (this window's own destination origin) or an absolute URL whose
    /// origin the receiver must have. Posting to a window that is gone is
    /// silently dropped.
    pub fn post_message(
        &mut self,
        target: WindowId,
        data: serde_json::Value,
        target_origin: &str,
    ) -> DomResult<()> {
        let sandbox = self.sandbox()?;
        let source_origin = destination_origin(sandbox, &self.coordinator.dom);
        let target_origin = match target_origin {
            "*" => "*".to_string(),
            "/" => source_origin.clone(),
            other => Url::parse(other)
                .map(|url| url.origin().ascii_serialization())
                .map_err(|_| DomException::Syntax(format!("invalid target origin {:?}", other)))?,
        };
        let Some(receiver) = self.coordinator.windows.get(&target) else {
            debug!("message from {} to {} dropped: no such window", self.window, target);
            return Ok(());
        };
        let envelope = MessageEnvelope {
            source: self.window,
            source_origin,
            target_origin,
            data,
        };
        (sandbox.native().post_message)(&receiver.inbox_sender(), envelope)
    }

    /// Assign `url` to this window's location. Returns the proxy URL the
    /// window is sent to; frames navigate with the iframe kind.
    pub fn navigate(&mut self, url: &str) -> DomResult<String> {
        if !should_rewrite(url) {
            return Ok(url.to_string());
        }
        let sandbox = self.sandbox()?;
        let base = sandbox
            .destination_base(&self.coordinator.dom, self.document)
            .ok_or_else(|| DomException::Security("the document has no destination".to_string()))?;
        let destination = sandbox
            .codec()
            .resolve_as_destination(url, &base)
            .map_err(|e| DomException::Syntax(e.to_string()))?;
        let navigation = if self.parent().is_some() {
            NavigationType::Frame
        } else {
            NavigationType::TopLevel
        };
        let proxy_url = sandbox.codec().encode(
            &ProxyUrlDescriptor::new(destination.clone(), sandbox.session().clone())
                .with_kind(classify(&LoadContext::Navigation(navigation)))
                .with_port(sandbox.port()),
        );

        audit::log_window(self.window, "navigate", &proxy_url);
        self.coordinator.navigations.push(Navigation {
            window: self.window,
            destination: destination.to_string(),
            proxy_url: proxy_url.clone(),
        });
        Ok(proxy_url)
    }

    /// `window.open(url)`: a new top-level window whose opener is this one.
    /// An empty URL or `about:blank` opens a window showing this window's
    /// document address.
    pub fn open_window(&mut self, url: &str) -> DomResult<WindowId> {
        let sandbox = self.sandbox()?;
        let opener_url = self.coordinator.dom.document_url(self.document).to_string();
        let (document_url, destination) = if url.is_empty() || url.eq_ignore_ascii_case("about:blank") {
            (opener_url, "about:blank".to_string())
        } else {
            let base = sandbox
                .destination_base(&self.coordinator.dom, self.document)
                .ok_or_else(|| DomException::Security("the document has no destination".to_string()))?;
            let destination = sandbox
                .codec()
                .resolve_as_destination(url, &base)
                .map_err(|e| DomException::Syntax(e.to_string()))?;
            let proxy_url = sandbox.codec().encode(
                &ProxyUrlDescriptor::new(destination.clone(), sandbox.session().clone())
                    .with_port(ProxyPort::Primary),
            );
            (proxy_url, destination.to_string())
        };

        let window = self.coordinator.create_window(
            &document_url,
            ProxyPort::Primary,
            None,
            Some(self.window),
            None,
        );
        self.events.emit(&mut Event::new(
            EventKind::WindowOpened,
            self.window,
            EventData::WindowOpened {
                window,
                url: destination,
            },
        ));
        Ok(window)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::dom::DomException;
    use crate::resource::ResourceKind;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    const TARGET_PAGE: &str = "http://target_url/target-url.html";

    fn coordinator() -> (Coordinator, WindowId) {
        let config = ProxyConfig {
            primary_port: 2000,
            cross_domain_port: 2001,
            ..ProxyConfig::default()
        };
        let mut coordinator = Coordinator::new(
            UrlCodec::new(config).unwrap(),
            SessionId::new("sessionId").unwrap(),
            Environment::default(),
        );
        let top = coordinator.open_top_level("https://example.com/").unwrap();
        (coordinator, top)
    }

    fn attach_frame(coordinator: &mut Coordinator, host: WindowId, src: Option<&str>) -> NodeId {
        let mut page = coordinator.window(host).unwrap();
        let iframe = page.create_element("iframe").unwrap();
        if let Some(src) = src {
            page.set_url_property(iframe, "src", src).unwrap();
        }
        let body = page.dom().body(page.document()).unwrap();
        page.append_child(body, iframe).unwrap();
        iframe
    }

    #[test]
    fn test_top_level_document_is_proxied() {
        let (coordinator, top) = coordinator();
        let doc = coordinator.context(top).unwrap().sandbox().document();
        assert_eq!(
            coordinator.dom().document_url(doc),
            "http://localhost:2000/sessionId/https://example.com/"
        );
        assert!(coordinator.context(top).unwrap().is_top_level());
        assert_eq!(coordinator.top(top), top);
    }

    #[test]
    fn test_frame_bootstrap_on_insertion() {
        let (mut coordinator, top) = coordinator();
        let ready = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&ready);
        coordinator
            .window(top)
            .unwrap()
            .events()
            .on(EventKind::IframeReadyToInit, move |e| {
                if let EventData::FrameReady { window, .. } = e.data() {
                    seen.borrow_mut().push(*window);
                }
            });

        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();
        assert_ne!(frame, top);
        assert_eq!(*ready.borrow(), vec![frame]);
        assert_eq!(coordinator.parent_of(frame), Some(top));
        assert_eq!(coordinator.frames_of(top), vec![frame]);
        assert_eq!(coordinator.top(frame), top);

        let ctx = coordinator.context(frame).unwrap();
        assert_eq!(ctx.frame_element(), Some(iframe));
        assert_eq!(ctx.sandbox().port(), ProxyPort::CrossDomain);
        let destination = ctx
            .sandbox()
            .document_destination(coordinator.dom(), ctx.sandbox().document())
            .unwrap();
        assert_eq!(destination.as_str(), TARGET_PAGE);
    }

    thread_local! {
        static PARENT_NATIVE_CALLED: Cell<bool> = const { Cell::new(false) };
    }

    #[test]
    fn test_frame_has_its_own_native_catalogue() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();

        coordinator
            .windows
            .get_mut(&top)
            .unwrap()
            .sandbox_mut()
            .native_mut()
            .create_element = |dom, doc, tag| {
            PARENT_NATIVE_CALLED.with(|c| c.set(true));
            dom.create_element(doc, tag)
        };

        coordinator.window(frame).unwrap().create_element("div").unwrap();
        assert!(!PARENT_NATIVE_CALLED.with(Cell::get));
        coordinator.window(top).unwrap().create_element("div").unwrap();
        assert!(PARENT_NATIVE_CALLED.with(|c| c.replace(false)));
    }

    #[test]
    fn test_blank_frame_inherits_parent_document() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, None);
        let frame = coordinator.frame_window(iframe).unwrap();

        let top_doc = coordinator.context(top).unwrap().sandbox().document();
        let frame_doc = coordinator.context(frame).unwrap().sandbox().document();
        assert_eq!(
            coordinator.dom().document_url(frame_doc),
            coordinator.dom().document_url(top_doc)
        );
        assert_eq!(
            coordinator.context(frame).unwrap().sandbox().port(),
            ProxyPort::Primary
        );
    }

    #[tokio::test]
    async fn test_sandboxed_frame_rejects_service_worker() {
        let (mut coordinator, top) = coordinator();
        let iframe = {
            let mut page = coordinator.window(top).unwrap();
            let iframe = page.create_element("iframe").unwrap();
            page.set_attribute(iframe, "sandbox", "allow-scripts").unwrap();
            let body = page.dom().body(page.document()).unwrap();
            page.append_child(body, iframe).unwrap();
            iframe
        };
        let frame = coordinator.frame_window(iframe).unwrap();
        let outcome = coordinator
            .window(frame)
            .unwrap()
            .register_service_worker("/sw.js", None)
            .await;
        assert!(matches!(outcome, Err(DomException::Security(_))));
    }

    #[test]
    fn test_cross_domain_messaging_between_windows() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();

        let origins = Rc::new(RefCell::new(Vec::new()));
        let counter = Rc::new(Cell::new(0));
        {
            let origins = Rc::clone(&origins);
            let counter = Rc::clone(&counter);
            coordinator
                .window(top)
                .unwrap()
                .events()
                .on(EventKind::Message, move |e| {
                    if let EventData::Message(message) = e.data() {
                        origins.borrow_mut().push(message.origin.clone());
                        assert_eq!(message.source, frame);
                        counter.set(counter.get() + message.data.as_i64().unwrap());
                    }
                });
        }

        {
            let mut frame_page = coordinator.window(frame).unwrap();
            let parent = frame_page.parent().unwrap();
            for _ in 0..4 {
                frame_page.post_message(parent, json!(1), "*").unwrap();
            }
        }
        assert!(origins.borrow().is_empty());
        assert_eq!(coordinator.dispatch_all(), 4);
        assert_eq!(counter.get(), 4);
        assert!(origins.borrow().iter().all(|o| o == "http://target_url"));

        let mut page = coordinator.window(top).unwrap();
        let body = page.dom().body(page.document()).unwrap();
        page.remove_child(body, iframe).unwrap();
        assert_eq!(page.content_window(iframe), None);
        assert!(page.post_message(frame, json!("late"), "*").is_ok());
        assert!(coordinator.context(frame).is_none());
    }

    #[test]
    fn test_target_origin_filtering() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();

        let mut page = coordinator.window(top).unwrap();
        page.post_message(frame, json!({"n": 1}), "https://example.com").unwrap();
        page.post_message(frame, json!({"n": 2}), "http://target_url/some/path").unwrap();
        assert!(matches!(
            page.post_message(frame, json!(null), "not an origin"),
            Err(DomException::Syntax(_))
        ));

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        coordinator
            .window(frame)
            .unwrap()
            .events()
            .on(EventKind::Message, move |e| {
                if let EventData::Message(message) = e.data() {
                    sink.borrow_mut().push(message.clone());
                }
            });
        assert_eq!(coordinator.dispatch_messages(frame).unwrap(), 1);
        let received = received.borrow();
        assert_eq!(received[0].data, json!({"n": 2}));
        assert_eq!(received[0].origin, "https://example.com");
    }

    #[test]
    fn test_unload_fires_events_and_tears_down_frames() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        for (window, kind) in [
            (top, EventKind::BeforeUnload),
            (top, EventKind::Unload),
            (frame, EventKind::Unload),
        ] {
            let log = Rc::clone(&log);
            coordinator
                .window(window)
                .unwrap()
                .events()
                .on(kind, move |e| log.borrow_mut().push((e.window(), e.kind())));
        }

        coordinator.unload(top).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                (top, EventKind::BeforeUnload),
                (top, EventKind::Unload),
                (frame, EventKind::Unload),
            ]
        );
        assert_eq!(coordinator.windows().count(), 0);
        assert!(coordinator.frame_window(iframe).is_none());
        assert!(matches!(
            coordinator.unload(top),
            Err(VeneerError::UnknownWindow(_))
        ));
        assert!(coordinator.window(frame).is_err());
    }

    #[test]
    fn test_open_window_links_opener() {
        let (mut coordinator, top) = coordinator();
        let opened = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&opened);
        coordinator
            .window(top)
            .unwrap()
            .events()
            .on(EventKind::WindowOpened, move |e| {
                if let EventData::WindowOpened { window, url } = e.data() {
                    *sink.borrow_mut() = Some((*window, url.clone()));
                }
            });

        let popup = coordinator.open_window(top, "/popup.html").unwrap();
        assert_eq!(
            *opened.borrow(),
            Some((popup, "https://example.com/popup.html".to_string()))
        );
        let ctx = coordinator.context(popup).unwrap();
        assert_eq!(ctx.opener(), Some(top));
        assert!(ctx.is_top_level());
        assert_eq!(
            coordinator.dom().document_url(ctx.sandbox().document()),
            "http://localhost:2000/sessionId/https://example.com/popup.html"
        );
    }

    #[test]
    fn test_navigate_records_location_change() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();

        let top_url = coordinator.window(top).unwrap().navigate("/next").unwrap();
        assert_eq!(top_url, "http://localhost:2000/sessionId/https://example.com/next");

        let frame_url = coordinator.window(frame).unwrap().navigate("other.html").unwrap();
        let descriptor = coordinator.codec().decode(&frame_url).unwrap();
        assert_eq!(descriptor.kind(), ResourceKind::IFRAME);
        assert_eq!(descriptor.destination().as_str(), "http://target_url/other.html");

        assert_eq!(coordinator.navigations().len(), 2);
        assert_eq!(coordinator.navigations()[1].window, frame);

        let script = coordinator.window(top).unwrap().navigate("javascript:void(0)").unwrap();
        assert_eq!(script, "javascript:void(0)");
        assert_eq!(coordinator.navigations().len(), 2);
    }

    #[test]
    fn test_frame_src_change_loads_new_window() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let first = coordinator.frame_window(iframe).unwrap();

        coordinator
            .window(top)
            .unwrap()
            .set_url_property(iframe, "src", "/same-origin.html")
            .unwrap();
        let second = coordinator.frame_window(iframe).unwrap();
        assert_ne!(first, second);
        assert!(coordinator.context(first).is_none());
        assert_eq!(
            coordinator.context(second).unwrap().sandbox().port(),
            ProxyPort::Primary
        );
        let last = coordinator.navigations().last().unwrap();
        assert_eq!(last.destination, "https://example.com/same-origin.html");
    }

    #[test]
    fn test_attribute_writes_retarget_frames() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let first = coordinator.frame_window(iframe).unwrap();

        coordinator
            .window(top)
            .unwrap()
            .set_attribute(iframe, "src", "/other.html")
            .unwrap();
        let second = coordinator.frame_window(iframe).unwrap();
        assert_ne!(first, second);
        assert!(coordinator.context(first).is_none());
        let doc = coordinator.context(second).unwrap().sandbox().document();
        assert_eq!(
            Some(coordinator.dom().document_url(doc).to_string()),
            coordinator.dom().get_attribute(iframe, "src")
        );
        assert_eq!(
            coordinator.navigations().last().unwrap().destination,
            "https://example.com/other.html"
        );

        coordinator
            .window(top)
            .unwrap()
            .set_attribute_ns(iframe, None, "src", "/ns.html")
            .unwrap();
        let third = coordinator.frame_window(iframe).unwrap();
        assert_ne!(second, third);
        assert_eq!(
            coordinator.navigations().last().unwrap().destination,
            "https://example.com/ns.html"
        );

        coordinator
            .window(top)
            .unwrap()
            .remove_attribute(iframe, "src")
            .unwrap();
        let blank = coordinator.frame_window(iframe).unwrap();
        assert_ne!(third, blank);
        assert_eq!(
            coordinator.navigations().last().unwrap().destination,
            "https://example.com/"
        );
        assert_eq!(coordinator.frames_of(top), vec![blank]);
    }

    #[test]
    fn test_frames_in_table_cells_are_bootstrapped() {
        let (mut coordinator, top) = coordinator();
        let mut page = coordinator.window(top).unwrap();
        let table = page.create_element("table").unwrap();
        let body = page.dom().body(page.document()).unwrap();
        page.append_child(body, table).unwrap();
        let row = page.insert_table_row(table, -1).unwrap();
        let cell = page.insert_cell(row, 0).unwrap();
        page.insert_adjacent_html(cell, "beforeend", "<iframe src=\"/cell.html\"></iframe>")
            .unwrap();
        let iframe = page.dom().find_first_by_tag(cell, "iframe").unwrap();
        let frame = coordinator.frame_window(iframe).unwrap();
        assert_eq!(coordinator.parent_of(frame), Some(top));
    }

    #[test]
    fn test_handle_of_unloaded_window_is_invalid() {
        let (mut coordinator, top) = coordinator();
        let iframe = attach_frame(&mut coordinator, top, Some(TARGET_PAGE));
        let frame = coordinator.frame_window(iframe).unwrap();

        let mut frame_page = coordinator.window(frame).unwrap();
        let top_doc = frame_page.coordinator.context(top).unwrap().sandbox().document();
        let body = frame_page.dom().body(top_doc).unwrap();
        frame_page.remove_child(body, iframe).unwrap();
        assert!(matches!(
            frame_page.create_element("div"),
            Err(DomException::InvalidState(_))
        ));
    }
}
