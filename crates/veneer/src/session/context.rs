use super::MessageEnvelope;
use crate::dom::{NodeId, WindowId};
use crate::sandbox::Sandbox;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Everything the coordinator tracks for one window.
#[derive(Debug)]
pub struct SessionContext {
    sandbox: Sandbox,
    parent: Option<WindowId>,
    opener: Option<WindowId>,
    /// The `<iframe>`/`<frame>` element hosting this window in its parent.
    frame_element: Option<NodeId>,
    inbox_tx: UnboundedSender<MessageEnvelope>,
    inbox: UnboundedReceiver<MessageEnvelope>,
}

impl SessionContext {
    pub(crate) fn new(
        sandbox: Sandbox,
        parent: Option<WindowId>,
        opener: Option<WindowId>,
        frame_element: Option<NodeId>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            sandbox,
            parent,
            opener,
            frame_element,
            inbox_tx,
            inbox,
        }
    }

    #[must_use]
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub(crate) fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    #[must_use]
    pub fn window(&self) -> WindowId {
        self.sandbox.window()
    }

    #[must_use]
    pub fn parent(&self) -> Option<WindowId> {
        self.parent
    }

    #[must_use]
    pub fn opener(&self) -> Option<WindowId> {
        self.opener
    }

    #[must_use]
    pub fn frame_element(&self) -> Option<NodeId> {
        self.frame_element
    }

    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Sending half of this window's message channel.
    pub(crate) fn inbox_sender(&self) -> UnboundedSender<MessageEnvelope> {
        self.inbox_tx.clone()
    }

    /// Next queued message, if any.
    pub(crate) fn next_message(&mut self) -> Option<MessageEnvelope> {
        self.inbox.try_recv().ok()
    }
}
