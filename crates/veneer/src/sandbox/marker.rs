//! Processed markers.
//!
//! Records which window's sandbox last processed a node. The table lives
//! outside the nodes themselves, so markers never show up among a node's
//! attributes and are never copied by `cloneNode`.

use crate::dom::{NodeId, WindowId};
use std::collections::HashMap;

/// Side table mapping node identity to the window that processed it.
#[derive(Debug, Default)]
pub struct ProcessedMarkers {
    table: HashMap<NodeId, WindowId>,
}

impl ProcessedMarkers {
    /// Window that last processed `node`, if any.
    #[must_use]
    pub fn get(&self, node: NodeId) -> Option<WindowId> {
        self.table.get(&node).copied()
    }

    /// Whether `node` is processed under `window`'s criteria. A node
    /// processed by another window reads as unprocessed.
    #[must_use]
    pub fn is_processed_by(&self, node: NodeId, window: WindowId) -> bool {
        self.get(node) == Some(window)
    }

    /// Stamp `node`, replacing any marker from another window.
    pub fn stamp(&mut self, node: NodeId, window: WindowId) -> Option<WindowId> {
        self.table.insert(node, window)
    }

    /// Put back a previous marker state.
    pub(crate) fn restore(&mut self, node: NodeId, previous: Option<WindowId>) {
        match previous {
            Some(window) => {
                self.table.insert(node, window);
            }
            None => {
                self.table.remove(&node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Dom;

    #[test]
    fn test_marker_is_per_window() {
        let mut dom = Dom::new();
        let doc = dom.create_html_document("about:blank");
        let node = dom.create_document_fragment(doc);
        let mut markers = ProcessedMarkers::default();
        assert_eq!(markers.get(node), None);

        assert_eq!(markers.stamp(node, WindowId(1)), None);
        assert!(markers.is_processed_by(node, WindowId(1)));
        assert!(!markers.is_processed_by(node, WindowId(2)));

        assert_eq!(markers.stamp(node, WindowId(2)), Some(WindowId(1)));
        markers.restore(node, None);
        assert_eq!(markers.get(node), None);
    }
}
