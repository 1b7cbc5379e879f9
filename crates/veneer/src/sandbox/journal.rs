//! Rollback journal for rewrites staged ahead of a native call.

use crate::dom::{Attr, Dom, NodeId, WindowId};

/// Prior state of every node a staged rewrite touched.
#[derive(Debug, Default)]
pub(crate) struct RewriteJournal {
    attrs: Vec<(NodeId, Vec<Attr>)>,
    markers: Vec<(NodeId, Option<WindowId>)>,
}

impl RewriteJournal {
    /// Remember a node's attributes before its first change.
    pub(crate) fn save_attrs(&mut self, dom: &Dom, node: NodeId) {
        if !self.attrs.iter().any(|(n, _)| *n == node) {
            self.attrs.push((node, dom.attributes(node)));
        }
    }

    pub(crate) fn save_marker(&mut self, node: NodeId, previous: Option<WindowId>) {
        self.markers.push((node, previous));
    }

    pub(crate) fn len(&self) -> usize {
        self.attrs.len() + self.markers.len()
    }

    /// Undo every recorded change, newest first.
    pub(crate) fn rollback(self, dom: &mut Dom) {
        for (node, attrs) in self.attrs.into_iter().rev() {
            dom.replace_attributes(node, attrs);
        }
        for (node, previous) in self.markers.into_iter().rev() {
            dom.markers.restore(node, previous);
        }
    }
}
