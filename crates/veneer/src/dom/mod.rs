//! Host DOM model.
//!
//! An arena of nodes shared by every window of a page, together with the
//! unwrapped ("native") behavior of the platform operations the sandbox
//! intercepts. Nothing in this module knows about proxy URLs: it behaves
//! like the browser would without any sandbox installed.
//!
//! Nodes of all documents live in one [`Dom`], so a node can be adopted
//! across frames by inserting it into another window's document.

mod canvas;
mod markup;

pub use canvas::{CanvasContextId, CanvasImageSource, DrawCall};

use crate::sandbox::marker::ProcessedMarkers;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use url::Url;

/// The XHTML namespace.
pub const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// The SVG namespace.
pub const SVG_NS: &str = "http://www.w3.org/2000/svg";

/// The XLink namespace.
pub const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

/// Failures raised by platform operations, shaped like DOM exceptions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomException {
    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("HierarchyRequestError: {0}")]
    HierarchyRequest(String),

    #[error("NotFoundError: {0}")]
    NotFound(String),

    #[error("IndexSizeError: {0}")]
    IndexSize(String),

    #[error("SyntaxError: {0}")]
    Syntax(String),

    #[error("InvalidCharacterError: {0}")]
    InvalidCharacter(String),

    #[error("NoModificationAllowedError: {0}")]
    NoModificationAllowed(String),

    #[error("SecurityError: {0}")]
    Security(String),

    #[error("InvalidStateError: {0}")]
    InvalidState(String),
}

/// Result type for platform operations.
pub type DomResult<T> = std::result::Result<T, DomException>;

/// Identity of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a window (top-level page or frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// Parsing mode of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Xml,
}

/// A single element attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub namespace: Option<String>,
    pub prefix: Option<String>,
    pub local_name: String,
    pub value: String,
}

impl Attr {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match self.prefix {
            Some(ref prefix) => format!("{}:{}", prefix, self.local_name),
            None => self.local_name.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct Element {
    local_name: String,
    namespace: Option<String>,
    attrs: Vec<Attr>,
}

#[derive(Debug, Clone)]
enum NodeData {
    Document { content_type: ContentType, url: String },
    Fragment,
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    owner: Option<NodeId>,
    data: NodeData,
}

/// A script element that started executing, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    pub node: NodeId,
    /// Network-visible `src` at execution time.
    pub src: Option<String>,
    pub text: String,
}

/// A form submission that reached the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub form: NodeId,
    pub action: String,
    pub method: String,
    pub target: Option<String>,
}

/// Insertion point for `insertAdjacentHTML`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjacentPosition {
    BeforeBegin,
    AfterBegin,
    BeforeEnd,
    AfterEnd,
}

impl AdjacentPosition {
    /// Parse a position keyword (ASCII case-insensitive).
    pub fn parse(position: &str) -> DomResult<Self> {
        match position.to_ascii_lowercase().as_str() {
            "beforebegin" => Ok(Self::BeforeBegin),
            "afterbegin" => Ok(Self::AfterBegin),
            "beforeend" => Ok(Self::BeforeEnd),
            "afterend" => Ok(Self::AfterEnd),
            _ => Err(DomException::Syntax(format!(
                "'{}' is not a valid insertion position",
                position
            ))),
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn split_qualified(qualified: &str) -> (Option<String>, String) {
    match qualified.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, qualified.to_string()),
    }
}

static MISSING: Node = Node {
    parent: None,
    children: Vec::new(),
    owner: None,
    data: NodeData::Fragment,
};

/// The node arena shared by all windows of a page.
#[derive(Debug, Default)]
pub struct Dom {
    nodes: Vec<Node>,
    started_scripts: HashSet<NodeId>,
    script_runs: Vec<ScriptRun>,
    submissions: Vec<FormSubmission>,
    canvases: Vec<canvas::CanvasContext>,
    pub(crate) markers: ProcessedMarkers,
}

impl Dom {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Reads of an id from another arena see a detached, empty fragment.
    fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id.0).unwrap_or(&MISSING)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// Whether `id` was issued by this arena.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    fn check_node(&self, id: NodeId) -> DomResult<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(DomException::NotFound(format!("node {} does not exist", id)))
        }
    }

    fn push(&mut self, owner: Option<NodeId>, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            owner,
            data,
        });
        id
    }

    fn element(&self, id: NodeId) -> Option<&Element> {
        match self.node(id).data {
            NodeData::Element(ref e) => Some(e),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.node_mut(id)?.data {
            NodeData::Element(ref mut e) => Some(e),
            _ => None,
        }
    }

    fn require_element(&self, id: NodeId) -> DomResult<&Element> {
        self.check_node(id)?;
        self.element(id)
            .ok_or_else(|| DomException::TypeError(format!("node {} is not an Element", id)))
    }

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// Create an empty document whose real address is `url`.
    pub fn create_document(&mut self, content_type: ContentType, url: &str) -> NodeId {
        self.push(
            None,
            NodeData::Document {
                content_type,
                url: url.to_string(),
            },
        )
    }

    /// Create an HTML document with `html`, `head` and `body` elements.
    pub fn create_html_document(&mut self, url: &str) -> NodeId {
        let doc = self.create_document(ContentType::Html, url);
        let html = self.new_element(doc, "html", Some(XHTML_NS));
        let head = self.new_element(doc, "head", Some(XHTML_NS));
        let body = self.new_element(doc, "body", Some(XHTML_NS));
        self.attach(doc, html, None);
        self.attach(html, head, None);
        self.attach(html, body, None);
        doc
    }

    #[must_use]
    pub fn is_document(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Document { .. })
    }

    #[must_use]
    pub fn is_fragment(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Fragment)
    }

    #[must_use]
    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    /// The document a node belongs to (a document owns itself).
    #[must_use]
    pub fn owner_document(&self, id: NodeId) -> NodeId {
        self.node(id).owner.unwrap_or(id)
    }

    /// Real (network) address of a document, or of a node's document.
    #[must_use]
    pub fn document_url(&self, id: NodeId) -> &str {
        match self.node(self.owner_document(id)).data {
            NodeData::Document { ref url, .. } => url,
            _ => "",
        }
    }

    #[must_use]
    pub fn content_type(&self, id: NodeId) -> ContentType {
        match self.node(self.owner_document(id)).data {
            NodeData::Document { content_type, .. } => content_type,
            _ => ContentType::Html,
        }
    }

    /// First element child of the document element with the given tag.
    #[must_use]
    pub fn head(&self, doc: NodeId) -> Option<NodeId> {
        self.document_section(doc, "head")
    }

    #[must_use]
    pub fn body(&self, doc: NodeId) -> Option<NodeId> {
        self.document_section(doc, "body")
    }

    fn document_section(&self, doc: NodeId, tag: &str) -> Option<NodeId> {
        let html = self.first_element_child(doc)?;
        self.children(html)
            .iter()
            .copied()
            .find(|c| self.tag_name(*c).as_deref() == Some(tag))
    }

    fn first_element_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).iter().copied().find(|c| self.is_element(*c))
    }

    // ------------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------------

    fn new_element(&mut self, doc: NodeId, local_name: &str, namespace: Option<&str>) -> NodeId {
        self.push(
            Some(doc),
            NodeData::Element(Element {
                local_name: local_name.to_string(),
                namespace: namespace.map(str::to_string),
                attrs: Vec::new(),
            }),
        )
    }

    /// `document.createElement`.
    pub fn create_element(&mut self, doc: NodeId, tag: &str) -> DomResult<NodeId> {
        if !is_valid_name(tag) {
            return Err(DomException::InvalidCharacter(format!(
                "'{}' is not a valid tag name",
                tag
            )));
        }
        let (name, ns) = match self.content_type(doc) {
            ContentType::Html => (tag.to_ascii_lowercase(), Some(XHTML_NS)),
            ContentType::Xml => (tag.to_string(), None),
        };
        Ok(self.new_element(doc, &name, ns))
    }

    /// `document.createElementNS`.
    pub fn create_element_ns(
        &mut self,
        doc: NodeId,
        namespace: Option<&str>,
        qualified: &str,
    ) -> DomResult<NodeId> {
        if !is_valid_name(qualified) {
            return Err(DomException::InvalidCharacter(format!(
                "'{}' is not a valid qualified name",
                qualified
            )));
        }
        let (_, local) = split_qualified(qualified);
        let ns = namespace.filter(|ns| !ns.is_empty());
        Ok(self.new_element(doc, &local, ns))
    }

    pub fn create_text(&mut self, doc: NodeId, text: &str) -> NodeId {
        self.push(Some(doc), NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&mut self, doc: NodeId, text: &str) -> NodeId {
        self.push(Some(doc), NodeData::Comment(text.to_string()))
    }

    /// `document.createDocumentFragment`.
    pub fn create_document_fragment(&mut self, doc: NodeId) -> NodeId {
        self.push(Some(doc), NodeData::Fragment)
    }

    /// `node.cloneNode`. Attributes are copied; host-side state such as
    /// processed markers and script "already started" flags is not.
    pub fn clone_node(&mut self, id: NodeId, deep: bool) -> DomResult<NodeId> {
        self.check_node(id)?;
        if self.is_document(id) {
            return Err(DomException::NotFound(
                "cloning documents is not supported".to_string(),
            ));
        }
        let owner = self.node(id).owner;
        let data = self.node(id).data.clone();
        let copy = self.push(owner, data);
        if deep {
            let children = self.node(id).children.clone();
            for child in children {
                let child_copy = self.clone_node(child, true)?;
                self.attach(copy, child_copy, None);
            }
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Tree accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).last().copied()
    }

    /// Lowercased local name of an element (as written for XML documents).
    #[must_use]
    pub fn tag_name(&self, id: NodeId) -> Option<String> {
        self.element(id).map(|e| e.local_name.clone())
    }

    #[must_use]
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        self.element(id).and_then(|e| e.namespace.as_deref())
    }

    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id).data {
            NodeData::Text(ref t) | NodeData::Comment(ref t) => Some(t),
            _ => None,
        }
    }

    /// Concatenated text of all descendant text nodes.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        self.inclusive_descendants(id)
            .into_iter()
            .filter_map(|n| match self.node(n).data {
                NodeData::Text(ref t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// `id` and all of its descendants, in tree order.
    #[must_use]
    pub fn inclusive_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.node(n).children.iter().rev().copied());
        }
        out
    }

    #[must_use]
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Whether a node is in a document tree.
    #[must_use]
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            cur = p;
        }
        self.is_document(cur)
    }

    /// First element in tree order below `root` with the given tag.
    #[must_use]
    pub fn find_first_by_tag(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.inclusive_descendants(root)
            .into_iter()
            .find(|n| *n != root && self.tag_name(*n).is_some_and(|t| t.eq_ignore_ascii_case(tag)))
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    fn attach(&mut self, parent: NodeId, child: NodeId, before: Option<usize>) {
        if !self.contains(parent) || !self.contains(child) {
            return;
        }
        let owner = self.owner_document(parent);
        for n in self.inclusive_descendants(child) {
            if n != owner && !self.is_document(n) {
                if let Some(node) = self.node_mut(n) {
                    node.owner = Some(owner);
                }
            }
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            match before {
                Some(index) if index <= node.children.len() => node.children.insert(index, child),
                _ => node.children.push(child),
            }
        }
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.node(child).parent else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|c| *c != child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = None;
        }
    }

    /// Extend a text node in place; false when `id` is not a text node.
    fn append_text(&mut self, id: NodeId, text: &str) -> bool {
        match self.node_mut(id).map(|n| &mut n.data) {
            Some(NodeData::Text(existing)) => {
                existing.push_str(text);
                true
            }
            _ => false,
        }
    }

    fn check_insertable(&self, parent: NodeId, child: NodeId) -> DomResult<()> {
        self.check_node(parent)?;
        self.check_node(child)?;
        match self.node(parent).data {
            NodeData::Document { .. } | NodeData::Fragment | NodeData::Element(_) => {}
            _ => {
                return Err(DomException::HierarchyRequest(
                    "parent cannot have children".to_string(),
                ))
            }
        }
        if self.is_document(child) {
            return Err(DomException::HierarchyRequest(
                "a document cannot be inserted".to_string(),
            ));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomException::HierarchyRequest(
                "the new child contains the parent".to_string(),
            ));
        }
        Ok(())
    }

    /// `parent.insertBefore(child, reference)`; `None` appends. Returns the
    /// inserted node (the fragment itself when a fragment is inserted).
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> DomResult<NodeId> {
        self.check_insertable(parent, child)?;
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomException::NotFound(
                    "the reference node is not a child of this node".to_string(),
                ));
            }
        }

        let moved: Vec<NodeId> = if self.is_fragment(child) {
            let kids = self.node(child).children.clone();
            for k in &kids {
                self.detach(*k);
            }
            kids
        } else {
            let reference_is_child = reference == Some(child);
            if reference_is_child {
                return Ok(child);
            }
            self.detach(child);
            vec![child]
        };

        let mut index = reference.and_then(|r| self.children(parent).iter().position(|c| *c == r));
        for n in &moved {
            self.attach(parent, *n, index);
            index = index.map(|i| i + 1);
        }

        if self.is_connected(parent) {
            for n in &moved {
                self.run_inserted_scripts(*n);
            }
        }
        Ok(child)
    }

    /// `parent.appendChild(child)`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        self.insert_before(parent, child, None)
    }

    /// `parent.removeChild(child)`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<NodeId> {
        self.check_node(child)?;
        if self.parent(child) != Some(parent) {
            return Err(DomException::NotFound(
                "the node to be removed is not a child of this node".to_string(),
            ));
        }
        self.detach(child);
        Ok(child)
    }

    fn run_inserted_scripts(&mut self, root: NodeId) {
        for n in self.inclusive_descendants(root) {
            if self.tag_name(n).as_deref() != Some("script") || self.started_scripts.contains(&n) {
                continue;
            }
            self.started_scripts.insert(n);
            let run = ScriptRun {
                node: n,
                src: self.get_attribute(n, "src"),
                text: self.text_content(n),
            };
            self.script_runs.push(run);
        }
    }

    pub(crate) fn mark_script_started(&mut self, id: NodeId) {
        self.started_scripts.insert(id);
    }

    /// Scripts executed so far, in execution order.
    #[must_use]
    pub fn script_runs(&self) -> &[ScriptRun] {
        &self.script_runs
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn normalize_attr_name(&self, id: NodeId, name: &str) -> String {
        let html_element = self.content_type(id) == ContentType::Html
            && self.namespace(id) == Some(XHTML_NS);
        if html_element {
            name.to_ascii_lowercase()
        } else {
            name.to_string()
        }
    }

    /// `element.getAttribute`: first attribute whose qualified name matches.
    #[must_use]
    pub fn get_attribute(&self, id: NodeId, name: &str) -> Option<String> {
        let name = self.normalize_attr_name(id, name);
        self.element(id)?
            .attrs
            .iter()
            .find(|a| a.qualified_name() == name)
            .map(|a| a.value.clone())
    }

    #[must_use]
    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.get_attribute(id, name).is_some()
    }

    /// `element.setAttribute`.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> DomResult<()> {
        if !is_valid_name(name) {
            return Err(DomException::InvalidCharacter(format!(
                "'{}' is not a valid attribute name",
                name
            )));
        }
        self.require_element(id)?;
        let name = self.normalize_attr_name(id, name);
        let element = self
            .element_mut(id)
            .ok_or_else(|| DomException::TypeError("not an Element".to_string()))?;
        match element.attrs.iter_mut().find(|a| a.qualified_name() == name) {
            Some(attr) => attr.value = value.to_string(),
            None => element.attrs.push(Attr {
                namespace: None,
                prefix: None,
                local_name: name,
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    /// `element.removeAttribute`.
    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> DomResult<()> {
        self.require_element(id)?;
        let name = self.normalize_attr_name(id, name);
        if let Some(element) = self.element_mut(id) {
            if let Some(index) = element.attrs.iter().position(|a| a.qualified_name() == name) {
                element.attrs.remove(index);
            }
        }
        Ok(())
    }

    /// `element.getAttributeNS`.
    #[must_use]
    pub fn get_attribute_ns(&self, id: NodeId, namespace: Option<&str>, local: &str) -> Option<String> {
        let ns = namespace.filter(|ns| !ns.is_empty());
        self.element(id)?
            .attrs
            .iter()
            .find(|a| a.namespace.as_deref() == ns && a.local_name == local)
            .map(|a| a.value.clone())
    }

    /// `element.setAttributeNS`.
    pub fn set_attribute_ns(
        &mut self,
        id: NodeId,
        namespace: Option<&str>,
        qualified: &str,
        value: &str,
    ) -> DomResult<()> {
        if !is_valid_name(qualified) {
            return Err(DomException::InvalidCharacter(format!(
                "'{}' is not a valid qualified name",
                qualified
            )));
        }
        let ns = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        let (prefix, local) = split_qualified(qualified);
        if prefix.is_some() && ns.is_none() {
            return Err(DomException::TypeError(
                "a prefixed attribute requires a namespace".to_string(),
            ));
        }
        self.require_element(id)?;
        let element = self
            .element_mut(id)
            .ok_or_else(|| DomException::TypeError("not an Element".to_string()))?;
        match element
            .attrs
            .iter_mut()
            .find(|a| a.namespace == ns && a.local_name == local)
        {
            Some(attr) => {
                attr.prefix = prefix;
                attr.value = value.to_string();
            }
            None => element.attrs.push(Attr {
                namespace: ns,
                prefix,
                local_name: local,
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    /// `element.removeAttributeNS`.
    pub fn remove_attribute_ns(
        &mut self,
        id: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> DomResult<()> {
        let ns = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self.require_element(id)?;
        let element = self
            .element_mut(id)
            .ok_or_else(|| DomException::TypeError("not an Element".to_string()))?;
        element
            .attrs
            .retain(|a| !(a.namespace == ns && a.local_name == local));
        Ok(())
    }

    /// All attributes of an element, in insertion order.
    #[must_use]
    pub fn attributes(&self, id: NodeId) -> Vec<Attr> {
        self.element(id).map(|e| e.attrs.clone()).unwrap_or_default()
    }

    pub(crate) fn replace_attributes(&mut self, id: NodeId, attrs: Vec<Attr>) {
        if let Some(element) = self.element_mut(id) {
            element.attrs = attrs;
        }
    }

    /// Reflected URL property getter (`a.href`, `img.src`, ...): the
    /// attribute resolved against the document's real address.
    #[must_use]
    pub fn reflect_url(&self, id: NodeId, attr: &str) -> String {
        let Some(value) = self.get_attribute(id, attr) else {
            return String::new();
        };
        match Url::parse(self.document_url(id)).and_then(|base| base.join(value.trim())) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => value,
        }
    }

    // ------------------------------------------------------------------
    // Markup
    // ------------------------------------------------------------------

    /// Parse markup as the content of `context`, the way `innerHTML` and
    /// `insertAdjacentHTML` do, into detached nodes of the context's
    /// document. Scripts in the result never run. Malformed XML is a
    /// `SyntaxError`; HTML never fails.
    pub fn parse_fragment(&mut self, context: NodeId, source: &str) -> DomResult<Vec<NodeId>> {
        self.check_node(context)?;
        let doc = self.owner_document(context);
        match self.content_type(doc) {
            ContentType::Html => Ok(markup::parse_html_fragment(self, doc, context, source)),
            ContentType::Xml => markup::parse_xml(self, doc, source).map_err(DomException::Syntax),
        }
    }

    /// The node markup inserted at `position` relative to `element` becomes
    /// a child of.
    pub fn adjacent_context(&self, element: NodeId, position: AdjacentPosition) -> DomResult<NodeId> {
        self.require_element(element)?;
        match position {
            AdjacentPosition::BeforeBegin | AdjacentPosition::AfterEnd => self
                .parent(element)
                .filter(|p| !self.is_document(*p))
                .ok_or_else(|| {
                    DomException::NoModificationAllowed("the element has no parent".to_string())
                }),
            AdjacentPosition::AfterBegin | AdjacentPosition::BeforeEnd => Ok(element),
        }
    }

    /// Insert the children of `fragment` at `position` relative to
    /// `element`.
    pub fn insert_adjacent_fragment(
        &mut self,
        element: NodeId,
        position: AdjacentPosition,
        fragment: NodeId,
    ) -> DomResult<()> {
        let parent = self.adjacent_context(element, position)?;
        let reference = match position {
            AdjacentPosition::BeforeBegin => Some(element),
            AdjacentPosition::AfterEnd => {
                let siblings = self.children(parent);
                siblings
                    .iter()
                    .position(|c| *c == element)
                    .and_then(|i| siblings.get(i + 1).copied())
            }
            AdjacentPosition::AfterBegin => self.first_child(element),
            AdjacentPosition::BeforeEnd => None,
        };
        self.insert_before(parent, fragment, reference)?;
        Ok(())
    }

    /// `element.insertAdjacentHTML`.
    pub fn insert_adjacent_html(&mut self, id: NodeId, position: &str, source: &str) -> DomResult<()> {
        let position = AdjacentPosition::parse(position)?;
        let context = self.adjacent_context(id, position)?;
        let fragment = self.fragment_from(context, source)?;
        self.insert_adjacent_fragment(id, position, fragment)
    }

    fn fragment_from(&mut self, context: NodeId, source: &str) -> DomResult<NodeId> {
        let nodes = self.parse_fragment(context, source)?;
        let fragment = self.create_document_fragment(self.owner_document(context));
        for node in nodes {
            self.attach(fragment, node, None);
        }
        Ok(fragment)
    }

    /// `range.createContextualFragment` for a range positioned in `context`.
    /// Unlike other parsed markup, its scripts run once the fragment is
    /// inserted into a document.
    pub fn create_contextual_fragment(&mut self, context: NodeId, source: &str) -> DomResult<NodeId> {
        let fragment = self.fragment_from(context, source)?;
        for node in self.inclusive_descendants(fragment) {
            self.started_scripts.remove(&node);
        }
        Ok(fragment)
    }

    /// `DOMParser.parseFromString`. A missing or unsupported MIME type is a
    /// `TypeError`, as on the platform. XML that is not well formed yields a
    /// document holding a single `parsererror` element.
    pub fn parse_from_string(
        &mut self,
        creator: NodeId,
        source: &str,
        mime_type: Option<&str>,
    ) -> DomResult<NodeId> {
        let mime = mime_type.ok_or_else(|| {
            DomException::TypeError(
                "Failed to execute 'parseFromString': 2 arguments required".to_string(),
            )
        })?;
        let url = self.document_url(creator).to_string();
        match mime {
            "text/html" => {
                let doc = self.create_document(ContentType::Html, &url);
                markup::parse_html_document(self, doc, source);
                Ok(doc)
            }
            "text/xml" | "application/xml" | "application/xhtml+xml" | "image/svg+xml" => {
                let doc = self.create_document(ContentType::Xml, &url);
                let parsed = markup::parse_xml(self, doc, source).and_then(|nodes| {
                    self.single_document_element(&nodes)?;
                    Ok(nodes)
                });
                match parsed {
                    Ok(nodes) => {
                        for node in nodes {
                            let blank = matches!(self.node(node).data, NodeData::Text(ref t) if t.trim().is_empty());
                            if !blank {
                                self.attach(doc, node, None);
                            }
                        }
                    }
                    Err(message) => {
                        let error =
                            self.new_element(doc, "parsererror", Some(markup::PARSER_ERROR_NS));
                        let text = self.create_text(doc, &message);
                        self.attach(error, text, None);
                        self.attach(doc, error, None);
                    }
                }
                Ok(doc)
            }
            other => Err(DomException::TypeError(format!(
                "'{}' is not a supported MIME type",
                other
            ))),
        }
    }

    fn single_document_element(&self, nodes: &[NodeId]) -> Result<(), String> {
        let elements = nodes.iter().filter(|n| self.is_element(**n)).count();
        let stray_text = nodes
            .iter()
            .any(|n| matches!(self.node(*n).data, NodeData::Text(ref t) if !t.trim().is_empty()));
        match elements {
            0 => Err("no root element found".to_string()),
            1 if !stray_text => Ok(()),
            _ => Err("junk after document element".to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    fn element_children_tagged(&self, id: NodeId, tags: &[&str]) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.tag_name(*c).is_some_and(|t| tags.contains(&t.as_str())))
            .collect()
    }

    fn table_rows(&self, table: NodeId) -> Vec<NodeId> {
        let mut rows = Vec::new();
        for child in self.element_children_tagged(table, &["tr", "thead", "tbody", "tfoot"]) {
            if self.tag_name(child).as_deref() == Some("tr") {
                rows.push(child);
            } else {
                rows.extend(self.element_children_tagged(child, &["tr"]));
            }
        }
        rows
    }

    fn new_html_child(&mut self, context: NodeId, tag: &str) -> NodeId {
        let doc = self.owner_document(context);
        self.new_element(doc, tag, Some(XHTML_NS))
    }

    /// `table.insertRow(index)`.
    pub fn insert_table_row(&mut self, table: NodeId, index: i64) -> DomResult<NodeId> {
        self.require_element(table)?;
        let rows = self.table_rows(table);
        let count = rows.len() as i64;
        if index < -1 || index > count {
            return Err(DomException::IndexSize(format!(
                "index {} is outside [-1, {}]",
                index, count
            )));
        }
        let row = self.new_html_child(table, "tr");
        if index == -1 || index == count {
            let section = match self.element_children_tagged(table, &["tbody"]).last() {
                Some(tbody) => *tbody,
                None if rows.is_empty() => {
                    let tbody = self.new_html_child(table, "tbody");
                    self.insert_before(table, tbody, None)?;
                    tbody
                }
                None => rows.last().and_then(|r| self.parent(*r)).unwrap_or(table),
            };
            self.insert_before(section, row, None)?;
        } else if let Some(reference) = usize::try_from(index).ok().and_then(|i| rows.get(i)) {
            let parent = self.parent(*reference).unwrap_or(table);
            self.insert_before(parent, row, Some(*reference))?;
        }
        Ok(row)
    }

    /// `tbody.insertRow(index)` (also thead/tfoot).
    pub fn insert_section_row(&mut self, section: NodeId, index: i64) -> DomResult<NodeId> {
        let rows = self.element_children_tagged(section, &["tr"]);
        self.insert_indexed_child(section, "tr", &rows, index)
    }

    /// `tr.insertCell(index)`.
    pub fn insert_cell(&mut self, row: NodeId, index: i64) -> DomResult<NodeId> {
        let cells = self.element_children_tagged(row, &["td", "th"]);
        self.insert_indexed_child(row, "td", &cells, index)
    }

    fn insert_indexed_child(
        &mut self,
        parent: NodeId,
        tag: &str,
        existing: &[NodeId],
        index: i64,
    ) -> DomResult<NodeId> {
        self.require_element(parent)?;
        let count = existing.len() as i64;
        if index < -1 || index > count {
            return Err(DomException::IndexSize(format!(
                "index {} is outside [-1, {}]",
                index, count
            )));
        }
        let child = self.new_html_child(parent, tag);
        let reference = if index == -1 || index == count {
            None
        } else {
            usize::try_from(index).ok().and_then(|i| existing.get(i).copied())
        };
        self.insert_before(parent, child, reference)?;
        Ok(child)
    }

    // ------------------------------------------------------------------
    // Forms
    // ------------------------------------------------------------------

    /// `form.submit()`: send the form to its (network-visible) action.
    pub fn submit_form(&mut self, form: NodeId) -> DomResult<()> {
        if self.tag_name(form).as_deref() != Some("form") {
            return Err(DomException::TypeError(format!(
                "node {} is not a form element",
                form
            )));
        }
        let action = if self.has_attribute(form, "action") {
            self.reflect_url(form, "action")
        } else {
            self.document_url(form).to_string()
        };
        let submission = FormSubmission {
            form,
            action,
            method: self
                .get_attribute(form, "method")
                .map(|m| m.to_ascii_lowercase())
                .unwrap_or_else(|| "get".to_string()),
            target: self.get_attribute(form, "target"),
        };
        self.submissions.push(submission);
        Ok(())
    }

    /// Form submissions sent so far.
    #[must_use]
    pub fn submissions(&self) -> &[FormSubmission] {
        &self.submissions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn page() -> (Dom, NodeId) {
        let mut dom = Dom::new();
        let doc = dom.create_html_document("http://localhost:2000/s/https://example.com/");
        (dom, doc)
    }

    #[test]
    fn test_html_document_skeleton() {
        let (dom, doc) = page();
        let head = dom.head(doc).unwrap();
        let body = dom.body(doc).unwrap();
        assert_eq!(dom.tag_name(head).as_deref(), Some("head"));
        assert!(dom.is_connected(body));
    }

    #[test]
    fn test_create_element_lowercases_in_html() {
        let (mut dom, doc) = page();
        let div = dom.create_element(doc, "DIV").unwrap();
        assert_eq!(dom.tag_name(div).as_deref(), Some("div"));
        assert_eq!(dom.namespace(div), Some(XHTML_NS));
        assert!(matches!(
            dom.create_element(doc, "1bad"),
            Err(DomException::InvalidCharacter(_))
        ));
    }

    #[test]
    fn test_append_and_insert_before() {
        let (mut dom, doc) = page();
        let parent = dom.create_element(doc, "div").unwrap();
        let a = dom.create_element(doc, "span").unwrap();
        let b = dom.create_element(doc, "span").unwrap();
        assert_eq!(dom.append_child(parent, a).unwrap(), a);
        assert_eq!(dom.insert_before(parent, b, Some(a)).unwrap(), b);
        assert_eq!(dom.children(parent), &[b, a]);
    }

    #[test]
    fn test_hierarchy_errors() {
        let (mut dom, doc) = page();
        let parent = dom.create_element(doc, "div").unwrap();
        let child = dom.create_element(doc, "div").unwrap();
        dom.append_child(parent, child).unwrap();
        assert!(matches!(
            dom.append_child(child, parent),
            Err(DomException::HierarchyRequest(_))
        ));
        let stranger = dom.create_element(doc, "p").unwrap();
        let orphan = dom.create_element(doc, "p").unwrap();
        assert!(matches!(
            dom.insert_before(parent, orphan, Some(stranger)),
            Err(DomException::NotFound(_))
        ));
    }

    #[test]
    fn test_fragment_insertion_moves_children() {
        let (mut dom, doc) = page();
        let frag = dom.create_document_fragment(doc);
        let a = dom.create_element(doc, "a").unwrap();
        dom.append_child(frag, a).unwrap();
        let body = dom.body(doc).unwrap();
        dom.append_child(body, frag).unwrap();
        assert!(dom.children(frag).is_empty());
        assert_eq!(dom.parent(a), Some(body));
    }

    #[test]
    fn test_attributes_and_namespaces() {
        let (mut dom, doc) = page();
        let a = dom.create_element(doc, "a").unwrap();
        dom.set_attribute(a, "HREF", "/x").unwrap();
        dom.set_attribute_ns(a, Some(XHTML_NS), "href", "/y").unwrap();
        assert_eq!(dom.get_attribute(a, "href").as_deref(), Some("/x"));
        assert_eq!(dom.get_attribute_ns(a, Some(XHTML_NS), "href").as_deref(), Some("/y"));
        dom.remove_attribute_ns(a, Some(XHTML_NS), "href").unwrap();
        assert!(dom.get_attribute_ns(a, Some(XHTML_NS), "href").is_none());
        assert_eq!(dom.get_attribute(a, "href").as_deref(), Some("/x"));
        dom.remove_attribute(a, "href").unwrap();
        assert!(!dom.has_attribute(a, "href"));
    }

    #[test]
    fn test_reflect_url_resolves_against_real_address() {
        let (mut dom, doc) = page();
        let a = dom.create_element(doc, "a").unwrap();
        assert_eq!(dom.reflect_url(a, "href"), "");
        dom.set_attribute(a, "href", "http://localhost:2000/s/https://example.com/p")
            .unwrap();
        assert_eq!(
            dom.reflect_url(a, "href"),
            "http://localhost:2000/s/https://example.com/p"
        );
    }

    #[test]
    fn test_clone_node_deep() {
        let (mut dom, doc) = page();
        let div = dom.create_element(doc, "div").unwrap();
        let a = dom.create_element(doc, "a").unwrap();
        dom.set_attribute(a, "href", "/x").unwrap();
        dom.append_child(div, a).unwrap();
        let copy = dom.clone_node(div, true).unwrap();
        let copy_a = dom.first_child(copy).unwrap();
        assert_ne!(copy_a, a);
        assert_eq!(dom.get_attribute(copy_a, "href").as_deref(), Some("/x"));
        let shallow = dom.clone_node(div, false).unwrap();
        assert!(dom.children(shallow).is_empty());
    }

    #[test]
    fn test_insert_adjacent_html_positions() {
        let (mut dom, doc) = page();
        let parent = dom.create_element(doc, "div").unwrap();
        let child = dom.create_element(doc, "div").unwrap();
        dom.append_child(parent, child).unwrap();

        dom.insert_adjacent_html(child, "beforebegin", "<a href=\"/1\"></a>").unwrap();
        dom.insert_adjacent_html(child, "afterend", "<a href=\"/2\"></a>").unwrap();
        dom.insert_adjacent_html(parent, "afterbegin", "<a href=\"/3\"></a>").unwrap();
        dom.insert_adjacent_html(parent, "beforeend", "<a href=\"/4\"></a>").unwrap();

        let hrefs: Vec<_> = dom
            .children(parent)
            .iter()
            .filter_map(|c| dom.get_attribute(*c, "href"))
            .collect();
        assert_eq!(hrefs, vec!["/3", "/1", "/2", "/4"]);

        assert!(matches!(
            dom.insert_adjacent_html(child, "sideways", ""),
            Err(DomException::Syntax(_))
        ));
        let detached = dom.create_element(doc, "div").unwrap();
        assert!(matches!(
            dom.insert_adjacent_html(detached, "afterend", "<b></b>"),
            Err(DomException::NoModificationAllowed(_))
        ));
    }

    #[test]
    fn test_parse_from_string() {
        let (mut dom, doc) = page();
        assert!(matches!(
            dom.parse_from_string(doc, "<a></a>", None),
            Err(DomException::TypeError(_))
        ));
        assert!(matches!(
            dom.parse_from_string(doc, "<a></a>", Some("text/plain")),
            Err(DomException::TypeError(_))
        ));
        let xml = dom
            .parse_from_string(doc, "<a href=\"/path\">Anchor</a>", Some("application/xml"))
            .unwrap();
        let a = dom.find_first_by_tag(xml, "a").unwrap();
        assert_eq!(dom.get_attribute(a, "href").as_deref(), Some("/path"));
        assert_eq!(dom.content_type(a), ContentType::Xml);
        assert_eq!(dom.children(xml), &[a]);
    }

    #[test]
    fn test_parse_from_string_reports_malformed_xml() {
        let (mut dom, doc) = page();
        for source in ["<a><b></a>", "<a/><b/>", "plain text"] {
            let xml = dom.parse_from_string(doc, source, Some("text/xml")).unwrap();
            let root = dom.first_child(xml).unwrap();
            assert_eq!(dom.tag_name(root).as_deref(), Some("parsererror"));
            assert!(!dom.text_content(root).is_empty());
        }
    }

    #[test]
    fn test_foreign_node_ids_are_not_found() {
        let (mut dom, doc) = page();
        let foreign = NodeId(10_000);
        let body = dom.body(doc).unwrap();
        assert!(!dom.contains(foreign));
        assert!(matches!(
            dom.append_child(body, foreign),
            Err(DomException::NotFound(_))
        ));
        assert!(matches!(
            dom.append_child(foreign, body),
            Err(DomException::NotFound(_))
        ));
        assert!(matches!(
            dom.remove_child(body, foreign),
            Err(DomException::NotFound(_))
        ));
        assert!(matches!(
            dom.clone_node(foreign, true),
            Err(DomException::NotFound(_))
        ));
        assert!(matches!(
            dom.set_attribute_ns(foreign, None, "href", "/x"),
            Err(DomException::NotFound(_))
        ));
        assert!(matches!(
            dom.insert_adjacent_html(foreign, "beforeend", "<b></b>"),
            Err(DomException::NotFound(_))
        ));
        assert!(matches!(
            dom.insert_cell(foreign, 0),
            Err(DomException::NotFound(_))
        ));
        assert!(dom.parent(foreign).is_none());
        assert!(dom.children(foreign).is_empty());
        assert!(dom.get_attribute(foreign, "href").is_none());
        assert!(!dom.is_connected(foreign));
    }

    #[test]
    fn test_contextual_fragment_scripts_run_on_insertion() {
        let (mut dom, doc) = page();
        let body = dom.body(doc).unwrap();
        let fragment = dom
            .create_contextual_fragment(body, "<script src=\"/a.js\"></script>")
            .unwrap();
        assert!(dom.script_runs().is_empty());
        dom.append_child(body, fragment).unwrap();
        assert_eq!(dom.script_runs().len(), 1);

        dom.insert_adjacent_html(body, "beforeend", "<script src=\"/b.js\"/>")
            .unwrap();
        assert_eq!(dom.script_runs().len(), 1);
    }

    #[test]
    fn test_table_rows_and_cells() {
        let (mut dom, doc) = page();
        let table = dom.create_element(doc, "table").unwrap();
        let row = dom.insert_table_row(table, 0).unwrap();
        assert_eq!(dom.tag_name(row).as_deref(), Some("tr"));
        let tbody = dom.parent(row).unwrap();
        assert_eq!(dom.tag_name(tbody).as_deref(), Some("tbody"));
        let first = dom.insert_table_row(table, 0).unwrap();
        assert_eq!(dom.children(tbody), &[first, row]);
        let cell = dom.insert_cell(row, -1).unwrap();
        assert_eq!(dom.tag_name(cell).as_deref(), Some("td"));
        assert!(matches!(
            dom.insert_cell(row, 5),
            Err(DomException::IndexSize(_))
        ));
    }

    #[test]
    fn test_script_runs_once_when_connected() {
        let (mut dom, doc) = page();
        let script = dom.create_element(doc, "script").unwrap();
        dom.set_attribute(script, "src", "/get-script/x").unwrap();
        let holder = dom.create_element(doc, "div").unwrap();
        dom.append_child(holder, script).unwrap();
        assert!(dom.script_runs().is_empty());

        let head = dom.head(doc).unwrap();
        dom.append_child(head, holder).unwrap();
        assert_eq!(dom.script_runs().len(), 1);
        assert_eq!(dom.script_runs()[0].src.as_deref(), Some("/get-script/x"));

        let body = dom.body(doc).unwrap();
        dom.append_child(body, script).unwrap();
        assert_eq!(dom.script_runs().len(), 1);
    }

    #[test]
    fn test_submit_form_records_network_action() {
        let (mut dom, doc) = page();
        let form = dom.create_element(doc, "form").unwrap();
        dom.set_attribute(form, "action", "/send").unwrap();
        dom.set_attribute(form, "method", "POST").unwrap();
        dom.submit_form(form).unwrap();
        let sent = &dom.submissions()[0];
        assert_eq!(sent.action, "http://localhost:2000/send");
        assert_eq!(sent.method, "post");
        let div = dom.create_element(doc, "div").unwrap();
        assert!(dom.submit_form(div).is_err());
    }
}
