//! Markup parsing into the arena.
//!
//! HTML goes through the html5ever tree builder with a sink that creates
//! nodes directly in the [`Dom`], so the usual HTML5 recovery rules (implied
//! end tags, foster parenting, table insertion modes, named character
//! references) apply. XML goes through quick-xml with namespace scopes
//! tracked here.
//!
//! Every `script` element created by a parser is flagged as already
//! started: parsed markup never runs its scripts on insertion.

use super::{Attr, Dom, Element, NodeData, NodeId, XHTML_NS};
use html5ever::interface::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{
    parse_document, parse_fragment, Attribute, ExpandedName, LocalName, Namespace, ParseOpts,
    QualName,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::trace;

/// The `xml:` prefix namespace.
const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace of `xmlns` declarations.
const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

/// Namespace of the error element in a document that failed to parse.
pub(super) const PARSER_ERROR_NS: &str = "http://www.mozilla.org/newlayout/xml/parsererror.xml";

fn namespace_of(ns: &Namespace) -> Option<String> {
    (!ns.is_empty()).then(|| ns.to_string())
}

fn convert_attr(attr: Attribute) -> Attr {
    Attr {
        namespace: namespace_of(&attr.name.ns),
        prefix: attr.name.prefix.as_ref().map(ToString::to_string),
        local_name: attr.name.local.to_string(),
        value: attr.value.to_string(),
    }
}

/// Tree builder target writing into a [`Dom`].
struct ArenaSink<'d> {
    dom: &'d mut Dom,
    /// Document owning every created node.
    owner: NodeId,
    /// Node standing in for the parser's document.
    root: NodeId,
    names: HashMap<NodeId, QualName>,
    unnamed: QualName,
}

impl<'d> ArenaSink<'d> {
    fn new(dom: &'d mut Dom, owner: NodeId, root: NodeId) -> Self {
        Self {
            dom,
            owner,
            root,
            names: HashMap::new(),
            unnamed: QualName::new(None, Namespace::from(""), LocalName::from("")),
        }
    }

    fn insert_text(&mut self, parent: NodeId, index: Option<usize>, text: &str) {
        let previous = match index {
            Some(i) => i.checked_sub(1).and_then(|i| self.dom.children(parent).get(i).copied()),
            None => self.dom.last_child(parent),
        };
        if previous.is_some_and(|p| self.dom.append_text(p, text)) {
            return;
        }
        let node = self.dom.create_text(self.owner, text);
        self.dom.attach(parent, node, index);
    }
}

impl TreeSink for ArenaSink<'_> {
    type Handle = NodeId;
    type Output = NodeId;

    fn finish(self) -> NodeId {
        self.root
    }

    fn parse_error(&mut self, msg: Cow<'static, str>) {
        trace!("markup recovered: {}", msg);
    }

    fn get_document(&mut self) -> NodeId {
        self.root
    }

    fn elem_name<'a>(&'a self, target: &'a NodeId) -> ExpandedName<'a> {
        self.names.get(target).unwrap_or(&self.unnamed).expanded()
    }

    fn create_element(
        &mut self,
        name: QualName,
        attrs: Vec<Attribute>,
        _flags: ElementFlags,
    ) -> NodeId {
        let node = self.dom.push(
            Some(self.owner),
            NodeData::Element(Element {
                local_name: name.local.to_string(),
                namespace: namespace_of(&name.ns),
                attrs: attrs.into_iter().map(convert_attr).collect(),
            }),
        );
        if &*name.local == "script" {
            self.dom.mark_script_started(node);
        }
        self.names.insert(node, name);
        node
    }

    fn create_comment(&mut self, text: StrTendril) -> NodeId {
        self.dom.create_comment(self.owner, &text)
    }

    fn create_pi(&mut self, _target: StrTendril, data: StrTendril) -> NodeId {
        self.dom.create_comment(self.owner, &data)
    }

    fn append(&mut self, parent: &NodeId, child: NodeOrText<NodeId>) {
        match child {
            NodeOrText::AppendNode(node) => {
                self.dom.detach(node);
                self.dom.attach(*parent, node, None);
            }
            NodeOrText::AppendText(text) => self.insert_text(*parent, None, &text),
        }
    }

    fn append_based_on_parent_node(
        &mut self,
        element: &NodeId,
        prev_element: &NodeId,
        child: NodeOrText<NodeId>,
    ) {
        if self.dom.parent(*element).is_some() {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &mut self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    // Template contents are kept as ordinary children.
    fn get_template_contents(&mut self, target: &NodeId) -> NodeId {
        *target
    }

    fn same_node(&self, x: &NodeId, y: &NodeId) -> bool {
        x == y
    }

    fn set_quirks_mode(&mut self, _mode: QuirksMode) {}

    fn append_before_sibling(&mut self, sibling: &NodeId, new_node: NodeOrText<NodeId>) {
        let Some(parent) = self.dom.parent(*sibling) else {
            return;
        };
        if let NodeOrText::AppendNode(ref node) = new_node {
            self.dom.detach(*node);
        }
        let index = self.dom.children(parent).iter().position(|c| c == sibling);
        match new_node {
            NodeOrText::AppendNode(node) => self.dom.attach(parent, node, index),
            NodeOrText::AppendText(text) => self.insert_text(parent, index, &text),
        }
    }

    fn add_attrs_if_missing(&mut self, target: &NodeId, attrs: Vec<Attribute>) {
        let mut existing = self.dom.attributes(*target);
        for attr in attrs.into_iter().map(convert_attr) {
            let name = attr.qualified_name();
            if !existing.iter().any(|a| a.qualified_name() == name) {
                existing.push(attr);
            }
        }
        self.dom.replace_attributes(*target, existing);
    }

    fn remove_from_parent(&mut self, target: &NodeId) {
        self.dom.detach(*target);
    }

    fn reparent_children(&mut self, node: &NodeId, new_parent: &NodeId) {
        for child in self.dom.children(*node).to_vec() {
            self.dom.detach(child);
            self.dom.attach(*new_parent, child, None);
        }
    }

    fn mark_script_already_started(&mut self, node: &NodeId) {
        self.dom.mark_script_started(*node);
    }
}

/// Name of the element html5ever parses a fragment in. A non-element
/// context, or the root `html` element of an HTML document, parses like
/// `body`.
fn context_name(dom: &Dom, context: NodeId) -> QualName {
    let body = || QualName::new(None, Namespace::from(XHTML_NS), LocalName::from("body"));
    let Some(local) = dom.tag_name(context) else {
        return body();
    };
    let namespace = dom.namespace(context).unwrap_or("");
    if local == "html" && namespace == XHTML_NS {
        return body();
    }
    QualName::new(None, Namespace::from(namespace), LocalName::from(local.as_str()))
}

/// Parse an HTML fragment as if it were the content of `context`. Returns
/// detached top-level nodes owned by `owner`.
pub(super) fn parse_html_fragment(
    dom: &mut Dom,
    owner: NodeId,
    context: NodeId,
    source: &str,
) -> Vec<NodeId> {
    let name = context_name(dom, context);
    let scratch = dom.create_document_fragment(owner);
    let sink = ArenaSink::new(&mut *dom, owner, scratch);
    let root = parse_fragment(sink, ParseOpts::default(), name, Vec::new()).one(source);

    // The tree builder puts the fragment below a synthetic `html` element.
    let Some(html) = dom.first_child(root) else {
        return Vec::new();
    };
    let nodes = dom.children(html).to_vec();
    for node in &nodes {
        dom.detach(*node);
    }
    nodes
}

/// Parse a whole HTML document into the (empty) document node `doc`.
pub(super) fn parse_html_document(dom: &mut Dom, doc: NodeId, source: &str) {
    let sink = ArenaSink::new(&mut *dom, doc, doc);
    parse_document(sink, ParseOpts::default()).one(source);
}

type Bindings = Vec<Vec<(Option<String>, String)>>;

fn resolve_prefix(bindings: &Bindings, prefix: Option<&str>) -> Option<String> {
    if prefix == Some("xml") {
        return Some(XML_NS.to_string());
    }
    bindings
        .iter()
        .rev()
        .flat_map(|scope| scope.iter())
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.clone())
        .filter(|uri| !uri.is_empty())
}

fn xml_element(
    dom: &mut Dom,
    owner: NodeId,
    start: &BytesStart<'_>,
    bindings: &mut Bindings,
) -> Result<NodeId, String> {
    let mut declared = Vec::new();
    let mut raw = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        if key == "xmlns" {
            declared.push((None, value.clone()));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.push((Some(prefix.to_string()), value.clone()));
        }
        raw.push((key, value));
    }
    bindings.push(declared);

    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let (prefix, local_name) = super::split_qualified(&name);
    let namespace = resolve_prefix(bindings, prefix.as_deref());
    let attrs = raw
        .into_iter()
        .map(|(key, value)| {
            let (prefix, local_name) = super::split_qualified(&key);
            let namespace = if key == "xmlns" || prefix.as_deref() == Some("xmlns") {
                Some(XMLNS_NS.to_string())
            } else if prefix.is_some() {
                resolve_prefix(bindings, prefix.as_deref())
            } else {
                None
            };
            Attr {
                namespace,
                prefix,
                local_name,
                value,
            }
        })
        .collect();

    let script = local_name == "script";
    let node = dom.push(
        Some(owner),
        NodeData::Element(Element {
            local_name,
            namespace,
            attrs,
        }),
    );
    if script {
        dom.mark_script_started(node);
    }
    Ok(node)
}

fn place(dom: &mut Dom, open: &[NodeId], top: &mut Vec<NodeId>, node: NodeId) {
    match open.last() {
        Some(parent) => dom.attach(*parent, node, None),
        None => top.push(node),
    }
}

/// Parse well-formed XML into detached top-level nodes owned by `owner`.
/// The error describes the first well-formedness violation.
pub(super) fn parse_xml(dom: &mut Dom, owner: NodeId, source: &str) -> Result<Vec<NodeId>, String> {
    let mut reader = Reader::from_str(source);
    let mut top = Vec::new();
    let mut open: Vec<NodeId> = Vec::new();
    let mut bindings = Bindings::new();
    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => return Err(format!("{} at byte {}", e, reader.buffer_position())),
        };
        match event {
            Event::Start(start) => {
                let node = xml_element(dom, owner, &start, &mut bindings)?;
                place(dom, &open, &mut top, node);
                open.push(node);
            }
            Event::Empty(start) => {
                let node = xml_element(dom, owner, &start, &mut bindings)?;
                bindings.pop();
                place(dom, &open, &mut top, node);
            }
            Event::End(_) => {
                open.pop();
                bindings.pop();
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                if !text.is_empty() {
                    let node = dom.create_text(owner, &text);
                    place(dom, &open, &mut top, node);
                }
            }
            Event::CData(data) => {
                let node = dom.create_text(owner, &String::from_utf8_lossy(&data));
                place(dom, &open, &mut top, node);
            }
            Event::Comment(comment) => {
                let node = dom.create_comment(owner, &String::from_utf8_lossy(&comment));
                place(dom, &open, &mut top, node);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    match open.last() {
        Some(unclosed) => Err(format!(
            "unclosed element <{}>",
            dom.tag_name(*unclosed).unwrap_or_default()
        )),
        None => Ok(top),
    }
}
