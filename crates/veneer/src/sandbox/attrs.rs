//! URL-bearing attributes and their stored originals.

use crate::dom::{Dom, NodeId};
use crate::resource::{classify, LoadContext, ResourceKind};

/// Suffix of the shadow attribute holding an attribute's original value.
pub const STORED_ATTR_POSTFIX: &str = "-veneer-stored-value";

/// Name of the shadow attribute for `name`.
///
/// Deterministic, and never equal to a name an author would write since
/// no platform attribute carries the suffix.
#[must_use]
pub fn stored_attr_name(name: &str) -> String {
    format!("{}{}", name, STORED_ATTR_POSTFIX)
}

#[must_use]
pub fn is_stored_attr_name(name: &str) -> bool {
    name.ends_with(STORED_ATTR_POSTFIX)
}

/// Elements carrying a URL in each attribute.
const URL_ATTRS: &[(&str, &[&str])] = &[
    ("href", &["a", "area", "link", "base", "image"]),
    (
        "src",
        &[
            "img", "script", "iframe", "frame", "embed", "source", "audio", "video", "input",
            "track",
        ],
    ),
    ("action", &["form"]),
    ("formaction", &["button", "input"]),
    ("data", &["object"]),
    ("manifest", &["html"]),
];

/// Whether `attr` on a `tag` element holds a URL.
#[must_use]
pub fn is_url_attr(tag: &str, attr: &str) -> bool {
    URL_ATTRS.iter().any(|(name, tags)| {
        name.eq_ignore_ascii_case(attr) && tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    })
}

/// Attributes whose change alters the kind of an element's URL.
#[must_use]
pub fn affects_url_kind(attr: &str) -> bool {
    attr.eq_ignore_ascii_case("target") || attr.eq_ignore_ascii_case("rel")
}

/// Whether a `target` value names a frame rather than a keyword.
fn targets_frame(target: Option<&str>) -> bool {
    match target.map(str::trim) {
        None | Some("") => false,
        Some(t) => !matches!(
            t.to_ascii_lowercase().as_str(),
            "_self" | "_blank" | "_parent" | "_top"
        ),
    }
}

/// Resource kind of the URL held in `attr` of element `node`.
#[must_use]
pub fn url_attr_kind(dom: &Dom, node: NodeId, attr: &str) -> ResourceKind {
    let tag = dom.tag_name(node).unwrap_or_default();
    let rel = dom.get_attribute(node, "rel");
    let target = dom.get_attribute(node, "target");
    classify(&LoadContext::Attribute {
        tag: &tag,
        attr,
        rel: rel.as_deref(),
        targets_frame: targets_frame(target.as_deref()),
    })
}
