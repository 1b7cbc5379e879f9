//! Resource classification.
//!
//! A [`ResourceKind`] records how a resource loaded through the proxy must be
//! interpreted by the server-side transformer. Facets are independent flags;
//! an iframe form target, for example, carries both `IFRAME` and `FORM`.
//!
//! Kinds travel inside proxy URLs as a short token: one lowercase letter per
//! facet, always emitted in the fixed order of [`FACETS`]. Decoding is
//! lenient: characters that do not name a facet are ignored, so a corrupted
//! token degrades to fewer facets instead of blocking navigation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable set of resource facets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(u16);

/// Facet table in canonical token order: (flag, token char, name).
const FACETS: &[(ResourceKind, char, &str)] = &[
    (ResourceKind::IFRAME, 'i', "iframe"),
    (ResourceKind::FORM, 'f', "form"),
    (ResourceKind::SCRIPT, 's', "script"),
    (ResourceKind::STYLESHEET, 'c', "stylesheet"),
    (ResourceKind::IMAGE, 'p', "image"),
    (ResourceKind::MANIFEST, 'm', "manifest"),
    (ResourceKind::SERVICE_WORKER, 'v', "service-worker"),
    (ResourceKind::WEB_SOCKET, 'w', "websocket"),
    (ResourceKind::HTML_IMPORT, 'h', "html-import"),
    (ResourceKind::EVENT_SOURCE, 'e', "event-source"),
    (ResourceKind::OBJECT, 'o', "object"),
];

impl ResourceKind {
    pub const NONE: ResourceKind = ResourceKind(0);
    pub const IFRAME: ResourceKind = ResourceKind(1 << 0);
    pub const FORM: ResourceKind = ResourceKind(1 << 1);
    pub const SCRIPT: ResourceKind = ResourceKind(1 << 2);
    pub const STYLESHEET: ResourceKind = ResourceKind(1 << 3);
    pub const IMAGE: ResourceKind = ResourceKind(1 << 4);
    pub const MANIFEST: ResourceKind = ResourceKind(1 << 5);
    pub const SERVICE_WORKER: ResourceKind = ResourceKind(1 << 6);
    pub const WEB_SOCKET: ResourceKind = ResourceKind(1 << 7);
    pub const HTML_IMPORT: ResourceKind = ResourceKind(1 << 8);
    pub const EVENT_SOURCE: ResourceKind = ResourceKind(1 << 9);
    pub const OBJECT: ResourceKind = ResourceKind(1 << 10);

    /// Union of two facet sets.
    #[must_use]
    pub const fn with(self, other: ResourceKind) -> ResourceKind {
        ResourceKind(self.0 | other.0)
    }

    /// Whether every facet of `other` is present.
    #[must_use]
    pub const fn contains(self, other: ResourceKind) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_script(self) -> bool {
        self.contains(Self::SCRIPT)
    }

    #[must_use]
    pub const fn is_iframe(self) -> bool {
        self.contains(Self::IFRAME)
    }

    #[must_use]
    pub const fn is_form(self) -> bool {
        self.contains(Self::FORM)
    }

    #[must_use]
    pub const fn is_web_socket(self) -> bool {
        self.contains(Self::WEB_SOCKET)
    }

    /// Canonical token for this kind. The empty kind serializes to `""`.
    #[must_use]
    pub fn serialize(self) -> String {
        FACETS
            .iter()
            .filter(|(flag, _, _)| self.contains(*flag))
            .map(|(_, c, _)| *c)
            .collect()
    }

    /// Parse a token produced by [`serialize`](Self::serialize).
    ///
    /// Never fails: unknown characters are skipped.
    #[must_use]
    pub fn deserialize(token: &str) -> ResourceKind {
        token.chars().fold(ResourceKind::NONE, |kind, c| {
            match FACETS.iter().find(|(_, fc, _)| *fc == c) {
                Some((flag, _, _)) => kind.with(*flag),
                None => kind,
            }
        })
    }

    /// Facet names present in this kind, in canonical order.
    #[must_use]
    pub fn facet_names(self) -> Vec<&'static str> {
        FACETS
            .iter()
            .filter(|(flag, _, _)| self.contains(*flag))
            .map(|(_, _, name)| *name)
            .collect()
    }

    /// Look up a facet by its name (as printed by [`facet_names`](Self::facet_names)).
    #[must_use]
    pub fn from_facet_name(name: &str) -> Option<ResourceKind> {
        FACETS
            .iter()
            .find(|(_, _, n)| n.eq_ignore_ascii_case(name))
            .map(|(flag, _, _)| *flag)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "other")
        } else {
            write!(f, "{}", self.facet_names().join("+"))
        }
    }
}

/// Who initiated a load that does not come from an element attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Initiator {
    Fetch,
    XmlHttpRequest,
    WebSocket,
    EventSource,
    ServiceWorkerRegistration,
    ServiceWorkerScope,
    Worker,
}

/// How a window navigation was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationType {
    /// Location change of a top-level window.
    TopLevel,
    /// Location change of a nested frame.
    Frame,
    /// Form submission navigating the window.
    FormSubmission,
}

/// Static description of a load, as seen at rewrite time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadContext<'a> {
    /// A URL-bearing element attribute.
    Attribute {
        tag: &'a str,
        attr: &'a str,
        /// `rel` of `<link>` elements.
        rel: Option<&'a str>,
        /// Whether the element targets a nested frame (form/anchor `target`).
        targets_frame: bool,
    },
    /// A script-initiated request.
    Initiator(Initiator),
    /// A window navigation.
    Navigation(NavigationType),
}

/// Map a load context to its facet set.
///
/// Pure and total: contexts that carry no special meaning map to
/// [`ResourceKind::NONE`].
#[must_use]
pub fn classify(context: &LoadContext<'_>) -> ResourceKind {
    match context {
        LoadContext::Attribute {
            tag,
            attr,
            rel,
            targets_frame,
        } => classify_attribute(tag, attr, *rel, *targets_frame),
        LoadContext::Initiator(initiator) => match initiator {
            Initiator::WebSocket => ResourceKind::WEB_SOCKET,
            Initiator::EventSource => ResourceKind::EVENT_SOURCE,
            Initiator::ServiceWorkerRegistration | Initiator::Worker => ResourceKind::SCRIPT,
            Initiator::ServiceWorkerScope => ResourceKind::SERVICE_WORKER,
            Initiator::Fetch | Initiator::XmlHttpRequest => ResourceKind::NONE,
        },
        LoadContext::Navigation(nav) => match nav {
            NavigationType::TopLevel => ResourceKind::NONE,
            NavigationType::Frame => ResourceKind::IFRAME,
            NavigationType::FormSubmission => ResourceKind::FORM,
        },
    }
}

fn classify_attribute(
    tag: &str,
    attr: &str,
    rel: Option<&str>,
    targets_frame: bool,
) -> ResourceKind {
    let tag = tag.to_ascii_lowercase();
    let attr = attr.to_ascii_lowercase();
    let frame = if targets_frame {
        ResourceKind::IFRAME
    } else {
        ResourceKind::NONE
    };

    match (tag.as_str(), attr.as_str()) {
        ("script", "src") => ResourceKind::SCRIPT,
        ("iframe" | "frame", "src") => ResourceKind::IFRAME,
        ("form", "action") | ("button" | "input", "formaction") => ResourceKind::FORM.with(frame),
        ("a" | "area", "href") => frame,
        ("link", "href") => {
            let rel = rel.map(str::to_ascii_lowercase).unwrap_or_default();
            let mut kind = ResourceKind::NONE;
            for token in rel.split_ascii_whitespace() {
                match token {
                    "stylesheet" => kind = kind.with(ResourceKind::STYLESHEET),
                    "import" => kind = kind.with(ResourceKind::HTML_IMPORT),
                    "manifest" => kind = kind.with(ResourceKind::MANIFEST),
                    _ => {}
                }
            }
            kind
        }
        ("html", "manifest") => ResourceKind::MANIFEST,
        ("img" | "image" | "source" | "input", "src" | "href") => ResourceKind::IMAGE,
        ("object", "data") => ResourceKind::OBJECT,
        _ => ResourceKind::NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_kind_serializes_to_empty_token() {
        assert_eq!(ResourceKind::NONE.serialize(), "");
        assert_eq!(ResourceKind::deserialize(""), ResourceKind::NONE);
        assert_eq!(ResourceKind::NONE.to_string(), "other");
    }

    #[test]
    fn test_token_order_is_canonical() {
        let kind = ResourceKind::SCRIPT.with(ResourceKind::IFRAME);
        assert_eq!(kind.serialize(), "is");
        assert_eq!(ResourceKind::deserialize("si"), kind);
    }

    #[test]
    fn test_every_facet_combination_round_trips() {
        let all = FACETS.len();
        for bits in 0u16..(1 << all) {
            let kind = ResourceKind(bits);
            assert_eq!(ResourceKind::deserialize(&kind.serialize()), kind);
        }
    }

    #[test]
    fn test_corrupt_token_degrades() {
        assert_eq!(ResourceKind::deserialize("%%"), ResourceKind::NONE);
        assert_eq!(ResourceKind::deserialize("s?!"), ResourceKind::SCRIPT);
    }

    #[test]
    fn test_classify_script_and_frames() {
        let script = LoadContext::Attribute {
            tag: "SCRIPT",
            attr: "src",
            rel: None,
            targets_frame: false,
        };
        assert_eq!(classify(&script), ResourceKind::SCRIPT);

        let iframe = LoadContext::Attribute {
            tag: "iframe",
            attr: "src",
            rel: None,
            targets_frame: false,
        };
        assert_eq!(classify(&iframe), ResourceKind::IFRAME);
    }

    #[test]
    fn test_classify_form_targeting_frame() {
        let form = LoadContext::Attribute {
            tag: "form",
            attr: "action",
            rel: None,
            targets_frame: true,
        };
        let kind = classify(&form);
        assert!(kind.is_form());
        assert!(kind.is_iframe());
    }

    #[test]
    fn test_classify_link_rel() {
        let link = LoadContext::Attribute {
            tag: "link",
            attr: "href",
            rel: Some("Stylesheet preload"),
            targets_frame: false,
        };
        assert_eq!(classify(&link), ResourceKind::STYLESHEET);
    }

    #[test]
    fn test_unknown_context_is_empty() {
        let unknown = LoadContext::Attribute {
            tag: "marquee",
            attr: "src",
            rel: None,
            targets_frame: false,
        };
        assert_eq!(classify(&unknown), ResourceKind::NONE);
        assert_eq!(
            classify(&LoadContext::Initiator(Initiator::Fetch)),
            ResourceKind::NONE
        );
    }

    #[test]
    fn test_facet_names() {
        let kind = ResourceKind::FORM.with(ResourceKind::IFRAME);
        assert_eq!(kind.facet_names(), vec!["iframe", "form"]);
        assert_eq!(kind.to_string(), "iframe+form");
        assert_eq!(
            ResourceKind::from_facet_name("Script"),
            Some(ResourceKind::SCRIPT)
        );
        assert_eq!(ResourceKind::from_facet_name("video"), None);
    }
}
