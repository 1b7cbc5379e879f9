//! Proxy URL codec.
//!
//! A proxy URL packs four things into one absolute URL:
//!
//! ```text
//! http://localhost:1337/3f2a9c!is!utf-8/https://example.com/a/b.html?q=1#top
//! \___________________/ \____/ \/ \___/ \__________________________________/
//!    proxy endpoint     session kind charset         destination
//! ```
//!
//! The authority selects one of the two proxy ports. The first path segment
//! carries the session id, the resource-kind token and an optional charset,
//! joined by `!` with trailing empty parts omitted. Everything after it is
//! the destination URL verbatim, so a browser resolving a path-relative,
//! query-only or fragment-only reference against a proxy URL produces the
//! proxy URL of the same reference resolved against the destination.
//! Root-relative and scheme-relative references escape the embedded
//! destination; the sandbox resolves those with
//! [`UrlCodec::resolve_as_destination`] before encoding.

use crate::config::ProxyConfig;
use crate::error::{Result, VeneerError};
use crate::resource::ResourceKind;
use crate::session_id::SessionId;
use serde::{Deserialize, Serialize};
use url::{Position, Url};

/// Which of the proxy's ports a URL is served from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyPort {
    #[default]
    Primary,
    /// Alternate port emulating a distinct origin for cross-domain frames.
    CrossDomain,
}

impl ProxyPort {
    /// The port a cross-origin frame of a window served from `self` uses.
    #[must_use]
    pub fn other(self) -> ProxyPort {
        match self {
            ProxyPort::Primary => ProxyPort::CrossDomain,
            ProxyPort::CrossDomain => ProxyPort::Primary,
        }
    }
}

/// Everything a proxy URL encodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrlDescriptor {
    destination: Url,
    session: SessionId,
    kind: ResourceKind,
    port: ProxyPort,
    charset: Option<String>,
}

impl ProxyUrlDescriptor {
    /// Descriptor for `destination` in `session`, with no facets, the
    /// primary port and no charset.
    #[must_use]
    pub fn new(destination: Url, session: SessionId) -> Self {
        Self {
            destination,
            session,
            kind: ResourceKind::NONE,
            port: ProxyPort::Primary,
            charset: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: ProxyPort) -> Self {
        self.port = port;
        self
    }

    /// Attach a charset. Only URL-unreserved characters are accepted.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Result<Self> {
        let charset = charset.into();
        if charset.is_empty()
            || !charset
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(VeneerError::InvalidUrl {
                url: charset,
                reason: "charset must be a non-empty token".to_string(),
            });
        }
        self.charset = Some(charset);
        Ok(self)
    }

    #[must_use]
    pub fn destination(&self) -> &Url {
        &self.destination
    }

    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[must_use]
    pub fn port(&self) -> ProxyPort {
        self.port
    }

    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// ASCII serialization of the destination origin, e.g. `https://example.com`.
    #[must_use]
    pub fn destination_origin(&self) -> String {
        self.destination.origin().ascii_serialization()
    }
}

/// Encoder/decoder bound to one proxy endpoint.
#[derive(Debug, Clone)]
pub struct UrlCodec {
    config: ProxyConfig,
}

impl UrlCodec {
    /// Create a codec for a validated configuration.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Numeric port for a [`ProxyPort`].
    #[must_use]
    pub fn port_number(&self, port: ProxyPort) -> u16 {
        match port {
            ProxyPort::Primary => self.config.primary_port,
            ProxyPort::CrossDomain => self.config.cross_domain_port,
        }
    }

    /// The real origin pages are served from on `port`.
    #[must_use]
    pub fn proxy_origin(&self, port: ProxyPort) -> String {
        format!(
            "{}://{}:{}",
            self.config.protocol.scheme(),
            self.config.hostname.to_ascii_lowercase(),
            self.port_number(port)
        )
    }

    /// Build the proxy URL for a descriptor.
    ///
    /// Deterministic. If the destination is itself a proxy URL of this
    /// endpoint, its embedded destination is used instead and the
    /// descriptor's session, kind, port and charset take precedence, so
    /// proxy URLs are never nested.
    #[must_use]
    pub fn encode(&self, descriptor: &ProxyUrlDescriptor) -> String {
        let (destination, inner_charset) = match self.decode(descriptor.destination.as_str()) {
            Some(inner) => (inner.destination, inner.charset),
            None => (descriptor.destination.clone(), None),
        };
        let charset = descriptor
            .charset
            .clone()
            .or(inner_charset)
            .or_else(|| self.config.charset.clone());

        let scheme = if descriptor.kind.is_web_socket() {
            self.config.protocol.web_socket_scheme()
        } else {
            self.config.protocol.scheme()
        };

        let mut meta = descriptor.session.as_str().to_string();
        let token = descriptor.kind.serialize();
        match charset {
            Some(ref charset) => {
                meta.push('!');
                meta.push_str(&token);
                meta.push('!');
                meta.push_str(charset);
            }
            None if !token.is_empty() => {
                meta.push('!');
                meta.push_str(&token);
            }
            None => {}
        }

        format!(
            "{}://{}:{}/{}/{}",
            scheme,
            self.config.hostname.to_ascii_lowercase(),
            self.port_number(descriptor.port),
            meta,
            destination
        )
    }

    /// Recover the descriptor of a proxy URL, or `None` if `url` is not in
    /// proxy form for this endpoint.
    #[must_use]
    pub fn decode(&self, url: &str) -> Option<ProxyUrlDescriptor> {
        self.try_decode(url).ok()
    }

    /// Like [`decode`](Self::decode), reporting why a URL is not a proxy URL.
    pub fn try_decode(&self, url: &str) -> Result<ProxyUrlDescriptor> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| VeneerError::not_proxy(url, format!("not an absolute URL ({})", e)))?;

        let scheme = parsed.scheme();
        let protocol = self.config.protocol;
        if scheme != protocol.scheme() && scheme != protocol.web_socket_scheme() {
            return Err(VeneerError::not_proxy(url, format!("scheme {} does not match the proxy", scheme)));
        }

        let host = parsed.host_str().unwrap_or_default();
        if !host.eq_ignore_ascii_case(&self.config.hostname) {
            return Err(VeneerError::not_proxy(url, format!("host {} is not the proxy host", host)));
        }

        let port = match parsed.port_or_known_default() {
            Some(p) if p == self.config.primary_port => ProxyPort::Primary,
            Some(p) if p == self.config.cross_domain_port => ProxyPort::CrossDomain,
            other => {
                return Err(VeneerError::not_proxy(url, format!("port {:?} is not a proxy port", other)));
            }
        };

        let rest = parsed[Position::BeforePath..].trim_start_matches('/');
        let (meta, destination) = rest
            .split_once('/')
            .ok_or_else(|| VeneerError::not_proxy(url, "missing destination"))?;

        let mut parts = meta.split('!');
        let session = parts.next().unwrap_or_default();
        let session = SessionId::new(session)
            .map_err(|e| VeneerError::not_proxy(url, format!("bad session segment: {}", e)))?;
        let kind = ResourceKind::deserialize(parts.next().unwrap_or_default());
        let charset = parts.next().filter(|c| !c.is_empty()).map(str::to_string);
        if parts.next().is_some() {
            return Err(VeneerError::not_proxy(url, "too many '!' separated parts"));
        }

        let destination = Url::parse(destination).map_err(|e| {
            VeneerError::not_proxy(url, format!("malformed destination {:?} ({})", destination, e))
        })?;

        Ok(ProxyUrlDescriptor {
            destination,
            session,
            kind,
            port,
            charset,
        })
    }

    #[must_use]
    pub fn is_proxy_url(&self, url: &str) -> bool {
        self.decode(url).is_some()
    }

    /// Resolve a possibly relative reference against a destination base.
    ///
    /// Standard URL resolution applies (scheme-relative, root-relative,
    /// path-relative, query-only and fragment-only references). A reference
    /// that is already a proxy URL resolves to its destination.
    pub fn resolve_as_destination(&self, reference: &str, base: &Url) -> Result<Url> {
        if let Some(descriptor) = self.decode(reference) {
            return Ok(descriptor.destination);
        }
        base.join(reference.trim()).map_err(|e| VeneerError::InvalidUrl {
            url: reference.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Whether a raw attribute value should be routed through the proxy.
///
/// Relative references and http(s)/ws(s) URLs are rewritten. Fragment-only
/// references and other schemes (`javascript:`, `mailto:`, `data:`,
/// `about:`, `blob:` ...) keep their value.
#[must_use]
pub fn should_rewrite(value: &str) -> bool {
    let value = value.trim();
    if value.starts_with('#') {
        return false;
    }
    match scheme_of(value) {
        Some(scheme) => matches!(scheme.as_str(), "http" | "https" | "ws" | "wss"),
        None => true,
    }
}

/// The lowercased scheme of an absolute reference, if it has one.
fn scheme_of(value: &str) -> Option<String> {
    let colon = value.find(':')?;
    let candidate = &value[..colon];
    let mut chars = candidate.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(candidate.to_ascii_lowercase())
    } else {
        None
    }
}
