//! Proxy URL codec and in-page interception sandbox.
//!
//! `veneer` is the client half of an intercepting web proxy. Pages are
//! served from the proxy's own origin under addresses of the form
//! `{scheme}://{host}:{port}/{session}[!{kind}][!{charset}]/{destination}`,
//! and every URL a page introduces at runtime has to be brought into that
//! form before the platform sees it.
//!
//! The crate is layered:
//!
//! 1. **Resource classifier** (`resource`) - maps a load context to a set
//!    of resource facets (script, iframe, form, stylesheet, ...).
//! 2. **URL codec** (`codec`) - encodes destination URLs into proxy URLs
//!    and decodes them back.
//! 3. **Interception layer** (`sandbox`) - one [`Sandbox`] per window wraps
//!    every DOM operation that can introduce or reveal a URL, keeping the
//!    proxy form in the public attribute and the original in a shadow
//!    attribute.
//! 4. **Session coordinator** (`session`) - tracks the windows and frames
//!    of a session, bootstraps a sandbox into each new frame, relays
//!    cross-window messages with destination origins and exposes an event
//!    bus per window.
//!
//! The host platform is modelled by the arena DOM in `dom`, whose methods
//! are the "native" operations the sandbox wraps.

pub mod audit;
pub mod codec;
pub mod config;
pub mod dom;
pub mod error;
pub mod resource;
pub mod sandbox;
pub mod session;
pub mod session_id;

pub use codec::{should_rewrite, ProxyPort, ProxyUrlDescriptor, UrlCodec};
pub use config::{ProxyConfig, ProxyProtocol};
pub use dom::{Dom, DomException, DomResult, NodeId, WindowId};
pub use error::{Result, VeneerError};
pub use resource::{classify, Initiator, LoadContext, NavigationType, ResourceKind};
pub use sandbox::Sandbox;
pub use session::{Coordinator, Environment, EventBus, EventKind, WindowHandle};
pub use session_id::SessionId;
