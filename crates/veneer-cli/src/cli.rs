//! CLI argument definitions for veneer
//!
//! Uses clap for argument parsing. This module defines all subcommands
//! and their options.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use veneer::{Initiator, NavigationType, ProxyPort};

/// veneer - proxy URL tooling
///
/// Encode, decode and inspect the URLs an intercepting web proxy serves
/// pages under.
#[derive(Parser, Debug)]
#[command(name = "veneer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Silent mode - suppress informational output on stderr
    #[arg(long, short = 's', global = true)]
    pub silent: bool,

    /// Proxy configuration file (JSON). Overrides VENEER_CONFIG and the
    /// user config file.
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode a destination URL into a proxy URL
    #[command(after_help = "EXAMPLES:
    # Proxy URL for a page in a fresh session
    veneer encode https://example.com/

    # Script resource in a known session
    veneer encode --session abc123 --kind s https://example.com/app.js

    # Cross-domain iframe with a charset
    veneer encode --session abc123 --facet iframe --port cross-domain \\
        --charset utf-8 https://other.example/frame.html
")]
    Encode(EncodeArgs),

    /// Decode a proxy URL into its parts
    #[command(after_help = "EXAMPLES:
    veneer decode http://localhost:1337/abc123!s/https://example.com/app.js

    # JSON output for scripts
    veneer decode --json http://localhost:1337/abc123/https://example.com/
")]
    Decode(DecodeArgs),

    /// Resolve a reference against a page the way the sandbox does
    #[command(after_help = "EXAMPLES:
    # Root-relative reference on a proxied page
    veneer resolve /img/logo.png --base http://localhost:1337/abc123/https://example.com/a/b.html

    # Print the proxy URL the sandbox would write
    veneer resolve ../style.css --base https://example.com/a/b.html --session abc123 --encode
")]
    Resolve(ResolveArgs),

    /// Show the resource kind of a load context
    #[command(after_help = "EXAMPLES:
    veneer classify --tag script --attr src
    veneer classify --tag link --attr href --rel stylesheet
    veneer classify --tag form --attr action --targets-frame
    veneer classify --initiator websocket
    veneer classify --navigation frame
")]
    Classify(ClassifyArgs),

    /// Print the effective proxy configuration
    Config(ConfigArgs),

    /// Generate session ids
    Session(SessionArgs),

    /// Detect engine and platform from a user agent string
    Env(EnvArgs),
}

#[derive(Parser, Debug)]
pub struct EncodeArgs {
    /// Destination URL (absolute)
    #[arg(value_name = "URL")]
    pub destination: String,

    /// Session id (a random one is generated when omitted)
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,

    /// Resource kind token, e.g. "is" for an iframe script
    #[arg(long, value_name = "TOKEN", conflicts_with = "facet")]
    pub kind: Option<String>,

    /// Resource facet by name (repeatable)
    #[arg(long, value_name = "NAME")]
    pub facet: Vec<String>,

    /// Proxy port to serve from
    #[arg(long, value_enum, default_value = "primary")]
    pub port: PortArg,

    /// Charset segment
    #[arg(long, value_name = "CHARSET")]
    pub charset: Option<String>,
}

#[derive(Parser, Debug)]
pub struct DecodeArgs {
    /// Proxy URL
    #[arg(value_name = "PROXY_URL")]
    pub url: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Reference as written in the page
    #[arg(value_name = "REFERENCE")]
    pub reference: String,

    /// Page address: a proxy URL or a destination URL
    #[arg(long, value_name = "URL")]
    pub base: String,

    /// Also print the proxy URL of the resolved destination
    #[arg(long)]
    pub encode: bool,

    /// Session id for --encode (taken from --base when it is a proxy URL)
    #[arg(long, value_name = "ID")]
    pub session: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ClassifyArgs {
    /// Element tag name
    #[arg(long, requires = "attr", conflicts_with_all = ["initiator", "navigation"])]
    pub tag: Option<String>,

    /// URL-bearing attribute name
    #[arg(long, requires = "tag")]
    pub attr: Option<String>,

    /// `rel` of a <link> element
    #[arg(long, requires = "tag")]
    pub rel: Option<String>,

    /// The element's target names a frame
    #[arg(long, requires = "tag")]
    pub targets_frame: bool,

    /// Script-initiated request
    #[arg(long, value_enum, conflicts_with = "navigation")]
    pub initiator: Option<InitiatorArg>,

    /// Window navigation
    #[arg(long, value_enum)]
    pub navigation: Option<NavigationArg>,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct SessionArgs {
    /// Number of ids to generate
    #[arg(long, short = 'n', default_value_t = 1)]
    pub count: usize,
}

#[derive(Parser, Debug)]
pub struct EnvArgs {
    /// User agent string
    #[arg(value_name = "USER_AGENT")]
    pub user_agent: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Proxy port selector
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PortArg {
    /// Port serving top-level pages
    Primary,
    /// Port emulating a second origin for cross-domain frames
    CrossDomain,
}

impl From<PortArg> for ProxyPort {
    fn from(port: PortArg) -> Self {
        match port {
            PortArg::Primary => ProxyPort::Primary,
            PortArg::CrossDomain => ProxyPort::CrossDomain,
        }
    }
}

/// Request initiator for classify
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum InitiatorArg {
    Fetch,
    #[value(name = "xhr")]
    XmlHttpRequest,
    #[value(name = "websocket")]
    WebSocket,
    EventSource,
    ServiceWorker,
    ServiceWorkerScope,
    Worker,
}

impl From<InitiatorArg> for Initiator {
    fn from(arg: InitiatorArg) -> Self {
        match arg {
            InitiatorArg::Fetch => Initiator::Fetch,
            InitiatorArg::XmlHttpRequest => Initiator::XmlHttpRequest,
            InitiatorArg::WebSocket => Initiator::WebSocket,
            InitiatorArg::EventSource => Initiator::EventSource,
            InitiatorArg::ServiceWorker => Initiator::ServiceWorkerRegistration,
            InitiatorArg::ServiceWorkerScope => Initiator::ServiceWorkerScope,
            InitiatorArg::Worker => Initiator::Worker,
        }
    }
}

/// Navigation type for classify
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum NavigationArg {
    TopLevel,
    Frame,
    FormSubmission,
}

impl From<NavigationArg> for NavigationType {
    fn from(arg: NavigationArg) -> Self {
        match arg {
            NavigationArg::TopLevel => NavigationType::TopLevel,
            NavigationArg::Frame => NavigationType::Frame,
            NavigationArg::FormSubmission => NavigationType::FormSubmission,
        }
    }
}
