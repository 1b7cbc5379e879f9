//! CLI output styling for veneer

use crate::config::LoadedConfig;
use colored::Colorize;
use serde::Serialize;
use veneer::{Environment, ProxyPort, ProxyUrlDescriptor, ResourceKind, Result, UrlCodec};

/// Decoded proxy URL, as printed by `veneer decode --json`.
#[derive(Debug, Serialize)]
pub struct DecodedUrl {
    pub destination: String,
    pub destination_origin: String,
    pub session: String,
    pub kind: String,
    pub facets: Vec<&'static str>,
    pub port: ProxyPort,
    pub proxy_origin: String,
    pub charset: Option<String>,
}

impl DecodedUrl {
    pub fn new(codec: &UrlCodec, descriptor: &ProxyUrlDescriptor) -> Self {
        Self {
            destination: descriptor.destination().to_string(),
            destination_origin: descriptor.destination_origin(),
            session: descriptor.session().as_str().to_string(),
            kind: descriptor.kind().serialize(),
            facets: descriptor.kind().facet_names(),
            port: descriptor.port(),
            proxy_origin: codec.proxy_origin(descriptor.port()),
            charset: descriptor.charset().map(str::to_string),
        }
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Note on stderr where the configuration came from.
pub fn print_config_source(loaded: &LoadedConfig, silent: bool) {
    if silent {
        return;
    }
    eprintln!("{} {}", "config:".truecolor(150, 150, 150), loaded.source);
}

pub fn print_decoded(decoded: &DecodedUrl) {
    println!("{}", "Proxy URL:".white().bold());
    println!("  {:<12} {}", "destination", decoded.destination.green());
    println!("  {:<12} {}", "origin", decoded.destination_origin);
    println!("  {:<12} {}", "session", decoded.session.cyan());
    let kind = if decoded.facets.is_empty() {
        "none".truecolor(150, 150, 150).to_string()
    } else {
        format!("{} ({})", decoded.kind.yellow(), decoded.facets.join(", "))
    };
    println!("  {:<12} {}", "kind", kind);
    println!("  {:<12} {} {}", "port", port_label(decoded.port), decoded.proxy_origin);
    if let Some(ref charset) = decoded.charset {
        println!("  {:<12} {}", "charset", charset);
    }
}

pub fn print_kind(kind: ResourceKind) {
    if kind.is_empty() {
        println!("{}", "none".truecolor(150, 150, 150));
        return;
    }
    println!("{} ({})", kind.serialize().yellow().bold(), kind.facet_names().join(", "));
}

pub fn print_config(loaded: &LoadedConfig) {
    let config = &loaded.config;
    println!("{}", "Proxy configuration:".white().bold());
    println!("  {:<18} {}", "hostname", config.hostname.cyan());
    println!("  {:<18} {}", "protocol", config.protocol.scheme());
    println!("  {:<18} {}", "primary port", config.primary_port);
    println!("  {:<18} {}", "cross-domain port", config.cross_domain_port);
    println!(
        "  {:<18} {}",
        "charset",
        config.charset.as_deref().unwrap_or("(none)")
    );
    println!("  {:<18} {}", "source", loaded.source.to_string().truecolor(150, 150, 150));
}

pub fn print_environment(env: &Environment) {
    println!(
        "{} {} on {}",
        format!("{:?}", env.engine).green().bold(),
        env.version,
        format!("{:?}", env.platform).cyan()
    );
    if env.is_mobile() {
        println!("{}", "mobile".yellow());
    }
}

fn port_label(port: ProxyPort) -> colored::ColoredString {
    match port {
        ProxyPort::Primary => "primary".green(),
        ProxyPort::CrossDomain => "cross-domain".yellow(),
    }
}
