//! veneer CLI - proxy URL tooling
//!
//! Operator commands over the veneer URL codec: encode and decode proxy
//! URLs, resolve references the way the in-page sandbox does, classify
//! load contexts and mint session ids.

mod cli;
mod config;
mod output;

use clap::Parser;
use cli::{ClassifyArgs, Cli, Commands, DecodeArgs, EncodeArgs, EnvArgs, ResolveArgs, SessionArgs};
use config::LoadedConfig;
use output::DecodedUrl;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use url::Url;
use veneer::{
    classify, Environment, LoadContext, ProxyUrlDescriptor, ResourceKind, Result, SessionId,
    UrlCodec, VeneerError,
};

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run() {
        error!("{}", e);
        eprintln!("veneer: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let load_config = || -> Result<LoadedConfig> {
        let loaded = config::load(config_path)?;
        output::print_config_source(&loaded, cli.silent);
        Ok(loaded)
    };

    match cli.command {
        Commands::Encode(args) => {
            let loaded = load_config()?;
            run_encode(args, &loaded)
        }
        Commands::Decode(args) => {
            let loaded = load_config()?;
            run_decode(args, &loaded)
        }
        Commands::Resolve(args) => {
            let loaded = load_config()?;
            run_resolve(args, &loaded)
        }
        Commands::Classify(args) => run_classify(args),
        Commands::Config(args) => {
            let loaded = config::load(config_path)?;
            if args.json {
                output::print_json(&loaded.config)
            } else {
                output::print_config(&loaded);
                Ok(())
            }
        }
        Commands::Session(args) => run_session(args),
        Commands::Env(args) => run_env(args),
    }
}

fn parse_url(value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| VeneerError::InvalidUrl {
        url: value.to_string(),
        reason: e.to_string(),
    })
}

fn session_or_generate(session: Option<String>) -> Result<SessionId> {
    match session {
        Some(id) => SessionId::new(id),
        None => {
            let id = SessionId::generate()?;
            debug!("generated session {}", id.as_str());
            Ok(id)
        }
    }
}

/// Kind from `--kind TOKEN` or repeated `--facet NAME`.
fn kind_from_args(token: Option<&str>, facets: &[String]) -> Result<ResourceKind> {
    if let Some(token) = token {
        return Ok(ResourceKind::deserialize(token));
    }
    facets.iter().try_fold(ResourceKind::NONE, |kind, name| {
        ResourceKind::from_facet_name(name)
            .map(|facet| kind.with(facet))
            .ok_or_else(|| VeneerError::Config(format!("unknown resource facet: {}", name)))
    })
}

fn run_encode(args: EncodeArgs, loaded: &LoadedConfig) -> Result<()> {
    let codec = UrlCodec::new(loaded.config.clone())?;
    let destination = parse_url(&args.destination)?;
    let session = session_or_generate(args.session)?;
    let kind = kind_from_args(args.kind.as_deref(), &args.facet)?;

    let mut descriptor = ProxyUrlDescriptor::new(destination, session)
        .with_kind(kind)
        .with_port(args.port.into());
    if let Some(charset) = args.charset {
        descriptor = descriptor.with_charset(charset)?;
    }
    println!("{}", codec.encode(&descriptor));
    Ok(())
}

fn run_decode(args: DecodeArgs, loaded: &LoadedConfig) -> Result<()> {
    let codec = UrlCodec::new(loaded.config.clone())?;
    let descriptor = codec.try_decode(&args.url)?;
    let decoded = DecodedUrl::new(&codec, &descriptor);
    if args.json {
        output::print_json(&decoded)
    } else {
        output::print_decoded(&decoded);
        Ok(())
    }
}

fn run_resolve(args: ResolveArgs, loaded: &LoadedConfig) -> Result<()> {
    let codec = UrlCodec::new(loaded.config.clone())?;
    let (base, base_session, port) = match codec.decode(&args.base) {
        Some(descriptor) => (
            descriptor.destination().clone(),
            Some(descriptor.session().clone()),
            descriptor.port(),
        ),
        None => (parse_url(&args.base)?, None, Default::default()),
    };
    let destination = codec.resolve_as_destination(&args.reference, &base)?;
    println!("{}", destination);

    if args.encode {
        let session = match args.session {
            Some(id) => SessionId::new(id)?,
            None => match base_session {
                Some(session) => session,
                None => session_or_generate(None)?,
            },
        };
        let descriptor = ProxyUrlDescriptor::new(destination, session).with_port(port);
        println!("{}", codec.encode(&descriptor));
    }
    Ok(())
}

fn run_classify(args: ClassifyArgs) -> Result<()> {
    let kind = if let (Some(tag), Some(attr)) = (args.tag.as_deref(), args.attr.as_deref()) {
        classify(&LoadContext::Attribute {
            tag,
            attr,
            rel: args.rel.as_deref(),
            targets_frame: args.targets_frame,
        })
    } else if let Some(initiator) = args.initiator {
        classify(&LoadContext::Initiator(initiator.into()))
    } else if let Some(navigation) = args.navigation {
        classify(&LoadContext::Navigation(navigation.into()))
    } else {
        return Err(VeneerError::Config(
            "classify needs --tag/--attr, --initiator or --navigation".to_string(),
        ));
    };
    output::print_kind(kind);
    Ok(())
}

fn run_session(args: SessionArgs) -> Result<()> {
    for _ in 0..args.count {
        println!("{}", SessionId::generate()?.as_str());
    }
    Ok(())
}

fn run_env(args: EnvArgs) -> Result<()> {
    let env = Environment::from_user_agent(&args.user_agent);
    if args.json {
        output::print_json(&env)
    } else {
        output::print_environment(&env);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_token() {
        let kind = kind_from_args(Some("is"), &[]).unwrap();
        assert_eq!(kind, ResourceKind::IFRAME.with(ResourceKind::SCRIPT));
    }

    #[test]
    fn test_kind_from_facet_names() {
        let facets = vec!["iframe".to_string(), "FORM".to_string()];
        let kind = kind_from_args(None, &facets).unwrap();
        assert_eq!(kind, ResourceKind::IFRAME.with(ResourceKind::FORM));
        assert!(kind_from_args(None, &["bogus".to_string()]).is_err());
        assert_eq!(kind_from_args(None, &[]).unwrap(), ResourceKind::NONE);
    }

    #[test]
    fn test_session_argument_is_validated() {
        assert!(session_or_generate(Some("a/b".to_string())).is_err());
        assert_eq!(
            session_or_generate(Some("abc".to_string())).unwrap().as_str(),
            "abc"
        );
        assert_eq!(session_or_generate(None).unwrap().as_str().len(), 32);
    }
}
