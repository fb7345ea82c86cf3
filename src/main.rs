use anvil::config::Args;
use anvil::model::host::Host;
use anvil::model::registry::HostRegistry;
use anvil::model::token::TokenIssuer;
use anvil::server::Server;
use clap::Parser;
use rand::Rng as _;
use std::error::Error as StdError;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn StdError>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Arc::new(args.to_config());

    let registry = Arc::new(HostRegistry::open(&args.db)?);

    if let Some(path) = &args.hosts {
        let raw = tokio::fs::read_to_string(path).await?;
        let hosts: Vec<Host> = serde_json::from_str(&raw)?;
        for host in &hosts {
            registry.put_host(host)?;
        }
        info!(count = hosts.len(), path = %path.display(), "loaded host records");
    }

    let secret = match &args.secret {
        Some(secret) => secret.clone().into_bytes(),
        None => match std::env::var("ANVIL_SECRET") {
            Ok(secret) => secret.into_bytes(),
            Err(_) => {
                warn!("no token secret configured, using a random one; boot tokens will not survive a restart");
                let mut secret = vec![0u8; 32];
                rand::rng().fill(&mut secret[..]);
                secret
            }
        },
    };
    let issuer = TokenIssuer::new(secret)?;

    let server = Server::new(config, registry, issuer);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
