//! # Anvil - Static-Assignment DHCPv4 Provisioning
//!
//! Anvil is a network-boot provisioning server for clusters of bare-metal
//! machines. Every node is pre-registered in a durable host registry; the
//! server answers DHCPv4 exchanges for known hardware addresses only,
//! always hands back the registered address, and injects vendor-specific
//! boot options carrying short-lived boot tokens for hosts flagged for
//! provisioning.
//!
//! ## Features
//!
//! - Static assignment only: unknown hardware addresses are never answered
//! - Durable, transactional host registry with lookup by hardware address
//!   and by assigned address
//! - Ordered subnet router table with deterministic first-match resolution
//! - Tag-driven vendor provisioning flows with per-request boot tokens
//! - Asynchronous operation using Tokio, one task per exchange
//!
//! ## Example
//!
//! ```rust,no_run
//! use anvil::{HostRegistry, Server, ServerConfig, TokenIssuer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServerConfig::new("10.0.0.2".parse()?));
//!     let registry = Arc::new(HostRegistry::open("anvil.redb")?);
//!     let issuer = TokenIssuer::new(b"change-me".to_vec())?;
//!     Server::new(config, registry, issuer).run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod network;
pub mod server;
pub mod v4;

pub use config::{Args, ServerConfig};
pub use error::AnvilError;
pub use model::host::{Host, NetInterface};
pub use model::registry::HostRegistry;
pub use model::token::{BootToken, TokenIssuer};
pub use server::Server;
pub use v4::engine::{Decision, DecisionEngine};
pub use v4::subnet::{SubnetRoute, SubnetTable};
