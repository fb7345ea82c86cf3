//! Host registry data model
//!
//! This module contains the persistent side of the server:
//! - Host records and their network interfaces
//! - The durable, transactional host registry
//! - Boot token issuance for provisioning flows

pub mod host;
pub mod registry;
pub mod token;

pub use host::{Host, NetInterface};
pub use registry::HostRegistry;
pub use token::{BootToken, TokenIssuer};
