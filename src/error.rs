use crate::model::registry::RegistryError;
use crate::model::token::TokenError;
use crate::network::SocketError;
use std::io;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnvilError {
    #[error("socket operation failed")]
    Socket(#[from] SocketError),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("host registry error")]
    Registry(#[from] RegistryError),

    #[error("token issuance failed")]
    Token(#[from] TokenError),

    #[error("failed to encode DHCP reply: {0}")]
    Encode(String),

    #[error("request targets server {got}, this server is {want}")]
    ServerMismatch { got: Ipv4Addr, want: Ipv4Addr },

    #[error("no interface with hardware address {mac} on host '{host}'")]
    InterfaceNotFound { mac: String, host: String },
}
