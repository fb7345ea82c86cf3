//! Datagram serve loop
//!
//! Receives raw datagrams, decodes them, and hands each one to the
//! decision engine on its own task. Undecodable datagrams and engine
//! decisions to stay silent simply produce no reply; the client's own
//! retransmission timer is the only recovery mechanism.

use crate::config::ServerConfig;
use crate::error::AnvilError;
use crate::model::registry::HostRegistry;
use crate::model::token::TokenIssuer;
use crate::network;
use crate::v4::engine::{Decision, DecisionEngine};
use dhcproto::v4::Message;
use dhcproto::{Decodable, Encodable};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, error, info};

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub struct Server {
    config: Arc<ServerConfig>,
    engine: Arc<DecisionEngine>,
}

impl Server {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<HostRegistry>,
        issuer: TokenIssuer,
    ) -> Self {
        let engine = Arc::new(DecisionEngine::new(config.clone(), registry, issuer));
        Self { config, engine }
    }

    /// Run the receive loop until the task is cancelled.
    pub async fn run(&self) -> Result<(), AnvilError> {
        let socket = network::new_server_socket(
            self.config.bind_ip,
            DHCP_SERVER_PORT,
            self.config.interface.as_deref(),
        )?;
        let socket = Arc::new(socket);

        info!(
            bind = %self.config.bind_ip,
            port = DHCP_SERVER_PORT,
            server_ip = %self.config.server_ip,
            "dhcp server listening"
        );

        let mut buf = [0u8; 1500];
        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    error!(error = %e, "error receiving datagram");
                    continue;
                }
            };

            let data = buf[..len].to_vec();
            let engine = self.engine.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_datagram(engine, socket, data, src).await {
                    match e {
                        // Not authoritative for this exchange; drop quietly.
                        AnvilError::ServerMismatch { .. } => {
                            debug!(error = %e, "dropping datagram")
                        }
                        _ => error!(error = %e, "error handling datagram"),
                    }
                }
            });
        }
    }
}

async fn handle_datagram(
    engine: Arc<DecisionEngine>,
    socket: Arc<UdpSocket>,
    data: Vec<u8>,
    src: SocketAddr,
) -> Result<(), AnvilError> {
    let req = match Message::from_bytes(&data) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(src = %src, error = %e, "failed to decode datagram");
            return Ok(());
        }
    };

    let resp = match engine.decide(&req)? {
        Decision::Reply(resp) => resp,
        Decision::Silent => return Ok(()),
    };

    let bytes = resp.to_vec().map_err(|e| AnvilError::Encode(e.to_string()))?;
    let dest = reply_destination(&req);
    socket.send_to(&bytes, dest).await?;
    debug!(dest = %dest, len = bytes.len(), "sent reply");

    Ok(())
}

/// Where to send the reply: relay agent for relayed requests, unicast when
/// the client already holds an address, broadcast otherwise.
fn reply_destination(req: &Message) -> SocketAddr {
    if !req.giaddr().is_unspecified() {
        SocketAddr::new(req.giaddr().into(), DHCP_SERVER_PORT)
    } else if !req.ciaddr().is_unspecified() {
        SocketAddr::new(req.ciaddr().into(), DHCP_CLIENT_PORT)
    } else {
        SocketAddr::new(Ipv4Addr::BROADCAST.into(), DHCP_CLIENT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcproto::v4::Opcode;

    #[test]
    fn test_reply_destination() {
        let mut req = Message::default();
        req.set_opcode(Opcode::BootRequest);

        // Nothing set: broadcast to the client port.
        assert_eq!(
            reply_destination(&req),
            SocketAddr::new(Ipv4Addr::BROADCAST.into(), DHCP_CLIENT_PORT)
        );

        // Client address set: unicast.
        req.set_ciaddr(Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(
            reply_destination(&req),
            SocketAddr::new(Ipv4Addr::new(10, 0, 0, 5).into(), DHCP_CLIENT_PORT)
        );

        // Relay takes precedence and uses the server port.
        req.set_giaddr(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            reply_destination(&req),
            SocketAddr::new(Ipv4Addr::new(10, 0, 0, 1).into(), DHCP_SERVER_PORT)
        );
    }
}
