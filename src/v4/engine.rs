//! Protocol decision engine
//!
//! Consumes decoded DHCPv4 messages and decides whether to reply and with
//! what. Only hosts pre-registered in the registry are ever answered; the
//! assigned address is always the registered one. Discover produces an
//! offer, Request is validated and produces an acknowledge or a reject,
//! everything else is ignored. Unknown hardware addresses get no reply at
//! all so a conventional lease server can serve them.

use crate::config::ServerConfig;
use crate::error::AnvilError;
use crate::model::host::{mac_from_chaddr, Host};
use crate::model::registry::HostRegistry;
use crate::model::token::TokenIssuer;
use crate::v4::options::OptionComposer;
use dhcproto::v4::{self, DhcpOption, Message, MessageType, Opcode, OptionCode};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one exchange.
#[derive(Debug)]
pub enum Decision {
    /// Encode and send this reply.
    Reply(Message),
    /// Send nothing.
    Silent,
}

/// Stateless per-exchange decision logic over the shared registry and the
/// immutable configuration snapshot.
pub struct DecisionEngine {
    config: Arc<ServerConfig>,
    registry: Arc<HostRegistry>,
    issuer: TokenIssuer,
}

impl DecisionEngine {
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<HostRegistry>,
        issuer: TokenIssuer,
    ) -> Self {
        Self {
            config,
            registry,
            issuer,
        }
    }

    /// Decide how to answer one inbound message.
    pub fn decide(&self, req: &Message) -> Result<Decision, AnvilError> {
        let mtype = match message_type(req) {
            Some(t) => t,
            None => {
                debug!("message without a message type, staying silent");
                return Ok(Decision::Silent);
            }
        };

        let mac = match mac_from_chaddr(req.chaddr()) {
            Some(m) => m,
            None => {
                debug!("truncated hardware address, staying silent");
                return Ok(Decision::Silent);
            }
        };

        let host = match self.registry.find_by_mac(&mac)? {
            Some(h) => h,
            None => {
                debug!(mac = %mac, "no host record, staying silent");
                return Ok(Decision::Silent);
            }
        };

        match mtype {
            MessageType::Discover => self.offer(req, &mac, &host, mtype),
            MessageType::Request => self.confirm(req, &mac, &host),
            _ => {
                debug!(mac = %mac, dhcp_message = ?mtype, "ignoring message kind");
                Ok(Decision::Silent)
            }
        }
    }

    /// Offer path. Read-only against the registry; each datagram is
    /// independent and never retried.
    pub(crate) fn offer(
        &self,
        req: &Message,
        mac: &str,
        host: &Host,
        mtype: MessageType,
    ) -> Result<Decision, AnvilError> {
        if host.interface(mac).is_none() {
            warn!(mac = %mac, name = %host.name, "hardware address not on any interface of matched host");
            return Ok(Decision::Silent);
        }

        let mut resp = self.base_reply(req);
        resp.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Offer));

        self.finish_reply(req, host, mac, resp, mtype)
    }

    /// Confirm path: validate the client's claim before acknowledging.
    /// A claim naming another server aborts with no reply; a claim for the
    /// wrong address is answered with an explicit reject.
    pub(crate) fn confirm(
        &self,
        req: &Message,
        mac: &str,
        host: &Host,
    ) -> Result<Decision, AnvilError> {
        let server = self.config.server_ip;

        let siaddr = req.siaddr();
        if !siaddr.is_unspecified() && siaddr != server {
            return Err(AnvilError::ServerMismatch {
                got: siaddr,
                want: server,
            });
        }

        if let Some(DhcpOption::ServerIdentifier(id)) =
            req.opts().get(OptionCode::ServerIdentifier)
        {
            if !id.is_unspecified() && *id != server {
                return Err(AnvilError::ServerMismatch {
                    got: *id,
                    want: server,
                });
            }
        }

        let claimed = if !req.ciaddr().is_unspecified() {
            req.ciaddr()
        } else {
            requested_ip(req).unwrap_or(Ipv4Addr::UNSPECIFIED)
        };

        // The offer path proved a matching interface exists; reaching this
        // point without one is an internal inconsistency, not a protocol
        // condition.
        let nic = host
            .interface(mac)
            .ok_or_else(|| AnvilError::InterfaceNotFound {
                mac: mac.to_string(),
                host: host.name.clone(),
            })?;

        if claimed != nic.addr {
            let text = format!(
                "requested address {claimed} does not match address registered for {}: {}",
                host.name, nic.addr
            );
            info!(
                mac = %mac,
                name = %host.name,
                claimed = %claimed,
                registered = %nic.addr,
                "address claim mismatch, rejecting"
            );
            let mut resp = self.base_reply(req);
            resp.opts_mut()
                .insert(DhcpOption::MessageType(MessageType::Nak));
            resp.opts_mut().insert(DhcpOption::Message(text));
            return Ok(Decision::Reply(resp));
        }

        let mut resp = self.base_reply(req);
        if !req.ciaddr().is_unspecified() {
            resp.set_ciaddr(req.ciaddr());
        }
        resp.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Ack));

        self.finish_reply(req, host, mac, resp, MessageType::Request)
    }

    /// Reply skeleton shared by every outcome: header fields echoed from
    /// the request, no options beyond what the caller inserts.
    fn base_reply(&self, req: &Message) -> Message {
        let mut resp = Message::default();
        resp.set_opcode(Opcode::BootReply)
            .set_htype(v4::HType::Eth)
            .set_xid(req.xid())
            .set_flags(req.flags())
            .set_chaddr(req.chaddr())
            .set_giaddr(req.giaddr())
            .set_siaddr(self.config.server_ip);
        resp
    }

    /// Assign the registered address and populate the full option set.
    fn finish_reply(
        &self,
        req: &Message,
        host: &Host,
        mac: &str,
        mut resp: Message,
        mtype: MessageType,
    ) -> Result<Decision, AnvilError> {
        let nic = host
            .interface(mac)
            .ok_or_else(|| AnvilError::InterfaceNotFound {
                mac: mac.to_string(),
                host: host.name.clone(),
            })?;

        resp.set_yiaddr(nic.addr);
        resp.opts_mut()
            .insert(DhcpOption::ServerIdentifier(self.config.server_ip));

        info!(
            ip = %nic.addr,
            mac = %mac,
            name = %host.name,
            dhcp_message = ?mtype,
            "matched host record"
        );

        let composer = OptionComposer::new(&self.config, &self.issuer);
        composer.apply(host, nic, req, &mut resp);

        Ok(Decision::Reply(resp))
    }
}

fn message_type(req: &Message) -> Option<MessageType> {
    match req.opts().get(OptionCode::MessageType) {
        Some(DhcpOption::MessageType(t)) => Some(t.clone()),
        _ => None,
    }
}

fn requested_ip(req: &Message) -> Option<Ipv4Addr> {
    match req.opts().get(OptionCode::RequestedIpAddress) {
        Some(DhcpOption::RequestedIpAddress(ip)) if !ip.is_unspecified() => Some(*ip),
        _ => None,
    }
}
