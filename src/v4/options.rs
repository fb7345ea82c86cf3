//! Outbound option composition
//!
//! Fills the option set of an offer or acknowledge reply from the matched
//! host record and the server configuration: routing, DNS, MTU, hostname,
//! domain search, and the vendor provisioning flows selected by host tags.

use crate::config::ServerConfig;
use crate::model::host::{Host, NetInterface, TAG_VENDOR_BMP, TAG_VENDOR_ZTD};
use crate::model::token::TokenIssuer;
use dhcproto::v4::{DhcpOption, Message, OptionCode, UnknownOption};
use rand::seq::SliceRandom as _;
use std::net::Ipv4Addr;
use tracing::{debug, error, info};

/// PXELINUX configuration file option (209), carries the boot-config URL.
const OPT_CONFIG_FILE: OptionCode = OptionCode::Unknown(209);

/// Zero-touch deployment option (240), carries the provisioning URL.
const OPT_PROVISION_URL: OptionCode = OptionCode::Unknown(240);

/// Builds outbound options for one reply. Stateless across exchanges.
pub struct OptionComposer<'a> {
    config: &'a ServerConfig,
    issuer: &'a TokenIssuer,
}

impl<'a> OptionComposer<'a> {
    pub fn new(config: &'a ServerConfig, issuer: &'a TokenIssuer) -> Self {
        Self { config, issuer }
    }

    pub fn apply(&self, host: &Host, nic: &NetInterface, req: &Message, resp: &mut Message) {
        self.set_router(nic, resp);
        self.set_provisioning(host, nic, resp);

        resp.opts_mut().insert(DhcpOption::AddressLeaseTime(
            self.config.lease_time.as_secs() as u32,
        ));

        self.set_dns(req, resp);

        if is_requested(req, OptionCode::InterfaceMtu) {
            resp.opts_mut()
                .insert(DhcpOption::InterfaceMtu(self.config.mtu));
        }

        if !nic.fqdn.is_empty() {
            resp.opts_mut()
                .insert(DhcpOption::Hostname(nic.fqdn.clone()));
        }

        if !self.config.domain_search.is_empty() {
            resp.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::DomainSearch,
                encode_search_list(&self.config.domain_search),
            )));
        }
    }

    /// Router and netmask for the assigned address. The subnet table is
    /// scanned in configured order and the first containing prefix wins;
    /// the global fallbacks apply only when no entry matches.
    fn set_router(&self, nic: &NetInterface, resp: &mut Message) {
        if let Some(route) = self.config.subnets.resolve(nic.addr) {
            resp.opts_mut()
                .insert(DhcpOption::Router(vec![route.gateway]));
            resp.opts_mut()
                .insert(DhcpOption::SubnetMask(route.net.netmask()));
            return;
        }

        if let Some(mask) = self.config.netmask {
            resp.opts_mut().insert(DhcpOption::SubnetMask(mask));

            if self.config.router_octet > 0 {
                let base = u32::from(nic.addr) & u32::from(mask);
                let mut octets = Ipv4Addr::from(base).octets();
                octets[3] = octets[3].wrapping_add(self.config.router_octet);
                resp.opts_mut()
                    .insert(DhcpOption::Router(vec![Ipv4Addr::from(octets)]));
                return;
            }
        }

        if let Some(router) = self.config.router {
            resp.opts_mut().insert(DhcpOption::Router(vec![router]));
        }
    }

    /// Vendor provisioning options, dispatched on host tags. A host may
    /// carry both tags; each branch mints its own token bound to the
    /// interface that answered this exchange.
    fn set_provisioning(&self, host: &Host, nic: &NetInterface, resp: &mut Message) {
        if !host.provision {
            return;
        }

        let cfg = self.config;

        if host.has_tag(TAG_VENDOR_BMP) {
            match self.issuer.mint(&host.id, &nic.mac) {
                Ok(token) => {
                    info!(
                        ip = %nic.addr,
                        name = %host.name,
                        "host tagged for bare metal provisioning, setting boot image and config options"
                    );
                    let image_url = format!(
                        "{}://{}:{}/boot/{}/file/kernel",
                        cfg.provision_scheme, cfg.server_ip, cfg.provision_port, token
                    );
                    debug!(url = %image_url, "boot image URL");
                    resp.opts_mut()
                        .insert(DhcpOption::BootfileName(image_url.into_bytes()));

                    let config_url = format!(
                        "{}://{}:{}/boot/{}/kickstart",
                        cfg.provision_scheme, cfg.server_ip, cfg.provision_port, token
                    );
                    debug!(url = %config_url, "boot config URL");
                    resp.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                        OPT_CONFIG_FILE,
                        config_url.into_bytes(),
                    )));
                }
                Err(e) => error!(
                    name = %host.name,
                    error = %e,
                    "token mint failed, skipping boot image options"
                ),
            }
        }

        if host.has_tag(TAG_VENDOR_ZTD) {
            match self.issuer.mint(&host.id, &nic.mac) {
                Ok(token) => {
                    info!(
                        ip = %nic.addr,
                        name = %host.name,
                        "host tagged for zero-touch deployment, setting provisioning URL option"
                    );
                    let provision_url = format!(
                        "{}://{}:{}/boot/{}/kickstart",
                        cfg.provision_scheme, cfg.server_ip, cfg.provision_port, token
                    );
                    debug!(url = %provision_url, "provisioning URL");
                    resp.opts_mut().insert(DhcpOption::Unknown(UnknownOption::new(
                        OPT_PROVISION_URL,
                        provision_url.into_bytes(),
                    )));
                }
                Err(e) => error!(
                    name = %host.name,
                    error = %e,
                    "token mint failed, skipping provisioning URL option"
                ),
            }
        }
    }

    fn set_dns(&self, req: &Message, resp: &mut Message) {
        if self.config.dns_servers.is_empty()
            || !is_requested(req, OptionCode::DomainNameServer)
        {
            return;
        }

        if self.config.dns_servers.len() == 1 {
            resp.opts_mut()
                .insert(DhcpOption::DomainNameServer(self.config.dns_servers.clone()));
            return;
        }

        // Randomized per reply to distribute resolver load.
        let mut servers = self.config.dns_servers.clone();
        servers.shuffle(&mut rand::rng());
        resp.opts_mut().insert(DhcpOption::DomainNameServer(servers));
    }
}

/// Whether the client listed this option in its parameter request list.
pub fn is_requested(req: &Message, code: OptionCode) -> bool {
    matches!(
        req.opts().get(OptionCode::ParameterRequestList),
        Some(DhcpOption::ParameterRequestList(list)) if list.contains(&code)
    )
}

/// RFC 1035 label encoding of a domain search list, without compression.
pub fn encode_search_list(domains: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for domain in domains {
        for label in domain.split('.').filter(|l| !l.is_empty()) {
            let label = label.as_bytes();
            let len = label.len().min(63);
            out.push(len as u8);
            out.extend_from_slice(&label[..len]);
        }
        out.push(0);
    }
    out
}
