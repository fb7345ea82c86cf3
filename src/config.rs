use crate::v4::subnet::{SubnetRoute, SubnetTable};
use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// IPv4 address of this server, advertised to clients and embedded in
    /// provisioning URLs
    #[arg(long)]
    pub server_ip: Ipv4Addr,

    /// Address to bind the DHCP socket to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: Ipv4Addr,

    /// Network interface to bind to (e.g. 'eth0'); Linux only
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Path to the host registry database
    #[arg(long, default_value = "anvil.redb")]
    pub db: PathBuf,

    /// JSON file of host records loaded into the registry at startup
    #[arg(long)]
    pub hosts: Option<PathBuf>,

    /// Lease time handed to clients, in seconds
    #[arg(long, default_value_t = 86400)]
    pub lease_time: u64,

    /// Subnet router entry as GATEWAY=CIDR; repeatable, order significant
    #[arg(long = "subnet", value_name = "GATEWAY=CIDR", value_parser = parse_subnet_route)]
    pub subnets: Vec<SubnetRoute>,

    /// Fallback netmask when no subnet entry matches
    #[arg(long)]
    pub netmask: Option<Ipv4Addr>,

    /// Fallback router handed out verbatim
    #[arg(long)]
    pub router: Option<Ipv4Addr>,

    /// Derive the fallback router from the masked client address with this
    /// final octet offset; 0 disables derivation
    #[arg(long, default_value_t = 0)]
    pub router_octet: u8,

    /// DNS server returned to clients; repeatable
    #[arg(long = "dns")]
    pub dns_servers: Vec<Ipv4Addr>,

    /// Interface MTU returned when the client asks for it
    #[arg(long, default_value_t = 1500)]
    pub mtu: u16,

    /// Domain search list entry; repeatable
    #[arg(long = "search")]
    pub domain_search: Vec<String>,

    /// URL scheme of the boot-file delivery endpoint
    #[arg(long, default_value = "http")]
    pub provision_scheme: String,

    /// Port of the boot-file delivery endpoint
    #[arg(long, default_value_t = 8080)]
    pub provision_port: u16,

    /// Token signing secret; falls back to ANVIL_SECRET, then to a random
    /// per-process secret
    #[arg(long)]
    pub secret: Option<String>,
}

impl Args {
    pub fn to_config(&self) -> ServerConfig {
        ServerConfig {
            server_ip: self.server_ip,
            bind_ip: self.bind,
            interface: self.interface.clone(),
            lease_time: Duration::from_secs(self.lease_time),
            subnets: self.subnets.iter().copied().collect(),
            netmask: self.netmask,
            router: self.router,
            router_octet: self.router_octet,
            dns_servers: self.dns_servers.clone(),
            mtu: self.mtu,
            domain_search: self.domain_search.clone(),
            provision_scheme: self.provision_scheme.clone(),
            provision_port: self.provision_port,
        }
    }
}

fn parse_subnet_route(s: &str) -> Result<SubnetRoute, String> {
    let (gateway, net) = s
        .split_once('=')
        .ok_or_else(|| format!("expected GATEWAY=CIDR, got '{s}'"))?;
    let gateway = gateway
        .trim()
        .parse()
        .map_err(|e| format!("bad gateway address '{gateway}': {e}"))?;
    let net = net
        .trim()
        .parse()
        .map_err(|e| format!("bad subnet '{net}': {e}"))?;
    Ok(SubnetRoute { gateway, net })
}

/// Immutable server-wide configuration, built once at startup and shared
/// by reference with every exchange.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address advertised as the server identifier and used in
    /// provisioning URLs.
    pub server_ip: Ipv4Addr,
    /// Address the DHCP socket binds to.
    pub bind_ip: Ipv4Addr,
    /// Interface the DHCP socket binds to, when restricted.
    pub interface: Option<String>,
    /// Lease time handed to every client.
    pub lease_time: Duration,
    /// Ordered subnet router table.
    pub subnets: SubnetTable,
    /// Fallback netmask when no subnet entry matches.
    pub netmask: Option<Ipv4Addr>,
    /// Fallback router handed out verbatim.
    pub router: Option<Ipv4Addr>,
    /// Final-octet offset for the derived fallback router; 0 disables it.
    pub router_octet: u8,
    /// DNS servers offered to clients.
    pub dns_servers: Vec<Ipv4Addr>,
    /// Interface MTU offered on request.
    pub mtu: u16,
    /// Domain search list.
    pub domain_search: Vec<String>,
    /// Scheme of the boot-file delivery endpoint.
    pub provision_scheme: String,
    /// Port of the boot-file delivery endpoint.
    pub provision_port: u16,
}

impl ServerConfig {
    pub fn new(server_ip: Ipv4Addr) -> Self {
        Self {
            server_ip,
            bind_ip: Ipv4Addr::UNSPECIFIED,
            interface: None,
            lease_time: Duration::from_secs(86400),
            subnets: SubnetTable::new(),
            netmask: None,
            router: None,
            router_octet: 0,
            dns_servers: Vec::new(),
            mtu: 1500,
            domain_search: Vec::new(),
            provision_scheme: "http".to_string(),
            provision_port: 8080,
        }
    }

    pub fn with_subnet(mut self, gateway: Ipv4Addr, net: ipnet::Ipv4Net) -> Self {
        self.subnets.push(gateway, net);
        self
    }

    pub fn with_netmask(mut self, netmask: Ipv4Addr) -> Self {
        self.netmask = Some(netmask);
        self
    }

    pub fn with_router(mut self, router: Ipv4Addr) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_router_octet(mut self, octet: u8) -> Self {
        self.router_octet = octet;
        self
    }

    pub fn with_dns_server(mut self, dns: Ipv4Addr) -> Self {
        self.dns_servers.push(dns);
        self
    }

    pub fn with_lease_time(mut self, lease_time: Duration) -> Self {
        self.lease_time = lease_time;
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_domain_search(mut self, domain: impl Into<String>) -> Self {
        self.domain_search.push(domain.into());
        self
    }

    pub fn with_provision_endpoint(mut self, scheme: impl Into<String>, port: u16) -> Self {
        self.provision_scheme = scheme.into();
        self.provision_port = port;
        self
    }
}
