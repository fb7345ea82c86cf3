use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Tag enabling the bare-metal-provisioning flow: boot image plus
/// configuration file options on every offer and acknowledge.
pub const TAG_VENDOR_BMP: &str = "vendor-bmp";

/// Tag enabling the zero-touch-deployment flow: a single provisioning URL
/// carried in a dedicated vendor option.
pub const TAG_VENDOR_ZTD: &str = "vendor-ztd";

fn new_host_id() -> String {
    Uuid::now_v7().to_string()
}

/// One network interface of a registered host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetInterface {
    /// Hardware address, lowercase colon-separated.
    pub mac: String,
    /// Statically assigned IPv4 address.
    pub addr: Ipv4Addr,
    /// Fully-qualified name, empty when the host has none.
    #[serde(default)]
    pub fqdn: String,
}

/// A registered host. The id is assigned at creation and never changes;
/// everything else is administrative configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default = "new_host_id")]
    pub id: String,
    pub name: String,
    pub interfaces: Vec<NetInterface>,
    /// Whether provisioning options may be handed to this host at all.
    #[serde(default)]
    pub provision: bool,
    /// Free-form capability tags driving vendor option dispatch.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Reference to the boot specification served for this host.
    #[serde(default)]
    pub boot_spec: String,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_host_id(),
            name: name.into(),
            interfaces: Vec::new(),
            provision: false,
            tags: Vec::new(),
            boot_spec: String::new(),
        }
    }

    pub fn with_interface(mut self, mac: &str, addr: Ipv4Addr, fqdn: &str) -> Self {
        self.interfaces.push(NetInterface {
            mac: normalize_mac(mac),
            addr,
            fqdn: fqdn.to_string(),
        });
        self
    }

    pub fn with_provision(mut self, provision: bool) -> Self {
        self.provision = provision;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with_boot_spec(mut self, boot_spec: &str) -> Self {
        self.boot_spec = boot_spec.to_string();
        self
    }

    /// The interface carrying the given hardware address, if any.
    pub fn interface(&self, mac: &str) -> Option<&NetInterface> {
        let mac = normalize_mac(mac);
        self.interfaces
            .iter()
            .find(|nic| normalize_mac(&nic.mac) == mac)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Normalize a hardware address to lowercase with colons.
pub fn normalize_mac(mac: &str) -> String {
    mac.to_lowercase().replace('-', ":")
}

/// Hardware address string from the leading six bytes of a chaddr field.
/// Returns `None` for truncated fields.
pub fn mac_from_chaddr(chaddr: &[u8]) -> Option<String> {
    if chaddr.len() < 6 {
        return None;
    }
    Some(format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        chaddr[0], chaddr[1], chaddr[2], chaddr[3], chaddr[4], chaddr[5]
    ))
}
