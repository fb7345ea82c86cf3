//! Durable host registry
//!
//! Embedded transactional store mapping hardware addresses to host records.
//! Writes are administrative and infrequent; the protocol path only reads.
//! Every write commits the record and its index entries in one transaction,
//! so a concurrent reader sees either the old record or the new one, never
//! a partial state.

use super::host::{normalize_mac, Host};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;

const HOSTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");
const MAC_INDEX_TABLE: TableDefinition<&str, &str> = TableDefinition::new("mac_index");
const IP_INDEX_TABLE: TableDefinition<u32, &str> = TableDefinition::new("ip_index");

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry database error: {0}")]
    Database(String),

    #[error("host record serialization error: {0}")]
    Serialization(String),

    #[error("hardware address {mac} already registered to host {existing}")]
    MacConflict { mac: String, existing: String },

    #[error("duplicate hardware address {mac} on host '{host}'")]
    DuplicateInterface { mac: String, host: String },
}

fn db_err(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Database(e.to_string())
}

fn ser_err(e: serde_json::Error) -> RegistryError {
    RegistryError::Serialization(e.to_string())
}

/// Registry of known hosts, keyed by id with hardware-address and
/// assigned-address indexes.
pub struct HostRegistry {
    db: Database,
}

impl HostRegistry {
    /// Open or create the registry database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let db = Database::create(path).map_err(db_err)?;

        let txn = db.begin_write().map_err(db_err)?;
        txn.open_table(HOSTS_TABLE).map_err(db_err)?;
        txn.open_table(MAC_INDEX_TABLE).map_err(db_err)?;
        txn.open_table(IP_INDEX_TABLE).map_err(db_err)?;
        txn.commit().map_err(db_err)?;

        Ok(Self { db })
    }

    /// Create or replace a host record as one atomic unit.
    ///
    /// Fails when the record carries the same hardware address twice, or
    /// when an address is already registered to a different host.
    pub fn put_host(&self, host: &Host) -> Result<(), RegistryError> {
        // Normalize once so index keys and the stored record agree.
        let mut host = host.clone();
        for nic in &mut host.interfaces {
            nic.mac = normalize_mac(&nic.mac);
        }

        let mut seen = HashSet::new();
        for nic in &host.interfaces {
            if !seen.insert(nic.mac.as_str()) {
                return Err(RegistryError::DuplicateInterface {
                    mac: nic.mac.clone(),
                    host: host.name.clone(),
                });
            }
        }

        let bytes = serde_json::to_vec(&host).map_err(ser_err)?;

        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut hosts = txn.open_table(HOSTS_TABLE).map_err(db_err)?;
            let mut macs = txn.open_table(MAC_INDEX_TABLE).map_err(db_err)?;
            let mut ips = txn.open_table(IP_INDEX_TABLE).map_err(db_err)?;

            for nic in &host.interfaces {
                if let Some(owner) = macs.get(nic.mac.as_str()).map_err(db_err)? {
                    if owner.value() != host.id.as_str() {
                        return Err(RegistryError::MacConflict {
                            mac: nic.mac.clone(),
                            existing: owner.value().to_string(),
                        });
                    }
                }
            }

            let prev: Option<Host> = match hosts.get(host.id.as_str()).map_err(db_err)? {
                Some(raw) => Some(serde_json::from_slice(raw.value()).map_err(ser_err)?),
                None => None,
            };

            hosts
                .insert(host.id.as_str(), bytes.as_slice())
                .map_err(db_err)?;

            // Drop index entries for interfaces removed by this update.
            if let Some(prev) = prev {
                for nic in &prev.interfaces {
                    if host.interface(&nic.mac).is_none() {
                        macs.remove(nic.mac.as_str()).map_err(db_err)?;
                    }
                    if !host.interfaces.iter().any(|n| n.addr == nic.addr) {
                        ips.remove(u32::from(nic.addr)).map_err(db_err)?;
                    }
                }
            }

            for nic in &host.interfaces {
                macs.insert(nic.mac.as_str(), host.id.as_str())
                    .map_err(db_err)?;
                ips.insert(u32::from(nic.addr), host.id.as_str())
                    .map_err(db_err)?;
            }
        }
        txn.commit().map_err(db_err)?;

        Ok(())
    }

    /// Point lookup by hardware address.
    pub fn find_by_mac(&self, mac: &str) -> Result<Option<Host>, RegistryError> {
        let mac = normalize_mac(mac);
        let txn = self.db.begin_read().map_err(db_err)?;
        let macs = txn.open_table(MAC_INDEX_TABLE).map_err(db_err)?;

        let id = match macs.get(mac.as_str()).map_err(db_err)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };

        let hosts = txn.open_table(HOSTS_TABLE).map_err(db_err)?;
        match hosts.get(id.as_str()).map_err(db_err)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value()).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Point lookup by assigned address.
    pub fn find_by_ip(&self, addr: Ipv4Addr) -> Result<Option<Host>, RegistryError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let ips = txn.open_table(IP_INDEX_TABLE).map_err(db_err)?;

        let id = match ips.get(u32::from(addr)).map_err(db_err)? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };

        let hosts = txn.open_table(HOSTS_TABLE).map_err(db_err)?;
        match hosts.get(id.as_str()).map_err(db_err)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value()).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Hosts whose assigned address falls within the inclusive range,
    /// ordered by address.
    pub fn hosts_in_range(
        &self,
        start: Ipv4Addr,
        end: Ipv4Addr,
    ) -> Result<Vec<Host>, RegistryError> {
        let txn = self.db.begin_read().map_err(db_err)?;
        let ips = txn.open_table(IP_INDEX_TABLE).map_err(db_err)?;
        let hosts = txn.open_table(HOSTS_TABLE).map_err(db_err)?;

        let mut out = Vec::new();
        for entry in ips
            .range(u32::from(start)..=u32::from(end))
            .map_err(db_err)?
        {
            let (_, id) = entry.map_err(db_err)?;
            if let Some(raw) = hosts.get(id.value()).map_err(db_err)? {
                out.push(serde_json::from_slice(raw.value()).map_err(ser_err)?);
            }
        }
        Ok(out)
    }

    /// Remove a host record and its index entries.
    pub fn delete_host(&self, id: &str) -> Result<(), RegistryError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut hosts = txn.open_table(HOSTS_TABLE).map_err(db_err)?;
            let prev: Option<Host> = match hosts.get(id).map_err(db_err)? {
                Some(raw) => Some(serde_json::from_slice(raw.value()).map_err(ser_err)?),
                None => None,
            };
            hosts.remove(id).map_err(db_err)?;

            if let Some(prev) = prev {
                let mut macs = txn.open_table(MAC_INDEX_TABLE).map_err(db_err)?;
                let mut ips = txn.open_table(IP_INDEX_TABLE).map_err(db_err)?;
                for nic in &prev.interfaces {
                    macs.remove(nic.mac.as_str()).map_err(db_err)?;
                    ips.remove(u32::from(nic.addr)).map_err(db_err)?;
                }
            }
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_host(name: &str, mac: &str, addr: [u8; 4]) -> Host {
        Host::new(name).with_interface(mac, Ipv4Addr::from(addr), &format!("{name}.cluster"))
    }

    #[test]
    fn test_put_and_find_by_mac() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        let host = test_host("node1", "AA:BB:CC:DD:EE:FF", [10, 0, 0, 5]);
        registry.put_host(&host).unwrap();

        let found = registry.find_by_mac("aa:bb:cc:dd:ee:ff").unwrap().unwrap();
        assert_eq!(found.name, "node1");
        assert_eq!(found.interfaces[0].addr, Ipv4Addr::new(10, 0, 0, 5));

        assert!(registry.find_by_mac("00:00:00:00:00:01").unwrap().is_none());
    }

    #[test]
    fn test_find_by_ip() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        registry
            .put_host(&test_host("node1", "aa:bb:cc:dd:ee:01", [10, 0, 0, 5]))
            .unwrap();

        let found = registry
            .find_by_ip(Ipv4Addr::new(10, 0, 0, 5))
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "node1");

        assert!(registry
            .find_by_ip(Ipv4Addr::new(10, 0, 0, 99))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_range_scan_ordered() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        registry
            .put_host(&test_host("node9", "aa:bb:cc:dd:ee:09", [10, 0, 0, 9]))
            .unwrap();
        registry
            .put_host(&test_host("node3", "aa:bb:cc:dd:ee:03", [10, 0, 0, 3]))
            .unwrap();
        registry
            .put_host(&test_host("node200", "aa:bb:cc:dd:ee:c8", [10, 0, 1, 200]))
            .unwrap();

        let hosts = registry
            .hosts_in_range(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 254))
            .unwrap();
        let names: Vec<_> = hosts.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["node3", "node9"]);
    }

    #[test]
    fn test_mac_conflict_rejected() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        registry
            .put_host(&test_host("node1", "aa:bb:cc:dd:ee:01", [10, 0, 0, 5]))
            .unwrap();

        let intruder = test_host("node2", "aa:bb:cc:dd:ee:01", [10, 0, 0, 6]);
        let err = registry.put_host(&intruder).unwrap_err();
        assert!(matches!(err, RegistryError::MacConflict { .. }));

        // The registry is unchanged.
        let found = registry.find_by_mac("aa:bb:cc:dd:ee:01").unwrap().unwrap();
        assert_eq!(found.name, "node1");
    }

    #[test]
    fn test_duplicate_interface_rejected() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        let host = Host::new("node1")
            .with_interface("aa:bb:cc:dd:ee:01", Ipv4Addr::new(10, 0, 0, 5), "")
            .with_interface("AA:BB:CC:DD:EE:01", Ipv4Addr::new(10, 0, 1, 5), "");
        let err = registry.put_host(&host).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateInterface { .. }));
    }

    #[test]
    fn test_update_cleans_stale_indexes() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        let mut host = test_host("node1", "aa:bb:cc:dd:ee:01", [10, 0, 0, 5]);
        registry.put_host(&host).unwrap();

        host.interfaces[0].mac = "aa:bb:cc:dd:ee:02".to_string();
        host.interfaces[0].addr = Ipv4Addr::new(10, 0, 0, 6);
        registry.put_host(&host).unwrap();

        assert!(registry.find_by_mac("aa:bb:cc:dd:ee:01").unwrap().is_none());
        assert!(registry
            .find_by_ip(Ipv4Addr::new(10, 0, 0, 5))
            .unwrap()
            .is_none());
        assert!(registry.find_by_mac("aa:bb:cc:dd:ee:02").unwrap().is_some());
    }

    #[test]
    fn test_delete_host() {
        let tmp = tempdir().unwrap();
        let registry = HostRegistry::open(tmp.path().join("test.redb")).unwrap();

        let host = test_host("node1", "aa:bb:cc:dd:ee:01", [10, 0, 0, 5]);
        registry.put_host(&host).unwrap();
        registry.delete_host(&host.id).unwrap();

        assert!(registry.find_by_mac("aa:bb:cc:dd:ee:01").unwrap().is_none());
        assert!(registry
            .find_by_ip(Ipv4Addr::new(10, 0, 0, 5))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_persistence() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("test.redb");

        {
            let registry = HostRegistry::open(&path).unwrap();
            registry
                .put_host(&test_host("persistent", "aa:bb:cc:dd:ee:ff", [10, 0, 0, 7]))
                .unwrap();
        }

        {
            let registry = HostRegistry::open(&path).unwrap();
            let found = registry.find_by_mac("aa:bb:cc:dd:ee:ff").unwrap();
            assert!(found.is_some());
            assert_eq!(found.unwrap().name, "persistent");
        }
    }
}
