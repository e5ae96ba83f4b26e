//! Registry of admitted slaves.
//!
//! Registration is two-phase: a fresh connection is not in the registry; it
//! enters only once its `SystemInfo` handshake arrives and the advertised
//! OS and architecture match the master's. The registry also maintains the
//! aggregate remote capacity, the cap on in-flight remote work.

use std::collections::BTreeMap;
use std::net::IpAddr;

use bx_proto::message::{SlaveStatus, SlaveSystemInfo};

/// Everything the master tracks about one admitted slave.
#[derive(Debug, Clone)]
pub struct SlaveInfo {
    /// Opaque id of the underlying connection.
    pub connection_id: u64,
    /// Address the slave connected from; artifacts are fetched from it.
    pub ip: IpAddr,
    /// Port of the slave's artifact file server.
    pub artifact_port: u16,
    pub os_name: String,
    pub os_arch: String,
    pub num_processors: u32,
    pub parallelism: u32,
    /// Live state from the most recent `StatusUpdate`.
    pub load_average: f64,
    pub running_commands: u32,
    pub available_physical_memory: u64,
}

impl SlaveInfo {
    /// Builds the registry record from an accepted handshake.
    pub fn from_handshake(connection_id: u64, ip: IpAddr, info: &SlaveSystemInfo) -> Self {
        Self {
            connection_id,
            ip,
            artifact_port: info.artifact_port,
            os_name: info.os_name.clone(),
            os_arch: info.os_arch.clone(),
            num_processors: info.num_processors,
            parallelism: info.parallelism,
            load_average: 0.0,
            running_commands: 0,
            available_physical_memory: 0,
        }
    }

    /// This slave's contribution to the aggregate remote capacity.
    pub fn capacity(&self) -> usize {
        (self.num_processors as f64 * 1.5) as usize
    }

    /// `host:port` of the slave's artifact file server.
    pub fn artifact_host(&self) -> String {
        format!("{}:{}", self.ip, self.artifact_port)
    }

    fn available_processors(&self) -> i64 {
        self.num_processors as i64 - self.running_commands as i64
    }
}

/// The set of admitted slaves, keyed by connection id.
///
/// A `BTreeMap` keeps iteration deterministic, which makes the
/// most-available tie-break the lowest connection id.
#[derive(Debug, Default)]
pub struct SlaveRegistry {
    slaves: BTreeMap<u64, SlaveInfo>,
    total_capacity: usize,
}

impl SlaveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    pub fn contains(&self, connection_id: u64) -> bool {
        self.slaves.contains_key(&connection_id)
    }

    pub fn get(&self, connection_id: u64) -> Option<&SlaveInfo> {
        self.slaves.get(&connection_id)
    }

    /// Admits a slave. Σ ⌊1.5 × cores⌋ over admitted slaves is kept current.
    pub fn insert(&mut self, slave: SlaveInfo) {
        self.total_capacity += slave.capacity();
        self.slaves.insert(slave.connection_id, slave);
    }

    pub fn remove(&mut self, connection_id: u64) -> Option<SlaveInfo> {
        let removed = self.slaves.remove(&connection_id);
        if let Some(slave) = &removed {
            self.total_capacity = self.total_capacity.saturating_sub(slave.capacity());
        }
        removed
    }

    /// Applies a status update. Returns false when the connection has not
    /// been admitted; such updates are ignored.
    pub fn update_status(&mut self, connection_id: u64, status: &SlaveStatus) -> bool {
        match self.slaves.get_mut(&connection_id) {
            Some(slave) => {
                slave.load_average = status.load_average;
                slave.running_commands = status.running_commands;
                slave.available_physical_memory = status.available_physical_memory;
                true
            }
            None => false,
        }
    }

    /// Aggregate remote capacity of all admitted slaves.
    pub fn total_capacity(&self) -> usize {
        self.total_capacity
    }

    /// The slave with the most idle processors, ties broken by the lowest
    /// connection id. `None` when the registry is empty.
    pub fn most_available(&self) -> Option<u64> {
        let mut best: Option<(u64, i64)> = None;
        for (&connection_id, slave) in &self.slaves {
            let available = slave.available_processors();
            match best {
                Some((_, most)) if available <= most => {}
                _ => best = Some((connection_id, available)),
            }
        }
        best.map(|(connection_id, _)| connection_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn slave(connection_id: u64, num_processors: u32, running_commands: u32) -> SlaveInfo {
        SlaveInfo {
            connection_id,
            ip: "127.0.0.1".parse().unwrap(),
            artifact_port: 8080,
            os_name: "linux".into(),
            os_arch: "x86_64".into(),
            num_processors,
            parallelism: num_processors,
            load_average: 0.0,
            running_commands,
            available_physical_memory: 0,
        }
    }

    #[test]
    fn capacity_is_one_and_a_half_cores_floored() {
        assert_eq!(slave(1, 4, 0).capacity(), 6);
        assert_eq!(slave(1, 1, 0).capacity(), 1);
        assert_eq!(slave(1, 3, 0).capacity(), 4);
    }

    #[test]
    fn aggregate_capacity_follows_membership() {
        let mut registry = SlaveRegistry::new();
        registry.insert(slave(1, 4, 0));
        registry.insert(slave(2, 2, 0));
        assert_eq!(registry.total_capacity(), 9);

        registry.remove(1);
        assert_eq!(registry.total_capacity(), 3);
        registry.remove(2);
        assert_eq!(registry.total_capacity(), 0);
    }

    #[test]
    fn most_available_picks_the_idlest_slave() {
        let mut registry = SlaveRegistry::new();
        registry.insert(slave(1, 4, 3));
        registry.insert(slave(2, 8, 2));
        registry.insert(slave(3, 2, 0));
        assert_eq!(registry.most_available(), Some(2));
    }

    #[test]
    fn most_available_ties_go_to_the_lowest_connection_id() {
        let mut registry = SlaveRegistry::new();
        registry.insert(slave(5, 4, 0));
        registry.insert(slave(2, 4, 0));
        assert_eq!(registry.most_available(), Some(2));
    }

    #[test]
    fn most_available_is_none_when_empty() {
        assert_eq!(SlaveRegistry::new().most_available(), None);
    }

    #[test]
    fn status_updates_require_admission() {
        let mut registry = SlaveRegistry::new();
        let status = SlaveStatus {
            load_average: 1.5,
            running_commands: 2,
            available_physical_memory: 1024,
        };
        assert!(!registry.update_status(1, &status));

        registry.insert(slave(1, 4, 0));
        assert!(registry.update_status(1, &status));
        assert_eq!(registry.get(1).unwrap().running_commands, 2);
    }
}
