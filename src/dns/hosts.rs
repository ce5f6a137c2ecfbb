//! static hostname table loaded from a hosts file

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use crate::dns::config::ConfigError;

/// Hostname to address mapping consulted before any network activity.
/// Keys are stored lowercase without a trailing dot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostsTable {
    entries: HashMap<String, IpAddr>,
}

impl HostsTable {
    pub fn new() -> HostsTable {
        HostsTable::default()
    }

    /// The table used when no hosts file can be located.
    pub fn localhost() -> HostsTable {
        let mut table = HostsTable::new();
        table.insert("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST));
        table
    }

    /// Parses the `<ip> <hostname> [<hostname> ...]` format. Lines that don't
    /// start with a valid address are reported and skipped; later entries
    /// overwrite earlier ones.
    pub fn parse(content: &str) -> (HostsTable, Vec<ConfigError>) {
        let mut table = HostsTable::new();
        let mut errors = Vec::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = match raw_line.find('#') {
                Some(comment) => &raw_line[..comment],
                None => raw_line,
            };

            let mut parts = line.split_whitespace();
            let addr = match parts.next() {
                Some(x) => x,
                None => continue,
            };

            let hostnames = parts.collect::<Vec<&str>>();
            if hostnames.is_empty() {
                continue;
            }

            let addr = match addr.parse::<IpAddr>() {
                Ok(x) => x,
                Err(source) => {
                    errors.push(ConfigError::InvalidAddress {
                        line: idx + 1,
                        value: addr.to_string(),
                        source,
                    });
                    continue;
                }
            };

            for hostname in hostnames {
                table.insert(hostname, addr);
            }
        }

        (table, errors)
    }

    pub fn insert(&mut self, hostname: &str, addr: IpAddr) {
        self.entries.insert(normalize(hostname), addr);
    }

    pub fn lookup(&self, hostname: &str) -> Option<IpAddr> {
        self.entries.get(&normalize(hostname)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical form of a hostname used for table and cache keys.
pub fn normalize(hostname: &str) -> String {
    hostname.trim_end_matches('.').to_ascii_lowercase()
}
