//! discovery of nameservers and the hosts table from system configuration

use std::fs;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::slice::Iter;

use derive_more::Display;
use tracing::{debug, info, warn};

use crate::dns::hosts::HostsTable;

/// Public resolvers used when the system doesn't name any.
pub const FALLBACK_SERVERS: [IpAddr; 4] = [
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
    IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8888)),
    IpAddr::V6(Ipv6Addr::new(0x2001, 0x4860, 0x4860, 0, 0, 0, 0, 0x8844)),
];

pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";
pub const HOSTS_PATH: &str = "/etc/hosts";

/// A problem with a single configuration entry. These are logged and
/// skipped, never fatal.
#[derive(Debug, Display)]
pub enum ConfigError {
    #[display(fmt = "line {}: invalid address `{}`: {}", line, value, source)]
    InvalidAddress {
        line: usize,
        value: String,
        source: AddrParseError,
    },
    #[display(fmt = "line {}: nameserver directive without an address", line)]
    MissingAddress { line: usize },
    #[display(fmt = "failed to read {}: {}", path, source)]
    Unreadable {
        path: String,
        source: std::io::Error,
    },
    #[display(fmt = "registry: {}", _0)]
    Registry(String),
}

impl std::error::Error for ConfigError {}

/// Where the system keeps its resolver configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigSource {
    PosixFiles { resolv_conf: PathBuf, hosts: PathBuf },
    WindowsRegistry,
    Unavailable,
}

impl ConfigSource {
    /// Picks the source for the platform we're running on.
    pub fn detect() -> ConfigSource {
        #[cfg(unix)]
        {
            ConfigSource::PosixFiles {
                resolv_conf: PathBuf::from(RESOLV_CONF_PATH),
                hosts: PathBuf::from(HOSTS_PATH),
            }
        }
        #[cfg(windows)]
        {
            ConfigSource::WindowsRegistry
        }
        #[cfg(not(any(unix, windows)))]
        {
            ConfigSource::Unavailable
        }
    }

    /// Reads the server list and hosts table. Never fails: bad entries are
    /// skipped with a warning, and missing sources fall back to defaults.
    pub fn load(&self) -> SystemConfig {
        let (servers, hosts) = match *self {
            ConfigSource::PosixFiles {
                ref resolv_conf,
                ref hosts,
            } => (
                read_config_file(resolv_conf).map(|x| parse_resolv_conf(&x)),
                read_config_file(hosts).map(|x| HostsTable::parse(&x)),
            ),
            ConfigSource::WindowsRegistry => load_registry(),
            ConfigSource::Unavailable => (None, None),
        };

        let servers = match servers {
            Some((servers, errors)) => {
                report(&errors);
                servers
            }
            None => Vec::new(),
        };

        let hosts = match hosts {
            Some((hosts, errors)) => {
                report(&errors);
                hosts
            }
            None => HostsTable::localhost(),
        };

        let servers = ServerList::new(servers);
        info!(servers = servers.len(), hosts = hosts.len(), source = ?self, "loaded resolver configuration");

        SystemConfig { servers, hosts }
    }
}

#[cfg(windows)]
fn load_registry() -> (
    Option<(Vec<IpAddr>, Vec<ConfigError>)>,
    Option<(HostsTable, Vec<ConfigError>)>,
) {
    use crate::dns::registry;

    let servers = match registry::nameservers() {
        Ok(x) => Some(x),
        Err(err) => {
            warn!(%err, "unable to read nameservers");
            None
        }
    };

    let hosts = match registry::hosts_path() {
        Ok(path) => read_config_file(&path).map(|x| HostsTable::parse(&x)),
        Err(err) => {
            warn!(%err, "unable to locate hosts file");
            None
        }
    };

    (servers, hosts)
}

#[cfg(not(windows))]
fn load_registry() -> (
    Option<(Vec<IpAddr>, Vec<ConfigError>)>,
    Option<(HostsTable, Vec<ConfigError>)>,
) {
    warn!("registry configuration is only available on windows");
    (None, None)
}

fn read_config_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(x) => Some(x),
        Err(source) => {
            let err = ConfigError::Unreadable {
                path: path.display().to_string(),
                source,
            };
            debug!(%err, "configuration file unavailable");
            None
        }
    }
}

fn report(errors: &[ConfigError]) {
    for err in errors {
        warn!(%err, "skipping configuration entry");
    }
}

/// Extracts the addresses of `nameserver` directives, in file order.
pub fn parse_resolv_conf(content: &str) -> (Vec<IpAddr>, Vec<ConfigError>) {
    let mut servers = Vec::new();
    let mut errors = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let mut parts = line.split_whitespace();
        if parts.next() != Some("nameserver") {
            continue;
        }

        let value = match parts.next() {
            Some(x) => x,
            None => {
                errors.push(ConfigError::MissingAddress { line: idx + 1 });
                continue;
            }
        };

        match value.parse::<IpAddr>() {
            Ok(addr) => servers.push(addr),
            Err(source) => errors.push(ConfigError::InvalidAddress {
                line: idx + 1,
                value: value.to_string(),
                source,
            }),
        }
    }

    (servers, errors)
}

/// Nameservers in priority order.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerList {
    servers: Vec<IpAddr>,
}

impl ServerList {
    /// Uses the public fallback resolvers when `servers` is empty.
    pub fn new(servers: Vec<IpAddr>) -> ServerList {
        if servers.is_empty() {
            return ServerList::fallback();
        }

        ServerList { servers }
    }

    pub fn fallback() -> ServerList {
        ServerList {
            servers: FALLBACK_SERVERS.to_vec(),
        }
    }

    pub fn iter(&self) -> Iter<'_, IpAddr> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn socket_addrs(&self, port: u16) -> Vec<SocketAddr> {
        self.servers
            .iter()
            .map(|ip| SocketAddr::new(*ip, port))
            .collect()
    }
}

/// Everything the resolver reads from the system at construction.
#[derive(Clone, Debug)]
pub struct SystemConfig {
    pub servers: ServerList,
    pub hosts: HostsTable,
}
