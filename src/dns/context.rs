//! the resolver and the configuration it is built from

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dns::cache::{CacheStats, SynchronizedCache};
use crate::dns::client::{DnsClient, UdpClient};
use crate::dns::config::{ConfigSource, ServerList};
use crate::dns::hosts::{normalize, HostsTable};
use crate::dns::protocol::QueryType;
use crate::dns::resolve::{QueryEngine, ResolveError};

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    pub qtype: QueryType,
    pub port: u16,
    /// Deadline for each server attempt.
    pub timeout: Duration,
    pub refresh_interval: Duration,
    /// Mismatched datagrams tolerated per attempt before resolution is
    /// aborted.
    pub max_stray_datagrams: usize,
    pub source: ConfigSource,
    /// Used instead of the servers named by `source`.
    pub servers: Option<Vec<IpAddr>>,
    /// Used instead of the hosts table named by `source`.
    pub hosts: Option<HostsTable>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            qtype: QueryType::A,
            port: 53,
            timeout: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(300),
            max_stray_datagrams: 2,
            source: ConfigSource::detect(),
            servers: None,
            hosts: None,
        }
    }
}

pub struct Resolver {
    hosts: HostsTable,
    cache: SynchronizedCache,
    engine: QueryEngine,
    qtype: QueryType,
    shutdown: CancellationToken,
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Resolver {
        Resolver::with_client(config, Arc::new(UdpClient::new()))
    }

    /// Builds a resolver that sends its queries through `client`. The server
    /// list and hosts table are read here, once.
    pub fn with_client(config: ResolverConfig, client: Arc<dyn DnsClient>) -> Resolver {
        let ResolverConfig {
            qtype,
            port,
            timeout,
            refresh_interval,
            max_stray_datagrams,
            source,
            servers,
            hosts,
        } = config;

        let (servers, hosts) = match (servers, hosts) {
            (Some(servers), Some(hosts)) => (ServerList::new(servers), hosts),
            (servers, hosts) => {
                let system = source.load();
                (
                    servers.map(ServerList::new).unwrap_or(system.servers),
                    hosts.unwrap_or(system.hosts),
                )
            }
        };

        let refresh = chrono::Duration::from_std(refresh_interval).unwrap_or_else(|_| {
            warn!(?refresh_interval, "refresh interval out of range, caching for a century");
            chrono::Duration::days(36500)
        });

        let shutdown = CancellationToken::new();
        let engine = QueryEngine::new(
            client,
            servers.socket_addrs(port),
            timeout,
            max_stray_datagrams,
            shutdown.clone(),
        );

        info!(
            servers = ?engine.servers(),
            hosts = hosts.len(),
            %qtype,
            "resolver ready"
        );

        Resolver {
            hosts,
            cache: SynchronizedCache::new(refresh),
            engine,
            qtype,
            shutdown,
        }
    }

    /// Resolves `hostname` from the cache, then the hosts table, then the
    /// network. `Ok(None)` means no server produced an answer.
    pub async fn resolve(&self, hostname: &str) -> Result<Option<IpAddr>, ResolveError> {
        let hostname = normalize(hostname);

        if let Some(addr) = self.cache.lookup(&hostname) {
            debug!(hostname = %hostname, %addr, "cache hit");
            return Ok(Some(addr));
        }

        if let Some(addr) = self.hosts.lookup(&hostname) {
            debug!(hostname = %hostname, %addr, "hosts table hit");
            self.cache.store(&hostname, addr);
            return Ok(Some(addr));
        }

        let answer = self
            .engine
            .resolve_via_network(&hostname, self.qtype)
            .await?;

        match answer {
            Some(addr) => {
                info!(hostname = %hostname, %addr, "resolved");
                self.cache.store(&hostname, addr);
            }
            None => info!(hostname = %hostname, "no address found"),
        }

        Ok(answer)
    }

    /// Cancels every in-flight and future network query of this resolver.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn servers(&self) -> &[SocketAddr] {
        self.engine.servers()
    }

    pub fn hosts(&self) -> &HostsTable {
        &self.hosts
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use tokio::net::UdpSocket;

    use crate::dns::client::testing::{answer, MockClient};
    use crate::dns::client::MAX_DATAGRAM_SIZE;

    fn config(servers: &[&str], hosts: HostsTable) -> ResolverConfig {
        ResolverConfig {
            source: ConfigSource::Unavailable,
            servers: Some(servers.iter().map(|x| x.parse().unwrap()).collect()),
            hosts: Some(hosts),
            ..ResolverConfig::default()
        }
    }

    #[tokio::test]
    async fn test_hosts_table_precedence() {
        let client = MockClient::new();
        let resolver = Resolver::with_client(
            config(&["8.8.8.8"], HostsTable::localhost()),
            Arc::new(client.clone()),
        );

        let res = resolver.resolve("localhost").await.unwrap();
        assert_eq!(Some("127.0.0.1".parse().unwrap()), res);

        let res = resolver.resolve("LocalHost.").await.unwrap();
        assert_eq!(Some("127.0.0.1".parse().unwrap()), res);

        assert!(client.opened().is_empty());
        assert_eq!(0, client.sent());
    }

    #[tokio::test]
    async fn test_resolve_and_cache() {
        let client = MockClient::new();
        let server: SocketAddr = "8.8.8.8:53".parse().unwrap();
        client.respond_with(server, move |req| vec![(answer(req, &["93.184.216.34"]), server)]);

        let resolver = Resolver::with_client(
            config(&["8.8.8.8"], HostsTable::new()),
            Arc::new(client.clone()),
        );

        let expected = Some("93.184.216.34".parse().unwrap());
        assert_eq!(expected, resolver.resolve("example.com").await.unwrap());
        assert_eq!(1, resolver.cache_stats().entries);

        // Second call within the window is served from the cache
        assert_eq!(expected, resolver.resolve("example.com").await.unwrap());
        assert_eq!(vec![server], client.opened());
        assert_eq!(1, resolver.cache_stats().hits);
    }

    #[tokio::test]
    async fn test_elapsed_window_queries_again() {
        let client = MockClient::new();
        let server: SocketAddr = "8.8.8.8:53".parse().unwrap();
        client.respond_with(server, move |req| vec![(answer(req, &["93.184.216.34"]), server)]);

        let mut config = config(&["8.8.8.8"], HostsTable::new());
        config.refresh_interval = Duration::from_secs(0);
        let resolver = Resolver::with_client(config, Arc::new(client.clone()));

        resolver.resolve("example.com").await.unwrap();
        resolver.resolve("example.com").await.unwrap();

        assert_eq!(2, client.opened().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_result_not_cached() {
        let client = MockClient::new();
        let resolver = Resolver::with_client(
            config(&["10.0.0.1", "10.0.0.2"], HostsTable::new()),
            Arc::new(client.clone()),
        );

        assert_eq!(None, resolver.resolve("nowhere.example").await.unwrap());
        assert_eq!(None, resolver.resolve("nowhere.example").await.unwrap());

        assert_eq!(4, client.opened().len());
        assert_eq!(0, resolver.cache_stats().entries);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queries() {
        let client = MockClient::new();
        let resolver = Resolver::with_client(
            config(&["10.0.0.1"], HostsTable::localhost()),
            Arc::new(client.clone()),
        );

        resolver.shutdown();
        assert!(resolver.is_shut_down());

        match resolver.resolve("example.com").await {
            Err(ResolveError::Cancelled) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(client.opened().is_empty());
        assert_eq!(0, client.sent());

        // Local answers don't need the network
        assert_eq!(
            Some("127.0.0.1".parse().unwrap()),
            resolver.resolve("localhost").await.unwrap()
        );
    }

    #[test]
    fn test_partial_override_loads_remaining_config() {
        let resolver = Resolver::with_client(
            ResolverConfig {
                source: ConfigSource::Unavailable,
                servers: Some(vec!["192.0.2.53".parse().unwrap()]),
                port: 5353,
                ..ResolverConfig::default()
            },
            Arc::new(MockClient::new()),
        );

        assert_eq!(
            &["192.0.2.53:5353".parse::<SocketAddr>().unwrap()],
            resolver.servers()
        );
        assert_eq!(&HostsTable::localhost(), resolver.hosts());
    }

    #[tokio::test]
    async fn test_resolve_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let reply = answer(&buf[..len], &["192.0.2.80"]);
            server.send_to(&reply, from).await.unwrap();
        });

        let mut config = config(&["127.0.0.1"], HostsTable::new());
        config.port = server_addr.port();
        let resolver = Resolver::new(config);

        assert_eq!(
            Some("192.0.2.80".parse().unwrap()),
            resolver.resolve("www.example.net").await.unwrap()
        );
    }
}
