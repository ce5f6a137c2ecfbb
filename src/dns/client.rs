//! client for exchanging DNS datagrams with nameservers

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use derive_more::{Display, From};
use tokio::net::UdpSocket;
use tracing::debug;

/// Plain DNS over UDP is limited to 512 bytes.
pub const MAX_DATAGRAM_SIZE: usize = 512;

#[derive(Debug, Display, From)]
pub enum ClientError {
    Io(std::io::Error),
}

impl std::error::Error for ClientError {}

type Result<T> = std::result::Result<T, ClientError>;

/// Opens datagram associations towards nameservers.
#[async_trait]
pub trait DnsClient: Send + Sync {
    async fn open(&self, server: SocketAddr) -> Result<Box<dyn Association>>;
}

/// A transient datagram association with one nameserver. Dropping it
/// releases the underlying socket.
#[async_trait]
pub trait Association: Send {
    async fn send(&mut self, packet: &[u8]) -> Result<()>;

    /// Waits for the next datagram, returning its payload and source.
    async fn recv(&mut self) -> Result<(Vec<u8>, SocketAddr)>;
}

/// The UDP client. Every association binds its own ephemeral socket, so a
/// late answer to an abandoned query can never reach a newer one.
#[derive(Clone, Copy, Debug, Default)]
pub struct UdpClient;

impl UdpClient {
    pub fn new() -> UdpClient {
        UdpClient
    }
}

#[async_trait]
impl DnsClient for UdpClient {
    async fn open(&self, server: SocketAddr) -> Result<Box<dyn Association>> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        debug!(server = %server, local = ?socket.local_addr().ok(), "opened udp association");

        Ok(Box::new(UdpAssociation { socket, server }))
    }
}

struct UdpAssociation {
    socket: UdpSocket,
    server: SocketAddr,
}

#[async_trait]
impl Association for UdpAssociation {
    async fn send(&mut self, packet: &[u8]) -> Result<()> {
        let bytes_sent = self.socket.send_to(packet, self.server).await?;
        debug!(server = %self.server, bytes_sent, "udp query sent");

        Ok(())
    }

    async fn recv(&mut self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        debug!(server = %self.server, from = %from, bytes_received = len, "udp response received");

        Ok((buf, from))
    }
}


#[cfg(test)]
mod tests {

    use super::*;

    use crate::dns::protocol::{decode_response, encode_query, QueryType};

    #[tokio::test]
    async fn test_udp_association_roundtrip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM_SIZE];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            let reply = testing::answer(&buf[..len], &["192.0.2.7"]);
            server.send_to(&reply, from).await.unwrap();
        });

        let mut association = UdpClient::new().open(server_addr).await.unwrap();
        let request = encode_query(77, "host.example", QueryType::A).unwrap();
        association.send(&request).await.unwrap();

        let (data, from) = association.recv().await.unwrap();
        assert_eq!(server_addr, from);

        let response = decode_response(&data).unwrap();
        assert_eq!(77, response.header.id);
        assert_eq!(
            vec!["192.0.2.7".parse::<std::net::IpAddr>().unwrap()],
            response.get_addresses(QueryType::A)
        );
    }
}
