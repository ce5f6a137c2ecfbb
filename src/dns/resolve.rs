//! resolution of hostnames against the configured nameservers

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dns::client::DnsClient;
use crate::dns::correlate::{CorrelateError, Correlator, PendingId};
use crate::dns::protocol::{decode_response, encode_query, DnsPacket, ProtocolError, QueryType, ResultCode};

#[derive(Debug, Display)]
pub enum ResolveError {
    #[display(fmt = "{}", _0)]
    Encoding(ProtocolError),
    #[display(
        fmt = "transaction id mismatch from {}: expected {}, received {}",
        server,
        expected,
        received
    )]
    Correlation {
        server: SocketAddr,
        expected: u16,
        received: u16,
    },
    #[display(fmt = "{}", _0)]
    TransactionIds(CorrelateError),
    #[display(fmt = "resolution cancelled")]
    Cancelled,
}

impl std::error::Error for ResolveError {}

type Result<T> = std::result::Result<T, ResolveError>;

/// Progress of a single exchange with one nameserver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Sent,
    Received,
    TimedOut,
    Mismatched,
    Done,
}

/// Drives one UDP exchange per server, strictly in list order, until a
/// validated answer arrives.
pub struct QueryEngine {
    client: Arc<dyn DnsClient>,
    correlator: Correlator,
    servers: Vec<SocketAddr>,
    timeout: Duration,
    max_stray_datagrams: usize,
    shutdown: CancellationToken,
}

impl QueryEngine {
    pub fn new(
        client: Arc<dyn DnsClient>,
        servers: Vec<SocketAddr>,
        timeout: Duration,
        max_stray_datagrams: usize,
        shutdown: CancellationToken,
    ) -> QueryEngine {
        QueryEngine {
            client,
            correlator: Correlator::new(),
            servers,
            timeout,
            max_stray_datagrams,
            shutdown,
        }
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Asks each server in turn for `hostname`. Returns `Ok(None)` once every
    /// server has failed to produce a validated answer.
    pub async fn resolve_via_network(
        &self,
        hostname: &str,
        qtype: QueryType,
    ) -> Result<Option<IpAddr>> {
        for server in &self.servers {
            if let Some(addr) = self.attempt(*server, hostname, qtype).await? {
                return Ok(Some(addr));
            }
        }

        debug!(hostname, servers = self.servers.len(), "all servers exhausted");
        Ok(None)
    }

    async fn attempt(
        &self,
        server: SocketAddr,
        hostname: &str,
        qtype: QueryType,
    ) -> Result<Option<IpAddr>> {
        let pending = self
            .correlator
            .next_id()
            .map_err(ResolveError::TransactionIds)?;
        let mut attempt = Attempt::new(server, pending);

        self.run(&mut attempt, hostname, qtype).await
    }

    /// Every exit of an exchange ends in `Done`.
    async fn run(
        &self,
        attempt: &mut Attempt,
        hostname: &str,
        qtype: QueryType,
    ) -> Result<Option<IpAddr>> {
        let res = self.exchange(attempt, hostname, qtype).await;
        attempt.transition(AttemptState::Done);

        res
    }

    async fn exchange(
        &self,
        attempt: &mut Attempt,
        hostname: &str,
        qtype: QueryType,
    ) -> Result<Option<IpAddr>> {
        let server = attempt.server;
        let request = encode_query(attempt.id(), hostname, qtype).map_err(ResolveError::Encoding)?;

        if self.shutdown.is_cancelled() {
            debug!(server = %server, hostname, "resolver shut down, not sending");
            return Err(ResolveError::Cancelled);
        }

        let mut association = match self.client.open(server).await {
            Ok(x) => x,
            Err(err) => {
                warn!(server = %server, %err, "failed to open association");
                return Ok(None);
            }
        };

        if let Err(err) = association.send(&request).await {
            warn!(server = %server, %err, "failed to send query");
            return Ok(None);
        }
        attempt.transition(AttemptState::Sent);

        let deadline = Instant::now() + self.timeout;
        let mut strays = 0;
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(server = %server, hostname, "query cancelled");
                    return Err(ResolveError::Cancelled);
                }
                res = timeout_at(deadline, association.recv()) => res,
            };

            let (data, from) = match received {
                Ok(Ok(x)) => x,
                Ok(Err(err)) => {
                    warn!(server = %server, %err, "failed to receive response");
                    return Ok(None);
                }
                Err(_) => {
                    attempt.transition(AttemptState::TimedOut);
                    return Ok(None);
                }
            };

            if from != server {
                warn!(server = %server, from = %from, "discarding datagram from unexpected source");
                continue;
            }

            let response = match decode_response(&data) {
                Ok(x) => x,
                Err(err) => {
                    warn!(server = %server, %err, "discarding malformed response");
                    return Ok(None);
                }
            };

            if !Correlator::matches(attempt.id(), &response) {
                attempt.transition(AttemptState::Mismatched);
                strays += 1;
                if strays > self.max_stray_datagrams {
                    return Err(ResolveError::Correlation {
                        server,
                        expected: attempt.id(),
                        received: response.header.id,
                    });
                }

                warn!(
                    server = %server,
                    expected = attempt.id(),
                    received = response.header.id,
                    "discarding response with mismatched transaction id"
                );
                continue;
            }

            attempt.transition(AttemptState::Received);
            debug!(server = %server, header = %response.header, "validating response");

            return Ok(validated_address(&response, hostname, qtype));
        }
    }
}

/// The first address from `response`, as long as it answers exactly the
/// question we asked.
fn validated_address(response: &DnsPacket, hostname: &str, qtype: QueryType) -> Option<IpAddr> {
    if !response.header.response {
        warn!(id = response.header.id, "datagram is not a response");
        return None;
    }

    if response.header.rescode != ResultCode::NOERROR {
        debug!(hostname, rescode = ?response.header.rescode, "server returned an error");
        return None;
    }

    match response.questions.as_slice() {
        [question] if question.echoes(hostname, qtype) => {}
        _ => {
            warn!(hostname, questions = ?response.questions, "response does not echo the question");
            return None;
        }
    }

    response.get_addresses(qtype).into_iter().next()
}

struct Attempt {
    server: SocketAddr,
    pending: PendingId,
    state: AttemptState,
}

impl Attempt {
    fn new(server: SocketAddr, pending: PendingId) -> Attempt {
        Attempt {
            server,
            pending,
            state: AttemptState::Idle,
        }
    }

    fn id(&self) -> u16 {
        self.pending.id()
    }

    fn transition(&mut self, next: AttemptState) {
        debug!(server = %self.server, id = self.id(), from = ?self.state, to = ?next, "query state");
        self.state = next;
    }
}
