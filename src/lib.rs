//! A stub DNS resolver. Hostnames are answered from a time-windowed cache,
//! then the system hosts table, then the configured nameservers over UDP.

pub mod dns;

pub use crate::dns::context::{Resolver, ResolverConfig};
pub use crate::dns::protocol::QueryType;
pub use crate::dns::resolve::ResolveError;
