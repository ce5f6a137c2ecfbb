//! The dns module implements a stub resolver: the wire protocol, the UDP
//! client, system configuration discovery and the caching resolver on top

pub mod buffer;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod correlate;
pub mod hosts;
pub mod protocol;
#[cfg(any(windows, test))]
pub mod registry;
pub mod resolve;
