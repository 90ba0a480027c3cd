//! Client address resolution.
//!
//! The peer socket address is authoritative unless the peer is a trusted
//! reverse proxy, in which case the first address found in an allowed
//! forwarding header wins.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

use crate::config::ProxySettings;

/// Resolves the caller's address from connection info and headers.
#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    settings: ProxySettings,
}

impl ClientIpResolver {
    /// Creates a resolver with the given proxy settings.
    #[must_use]
    pub fn new(settings: ProxySettings) -> Self {
        Self { settings }
    }

    /// Resolves the address of a request.
    ///
    /// Falls back to `0.0.0.0` when the server was not started with
    /// connection info (e.g. when a router is driven in-process).
    #[must_use]
    pub fn resolve(&self, extensions: &Extensions, headers: &HeaderMap) -> IpAddr {
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        self.resolve_peer(peer, headers)
    }

    /// Resolves the address given an optional peer address.
    #[must_use]
    pub fn resolve_peer(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> IpAddr {
        let Some(peer) = peer else {
            return IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        };
        if !self.settings.trusted_remotes.contains(&peer) {
            return peer;
        }
        self.settings
            .allowed_headers
            .iter()
            .filter_map(|name| headers.get(name.as_str()))
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(',').next())
            .find_map(|first| first.trim().parse::<IpAddr>().ok())
            .unwrap_or(peer)
    }
}
