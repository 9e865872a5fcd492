//! Bookie address resolution and connection security hooks.
//!
//! Both are opaque collaborators: the client only asks a resolver for a
//! socket address and hands an optional security factory to every new
//! connection.

use std::{collections::HashMap, fmt, io, net::SocketAddr};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use quire_types::BookieId;

/// Resolves a bookie identity to the address to connect to.
pub trait BookieAddressResolver: Send + Sync + fmt::Debug {
    /// Resolves `bookie`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the identity has no reachable address.
    fn resolve<'a>(&'a self, bookie: &'a BookieId) -> BoxFuture<'a, io::Result<SocketAddr>>;
}

/// Treats the bookie identity as a `host:port` pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPortResolver;

impl BookieAddressResolver for HostPortResolver {
    fn resolve<'a>(&'a self, bookie: &'a BookieId) -> BoxFuture<'a, io::Result<SocketAddr>> {
        Box::pin(async move {
            tokio::net::lookup_host(bookie.as_str()).await?.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for bookie {bookie}"))
            })
        })
    }
}

/// Resolver backed by an explicit identity-to-address table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    addrs: RwLock<HashMap<BookieId, SocketAddr>>,
}

impl StaticResolver {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `bookie` to `addr`, replacing any previous mapping.
    pub fn insert(&self, bookie: BookieId, addr: SocketAddr) {
        self.addrs.write().insert(bookie, addr);
    }

    /// Removes the mapping for `bookie`.
    pub fn remove(&self, bookie: &BookieId) {
        self.addrs.write().remove(bookie);
    }
}

impl BookieAddressResolver for StaticResolver {
    fn resolve<'a>(&'a self, bookie: &'a BookieId) -> BoxFuture<'a, io::Result<SocketAddr>> {
        let addr = self.addrs.read().get(bookie).copied();
        Box::pin(async move {
            addr.ok_or_else(|| {
                let message = format!("bookie {bookie} is not registered");
                io::Error::new(io::ErrorKind::NotFound, message)
            })
        })
    }
}

/// Produces per-connection security handlers.
///
/// Handshake internals live outside the client; a connection only records
/// which factory it was created with.
pub trait SecurityHandlerFactory: Send + Sync + fmt::Debug {
    /// Name of the security protocol, used in logs.
    fn protocol_name(&self) -> &str;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_port_resolves_ip_literal() {
        let bookie = BookieId::parse("127.0.0.1:3181").unwrap();
        let addr = HostPortResolver.resolve(&bookie).await.unwrap();
        assert_eq!(addr, "127.0.0.1:3181".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn host_port_rejects_identity_without_port() {
        let bookie = BookieId::parse("bookie-without-port").unwrap();
        assert!(HostPortResolver.resolve(&bookie).await.is_err());
    }

    #[tokio::test]
    async fn static_resolver_uses_table() {
        let resolver = StaticResolver::new();
        let bookie = BookieId::parse("bookie-1").unwrap();
        assert!(resolver.resolve(&bookie).await.is_err());

        let addr: SocketAddr = "10.0.0.5:3181".parse().unwrap();
        resolver.insert(bookie.clone(), addr);
        assert_eq!(resolver.resolve(&bookie).await.unwrap(), addr);

        resolver.remove(&bookie);
        assert!(resolver.resolve(&bookie).await.is_err());
    }
}
