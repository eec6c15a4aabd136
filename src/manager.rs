//! The entry points a transport layer uses to share peer connections.

use std::sync::Arc;

use crate::{
    connection::{Connection, PeerAddress},
    error::CacheResult,
};

#[async_trait::async_trait]
pub trait ConnectionCache<P: PeerAddress>: Send + Sync {
    type Connection: Connection;

    /// Return the connection to `peer`, dialing it if nobody has yet.
    ///
    /// All concurrent callers for the same peer get the same connection.
    /// Fails with [`CacheError::Unavailable`](crate::CacheError::Unavailable)
    /// once shutdown has begun.
    async fn request_connection(&self, peer: P) -> CacheResult<Arc<Self::Connection>>;

    /// Offer a connection the peer opened to us.
    ///
    /// Kept if the peer has no connection yet, otherwise closed. Never dials.
    async fn report_inbound_connection(
        &self,
        peer: P,
        conn: Self::Connection,
    ) -> CacheResult<()>;

    /// Stop accepting work, wait for in-flight dials, then close every
    /// cached connection exactly once.
    async fn shutdown(&self);
}
