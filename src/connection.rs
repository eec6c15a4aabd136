use std::{fmt::Debug, hash::Hash};

use anyhow::Result;
use futures::future::BoxFuture;

/// Anything usable as a key identifying a remote peer.
pub trait PeerAddress: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> PeerAddress for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// A transport connection to one peer.
///
/// The cache never touches bytes; it only opens connections it dialed and
/// closes the ones it no longer wants.
pub trait Connection: Send + Sync + 'static {
    /// Establish the transport.
    ///
    /// Only called on connections produced by a [`ConnectionFactory`].
    /// May take arbitrarily long.
    fn open(&self) -> BoxFuture<'_, Result<()>>;

    /// Tear the transport down.
    ///
    /// Must be safe to call on a connection that was never opened, or whose
    /// open did not finish.
    fn close(&self);
}

/// Constructs not-yet-opened connections for outbound dials.
pub trait ConnectionFactory<P: PeerAddress>: Send + Sync + 'static {
    type Connection: Connection;

    fn new_connection(&self, peer: &P) -> Self::Connection;
}
