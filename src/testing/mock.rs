use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use futures::{FutureExt, future::BoxFuture};
use tokio::sync::watch;

use crate::{Connection, ConnectionFactory};

pub type TestPeer = u32;

/// Open/close counters for one mock connection, kept after the connection
/// itself has been handed to the cache.
#[derive(Debug, Default)]
pub struct ConnStats {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl ConnStats {
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }
}

#[derive(Clone, Debug)]
pub struct MockConnection {
    peer: TestPeer,
    stats: Arc<ConnStats>,
    gate: Option<watch::Receiver<bool>>,
    fail: bool,
    panic: bool,
}

impl MockConnection {
    /// A connection as it would arrive from a remote peer: already open.
    pub fn inbound(peer: TestPeer) -> Self {
        let stats = Arc::new(ConnStats::default());
        stats.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            peer,
            stats,
            gate: None,
            fail: false,
            panic: false,
        }
    }

    pub fn peer(&self) -> TestPeer {
        self.peer
    }

    pub fn stats(&self) -> Arc<ConnStats> {
        self.stats.clone()
    }
}

impl Connection for MockConnection {
    fn open(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            if let Some(gate) = &self.gate {
                let mut gate = gate.clone();
                if gate.wait_for(|released| *released).await.is_err() {
                    anyhow::bail!("mock factory dropped before releasing peer {}", self.peer);
                }
            }
            if self.panic {
                panic!("mock connection to peer {} blew up", self.peer);
            }
            if self.fail {
                anyhow::bail!("peer {} refused the connection", self.peer);
            }
            self.stats.opened.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(peer = self.peer, "mock connection opened");
            Ok(())
        }
        .boxed()
    }

    fn close(&self) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(peer = self.peer, "mock connection closed");
    }
}

/// A connection factory that records every connection it makes.
///
/// Opens can be held back until `release` is called, and
/// made to fail or panic per peer.
#[derive(Clone, Debug, derive_more::Deref)]
pub struct MockFactory {
    #[deref]
    inner: Arc<MockFactoryInner>,
}

#[derive(Debug)]
pub struct MockFactoryInner {
    gate: watch::Sender<bool>,
    dial_count: watch::Sender<usize>,
    failing: Mutex<HashSet<TestPeer>>,
    panicking: Mutex<HashSet<TestPeer>>,
    dials: Mutex<HashMap<TestPeer, Vec<Arc<ConnStats>>>>,
}

impl MockFactory {
    /// A factory whose connections open immediately.
    pub fn new() -> Self {
        Self::with_gate(true)
    }

    /// A factory whose connections block in `open()` until `release`.
    pub fn gated() -> Self {
        Self::with_gate(false)
    }

    fn with_gate(released: bool) -> Self {
        let (gate, _) = watch::channel(released);
        let (dial_count, _) = watch::channel(0);
        Self {
            inner: Arc::new(MockFactoryInner {
                gate,
                dial_count,
                failing: Default::default(),
                panicking: Default::default(),
                dials: Default::default(),
            }),
        }
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFactoryInner {
    /// Let every pending and future `open()` proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Make future dials to `peer` fail.
    pub fn fail_peer(&self, peer: TestPeer) {
        self.failing.lock().unwrap().insert(peer);
    }

    /// Make future dials to `peer` panic inside `open()`.
    pub fn panic_peer(&self, peer: TestPeer) {
        self.panicking.lock().unwrap().insert(peer);
    }

    /// Undo [`Self::fail_peer`] and [`Self::panic_peer`].
    pub fn heal_peer(&self, peer: TestPeer) {
        self.failing.lock().unwrap().remove(&peer);
        self.panicking.lock().unwrap().remove(&peer);
    }

    /// How many connections have been made for `peer`.
    pub fn dials(&self, peer: TestPeer) -> usize {
        self.dials
            .lock()
            .unwrap()
            .get(&peer)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Stats of every connection made for `peer`, in creation order.
    pub fn connections(&self, peer: TestPeer) -> Vec<Arc<ConnStats>> {
        self.dials
            .lock()
            .unwrap()
            .get(&peer)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_dials(&self) -> usize {
        *self.dial_count.borrow()
    }

    /// Wait until at least `n` connections have been made across all peers.
    pub async fn wait_for_dials(&self, n: usize) {
        let mut rx = self.dial_count.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }
}

impl ConnectionFactory<TestPeer> for MockFactory {
    type Connection = MockConnection;

    fn new_connection(&self, peer: &TestPeer) -> MockConnection {
        let stats = Arc::new(ConnStats::default());
        self.dials
            .lock()
            .unwrap()
            .entry(*peer)
            .or_default()
            .push(stats.clone());
        self.dial_count.send_modify(|count| *count += 1);
        tracing::trace!(peer, "mock factory made connection");

        MockConnection {
            peer: *peer,
            stats,
            gate: Some(self.gate.subscribe()),
            fail: self.failing.lock().unwrap().contains(peer),
            panic: self.panicking.lock().unwrap().contains(peer),
        }
    }
}

pub type TestRegistry = crate::PeerConnectionRegistry<TestPeer, MockFactory>;

/// Request a connection from a background task.
pub fn spawn_request(
    cache: &Arc<TestRegistry>,
    peer: TestPeer,
) -> tokio::task::JoinHandle<crate::CacheResult<Arc<MockConnection>>> {
    use crate::ConnectionCache;

    let cache = cache.clone();
    tokio::spawn(async move { cache.request_connection(peer).await })
}
