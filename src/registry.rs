//! A connection cache guaranteeing at most one live connection per peer.

use std::{
    collections::{HashMap, hash_map::Entry},
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{FutureExt, future::join_all};
use n0_future::task;
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, info_span};

use crate::{
    ConnectionCache,
    config::RegistryConfig,
    connection::{Connection, ConnectionFactory, PeerAddress},
    error::{CacheError, CacheResult},
    event::{ConnId, Event, EventSender, EventType, Origin, emit_event},
    holder::{ConnectionHolder, HolderState, Resolution},
};

type Holder<P, F> = Arc<ConnectionHolder<P, <F as ConnectionFactory<P>>::Connection>>;

/// A peer connection registry.
///
/// Holds one connection holder per peer for the registry's whole lifetime.
/// Concurrent requests for a peer share a single dial, and an inbound
/// connection from a peer races that dial: whichever is offered to the
/// holder first is kept, the other is closed.
///
/// The registry-wide lock only guards map membership and the closed flag.
/// Waiting for and resolving a connection happens on the peer's holder, so
/// a slow dial to one peer never holds up another.
#[derive(derive_more::Debug)]
pub struct PeerConnectionRegistry<P: PeerAddress, F: ConnectionFactory<P>> {
    #[debug(skip)]
    entries: Mutex<Entries<P, F>>,

    #[debug(skip)]
    factory: Arc<F>,

    config: RegistryConfig,

    next_conn_id: AtomicU64,

    #[debug(skip)]
    events: Option<EventSender<P>>,

    // Dial tasks, drained by shutdown
    #[debug(skip)]
    tasks: TaskTracker,

    // Handling subtask cancellation, aborted on drop
    #[debug(skip)]
    cancel: CancellationToken,
}

struct Entries<P: PeerAddress, F: ConnectionFactory<P>> {
    holders: HashMap<P, Holder<P, F>>,
    closed: bool,
}

#[async_trait::async_trait]
impl<P, F> ConnectionCache<P> for PeerConnectionRegistry<P, F>
where
    P: PeerAddress,
    F: ConnectionFactory<P>,
{
    type Connection = F::Connection;

    async fn request_connection(&self, peer: P) -> CacheResult<Arc<F::Connection>> {
        let holder = {
            let mut entries = self.entries.lock().await;
            if entries.closed {
                tracing::warn!(?peer, "connection requested after shutdown");
                return Err(CacheError::Unavailable);
            }

            match entries.holders.entry(peer.clone()) {
                // First reference to this peer - dial it.
                Entry::Vacant(spot) => {
                    let holder = Arc::new(ConnectionHolder::new(peer));
                    spot.insert(holder.clone());
                    self.dial(holder.clone());
                    holder
                }

                // Someone already asked for or reported this peer - share their outcome.
                Entry::Occupied(existing) => {
                    let holder = existing.get().clone();
                    if self.config.retry_failed_dials && holder.retry() {
                        tracing::debug!(?peer, "previous dial failed, dialing again");
                        self.dial(holder.clone());
                    }
                    holder
                }
            }
        };

        holder.wait().await
    }

    async fn report_inbound_connection(&self, peer: P, conn: F::Connection) -> CacheResult<()> {
        // Taken under the lock, so a shutdown that starts after us waits for
        // this report to install or discard before it closes anything.
        let (holder, _in_flight) = {
            let mut entries = self.entries.lock().await;
            if entries.closed {
                tracing::warn!(?peer, "inbound connection reported after shutdown, closing it");
                conn.close();
                return Err(CacheError::Unavailable);
            }
            let holder = entries
                .holders
                .entry(peer.clone())
                .or_insert_with(|| Arc::new(ConnectionHolder::new(peer)))
                .clone();
            (holder, self.tasks.token())
        };

        let id = self.next_conn_id();
        tracing::debug!(peer = ?holder.peer(), conn = %id, "handling inbound connection");
        install(&holder, id, Origin::Inbound, Arc::new(conn), self.events.as_ref());
        Ok(())
    }

    async fn shutdown(&self) {
        let holders = {
            let mut entries = self.entries.lock().await;
            entries.closed = true;
            entries.holders.values().cloned().collect::<Vec<_>>()
        };
        tracing::info!(peers = holders.len(), "shutting down connection cache");

        // Drain: every holder must settle before anything is closed.
        join_all(holders.iter().map(|holder| holder.settled())).await;

        // Dials that lost to an inbound connection may still be closing their
        // loser, and inbound reports admitted before the flag may not have
        // reached their holder yet.
        self.tasks.close();
        self.tasks.wait().await;

        for holder in holders {
            if let Some((id, conn)) = holder.take_for_close() {
                conn.close();
                emit_event(
                    self.events.as_ref(),
                    Event::new(holder.peer().clone(), EventType::Close { conn: id }),
                );
            }
        }
        tracing::info!("connection cache shut down");
    }
}

impl<P: PeerAddress, F: ConnectionFactory<P>> PeerConnectionRegistry<P, F> {
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, RegistryConfig::default())
    }

    pub fn with_config(factory: F, config: RegistryConfig) -> Self {
        Self {
            entries: Mutex::new(Entries {
                holders: HashMap::new(),
                closed: false,
            }),
            factory: Arc::new(factory),
            config,
            next_conn_id: AtomicU64::new(0),
            events: None,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Publish lifecycle events to `events`.
    pub fn with_events(mut self, events: EventSender<P>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Current state of the peer's holder, or `None` if the peer was never referenced.
    pub async fn holder_state(&self, peer: &P) -> Option<HolderState> {
        self.entries
            .lock()
            .await
            .holders
            .get(peer)
            .map(|holder| holder.state())
    }

    /// Number of peers the registry has ever seen.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.holders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.entries.lock().await.closed
    }

    /// Start an outbound dial that resolves `holder` when it completes.
    fn dial(&self, holder: Holder<P, F>) {
        let id = self.next_conn_id();
        let peer = holder.peer().clone();
        emit_event(self.events.as_ref(), Event::new(peer.clone(), EventType::Dial));

        let factory = self.factory.clone();
        let events = self.events.clone();
        let timeout = self.config.dial_timeout;

        self.spawn_task(info_span!("dial", ?peer, conn = %id), async move {
            let dialed = AssertUnwindSafe(open_connection(&*factory, &peer, timeout))
                .catch_unwind()
                .await;

            match dialed {
                Ok((conn, Ok(()))) => {
                    tracing::trace!("opened connection");
                    install(&holder, id, Origin::Dialed, conn, events.as_ref());
                }
                Ok((conn, Err(err))) => {
                    tracing::warn!(%err, "dial failed");
                    conn.close();
                    holder.fail(err);
                    emit_event(events.as_ref(), Event::new(peer, EventType::DialFailed));
                }
                // Waiters and shutdown would otherwise wait on this peer forever.
                Err(_) => {
                    tracing::error!("connection factory panicked while dialing");
                    holder.fail(anyhow::anyhow!("dial to {peer:?} panicked").into());
                    emit_event(events.as_ref(), Event::new(peer, EventType::DialFailed));
                }
            }
        });
    }

    fn next_conn_id(&self) -> ConnId {
        ConnId::from(self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }

    fn spawn_task<Fut>(&self, span: tracing::Span, task: Fut)
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let token = self.cancel.clone();
        let task = async move { token.run_until_cancelled(task).await }.instrument(span);
        task::spawn(self.tasks.track_future(task));
    }
}

impl<P: PeerAddress, F: ConnectionFactory<P>> Drop for PeerConnectionRegistry<P, F> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Construct and open one outbound connection, bounded by `timeout` if set.
///
/// The connection is returned even when opening fails, so the caller can close it.
async fn open_connection<P: PeerAddress, F: ConnectionFactory<P>>(
    factory: &F,
    peer: &P,
    timeout: Option<Duration>,
) -> (Arc<F::Connection>, CacheResult<()>) {
    let conn = Arc::new(factory.new_connection(peer));
    tracing::trace!("opening connection");

    let opened = match timeout {
        Some(limit) => match tokio::time::timeout(limit, conn.open()).await {
            Ok(res) => res.map_err(CacheError::from),
            Err(_) => Err(CacheError::DialTimeout(limit)),
        },
        None => conn.open().await.map_err(CacheError::from),
    };
    (conn, opened)
}

/// Offer a candidate to the holder and report which way it went.
fn install<P: PeerAddress, C: Connection>(
    holder: &ConnectionHolder<P, C>,
    id: ConnId,
    origin: Origin,
    conn: Arc<C>,
    events: Option<&EventSender<P>>,
) {
    let event = match holder.resolve(id, conn) {
        Resolution::Installed => {
            tracing::debug!(peer = ?holder.peer(), conn = %id, %origin, "installed connection");
            EventType::Install { conn: id, origin }
        }
        Resolution::Discarded => {
            tracing::debug!(
                peer = ?holder.peer(),
                conn = %id,
                %origin,
                "peer already connected, closed redundant connection"
            );
            EventType::Discard { conn: id, origin }
        }
    };
    emit_event(events, Event::new(holder.peer().clone(), event));
}
