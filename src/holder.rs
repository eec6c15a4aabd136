//! The per-peer slot that turns competing connection candidates into one winner.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    connection::{Connection, PeerAddress},
    error::{CacheError, CacheResult},
    event::ConnId,
};

/// Observable lifecycle of a peer's holder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HolderState {
    /// Waiting for a dial or an inbound connection.
    Pending,
    /// The last dial failed and nothing has resolved the peer since.
    Failed,
    /// A connection is installed.
    Resolved,
    /// The installed connection was closed by shutdown.
    Closed,
}

enum Slot<C> {
    Pending,
    Failed(CacheError),
    Resolved(ConnId, Arc<C>),
    Closed(Arc<C>),
}

impl<C> Slot<C> {
    fn is_settled(&self) -> bool {
        !matches!(self, Slot::Pending)
    }

    fn has_connection(&self) -> bool {
        matches!(self, Slot::Resolved(..) | Slot::Closed(..))
    }

    fn outcome(&self) -> Option<CacheResult<Arc<C>>> {
        match self {
            Slot::Pending => None,
            Slot::Failed(err) => Some(Err(err.clone())),
            Slot::Resolved(_, conn) | Slot::Closed(conn) => Some(Ok(conn.clone())),
        }
    }
}

/// What happened to a candidate handed to [`ConnectionHolder::resolve`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// The candidate is now the peer's connection.
    Installed,
    /// A connection was already installed; the candidate was closed.
    Discarded,
}

/// Single-assignment slot for one peer's connection.
///
/// The watch sender doubles as the holder's guard: every transition happens
/// inside `send_if_modified`, so concurrent resolutions are serialized and
/// the first one to run wins. Waiters subscribe and are woken on the first
/// settled value, or return at once if the slot has already settled.
#[derive(derive_more::Debug)]
pub(crate) struct ConnectionHolder<P, C> {
    peer: P,
    #[debug(skip)]
    slot: watch::Sender<Slot<C>>,
}

impl<P: PeerAddress, C: Connection> ConnectionHolder<P, C> {
    pub fn new(peer: P) -> Self {
        let (slot, _) = watch::channel(Slot::Pending);
        Self { peer, slot }
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Offer a candidate connection. First committer wins; a loser is closed here.
    pub fn resolve(&self, id: ConnId, candidate: Arc<C>) -> Resolution {
        let mut candidate = Some(candidate);
        self.slot.send_if_modified(|slot| {
            if slot.has_connection() {
                return false;
            }
            match candidate.take() {
                Some(conn) => {
                    *slot = Slot::Resolved(id, conn);
                    true
                }
                None => false,
            }
        });

        match candidate {
            None => Resolution::Installed,
            Some(loser) => {
                loser.close();
                Resolution::Discarded
            }
        }
    }

    /// Record a failed dial. Has no effect unless the slot is still pending.
    pub fn fail(&self, err: CacheError) {
        self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Pending) {
                *slot = Slot::Failed(err);
                true
            } else {
                false
            }
        });
    }

    /// Move a failed slot back to pending so a new dial can be started.
    ///
    /// Returns false if the slot was not failed, in which case the caller
    /// must not dial.
    pub fn retry(&self) -> bool {
        self.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Failed(_)) {
                *slot = Slot::Pending;
                true
            } else {
                false
            }
        })
    }

    /// Wait for the slot to settle and return its connection or dial error.
    pub async fn wait(&self) -> CacheResult<Arc<C>> {
        let mut rx = self.slot.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let slot = rx
            .wait_for(Slot::is_settled)
            .await
            .map_err(|_| CacheError::Unavailable)?;
        slot.outcome().unwrap_or(Err(CacheError::Unavailable))
    }

    /// Wait until the slot is no longer pending.
    pub async fn settled(&self) {
        let mut rx = self.slot.subscribe();
        let _ = rx.wait_for(Slot::is_settled).await;
    }

    /// Mark an installed connection closed and hand it back, exactly once.
    pub fn take_for_close(&self) -> Option<(ConnId, Arc<C>)> {
        let mut taken = None;
        self.slot.send_if_modified(|slot| {
            let Slot::Resolved(id, conn) = slot else {
                return false;
            };
            let (id, conn) = (*id, conn.clone());
            *slot = Slot::Closed(conn.clone());
            taken = Some((id, conn));
            true
        });
        taken
    }

    pub fn state(&self) -> HolderState {
        match &*self.slot.borrow() {
            Slot::Pending => HolderState::Pending,
            Slot::Failed(_) => HolderState::Failed,
            Slot::Resolved(..) => HolderState::Resolved,
            Slot::Closed(..) => HolderState::Closed,
        }
    }
}
