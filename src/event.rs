use std::fmt::Debug;

use tokio::sync::mpsc;

/// Registry-assigned identity of one candidate connection.
///
/// Every connection that enters the registry, dialed or inbound, gets a fresh id,
/// so winners and losers can be told apart in logs and events.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
    derive_more::Debug,
    derive_more::Deref,
    derive_more::From,
)]
#[display("c{_0}")]
#[debug("c{_0}")]
pub struct ConnId(u64);

/// How a candidate connection came to exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq, derive_more::Display)]
pub enum Origin {
    /// Opened by us through the connection factory.
    #[display("dialed")]
    Dialed,
    /// Opened by the peer and reported to us.
    #[display("inbound")]
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<P> {
    pub peer: P,
    pub event: EventType,
}

impl<P> Event<P> {
    pub fn new(peer: P, event: EventType) -> Self {
        Self { peer, event }
    }
}

impl<P: Debug> std::fmt::Display for Event<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let peer = &self.peer;
        match &self.event {
            EventType::Dial => write!(f, "{:>16} : ~> {peer:?}", "Dial"),
            EventType::DialFailed => write!(f, "{:>16} : ~/ {peer:?}", "DialFailed"),
            EventType::Install { conn, origin } => {
                write!(f, "{:>16} : == {peer:?} : {conn} ({origin})", "Install")
            }
            EventType::Discard { conn, origin } => {
                write!(f, "{:>16} : xx {peer:?} : {conn} ({origin})", "Discard")
            }
            EventType::Close { conn } => write!(f, "{:>16} : ~~ {peer:?} : {conn}", "Close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// An outbound dial was started.
    Dial,
    /// An outbound dial failed or timed out.
    DialFailed,
    /// A candidate won its holder and became the peer's connection.
    Install { conn: ConnId, origin: Origin },
    /// A candidate lost to an already installed connection and was closed.
    Discard { conn: ConnId, origin: Origin },
    /// An installed connection was closed during shutdown.
    Close { conn: ConnId },
}

impl EventType {
    pub fn conn(&self) -> Option<ConnId> {
        match self {
            EventType::Dial | EventType::DialFailed => None,
            EventType::Install { conn, .. }
            | EventType::Discard { conn, .. }
            | EventType::Close { conn } => Some(*conn),
        }
    }
}

pub type EventSender<P> = mpsc::UnboundedSender<Event<P>>;
pub type EventReceiver<P> = mpsc::UnboundedReceiver<Event<P>>;

/// Create a channel suitable for [`PeerConnectionRegistry::with_events`](crate::PeerConnectionRegistry::with_events).
pub fn channel<P>() -> (EventSender<P>, EventReceiver<P>) {
    mpsc::unbounded_channel()
}

/// Log the event and forward it to the sink, if any.
///
/// A dropped receiver is not an error; events are advisory.
pub(crate) fn emit_event<P: Debug>(sink: Option<&EventSender<P>>, event: Event<P>) {
    tracing::debug!("{}", event);
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
