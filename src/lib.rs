mod config;
mod connection;
mod error;
pub mod event;
mod holder;
mod manager;
mod registry;

#[cfg(feature = "testing")]
pub mod testing;

pub use config::RegistryConfig;
pub use connection::{Connection, ConnectionFactory, PeerAddress};
pub use error::{CacheError, CacheResult};
pub use holder::HolderState;
pub use manager::ConnectionCache;
pub use registry::PeerConnectionRegistry;
