//! A single peer, requested, reused and closed.

use std::sync::Arc;

use anyhow::Result;
use peer_conn::{
    ConnectionCache, HolderState, PeerConnectionRegistry,
    testing::{MockFactory, TestRegistry, setup_tracing},
};

const TRACING_DIRECTIVE: &str = "off";
// const TRACING_DIRECTIVE: &str = "one_connection=debug,peer_conn=trace";

#[tokio::test(flavor = "multi_thread")]
async fn one_connection() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let factory = MockFactory::new();
    let cache: TestRegistry = PeerConnectionRegistry::new(factory.clone());
    assert!(cache.is_empty().await);
    assert_eq!(cache.holder_state(&1).await, None);

    let conn = cache.request_connection(1).await?;
    assert_eq!(conn.peer(), 1);
    assert_eq!(conn.stats().open_count(), 1);
    assert_eq!(factory.dials(1), 1);
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Resolved));
    assert_eq!(cache.len().await, 1);

    // Already resolved, so no new dial
    let again = cache.request_connection(1).await?;
    assert!(Arc::ptr_eq(&conn, &again));
    assert_eq!(factory.dials(1), 1);

    cache.shutdown().await;
    assert!(cache.is_closed().await);
    assert_eq!(conn.stats().close_count(), 1);
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Closed));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_of_empty_cache() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let factory = MockFactory::new();
    let cache: TestRegistry = PeerConnectionRegistry::new(factory.clone());
    cache.shutdown().await;

    assert!(cache.is_closed().await);
    assert_eq!(factory.total_dials(), 0);

    Ok(())
}
