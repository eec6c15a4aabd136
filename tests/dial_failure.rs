use std::{sync::Arc, time::Duration};

use anyhow::Result;
use futures::future::join_all;
use peer_conn::{
    CacheError, ConnectionCache, HolderState, PeerConnectionRegistry, RegistryConfig,
    testing::{MockConnection, MockFactory, TestRegistry, setup_tracing, spawn_request},
};

const TRACING_DIRECTIVE: &str = "off";

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread")]
async fn failure_reaches_every_waiter() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let factory = MockFactory::gated();
    factory.fail_peer(1);
    // Without retries, late arrivals cannot start a second dial.
    let config = RegistryConfig::default().with_retry_failed_dials(false);
    let cache: Arc<TestRegistry> =
        Arc::new(PeerConnectionRegistry::with_config(factory.clone(), config));

    let requests = [
        spawn_request(&cache, 1),
        spawn_request(&cache, 1),
        spawn_request(&cache, 1),
    ];
    factory.wait_for_dials(1).await;
    factory.release();

    for res in tokio::time::timeout(WAIT, join_all(requests)).await? {
        let err = res?.unwrap_err();
        assert!(matches!(err, CacheError::DialFailed(_)), "{err}");
        assert!(err.to_string().contains("refused"), "{err}");
    }

    assert_eq!(factory.dials(1), 1);
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Failed));

    // The half-open connection is not leaked.
    let dialed = factory.connections(1);
    assert_eq!(dialed[0].open_count(), 0);
    assert_eq!(dialed[0].close_count(), 1);

    tokio::time::timeout(WAIT, cache.shutdown()).await?;
    assert_eq!(dialed[0].close_count(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn request_retries_failed_dial() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let factory = MockFactory::new();
    factory.fail_peer(1);
    let cache: TestRegistry = PeerConnectionRegistry::new(factory.clone());

    cache.request_connection(1).await.unwrap_err();
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Failed));

    factory.heal_peer(1);
    let conn = cache.request_connection(1).await?;
    assert_eq!(factory.dials(1), 2);
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Resolved));
    assert_eq!(cache.len().await, 1);

    let again = cache.request_connection(1).await?;
    assert!(Arc::ptr_eq(&conn, &again));
    assert_eq!(factory.dials(1), 2);

    cache.shutdown().await;
    let dialed = factory.connections(1);
    assert_eq!(dialed[0].close_count(), 1);
    assert_eq!(dialed[1].close_count(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_is_sticky_without_retry() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let factory = MockFactory::new();
    factory.fail_peer(1);
    let config = RegistryConfig::default().with_retry_failed_dials(false);
    let cache: TestRegistry = PeerConnectionRegistry::with_config(factory.clone(), config);

    cache.request_connection(1).await.unwrap_err();
    factory.heal_peer(1);

    let err = cache.request_connection(1).await.unwrap_err();
    assert!(matches!(err, CacheError::DialFailed(_)), "{err}");
    assert_eq!(factory.dials(1), 1);

    // A peer connecting to us still resolves it.
    let a = MockConnection::inbound(1);
    let a_stats = a.stats();
    cache.report_inbound_connection(1, a).await?;
    let conn = cache.request_connection(1).await?;
    assert!(Arc::ptr_eq(&conn.stats(), &a_stats));
    assert_eq!(factory.dials(1), 1);

    cache.shutdown().await;
    assert_eq!(a_stats.close_count(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dial_timeout() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let limit = Duration::from_millis(50);

    // Never released, so every open hangs.
    let factory = MockFactory::gated();
    let config = RegistryConfig::default().with_dial_timeout(limit);
    let cache: TestRegistry = PeerConnectionRegistry::with_config(factory.clone(), config);

    let err = tokio::time::timeout(WAIT, cache.request_connection(1))
        .await?
        .unwrap_err();
    assert!(matches!(err, CacheError::DialTimeout(d) if d == limit), "{err}");
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Failed));

    let dialed = factory.connections(1);
    assert_eq!(dialed[0].open_count(), 0);
    assert_eq!(dialed[0].close_count(), 1);

    tokio::time::timeout(WAIT, cache.shutdown()).await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_dial_fails_waiters() -> Result<()> {
    setup_tracing(TRACING_DIRECTIVE);

    let factory = MockFactory::gated();
    factory.panic_peer(1);
    let cache: Arc<TestRegistry> = Arc::new(PeerConnectionRegistry::new(factory.clone()));

    let requests = [spawn_request(&cache, 1), spawn_request(&cache, 1)];
    factory.wait_for_dials(1).await;
    factory.release();

    for res in tokio::time::timeout(WAIT, join_all(requests)).await? {
        let err = res?.unwrap_err();
        assert!(matches!(err, CacheError::DialFailed(_)), "{err}");
        assert!(err.to_string().contains("panicked"), "{err}");
    }
    assert_eq!(cache.holder_state(&1).await, Some(HolderState::Failed));

    // The failed holder can still be dialed again.
    factory.heal_peer(1);
    let conn = tokio::time::timeout(WAIT, cache.request_connection(1)).await??;
    assert_eq!(factory.dials(1), 2);

    tokio::time::timeout(WAIT, cache.shutdown()).await?;
    assert_eq!(conn.stats().close_count(), 1);

    Ok(())
}
