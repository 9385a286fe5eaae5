//! Cluster switching: failover between candidate clusters and cluster
//! restarts seen as a new cluster id.

mod common;

use std::time::Duration;

use memgrid_client::{ClientFailoverConfig, GridClient, LifecycleEvent};

use common::{builder_for, unused_address, Behavior, MockMember};

const SHORT_CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

async fn next_event(
    registration: &mut memgrid_client::LifecycleListenerRegistration,
    wanted: LifecycleEvent,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if registration.receiver().recv().await.unwrap() == wanted {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} not fired", wanted));
}

#[tokio::test]
async fn test_start_with_failover_moves_to_reachable_cluster() {
    let backup = MockMember::start(Behavior::default()).await;
    let config = ClientFailoverConfig::builder()
        .add_client_config(
            builder_for(&[unused_address().await], SHORT_CONNECT_TIMEOUT)
                .cluster_name("primary")
                .build()
                .unwrap(),
        )
        .add_client_config(
            builder_for(&[backup.address()], SHORT_CONNECT_TIMEOUT)
                .cluster_name("backup")
                .build()
                .unwrap(),
        )
        .try_count(2)
        .build()
        .unwrap();

    let client = GridClient::start_with_failover(config).await.unwrap();

    let manager = client.connection_manager();
    assert_eq!(manager.current_cluster().cluster_name(), "backup");
    assert_eq!(manager.cluster_id(), Some(backup.cluster_id()));
    assert_eq!(client.cluster().member_count(), 1);

    client.shutdown();
}

#[tokio::test]
async fn test_hard_switch_is_refused_until_failing_over() {
    let primary = MockMember::start(Behavior::default()).await;
    // Answers on the primary cluster's address list with another cluster id.
    let impostor = MockMember::start(Behavior::default()).await;
    let backup = MockMember::start(Behavior::default()).await;

    let config = ClientFailoverConfig::builder()
        .add_client_config(
            builder_for(&[primary.address(), impostor.address()], SHORT_CONNECT_TIMEOUT)
                .cluster_name("primary")
                .build()
                .unwrap(),
        )
        .add_client_config(
            builder_for(&[backup.address()], SHORT_CONNECT_TIMEOUT)
                .cluster_name("backup")
                .build()
                .unwrap(),
        )
        .try_count(1)
        .build()
        .unwrap();
    let client = GridClient::start_with_failover(config).await.unwrap();
    assert_eq!(
        client.connection_manager().cluster_id(),
        Some(primary.cluster_id())
    );
    let mut events = client.lifecycle().subscribe();

    primary.stop();

    next_event(&mut events, LifecycleEvent::ClientDisconnected).await;
    next_event(&mut events, LifecycleEvent::ClientChangedCluster).await;

    let manager = client.connection_manager();
    assert!(impostor.accepted() >= 1);
    assert!(manager.registry().get_connection(&impostor.uuid()).is_none());
    assert_eq!(manager.cluster_id(), Some(backup.cluster_id()));
    assert_eq!(manager.current_cluster().cluster_name(), "backup");
    assert!(manager.registry().get_connection(&backup.uuid()).is_some());

    client.shutdown();
}

#[tokio::test]
async fn test_restarted_cluster_is_accepted_without_failover() {
    let original = MockMember::start(Behavior::default()).await;
    let restarted = MockMember::start(Behavior::default()).await;
    let config = builder_for(
        &[original.address(), restarted.address()],
        Duration::from_secs(2),
    )
    .build()
    .unwrap();
    let client = GridClient::start(config).await.unwrap();
    assert_eq!(
        client.connection_manager().cluster_id(),
        Some(original.cluster_id())
    );
    let mut events = client.lifecycle().subscribe();

    original.stop();

    next_event(&mut events, LifecycleEvent::ClientDisconnected).await;
    next_event(&mut events, LifecycleEvent::ClientConnected).await;

    let manager = client.connection_manager();
    assert_eq!(manager.cluster_id(), Some(restarted.cluster_id()));
    assert!(manager.registry().get_connection(&restarted.uuid()).is_some());
    assert!(client.lifecycle().is_running());

    client.shutdown();
}
