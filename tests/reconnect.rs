mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config_with, eventually, within, Attempt, MockConnector};
use rfbridge::bridge::connection::{ConnectionManager, ManagerSettings};
use rfbridge::bridge::{Bridge, ConnectionContext, ConnectionState, DeviceKind};
use rfbridge::error::{ConnectError, SendError};
use rfbridge::gateway::ConnectTarget;
use tokio::sync::mpsc;

fn manager(
    connector: Arc<MockConnector>,
    reconnect_interval: Duration,
) -> (ConnectionManager, ConnectionContext, mpsc::Receiver<rfbridge::bridge::Event>) {
    let context = ConnectionContext::new(true);
    let (tx, rx) = mpsc::channel(16);
    let settings = ManagerSettings {
        target: ConnectTarget::Tcp {
            host: "127.0.0.1".into(),
            port: 1,
        },
        reconnect_interval,
        connect_timeout: Duration::from_millis(200),
    };
    (
        ConnectionManager::new(connector, settings, context.clone(), tx),
        context,
        rx,
    )
}

#[tokio::test]
async fn failed_connect_is_retried_after_interval() {
    let connector = MockConnector::new();
    connector.script([Attempt::Refuse, Attempt::Refuse]);
    let (manager, context, _rx) = manager(connector.clone(), Duration::from_millis(50));

    let (handle, first) = manager.start().await;
    assert!(matches!(first, Err(ConnectError::Refused(_))));
    assert_eq!(context.state(), ConnectionState::Disconnected);
    assert!(context.current().is_none());

    within("connected", context.wait_for_state(ConnectionState::Connected)).await;
    assert_eq!(connector.attempts(), 3);
    assert!(context.current().is_some());
    handle.shutdown().await;
}

#[tokio::test]
async fn retry_waits_for_the_interval() {
    let connector = MockConnector::new();
    connector.script([Attempt::Refuse]);
    let (mut manager, _context, _rx) = manager(connector.clone(), Duration::from_millis(300));

    let started = tokio::time::Instant::now();
    assert!(manager.connect().await.is_err());
    let retry_at = manager.retry_at().expect("retry scheduled");
    assert!(retry_at >= started + Duration::from_millis(300));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn hanging_connect_times_out() {
    let connector = MockConnector::new();
    connector.script([Attempt::Hang]);
    let (mut manager, context, _rx) = manager(connector.clone(), Duration::from_secs(10));

    let err = within("connect timeout", manager.connect()).await.unwrap_err();
    assert!(matches!(err, ConnectError::Timeout(_)), "got {:?}", err);
    assert_eq!(context.state(), ConnectionState::Disconnected);
    assert!(manager.retry_at().is_some());
}

#[tokio::test]
async fn stale_disconnect_is_ignored() {
    let connector = MockConnector::new();
    let (manager, context, _rx) = manager(connector.clone(), Duration::from_secs(10));
    let (handle, first) = manager.start().await;
    first.unwrap();

    connector.drop_link(0, "first link lost");
    eventually("second link", || connector.link_count() == 2).await;
    within("connected", context.wait_for_state(ConnectionState::Connected)).await;
    assert!(connector.connection(0).is_closed());

    // Late notice from the replaced link must not tear down the new one.
    connector.drop_link(0, "late duplicate");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.link_count(), 2);
    assert_eq!(context.state(), ConnectionState::Connected);
    assert!(!connector.connection(1).is_closed());
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_suppresses_reconnect() {
    let connector = MockConnector::new();
    let (manager, context, _rx) = manager(connector.clone(), Duration::from_millis(20));
    let (handle, first) = manager.start().await;
    first.unwrap();

    handle.shutdown().await;
    assert!(connector.connection(0).is_closed());
    assert_eq!(context.state(), ConnectionState::Disconnected);

    connector.drop_link(0, "after shutdown");
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn shutdown_without_connection_is_safe() {
    let connector = MockConnector::new();
    connector.script([Attempt::Refuse]);
    let (mut manager, context, _rx) = manager(connector.clone(), Duration::from_millis(20));
    let _ = manager.connect().await;
    manager.shutdown();
    manager.shutdown();
    assert!(manager.is_stopping());
    assert!(manager.retry_at().is_none());
    assert!(context.current().is_none());
    assert!(manager.connect().await.is_ok());
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn sends_fail_while_disconnected_and_recover_after_reconnect() {
    let connector = MockConnector::new();
    let mut config = config_with(&[("d1", DeviceKind::Switch, 1)]);
    config.bridge.automatic_add = false;
    config.gateway.connect_timeout = 1;
    let mut bridge = Bridge::with_connector(config, connector.clone()).unwrap();
    bridge.start().await.unwrap();
    let d1 = bridge.device("d1").unwrap().as_switchable().unwrap().clone();

    d1.turn_on().await.unwrap();
    assert_eq!(connector.connection(0).sent_payloads(), vec!["on"]);

    // Hold the next attempt so the disconnected window is observable; it times out
    // after connect_timeout and the retry after reconnect_interval succeeds.
    connector.script([Attempt::Hang]);
    connector.drop_link(0, "cable pulled");
    eventually("disconnected", || {
        bridge.context().state() != ConnectionState::Connected
    })
    .await;
    assert!(matches!(d1.turn_off().await, Err(SendError::NotConnected)));

    within_secs(5, bridge.context().wait_for_state(ConnectionState::Connected)).await;
    assert_eq!(connector.attempts(), 3);
    d1.turn_off().await.unwrap();
    assert_eq!(connector.latest().sent_payloads(), vec!["off"]);
    assert!(!d1.is_on());
    bridge.shutdown().await;
}

async fn within_secs<T>(secs: u64, fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .expect("timed out")
}
