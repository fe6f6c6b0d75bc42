mod common;

use std::time::Duration;

use common::{config_with, eventually, within, MockConnector};
use rfbridge::bridge::device::Power;
use rfbridge::bridge::{Bridge, Device, DeviceKind, Event, EventClass, Notification, SensorValue};
use rfbridge::config::DeviceConfig;

#[tokio::test]
async fn aliases_route_to_the_same_device() {
    let connector = MockConnector::new();
    let mut config = config_with(&[]);
    config.bridge.automatic_add = false;
    config.devices.insert(
        "newkaku_0000c6c2_1".into(),
        DeviceConfig {
            kind: DeviceKind::Switch,
            aliases: vec!["newkaku_0000c6c2_2".into()],
            ..Default::default()
        },
    );
    let mut bridge = Bridge::with_connector(config, connector.clone()).unwrap();
    bridge.start().await.unwrap();
    let device = bridge.device("newkaku_0000c6c2_1").unwrap();
    let switch = device.as_switchable().unwrap().clone();
    assert!(switch.assumed_state());

    connector.inject(Event::command("newkaku_0000c6c2_2", "allon")).await;
    eventually("alias event applied", || switch.is_on()).await;

    connector.inject(Event::command("newkaku_0000c6c2_1", "off")).await;
    eventually("primary id event applied", || switch.power() == Power::Off).await;
    bridge.shutdown().await;
}

#[tokio::test]
async fn automatic_add_creates_device_and_applies_first_event() {
    let connector = MockConnector::new();
    let mut bridge = Bridge::with_connector(config_with(&[]), connector.clone()).unwrap();
    let mut notifications = bridge.subscribe();
    bridge.start().await.unwrap();

    connector.inject(Event::command("newkaku_00aa_3", "on")).await;
    let added = within("device added", notifications.recv()).await.unwrap();
    assert_eq!(
        added,
        Notification::DeviceAdded {
            device_id: "newkaku_00aa_3".into(),
            class: EventClass::Command
        }
    );
    let changed = within("state change", notifications.recv()).await.unwrap();
    assert!(matches!(changed, Notification::StateChanged { .. }));

    let device = bridge.device("newkaku_00aa_3").expect("added");
    assert!(device.as_switchable().unwrap().is_on());

    // A second event goes to the registered device, not the hook.
    connector.inject(Event::command("newkaku_00aa_3", "off")).await;
    let next = within("second state change", notifications.recv()).await.unwrap();
    assert!(matches!(next, Notification::StateChanged { .. }), "got {:?}", next);
    assert_eq!(bridge.device_ids(), vec!["newkaku_00aa_3".to_string()]);
    bridge.shutdown().await;
}

#[tokio::test]
async fn sensor_events_add_sensor_devices() {
    let connector = MockConnector::new();
    let mut bridge = Bridge::with_connector(config_with(&[]), connector.clone()).unwrap();
    bridge.start().await.unwrap();

    connector
        .inject(Event::sensor(
            "alectov1_0334_temp",
            "temperature",
            SensorValue::Number(21.5),
            Some("°C"),
        ))
        .await;
    eventually("sensor added", || bridge.device("alectov1_0334_temp").is_some()).await;
    match bridge.device("alectov1_0334_temp").unwrap() {
        Device::Sensor(sensor) => {
            assert_eq!(sensor.value(), Some(SensorValue::Number(21.5)));
            assert_eq!(sensor.unit().as_deref(), Some("°C"));
        }
        Device::Switchable(_) => panic!("expected a sensor"),
    }
    bridge.shutdown().await;
}

#[tokio::test]
async fn without_automatic_add_unknown_ids_are_dropped() {
    let connector = MockConnector::new();
    let mut config = config_with(&[]);
    config.bridge.automatic_add = false;
    let mut bridge = Bridge::with_connector(config, connector.clone()).unwrap();
    let mut events = bridge.subscribe_events();
    bridge.start().await.unwrap();

    connector.inject(Event::command("x10_a1", "on")).await;
    let seen = within("tapped event", events.recv()).await.unwrap();
    assert_eq!(seen.id(), Some("x10_a1"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(bridge.device_ids().is_empty());
    bridge.shutdown().await;
}

#[tokio::test]
async fn unclassified_events_reach_no_device() {
    let connector = MockConnector::new();
    let mut bridge = Bridge::with_connector(config_with(&[]), connector.clone()).unwrap();
    let mut events = bridge.subscribe_events();
    bridge.start().await.unwrap();

    connector
        .inject(Event {
            id: Some("banner".into()),
            ..Default::default()
        })
        .await;
    within("tapped event", events.recv()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(bridge.device_ids().is_empty());
    bridge.shutdown().await;
}

#[tokio::test]
async fn fire_event_reports_button_presses() {
    let connector = MockConnector::new();
    let mut config = config_with(&[]);
    config.bridge.automatic_add = false;
    config.devices.insert(
        "kaku_41_1".into(),
        DeviceConfig {
            fire_event: Some(true),
            ..Default::default()
        },
    );
    let mut bridge = Bridge::with_connector(config, connector.clone()).unwrap();
    let mut notifications = bridge.subscribe();
    bridge.start().await.unwrap();

    connector.inject(Event::command("kaku_41_1", "alloff")).await;
    let mut pressed = None;
    for _ in 0..2 {
        if let Notification::ButtonPressed { command, .. } =
            within("notification", notifications.recv()).await.unwrap()
        {
            pressed = Some(command);
        }
    }
    assert_eq!(pressed.as_deref(), Some("alloff"));
    bridge.shutdown().await;
}

#[tokio::test]
async fn removed_device_no_longer_receives_events() {
    let connector = MockConnector::new();
    let mut config = config_with(&[("x10_b2", DeviceKind::Switch, 1)]);
    config.bridge.automatic_add = false;
    let mut bridge = Bridge::with_connector(config, connector.clone()).unwrap();
    bridge.start().await.unwrap();
    let switch = bridge.device("x10_b2").unwrap().as_switchable().unwrap().clone();

    assert!(bridge.remove_device("x10_b2"));
    assert!(!bridge.remove_device("x10_b2"));
    assert!(bridge.registry().lookup(EventClass::Command, "x10_b2").is_empty());

    connector.inject(Event::command("x10_b2", "on")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(switch.assumed_state());
    bridge.shutdown().await;
}
