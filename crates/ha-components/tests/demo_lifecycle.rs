//! Polling lifecycle of a demo entry, end to end through the host

mod common;

use common::{settle, timeout, FakeDevice, Harness, SERIAL};
use ha_components::demo::{ClientError, DOMAIN};
use ha_config_entries::{ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate};
use ha_coordinator::ErrorKind;
use ha_core::events::STATE_CHANGED;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

const BATTERY: &str = "sensor.thermostat_battery";

/// Just past one 15 s scan interval
const ONE_TICK: Duration = Duration::from_millis(15_100);

#[tokio::test(start_paused = true)]
async fn test_setup_publishes_every_entity() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();

    let mut published = h.published();
    published.sort();
    assert_eq!(
        published,
        vec![
            "binary_sensor.thermostat_charging",
            "button.thermostat_identify",
            "number.thermostat_target_temperature",
            "sensor.thermostat_battery",
            "sensor.thermostat_temperature",
            "switch.thermostat_power",
        ]
    );
    assert_eq!(h.state(BATTERY).as_deref(), Some("42"));
    assert_eq!(h.state("sensor.thermostat_temperature").as_deref(), Some("21.5"));
    assert_eq!(h.state("binary_sensor.thermostat_charging").as_deref(), Some("off"));
    assert_eq!(h.state("switch.thermostat_power").as_deref(), Some("off"));
    assert_eq!(h.state("number.thermostat_target_temperature").as_deref(), Some("21"));

    let battery = h.hass.states.get(BATTERY).unwrap();
    assert_eq!(battery.attributes["unit_of_measurement"], "%");
    assert_eq!(battery.attributes["device_class"], "battery");

    let runtime = h.runtime(&entry_id).unwrap();
    assert_eq!(runtime.details.serial, common::SERIAL);
    assert_eq!(runtime.coordinator.listener_count(), 6);
    assert!(runtime.coordinator.is_polling());
    assert_eq!(
        h.hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::Loaded
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_listener_notified_once_per_refresh() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let runtime = h.runtime(&entry_id).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let other = Arc::new(Mutex::new(0));
    {
        let seen = Arc::clone(&seen);
        let data = runtime.coordinator.subscribe_data();
        runtime.coordinator.add_listener(move || {
            let snapshot = data.borrow().clone();
            seen.lock().unwrap().push(snapshot);
        });
        let other = Arc::clone(&other);
        runtime.coordinator.add_listener(move || *other.lock().unwrap() += 1);
    }

    // Stay clear of the tick deadlines
    sleep(Duration::from_millis(100)).await;
    for (tick, level) in [40u8, 39, 38].into_iter().enumerate() {
        h.device.set_battery(Some(level));
        sleep(Duration::from_secs(15)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), tick + 1);
        assert_eq!(*other.lock().unwrap(), tick + 1);

        let snapshot = seen[tick].as_ref().expect("snapshot after a successful refresh");
        assert_eq!(**snapshot, h.device.status());
        assert!(snapshot.temperature.is_some() && snapshot.charging.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_battery_goes_unavailable_then_recovers() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;

    // Tick 1
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    assert_eq!(h.state(BATTERY).as_deref(), Some("42"));
    let runtime = h.runtime(&entry_id).unwrap();
    let battery = runtime.platform.get(BATTERY).unwrap();

    // Tick 2: connectivity error
    h.device.fail_next(timeout());
    sleep(ONE_TICK).await;

    let rendered = battery.render();
    assert_eq!(rendered.value, "42");
    assert!(!rendered.available);
    assert_eq!(h.state(BATTERY).as_deref(), Some("unavailable"));
    assert_eq!(runtime.coordinator.data().unwrap().battery, Some(42));
    assert_eq!(
        runtime.coordinator.last_error().unwrap().kind(),
        ErrorKind::Transient
    );
    // Plain connectivity trouble keeps polling and asks nobody for credentials
    assert!(runtime.coordinator.is_polling());
    assert!(h.hass.config_entries.flows_in_progress().is_empty());

    // Tick 3
    h.device.set_battery(Some(41));
    sleep(Duration::from_secs(15)).await;

    let rendered = battery.render();
    assert_eq!(rendered.value, "41");
    assert!(rendered.available);
    assert_eq!(h.state(BATTERY).as_deref(), Some("41"));
    assert_eq!(h.device.fetch_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_missing_field_makes_only_that_entity_unavailable() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();

    h.device.set_battery(None);
    sleep(ONE_TICK).await;

    assert_eq!(h.state(BATTERY).as_deref(), Some("unavailable"));
    assert_eq!(h.state("sensor.thermostat_temperature").as_deref(), Some("21.5"));
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_requests_reauth_and_stops_polling() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let runtime = h.runtime(&entry_id).unwrap();

    h.device.change_password("correct horse");
    sleep(ONE_TICK).await;
    settle().await;

    let error = runtime.coordinator.last_error().unwrap();
    assert_eq!(error.kind(), ErrorKind::AuthRequired);
    assert!(!runtime.coordinator.is_polling());
    assert_eq!(h.state(BATTERY).as_deref(), Some("unavailable"));

    let flows = h.hass.config_entries.flows_in_progress();
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].source, ConfigEntrySource::Reauth);
    assert_eq!(flows[0].entry_id.as_deref(), Some(entry_id.as_str()));
    assert_eq!(flows[0].step_id, "reauth_confirm");

    // No retry with the stale password
    let fetches = h.device.fetch_count();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.device.fetch_count(), fetches);
    assert_eq!(
        h.hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::Loaded
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_refresh_creates_no_entities() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;

    h.device.fail_next(timeout());
    h.hass.config_entries.setup(&entry_id).await.unwrap_err();

    assert_eq!(
        h.hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::SetupRetry
    );
    assert!(h.published().is_empty());
    assert!(h.runtime(&entry_id).is_none());
    assert_eq!(h.device.disconnects.load(Ordering::SeqCst), 1);

    // Automatic retry after 5 s
    sleep(Duration::from_millis(5_200)).await;
    settle().await;

    assert_eq!(
        h.hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::Loaded
    );
    let published = h.published();
    assert_eq!(published.len(), 6);
    assert!(published.iter().all(|id| !id.ends_with("_2")));
    assert_eq!(h.runtime(&entry_id).unwrap().coordinator.listener_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_password_at_setup_starts_reauth() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.device.change_password("changed on the device");

    h.hass.config_entries.setup(&entry_id).await.unwrap_err();
    settle().await;

    let entry = h.hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert!(h.published().is_empty());
    assert_eq!(h.hass.config_entries.flows_in_progress().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unload_removes_listeners_and_entities() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let runtime = h.runtime(&entry_id).unwrap();

    assert!(h.hass.config_entries.unload(&entry_id).await.unwrap());

    assert_eq!(
        h.hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::NotLoaded
    );
    assert_eq!(runtime.coordinator.listener_count(), 0);
    assert!(runtime.coordinator.is_shut_down());
    assert!(runtime.platform.is_empty());
    assert!(h.published().is_empty());
    assert!(h.runtime(&entry_id).is_none());
    assert_eq!(h.device.disconnects.load(Ordering::SeqCst), 1);

    // A stray refresh through a leftover handle touches nothing
    let mut changes = h.hass.bus.subscribe(STATE_CHANGED);
    let fetches = h.device.fetch_count();
    let _ = runtime.coordinator.refresh().await;
    runtime.coordinator.set_updated_data(h.device.status());
    sleep(Duration::from_secs(60)).await;

    assert!(changes.try_recv().is_err());
    assert!(h.published().is_empty());
    assert_eq!(h.device.fetch_count(), fetches);
}

#[tokio::test(start_paused = true)]
async fn test_manual_refreshes_coalesce() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let coordinator = h.runtime(&entry_id).unwrap().coordinator.clone();

    h.device.set_fetch_delay(Duration::from_millis(2_500));
    let (a, b, c) = tokio::join!(
        coordinator.refresh(),
        coordinator.refresh(),
        coordinator.refresh()
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    assert_eq!(h.device.fetch_count(), 2);
    assert_eq!(h.device.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fast_ticks_never_overlap() {
    let h = Harness::with_integration(FakeDevice::new(), |integration| {
        integration.with_scan_interval(Duration::from_secs(1))
    });
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();

    // Each fetch now outlasts two ticks
    h.device.set_fetch_delay(Duration::from_millis(2_500));
    sleep(Duration::from_millis(10_500)).await;

    assert_eq!(h.device.max_in_flight.load(Ordering::SeqCst), 1);
    let polled = h.device.fetch_count() - 1;
    assert!((3..=4).contains(&polled), "{polled} scheduled fetches");
}

#[tokio::test(start_paused = true)]
async fn test_disabled_polling_only_refreshes_on_demand() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass
        .config_entries
        .update(
            &entry_id,
            ConfigEntryUpdate::new().pref_disable_polling(true),
        )
        .await
        .unwrap();
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let runtime = h.runtime(&entry_id).unwrap();

    assert!(runtime.coordinator.update_interval().is_none());
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.device.fetch_count(), 1);

    runtime.coordinator.refresh().await.unwrap();
    assert_eq!(h.device.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_refresh_needs_reconfiguration() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let runtime = h.runtime(&entry_id).unwrap();

    h.device
        .fail_next(ClientError::Rejected("entry revoked by the installer".into()));
    sleep(ONE_TICK).await;
    settle().await;

    assert_eq!(
        runtime.coordinator.last_error().unwrap().kind(),
        ErrorKind::Fatal
    );
    let entry = h.hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert_eq!(
        entry.reason.as_deref(),
        Some("device rejected the command: entry revoked by the installer")
    );
    assert!(runtime.coordinator.is_shut_down());
    assert!(h.published().is_empty());
    assert!(h.runtime(&entry_id).is_none());
    assert_eq!(h.device.disconnects.load(Ordering::SeqCst), 1);
    // Not a credentials problem
    assert!(h.hass.config_entries.flows_in_progress().is_empty());

    let fetches = h.device.fetch_count();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.device.fetch_count(), fetches);

    // Reconfigured on the device side; a manual setup brings it back
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    assert_eq!(h.state(BATTERY).as_deref(), Some("42"));
}

#[tokio::test(start_paused = true)]
async fn test_garbled_response_keeps_polling() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let runtime = h.runtime(&entry_id).unwrap();

    h.device.fail_next(ClientError::Protocol("truncated frame".into()));
    sleep(ONE_TICK).await;
    settle().await;

    assert_eq!(
        runtime.coordinator.last_error().unwrap().kind(),
        ErrorKind::Transient
    );
    assert!(runtime.coordinator.is_polling());
    assert_eq!(h.state(BATTERY).as_deref(), Some("unavailable"));
    assert_eq!(
        h.hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::Loaded
    );

    sleep(Duration::from_secs(15)).await;
    assert_eq!(h.state(BATTERY).as_deref(), Some("42"));
}

#[tokio::test(start_paused = true)]
async fn test_entity_ids_survive_title_change() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    let mut before = h.published();
    before.sort();

    h.hass
        .config_entries
        .update(&entry_id, ConfigEntryUpdate::new().title("Hallway"))
        .await
        .unwrap();
    h.hass.config_entries.reload(&entry_id).await.unwrap();

    let mut after = h.published();
    after.sort();
    assert_eq!(after, before);
    let battery = h
        .hass
        .registries
        .entities
        .get_entity_id("sensor", DOMAIN, &format!("{}_battery", SERIAL))
        .unwrap();
    assert_eq!(battery.to_string(), BATTERY);
    assert_eq!(h.state(BATTERY).as_deref(), Some("42"));

    // One device, renamed, owning all six entities
    let device = h
        .hass
        .registries
        .devices
        .get_by_identifier(DOMAIN, SERIAL)
        .unwrap();
    assert_eq!(device.name.as_deref(), Some("Hallway"));
    assert_eq!(device.model.as_deref(), Some("T-100"));
    assert_eq!(h.hass.registries.devices.len(), 1);
    assert_eq!(
        h.hass.registries.entities.get_by_device_id(&device.id).len(),
        6
    );
}

#[tokio::test(start_paused = true)]
async fn test_remove_entry_clears_registries() {
    let h = Harness::new();
    let entry_id = h.add_entry().await;
    h.hass.config_entries.setup(&entry_id).await.unwrap();
    assert_eq!(
        h.hass.registries.entities.get_by_config_entry_id(&entry_id).len(),
        6
    );

    h.hass.config_entries.remove(&entry_id).await.unwrap();

    assert!(h.published().is_empty());
    assert!(h.hass.registries.entities.is_empty());
    assert!(h.hass.registries.devices.is_empty());
}
