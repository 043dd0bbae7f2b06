//! Settings surface: read-modify-write semantics and device info fallback.

mod common;

use eyetuitive_sdk::calibration::ScreenDimensions;
use eyetuitive_sdk::device::EyeTracker;
use eyetuitive_sdk::proto::{
    ConfigRequest, ConfigResponse, DeviceConfig, WireDeviceSettings, WireScreenSize,
    WireUserSettings,
};
use eyetuitive_sdk::settings::{DeviceInfo, EyeSelection};

use common::MockConnector;

fn stored_config() -> DeviceConfig {
    DeviceConfig {
        screen: Some(WireScreenSize {
            width_mm: 527.0,
            height_mm: 296.0,
        }),
        user: Some(WireUserSettings {
            smoothing: 5,
            left_eye_only: false,
            right_eye_only: false,
            update: false,
        }),
        device: Some(WireDeviceSettings::default()),
    }
}

#[tokio::test(start_paused = true)]
async fn pause_write_touches_only_the_device_section() {
    let connector = MockConnector::new();
    let tracker = EyeTracker::new(connector.clone());
    assert!(tracker.connect().await);

    connector
        .transport()
        .plan_call(Ok(ConfigResponse::Configuration(stored_config())));
    connector
        .transport()
        .plan_call(Ok(ConfigResponse::Configuration(DeviceConfig::default())));

    assert!(tracker.settings().set_pause_native(true).await);

    let calls = connector.transport().calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ConfigRequest::GetConfiguration);
    let ConfigRequest::SetConfiguration(written) = &calls[1] else {
        panic!("expected a configuration write, got {:?}", calls[1]);
    };
    let device = written.device.expect("device section");
    assert!(device.pause_native);
    assert!(device.update);
    assert!(written.screen.is_none());
    assert!(written.user.is_none());
}

#[tokio::test(start_paused = true)]
async fn smoothing_is_clamped_to_the_device_range() {
    let connector = MockConnector::new();
    let tracker = EyeTracker::new(connector.clone());
    assert!(tracker.connect().await);

    connector
        .transport()
        .plan_call(Ok(ConfigResponse::Configuration(stored_config())));
    connector
        .transport()
        .plan_call(Ok(ConfigResponse::Configuration(DeviceConfig::default())));

    assert!(tracker.settings().set_smoothing(42).await);

    let calls = connector.transport().calls();
    let ConfigRequest::SetConfiguration(written) = &calls[1] else {
        panic!("expected a configuration write, got {:?}", calls[1]);
    };
    let user = written.user.expect("user section");
    assert_eq!(user.smoothing, 10);
    assert!(user.update);
}

#[tokio::test(start_paused = true)]
async fn user_settings_map_the_eye_selection() {
    let connector = MockConnector::new();
    let tracker = EyeTracker::new(connector.clone());
    assert!(tracker.connect().await);

    let mut config = stored_config();
    config.user = Some(WireUserSettings {
        smoothing: 3,
        left_eye_only: true,
        right_eye_only: false,
        update: false,
    });
    connector
        .transport()
        .plan_call(Ok(ConfigResponse::Configuration(config)));

    let settings = tracker
        .settings()
        .user_settings()
        .await
        .expect("user settings");
    assert_eq!(settings.smoothing, 3);
    assert_eq!(settings.eyes, EyeSelection::LeftOnly);
}

#[tokio::test(start_paused = true)]
async fn screen_size_reads_the_screen_section() {
    let connector = MockConnector::new();
    let tracker = EyeTracker::new(connector.clone());
    assert!(tracker.connect().await);

    connector
        .transport()
        .plan_call(Ok(ConfigResponse::Configuration(stored_config())));

    assert_eq!(
        tracker.settings().screen_size().await,
        Some(ScreenDimensions {
            width_mm: 527.0,
            height_mm: 296.0,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn device_info_falls_back_to_unknown() {
    let connector = MockConnector::new();
    let tracker = EyeTracker::new(connector.clone());

    // Not connected.
    assert_eq!(tracker.settings().device_info().await, DeviceInfo::unknown());

    assert!(tracker.connect().await);

    // Connected but the request fails.
    assert_eq!(tracker.settings().device_info().await, DeviceInfo::unknown());

    connector.transport().plan_call(Ok(ConfigResponse::DeviceInfo {
        serial: 4711,
        version: "2.3.1".to_string(),
        hw_config: 1,
    }));
    let info = tracker.settings().device_info().await;
    assert_eq!(info.serial, 4711);
    assert_eq!(info.version, "2.3.1");
}

#[tokio::test(start_paused = true)]
async fn writes_fail_gracefully_when_disconnected() {
    let connector = MockConnector::new();
    let tracker = EyeTracker::new(connector.clone());

    assert!(!tracker.settings().set_pause_native(true).await);
    assert!(tracker.settings().user_settings().await.is_none());
    assert!(connector.transport().calls().is_empty());
}
