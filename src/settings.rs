//! Device and profile settings.
//!
//! All writes go through a read-modify-write cycle: fetch the full
//! configuration, change one section, mark it for update and send it back.
//! Sections without the update mark are left untouched by the device.

use tracing::warn;

use crate::calibration::ScreenDimensions;
use crate::proto::{
    ConfigRequest, ConfigResponse, DeviceConfig, FrameRateMode, WireDeviceSettings, WireScreenSize,
};
use crate::session::SessionManager;

/// Which eyes contribute to the gaze signal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EyeSelection {
    Both,
    LeftOnly,
    RightOnly,
}

/// Per-profile settings as stored on the device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UserSettings {
    /// Gaze smoothing strength, 1 (least) to 10 (most).
    pub smoothing: i32,
    pub eyes: EyeSelection,
}

/// Device-wide settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceSettings {
    /// Gaze paused for the device's native output.
    pub pause_native: bool,
    /// Gaze paused for API subscribers.
    pub pause_api_gaze: bool,
    /// Allow the user to unpause by looking into the device camera.
    pub pause_by_gaze_enabled: bool,
    pub frame_rate: FrameRateMode,
}

/// Static device identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub serial: i64,
    pub version: String,
    pub hw_config: i32,
}

impl DeviceInfo {
    /// Placeholder returned when the device cannot be queried.
    pub fn unknown() -> Self {
        Self {
            serial: 0,
            version: "unknown".to_string(),
            hw_config: 0,
        }
    }
}

/// Settings accessor bound to one session.
pub struct Settings {
    session: SessionManager,
}

impl Settings {
    pub(crate) fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// Settings of the active user profile, or `None` when unavailable.
    pub async fn user_settings(&self) -> Option<UserSettings> {
        let config = self.fetch_configuration().await?;
        let user = config.user?;
        let eyes = match (user.left_eye_only, user.right_eye_only) {
            (true, false) => EyeSelection::LeftOnly,
            (false, true) => EyeSelection::RightOnly,
            _ => EyeSelection::Both,
        };
        Some(UserSettings {
            smoothing: user.smoothing,
            eyes,
        })
    }

    /// Device-wide settings, or `None` when unavailable.
    pub async fn device_settings(&self) -> Option<DeviceSettings> {
        let config = self.fetch_configuration().await?;
        let device = config.device?;
        Some(DeviceSettings {
            pause_native: device.pause_native,
            pause_api_gaze: device.pause_api_gaze,
            pause_by_gaze_enabled: device.enable_pause_by_gaze,
            frame_rate: device.framerate,
        })
    }

    /// Physical screen size configured on the device, or `None` when
    /// unavailable.
    pub async fn screen_size(&self) -> Option<ScreenDimensions> {
        let config = self.fetch_configuration().await?;
        let screen = config.screen?;
        Some(ScreenDimensions {
            width_mm: screen.width_mm,
            height_mm: screen.height_mm,
        })
    }

    /// Serial number, firmware version and hardware configuration.
    ///
    /// Returns [`DeviceInfo::unknown`] when the device cannot be queried.
    pub async fn device_info(&self) -> DeviceInfo {
        let Ok(transport) = self.session.current_transport() else {
            return DeviceInfo::unknown();
        };
        match transport.call(ConfigRequest::GetDeviceInfo).await {
            Ok(ConfigResponse::DeviceInfo {
                serial,
                version,
                hw_config,
            }) => DeviceInfo {
                serial,
                version,
                hw_config,
            },
            Ok(other) => {
                warn!(?other, "unexpected response to device info request");
                DeviceInfo::unknown()
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch device info");
                DeviceInfo::unknown()
            }
        }
    }

    /// Stores the physical screen size.
    pub async fn set_screen_size(&self, screen: ScreenDimensions) -> bool {
        self.write_configuration(DeviceConfig {
            screen: Some(WireScreenSize {
                width_mm: screen.width_mm,
                height_mm: screen.height_mm,
            }),
            ..DeviceConfig::default()
        })
        .await
    }

    /// Sets the gaze smoothing strength for the active profile.
    ///
    /// Values are clamped to the device range 1 to 10.
    pub async fn set_smoothing(&self, smoothing: i32) -> bool {
        let mut config = match self.fetch_configuration().await {
            Some(config) => config,
            None => return false,
        };
        let mut user = config.user.unwrap_or_default();
        user.smoothing = smoothing.clamp(1, 10);
        user.update = true;
        config.user = Some(user);
        config.screen = None;
        config.device = None;
        self.write_configuration(config).await
    }

    /// Selects which eyes contribute to the gaze signal.
    pub async fn select_eyes(&self, eyes: EyeSelection) -> bool {
        let mut config = match self.fetch_configuration().await {
            Some(config) => config,
            None => return false,
        };
        let mut user = config.user.unwrap_or_default();
        user.left_eye_only = eyes == EyeSelection::LeftOnly;
        user.right_eye_only = eyes == EyeSelection::RightOnly;
        user.update = true;
        config.user = Some(user);
        config.screen = None;
        config.device = None;
        self.write_configuration(config).await
    }

    /// Pauses or resumes the device's native gaze output.
    pub async fn set_pause_native(&self, paused: bool) -> bool {
        self.modify_device_settings(|device| device.pause_native = paused)
            .await
    }

    /// Pauses or resumes gaze delivery to API subscribers.
    pub async fn set_pause_api_gaze(&self, paused: bool) -> bool {
        self.modify_device_settings(|device| device.pause_api_gaze = paused)
            .await
    }

    /// Enables or disables unpausing by looking into the device camera.
    pub async fn set_pause_by_gaze(&self, enabled: bool) -> bool {
        self.modify_device_settings(|device| device.enable_pause_by_gaze = enabled)
            .await
    }

    /// Sets the device frame rate.
    pub async fn set_frame_rate(&self, frame_rate: FrameRateMode) -> bool {
        self.modify_device_settings(|device| device.framerate = frame_rate)
            .await
    }

    async fn modify_device_settings<M>(&self, modify: M) -> bool
    where
        M: FnOnce(&mut WireDeviceSettings),
    {
        let mut config = match self.fetch_configuration().await {
            Some(config) => config,
            None => return false,
        };
        let mut device = config.device.unwrap_or_default();
        modify(&mut device);
        device.update = true;
        config.device = Some(device);
        config.screen = None;
        config.user = None;
        self.write_configuration(config).await
    }

    async fn fetch_configuration(&self) -> Option<DeviceConfig> {
        let transport = self.session.current_transport().ok()?;
        match transport.call(ConfigRequest::GetConfiguration).await {
            Ok(ConfigResponse::Configuration(config)) => Some(config),
            Ok(other) => {
                warn!(?other, "unexpected response to configuration request");
                None
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch device configuration");
                None
            }
        }
    }

    async fn write_configuration(&self, config: DeviceConfig) -> bool {
        let Ok(transport) = self.session.current_transport() else {
            return false;
        };
        match transport.call(ConfigRequest::SetConfiguration(config)).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "failed to write device configuration");
                false
            }
        }
    }
}
