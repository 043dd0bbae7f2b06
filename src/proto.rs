//! Typed wire messages exchanged with the eye tracker.
//!
//! These are the request and response shapes carried by the transport
//! capability. Encoding is the transport's concern; the SDK only deals in
//! these plain structures.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Selects one continuous data feed when opening a server stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feed", rename_all = "snake_case")]
pub enum FeedRequest {
    /// Gaze samples; `unfiltered` bypasses the device-side smoothing filter.
    Gaze { unfiltered: bool },
    /// Head/eye positioning samples.
    Position,
    /// Raw camera frames.
    Video,
    /// User-profile change notifications. With `stay_open = false` the device
    /// sends the current profile list and closes the stream.
    Users { stay_open: bool },
}

/// Normalized 2-D point as sent by the device.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// One gaze sample from the gaze feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    /// Microseconds since tracking started.
    pub timestamp_us: i64,
    pub gaze_point: WirePoint,
    pub left_eye: WirePoint,
    pub right_eye: WirePoint,
    pub fixation: bool,
    pub user_present: bool,
    pub left_eye_open: bool,
    pub right_eye_open: bool,
}

/// One positioning sample from the position feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub depth_mm: f64,
    pub left_eye_pos: WirePoint,
    pub right_eye_pos: WirePoint,
    pub left_eye_closed: bool,
    pub right_eye_closed: bool,
    pub gaze_is_paused: bool,
}

/// One raw camera frame from the video feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// 1, 3 or 4 depending on the image format.
    pub channels: u32,
    pub data: Vec<u8>,
    pub timestamp: i64,
}

/// One user-profile record from the users feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i32,
    pub username: String,
    pub is_active: bool,
    /// 16-byte profile GUID; empty or malformed decodes to the nil UUID.
    pub uid: Vec<u8>,
}

/// Item carried by a feed server stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum FeedItem {
    Gaze(GazeSample),
    Position(PositionSample),
    Video(VideoFrame),
    User(UserRecord),
}

/// Calibration point-count mode.
///
/// `Zero` resets the device to a default calibration; use it only when the
/// user cannot focus calibration points.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointCountMode {
    #[default]
    Nine,
    One,
    Five,
    Thirteen,
    Zero,
}

/// Display phase of a calibration point.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Show,
    Collecting,
    Hide,
}

/// Outbound control message on the calibration duplex stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum CalibrationControl {
    Start {
        points: PointCountMode,
        screen_width_mm: f64,
        screen_height_mm: f64,
        fixation_based: bool,
        multipoint: bool,
        manual: bool,
        /// Send-time unix timestamp in seconds.
        timestamp: i64,
    },
    Stop,
    Improve {
        point_indices: Vec<u32>,
        /// Send-time unix timestamp in seconds.
        timestamp: i64,
    },
    /// Advances past a shown point in manual calibration mode.
    Confirm,
}

/// Calibration result payload carried by a terminal status message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireCalibrationResult {
    /// Per-point quality scores, 0-100, aligned to point order.
    pub per_point: Vec<i32>,
    pub per_point_left: Vec<i32>,
    pub per_point_right: Vec<i32>,
    pub overall: i32,
    pub can_improve: bool,
    /// 16-byte calibration id; empty or malformed decodes to the nil UUID.
    pub id: Vec<u8>,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Current target point on the calibration response stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireCalibrationPoint {
    pub sequence: u32,
    pub position: WirePoint,
    pub state: CalibrationPhase,
}

/// Inbound message on the calibration duplex stream.
///
/// A terminal status without a result payload carries no usable data and is
/// dropped by the controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CalibrationStatus {
    PointUpdate { point: WireCalibrationPoint },
    Succeeded { result: Option<WireCalibrationResult> },
    Failed { result: Option<WireCalibrationResult> },
}

/// Device frame rate setting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRateMode {
    #[default]
    Fps30,
    Fps60,
    Fps90,
    Fps120,
}

/// Physical screen size section of the device configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireScreenSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Per-profile settings section of the device configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireUserSettings {
    /// Gaze smoothing strength, 1 (least) to 10 (most).
    pub smoothing: i32,
    pub left_eye_only: bool,
    pub right_eye_only: bool,
    /// Set when writing back a modified section.
    pub update: bool,
}

/// Device-wide settings section of the device configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDeviceSettings {
    pub pause_native: bool,
    pub pause_api_gaze: bool,
    pub enable_pause_by_gaze: bool,
    pub framerate: FrameRateMode,
    /// Set when writing back a modified section.
    pub update: bool,
}

/// Full device configuration; absent sections are left untouched on write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen: Option<WireScreenSize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<WireUserSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<WireDeviceSettings>,
}

/// User-profile management operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserOperation {
    Create,
    Update,
    Delete,
    /// Makes the profile the active one.
    Select,
}

/// One-shot request issued through [`Transport::call`].
///
/// [`Transport::call`]: crate::transport::Transport::call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ConfigRequest {
    GetConfiguration,
    SetConfiguration(DeviceConfig),
    ManageUser {
        user_id: i32,
        username: String,
        operation: UserOperation,
    },
    GetDeviceInfo,
    GetLastCalibrationResult,
}

/// Response to a [`ConfigRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum ConfigResponse {
    Configuration(DeviceConfig),
    UserProfile {
        success: bool,
        user: Option<UserRecord>,
    },
    DeviceInfo {
        serial: i64,
        version: String,
        hw_config: i32,
    },
    LastCalibration(Option<WireCalibrationResult>),
}

/// Decodes a device-sent GUID, falling back to nil on bad input.
pub(crate) fn uuid_from_bytes(bytes: &[u8]) -> Uuid {
    Uuid::from_slice(bytes).unwrap_or(Uuid::nil())
}

/// Unix timestamp in seconds, used for send-time stamps on control messages.
pub(crate) fn unix_now_secs() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
