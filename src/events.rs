//! Public event surface for the data feeds.
//!
//! Application callbacks only ever see these normalized shapes; transport
//! errors and partially-filled wire messages never cross this boundary.

use std::fmt;

use tracing::warn;
use uuid::Uuid;

use crate::hub::Feed;
use crate::proto::{uuid_from_bytes, FeedItem, FeedRequest, WirePoint};

/// Normalized point in 2-D space, both coordinates in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormedPoint {
    pub x: f64,
    pub y: f64,
    /// Confidence of the point; `1.0` when the device sent none.
    pub confidence: f64,
    /// True if the device sent a confidence value.
    pub has_confidence: bool,
}

impl NormedPoint {
    /// Point without a confidence value.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            confidence: 1.0,
            has_confidence: false,
        }
    }

    /// Point with an explicit confidence value.
    pub fn with_confidence(x: f64, y: f64, confidence: f64) -> Self {
        Self {
            x,
            y,
            confidence,
            has_confidence: true,
        }
    }
}

impl Default for NormedPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl fmt::Display for NormedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<WirePoint> for NormedPoint {
    fn from(point: WirePoint) -> Self {
        match point.confidence {
            Some(confidence) => Self::with_confidence(point.x, point.y, confidence),
            None => Self::new(point.x, point.y),
        }
    }
}

/// One gaze sample delivered to gaze subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct GazeEvent {
    /// Microseconds since tracking started.
    pub timestamp_us: i64,
    /// Combined gaze point, or the single available eye if the other is
    /// closed or disabled.
    pub gaze_point: NormedPoint,
    pub left_eye: NormedPoint,
    pub right_eye: NormedPoint,
    pub fixation: bool,
    /// The device sends one sample with `false` and empty data when the user
    /// leaves, then nothing until redetection.
    pub user_present: bool,
    pub left_eye_open: bool,
    pub right_eye_open: bool,
}

/// One positioning sample delivered to position subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionEvent {
    /// Distance from the camera in millimeters.
    pub depth_mm: f64,
    pub left_eye_pos: NormedPoint,
    pub right_eye_pos: NormedPoint,
    pub is_left_eye_open: bool,
    pub is_right_eye_open: bool,
    /// True while gaze is paused; the user unpauses by looking into the
    /// device camera.
    pub gaze_is_paused: bool,
}

/// One raw camera frame delivered to video subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameEvent {
    pub width: u32,
    pub height: u32,
    /// 1, 3 or 4 depending on the image format.
    pub channels: u32,
    /// Raw pixel data, `width * height * channels` bytes.
    pub data: Vec<u8>,
    pub timestamp: i64,
}

/// One user-profile change delivered to user subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct UserEvent {
    pub user_id: i32,
    pub user_name: String,
    pub active: bool,
    pub user_guid: Uuid,
}

/// The gaze feed; the only feed that honors the unfiltered flag.
pub enum GazeFeed {}

impl Feed for GazeFeed {
    type Event = GazeEvent;
    const NAME: &'static str = "gaze";

    fn request(unfiltered: bool) -> FeedRequest {
        FeedRequest::Gaze { unfiltered }
    }

    fn normalize(item: FeedItem) -> Option<GazeEvent> {
        let FeedItem::Gaze(sample) = item else {
            return None;
        };
        Some(GazeEvent {
            timestamp_us: sample.timestamp_us,
            gaze_point: sample.gaze_point.into(),
            left_eye: sample.left_eye.into(),
            right_eye: sample.right_eye.into(),
            fixation: sample.fixation,
            user_present: sample.user_present,
            left_eye_open: sample.left_eye_open,
            right_eye_open: sample.right_eye_open,
        })
    }
}

/// The head/eye positioning feed.
pub enum PositionFeed {}

impl Feed for PositionFeed {
    type Event = PositionEvent;
    const NAME: &'static str = "position";

    fn request(_unfiltered: bool) -> FeedRequest {
        FeedRequest::Position
    }

    fn normalize(item: FeedItem) -> Option<PositionEvent> {
        let FeedItem::Position(sample) = item else {
            return None;
        };
        Some(PositionEvent {
            depth_mm: sample.depth_mm,
            left_eye_pos: sample.left_eye_pos.into(),
            right_eye_pos: sample.right_eye_pos.into(),
            is_left_eye_open: !sample.left_eye_closed,
            is_right_eye_open: !sample.right_eye_closed,
            gaze_is_paused: sample.gaze_is_paused,
        })
    }
}

/// The raw video feed.
pub enum VideoFeed {}

impl Feed for VideoFeed {
    type Event = FrameEvent;
    const NAME: &'static str = "video";

    fn request(_unfiltered: bool) -> FeedRequest {
        FeedRequest::Video
    }

    fn normalize(item: FeedItem) -> Option<FrameEvent> {
        let FeedItem::Video(frame) = item else {
            return None;
        };
        let expected = frame.width as usize * frame.height as usize * frame.channels as usize;
        if frame.data.len() != expected {
            warn!(
                width = frame.width,
                height = frame.height,
                channels = frame.channels,
                bytes = frame.data.len(),
                "dropping malformed video frame"
            );
            return None;
        }
        Some(FrameEvent {
            width: frame.width,
            height: frame.height,
            channels: frame.channels,
            data: frame.data,
            timestamp: frame.timestamp,
        })
    }
}

/// The live user-profile change feed.
pub enum UserFeed {}

impl Feed for UserFeed {
    type Event = UserEvent;
    const NAME: &'static str = "users";

    fn request(_unfiltered: bool) -> FeedRequest {
        FeedRequest::Users { stay_open: true }
    }

    fn normalize(item: FeedItem) -> Option<UserEvent> {
        let FeedItem::User(record) = item else {
            return None;
        };
        Some(UserEvent {
            user_id: record.user_id,
            user_name: record.username,
            active: record.is_active,
            user_guid: uuid_from_bytes(&record.uid),
        })
    }
}
