//! Top-level device handle.
//!
//! [`EyeTracker`] bundles the session manager with the four feed hubs, the
//! calibration controller and the settings and profile accessors, and wires
//! the reconnect signal to every component that owns streams.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::calibration::CalibrationController;
use crate::events::{GazeFeed, PositionFeed, UserFeed, VideoFeed};
use crate::hub::FeedHub;
use crate::presence::DevicePresence;
use crate::session::{Reconnect, SessionManager, SessionState, DEFAULT_CONNECT_TIMEOUT};
use crate::settings::Settings;
use crate::transport::Connector;
use crate::users::Users;

/// Well-known device endpoint for transports that dial by hostname.
pub const DEFAULT_ENDPOINT: &str = "eyetuitive.local:12340";

/// Handle to one eye tracker.
pub struct EyeTracker {
    session: SessionManager,
    gaze: Arc<FeedHub<GazeFeed>>,
    position: Arc<FeedHub<PositionFeed>>,
    video: Arc<FeedHub<VideoFeed>>,
    calibration: Arc<CalibrationController>,
    settings: Settings,
    users: Users,
}

impl EyeTracker {
    /// Builds a handle around a transport connector.
    ///
    /// Nothing is dialed until [`connect`] is called.
    ///
    /// [`connect`]: EyeTracker::connect
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let session = SessionManager::new(connector);

        let gaze = Arc::new(FeedHub::<GazeFeed>::new(session.clone()));
        let position = Arc::new(FeedHub::<PositionFeed>::new(session.clone()));
        let video = Arc::new(FeedHub::<VideoFeed>::new(session.clone()));
        let user_changes = Arc::new(FeedHub::<UserFeed>::new(session.clone()));
        let calibration = Arc::new(CalibrationController::new(session.clone()));

        session.register_reconnect(Arc::downgrade(&gaze) as Weak<dyn Reconnect>);
        session.register_reconnect(Arc::downgrade(&position) as Weak<dyn Reconnect>);
        session.register_reconnect(Arc::downgrade(&video) as Weak<dyn Reconnect>);
        session.register_reconnect(Arc::downgrade(&user_changes) as Weak<dyn Reconnect>);
        session.register_reconnect(Arc::downgrade(&calibration) as Weak<dyn Reconnect>);

        Self {
            settings: Settings::new(session.clone()),
            users: Users::new(session.clone(), user_changes),
            session,
            gaze,
            position,
            video,
            calibration,
        }
    }

    /// Connects with the default per-attempt timeout.
    pub async fn connect(&self) -> bool {
        self.session.connect(DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connects with an explicit per-attempt timeout.
    pub async fn connect_with_timeout(&self, timeout: Duration) -> bool {
        self.session.connect(timeout).await
    }

    /// Tears the session down. The handle cannot be reused afterwards.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Starts watching a device-presence source for hotplug reconnects.
    pub fn attach_presence(&self, presence: Arc<dyn DevicePresence>) {
        self.session.attach_presence(presence);
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The gaze feed hub.
    pub fn gaze(&self) -> &FeedHub<GazeFeed> {
        &self.gaze
    }

    /// The head/eye positioning feed hub.
    pub fn position(&self) -> &FeedHub<PositionFeed> {
        &self.position
    }

    /// The raw video feed hub.
    pub fn video(&self) -> &FeedHub<VideoFeed> {
        &self.video
    }

    /// The calibration controller.
    pub fn calibration(&self) -> &CalibrationController {
        &self.calibration
    }

    /// Device and profile settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// User-profile management.
    pub fn users(&self) -> &Users {
        &self.users
    }
}
