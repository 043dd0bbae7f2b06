//! Device-presence collaborator.
//!
//! Presence detection itself is platform-specific and lives outside this
//! crate; the SDK only consumes a boolean signal plus a change feed. The
//! session manager uses the change feed to attempt a single handshake when
//! the device reappears.

use tokio::sync::watch;

/// Source of device hotplug information.
pub trait DevicePresence: Send + Sync {
    /// Whether the device is currently attached.
    fn is_present(&self) -> bool;

    /// Change feed delivering presence transitions.
    ///
    /// Receivers observe the current value on first read; only transitions
    /// to `true` trigger session activity.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
