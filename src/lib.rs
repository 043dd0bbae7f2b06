//! Client SDK for the eyetuitive eye tracker.
//!
//! The crate is organized around one session per device:
//! - `device`: top-level handle bundling all capabilities.
//! - `session`: connection lifecycle, handshake retry and reconnect signal.
//! - `hub`: subscription hubs for the continuous data feeds.
//! - `calibration`: calibration run controller on the duplex stream.
//! - `settings` and `users`: one-shot configuration surfaces.
//! - `transport` and `proto`: the pluggable RPC capability and its messages.

/// Calibration run controller and result types.
pub mod calibration;
/// Top-level eye tracker handle.
pub mod device;
/// Public event shapes delivered to feed subscribers.
pub mod events;
/// Generic feed subscription hub and streaming loop.
pub mod hub;
/// Device-presence capability for hotplug reconnects.
pub mod presence;
/// Typed wire messages.
pub mod proto;
/// Retry and timeout helpers used by the session manager.
pub mod retry;
/// Session lifecycle and transport handle ownership.
pub mod session;
/// Device and profile settings.
pub mod settings;
/// Transport capability traits.
pub mod transport;
/// User-profile management.
pub mod users;
