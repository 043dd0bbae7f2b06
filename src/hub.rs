//! Generic subscription hub for the continuous data feeds.
//!
//! One [`FeedHub`] instance manages one feed (gaze, position, video or user
//! changes): it tracks registered callbacks, runs at most one background
//! streaming loop while subscribers exist, and rebuilds the loop after a
//! session reconnect or a transient stream failure with bounded exponential
//! backoff.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::proto::{FeedItem, FeedRequest};
use crate::session::{Reconnect, SessionManager};
use crate::transport::{StatusKind, TransportError};

/// Delay before the first resubscribe attempt of a loop instance.
pub const BACKOFF_FLOOR: Duration = Duration::from_millis(250);
/// Ceiling for the doubling resubscribe delay.
pub const BACKOFF_CEILING: Duration = Duration::from_millis(5000);

/// Static description of one feed: which wire request opens it and how its
/// items map onto the public event type.
pub trait Feed: Send + Sync + 'static {
    type Event: Send + Sync + 'static;

    /// Feed name used in log lines.
    const NAME: &'static str;

    /// Builds the stream request for this feed.
    fn request(unfiltered: bool) -> FeedRequest;

    /// Normalizes a wire item into the public event shape.
    ///
    /// Returns `None` for items that do not belong to this feed or fail
    /// validation; such items are skipped without disturbing the loop.
    fn normalize(item: FeedItem) -> Option<Self::Event>;
}

/// Registered subscriber callback.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifies one registered callback within a hub.
///
/// The pair of filter-mode flag and caller-chosen tag must be unique per
/// hub; re-subscribing an existing key is a no-op. Only the gaze feed
/// interprets the filter-mode flag.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionKey {
    pub unfiltered: bool,
    pub tag: u64,
}

impl SubscriptionKey {
    /// Key for the default (filtered) stream mode.
    pub fn new(tag: u64) -> Self {
        Self {
            unfiltered: false,
            tag,
        }
    }

    /// Key requesting unfiltered data.
    pub fn unfiltered(tag: u64) -> Self {
        Self {
            unfiltered: true,
            tag,
        }
    }
}

/// Subscription manager and streaming-loop owner for one feed.
///
/// Clones share the same subscriber set and streaming loop.
pub struct FeedHub<F: Feed> {
    inner: Arc<HubInner<F>>,
}

impl<F: Feed> Clone for FeedHub<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct HubInner<F: Feed> {
    session: SessionManager,
    subscribers: Mutex<Vec<(SubscriptionKey, Callback<F::Event>)>>,
    active: Mutex<Option<ActiveLoop>>,
}

struct ActiveLoop {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl<F: Feed> FeedHub<F> {
    pub(crate) fn new(session: SessionManager) -> Self {
        Self {
            inner: Arc::new(HubInner {
                session,
                subscribers: Mutex::new(Vec::new()),
                active: Mutex::new(None),
            }),
        }
    }

    /// Registers `callback` under `key`.
    ///
    /// Starts the streaming loop when this is the first subscriber.
    /// Re-subscribing an already-registered key does nothing.
    pub fn subscribe<C>(&self, key: SubscriptionKey, callback: C)
    where
        C: Fn(&F::Event) + Send + Sync + 'static,
    {
        let was_empty = {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            if subscribers.iter().any(|(existing, _)| *existing == key) {
                debug!(feed = F::NAME, ?key, "subscription key already registered");
                return;
            }
            let was_empty = subscribers.is_empty();
            subscribers.push((key, Arc::new(callback)));
            was_empty
        };

        if was_empty {
            let mut active = self.inner.active.lock().unwrap();
            if let Some(previous) = active.take() {
                previous.token.cancel();
            }
            *active = Some(spawn_loop(Arc::clone(&self.inner)));
        }
    }

    /// Removes the registration for `key`.
    ///
    /// Cancels the streaming loop when the last subscriber leaves. Safe to
    /// call from within a callback invocation.
    pub fn unsubscribe(&self, key: SubscriptionKey) {
        let now_empty = {
            let mut subscribers = self.inner.subscribers.lock().unwrap();
            let before = subscribers.len();
            subscribers.retain(|(existing, _)| *existing != key);
            subscribers.len() != before && subscribers.is_empty()
        };

        if now_empty {
            if let Some(active) = self.inner.active.lock().unwrap().take() {
                active.token.cancel();
            }
        }
    }

    /// Number of currently-registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().unwrap().len()
    }

    /// Whether a streaming loop is currently alive for this hub.
    pub fn is_streaming(&self) -> bool {
        self.inner
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|active| !active.task.is_finished())
            .unwrap_or(false)
    }
}

impl<F: Feed> Reconnect for FeedHub<F> {
    /// Tears down the current loop and, if subscribers remain, starts a
    /// fresh one against the new transport handle. Registered callbacks are
    /// preserved verbatim.
    fn on_session_reconnected(&self) {
        let mut active = self.inner.active.lock().unwrap();
        if let Some(previous) = active.take() {
            previous.token.cancel();
        }
        if !self.inner.subscribers.lock().unwrap().is_empty() {
            *active = Some(spawn_loop(Arc::clone(&self.inner)));
        }
    }
}

impl<F: Feed> HubInner<F> {
    fn wants_unfiltered(&self) -> bool {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .any(|(key, _)| key.unfiltered)
    }

    /// Delivers one event synchronously to every registered callback.
    ///
    /// The subscriber lock is released before invocation so callbacks may
    /// subscribe/unsubscribe re-entrantly, and a panicking callback is
    /// isolated from the rest.
    fn fan_out(&self, event: &F::Event) {
        let snapshot: Vec<(SubscriptionKey, Callback<F::Event>)> =
            self.subscribers.lock().unwrap().clone();
        for (key, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(feed = F::NAME, ?key, "subscriber callback panicked");
            }
        }
    }
}

fn spawn_loop<F: Feed>(inner: Arc<HubInner<F>>) -> ActiveLoop {
    let token = inner.session.child_token();
    let task = tokio::spawn(run_loop(inner, token.clone()));
    ActiveLoop { token, task }
}

/// One streaming-loop instance.
///
/// The backoff delay starts at the floor for every new loop instance and
/// doubles only on failed cycles; a clean end-of-stream waits the current
/// delay and resubscribes without growing it.
async fn run_loop<F: Feed>(inner: Arc<HubInner<F>>, token: CancellationToken) {
    let mut backoff = BACKOFF_FLOOR;
    loop {
        if token.is_cancelled() {
            return;
        }

        let transport = match inner.session.current_transport() {
            Ok(transport) => transport,
            Err(_) => {
                if inner.session.is_closed() {
                    return;
                }
                debug!(feed = F::NAME, "no active session, waiting to resubscribe");
                if !sleep_unless_cancelled(backoff, &token).await {
                    return;
                }
                backoff = grow(backoff);
                continue;
            }
        };

        let opened = tokio::select! {
            _ = token.cancelled() => return,
            opened = transport.open_feed(F::request(inner.wants_unfiltered())) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) if err.kind() == StatusKind::Cancelled => {
                debug!(feed = F::NAME, "feed stream cancelled");
                return;
            }
            Err(err) => {
                log_stream_failure(F::NAME, &err);
                if !sleep_unless_cancelled(backoff, &token).await {
                    return;
                }
                backoff = grow(backoff);
                continue;
            }
        };

        let clean_end = loop {
            let next = tokio::select! {
                _ = token.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Ok(Some(item)) => {
                    if let Some(event) = F::normalize(item) {
                        inner.fan_out(&event);
                    }
                }
                // Clean end-of-stream: resubscribe after a short delay.
                Ok(None) => break true,
                Err(err) if err.kind() == StatusKind::Cancelled => {
                    debug!(feed = F::NAME, "feed stream cancelled");
                    return;
                }
                Err(err) => {
                    log_stream_failure(F::NAME, &err);
                    break false;
                }
            }
        };

        if !sleep_unless_cancelled(backoff, &token).await {
            return;
        }
        if !clean_end {
            backoff = grow(backoff);
        }
    }
}

fn grow(backoff: Duration) -> Duration {
    std::cmp::min(backoff.saturating_mul(2), BACKOFF_CEILING)
}

async fn sleep_unless_cancelled(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn log_stream_failure(feed: &'static str, err: &TransportError) {
    if err.kind().is_unavailability() {
        warn!(feed, error = %err, "feed stream unavailable, retrying");
    } else {
        error!(feed, error = %err, "feed stream failed, retrying");
    }
}
