//! Calibration run controller.
//!
//! Drives the calibration duplex stream: one control sink for start, stop,
//! improve and confirm messages, and one status source delivering point
//! updates followed by a terminal result. At most one run is active at a
//! time; starting a new run supersedes the previous one.
//!
//! The finished callback of a run fires exactly once: with the device
//! result when a terminal status carries one, or with an empty failed
//! outcome when the run is stopped, superseded, abandoned on reconnect, or
//! dies without a result.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::NormedPoint;
use crate::proto::{
    unix_now_secs, uuid_from_bytes, CalibrationControl, CalibrationPhase, CalibrationStatus,
    ConfigRequest, ConfigResponse, PointCountMode, WireCalibrationResult,
};
use crate::retry::with_timeout;
use crate::session::{Reconnect, SessionError, SessionManager};
use crate::transport::{CalibrationSink, CalibrationSource, StatusKind, TransportError};
use uuid::Uuid;

/// Timeout for opening the calibration duplex stream.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
/// A run that produces no terminal status within this window is abandoned.
const RUN_DEADLINE: Duration = Duration::from_secs(300);

/// Physical screen dimensions handed to the device at calibration start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenDimensions {
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Parameters of one calibration run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationOptions {
    pub points: PointCountMode,
    pub screen: ScreenDimensions,
    /// Let the device advance points based on detected fixations.
    pub fixation_based: bool,
    /// Collect several samples per point.
    pub multipoint: bool,
    /// The application confirms each point via [`CalibrationController::confirm_point`].
    pub manual: bool,
}

/// Target point the application should render during a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationPointUpdate {
    /// Zero-based point index within the run.
    pub sequence: u32,
    pub target: NormedPoint,
    pub state: CalibrationPhase,
}

/// Final quality report of a calibration run.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationOutcome {
    pub success: bool,
    /// Combined per-point scores, 0-100, aligned to point order.
    pub per_point: Vec<i32>,
    pub per_point_left: Vec<i32>,
    pub per_point_right: Vec<i32>,
    pub overall: i32,
    /// Whether the device accepts an improve request for this calibration.
    pub can_improve: bool,
    pub id: Uuid,
    pub timestamp: i64,
}

impl CalibrationOutcome {
    /// Failed outcome carrying no data; used when a run ends without a
    /// device result.
    pub fn empty() -> Self {
        Self {
            success: false,
            per_point: Vec::new(),
            per_point_left: Vec::new(),
            per_point_right: Vec::new(),
            overall: 0,
            can_improve: false,
            id: Uuid::nil(),
            timestamp: 0,
        }
    }

    fn from_wire(success: bool, wire: WireCalibrationResult) -> Self {
        Self {
            success,
            per_point: wire.per_point,
            per_point_left: wire.per_point_left,
            per_point_right: wire.per_point_right,
            overall: wire.overall,
            can_improve: wire.can_improve,
            id: uuid_from_bytes(&wire.id),
            timestamp: wire.timestamp,
        }
    }
}

/// Lifecycle state of the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CalibrationState {
    Idle,
    Running,
    /// The last run delivered a device result.
    Finished,
    /// The last run was stopped or died without a result.
    Aborted,
}

/// Errors from starting a calibration run.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    NotConnected(#[from] SessionError),
    #[error("timed out opening the calibration stream")]
    OpenTimeout,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

type PointCallback = Arc<dyn Fn(&CalibrationPointUpdate) + Send + Sync>;
type FinishedCallback = Box<dyn Fn(&CalibrationOutcome) + Send + Sync>;

/// Per-run callback slots.
///
/// The finished slot is taken exactly once, either by the consumer task on
/// a terminal status or by the stop path synthesizing an empty outcome.
struct RunHandlers {
    point: Mutex<Option<PointCallback>>,
    finished: Mutex<Option<FinishedCallback>>,
}

impl RunHandlers {
    fn fire_point(&self, update: &CalibrationPointUpdate) {
        let callback = self.point.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(update);
        }
    }

    fn take_finished(&self) -> Option<FinishedCallback> {
        self.finished.lock().unwrap().take()
    }

    fn detach(&self) {
        self.point.lock().unwrap().take();
        self.finished.lock().unwrap().take();
    }
}

struct ActiveRun {
    sink: Arc<dyn CalibrationSink>,
    handlers: Arc<RunHandlers>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the calibration duplex stream and the single active run.
pub struct CalibrationController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    session: SessionManager,
    run: AsyncMutex<Option<ActiveRun>>,
    state: Arc<Mutex<CalibrationState>>,
}

impl CalibrationController {
    pub(crate) fn new(session: SessionManager) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                session,
                run: AsyncMutex::new(None),
                state: Arc::new(Mutex::new(CalibrationState::Idle)),
            }),
        }
    }

    /// Starts a calibration run, superseding any run in progress.
    ///
    /// `on_point` receives target points to render; `on_finished` fires
    /// exactly once with the run outcome.
    pub async fn start<P, D>(
        &self,
        options: CalibrationOptions,
        on_point: P,
        on_finished: D,
    ) -> Result<(), CalibrationError>
    where
        P: Fn(&CalibrationPointUpdate) + Send + Sync + 'static,
        D: Fn(&CalibrationOutcome) + Send + Sync + 'static,
    {
        let mut run = self.inner.run.lock().await;
        if let Some(previous) = run.take() {
            debug!("superseding active calibration run");
            self.inner.stop_run(previous, true).await;
        }

        let transport = self.inner.session.current_transport()?;
        let (sink, source) = with_timeout(OPEN_TIMEOUT, transport.open_calibration())
            .await
            .map_err(|_| CalibrationError::OpenTimeout)??;

        sink.send(CalibrationControl::Start {
            points: options.points,
            screen_width_mm: options.screen.width_mm,
            screen_height_mm: options.screen.height_mm,
            fixation_based: options.fixation_based,
            multipoint: options.multipoint,
            manual: options.manual,
            timestamp: unix_now_secs(),
        })
        .await?;

        let handlers = Arc::new(RunHandlers {
            point: Mutex::new(Some(Arc::new(on_point) as PointCallback)),
            finished: Mutex::new(Some(Box::new(on_finished) as FinishedCallback)),
        });
        *self.inner.state.lock().unwrap() = CalibrationState::Running;

        let token = self.inner.session.child_token();
        let task = tokio::spawn(consume(
            source,
            Arc::clone(&handlers),
            Arc::clone(&self.inner.state),
            token.clone(),
        ));
        *run = Some(ActiveRun {
            sink,
            handlers,
            token,
            task,
        });
        Ok(())
    }

    /// Stops the active run, if any.
    ///
    /// The run's finished callback fires with an empty failed outcome
    /// unless a device result already arrived.
    pub async fn stop(&self) {
        let mut run = self.inner.run.lock().await;
        if let Some(active) = run.take() {
            self.inner.stop_run(active, true).await;
        }
    }

    /// Asks the device to re-collect the given zero-based points of the
    /// current calibration. An empty slice is a no-op.
    pub async fn improve(&self, point_indices: &[u32]) {
        if point_indices.is_empty() {
            return;
        }
        let run = self.inner.run.lock().await;
        if let Some(active) = run.as_ref() {
            let message = CalibrationControl::Improve {
                point_indices: point_indices.to_vec(),
                timestamp: unix_now_secs(),
            };
            if let Err(err) = active.sink.send(message).await {
                warn!(error = %err, "failed to send calibration improve request");
            }
        }
    }

    /// Confirms the currently shown point in manual calibration mode.
    pub async fn confirm_point(&self) {
        let run = self.inner.run.lock().await;
        if let Some(active) = run.as_ref() {
            if let Err(err) = active.sink.send(CalibrationControl::Confirm).await {
                warn!(error = %err, "failed to send calibration point confirmation");
            }
        }
    }

    /// Fetches the result of the device's last completed calibration.
    ///
    /// Returns `None` when not connected, when the device has no stored
    /// calibration, or when the request fails.
    pub async fn last_result(&self) -> Option<CalibrationOutcome> {
        let transport = self.inner.session.current_transport().ok()?;
        match transport.call(ConfigRequest::GetLastCalibrationResult).await {
            Ok(ConfigResponse::LastCalibration(Some(result))) => {
                Some(CalibrationOutcome::from_wire(true, result))
            }
            Ok(ConfigResponse::LastCalibration(None)) => None,
            Ok(other) => {
                warn!(?other, "unexpected response to calibration result request");
                None
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch last calibration result");
                None
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CalibrationState {
        *self.inner.state.lock().unwrap()
    }
}

impl ControllerInner {
    /// Tears down a run. Takes the finished callback before cancelling the
    /// consumer so the two cannot both fire it, then synthesizes the empty
    /// outcome if the device result never arrived.
    async fn stop_run(&self, run: ActiveRun, send_stop: bool) {
        if send_stop {
            if let Err(err) = run.sink.send(CalibrationControl::Stop).await {
                debug!(error = %err, "failed to send calibration stop");
            }
        }
        let finished = run.handlers.take_finished();
        run.token.cancel();
        let _ = run.task.await;
        run.handlers.detach();
        if let Some(callback) = finished {
            callback(&CalibrationOutcome::empty());
            *self.state.lock().unwrap() = CalibrationState::Aborted;
        }
    }
}

impl Reconnect for CalibrationController {
    /// A fresh transport invalidates the duplex stream, so any run in
    /// progress is abandoned. No stop message is sent; the old stream is
    /// already dead.
    fn on_session_reconnected(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut run = inner.run.lock().await;
            if let Some(active) = run.take() {
                debug!("abandoning calibration run after reconnect");
                inner.stop_run(active, false).await;
            }
        });
    }
}

/// Consumer task for one run's status stream.
async fn consume(
    mut source: Box<dyn CalibrationSource>,
    handlers: Arc<RunHandlers>,
    state: Arc<Mutex<CalibrationState>>,
    token: CancellationToken,
) {
    let outcome = tokio::select! {
        _ = token.cancelled() => None,
        _ = tokio::time::sleep(RUN_DEADLINE) => {
            warn!("calibration run produced no result before the deadline");
            None
        }
        outcome = drive(&mut source, &handlers) => outcome,
    };

    match outcome {
        Some(outcome) => {
            let success = outcome.success;
            if let Some(callback) = handlers.take_finished() {
                callback(&outcome);
                *state.lock().unwrap() = CalibrationState::Finished;
            }
            debug!(success, "calibration run finished");
        }
        // No device result: stream death, deadline, or cancellation. The
        // stop path takes the finished callback before cancelling, so when
        // one is still attached the failure is ours to report.
        None => {
            if let Some(callback) = handlers.take_finished() {
                callback(&CalibrationOutcome::empty());
                *state.lock().unwrap() = CalibrationState::Aborted;
            }
        }
    }
    handlers.detach();
}

/// Reads status messages until a terminal status with a result payload.
///
/// Terminal statuses without a payload carry no usable data and are
/// skipped; a clean end-of-stream or a failure ends the run without a
/// result.
async fn drive(
    source: &mut Box<dyn CalibrationSource>,
    handlers: &RunHandlers,
) -> Option<CalibrationOutcome> {
    loop {
        match source.next().await {
            Ok(Some(CalibrationStatus::PointUpdate { point })) => {
                handlers.fire_point(&CalibrationPointUpdate {
                    sequence: point.sequence,
                    target: point.position.into(),
                    state: point.state,
                });
            }
            Ok(Some(CalibrationStatus::Succeeded { result: Some(result) })) => {
                return Some(CalibrationOutcome::from_wire(true, result));
            }
            Ok(Some(CalibrationStatus::Failed { result: Some(result) })) => {
                return Some(CalibrationOutcome::from_wire(false, result));
            }
            Ok(Some(_)) => {
                debug!("terminal calibration status without result, skipping");
            }
            Ok(None) => {
                debug!("calibration stream ended without a result");
                return None;
            }
            Err(err) if err.kind() == StatusKind::Cancelled => {
                debug!("calibration stream cancelled");
                return None;
            }
            Err(err) if err.kind().is_unavailability() => {
                warn!(error = %err, "calibration stream unavailable");
                return None;
            }
            Err(err) => {
                error!(error = %err, "calibration stream failed");
                return None;
            }
        }
    }
}
