//! Scripted in-process transport used by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use eyetuitive_sdk::presence::DevicePresence;
use eyetuitive_sdk::proto::{
    CalibrationControl, CalibrationStatus, ConfigRequest, ConfigResponse, FeedItem, FeedRequest,
    GazeSample, WirePoint,
};
use eyetuitive_sdk::transport::{
    CalibrationSink, CalibrationSource, Connector, FeedStream, StatusKind, Transport,
    TransportError,
};

/// Scripted outcome of one connect attempt. Attempts beyond the script
/// succeed.
#[derive(Clone, Copy, Debug)]
pub enum ConnectOutcome {
    Succeed,
    Fail(StatusKind),
}

/// Connector handing out a single shared [`MockTransport`].
pub struct MockConnector {
    transport: Arc<MockTransport>,
    script: Mutex<VecDeque<ConnectOutcome>>,
    delay: Duration,
    calls: AtomicUsize,
    calls_tx: watch::Sender<usize>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let (calls_tx, _) = watch::channel(0);
        Arc::new(Self {
            transport: MockTransport::new(),
            script: Mutex::new(VecDeque::new()),
            delay,
            calls: AtomicUsize::new(0),
            calls_tx,
        })
    }

    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }

    pub fn connect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connects(&self, count: usize) {
        let mut rx = self.calls_tx.subscribe();
        rx.wait_for(|calls| *calls >= count)
            .await
            .expect("connect counter closed");
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _timeout: Duration) -> Result<Arc<dyn Transport>, TransportError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConnectOutcome::Succeed);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.calls_tx.send_modify(|calls| *calls += 1);
        match outcome {
            ConnectOutcome::Succeed => Ok(Arc::clone(&self.transport) as Arc<dyn Transport>),
            ConnectOutcome::Fail(kind) => Err(TransportError::new(kind, "scripted connect failure")),
        }
    }
}

/// How a scripted feed stream behaves once its items are exhausted.
#[derive(Clone, Copy, Debug)]
pub enum StreamEnd {
    /// Clean end-of-stream.
    Clean,
    /// Fails with the given classification.
    Fail(StatusKind),
    /// Stays open without delivering anything further.
    Park,
}

/// Script for one `open_feed` call.
pub enum OpenPlan {
    Fail(StatusKind),
    Stream { items: Vec<FeedItem>, end: StreamEnd },
}

/// One recorded `open_feed` call.
#[derive(Clone, Debug)]
pub struct OpenRecord {
    pub request: FeedRequest,
    pub at: Instant,
}

/// Handle for scripting one calibration duplex stream.
pub struct CalibrationScript {
    sent: Arc<Mutex<Vec<CalibrationControl>>>,
    sent_tx: watch::Sender<usize>,
    status_tx: mpsc::UnboundedSender<Result<Option<CalibrationStatus>, StatusKind>>,
}

impl CalibrationScript {
    /// Queues one status message for the SDK to consume.
    pub fn push_status(&self, status: CalibrationStatus) {
        let _ = self.status_tx.send(Ok(Some(status)));
    }

    /// Ends the status stream cleanly.
    pub fn end_stream(&self) {
        let _ = self.status_tx.send(Ok(None));
    }

    /// Fails the status stream.
    pub fn fail_stream(&self, kind: StatusKind) {
        let _ = self.status_tx.send(Err(kind));
    }

    /// Control messages the SDK has sent so far.
    pub fn sent(&self) -> Vec<CalibrationControl> {
        self.sent.lock().unwrap().clone()
    }

    pub async fn wait_for_sent(&self, count: usize) {
        let mut rx = self.sent_tx.subscribe();
        rx.wait_for(|sent| *sent >= count)
            .await
            .expect("sent counter closed");
    }
}

/// Transport whose streams and calls are scripted ahead of time.
pub struct MockTransport {
    feed_plans: Mutex<VecDeque<OpenPlan>>,
    opens: Mutex<Vec<OpenRecord>>,
    opens_tx: watch::Sender<usize>,
    calibrations: Mutex<VecDeque<(Arc<MockCalibrationSink>, MockCalibrationSource)>>,
    call_plans: Mutex<VecDeque<Result<ConfigResponse, TransportError>>>,
    calls: Mutex<Vec<ConfigRequest>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        let (opens_tx, _) = watch::channel(0);
        Arc::new(Self {
            feed_plans: Mutex::new(VecDeque::new()),
            opens: Mutex::new(Vec::new()),
            opens_tx,
            calibrations: Mutex::new(VecDeque::new()),
            call_plans: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Queues the behavior of the next `open_feed` call. Calls beyond the
    /// script receive an empty parked stream.
    pub fn plan_open(&self, plan: OpenPlan) {
        self.feed_plans.lock().unwrap().push_back(plan);
    }

    /// Queues a parked stream that first delivers `items`.
    pub fn plan_stream(&self, items: Vec<FeedItem>) {
        self.plan_open(OpenPlan::Stream {
            items,
            end: StreamEnd::Park,
        });
    }

    /// Queues the next calibration duplex stream and returns its script
    /// handle. Unscripted opens receive a silent stream.
    pub fn plan_calibration(&self) -> Arc<CalibrationScript> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (sent_tx, _) = watch::channel(0);
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let script = Arc::new(CalibrationScript {
            sent: Arc::clone(&sent),
            sent_tx: sent_tx.clone(),
            status_tx,
        });
        self.calibrations.lock().unwrap().push_back((
            Arc::new(MockCalibrationSink { sent, sent_tx }),
            MockCalibrationSource { status_rx },
        ));
        script
    }

    /// Queues the response to the next one-shot call. Calls beyond the
    /// script fail as unavailable.
    pub fn plan_call(&self, response: Result<ConfigResponse, TransportError>) {
        self.call_plans.lock().unwrap().push_back(response);
    }

    /// Recorded `open_feed` calls.
    pub fn opens(&self) -> Vec<OpenRecord> {
        self.opens.lock().unwrap().clone()
    }

    /// Recorded one-shot requests.
    pub fn calls(&self) -> Vec<ConfigRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub async fn wait_for_opens(&self, count: usize) {
        let mut rx = self.opens_tx.subscribe();
        rx.wait_for(|opens| *opens >= count)
            .await
            .expect("open counter closed");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_feed(
        &self,
        request: FeedRequest,
    ) -> Result<Box<dyn FeedStream>, TransportError> {
        self.opens.lock().unwrap().push(OpenRecord {
            request,
            at: Instant::now(),
        });
        self.opens_tx.send_modify(|opens| *opens += 1);
        let plan = self
            .feed_plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenPlan::Stream {
                items: Vec::new(),
                end: StreamEnd::Park,
            });
        match plan {
            OpenPlan::Fail(kind) => Err(TransportError::new(kind, "scripted open failure")),
            OpenPlan::Stream { items, end } => Ok(Box::new(MockFeedStream {
                items: items.into(),
                end,
            })),
        }
    }

    async fn open_calibration(
        &self,
    ) -> Result<(Arc<dyn CalibrationSink>, Box<dyn CalibrationSource>), TransportError> {
        let (sink, source) = self
            .calibrations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                let (sent_tx, _) = watch::channel(0);
                let (_status_tx, status_rx) = mpsc::unbounded_channel();
                (
                    Arc::new(MockCalibrationSink {
                        sent: Arc::new(Mutex::new(Vec::new())),
                        sent_tx,
                    }),
                    MockCalibrationSource { status_rx },
                )
            });
        Ok((sink, Box::new(source)))
    }

    async fn call(&self, request: ConfigRequest) -> Result<ConfigResponse, TransportError> {
        self.calls.lock().unwrap().push(request);
        self.call_plans.lock().unwrap().pop_front().unwrap_or(Err(
            TransportError::new(StatusKind::Unavailable, "no scripted response"),
        ))
    }
}

struct MockFeedStream {
    items: VecDeque<FeedItem>,
    end: StreamEnd,
}

#[async_trait]
impl FeedStream for MockFeedStream {
    async fn next(&mut self) -> Result<Option<FeedItem>, TransportError> {
        if let Some(item) = self.items.pop_front() {
            return Ok(Some(item));
        }
        match self.end {
            StreamEnd::Clean => Ok(None),
            StreamEnd::Fail(kind) => Err(TransportError::new(kind, "scripted stream failure")),
            StreamEnd::Park => pending().await,
        }
    }
}

struct MockCalibrationSink {
    sent: Arc<Mutex<Vec<CalibrationControl>>>,
    sent_tx: watch::Sender<usize>,
}

#[async_trait]
impl CalibrationSink for MockCalibrationSink {
    async fn send(&self, message: CalibrationControl) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message);
        self.sent_tx.send_modify(|sent| *sent += 1);
        Ok(())
    }
}

struct MockCalibrationSource {
    status_rx: mpsc::UnboundedReceiver<Result<Option<CalibrationStatus>, StatusKind>>,
}

#[async_trait]
impl CalibrationSource for MockCalibrationSource {
    async fn next(&mut self) -> Result<Option<CalibrationStatus>, TransportError> {
        match self.status_rx.recv().await {
            Some(Ok(status)) => Ok(status),
            Some(Err(kind)) => Err(TransportError::new(kind, "scripted status failure")),
            // Script handle dropped without an ending; stay open.
            None => pending().await,
        }
    }
}

/// Presence source driven by the test.
pub struct PresenceSwitch {
    state: watch::Sender<bool>,
}

impl PresenceSwitch {
    pub fn new(present: bool) -> Arc<Self> {
        let (state, _) = watch::channel(present);
        Arc::new(Self { state })
    }

    pub fn set_present(&self, present: bool) {
        let _ = self.state.send(present);
    }
}

impl DevicePresence for PresenceSwitch {
    fn is_present(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Collects callback invocations and lets tests await a count.
pub struct Recorder<T> {
    events: Mutex<Vec<T>>,
    count_tx: watch::Sender<usize>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Arc<Self> {
        let (count_tx, _) = watch::channel(0);
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            count_tx,
        })
    }

    pub fn record(&self, event: T) {
        self.events.lock().unwrap().push(event);
        self.count_tx.send_modify(|count| *count += 1);
    }

    pub fn events(&self) -> Vec<T> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub async fn wait_for(&self, count: usize) {
        let mut rx = self.count_tx.subscribe();
        rx.wait_for(|seen| *seen >= count)
            .await
            .expect("recorder counter closed");
    }
}

/// Polls `cond` until it holds, bounded by a generous timeout.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Minimal gaze sample distinguishable by timestamp.
pub fn gaze_item(timestamp_us: i64) -> FeedItem {
    let point = WirePoint {
        x: 0.5,
        y: 0.5,
        confidence: None,
    };
    FeedItem::Gaze(GazeSample {
        timestamp_us,
        gaze_point: point,
        left_eye: point,
        right_eye: point,
        fixation: false,
        user_present: true,
        left_eye_open: true,
        right_eye_open: true,
    })
}
