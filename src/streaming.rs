// Direction streaming controller
//
// While a direction key is held, its frame is re-sent at the configured
// frequency; releasing it sends the stop frame exactly once.
//
// Two tasks run next to the caller's input handling:
// - tick task: polls every 10ms and re-queues the cached direction frame once
//   a full period has elapsed (decoupled from the transmit frequency)
// - writer task: the only code that talks to the transport, so frames reach
//   the wire in the order they were queued
//
// Catalog, settings and streaming state sit behind one mutex. Frames are queued
// while that lock is held; otherwise a resend could slip in behind a stop frame.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::catalog::CommandCatalog;
use crate::config::{POLL_INTERVAL, STOP_FLUSH_TIMEOUT, STOP_RETRY_ATTEMPTS};
use crate::frame::{LineEnding, hex};
use crate::messages::{BridgeEvent, FrameKind};
use crate::settings::LinkSettings;
use crate::transport::Transport;

/// Error types for controller input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("No action bound to '{0}'")]
    UnknownAction(char),

    #[error("Writer task is gone, frames can no longer be sent")]
    Closed,
}

/// What a key press did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResponse {
    /// Direction is now streaming (fresh start or switch)
    Streaming(char),
    /// Action frame queued, with its label
    ActionFired(String),
    /// Unbound key or auto-repeat of a held key
    Ignored,
}

/// Tunables for the controller tasks
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub poll_interval: Duration,
    pub stop_flush_timeout: Duration,
    pub stop_retries: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            stop_flush_timeout: STOP_FLUSH_TIMEOUT,
            stop_retries: STOP_RETRY_ATTEMPTS,
        }
    }
}

/// Snapshot for display
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub active_key: Option<char>,
    pub frequency_hz: f64,
    pub header_on: bool,
    pub line_ending: LineEnding,
}

impl std::fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.active_key {
            Some(key) => write!(f, "driving {}", key.to_ascii_uppercase())?,
            None => f.write_str("idle")?,
        }
        write!(
            f,
            ", {:.1}Hz, header {}, line ending {}",
            self.frequency_hz,
            if self.header_on { "on" } else { "off" },
            self.line_ending
        )
    }
}

/// Direction currently streaming, with its cached frame
#[derive(Debug, Clone)]
pub struct StreamingState {
    current_key: Option<char>,
    current_frame: Option<Vec<u8>>,
    last_sent_at: Instant,
}

impl StreamingState {
    fn new() -> Self {
        Self {
            current_key: None,
            current_frame: None,
            last_sent_at: Instant::now(),
        }
    }

    fn clear(&mut self) -> Option<char> {
        self.current_frame = None;
        self.current_key.take()
    }
}

struct OutboundFrame {
    kind: FrameKind,
    bytes: Vec<u8>,
}

struct Shared {
    catalog: CommandCatalog,
    settings: LinkSettings,
    stream: StreamingState,
    pressed: HashSet<char>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl Shared {
    fn enqueue(&self, kind: FrameKind, bytes: Vec<u8>) -> Result<(), ControllerError> {
        self.outbound
            .send(OutboundFrame { kind, bytes })
            .map_err(|_| ControllerError::Closed)
    }

    fn direction_frame(&self, key: char) -> Option<Vec<u8>> {
        let payload = self.catalog.lookup_direction(key)?;
        Some(self.settings.frame(&payload.encode()))
    }

    fn stop_frame(&self) -> Vec<u8> {
        self.settings.frame(&self.catalog.stop_payload().encode())
    }

    fn start_direction(&mut self, key: char) -> Result<(), ControllerError> {
        let Some(frame) = self.direction_frame(key) else {
            return Ok(());
        };
        match self.stream.current_key {
            Some(previous) if previous != key => {
                debug!("Switching direction {} -> {}", previous, key)
            }
            _ => debug!("Streaming {}", key),
        }

        self.enqueue(FrameKind::Direction(key), frame.clone())?;
        self.stream.current_key = Some(key);
        self.stream.current_frame = Some(frame);
        self.stream.last_sent_at = Instant::now();
        Ok(())
    }

    fn stop_direction(&mut self) -> Result<(), ControllerError> {
        if let Some(key) = self.stream.clear() {
            debug!("Released {}, sending stop", key);
            self.enqueue(FrameKind::Stop, self.stop_frame())?;
        }
        Ok(())
    }

    /// Rebuild the cached frame after header or line-ending changes
    fn refresh_frame(&mut self) {
        if let Some(key) = self.stream.current_key {
            self.stream.current_frame = self.direction_frame(key);
        }
    }

    /// Queue a resend if the period has elapsed; false once the queue is closed
    fn tick(&mut self, now: Instant) -> bool {
        let (Some(key), Some(frame)) = (self.stream.current_key, &self.stream.current_frame) else {
            return true;
        };
        if now.duration_since(self.stream.last_sent_at) < self.settings.period() {
            return true;
        }
        let bytes = frame.clone();
        self.stream.last_sent_at = now;
        self.enqueue(FrameKind::Direction(key), bytes).is_ok()
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a running streaming controller
pub struct StreamingController {
    shared: Arc<Mutex<Shared>>,
    shutdown: Arc<AtomicBool>,
    tick_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    stop_flush_timeout: Duration,
}

impl StreamingController {
    /// Start the tick and writer tasks; must be called inside a tokio runtime
    ///
    /// Returns the controller and the receiving end of its event channel.
    pub fn spawn(
        catalog: CommandCatalog,
        settings: LinkSettings,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        Self::spawn_with_options(catalog, settings, transport, ControllerOptions::default())
    }

    pub fn spawn_with_options(
        catalog: CommandCatalog,
        settings: LinkSettings,
        transport: Arc<dyn Transport>,
        options: ControllerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let rx_events = event_tx.clone();
        transport.on_receive(Arc::new(move |bytes| {
            let _ = rx_events.send(BridgeEvent::DataReceived(bytes));
        }));

        info!(
            "Streaming controller started: {:.1}Hz, line ending {}, header {}",
            settings.current_frequency(),
            settings.line_ending(),
            if settings.header_on() { "on" } else { "off" }
        );

        let shared = Arc::new(Mutex::new(Shared {
            catalog,
            settings,
            stream: StreamingState::new(),
            pressed: HashSet::new(),
            outbound: outbound_tx,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        // Tasks only hold weak references: the controller owns the outbound
        // sender, so dropping it closes the queue
        let tick_task = tokio::spawn(tick_loop(
            Arc::downgrade(&shared),
            shutdown.clone(),
            options.poll_interval,
        ));
        let writer_task = tokio::spawn(writer_loop(
            transport,
            outbound_rx,
            event_tx,
            Arc::downgrade(&shared),
            options.stop_retries,
        ));

        let controller = Self {
            shared,
            shutdown,
            tick_task,
            writer_task,
            stop_flush_timeout: options.stop_flush_timeout,
        };
        (controller, event_rx)
    }

    /// Key pressed: start/switch a direction or fire an action
    ///
    /// Repeats of a key that is already held are ignored, so OS auto-repeat
    /// neither restarts a stream nor fires an action twice.
    pub fn key_down(&self, key: char) -> Result<KeyResponse, ControllerError> {
        let key = key.to_ascii_lowercase();
        let mut shared = lock(&self.shared);

        if shared.pressed.contains(&key) {
            return Ok(KeyResponse::Ignored);
        }

        if shared.catalog.is_direction(key) {
            shared.pressed.insert(key);
            // Another direction may be active; last key down wins, no stop in between
            shared.start_direction(key)?;
            return Ok(KeyResponse::Streaming(key));
        }

        if shared.catalog.lookup_action(key).is_some() {
            shared.pressed.insert(key);
            drop(shared);
            let label = self.fire_action(key)?;
            return Ok(KeyResponse::ActionFired(label));
        }

        Ok(KeyResponse::Ignored)
    }

    /// Key released; sends the stop frame if it was the streaming direction
    pub fn key_up(&self, key: char) -> Result<(), ControllerError> {
        let key = key.to_ascii_lowercase();
        let mut shared = lock(&self.shared);
        shared.pressed.remove(&key);

        if shared.stream.current_key == Some(key) {
            shared.stop_direction()?;
        }
        Ok(())
    }

    /// Send an action's frame once; returns its label
    pub fn fire_action(&self, key: char) -> Result<String, ControllerError> {
        let key = key.to_ascii_lowercase();
        let shared = lock(&self.shared);
        let (payload, label) = shared
            .catalog
            .lookup_action(key)
            .ok_or(ControllerError::UnknownAction(key))?;
        let label = label.to_string();
        let frame = shared.settings.frame(&payload.encode());

        info!("Action: {}", label);
        shared.enqueue(FrameKind::Action(key), frame)?;
        Ok(label)
    }

    /// Send free text once, framed with the current settings
    pub fn send_text(&self, text: &str) -> Result<(), ControllerError> {
        let shared = lock(&self.shared);
        let frame = shared.settings.frame(text.as_bytes());
        shared.enqueue(FrameKind::Manual, frame)
    }

    /// Clamp to [1, 50] Hz; applies from the next due check
    pub fn set_frequency(&self, hz: f64) -> f64 {
        let effective = lock(&self.shared).settings.set_frequency(hz);
        info!("Frequency: {:.1}Hz", effective);
        effective
    }

    pub fn current_frequency(&self) -> f64 {
        lock(&self.shared).settings.current_frequency()
    }

    pub fn toggle_header(&self) -> bool {
        let mut shared = lock(&self.shared);
        let on = shared.settings.toggle_header();
        shared.refresh_frame();
        info!("Header: {}", if on { "on" } else { "off" });
        on
    }

    pub fn cycle_line_ending(&self) -> LineEnding {
        let mut shared = lock(&self.shared);
        let mode = shared.settings.cycle_line_ending();
        shared.refresh_frame();
        info!("Line ending: {}", mode);
        mode
    }

    pub fn active_key(&self) -> Option<char> {
        lock(&self.shared).stream.current_key
    }

    pub fn status(&self) -> ControllerStatus {
        let shared = lock(&self.shared);
        ControllerStatus {
            active_key: shared.stream.current_key,
            frequency_hz: shared.settings.current_frequency(),
            header_on: shared.settings.header_on(),
            line_ending: shared.settings.line_ending(),
        }
    }

    /// Stop the tick loop and flush a final stop frame if a direction was streaming
    ///
    /// Bounded by the stop flush timeout even if the transport hangs.
    pub async fn shutdown(self) {
        info!("Shutting down streaming controller");
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.tick_task.await;

        {
            let mut shared = lock(&self.shared);
            if let Err(e) = shared.stop_direction() {
                warn!("Could not queue final stop frame: {}", e);
            }
        }
        // Last sender gone: the writer drains what is queued, then exits
        drop(self.shared);

        let abort = self.writer_task.abort_handle();
        if timeout(self.stop_flush_timeout, self.writer_task)
            .await
            .is_err()
        {
            warn!(
                "Transport did not flush within {}ms, abandoning pending frames",
                self.stop_flush_timeout.as_millis()
            );
            abort.abort();
        }
    }
}

async fn tick_loop(shared: Weak<Mutex<Shared>>, shutdown: Arc<AtomicBool>, poll: Duration) {
    let mut tick = interval(poll);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tick.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if !lock(&shared).tick(Instant::now()) {
            warn!("Outbound queue closed, stopping tick loop");
            break;
        }
    }
    debug!("Tick loop exited");
}

async fn writer_loop(
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    shared: Weak<Mutex<Shared>>,
    stop_retries: u32,
) {
    while let Some(frame) = outbound.recv().await {
        let attempts = match frame.kind {
            FrameKind::Stop => 1 + stop_retries,
            _ => 1,
        };

        for attempt in 1..=attempts {
            match transport.send(&frame.bytes).await {
                Ok(()) => {
                    debug!("TX {} [{}]", frame.kind, hex(&frame.bytes));
                    let _ = events.send(BridgeEvent::FrameSent {
                        kind: frame.kind,
                        bytes: frame.bytes.clone(),
                    });
                    break;
                }
                Err(e) if e.is_connection_loss() => {
                    error!("Connection lost while sending {}: {}", frame.kind, e);
                    let _ = events.send(BridgeEvent::SendError {
                        kind: frame.kind,
                        error: e.clone(),
                    });
                    if let Some(shared) = shared.upgrade() {
                        if let Some(key) = lock(&shared).stream.clear() {
                            warn!("Dropped streaming of '{}' to idle", key);
                        }
                    }
                    let _ = events.send(BridgeEvent::ConnectionLost { error: e });
                    break;
                }
                Err(e) => {
                    warn!(
                        "Send of {} failed (attempt {}/{}): {}",
                        frame.kind, attempt, attempts, e
                    );
                    let _ = events.send(BridgeEvent::SendError {
                        kind: frame.kind,
                        error: e,
                    });
                }
            }
        }
    }
    debug!("Writer task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::transport::{ReceiveCallback, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Records every frame; can be told to fail the next N sends
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail_next: AtomicUsize,
        fail_with: Mutex<Option<TransportError>>,
        callback: Mutex<Option<ReceiveCallback>>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        fn fail(&self, count: usize, error: TransportError) {
            *self.fail_with.lock().unwrap() = Some(error);
            self.fail_next.store(count, Ordering::SeqCst);
        }

        fn notify(&self, bytes: &[u8]) {
            let cb = self.callback.lock().unwrap().clone();
            if let Some(cb) = cb {
                cb(bytes.to_vec());
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn connect(&self, _target: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                let error = self.fail_with.lock().unwrap().clone();
                return Err(error.unwrap_or(TransportError::Send("fail".into())));
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn on_receive(&self, callback: ReceiveCallback) {
            *self.callback.lock().unwrap() = Some(callback);
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Transport whose sends never complete
    struct StuckTransport;

    #[async_trait]
    impl Transport for StuckTransport {
        async fn connect(&self, _target: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, _bytes: &[u8]) -> Result<(), TransportError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn on_receive(&self, _callback: ReceiveCallback) {}

        async fn disconnect(&self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "stuck"
        }
    }

    fn catalog() -> CommandCatalog {
        let config = BridgeConfig::from_json_str(
            r#"{
                "directions": {"w": "F", "a": "L", "stop": "DIR_STOP"},
                "actions": [{"key": "l", "data": "LIGHT_TOGGLE", "label": "Toggle Light"}]
            }"#,
            "test",
        )
        .unwrap();
        CommandCatalog::from_config(&config).unwrap()
    }

    fn settings() -> LinkSettings {
        LinkSettings::default()
            .with_line_ending(LineEnding::None)
            .with_frequency(10.0)
    }

    fn start() -> (
        StreamingController,
        mpsc::UnboundedReceiver<BridgeEvent>,
        Arc<RecordingTransport>,
    ) {
        let transport = Arc::new(RecordingTransport::default());
        let (controller, events) = StreamingController::spawn(catalog(), settings(), transport.clone());
        (controller, events, transport)
    }

    // Let the writer drain without moving the paused clock much
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn count(sent: &[Vec<u8>], frame: &[u8]) -> usize {
        sent.iter().filter(|f| f.as_slice() == frame).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_and_release_streams_then_stops_once() {
        let (controller, _events, transport) = start();

        assert_eq!(controller.key_down('w').unwrap(), KeyResponse::Streaming('w'));
        settle().await;
        // First frame goes out immediately
        assert_eq!(transport.sent(), vec![b"F".to_vec()]);

        tokio::time::sleep(Duration::from_millis(349)).await;
        // t = 350ms: resends at 100, 200, 300
        assert_eq!(count(&transport.sent(), b"F"), 4);

        controller.key_up('w').unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let sent = transport.sent();
        assert_eq!(count(&sent, b"F"), 4);
        assert_eq!(count(&sent, b"DIR_STOP"), 1);
        assert_eq!(sent.last().unwrap(), &b"DIR_STOP".to_vec());
        assert_eq!(controller.active_key(), None);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_direction_sends_no_stop() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(controller.key_down('a').unwrap(), KeyResponse::Streaming('a'));
        tokio::time::sleep(Duration::from_millis(250)).await;

        let sent = transport.sent();
        assert_eq!(count(&sent, b"DIR_STOP"), 0);
        // w at 0 and 100; a at 150 (immediate), 250, 350
        assert_eq!(count(&sent, b"F"), 2);
        assert_eq!(count(&sent, b"L"), 3);
        assert_eq!(controller.active_key(), Some('a'));

        // releasing the replaced key does nothing
        controller.key_up('w').unwrap();
        settle().await;
        assert_eq!(count(&transport.sent(), b"DIR_STOP"), 0);
        assert_eq!(controller.active_key(), Some('a'));

        controller.key_up('a').unwrap();
        settle().await;
        assert_eq!(count(&transport.sent(), b"DIR_STOP"), 1);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_repeat_is_ignored() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        assert_eq!(controller.key_down('w').unwrap(), KeyResponse::Ignored);
        assert_eq!(controller.key_down('W').unwrap(), KeyResponse::Ignored);
        settle().await;
        assert_eq!(transport.sent().len(), 1);

        controller.key_down('l').unwrap();
        assert_eq!(controller.key_down('l').unwrap(), KeyResponse::Ignored);
        settle().await;
        assert_eq!(count(&transport.sent(), b"LIGHT_TOGGLE"), 1);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_fires_once_and_does_not_touch_stream() {
        let (controller, _events, transport) = start();

        assert_eq!(
            controller.key_down('l').unwrap(),
            KeyResponse::ActionFired("Toggle Light".into())
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.sent(), vec![b"LIGHT_TOGGLE".to_vec()]);
        assert_eq!(controller.active_key(), None);

        controller.key_up('l').unwrap();
        assert_eq!(controller.fire_action('l').unwrap(), "Toggle Light");
        assert_eq!(controller.fire_action('q'), Err(ControllerError::UnknownAction('q')));
        assert_eq!(controller.key_down('q').unwrap(), KeyResponse::Ignored);
        settle().await;
        assert_eq!(count(&transport.sent(), b"LIGHT_TOGGLE"), 2);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frequency_change_applies_without_restart() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        tokio::time::sleep(Duration::from_millis(105)).await;
        assert_eq!(count(&transport.sent(), b"F"), 2);

        assert_eq!(controller.set_frequency(999.0), 50.0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        // 20ms period from the last send at 100ms: 120, 140, ..., 200
        assert_eq!(count(&transport.sent(), b"F"), 7);

        assert_eq!(controller.set_frequency(0.0), 1.0);
        assert_eq!(controller.current_frequency(), 1.0);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_send_error_keeps_streaming() {
        let (controller, mut events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        transport.fail(1, TransportError::Send("radio busy".into()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        // the 100ms resend failed, still streaming
        assert_eq!(controller.active_key(), Some('w'));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count(&transport.sent(), b"F"), 2);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let BridgeEvent::SendError { kind, error } = event {
                assert_eq!(kind, FrameKind::Direction('w'));
                assert_eq!(error, TransportError::Send("radio busy".into()));
                saw_error = true;
            }
        }
        assert!(saw_error);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_frame_is_retried_once() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        transport.fail(1, TransportError::Send("lost".into()));
        controller.key_up('w').unwrap();
        settle().await;

        assert_eq!(count(&transport.sent(), b"DIR_STOP"), 1);
        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_drops_to_idle() {
        let (controller, mut events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        transport.fail(1, TransportError::Connection("link down".into()));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(controller.active_key(), None);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.sent(), vec![b"F".to_vec()]);

        let mut lost = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, BridgeEvent::ConnectionLost { .. }) {
                lost = true;
            }
        }
        assert!(lost);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_toggle_refreshes_streaming_frame() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        assert!(controller.toggle_header());
        assert_eq!(controller.cycle_line_ending(), LineEnding::Both);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sent = transport.sent();
        assert_eq!(sent[0], b"F".to_vec());
        assert_eq!(sent[1], vec![0xFF, 0x55, b'F', 0x0D, 0x0A]);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_sends_final_stop() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        controller.shutdown().await;

        assert_eq!(transport.sent(), vec![b"F".to_vec(), b"DIR_STOP".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_without_waiting_for_timeout() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        let started = Instant::now();
        controller.shutdown().await;

        // One poll interval for the tick task, then the writer drains and exits
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(transport.sent(), vec![b"F".to_vec(), b"DIR_STOP".to_vec()]);
        // Writer task released its transport handle
        assert_eq!(Arc::strong_count(&transport), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_controller_stops_its_tasks() {
        let (controller, _events, transport) = start();

        controller.key_down('w').unwrap();
        settle().await;
        drop(controller);
        tokio::time::sleep(Duration::from_millis(300)).await;

        // No resends after the drop and the writer is gone
        assert_eq!(transport.sent(), vec![b"F".to_vec()]);
        assert_eq!(Arc::strong_count(&transport), 1);
    }

    #[test]
    fn test_status_display() {
        let status = ControllerStatus {
            active_key: Some('w'),
            frequency_hz: 10.0,
            header_on: false,
            line_ending: LineEnding::Both,
        };
        assert_eq!(status.to_string(), "driving W, 10.0Hz, header off, line ending BOTH");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_bounded_with_stuck_transport() {
        let (controller, _events) =
            StreamingController::spawn(catalog(), settings(), Arc::new(StuckTransport));

        controller.key_down('w').unwrap();
        let started = Instant::now();
        controller.shutdown().await;
        assert!(started.elapsed() <= STOP_FLUSH_TIMEOUT + Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_data_is_forwarded() {
        let (controller, mut events, transport) = start();

        transport.notify(b"{\"ts\":1}\n");
        match events.recv().await {
            Some(BridgeEvent::DataReceived(bytes)) => assert_eq!(bytes, b"{\"ts\":1}\n".to_vec()),
            other => panic!("unexpected event {:?}", other),
        }

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_text_uses_current_settings() {
        let (controller, mut events, transport) = start();

        controller.cycle_line_ending();
        controller.send_text("HELLO").unwrap();
        settle().await;
        assert_eq!(transport.sent(), vec![b"HELLO\r\n".to_vec()]);

        match events.recv().await {
            Some(BridgeEvent::FrameSent { kind, bytes }) => {
                assert_eq!(kind, FrameKind::Manual);
                assert_eq!(bytes, b"HELLO\r\n".to_vec());
            }
            other => panic!("unexpected event {:?}", other),
        }

        controller.shutdown().await;
    }
}
