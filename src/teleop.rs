// Keyboard teleop: letters drive/fire actions, +/- frequency, F1 header, F2 line ending,
// Enter type-and-send, Esc quit
//
// Terminals that support the kitty keyboard protocol report key releases. On the
// others a held key only shows up as repeated presses, so a key counts as
// released once no press arrived for RELEASE_TIMEOUT.

use crossterm::{
    event::{
        self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement},
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::catalog::CommandCatalog;
use crate::messages::BridgeEvent;
use crate::streaming::{KeyResponse, StreamingController};
use crate::telemetry::{LineAssembler, Received, TelemetryState};

const POLL_MS: u64 = 20;

// Longer than the usual OS delay before auto-repeat kicks in
const RELEASE_TIMEOUT: Duration = Duration::from_millis(600);

const FREQUENCY_STEP_HZ: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Key and event handling, independent of the terminal itself
pub struct Teleop<'a> {
    controller: &'a StreamingController,
    /// Held letters and when they were last seen pressed
    held: HashMap<char, Instant>,
    release_events: bool,
    /// Some while typing a manual message
    text: Option<String>,
    assembler: LineAssembler,
    telemetry: TelemetryState,
}

impl<'a> Teleop<'a> {
    pub fn new(controller: &'a StreamingController, release_events: bool) -> Self {
        Self {
            controller,
            held: HashMap::new(),
            release_events,
            text: None,
            assembler: LineAssembler::new(),
            telemetry: TelemetryState::default(),
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            return Flow::Quit;
        }
        if self.text.is_some() {
            self.handle_text_key(key);
            return Flow::Continue;
        }

        let pressed = key.kind == KeyEventKind::Press || key.kind == KeyEventKind::Repeat;
        match key.code {
            KeyCode::Char('+') | KeyCode::Char('=') if pressed => {
                let hz = self.controller.current_frequency() + FREQUENCY_STEP_HZ;
                self.controller.set_frequency(hz);
            }
            KeyCode::Char('-') if pressed => {
                let hz = self.controller.current_frequency() - FREQUENCY_STEP_HZ;
                self.controller.set_frequency(hz);
            }
            KeyCode::F(1) if key.kind == KeyEventKind::Press => {
                self.controller.toggle_header();
            }
            KeyCode::F(2) if key.kind == KeyEventKind::Press => {
                self.controller.cycle_line_ending();
            }
            KeyCode::Enter if key.kind == KeyEventKind::Press => {
                self.release_all();
                info!("Type a message, Enter to send, Esc to cancel");
                self.text = Some(String::new());
            }
            KeyCode::Esc if key.kind == KeyEventKind::Press => return Flow::Quit,

            KeyCode::Char(c) if c.is_ascii_alphanumeric() => {
                let c = c.to_ascii_lowercase();
                if pressed {
                    self.press(c);
                } else {
                    self.release(c);
                }
            }

            _ => {}
        }
        Flow::Continue
    }

    fn handle_text_key(&mut self, key: KeyEvent) {
        if key.kind == KeyEventKind::Release {
            return;
        }
        let Some(text) = self.text.as_mut() else {
            return;
        };
        match key.code {
            KeyCode::Char(c) => text.push(c),
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Esc => {
                info!("Message cancelled");
                self.text = None;
            }
            KeyCode::Enter => {
                let text = self.text.take().unwrap_or_default();
                if text.is_empty() {
                    return;
                }
                match self.controller.send_text(&text) {
                    Ok(()) => info!("Sent: {}", text),
                    Err(e) => warn!("Could not send message: {}", e),
                }
            }
            _ => {}
        }
    }

    fn press(&mut self, key: char) {
        self.held.insert(key, Instant::now());
        match self.controller.key_down(key) {
            Ok(KeyResponse::Streaming(k)) => info!("Driving: {}", k.to_ascii_uppercase()),
            Ok(KeyResponse::ActionFired(_)) | Ok(KeyResponse::Ignored) => {}
            Err(e) => warn!("Key '{}' failed: {}", key, e),
        }
    }

    fn release(&mut self, key: char) {
        self.held.remove(&key);
        if let Err(e) = self.controller.key_up(key) {
            warn!("Key '{}' release failed: {}", key, e);
        }
    }

    fn release_all(&mut self) {
        let keys: Vec<char> = self.held.keys().copied().collect();
        for key in keys {
            self.release(key);
        }
    }

    /// Without release events, keys not re-pressed for a while are released
    pub fn expire_held(&mut self, now: Instant) {
        if self.release_events {
            return;
        }
        let expired: Vec<char> = self
            .held
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > RELEASE_TIMEOUT)
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            self.release(key);
        }
    }

    pub fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::DataReceived(bytes) => {
                for line in self.assembler.push(&bytes) {
                    match Received::parse(&line) {
                        Received::Telemetry(frame) => {
                            self.telemetry.apply(&frame);
                            info!("Telemetry: {}", self.telemetry.summary());
                        }
                        Received::Raw(text) => info!("Received: {}", text),
                    }
                }
            }
            BridgeEvent::ConnectionLost { error } => {
                error!("Connection lost: {}", error);
                self.held.clear();
                info!("Status: {}", self.controller.status());
            }
            // Already logged by the writer task
            BridgeEvent::FrameSent { .. } | BridgeEvent::SendError { .. } => {}
        }
    }
}

fn print_controls(catalog: &CommandCatalog) {
    let directions: String = catalog
        .direction_keys()
        .iter()
        .map(|k| k.to_ascii_uppercase())
        .collect();
    info!("Controls: {}=drive (hold), +/-=frequency, F1=header, F2=line ending, Enter=send text, Esc=quit", directions);
    for action in catalog.actions() {
        info!("  {} = {}", action.key.to_ascii_uppercase(), action.label);
    }
}

/// Run the terminal loop until Esc or Ctrl+C
pub async fn run_teleop(
    controller: &StreamingController,
    catalog: &CommandCatalog,
    events: &mut mpsc::UnboundedReceiver<BridgeEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    print_controls(catalog);

    let release_events = supports_keyboard_enhancement().unwrap_or(false);
    if !release_events {
        info!(
            "Terminal does not report key releases, releasing after {}ms without repeat",
            RELEASE_TIMEOUT.as_millis()
        );
    }

    let mut terminal = TerminalGuard::enter(release_events)?;
    let result = teleop_loop(controller, events, release_events).await;
    terminal.restore()?;

    result
}

/// Raw mode and keyboard flags, undone on every exit path
struct TerminalGuard {
    raw: bool,
    enhanced: bool,
}

impl TerminalGuard {
    fn enter(release_events: bool) -> std::io::Result<Self> {
        enable_raw_mode()?;
        let mut guard = Self {
            raw: true,
            enhanced: false,
        };
        if release_events {
            // On failure the guard is dropped and raw mode is disabled again
            execute!(
                std::io::stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
            guard.enhanced = true;
        }
        Ok(guard)
    }

    fn restore(&mut self) -> std::io::Result<()> {
        if self.enhanced {
            self.enhanced = false;
            let _ = execute!(std::io::stdout(), PopKeyboardEnhancementFlags);
        }
        if self.raw {
            self.raw = false;
            disable_raw_mode()?;
        }
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

async fn teleop_loop(
    controller: &StreamingController,
    events: &mut mpsc::UnboundedReceiver<BridgeEvent>,
    release_events: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut teleop = Teleop::new(controller, release_events);
    info!("Status: {}", controller.status());

    loop {
        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(POLL_MS))? {
            if let Event::Key(key) = event::read()? {
                if teleop.handle_key(key) == Flow::Quit {
                    break;
                }
            }
        }

        teleop.expire_held(Instant::now());

        while let Ok(event) = events.try_recv() {
            teleop.handle_event(event);
        }

        // Let the controller tasks run on a single-threaded runtime too
        tokio::task::yield_now().await;
    }

    Ok(())
}
