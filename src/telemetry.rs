// Robot notifications: newline-delimited lines, some of them JSON telemetry
//
// BLE notifications split lines arbitrarily, so bytes are buffered until a
// '\n' arrives. Lines that parse as a telemetry object update the state;
// anything else is shown as raw text.

use serde::{Deserialize, Serialize};

/// Checkpoints on the course, numbered 1..=TOTAL_CHECKPOINTS
pub const TOTAL_CHECKPOINTS: u8 = 6;

/// Wheel PWM duty reported by the robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pwm {
    pub l: Option<i64>,
    pub r: Option<i64>,
}

/// One telemetry line; every field is optional and absent ones keep their last value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub ts: Option<i64>,
    pub chrono: Option<i64>,
    /// Heading in degrees, -180..180
    pub gz: Option<f64>,
    pub etat: Option<i64>,
    pub pwm: Option<Pwm>,
    pub capt: Option<Vec<i64>>,
    pub cp: Option<i64>,
}

/// Latest known robot state
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryState {
    pub ts: i64,
    pub chrono: i64,
    pub gz: f64,
    pub etat: i64,
    pub pwm_l: i64,
    pub pwm_r: i64,
    pub capt: Vec<i64>,
    pub completed_checkpoints: Vec<u8>,
    pub last_checkpoint: u8,
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self {
            ts: 0,
            chrono: 0,
            gz: 0.0,
            etat: 0,
            pwm_l: 0,
            pwm_r: 0,
            capt: vec![0; 5],
            completed_checkpoints: Vec::new(),
            last_checkpoint: 0,
        }
    }
}

impl TelemetryState {
    pub fn apply(&mut self, frame: &TelemetryFrame) {
        if let Some(ts) = frame.ts {
            self.ts = ts;
        }
        if let Some(chrono) = frame.chrono {
            self.chrono = chrono;
        }
        if let Some(gz) = frame.gz {
            self.gz = gz;
        }
        if let Some(etat) = frame.etat {
            self.etat = etat;
        }
        if let Some(pwm) = frame.pwm {
            self.pwm_l = pwm.l.unwrap_or(self.pwm_l);
            self.pwm_r = pwm.r.unwrap_or(self.pwm_r);
        }
        if let Some(capt) = &frame.capt {
            self.capt = capt.clone();
        }

        // Out-of-range checkpoint numbers are ignored
        if let Some(cp) = frame.cp.and_then(|cp| u8::try_from(cp).ok()) {
            if (1..=TOTAL_CHECKPOINTS).contains(&cp) {
                if !self.completed_checkpoints.contains(&cp) {
                    self.completed_checkpoints.push(cp);
                    self.completed_checkpoints.sort_unstable();
                }
                self.last_checkpoint = cp;
            }
        }
    }

    /// Checkpoint `n` counts as reached once the robot reported it or a later one
    pub fn checkpoint_reached(&self, n: u8) -> bool {
        n >= 1 && n <= self.last_checkpoint
    }

    /// One `#` per reached checkpoint, `.` for the rest
    pub fn checkpoint_timeline(&self) -> String {
        (1..=TOTAL_CHECKPOINTS)
            .map(|n| if self.checkpoint_reached(n) { '#' } else { '.' })
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "ts={} chrono={} gz={:.1} etat={} pwm=({}, {}) capt={:?} cp=[{}] {}/{} done={:?}",
            self.ts,
            self.chrono,
            self.gz,
            self.etat,
            self.pwm_l,
            self.pwm_r,
            self.capt,
            self.checkpoint_timeline(),
            self.last_checkpoint,
            TOTAL_CHECKPOINTS,
            self.completed_checkpoints
        )
    }
}

/// A complete line from the robot
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Telemetry(TelemetryFrame),
    Raw(String),
}

impl Received {
    pub fn parse(line: &str) -> Self {
        match serde_json::from_str::<TelemetryFrame>(line) {
            Ok(frame) => Received::Telemetry(frame),
            Err(_) => Received::Raw(line.to_string()),
        }
    }
}

/// Reassembles newline-terminated lines from notification chunks
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the non-blank lines it completed, trimmed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }
}
