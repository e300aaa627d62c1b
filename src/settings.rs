// Line ending, header toggle and streaming frequency
//
// Owned by the streaming controller and mutated under its lock.

use std::time::Duration;

use crate::config::{DEFAULT_FREQUENCY_HZ, DEFAULT_HEADER, MAX_FREQUENCY_HZ, MIN_FREQUENCY_HZ};
use crate::frame::{LineEnding, build_frame};

#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    header: Vec<u8>,
    header_on: bool,
    line_ending: LineEnding,
    frequency_hz: f64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            header: DEFAULT_HEADER.to_vec(),
            header_on: false,
            line_ending: LineEnding::Both,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
        }
    }
}

impl LinkSettings {
    pub fn new(header: Vec<u8>) -> Self {
        Self {
            header,
            ..Self::default()
        }
    }

    pub fn with_header_on(mut self, on: bool) -> Self {
        self.header_on = on;
        self
    }

    pub fn with_line_ending(mut self, line_ending: LineEnding) -> Self {
        self.line_ending = line_ending;
        self
    }

    pub fn with_frequency(mut self, hz: f64) -> Self {
        self.set_frequency(hz);
        self
    }

    /// Flip the header option, returns the new state
    pub fn toggle_header(&mut self) -> bool {
        self.header_on = !self.header_on;
        self.header_on
    }

    /// Advance BOTH -> NL -> CR -> NONE -> BOTH, returns the new mode
    pub fn cycle_line_ending(&mut self) -> LineEnding {
        self.line_ending = self.line_ending.next();
        self.line_ending
    }

    /// Set the streaming frequency, clamped to [1, 50] Hz; returns the effective value
    pub fn set_frequency(&mut self, hz: f64) -> f64 {
        // NaN has no sensible meaning here, treat it as the slowest rate
        let hz = if hz.is_nan() { MIN_FREQUENCY_HZ } else { hz };
        self.frequency_hz = hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ);
        self.frequency_hz
    }

    pub fn current_frequency(&self) -> f64 {
        self.frequency_hz
    }

    /// Time between two direction frames
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frequency_hz)
    }

    pub fn header_on(&self) -> bool {
        self.header_on
    }

    pub fn header(&self) -> &[u8] {
        &self.header
    }

    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Frame a payload core with the current header and line ending
    pub fn frame(&self, core: &[u8]) -> Vec<u8> {
        build_frame(core, self.header_on, &self.header, self.line_ending)
    }
}
