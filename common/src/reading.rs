//! Publication of the measured echo duration.
//!
//! The measuring side runs in interrupt context, the reporting side in the
//! background loop, so the handoff must never block and must never tear.
//! A single word-sized atomic covers both: the writer stores one `u32`, the
//! reader loads one `u32`, and two raw values at the top of the range are
//! reserved to encode "no echo" and "nothing published yet".

use core::sync::atomic::{AtomicU32, Ordering};

/// Slot has never been written.
const RAW_EMPTY: u32 = u32::MAX;
/// The measurement ceiling elapsed without a falling edge.
const RAW_NO_ECHO: u32 = u32::MAX - 1;

/// One published measurement.
///
/// Measured widths are bounded by the settling ceiling (50 ms class), far
/// below the reserved raw values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EchoReading {
    /// Measured echo pulse width in microseconds.
    Pulse(u32),
    /// No falling edge arrived within the measurement ceiling.
    NoEcho,
}

impl EchoReading {
    fn to_raw(self) -> u32 {
        match self {
            EchoReading::Pulse(us) => us,
            EchoReading::NoEcho => RAW_NO_ECHO,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            RAW_EMPTY => None,
            RAW_NO_ECHO => Some(EchoReading::NoEcho),
            us => Some(EchoReading::Pulse(us)),
        }
    }
}

/// Shared slot holding the most recent reading.
///
/// Written by the state machine at most once per completed cycle, read at
/// leisure by the reporting loop. Reads are idempotent: the same reading is
/// returned until the next cycle completes.
pub struct DurationCell(AtomicU32);

impl DurationCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(RAW_EMPTY))
    }

    /// Publish a reading. Interrupt-context safe, single store.
    pub fn publish(&self, reading: EchoReading) {
        self.0.store(reading.to_raw(), Ordering::Relaxed);
    }

    /// Most recent reading, or `None` before the first completed cycle.
    pub fn read(&self) -> Option<EchoReading> {
        EchoReading::from_raw(self.0.load(Ordering::Relaxed))
    }
}

impl Default for DurationCell {
    fn default() -> Self {
        Self::new()
    }
}
