//! Sensor timing constants.

/// Timing parameters of the ranging cycle.
///
/// The defaults are the HC-SR04 datasheet values. They are plain data so a
/// different sensor variant can substitute its own numbers without touching
/// the cycle logic.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SensorTiming {
    /// Width of the trigger pulse in microseconds.
    pub trigger_pulse_us: u32,
    /// Length of the settling window in microseconds. Doubles as the echo
    /// measurement ceiling: a pulse that has not fallen by then counts as
    /// lost.
    pub echo_ceiling_us: u32,
    /// Round-trip microseconds of sound per millimeter of distance.
    pub us_per_mm: u32,
}

impl SensorTiming {
    /// HC-SR04 datasheet values.
    pub const fn hc_sr04() -> Self {
        Self {
            trigger_pulse_us: 10,
            echo_ceiling_us: 50_000,
            us_per_mm: 29,
        }
    }

    /// Convert an echo pulse width to a distance in millimeters
    /// (integer division, rounds toward zero).
    pub fn distance_mm(&self, duration_us: u32) -> u32 {
        duration_us / self.us_per_mm
    }
}

impl Default for SensorTiming {
    fn default() -> Self {
        Self::hc_sr04()
    }
}
