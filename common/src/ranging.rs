//! The ranging cycle state machine.
//!
//! One measurement cycle is: hold the trigger line high for the trigger
//! pulse width, wait for the echo pulse to rise, measure how long it stays
//! high, then rest for the settling window before re-triggering. Nothing
//! drives this cycle from the outside; each phase is entered from the event
//! that ends the previous one, so the timer/edge event chain is the
//! scheduler.
//!
//! The machine owns the hardware capabilities it drives. All register state
//! is therefore mutated from exactly one place, and the only value that
//! crosses over to the background loop goes through the [`DurationCell`].

use crate::hw::{
    EdgeMonitor, EdgePolarity, PulseCounter, SettlingTimer, TriggerLine, TriggerWindowTimer,
};
use crate::reading::{DurationCell, EchoReading};
use crate::timing::SensorTiming;

/// Phase of the measurement cycle. The cycle has no terminal phase; after
/// `Settling` it wraps around to `TriggerHigh` forever.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CyclePhase {
    /// Trigger line held active, trigger-width timer counting.
    TriggerHigh,
    /// Trigger released, armed for the rising edge of the echo pulse.
    AwaitingEcho,
    /// Echo line is high: pulse counter running, armed for the falling edge.
    MeasuringEcho,
    /// Rest window while acoustic ringing from the last burst decays.
    Settling,
}

/// Events delivered by the timing hardware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RangingEvent {
    /// The echo line crossed the currently armed polarity.
    EdgeDetected,
    /// The trigger pulse width has passed.
    TriggerWindowElapsed,
    /// The settling window (or, while measuring, the ceiling) has passed.
    SettlingElapsed,
}

/// The ranging cycle driver.
///
/// `Cnt` is bound to both counter roles: on the target hardware the
/// settling window and the measurement ceiling are the same timer, which is
/// also what bounds the wait for a lost echo.
pub struct RangingCycle<'a, Trig, Edge, Cnt, Win> {
    timing: SensorTiming,
    trigger: Trig,
    edge: Edge,
    counter: Cnt,
    window: Win,
    phase: CyclePhase,
    published: &'a DurationCell,
}

impl<'a, Trig, Edge, Cnt, Win> RangingCycle<'a, Trig, Edge, Cnt, Win>
where
    Trig: TriggerLine,
    Edge: EdgeMonitor,
    Cnt: PulseCounter + SettlingTimer,
    Win: TriggerWindowTimer,
{
    pub fn new(
        timing: SensorTiming,
        trigger: Trig,
        edge: Edge,
        counter: Cnt,
        window: Win,
        published: &'a DurationCell,
    ) -> Self {
        Self {
            timing,
            trigger,
            edge,
            counter,
            window,
            phase: CyclePhase::TriggerHigh,
            published,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Assert the trigger line and arm the trigger-width timer, entering the
    /// first cycle. Call once after the hardware is set up; every later
    /// re-trigger comes out of `handle`.
    pub fn start(&mut self) {
        self.trigger.assert();
        self.window.arm();
        self.phase = CyclePhase::TriggerHigh;
    }

    /// Advance the cycle in response to a hardware event.
    ///
    /// Total over `(phase, event)`: pairs outside the cycle order come from
    /// stray or late interrupts and are dropped without touching the phase,
    /// the hardware or the published reading.
    pub fn handle(&mut self, event: RangingEvent) {
        match (self.phase, event) {
            // Trigger pulse width is over: release the line and wait for
            // the echo pulse to start.
            (CyclePhase::TriggerHigh, RangingEvent::TriggerWindowElapsed) => {
                self.trigger.deassert();
                self.edge.arm(EdgePolarity::Rising);
                self.phase = CyclePhase::AwaitingEcho;
            }

            // Echo pulse started: time it until the falling edge. Starting
            // the counter also arms the ceiling event, which bounds the
            // wait if the falling edge never comes.
            (CyclePhase::AwaitingEcho, RangingEvent::EdgeDetected) => {
                self.counter.reset();
                self.counter.start();
                self.edge.arm(EdgePolarity::Falling);
                self.phase = CyclePhase::MeasuringEcho;
            }

            // Echo pulse ended: the counter value is the round-trip time.
            (CyclePhase::MeasuringEcho, RangingEvent::EdgeDetected) => {
                self.counter.stop();
                let width = self.counter.read().min(self.timing.echo_ceiling_us);
                self.published.publish(EchoReading::Pulse(width));
                self.counter.reset();
                self.edge.arm(EdgePolarity::Rising);
                SettlingTimer::arm(&mut self.counter);
                self.phase = CyclePhase::Settling;
            }

            // Ceiling reached without a falling edge: the echo is lost.
            // Publish the sentinel and rest as after a normal measurement.
            (CyclePhase::MeasuringEcho, RangingEvent::SettlingElapsed) => {
                self.counter.stop();
                self.counter.reset();
                self.published.publish(EchoReading::NoEcho);
                self.edge.arm(EdgePolarity::Rising);
                SettlingTimer::arm(&mut self.counter);
                self.phase = CyclePhase::Settling;
            }

            // Ringing has decayed: fire the next trigger pulse.
            (CyclePhase::Settling, RangingEvent::SettlingElapsed) => {
                self.trigger.assert();
                self.window.arm();
                self.phase = CyclePhase::TriggerHigh;
            }

            // Stray event for this phase (e.g. an edge while the trigger is
            // still high, or ringing edges during the settling window).
            _ => {}
        }
    }

    /// The trigger line capability.
    pub fn trigger_line(&mut self) -> &mut Trig {
        &mut self.trigger
    }

    /// The edge monitor capability. Interrupt handlers use this to
    /// acknowledge the pending edge before feeding the event.
    pub fn edge_monitor(&mut self) -> &mut Edge {
        &mut self.edge
    }

    /// The pulse counter / settling timer capability.
    pub fn pulse_counter(&mut self) -> &mut Cnt {
        &mut self.counter
    }

    /// The trigger-width timer capability.
    pub fn trigger_window(&mut self) -> &mut Win {
        &mut self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[derive(Default)]
    struct FakeTrigger {
        asserted: bool,
        pulses: u32,
    }

    impl TriggerLine for FakeTrigger {
        fn assert(&mut self) {
            self.asserted = true;
            self.pulses += 1;
        }

        fn deassert(&mut self) {
            self.asserted = false;
        }
    }

    #[derive(Default)]
    struct FakeEdge {
        armed: Option<EdgePolarity>,
    }

    impl EdgeMonitor for FakeEdge {
        fn arm(&mut self, polarity: EdgePolarity) {
            self.armed = Some(polarity);
        }
    }

    /// Both counter roles in one fake, like the shared hardware timer.
    #[derive(Default)]
    struct FakeCounter {
        counting: bool,
        resting: bool,
        value: u32,
    }

    impl PulseCounter for FakeCounter {
        fn start(&mut self) {
            self.counting = true;
            self.resting = false;
        }

        fn stop(&mut self) {
            self.counting = false;
            self.resting = false;
        }

        fn reset(&mut self) {
            self.value = 0;
        }

        fn read(&self) -> u32 {
            self.value
        }
    }

    impl SettlingTimer for FakeCounter {
        fn arm(&mut self) {
            self.value = 0;
            self.counting = false;
            self.resting = true;
        }
    }

    #[derive(Default)]
    struct FakeWindow {
        armed: bool,
    }

    impl TriggerWindowTimer for FakeWindow {
        fn arm(&mut self) {
            self.armed = true;
        }
    }

    type TestCycle<'a> = RangingCycle<'a, FakeTrigger, FakeEdge, FakeCounter, FakeWindow>;

    fn started(cell: &DurationCell) -> TestCycle<'_> {
        let mut cycle = RangingCycle::new(
            SensorTiming::default(),
            FakeTrigger::default(),
            FakeEdge::default(),
            FakeCounter::default(),
            FakeWindow::default(),
            cell,
        );
        cycle.start();
        cycle
    }

    /// Drive a started machine into the requested phase.
    fn advance_to(cycle: &mut TestCycle<'_>, phase: CyclePhase) {
        let steps = match phase {
            CyclePhase::TriggerHigh => &[][..],
            CyclePhase::AwaitingEcho => &[RangingEvent::TriggerWindowElapsed][..],
            CyclePhase::MeasuringEcho => {
                &[RangingEvent::TriggerWindowElapsed, RangingEvent::EdgeDetected][..]
            }
            CyclePhase::Settling => &[
                RangingEvent::TriggerWindowElapsed,
                RangingEvent::EdgeDetected,
                RangingEvent::EdgeDetected,
            ][..],
        };
        for &event in steps {
            cycle.handle(event);
        }
        assert_eq!(cycle.phase(), phase);
    }

    /// Run one full cycle with the given simulated echo width, starting
    /// from `TriggerHigh`, ending back in `TriggerHigh`.
    fn run_cycle(cycle: &mut TestCycle<'_>, width_us: u32) {
        cycle.handle(RangingEvent::TriggerWindowElapsed);
        cycle.handle(RangingEvent::EdgeDetected);
        cycle.pulse_counter().value = width_us;
        cycle.handle(RangingEvent::EdgeDetected);
        cycle.handle(RangingEvent::SettlingElapsed);
    }

    #[test]
    fn test_start_asserts_trigger() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);

        assert_eq!(cycle.phase(), CyclePhase::TriggerHigh);
        assert!(cycle.trigger_line().asserted);
        assert!(cycle.trigger_window().armed);
        assert!(!cycle.pulse_counter().counting);
    }

    #[test]
    fn test_trigger_window_elapsed_releases_trigger() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);

        cycle.handle(RangingEvent::TriggerWindowElapsed);

        assert_eq!(cycle.phase(), CyclePhase::AwaitingEcho);
        assert!(!cycle.trigger_line().asserted);
        assert_eq!(cycle.edge_monitor().armed, Some(EdgePolarity::Rising));
        // Nothing is timing while we wait for the echo to start.
        assert!(!cycle.pulse_counter().counting);
        assert!(!cycle.pulse_counter().resting);
    }

    #[test]
    fn test_rising_edge_starts_counter_at_zero() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, CyclePhase::AwaitingEcho);
        // Leftover value from a previous cycle must not leak in.
        cycle.pulse_counter().value = 77;

        cycle.handle(RangingEvent::EdgeDetected);

        assert_eq!(cycle.phase(), CyclePhase::MeasuringEcho);
        assert!(cycle.pulse_counter().counting);
        assert_eq!(cycle.pulse_counter().value, 0);
        assert_eq!(cycle.edge_monitor().armed, Some(EdgePolarity::Falling));
    }

    #[test]
    fn test_falling_edge_publishes_exact_width() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, CyclePhase::MeasuringEcho);
        cycle.pulse_counter().value = 600;

        cycle.handle(RangingEvent::EdgeDetected);

        assert_eq!(cycle.phase(), CyclePhase::Settling);
        assert_eq!(cell.read(), Some(EchoReading::Pulse(600)));
        assert!(!cycle.pulse_counter().counting);
        assert!(cycle.pulse_counter().resting);
        assert_eq!(cycle.edge_monitor().armed, Some(EdgePolarity::Rising));
        // A 600 µs pulse reads as 20 mm.
        assert_eq!(SensorTiming::default().distance_mm(600), 20);
    }

    #[test]
    fn test_lost_echo_publishes_sentinel() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, CyclePhase::MeasuringEcho);
        cycle.pulse_counter().value = 50_000;

        // The ceiling elapses instead of a falling edge.
        cycle.handle(RangingEvent::SettlingElapsed);

        assert_eq!(cycle.phase(), CyclePhase::Settling);
        assert_eq!(cell.read(), Some(EchoReading::NoEcho));
        assert!(cycle.pulse_counter().resting);

        // The cycle is not stuck: the settling window re-triggers as usual.
        cycle.handle(RangingEvent::SettlingElapsed);
        assert_eq!(cycle.phase(), CyclePhase::TriggerHigh);
        assert!(cycle.trigger_line().asserted);
    }

    #[test]
    fn test_settling_elapsed_retriggers() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, CyclePhase::Settling);

        cycle.handle(RangingEvent::SettlingElapsed);

        assert_eq!(cycle.phase(), CyclePhase::TriggerHigh);
        assert!(cycle.trigger_line().asserted);
        assert!(cycle.trigger_window().armed);
    }

    #[test]
    fn test_counter_read_is_clamped_to_ceiling() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, CyclePhase::MeasuringEcho);
        cycle.pulse_counter().value = 60_001;

        cycle.handle(RangingEvent::EdgeDetected);

        assert_eq!(cell.read(), Some(EchoReading::Pulse(50_000)));
    }

    #[test]
    fn test_back_to_back_cycles() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);

        for (width, mm) in [(600, 20), (1740, 60), (29, 1)] {
            run_cycle(&mut cycle, width);
            assert_eq!(cycle.phase(), CyclePhase::TriggerHigh);
            assert!(cycle.trigger_line().asserted);
            assert_eq!(cell.read(), Some(EchoReading::Pulse(width)));
            assert_eq!(SensorTiming::default().distance_mm(width), mm);
        }
        // One trigger pulse per cycle, plus the boot pulse.
        assert_eq!(cycle.trigger_line().pulses, 4);
    }

    #[test]
    fn test_at_most_one_timing_source_active() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);

        let events = [
            RangingEvent::TriggerWindowElapsed,
            RangingEvent::EdgeDetected,
            RangingEvent::EdgeDetected,
            RangingEvent::SettlingElapsed,
            RangingEvent::TriggerWindowElapsed,
        ];
        for event in events {
            let asserted = cycle.trigger_line().asserted;
            let counting = cycle.pulse_counter().counting;
            let resting = cycle.pulse_counter().resting;
            let active = [asserted, counting, resting];
            assert!(active.iter().filter(|&&a| a).count() <= 1, "{active:?}");
            cycle.handle(event);
        }
    }

    #[rstest]
    // Edges while the trigger pulse is still high.
    #[case(CyclePhase::TriggerHigh, RangingEvent::EdgeDetected)]
    #[case(CyclePhase::TriggerHigh, RangingEvent::SettlingElapsed)]
    #[case(CyclePhase::AwaitingEcho, RangingEvent::TriggerWindowElapsed)]
    #[case(CyclePhase::AwaitingEcho, RangingEvent::SettlingElapsed)]
    #[case(CyclePhase::MeasuringEcho, RangingEvent::TriggerWindowElapsed)]
    // Ringing edges during the settling window.
    #[case(CyclePhase::Settling, RangingEvent::EdgeDetected)]
    #[case(CyclePhase::Settling, RangingEvent::TriggerWindowElapsed)]
    fn test_stray_events_are_dropped(#[case] phase: CyclePhase, #[case] event: RangingEvent) {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, phase);
        let published_before = cell.read();

        cycle.handle(event);

        assert_eq!(cycle.phase(), phase);
        assert_eq!(cell.read(), published_before);
    }

    #[test]
    fn test_nothing_published_before_first_cycle() {
        let cell = DurationCell::new();
        let mut cycle = started(&cell);
        advance_to(&mut cycle, CyclePhase::MeasuringEcho);

        // Still measuring: the slot must stay empty.
        assert_eq!(cell.read(), None);
        cycle.pulse_counter().value = 300;
        cycle.handle(RangingEvent::EdgeDetected);
        assert_eq!(cell.read(), Some(EchoReading::Pulse(300)));
    }
}
