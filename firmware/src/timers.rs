//! The two basic timers of the ranging cycle, programmed at register level.
//!
//! Both tick at 1 µs and run in one-pulse mode, so reaching the auto-reload
//! value stops the counter and latches the update flag in one step. TIM6
//! doubles as the echo pulse counter and the settling window; TIM7 times the
//! trigger pulse width.

use stm32f1xx_hal::pac;
use stm32f1xx_hal::rcc::Clocks;

use echolot_common::hw::{PulseCounter, SettlingTimer, TriggerWindowTimer};
use echolot_common::timing::SensorTiming;

/// Prescaler dividing `timer_clock_hz` down to a 1 MHz (1 µs) tick.
fn microsecond_prescaler(timer_clock_hz: u32) -> u16 {
    (timer_clock_hz / 1_000_000 - 1) as u16
}

/// TIM6: echo pulse counter and settling window.
pub struct EchoMeter {
    tim: pac::TIM6,
}

impl EchoMeter {
    pub fn new(tim: pac::TIM6, clocks: &Clocks, timing: &SensorTiming) -> Self {
        // Enable and reset TIM6 in RCC.
        //
        // Correctness: we only modify TIM6 related bits in the RCC register
        // block, and we own pac::TIM6.
        unsafe {
            let rcc = &*pac::RCC::ptr();
            rcc.apb1enr.modify(|_, w| w.tim6en().set_bit());
            rcc.apb1rstr.modify(|_, w| w.tim6rst().set_bit());
            rcc.apb1rstr.modify(|_, w| w.tim6rst().clear_bit());
        }

        tim.psc
            .write(|w| w.psc().bits(microsecond_prescaler(clocks.pclk1_tim().raw())));
        // Subtract 1 from the ARR register because the update event is
        // triggered *after* that tick.
        tim.arr
            .write(|w| w.arr().bits(timing.echo_ceiling_us as u16 - 1));
        // One-pulse mode: the counter stops itself at the update event, so
        // the same ceiling bounds a measurement and ends the settling rest.
        tim.cr1.modify(|_, w| w.opm().set_bit());
        // Trigger an update event (UEV) in the event generation register
        // (EGR) to load the prescaler, then drop the flag it raises.
        tim.egr.write(|w| w.ug().set_bit());
        tim.sr.write(|w| w.uif().clear_bit());
        tim.dier.modify(|_, w| w.uie().set_bit());

        Self { tim }
    }

    /// Acknowledge the pending update interrupt.
    pub fn clear_pending(&mut self) {
        self.tim.sr.write(|w| w.uif().clear_bit());
    }
}

impl PulseCounter for EchoMeter {
    fn start(&mut self) {
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
    }

    fn stop(&mut self) {
        self.tim.cr1.modify(|_, w| w.cen().clear_bit());
    }

    fn reset(&mut self) {
        self.tim.cnt.write(|w| w.cnt().bits(0));
    }

    fn read(&self) -> u32 {
        u32::from(self.tim.cnt.read().cnt().bits())
    }
}

impl SettlingTimer for EchoMeter {
    fn arm(&mut self) {
        self.tim.cnt.write(|w| w.cnt().bits(0));
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
    }
}

/// TIM7: one-shot trigger pulse width.
pub struct TriggerTimer {
    tim: pac::TIM7,
}

impl TriggerTimer {
    pub fn new(tim: pac::TIM7, clocks: &Clocks, timing: &SensorTiming) -> Self {
        // Correctness: see `EchoMeter::new`.
        unsafe {
            let rcc = &*pac::RCC::ptr();
            rcc.apb1enr.modify(|_, w| w.tim7en().set_bit());
            rcc.apb1rstr.modify(|_, w| w.tim7rst().set_bit());
            rcc.apb1rstr.modify(|_, w| w.tim7rst().clear_bit());
        }

        tim.psc
            .write(|w| w.psc().bits(microsecond_prescaler(clocks.pclk1_tim().raw())));
        tim.arr
            .write(|w| w.arr().bits(timing.trigger_pulse_us as u16 - 1));
        tim.cr1.modify(|_, w| w.opm().set_bit());
        tim.egr.write(|w| w.ug().set_bit());
        tim.sr.write(|w| w.uif().clear_bit());
        tim.dier.modify(|_, w| w.uie().set_bit());

        Self { tim }
    }

    /// Acknowledge the pending update interrupt.
    pub fn clear_pending(&mut self) {
        self.tim.sr.write(|w| w.uif().clear_bit());
    }
}

impl TriggerWindowTimer for TriggerTimer {
    fn arm(&mut self) {
        self.tim.cnt.write(|w| w.cnt().bits(0));
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
    }
}
