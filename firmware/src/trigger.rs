//! Driving the sensor trigger line.

use stm32f1xx_hal::gpio::gpioc::PC3;
use stm32f1xx_hal::gpio::{Output, PushPull};

use echolot_common::hw::TriggerLine;

/// Trigger output (PC3), idle-low push-pull.
pub struct TriggerOut {
    pin: PC3<Output<PushPull>>,
}

impl TriggerOut {
    pub fn new(pin: PC3<Output<PushPull>>) -> Self {
        Self { pin }
    }
}

impl TriggerLine for TriggerOut {
    fn assert(&mut self) {
        self.pin.set_high();
    }

    fn deassert(&mut self) {
        self.pin.set_low();
    }
}
