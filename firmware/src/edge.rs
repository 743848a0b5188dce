//! Echo line edge monitoring via EXTI line 0.

use stm32f1xx_hal::afio;
use stm32f1xx_hal::gpio::gpioa::PA0;
use stm32f1xx_hal::gpio::{Edge, ExtiPin, Floating, Input};
use stm32f1xx_hal::pac;

use echolot_common::hw::{EdgeMonitor, EdgePolarity};

/// The echo input line (PA0), edge-sensitive through EXTI line 0.
///
/// The interrupt stays enabled for the whole process lifetime; re-arming
/// only rewrites the trigger polarity.
pub struct EchoEdge {
    pin: PA0<Input<Floating>>,
    exti: pac::EXTI,
}

impl EchoEdge {
    pub fn new(
        mut pin: PA0<Input<Floating>>,
        mut exti: pac::EXTI,
        afio: &mut afio::Parts,
    ) -> Self {
        pin.make_interrupt_source(afio);
        pin.trigger_on_edge(&mut exti, Edge::Rising);
        pin.enable_interrupt(&mut exti);
        Self { pin, exti }
    }

    /// Acknowledge the pending edge interrupt.
    pub fn clear_pending(&mut self) {
        self.pin.clear_interrupt_pending_bit();
    }
}

impl EdgeMonitor for EchoEdge {
    fn arm(&mut self, polarity: EdgePolarity) {
        let edge = match polarity {
            EdgePolarity::Rising => Edge::Rising,
            EdgePolarity::Falling => Edge::Falling,
        };
        self.pin.trigger_on_edge(&mut self.exti, edge);
    }
}
