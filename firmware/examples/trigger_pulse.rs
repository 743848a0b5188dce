//! Pulse the trigger line in a fixed pattern. Useful for verifying the
//! trigger pulse width with a logic analyzer, without a sensor attached.

#![no_main]
#![no_std]

use panic_persist as _;

#[rtic::app(device = stm32f1xx_hal::pac, peripherals = true)]
mod app {
    use stm32f1xx_hal::{pac, prelude::*};

    #[shared]
    struct Shared {}

    #[local]
    struct Local {}

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local, init::Monotonics) {
        let dp: pac::Peripherals = ctx.device;

        let mut flash = dp.FLASH.constrain();
        let rcc = dp.RCC.constrain();
        let clocks = rcc
            .cfgr
            .use_hse(8.MHz())
            .sysclk(72.MHz())
            .freeze(&mut flash.acr);

        let mut delay = ctx.core.SYST.delay(&clocks);
        let mut gpioc = dp.GPIOC.split();
        let mut trig = gpioc.pc3.into_push_pull_output(&mut gpioc.crl);

        // Ten trigger-shaped pulses: 10 µs high, 50 ms low.
        for _ in 0..10 {
            trig.set_high();
            delay.delay_us(10_u16);
            trig.set_low();
            delay.delay_ms(50_u16);
        }

        (Shared {}, Local {}, init::Monotonics())
    }
}
