#![no_main]
#![no_std]
#![cfg(target_arch = "arm")]

// Third party
use panic_persist as _;

// Modules
mod edge;
mod timers;
mod trigger;

use echolot_common::reading::DurationCell;

/// Last completed reading, handed from the measuring interrupts to the
/// reporting loop. A lock-free slot: the reporting loop must never mask the
/// measuring interrupts.
static LAST_READING: DurationCell = DurationCell::new();

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[rtic::app(device = stm32f1xx_hal::pac, peripherals = true)]
mod app {
    use core::fmt::Write;

    use stm32f1xx_hal::timer::SysDelay;
    use stm32f1xx_hal::{pac, prelude::*, serial};

    use echolot_common::ranging::{RangingCycle, RangingEvent};
    use echolot_common::reading::EchoReading;
    use echolot_common::timing::SensorTiming;

    use crate::edge::EchoEdge;
    use crate::timers::{EchoMeter, TriggerTimer};
    use crate::trigger::TriggerOut;
    use crate::{FIRMWARE_VERSION, LAST_READING};

    /// Cadence of the background report line.
    const REPORT_INTERVAL_MS: u16 = 500;

    type Ranging = RangingCycle<'static, TriggerOut, EchoEdge, EchoMeter, TriggerTimer>;

    #[shared]
    struct Shared {
        /// The ranging state machine, owner of all timing hardware.
        ranging: Ranging,
    }

    #[local]
    struct Local {
        tx: serial::Tx<pac::USART1>,
        delay: SysDelay,
        timing: SensorTiming,
    }

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local, init::Monotonics) {
        let dp: pac::Peripherals = ctx.device;

        // Clock configuration: HSE 8 MHz, sysclk 72 MHz.
        let mut flash = dp.FLASH.constrain();
        let rcc = dp.RCC.constrain();
        let clocks = rcc
            .cfgr
            .use_hse(8.MHz())
            .sysclk(72.MHz())
            .pclk1(36.MHz())
            .freeze(&mut flash.acr);

        let mut afio = dp.AFIO.constrain();
        let mut gpioa = dp.GPIOA.split();
        let mut gpioc = dp.GPIOC.split();

        // Serial report output
        let tx_pin = gpioa.pa9.into_alternate_push_pull(&mut gpioa.crh);
        let rx_pin = gpioa.pa10;
        let usart = serial::Serial::new(
            dp.USART1,
            (tx_pin, rx_pin),
            &mut afio.mapr,
            serial::Config::default().baudrate(115_200.bps()),
            &clocks,
        );
        let (mut tx, _rx) = usart.split();

        writeln!(tx, "Booting: Echolot firmware={}", FIRMWARE_VERSION).unwrap();

        // Check whether we just woke up after a panic
        if let Some(msg) = panic_persist::get_panic_message_utf8() {
            writeln!(tx, "=== 🔥 FOUND PANIC 🔥 ===").ok();
            writeln!(tx, "{}", msg.trim_end()).ok();
            writeln!(tx, "==== 🚒 END PANIC 🚒 ====").ok();
        }

        // Busy-wait provider for the reporting loop. SYST is free because
        // no monotonic is configured.
        let delay = ctx.core.SYST.delay(&clocks);

        let timing = SensorTiming::default();

        // Timing hardware: trigger pin PC3, echo edge PA0/EXTI0, echo
        // counter + settling window on TIM6, trigger width on TIM7.
        let trigger = TriggerOut::new(gpioc.pc3.into_push_pull_output(&mut gpioc.crl));
        let echo_pin = gpioa.pa0.into_floating_input(&mut gpioa.crl);
        let edge = EchoEdge::new(echo_pin, dp.EXTI, &mut afio);
        let meter = EchoMeter::new(dp.TIM6, &clocks, &timing);
        let window = TriggerTimer::new(dp.TIM7, &clocks, &timing);

        let mut ranging = RangingCycle::new(timing, trigger, edge, meter, window, &LAST_READING);

        // Fire the first trigger pulse; every later cycle re-arms itself.
        ranging.start();

        writeln!(tx, "Initialization done").unwrap();

        (
            Shared { ranging },
            Local { tx, delay, timing },
            init::Monotonics(),
        )
    }

    /// Background reporting loop, lowest priority. Reads the published
    /// duration without taking any lock.
    #[idle(local = [tx, delay, timing])]
    fn idle(ctx: idle::Context) -> ! {
        loop {
            ctx.local.delay.delay_ms(REPORT_INTERVAL_MS);
            match LAST_READING.read() {
                Some(EchoReading::Pulse(us)) => {
                    let mm = ctx.local.timing.distance_mm(us);
                    writeln!(ctx.local.tx, "S = {} mm, {}", mm, us).ok();
                }
                Some(EchoReading::NoEcho) => {
                    writeln!(ctx.local.tx, "S = no echo").ok();
                }
                // No completed cycle yet
                None => {}
            }
        }
    }

    /// Echo line changed level. Highest priority: the counter is read here.
    #[task(binds = EXTI0, priority = 3, shared = [ranging])]
    fn on_echo_edge(mut ctx: on_echo_edge::Context) {
        ctx.shared.ranging.lock(|ranging| {
            ranging.edge_monitor().clear_pending();
            ranging.handle(RangingEvent::EdgeDetected);
        });
    }

    /// Trigger pulse width elapsed (TIM7).
    #[task(binds = TIM7, priority = 2, shared = [ranging])]
    fn on_trigger_window(mut ctx: on_trigger_window::Context) {
        ctx.shared.ranging.lock(|ranging| {
            ranging.trigger_window().clear_pending();
            ranging.handle(RangingEvent::TriggerWindowElapsed);
        });
    }

    /// Settling window, or the measurement ceiling, elapsed (TIM6).
    #[task(binds = TIM6, priority = 1, shared = [ranging])]
    fn on_settling(mut ctx: on_settling::Context) {
        ctx.shared.ranging.lock(|ranging| {
            ranging.pulse_counter().clear_pending();
            ranging.handle(RangingEvent::SettlingElapsed);
        });
    }
}
