//! Delays

use cortex_m::peripheral::{syst::SystClkSource, SYST};
use fugit::{HertzU32 as Hertz, MicrosDurationU32};

use crate::hal::blocking::delay::{DelayMs, DelayUs};
use crate::rcc::Clocks;

/// System timer (SysTick) as a delay provider
pub struct SysDelay {
    clk: Hertz,
    syst: SYST,
}

impl SysDelay {
    /// Configures the system timer (SysTick) as a delay provider, clocked
    /// from HCLK
    pub fn new(mut syst: SYST, clocks: &Clocks) -> Self {
        syst.set_clock_source(SystClkSource::Core);

        SysDelay {
            clk: clocks.hclk(),
            syst,
        }
    }

    pub fn delay(&mut self, us: MicrosDurationU32) {
        // The SysTick Reload Value register supports values between 1 and 0x00FFFFFF.
        const MAX_RVR: u32 = 0x00FF_FFFF;

        let mut total_rvr = reload_ticks(us, self.clk);

        while total_rvr != 0 {
            let current_rvr = total_rvr.min(u64::from(MAX_RVR)) as u32;

            self.syst.set_reload(current_rvr);
            self.syst.clear_current();
            self.syst.enable_counter();

            // Update the tracking variable while we are waiting...
            total_rvr -= u64::from(current_rvr);

            while !self.syst.has_wrapped() {}

            self.syst.disable_counter();
        }
    }

    /// Releases the system timer (SysTick) resource
    pub fn release(self) -> SYST {
        self.syst
    }
}

fn reload_ticks(us: MicrosDurationU32, clk: Hertz) -> u64 {
    u64::from(us.ticks()) * u64::from(clk.raw() / 1_000_000)
}

impl DelayUs<u32> for SysDelay {
    fn delay_us(&mut self, us: u32) {
        self.delay(MicrosDurationU32::micros(us))
    }
}

impl DelayMs<u32> for SysDelay {
    fn delay_ms(&mut self, mut ms: u32) {
        const MAX_MS: u32 = u32::MAX / 1_000;

        while ms != 0 {
            let chunk = ms.min(MAX_MS);
            self.delay_us(chunk * 1_000);
            ms -= chunk;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_ticks_scale_with_the_core_clock() {
        let us = MicrosDurationU32::micros(1_000);
        assert_eq!(reload_ticks(us, Hertz::MHz(16)), 16_000);
        assert_eq!(reload_ticks(us, Hertz::MHz(168)), 168_000);
        // Longer than one SysTick period at 168 MHz
        assert!(reload_ticks(MicrosDurationU32::micros(500_000), Hertz::MHz(168)) > 0x00FF_FFFF);
    }
}
