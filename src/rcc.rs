//! Reset and clock management
//!
//! Only peripheral clock gating and reset are handled here. The clock tree
//! itself is left in whatever state the boot code put it in and described to
//! the drivers with [`Clocks`].

use fugit::HertzU32 as Hertz;

use crate::registers::Registers;

/// RCM registers used by the clock gates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    Ahb1rstr,
    Apb1rstr,
    Apb2rstr,
    Ahb1enr,
    Apb1enr,
    Apb2enr,
}

/// Bus a peripheral is clocked from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bus {
    /// Advanced High-Performance Bus 1
    Ahb1,
    /// Advanced Peripheral Bus 1
    Apb1,
    /// Advanced Peripheral Bus 2
    Apb2,
}

impl Bus {
    fn enable_register(self) -> Reg {
        match self {
            Bus::Ahb1 => Reg::Ahb1enr,
            Bus::Apb1 => Reg::Apb1enr,
            Bus::Apb2 => Reg::Apb2enr,
        }
    }

    fn reset_register(self) -> Reg {
        match self {
            Bus::Ahb1 => Reg::Ahb1rstr,
            Bus::Apb1 => Reg::Apb1rstr,
            Bus::Apb2 => Reg::Apb2rstr,
        }
    }
}

/// Peripherals with a clock gate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Peripheral {
    GpioA,
    GpioB,
    Dma1,
    Dma2,
    Usart2,
    Usart3,
    Uart4,
    Uart5,
    Usart1,
    Usart6,
    Adc1,
    Adc2,
    Adc3,
}

impl Peripheral {
    /// Bus the peripheral hangs off
    pub fn bus(self) -> Bus {
        use Peripheral::*;
        match self {
            GpioA | GpioB | Dma1 | Dma2 => Bus::Ahb1,
            Usart2 | Usart3 | Uart4 | Uart5 => Bus::Apb1,
            Usart1 | Usart6 | Adc1 | Adc2 | Adc3 => Bus::Apb2,
        }
    }

    // Bit positions in the xxxENR registers
    fn enable_bit(self) -> u32 {
        use Peripheral::*;
        1 << match self {
            GpioA => 0,
            GpioB => 1,
            Dma1 => 21,
            Dma2 => 22,
            Usart2 => 17,
            Usart3 => 18,
            Uart4 => 19,
            Uart5 => 20,
            Usart1 => 4,
            Usart6 => 5,
            Adc1 => 8,
            Adc2 => 9,
            Adc3 => 10,
        }
    }

    // All three converters share a single reset line
    fn reset_bit(self) -> u32 {
        match self {
            Peripheral::Adc1 | Peripheral::Adc2 | Peripheral::Adc3 => 1 << 8,
            _ => self.enable_bit(),
        }
    }
}

/// Constrained RCM peripheral
pub struct Rcc<R> {
    rb: R,
}

impl<R> Rcc<R>
where
    R: Registers<Reg = Reg>,
{
    pub fn new(rb: R) -> Self {
        Rcc { rb }
    }

    /// Turns on the clock of `peripheral`
    pub fn enable(&mut self, peripheral: Peripheral) {
        let enr = peripheral.bus().enable_register();
        self.rb.set_bits(enr, peripheral.enable_bit());
        // Dummy read: the peripheral is only clocked two bus cycles after the write
        let _ = self.rb.read(enr);
    }

    /// Turns off the clock of `peripheral`
    pub fn disable(&mut self, peripheral: Peripheral) {
        self.rb
            .clear_bits(peripheral.bus().enable_register(), peripheral.enable_bit());
    }

    /// Pulses the reset line of `peripheral`
    pub fn reset(&mut self, peripheral: Peripheral) {
        let rstr = peripheral.bus().reset_register();
        self.rb.set_bits(rstr, peripheral.reset_bit());
        self.rb.clear_bits(rstr, peripheral.reset_bit());
    }

    /// Returns `true` if the clock of `peripheral` is running
    pub fn is_enabled(&self, peripheral: Peripheral) -> bool {
        self.rb.read(peripheral.bus().enable_register()) & peripheral.enable_bit() != 0
    }

    pub fn release(self) -> R {
        self.rb
    }
}

/// Extension trait that constrains the `RCC` peripheral
pub trait RccExt: Sized {
    /// Constrains the `RCC` peripheral so it plays nicely with the other abstractions
    fn constrain(self) -> Rcc<Self>;
}

const HSI: u32 = 16_000_000; // Hz

/// Frozen clock frequencies
///
/// Describes the clock tree as configured before the drivers are set up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clocks {
    hclk: Hertz,
    pclk1: Hertz,
    pclk2: Hertz,
    sysclk: Hertz,
}

impl Clocks {
    /// Clocks after reset: everything runs from the 16 MHz HSI, no prescalers
    pub fn hsi() -> Self {
        let hsi = Hertz::from_raw(HSI);
        Clocks {
            hclk: hsi,
            pclk1: hsi,
            pclk2: hsi,
            sysclk: hsi,
        }
    }

    /// Clocks set up by boot code, with the AHB running at `sysclk`
    pub fn new(sysclk: Hertz, pclk1: Hertz, pclk2: Hertz) -> Self {
        Clocks {
            hclk: sysclk,
            pclk1,
            pclk2,
            sysclk,
        }
    }

    /// Returns the frequency of the AHB1
    pub fn hclk(&self) -> Hertz {
        self.hclk
    }

    /// Returns the frequency of the APB1
    pub fn pclk1(&self) -> Hertz {
        self.pclk1
    }

    /// Returns the frequency of the APB2
    pub fn pclk2(&self) -> Hertz {
        self.pclk2
    }

    /// Returns the system (core) frequency
    pub fn sysclk(&self) -> Hertz {
        self.sysclk
    }

    /// Returns the clock feeding `bus`
    pub fn bus(&self, bus: Bus) -> Hertz {
        match bus {
            Bus::Ahb1 => self.hclk,
            Bus::Apb1 => self.pclk1,
            Bus::Apb2 => self.pclk2,
        }
    }
}

impl Default for Clocks {
    fn default() -> Self {
        Self::hsi()
    }
}

#[cfg(feature = "device-selected")]
mod device {
    use super::{Rcc, RccExt, Reg};
    use crate::pac::RCC;
    use crate::registers::Registers;

    impl Registers for RCC {
        type Reg = Reg;

        fn read(&self, reg: Reg) -> u32 {
            match reg {
                Reg::Ahb1rstr => self.ahb1rstr.read().bits(),
                Reg::Apb1rstr => self.apb1rstr.read().bits(),
                Reg::Apb2rstr => self.apb2rstr.read().bits(),
                Reg::Ahb1enr => self.ahb1enr.read().bits(),
                Reg::Apb1enr => self.apb1enr.read().bits(),
                Reg::Apb2enr => self.apb2enr.read().bits(),
            }
        }

        #[allow(unused_unsafe)]
        fn write(&self, reg: Reg, bits: u32) {
            match reg {
                Reg::Ahb1rstr => self.ahb1rstr.write(|w| unsafe { w.bits(bits) }),
                Reg::Apb1rstr => self.apb1rstr.write(|w| unsafe { w.bits(bits) }),
                Reg::Apb2rstr => self.apb2rstr.write(|w| unsafe { w.bits(bits) }),
                Reg::Ahb1enr => self.ahb1enr.write(|w| unsafe { w.bits(bits) }),
                Reg::Apb1enr => self.apb1enr.write(|w| unsafe { w.bits(bits) }),
                Reg::Apb2enr => self.apb2enr.write(|w| unsafe { w.bits(bits) }),
            }
        }
    }

    impl RccExt for RCC {
        fn constrain(self) -> Rcc<Self> {
            Rcc::new(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Sim;

    #[test]
    fn enable_sets_only_the_gate_bit() {
        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());

        assert!(!rcc.is_enabled(Peripheral::Adc1));
        rcc.enable(Peripheral::Adc1);
        rcc.enable(Peripheral::Dma2);

        assert!(rcc.is_enabled(Peripheral::Adc1));
        assert!(rcc.is_enabled(Peripheral::Dma2));
        assert!(!rcc.is_enabled(Peripheral::Adc2));
        assert_eq!(sim.rcc().read(Reg::Apb2enr), 1 << 8);
        assert_eq!(sim.rcc().read(Reg::Ahb1enr), 1 << 22);

        rcc.disable(Peripheral::Adc1);
        assert!(!rcc.is_enabled(Peripheral::Adc1));
        assert!(rcc.is_enabled(Peripheral::Dma2));
    }

    #[test]
    fn reset_releases_the_line() {
        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.reset(Peripheral::Adc3);
        assert_eq!(sim.rcc().read(Reg::Apb2rstr), 0);
        assert_eq!(sim.rcc().reset_pulses(), 1);
    }

    #[test]
    fn reset_clocks_run_from_hsi() {
        let clocks = Clocks::default();
        assert_eq!(clocks.sysclk(), Hertz::MHz(16));
        assert_eq!(clocks.bus(Bus::Apb2), clocks.pclk2());
    }
}
