//! Serial communication using USART peripherals

use core::fmt;

use bitflags::bitflags;
use fugit::HertzU32 as Hertz;
use nb::block;

use crate::hal::serial;
use crate::rcc::{Clocks, Peripheral, Rcc};
use crate::registers::{with_field, Registers};

/// Serial error
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The USART clock is not enabled
    #[error("USART clock is not enabled")]
    ClockDisabled,
    /// The baud rate can not be derived from the bus clock
    #[error("baud rate out of range for the bus clock")]
    BaudRate,
    /// Framing error
    #[error("framing error")]
    Framing,
    /// Noise error
    #[error("noise error")]
    Noise,
    /// RX buffer overrun
    #[error("receive overrun")]
    Overrun,
    /// Parity check error
    #[error("parity error")]
    Parity,
}

/// USART registers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    Sr,
    Dr,
    Brr,
    Cr1,
    Cr2,
    Cr3,
}

bitflags! {
    /// USART status register
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        const PE = 1 << 0;
        const FE = 1 << 1;
        const NF = 1 << 2;
        const ORE = 1 << 3;
        const IDLE = 1 << 4;
        const RXNE = 1 << 5;
        const TC = 1 << 6;
        const TXE = 1 << 7;
    }
}

// CR1
const CR1_RE: u32 = 1 << 2;
const CR1_TE: u32 = 1 << 3;
const CR1_IDLEIE: u32 = 1 << 4;
const CR1_RXNEIE: u32 = 1 << 5;
const CR1_TXEIE: u32 = 1 << 7;
const CR1_PS: u32 = 1 << 9;
const CR1_PCE: u32 = 1 << 10;
const CR1_M: u32 = 1 << 12;
pub(crate) const CR1_UE: u32 = 1 << 13;
const CR1_OVER8: u32 = 1 << 15;

// CR2
const CR2_STOP: (u32, u32) = (12, 2);

/// Serial abstraction
pub struct Serial<USART: Instance> {
    usart: USART,
    port: USART::Port,
}

impl<USART> Serial<USART>
where
    USART: Instance,
{
    pub fn new<R>(usart: USART, rcc: &Rcc<R>, clocks: Clocks, config: Config) -> Result<Self, Error>
    where
        R: Registers<Reg = crate::rcc::Reg>,
    {
        let peripheral = usart.peripheral();
        if !rcc.is_enabled(peripheral) {
            return Err(Error::ClockDisabled);
        }

        let port = usart.port();
        let pclk = clocks.bus(peripheral.bus());

        // Calculate correct baudrate divisor on the fly
        let brr = config.brr(pclk)?;

        port.write(Reg::Cr1, 0);
        port.write(Reg::Brr, brr);

        let stop = match config.stop_bits {
            StopBits::Stop1 => 0b00,
            StopBits::Stop0p5 => 0b01,
            StopBits::Stop2 => 0b10,
            StopBits::Stop1p5 => 0b11,
        };
        port.write(Reg::Cr2, with_field(0, CR2_STOP.0, CR2_STOP.1, stop));

        // Reset other registers to disable advanced USART features
        port.write(Reg::Cr3, 0);

        let mut cr1 = CR1_TE | CR1_RE | CR1_UE;
        if config.oversampling == Oversampling::By8 {
            cr1 |= CR1_OVER8;
        }
        if config.word_length == WordLength::DataBits9 {
            cr1 |= CR1_M;
        }
        match config.parity {
            Parity::ParityNone => {}
            Parity::ParityEven => cr1 |= CR1_PCE,
            Parity::ParityOdd => cr1 |= CR1_PCE | CR1_PS,
        }
        // Enable transmission and receiving
        port.write(Reg::Cr1, cr1);

        log::trace!("USART configured: {:?}, brr={:#06x}", config, brr);

        Ok(Serial { usart, port })
    }

    /// Starts listening for an interrupt event
    pub fn listen(&mut self, event: Event) {
        self.port.set_bits(Reg::Cr1, event.enable_bit());
    }

    /// End listening for an interrupt event
    pub fn unlisten(&mut self, event: Event) {
        self.port.clear_bits(Reg::Cr1, event.enable_bit());
    }

    pub fn split(self) -> (Tx<USART>, Rx<USART>) {
        (Tx { port: self.port }, Rx { port: self.port })
    }

    pub fn release(self) -> USART {
        self.usart
    }
}

impl<USART> serial::Read<u8> for Serial<USART>
where
    USART: Instance,
{
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let mut rx: Rx<USART> = Rx { port: self.port };
        rx.read()
    }
}

impl<USART> serial::Write<u8> for Serial<USART>
where
    USART: Instance,
{
    type Error = Error;

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        let mut tx: Tx<USART> = Tx { port: self.port };
        tx.flush()
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        let mut tx: Tx<USART> = Tx { port: self.port };
        tx.write(byte)
    }
}

/// Serial receiver
pub struct Rx<USART: Instance> {
    port: USART::Port,
}

impl<USART> serial::Read<u8> for Rx<USART>
where
    USART: Instance,
{
    type Error = Error;

    fn read(&mut self) -> nb::Result<u8, Error> {
        let sr = Status::from_bits_truncate(self.port.read(Reg::Sr));

        // Error flags are cleared by reading SR followed by DR
        let error = if sr.contains(Status::PE) {
            Some(Error::Parity)
        } else if sr.contains(Status::FE) {
            Some(Error::Framing)
        } else if sr.contains(Status::NF) {
            Some(Error::Noise)
        } else if sr.contains(Status::ORE) {
            Some(Error::Overrun)
        } else {
            None
        };
        if let Some(error) = error {
            let _ = self.port.read(Reg::Dr);
            return Err(nb::Error::Other(error));
        }

        if sr.contains(Status::RXNE) {
            // Casting to `u8` is fine for 8 data bits; the ninth bit is dropped
            return Ok(self.port.read(Reg::Dr) as u8);
        }

        Err(nb::Error::WouldBlock)
    }
}

/// Serial transmitter
pub struct Tx<USART: Instance> {
    port: USART::Port,
}

impl<USART> serial::Write<u8> for Tx<USART>
where
    USART: Instance,
{
    type Error = Error;

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        let sr = Status::from_bits_truncate(self.port.read(Reg::Sr));

        if sr.contains(Status::TC) {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        let sr = Status::from_bits_truncate(self.port.read(Reg::Sr));

        if sr.contains(Status::TXE) {
            self.port.write(Reg::Dr, u32::from(byte));
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl<USART> fmt::Write for Tx<USART>
where
    USART: Instance,
    Tx<USART>: serial::Write<u8>,
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use crate::hal::serial::Write;

        s.bytes()
            .try_for_each(|c| block!(self.write(c)))
            .map_err(|_| fmt::Error)
    }
}

/// Word length, parity bit included
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WordLength {
    DataBits8,
    DataBits9,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    ParityNone,
    ParityEven,
    ParityOdd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    /// 1 stop bit
    Stop1,
    /// 0.5 stop bits
    Stop0p5,
    /// 2 stop bits
    Stop2,
    /// 1.5 stop bits
    Stop1p5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Oversampling {
    By8,
    By16,
}

/// USART configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub baud_rate: Hertz,
    pub word_length: WordLength,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub oversampling: Oversampling,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baud_rate: Hertz::from_raw(115_200),
            word_length: WordLength::DataBits8,
            parity: Parity::ParityNone,
            stop_bits: StopBits::Stop1,
            oversampling: Oversampling::By16,
        }
    }
}

impl Config {
    pub fn baudrate(mut self, baud_rate: Hertz) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn wordlength_8(mut self) -> Self {
        self.word_length = WordLength::DataBits8;
        self
    }

    pub fn wordlength_9(mut self) -> Self {
        self.word_length = WordLength::DataBits9;
        self
    }

    pub fn parity_none(mut self) -> Self {
        self.parity = Parity::ParityNone;
        self
    }

    pub fn parity_even(mut self) -> Self {
        self.parity = Parity::ParityEven;
        self
    }

    pub fn parity_odd(mut self) -> Self {
        self.parity = Parity::ParityOdd;
        self
    }

    pub fn stopbits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn oversampling(mut self, oversampling: Oversampling) -> Self {
        self.oversampling = oversampling;
        self
    }

    fn brr(&self, pclk: Hertz) -> Result<u32, Error> {
        let baud = self.baud_rate.raw();
        if baud == 0 {
            return Err(Error::BaudRate);
        }

        let brr = match self.oversampling {
            Oversampling::By8 => {
                let usart_div = (2 * u64::from(pclk.raw()) + u64::from(baud) / 2) / u64::from(baud);
                let usart_div = u32::try_from(usart_div).map_err(|_| Error::BaudRate)?;

                0xfff0 & usart_div | 0x0007 & ((usart_div & 0x000f) >> 1)
            }
            Oversampling::By16 => (pclk.raw() + baud / 2) / baud,
        };

        if !(16..=0xffff).contains(&brr) {
            return Err(Error::BaudRate);
        }
        Ok(brr)
    }
}

/// Interrupt event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// New data has been received
    Rxne,
    /// New data can be sent
    Txe,
    /// The line went idle after a frame
    Idle,
}

impl Event {
    fn enable_bit(self) -> u32 {
        match self {
            Event::Rxne => CR1_RXNEIE,
            Event::Txe => CR1_TXEIE,
            Event::Idle => CR1_IDLEIE,
        }
    }
}

/// Implemented by all USART instances
pub trait Instance {
    /// Shared register access, held by both halves after a split
    type Port: Registers<Reg = Reg> + Copy;

    /// Clock gate of this USART
    fn peripheral(&self) -> Peripheral;

    fn port(&self) -> Self::Port;
}

#[cfg(feature = "device-selected")]
mod device {
    use super::{Instance, Reg};
    use crate::pac::{self, USART1, USART2, USART3, USART6};
    use crate::rcc::Peripheral;
    use crate::registers::Registers;

    impl Registers for pac::usart1::RegisterBlock {
        type Reg = Reg;

        fn read(&self, reg: Reg) -> u32 {
            match reg {
                Reg::Sr => self.sr.read().bits(),
                Reg::Dr => self.dr.read().bits(),
                Reg::Brr => self.brr.read().bits(),
                Reg::Cr1 => self.cr1.read().bits(),
                Reg::Cr2 => self.cr2.read().bits(),
                Reg::Cr3 => self.cr3.read().bits(),
            }
        }

        #[allow(unused_unsafe)]
        fn write(&self, reg: Reg, bits: u32) {
            match reg {
                Reg::Sr => self.sr.write(|w| unsafe { w.bits(bits) }),
                Reg::Dr => self.dr.write(|w| unsafe { w.bits(bits) }),
                Reg::Brr => self.brr.write(|w| unsafe { w.bits(bits) }),
                Reg::Cr1 => self.cr1.write(|w| unsafe { w.bits(bits) }),
                Reg::Cr2 => self.cr2.write(|w| unsafe { w.bits(bits) }),
                Reg::Cr3 => self.cr3.write(|w| unsafe { w.bits(bits) }),
            }
        }
    }

    macro_rules! impl_instance {
        ($(
            $USARTX:ident: $peripheral:ident,
        )+) => {
            $(
                impl Instance for $USARTX {
                    type Port = &'static pac::usart1::RegisterBlock;

                    fn peripheral(&self) -> Peripheral {
                        Peripheral::$peripheral
                    }

                    fn port(&self) -> Self::Port {
                        // NOTE(unsafe) the register block lives for the whole program
                        unsafe { &*$USARTX::ptr() }
                    }
                }
            )+
        }
    }

    impl_instance! {
        USART1: Usart1,
        USART2: Usart2,
        USART3: Usart3,
        USART6: Usart6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::serial::{Read, Write};
    use crate::sim::Sim;
    use core::fmt::Write as _;

    fn usart(sim: &Sim, config: Config) -> Serial<crate::sim::SimUsart<'_>> {
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Usart1);
        Serial::new(sim.usart1(), &rcc, Clocks::hsi(), config).unwrap()
    }

    #[test]
    fn new_requires_the_clock() {
        let sim = Sim::new();
        let rcc = Rcc::new(sim.rcc());
        let serial = Serial::new(sim.usart1(), &rcc, Clocks::hsi(), Config::default());
        assert_eq!(serial.err(), Some(Error::ClockDisabled));
    }

    #[test]
    fn frame_format_is_programmed() {
        let sim = Sim::new();
        let _serial = usart(
            &sim,
            Config::default()
                .wordlength_9()
                .parity_odd()
                .stopbits(StopBits::Stop2),
        );

        let cr1 = sim.usart1().read(Reg::Cr1);
        assert_eq!(
            cr1 & (CR1_UE | CR1_TE | CR1_RE | CR1_M | CR1_PCE | CR1_PS),
            CR1_UE | CR1_TE | CR1_RE | CR1_M | CR1_PCE | CR1_PS
        );
        assert_eq!(sim.usart1().read(Reg::Cr2), 0b10 << 12);
    }

    #[test]
    fn baud_rate_divisor() {
        // 16 MHz / 115200 = 138.9
        assert_eq!(Config::default().brr(Hertz::MHz(16)), Ok(139));
        assert_eq!(
            Config::default()
                .oversampling(Oversampling::By8)
                .brr(Hertz::MHz(16)),
            Ok(0x0113)
        );
        assert_eq!(
            Config::default()
                .baudrate(Hertz::MHz(2))
                .brr(Hertz::MHz(16)),
            Err(Error::BaudRate)
        );
        assert_eq!(
            Config::default()
                .baudrate(Hertz::from_raw(0))
                .brr(Hertz::MHz(16)),
            Err(Error::BaudRate)
        );
    }

    #[test]
    fn formatted_output_is_transmitted() {
        let sim = Sim::new();
        let (mut tx, _rx) = usart(&sim, Config::default()).split();

        write!(tx, "Temperature:{:.2}\r\n", 24.904_f32).unwrap();
        block!(tx.flush()).unwrap();

        assert_eq!(&sim.transmitted()[..], b"Temperature:24.90\r\n");
    }

    #[test]
    fn receive_and_errors() {
        let sim = Sim::new();
        let mut serial = usart(&sim, Config::default());

        assert_eq!(serial.read(), Err(nb::Error::WouldBlock));

        sim.receive(b'a');
        assert_eq!(serial.read(), Ok(b'a'));

        sim.receive_corrupted(b'b', Status::FE);
        assert_eq!(serial.read(), Err(nb::Error::Other(Error::Framing)));
        assert_eq!(serial.read(), Err(nb::Error::WouldBlock));

        sim.receive(b'c');
        sim.receive(b'd');
        assert_eq!(serial.read(), Err(nb::Error::Other(Error::Overrun)));
    }

    #[test]
    fn listen_toggles_interrupt_enables() {
        let sim = Sim::new();
        let mut serial = usart(&sim, Config::default());

        serial.listen(Event::Rxne);
        serial.listen(Event::Idle);
        assert_ne!(sim.usart1().read(Reg::Cr1) & CR1_RXNEIE, 0);
        assert_ne!(sim.usart1().read(Reg::Cr1) & CR1_IDLEIE, 0);

        serial.unlisten(Event::Rxne);
        assert_eq!(sim.usart1().read(Reg::Cr1) & CR1_RXNEIE, 0);
        assert_eq!(sim.usart1().read(Reg::Cr1) & CR1_TXEIE, 0);
    }
}
