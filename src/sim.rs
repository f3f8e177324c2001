//! In-memory model of the peripherals used by the drivers
//!
//! [`Sim`] keeps a register image of RCC, ADC1, the ADC common registers,
//! DMA2 and USART1, and hands out cheap register handles that implement the
//! same driver traits as the PAC peripherals. The coupled behaviour the
//! drivers depend on is modelled as well:
//!
//! - ADC power-up, software start, continuous mode and overrun
//! - the ADC1 -> DMA2 request path, including DDS
//! - stream item counting, circular reload and self-disable in normal mode
//! - sticky status flags with write-1-to-clear flag registers
//! - USART transmit capture and receive injection
//!
//! Conversions and DMA requests only happen when a test asks for them.

use core::cell::{Cell, RefCell};

use heapless::Vec;

use crate::{
    adc, dma,
    dma::{Flags, SampleCell},
    hal::blocking::delay::{DelayMs, DelayUs},
    rcc::{self, Peripheral},
    registers::{field, Registers},
    serial::{self, Status},
};

/// Bus address of the ADC1 regular data register
pub const ADC1_DR: u32 = 0x4001_204C;

/// Bytes of USART output kept by the model
pub const TX_CAPACITY: usize = 512;

#[derive(Default)]
struct StreamRegs {
    cr: Cell<u32>,
    ndtr: Cell<u32>,
    par: Cell<u32>,
    m0ar: Cell<u32>,
    m1ar: Cell<u32>,
    fcr: Cell<u32>,
    // NDTR value programmed while the stream was disabled
    reload: Cell<u32>,
    memory: Cell<Option<&'static SampleCell>>,
}

/// Register image of the modelled peripherals
#[derive(Default)]
pub struct Sim {
    rcc: [Cell<u32>; 6],
    reset_pulses: Cell<u32>,

    adc1: [Cell<u32>; 9],
    adc_common: [Cell<u32>; 2],
    adc1_converting: Cell<bool>,
    // DDS clear and the last DMA transfer done
    adc1_requests_stopped: Cell<bool>,
    cycles_waited: Cell<u64>,

    dma2_status: [Cell<u32>; 2],
    dma2_streams: [StreamRegs; 8],

    usart1: [Cell<u32>; 6],
    transmitted: RefCell<Vec<u8, TX_CAPACITY>>,

    delayed_ms: Cell<u64>,
}

impl Sim {
    /// Everything in its reset state, all clocks gated
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rcc(&self) -> SimRcc<'_> {
        SimRcc(self)
    }

    pub fn adc1(&self) -> SimAdc<'_> {
        SimAdc(self)
    }

    pub fn adc_common(&self) -> SimAdcCommon<'_> {
        SimAdcCommon(self)
    }

    pub fn dma2(&self) -> SimDma<'_> {
        SimDma(self)
    }

    pub fn usart1(&self) -> SimUsart<'_> {
        SimUsart(self)
    }

    /// Delay provider that only records how long it was asked to wait
    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay(self)
    }

    /// Number of reset pulses issued through any RSTR register
    pub fn reset_pulses(&self) -> u32 {
        self.reset_pulses.get()
    }

    /// Core cycles spent in driver busy-waits
    pub fn cycles_waited(&self) -> u64 {
        self.cycles_waited.get()
    }

    /// Total time requested from [`Sim::delay`] handles
    pub fn delayed_ms(&self) -> u64 {
        self.delayed_ms.get()
    }

    /// Returns `true` while ADC1 is powered and a regular conversion is pending
    pub fn adc1_converting(&self) -> bool {
        self.adc1_converting.get()
    }

    /// Finishes one ADC1 regular conversion with result `raw`
    ///
    /// With DMA requests enabled the result is handed to the first enabled
    /// DMA2 stream whose peripheral port points at the data register. If no
    /// stream takes it, the converter flags an overrun and stops.
    ///
    /// Returns `false` if the converter was not running.
    pub fn complete_conversion(&self, raw: u16) -> bool {
        let cr2 = self.adc1_reg(adc::Reg::Cr2).get();
        if !self.adc1_converting.get() || cr2 & adc::CR2_ADON == 0 {
            return false;
        }

        let sr = self.adc1_reg(adc::Reg::Sr);
        self.adc1_reg(adc::Reg::Dr).set(u32::from(raw));
        sr.set(sr.get() | adc::Status::EOC.bits());

        if cr2 & adc::CR2_CONT == 0 {
            self.adc1_converting.set(false);
        }

        if cr2 & adc::CR2_DMA != 0 && !self.adc1_requests_stopped.get() {
            let stream = (0..8u8).find(|&nr| self.stream_serves_adc1(nr));

            match stream.and_then(|nr| self.serve(nr, raw)) {
                Some(cycle_done) => {
                    // The DMA read of DR clears EOC
                    sr.set(sr.get() & !adc::Status::EOC.bits());
                    if cycle_done && cr2 & adc::CR2_DDS == 0 {
                        self.adc1_requests_stopped.set(true);
                    }
                }
                None => {
                    sr.set(sr.get() | adc::Status::OVR.bits());
                    self.adc1_converting.set(false);
                }
            }
        }

        true
    }

    /// Issues one peripheral request on DMA2 `stream`, carrying `value`
    ///
    /// Returns `false` if the stream is disabled.
    pub fn dma_request(&self, stream: u8, value: u16) -> bool {
        self.serve(stream, value).is_some()
    }

    /// Flags a bus error on DMA2 `stream`, which disables the stream
    pub fn raise_transfer_error(&self, stream: u8) {
        let st = &self.dma2_streams[usize::from(stream)];
        st.cr.set(st.cr.get() & !dma::CR_EN);
        self.raise_flags(stream, Flags::TRANSFER_ERROR);
    }

    /// Puts `byte` into the USART1 receive register
    ///
    /// If the previous byte was not read yet it is kept and an overrun is
    /// flagged instead.
    pub fn receive(&self, byte: u8) {
        self.receive_corrupted(byte, Status::empty());
    }

    /// Like [`Sim::receive`], with line `errors` flagged for the frame
    pub fn receive_corrupted(&self, byte: u8, errors: Status) {
        let sr = self.usart1_reg(serial::Reg::Sr);
        if sr.get() & Status::RXNE.bits() != 0 {
            sr.set(sr.get() | Status::ORE.bits());
            return;
        }
        self.usart1_reg(serial::Reg::Dr).set(u32::from(byte));
        sr.set(sr.get() | (Status::RXNE | errors).bits());
    }

    /// Bytes written to the USART1 transmit register so far
    pub fn transmitted(&self) -> Vec<u8, TX_CAPACITY> {
        self.transmitted.borrow().clone()
    }

    pub fn clear_transmitted(&self) {
        self.transmitted.borrow_mut().clear();
    }

    fn stream_serves_adc1(&self, nr: u8) -> bool {
        let st = &self.dma2_streams[usize::from(nr)];
        let cr = st.cr.get();
        cr & dma::CR_EN != 0
            && st.par.get() == ADC1_DR
            && field(cr, dma::CR_DIR.0, dma::CR_DIR.1) == 0b00
            && field(cr, 25, 3) == 0
    }

    // Moves one item; returns whether the cycle completed
    fn serve(&self, nr: u8, value: u16) -> Option<bool> {
        let st = &self.dma2_streams[usize::from(nr)];
        let cr = st.cr.get();
        if cr & dma::CR_EN == 0 || st.ndtr.get() == 0 {
            return None;
        }

        if let Some(cell) = st.memory.get() {
            cell.store(value);
        }

        let remaining = st.ndtr.get() - 1;
        let reload = st.reload.get();
        let mut flags = Flags::empty();

        if remaining == reload / 2 {
            flags |= Flags::HALF_TRANSFER;
        }
        if remaining == 0 {
            flags |= Flags::TRANSFER_COMPLETE;
            if cr & dma::CR_CIRC != 0 {
                st.ndtr.set(reload);
            } else {
                st.ndtr.set(0);
                st.cr.set(cr & !dma::CR_EN);
            }
        } else {
            st.ndtr.set(remaining);
        }

        self.raise_flags(nr, flags);
        Some(remaining == 0)
    }

    fn raise_flags(&self, nr: u8, flags: Flags) {
        let (index, shift) = flag_position(nr);
        let status = &self.dma2_status[index];
        status.set(status.get() | (flags.bits() << shift));
    }

    fn adc1_reg(&self, reg: adc::Reg) -> &Cell<u32> {
        let index = match reg {
            adc::Reg::Sr => 0,
            adc::Reg::Cr1 => 1,
            adc::Reg::Cr2 => 2,
            adc::Reg::Smpr1 => 3,
            adc::Reg::Smpr2 => 4,
            adc::Reg::Sqr1 => 5,
            adc::Reg::Sqr2 => 6,
            adc::Reg::Sqr3 => 7,
            adc::Reg::Dr => 8,
        };
        &self.adc1[index]
    }

    fn usart1_reg(&self, reg: serial::Reg) -> &Cell<u32> {
        let index = match reg {
            serial::Reg::Sr => 0,
            serial::Reg::Dr => 1,
            serial::Reg::Brr => 2,
            serial::Reg::Cr1 => 3,
            serial::Reg::Cr2 => 4,
            serial::Reg::Cr3 => 5,
        };
        &self.usart1[index]
    }
}

// (LISR/HISR, bit offset) of a stream's flags
fn flag_position(nr: u8) -> (usize, u32) {
    const SHIFTS: [u32; 4] = [0, 6, 16, 22];
    (usize::from(nr / 4), SHIFTS[usize::from(nr % 4)])
}

/// RCC register handle
#[derive(Clone, Copy)]
pub struct SimRcc<'a>(&'a Sim);

impl SimRcc<'_> {
    /// See [`Sim::reset_pulses`]
    pub fn reset_pulses(&self) -> u32 {
        self.0.reset_pulses()
    }

    fn reg(&self, reg: rcc::Reg) -> &Cell<u32> {
        let index = match reg {
            rcc::Reg::Ahb1rstr => 0,
            rcc::Reg::Apb1rstr => 1,
            rcc::Reg::Apb2rstr => 2,
            rcc::Reg::Ahb1enr => 3,
            rcc::Reg::Apb1enr => 4,
            rcc::Reg::Apb2enr => 5,
        };
        &self.0.rcc[index]
    }
}

impl Registers for SimRcc<'_> {
    type Reg = rcc::Reg;

    fn read(&self, reg: rcc::Reg) -> u32 {
        self.reg(reg).get()
    }

    fn write(&self, reg: rcc::Reg, bits: u32) {
        let cell = self.reg(reg);
        let asserted = bits & !cell.get() != 0;
        if asserted
            && matches!(
                reg,
                rcc::Reg::Ahb1rstr | rcc::Reg::Apb1rstr | rcc::Reg::Apb2rstr
            )
        {
            self.0.reset_pulses.set(self.0.reset_pulses.get() + 1);
        }
        cell.set(bits);
    }
}

/// ADC1 register handle
#[derive(Clone, Copy)]
pub struct SimAdc<'a>(&'a Sim);

impl Registers for SimAdc<'_> {
    type Reg = adc::Reg;

    fn read(&self, reg: adc::Reg) -> u32 {
        let value = self.0.adc1_reg(reg).get();
        if reg == adc::Reg::Dr {
            // Reading the data register clears EOC
            let sr = self.0.adc1_reg(adc::Reg::Sr);
            sr.set(sr.get() & !adc::Status::EOC.bits());
        }
        value
    }

    fn write(&self, reg: adc::Reg, bits: u32) {
        let sim = self.0;
        let cell = sim.adc1_reg(reg);
        match reg {
            // rc_w0: writing 1 has no effect
            adc::Reg::Sr => cell.set(cell.get() & bits),
            adc::Reg::Dr => {}
            adc::Reg::Cr2 => {
                let old = cell.get();
                let new = bits & !adc::CR2_SWSTART;
                cell.set(new);

                if new & adc::CR2_ADON == 0 {
                    sim.adc1_converting.set(false);
                }
                if new & adc::CR2_DMA != 0 && old & adc::CR2_DMA == 0 {
                    sim.adc1_requests_stopped.set(false);
                }
                if bits & adc::CR2_SWSTART != 0 && new & adc::CR2_ADON != 0 {
                    sim.adc1_converting.set(true);
                    let sr = sim.adc1_reg(adc::Reg::Sr);
                    sr.set(sr.get() | adc::Status::STRT.bits());
                }
            }
            _ => cell.set(bits),
        }
    }
}

impl adc::Instance for SimAdc<'_> {
    fn peripheral(&self) -> Peripheral {
        Peripheral::Adc1
    }

    fn data_address(&self) -> u32 {
        ADC1_DR
    }

    fn wait_cycles(&self, cycles: u32) {
        let waited = &self.0.cycles_waited;
        waited.set(waited.get() + u64::from(cycles));
    }

    fn has_internal_channels(&self) -> bool {
        true
    }
}

/// ADC common register handle
#[derive(Clone, Copy)]
pub struct SimAdcCommon<'a>(&'a Sim);

impl Registers for SimAdcCommon<'_> {
    type Reg = adc::CommonReg;

    fn read(&self, reg: adc::CommonReg) -> u32 {
        match reg {
            adc::CommonReg::Csr => self.0.adc_common[0].get(),
            adc::CommonReg::Ccr => self.0.adc_common[1].get(),
        }
    }

    fn write(&self, reg: adc::CommonReg, bits: u32) {
        match reg {
            // read-only
            adc::CommonReg::Csr => {}
            adc::CommonReg::Ccr => self.0.adc_common[1].set(bits),
        }
    }
}

/// DMA2 register handle
#[derive(Clone, Copy)]
pub struct SimDma<'a>(&'a Sim);

impl SimDma<'_> {
    fn stream(&self, nr: u8) -> &StreamRegs {
        &self.0.dma2_streams[usize::from(nr)]
    }
}

impl Registers for SimDma<'_> {
    type Reg = dma::Reg;

    fn read(&self, reg: dma::Reg) -> u32 {
        match reg {
            dma::Reg::Lisr => self.0.dma2_status[0].get(),
            dma::Reg::Hisr => self.0.dma2_status[1].get(),
            // write-only
            dma::Reg::Lifcr | dma::Reg::Hifcr => 0,
            dma::Reg::Cr(nr) => self.stream(nr).cr.get(),
            dma::Reg::Ndtr(nr) => self.stream(nr).ndtr.get(),
            dma::Reg::Par(nr) => self.stream(nr).par.get(),
            dma::Reg::M0ar(nr) => self.stream(nr).m0ar.get(),
            dma::Reg::M1ar(nr) => self.stream(nr).m1ar.get(),
            dma::Reg::Fcr(nr) => self.stream(nr).fcr.get(),
        }
    }

    fn write(&self, reg: dma::Reg, bits: u32) {
        match reg {
            dma::Reg::Lisr | dma::Reg::Hisr => {}
            dma::Reg::Lifcr => {
                let status = &self.0.dma2_status[0];
                status.set(status.get() & !bits);
            }
            dma::Reg::Hifcr => {
                let status = &self.0.dma2_status[1];
                status.set(status.get() & !bits);
            }
            dma::Reg::Cr(nr) => self.stream(nr).cr.set(bits),
            dma::Reg::Ndtr(nr) => {
                let st = self.stream(nr);
                // Only writable while the stream is disabled
                if st.cr.get() & dma::CR_EN == 0 {
                    st.ndtr.set(bits & 0xffff);
                    st.reload.set(bits & 0xffff);
                }
            }
            dma::Reg::Par(nr) => self.stream(nr).par.set(bits),
            dma::Reg::M0ar(nr) => self.stream(nr).m0ar.set(bits),
            dma::Reg::M1ar(nr) => self.stream(nr).m1ar.set(bits),
            dma::Reg::Fcr(nr) => self.stream(nr).fcr.set(bits),
        }
    }
}

impl dma::Instance for SimDma<'_> {
    fn peripheral(&self) -> Peripheral {
        Peripheral::Dma2
    }

    fn bind_memory(&self, stream: u8, cell: &'static SampleCell) {
        let st = self.stream(stream);
        st.memory.set(Some(cell));
        st.m0ar.set(cell.address());
    }
}

/// USART1 register handle
#[derive(Clone, Copy)]
pub struct SimUsart<'a>(&'a Sim);

impl Registers for SimUsart<'_> {
    type Reg = serial::Reg;

    fn read(&self, reg: serial::Reg) -> u32 {
        let sim = self.0;
        match reg {
            // The transmitter drains instantly
            serial::Reg::Sr => sim.usart1_reg(reg).get() | (Status::TXE | Status::TC).bits(),
            serial::Reg::Dr => {
                let sr = sim.usart1_reg(serial::Reg::Sr);
                let errors = Status::PE | Status::FE | Status::NF | Status::ORE;
                sr.set(sr.get() & !(Status::RXNE | errors).bits());
                sim.usart1_reg(reg).get()
            }
            _ => sim.usart1_reg(reg).get(),
        }
    }

    fn write(&self, reg: serial::Reg, bits: u32) {
        let sim = self.0;
        match reg {
            serial::Reg::Sr => {
                let sr = sim.usart1_reg(reg);
                sr.set(sr.get() & bits);
            }
            serial::Reg::Dr => {
                if sim.usart1_reg(serial::Reg::Cr1).get() & serial::CR1_UE != 0 {
                    // Output past the capacity is dropped
                    let _ = sim.transmitted.borrow_mut().push(bits as u8);
                }
            }
            _ => sim.usart1_reg(reg).set(bits),
        }
    }
}

impl serial::Instance for SimUsart<'_> {
    type Port = Self;

    fn peripheral(&self) -> Peripheral {
        Peripheral::Usart1
    }

    fn port(&self) -> Self {
        *self
    }
}

/// Delay handle, see [`Sim::delay`]
pub struct SimDelay<'a>(&'a Sim);

impl DelayMs<u32> for SimDelay<'_> {
    fn delay_ms(&mut self, ms: u32) {
        let delayed = &self.0.delayed_ms;
        delayed.set(delayed.get() + u64::from(ms));
    }
}

impl DelayUs<u32> for SimDelay<'_> {
    fn delay_us(&mut self, us: u32) {
        // Rounded down to whole milliseconds
        self.delay_ms(us / 1000);
    }
}
