//! # API for the Analog to Digital converter
//!
//! The converter is brought up through a small type-state machine:
//!
//! ```text
//! Adc<_, Unconfigured> --configure--> Adc<_, Configured> --start--> Adc<_, Running>
//!                                          ^                               |
//!                                          +-------------stop--------------+
//! ```
//!
//! Once running in continuous mode with DMA requests enabled, the converter
//! restarts itself after every result is drained by the DMA controller.

use core::marker::PhantomData;

use bitflags::bitflags;
use fugit::HertzU32 as Hertz;

use crate::rcc::{Clocks, Peripheral, Rcc};
use crate::registers::{field, with_field, Registers};

/// Per-converter registers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    Sr,
    Cr1,
    Cr2,
    Smpr1,
    Smpr2,
    Sqr1,
    Sqr2,
    Sqr3,
    Dr,
}

/// Registers shared by all converters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommonReg {
    Csr,
    Ccr,
}

bitflags! {
    /// ADC status register
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Status: u32 {
        const AWD = 1 << 0;
        const EOC = 1 << 1;
        const JEOC = 1 << 2;
        const JSTRT = 1 << 3;
        const STRT = 1 << 4;
        const OVR = 1 << 5;
    }
}

// CR1
const CR1_SCAN: u32 = 1 << 8;
const CR1_DISCEN: u32 = 1 << 11;
const CR1_RES: (u32, u32) = (24, 2);

// CR2
pub(crate) const CR2_ADON: u32 = 1 << 0;
pub(crate) const CR2_CONT: u32 = 1 << 1;
pub(crate) const CR2_DMA: u32 = 1 << 8;
pub(crate) const CR2_DDS: u32 = 1 << 9;
const CR2_ALIGN: u32 = 1 << 11;
const CR2_EXTSEL: (u32, u32) = (24, 4);
const CR2_EXTEN: (u32, u32) = (28, 2);
pub(crate) const CR2_SWSTART: u32 = 1 << 30;

// SQR1
const SQR1_L: (u32, u32) = (20, 4);

// CCR
const CCR_ADCPRE: (u32, u32) = (16, 2);
const CCR_VBATE: u32 = 1 << 22;
const CCR_TSVREFE: u32 = 1 << 23;

/// Highest channel number of the converters
const MAX_CHANNEL: u8 = 18;
/// Highest channel number wired to a pin
const MAX_EXTERNAL_CHANNEL: u8 = 15;
/// Longest regular sequence
const MAX_RANK: u8 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// ADC resolution
pub enum Resolution {
    /// 12 bits, 15 ADC clock cycles per conversion
    Twelve,
    /// 10 bits, 13 ADC clock cycles per conversion
    Ten,
    /// 8 bits, 11 ADC clock cycles per conversion
    Eight,
    /// 6 bits, 9 ADC clock cycles per conversion
    Six,
}

impl Resolution {
    /// Number of bits in a sample
    pub const fn bits(self) -> u8 {
        match self {
            Resolution::Twelve => 12,
            Resolution::Ten => 10,
            Resolution::Eight => 8,
            Resolution::Six => 6,
        }
    }

    /// Number of quantisation steps, `2^bits`
    pub const fn steps(self) -> u32 {
        1 << self.bits()
    }

    /// Largest right-aligned sample, `2^bits - 1`
    pub const fn max_sample(self) -> u16 {
        (self.steps() - 1) as u16
    }

    // 13.13.2 ADC control register 1 >> Bits 25:24 RES[1:0]
    fn res(self) -> u32 {
        match self {
            Resolution::Twelve => 0b00,
            Resolution::Ten => 0b01,
            Resolution::Eight => 0b10,
            Resolution::Six => 0b11,
        }
    }

    // Successive approximation cycles, sampling excluded
    fn conversion_cycles(self) -> u32 {
        u32::from(self.bits())
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Twelve
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(non_camel_case_types)]
/// ADC sampling time
///
/// Options for the sampling time, each is T ADC clock cycles.
pub enum SampleTime {
    /// 3 cycles sampling time
    T_3,
    /// 15 cycles sampling time
    T_15,
    /// 28 cycles sampling time
    T_28,
    /// 56 cycles sampling time
    T_56,
    /// 84 cycles sampling time
    T_84,
    /// 112 cycles sampling time
    T_112,
    /// 144 cycles sampling time
    T_144,
    /// 480 cycles sampling time
    T_480,
}

impl SampleTime {
    /// Length of the sampling phase in ADC clock cycles
    pub fn cycles(self) -> u32 {
        use SampleTime::*;
        match self {
            T_3 => 3,
            T_15 => 15,
            T_28 => 28,
            T_56 => 56,
            T_84 => 84,
            T_112 => 112,
            T_144 => 144,
            T_480 => 480,
        }
    }
}

impl Default for SampleTime {
    /// Get the default sample time (currently 56 cycles)
    fn default() -> Self {
        SampleTime::T_56
    }
}

impl From<SampleTime> for u8 {
    fn from(val: SampleTime) -> Self {
        use SampleTime::*;
        match val {
            T_3 => 0,
            T_15 => 1,
            T_28 => 2,
            T_56 => 3,
            T_84 => 4,
            T_112 => 5,
            T_144 => 6,
            T_480 => 7,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// ADC data register alignment
pub enum Align {
    /// Right alignment of output data
    Right,
    /// Left alignment of output data
    Left,
}

impl Default for Align {
    /// Default: right alignment
    fn default() -> Self {
        Align::Right
    }
}

// 13.13.3 ADC control register 2 >> Bit 11 ALIGN: Data alignment
impl From<Align> for bool {
    fn from(val: Align) -> Self {
        match val {
            Align::Right => false,
            Align::Left => true,
        }
    }
}

/// External trigger edge for the regular group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerEdge {
    /// Conversions are only started by software
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

/// External event that starts a regular conversion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TriggerSource {
    #[default]
    Tmr1Cc1 = 0,
    Tmr1Cc2,
    Tmr1Cc3,
    Tmr2Cc2,
    Tmr2Cc3,
    Tmr2Cc4,
    Tmr2Trgo,
    Tmr3Cc1,
    Tmr3Trgo,
    Tmr4Cc4,
    Tmr5Cc1,
    Tmr5Cc2,
    Tmr5Cc3,
    Tmr8Cc1,
    Tmr8Trgo,
    Eint11,
}

/// ADC clock prescaler, applied to PCLK2
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    #[default]
    Div2,
    Div4,
    Div6,
    Div8,
}

impl Prescaler {
    pub fn divisor(self) -> u32 {
        match self {
            Prescaler::Div2 => 2,
            Prescaler::Div4 => 4,
            Prescaler::Div6 => 6,
            Prescaler::Div8 => 8,
        }
    }

    fn bits(self) -> u32 {
        match self {
            Prescaler::Div2 => 0b00,
            Prescaler::Div4 => 0b01,
            Prescaler::Div6 => 0b10,
            Prescaler::Div8 => 0b11,
        }
    }
}

/// Analog input of a converter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel(u8);

impl Channel {
    /// Internal temperature sensor, ADC1 only
    pub const TEMPERATURE: Channel = Channel(16);
    /// Internal reference voltage, ADC1 only
    pub const VREFINT: Channel = Channel(17);
    /// Backup domain supply divided by two, ADC1 only
    pub const VBAT: Channel = Channel(18);

    /// Channel `id`, 0 to 18
    pub fn new(id: u8) -> Result<Self, Error> {
        if id > MAX_CHANNEL {
            Err(Error::InvalidChannel(id))
        } else {
            Ok(Channel(id))
        }
    }

    pub fn id(self) -> u8 {
        self.0
    }

    /// Channels routed to the on-die sense path controlled by TSVREFE
    pub fn is_internal(self) -> bool {
        self == Self::TEMPERATURE || self == Self::VREFINT
    }
}

/// ADC error
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The converter clock is not enabled
    #[error("ADC clock is not enabled")]
    ClockDisabled,
    /// No such analog input
    #[error("invalid ADC channel {0}")]
    InvalidChannel(u8),
    /// Rank outside of the regular sequence
    #[error("invalid sequence rank {0}")]
    InvalidRank(u8),
    /// Conversions were started without a channel in the sequence
    #[error("no channel bound to the regular sequence")]
    NoChannel,
    /// An internal channel is bound but its sense path is powered down
    #[error("temperature sensor and VREFINT path is disabled")]
    SensorPathDisabled,
}

/// Regular group configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub resolution: Resolution,
    pub align: Align,
    /// Convert the whole regular sequence instead of only rank 1
    pub scan: bool,
    /// Restart conversion as soon as the previous one finished
    pub continuous: bool,
    pub trigger_edge: TriggerEdge,
    /// Ignored while `trigger_edge` is [`TriggerEdge::None`]
    pub trigger_source: TriggerSource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolution: Resolution::Twelve,
            align: Align::Right,
            scan: false,
            continuous: false,
            trigger_edge: TriggerEdge::None,
            trigger_source: TriggerSource::Tmr1Cc1,
        }
    }
}

impl Config {
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    pub fn scan(mut self, scan: bool) -> Self {
        self.scan = scan;
        self
    }

    pub fn continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn external_trigger(mut self, edge: TriggerEdge, source: TriggerSource) -> Self {
        self.trigger_edge = edge;
        self.trigger_source = source;
        self
    }
}

/// Implemented by all ADC instances
pub trait Instance: Registers<Reg = Reg> {
    /// Clock gate of this converter
    fn peripheral(&self) -> Peripheral;

    /// Bus address of the regular data register, as used by the DMA controller
    fn data_address(&self) -> u32;

    /// Busy-waits for at least `cycles` core clock cycles
    fn wait_cycles(&self, cycles: u32);

    /// Whether the temperature sensor, VREFINT and VBAT are wired to inputs 16 to 18
    fn has_internal_channels(&self) -> bool;
}

/// Indicates that the converter has not been configured yet
pub struct Unconfigured;

/// Indicates that the converter is configured and idle
pub struct Configured;

/// Indicates that the converter is powered up and converting
pub struct Running;

/// Analog to digital converter
pub struct Adc<I, STATE> {
    rb: I,
    sysclk: Hertz,
    config: Config,
    sequence_len: u8,
    _state: PhantomData<STATE>,
}

impl<I: Instance> Adc<I, Unconfigured> {
    /// Takes control of a converter whose clock has already been enabled
    pub fn new<R>(rb: I, rcc: &Rcc<R>, clocks: &Clocks) -> Result<Self, Error>
    where
        R: Registers<Reg = crate::rcc::Reg>,
    {
        if !rcc.is_enabled(rb.peripheral()) {
            return Err(Error::ClockDisabled);
        }

        Ok(Adc {
            rb,
            sysclk: clocks.sysclk(),
            config: Config::default(),
            sequence_len: 0,
            _state: PhantomData,
        })
    }

    /// Applies the regular group configuration
    ///
    /// The converter stays powered down and the regular sequence is emptied.
    pub fn configure(self, config: Config) -> Adc<I, Configured> {
        let rb = &self.rb;

        rb.clear_bits(Reg::Cr2, CR2_ADON);

        rb.modify(Reg::Cr1, |r| {
            let r = with_field(r, CR1_RES.0, CR1_RES.1, config.resolution.res());
            let r = if config.scan {
                r | CR1_SCAN
            } else {
                r & !CR1_SCAN
            };
            r & !CR1_DISCEN
        });

        rb.modify(Reg::Cr2, |r| {
            let r = if config.continuous {
                r | CR2_CONT
            } else {
                r & !CR2_CONT
            };
            let r = if bool::from(config.align) {
                r | CR2_ALIGN
            } else {
                r & !CR2_ALIGN
            };
            let exten = match config.trigger_edge {
                TriggerEdge::None => 0b00,
                TriggerEdge::Rising => 0b01,
                TriggerEdge::Falling => 0b10,
                TriggerEdge::Both => 0b11,
            };
            let r = with_field(r, CR2_EXTEN.0, CR2_EXTEN.1, exten);
            with_field(r, CR2_EXTSEL.0, CR2_EXTSEL.1, config.trigger_source as u32)
        });

        rb.modify(Reg::Sqr1, |r| with_field(r, SQR1_L.0, SQR1_L.1, 0));

        log::trace!("ADC configured: {:?}", config);

        Adc {
            rb: self.rb,
            sysclk: self.sysclk,
            config,
            sequence_len: 0,
            _state: PhantomData,
        }
    }

    /// Gives back the converter
    pub fn release(self) -> I {
        self.rb
    }
}

impl<I: Instance> Adc<I, Configured> {
    /// Powers the temperature sensor and VREFINT path
    ///
    /// Waits for the sensor start-up time (10 us) before returning.
    pub fn enable_temperature_sensor<C>(&mut self, common: &mut AdcCommon<C>)
    where
        C: Registers<Reg = CommonReg>,
    {
        if !common.temperature_sensor_enabled() {
            common.rb.set_bits(CommonReg::Ccr, CCR_TSVREFE);
            self.rb.wait_cycles(self.sysclk.raw() / 100_000);
        }
    }

    /// Puts `channel` at position `rank` of the regular sequence
    ///
    /// Ranks start at 1. Without scan mode only rank 1 is converted, so any
    /// other rank is rejected.
    pub fn bind_channel(
        &mut self,
        channel: Channel,
        rank: u8,
        sample_time: SampleTime,
    ) -> Result<(), Error> {
        if rank == 0 || rank > MAX_RANK || (!self.config.scan && rank != 1) {
            return Err(Error::InvalidRank(rank));
        }
        if channel.id() > MAX_EXTERNAL_CHANNEL && !self.rb.has_internal_channels() {
            return Err(Error::InvalidChannel(channel.id()));
        }

        self.set_channel_sample_time(channel, sample_time);
        self.set_sequence_slot(rank, channel);

        self.sequence_len = self.sequence_len.max(rank);
        let len = u32::from(self.sequence_len - 1);
        self.rb
            .modify(Reg::Sqr1, |r| with_field(r, SQR1_L.0, SQR1_L.1, len));

        Ok(())
    }

    /// Makes the converter issue a DMA request for every regular result
    ///
    /// Requests keep coming after the DMA transfer count is reached, which is
    /// what a circular stream needs.
    pub fn enable_dma_request(&mut self) {
        self.rb.set_bits(Reg::Cr2, CR2_DMA | CR2_DDS);
    }

    pub fn disable_dma_request(&mut self) {
        self.rb.clear_bits(Reg::Cr2, CR2_DMA | CR2_DDS);
    }

    /// Powers up the converter and starts the regular group
    ///
    /// `common` is only read, to check that the sense path is powered when
    /// the first rank is an internal channel.
    pub fn start<C>(self, common: &AdcCommon<C>) -> Result<Adc<I, Running>, Error>
    where
        C: Registers<Reg = CommonReg>,
    {
        let first = field(self.rb.read(Reg::Sqr3), 0, 5) as u8;
        if self.sequence_len == 0 {
            return Err(Error::NoChannel);
        }
        if Channel(first).is_internal() && !common.temperature_sensor_enabled() {
            return Err(Error::SensorPathDisabled);
        }

        self.rb.set_bits(Reg::Cr2, CR2_ADON);
        // The converter needs tSTAB (3 us) after ADON before the first conversion
        self.rb.wait_cycles(self.sysclk.raw() / 333_333);

        self.rb
            .clear_bits(Reg::Sr, (Status::EOC | Status::OVR).bits());
        self.rb.set_bits(Reg::Cr2, CR2_SWSTART);

        log::debug!("ADC started, {} channel(s) in sequence", self.sequence_len);

        Ok(self.transition())
    }

    /// Gives back the converter
    pub fn release(self) -> I {
        self.rb
    }

    // 13.13.4 ADC sample time registers: 3 bits per channel
    fn set_channel_sample_time(&mut self, channel: Channel, sample_time: SampleTime) {
        let chan = u32::from(channel.id());
        let smp = u32::from(u8::from(sample_time));
        match chan {
            0..=9 => self
                .rb
                .modify(Reg::Smpr2, |r| with_field(r, chan * 3, 3, smp)),
            _ => self
                .rb
                .modify(Reg::Smpr1, |r| with_field(r, (chan - 10) * 3, 3, smp)),
        }
    }

    // 13.13.9 - 13.13.11 ADC regular sequence registers: 5 bits per rank
    fn set_sequence_slot(&mut self, rank: u8, channel: Channel) {
        let slot = u32::from(rank - 1);
        let id = u32::from(channel.id());
        let (reg, offset) = match slot {
            0..=5 => (Reg::Sqr3, slot * 5),
            6..=11 => (Reg::Sqr2, (slot - 6) * 5),
            _ => (Reg::Sqr1, (slot - 12) * 5),
        };
        self.rb.modify(reg, |r| with_field(r, offset, 5, id));
    }
}

impl<I: Instance> Adc<I, Running> {
    /// Stops conversions and powers the converter down
    ///
    /// The configuration is kept, so the converter can be started again.
    pub fn stop(self) -> Adc<I, Configured> {
        self.rb.clear_bits(Reg::Cr2, CR2_CONT);
        self.rb.clear_bits(Reg::Cr2, CR2_ADON);

        log::debug!("ADC stopped");

        let adc: Adc<I, Configured> = self.transition();
        // CONT is part of the stored configuration, restore it for the next start
        if adc.config.continuous {
            adc.rb.set_bits(Reg::Cr2, CR2_CONT);
        }
        adc
    }

    /// Last regular result, read directly from the data register
    pub fn read_data(&self) -> u16 {
        self.rb.read(Reg::Dr) as u16
    }

    /// Returns `true` if a result was lost because it was not drained in time
    ///
    /// In DMA mode an overrun stops further requests until the flag is
    /// cleared and conversions are restarted.
    pub fn is_overrun(&self) -> bool {
        Status::from_bits_truncate(self.rb.read(Reg::Sr)).contains(Status::OVR)
    }

    /// Clears the overrun flag and restarts the regular group
    pub fn clear_overrun(&mut self) {
        self.rb.clear_bits(Reg::Sr, Status::OVR.bits());
        self.rb.set_bits(Reg::Cr2, CR2_SWSTART);
    }
}

impl<I: Instance, STATE> Adc<I, STATE> {
    /// Current regular group configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bus address of the data register, for the DMA peripheral port
    pub fn data_address(&self) -> u32 {
        self.rb.data_address()
    }

    /// Returns the largest possible sample value for the current settings
    pub fn max_sample(&self) -> u16 {
        match self.config.align {
            Align::Left => u16::MAX,
            Align::Right => self.config.resolution.max_sample(),
        }
    }

    /// Rate at which a continuous single-channel sequence produces results
    pub fn conversion_rate(&self, adcclk: Hertz, sample_time: SampleTime) -> Hertz {
        let cycles = sample_time.cycles() + self.config.resolution.conversion_cycles();
        adcclk / cycles
    }

    fn transition<S>(self) -> Adc<I, S> {
        Adc {
            rb: self.rb,
            sysclk: self.sysclk,
            config: self.config,
            sequence_len: self.sequence_len,
            _state: PhantomData,
        }
    }
}

/// Settings shared by all converters
pub struct AdcCommon<C> {
    rb: C,
}

impl<C> AdcCommon<C>
where
    C: Registers<Reg = CommonReg>,
{
    pub fn new(rb: C) -> Self {
        AdcCommon { rb }
    }

    /// Selects the ADC clock, derived from PCLK2
    ///
    /// The converters must be powered down.
    pub fn set_prescaler(&mut self, prescaler: Prescaler) {
        self.rb.modify(CommonReg::Ccr, |r| {
            with_field(r, CCR_ADCPRE.0, CCR_ADCPRE.1, prescaler.bits())
        });
    }

    /// ADC clock for the current prescaler setting
    pub fn adcclk(&self, clocks: &Clocks) -> Hertz {
        let divisor = match field(self.rb.read(CommonReg::Ccr), CCR_ADCPRE.0, CCR_ADCPRE.1) {
            0b00 => Prescaler::Div2,
            0b01 => Prescaler::Div4,
            0b10 => Prescaler::Div6,
            _ => Prescaler::Div8,
        }
        .divisor();
        clocks.pclk2() / divisor
    }

    pub fn temperature_sensor_enabled(&self) -> bool {
        self.rb.read(CommonReg::Ccr) & CCR_TSVREFE != 0
    }

    pub fn disable_temperature_sensor(&mut self) {
        self.rb.clear_bits(CommonReg::Ccr, CCR_TSVREFE);
    }

    /// Connects VBAT/2 to channel 18
    ///
    /// VBAT takes precedence over the temperature sensor when both are on.
    pub fn enable_vbat(&mut self) {
        self.rb.set_bits(CommonReg::Ccr, CCR_VBATE);
    }

    pub fn disable_vbat(&mut self) {
        self.rb.clear_bits(CommonReg::Ccr, CCR_VBATE);
    }

    pub fn release(self) -> C {
        self.rb
    }
}

#[cfg(feature = "device-selected")]
mod device {
    use super::{CommonReg, Instance, Reg};
    use crate::pac::{ADC1, ADC2, ADC3, ADC_COMMON};
    use crate::rcc::Peripheral;
    use crate::registers::Registers;

    macro_rules! adc_registers {
        ($($ADC:ident: $peripheral:ident, $internal:literal,)+) => {
            $(
                impl Registers for $ADC {
                    type Reg = Reg;

                    fn read(&self, reg: Reg) -> u32 {
                        match reg {
                            Reg::Sr => self.sr.read().bits(),
                            Reg::Cr1 => self.cr1.read().bits(),
                            Reg::Cr2 => self.cr2.read().bits(),
                            Reg::Smpr1 => self.smpr1.read().bits(),
                            Reg::Smpr2 => self.smpr2.read().bits(),
                            Reg::Sqr1 => self.sqr1.read().bits(),
                            Reg::Sqr2 => self.sqr2.read().bits(),
                            Reg::Sqr3 => self.sqr3.read().bits(),
                            Reg::Dr => self.dr.read().bits(),
                        }
                    }

                    #[allow(unused_unsafe)]
                    fn write(&self, reg: Reg, bits: u32) {
                        match reg {
                            Reg::Sr => self.sr.write(|w| unsafe { w.bits(bits) }),
                            Reg::Cr1 => self.cr1.write(|w| unsafe { w.bits(bits) }),
                            Reg::Cr2 => self.cr2.write(|w| unsafe { w.bits(bits) }),
                            Reg::Smpr1 => self.smpr1.write(|w| unsafe { w.bits(bits) }),
                            Reg::Smpr2 => self.smpr2.write(|w| unsafe { w.bits(bits) }),
                            Reg::Sqr1 => self.sqr1.write(|w| unsafe { w.bits(bits) }),
                            Reg::Sqr2 => self.sqr2.write(|w| unsafe { w.bits(bits) }),
                            Reg::Sqr3 => self.sqr3.write(|w| unsafe { w.bits(bits) }),
                            // read-only
                            Reg::Dr => {}
                        }
                    }
                }

                impl Instance for $ADC {
                    fn peripheral(&self) -> Peripheral {
                        Peripheral::$peripheral
                    }

                    fn data_address(&self) -> u32 {
                        &self.dr as *const _ as u32
                    }

                    fn wait_cycles(&self, cycles: u32) {
                        cortex_m::asm::delay(cycles);
                    }

                    fn has_internal_channels(&self) -> bool {
                        $internal
                    }
                }
            )+
        };
    }

    adc_registers!(
        ADC1: Adc1, true,
        ADC2: Adc2, false,
        ADC3: Adc3, false,
    );

    impl Registers for ADC_COMMON {
        type Reg = CommonReg;

        fn read(&self, reg: CommonReg) -> u32 {
            match reg {
                CommonReg::Csr => self.csr.read().bits(),
                CommonReg::Ccr => self.ccr.read().bits(),
            }
        }

        #[allow(unused_unsafe)]
        fn write(&self, reg: CommonReg, bits: u32) {
            match reg {
                // read-only
                CommonReg::Csr => {}
                CommonReg::Ccr => self.ccr.write(|w| unsafe { w.bits(bits) }),
            }
        }
    }
}
