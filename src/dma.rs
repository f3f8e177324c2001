//! Interface to the DMA peripheral
//!
//! Only the single-cell peripheral-to-memory path is supported: one stream
//! copies a half-word from a peripheral data register into a [`SampleCell`],
//! optionally re-arming itself after every item (circular mode).

use core::{
    marker::PhantomData,
    sync::atomic::{self, AtomicU16, Ordering},
};

use bitflags::bitflags;

use crate::{
    rcc::{Peripheral, Rcc},
    registers::{with_field, Registers},
    state,
};

/// Entry point to the DMA API
pub struct DMA<I> {
    /// Handle to the DMA instance
    pub handle: Handle<I, state::Disabled>,

    /// The streams associated with this DMA instance
    pub streams: Streams<I>,
}

impl<I> DMA<I>
where
    I: Instance,
{
    /// Creates a new instance of `DMA`
    ///
    /// This just wraps the register block, but does no initialization.
    pub fn new(instance: I) -> Self {
        DMA {
            handle: Handle::new(instance),
            streams: Streams::new(),
        }
    }
}

/// Handle to the DMA instance
///
/// Controls access to the DMA registers and makes sure that access from
/// multiple streams can not conflict.
pub struct Handle<I, State> {
    dma: I,
    _state: State,
}

impl<I> Handle<I, state::Disabled>
where
    I: Instance,
{
    fn new(instance: I) -> Self {
        Self {
            dma: instance,
            _state: state::Disabled,
        }
    }

    /// Initializes the DMA instance
    ///
    /// The controller clock must have been turned on through [`Rcc::enable`].
    pub fn enable<R>(self, rcc: &Rcc<R>) -> Result<Handle<I, state::Enabled>, Error>
    where
        R: Registers<Reg = crate::rcc::Reg>,
    {
        if !rcc.is_enabled(self.dma.peripheral()) {
            return Err(Error::ClockDisabled);
        }

        Ok(Handle {
            dma: self.dma,
            _state: state::Enabled,
        })
    }
}

impl<I, State> Handle<I, State> {
    /// Gives back the DMA instance
    pub fn release(self) -> I {
        self.dma
    }
}

/// DMA stream and controller registers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reg {
    /// Interrupt status, streams 0 to 3
    Lisr,
    /// Interrupt status, streams 4 to 7
    Hisr,
    /// Interrupt flag clear, streams 0 to 3
    Lifcr,
    /// Interrupt flag clear, streams 4 to 7
    Hifcr,
    Cr(u8),
    Ndtr(u8),
    Par(u8),
    M0ar(u8),
    M1ar(u8),
    Fcr(u8),
}

bitflags! {
    /// Status flags of one stream, as laid out at the stream's offset in
    /// LISR/HISR
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Flags: u32 {
        const FIFO_ERROR = 1 << 0;
        const DIRECT_MODE_ERROR = 1 << 2;
        const TRANSFER_ERROR = 1 << 3;
        const HALF_TRANSFER = 1 << 4;
        const TRANSFER_COMPLETE = 1 << 5;
    }
}

// SxCR
pub(crate) const CR_EN: u32 = 1 << 0;
const CR_DMEIE: u32 = 1 << 1;
const CR_TEIE: u32 = 1 << 2;
const CR_HTIE: u32 = 1 << 3;
const CR_TCIE: u32 = 1 << 4;
const CR_PFCTRL: u32 = 1 << 5;
pub(crate) const CR_DIR: (u32, u32) = (6, 2);
pub(crate) const CR_CIRC: u32 = 1 << 8;
const CR_PINC: u32 = 1 << 9;
const CR_MINC: u32 = 1 << 10;
const CR_PSIZE: (u32, u32) = (11, 2);
const CR_MSIZE: (u32, u32) = (13, 2);
const CR_PL: (u32, u32) = (16, 2);
const CR_DBM: u32 = 1 << 18;
const CR_PBURST: (u32, u32) = (21, 2);
const CR_MBURST: (u32, u32) = (23, 2);
const CR_CHSEL: (u32, u32) = (25, 3);

// SxFCR
const FCR_FTH: (u32, u32) = (0, 2);
const FCR_DMDIS: u32 = 1 << 2;
const FCR_FEIE: u32 = 1 << 7;

/// Represents an ongoing DMA transfer
pub struct Transfer<S, State> {
    stream: S,
    cell: &'static SampleCell,
    _state: State,
}

impl<S> Transfer<S, Ready>
where
    S: Stream,
    S::Instance: Instance,
{
    /// Programs `stream` to move items from `peripheral_address` into `cell`
    ///
    /// The stream is left disabled, call [`Transfer::start`] to arm it.
    pub fn new(
        handle: &Handle<S::Instance, state::Enabled>,
        stream: S,
        peripheral_address: u32,
        cell: &'static SampleCell,
        config: TransferConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        // The following configuration procedure is documented in the reference
        // manual, section "Stream configuration procedure".

        let nr = S::number();
        let dma = &handle.dma;

        // Disable stream
        dma.clear_bits(Reg::Cr(nr), CR_EN);
        while dma.read(Reg::Cr(nr)) & CR_EN != 0 {}

        S::clear_flags(dma, Flags::all());

        // Set peripheral port register address
        dma.write(Reg::Par(nr), peripheral_address);

        // Set memory address
        dma.bind_memory(nr, cell);

        // Write number of data items to transfer
        dma.write(Reg::Ndtr(nr), u32::from(config.count));

        // Configure FIFO
        let fcr = match config.fifo {
            // Direct mode, FIFO interrupt disabled
            None => 0,
            Some(threshold) => with_field(FCR_DMDIS, FCR_FTH.0, FCR_FTH.1, threshold as u32),
        };
        dma.modify(Reg::Fcr(nr), |r| {
            with_field(r & !(FCR_DMDIS | FCR_FEIE), FCR_FTH.0, FCR_FTH.1, 0) | fcr
        });

        // Select channel and everything else, all interrupts disabled
        dma.write(Reg::Cr(nr), config.cr_bits());

        log::trace!(
            "DMA stream {} programmed: {:?}, cr={:#010x}",
            nr,
            config,
            config.cr_bits()
        );

        Ok(Transfer {
            stream,
            cell,
            _state: Ready,
        })
    }

    /// Enables the given interrupt for this DMA transfer
    ///
    /// Only the enable bit of the stream is set; unmasking the interrupt in
    /// the NVIC is left to the application.
    pub fn listen(&mut self, handle: &Handle<S::Instance, state::Enabled>, event: Event) {
        handle
            .dma
            .set_bits(Reg::Cr(S::number()), event.enable_bit());
    }

    /// Disables the given interrupt for this DMA transfer
    pub fn unlisten(&mut self, handle: &Handle<S::Instance, state::Enabled>, event: Event) {
        handle
            .dma
            .clear_bits(Reg::Cr(S::number()), event.enable_bit());
    }

    /// Start the DMA transfer
    ///
    /// Consumes this instance of `Transfer` and returns another instance with
    /// its type state set to indicate the transfer has been started.
    pub fn start(self, handle: &Handle<S::Instance, state::Enabled>) -> Transfer<S, Started> {
        atomic::fence(Ordering::SeqCst);

        handle.dma.set_bits(Reg::Cr(S::number()), CR_EN);

        log::trace!("DMA stream {} enabled", S::number());

        Transfer {
            stream: self.stream,
            cell: self.cell,
            _state: Started,
        }
    }
}

impl<S> Transfer<S, Started>
where
    S: Stream,
    S::Instance: Instance,
{
    /// Checks whether the stream is still enabled
    ///
    /// A circular transfer stays active until it is stopped or an error
    /// disables it.
    pub fn is_active(&self, handle: &Handle<S::Instance, state::Enabled>) -> bool {
        handle.dma.read(Reg::Cr(S::number())) & CR_EN != 0
    }

    /// Returns `true` if a transfer cycle completed since the flag was last
    /// cleared
    ///
    /// The flag is sticky: it stays raised no matter how many cycles completed
    /// in between.
    pub fn is_complete(&self, handle: &Handle<S::Instance, state::Enabled>) -> bool {
        S::flags(&handle.dma).contains(Flags::TRANSFER_COMPLETE)
    }

    /// Clears the transfer complete flag
    pub fn clear_complete(&mut self, handle: &Handle<S::Instance, state::Enabled>) {
        S::clear_flags(&handle.dma, Flags::TRANSFER_COMPLETE | Flags::HALF_TRANSFER);
    }

    /// Takes the latest sample if a cycle completed since the last take
    ///
    /// The flag is cleared before the cell is read, so a cycle completing in
    /// between raises the flag again and is picked up by the next call.
    pub fn try_take(&mut self, handle: &Handle<S::Instance, state::Enabled>) -> Option<u16> {
        if !self.is_complete(handle) {
            return None;
        }

        self.clear_complete(handle);
        atomic::fence(Ordering::SeqCst);

        Some(self.cell.load())
    }

    /// Current contents of the destination cell, without looking at the flags
    pub fn latest(&self) -> u16 {
        self.cell.load()
    }

    /// Number of items left before the current cycle completes
    pub fn remaining(&self, handle: &Handle<S::Instance, state::Enabled>) -> u16 {
        handle.dma.read(Reg::Ndtr(S::number())) as u16
    }

    /// Raw status flags of the stream
    pub fn flags(&self, handle: &Handle<S::Instance, state::Enabled>) -> Flags {
        S::flags(&handle.dma)
    }

    /// Returns an error if the stream reported a transfer or direct mode
    /// error
    ///
    /// The error flags are left set; [`Transfer::stop`] clears them.
    pub fn check(&self, handle: &Handle<S::Instance, state::Enabled>) -> Result<(), Error> {
        let result = Error::check(S::flags(&handle.dma));
        if let Err(error) = result {
            log::warn!("DMA stream {}: {}", S::number(), error);
        }
        result
    }

    /// Disables the stream and gives back the stream token
    pub fn stop(self, handle: &Handle<S::Instance, state::Enabled>) -> S {
        let nr = S::number();
        handle.dma.clear_bits(Reg::Cr(nr), CR_EN);
        while handle.dma.read(Reg::Cr(nr)) & CR_EN != 0 {}

        atomic::fence(Ordering::SeqCst);
        S::clear_flags(&handle.dma, Flags::all());

        log::trace!("DMA stream {} disabled", nr);

        self.stream
    }
}

/// Half-word destination of a single-item transfer
///
/// Written by the DMA controller, read by software. Must be `'static` since
/// the controller keeps writing to it for as long as the stream runs.
#[repr(transparent)]
pub struct SampleCell(AtomicU16);

impl SampleCell {
    pub const fn new() -> Self {
        SampleCell(AtomicU16::new(0))
    }

    /// Current value of the cell
    pub fn load(&self) -> u16 {
        self.0.load(Ordering::Acquire)
    }

    /// Bus address of the cell, for the memory port of a stream
    pub fn address(&'static self) -> u32 {
        self.0.as_ptr() as usize as u32
    }

    #[cfg(any(test, feature = "sim"))]
    pub(crate) fn store(&self, value: u16) {
        self.0.store(value, Ordering::Release)
    }
}

impl Default for SampleCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Transfer direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    PeripheralToMemory,
    MemoryToPeripheral,
    /// Only supported by DMA2
    MemoryToMemory,
}

impl Direction {
    fn bits(self) -> u32 {
        match self {
            Direction::PeripheralToMemory => 0b00,
            Direction::MemoryToPeripheral => 0b01,
            Direction::MemoryToMemory => 0b10,
        }
    }
}

/// Width of one data item on a port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSize {
    Byte,
    HalfWord,
    Word,
}

impl DataSize {
    fn bits(self) -> u32 {
        match self {
            DataSize::Byte => 0b00,
            DataSize::HalfWord => 0b01,
            DataSize::Word => 0b10,
        }
    }
}

/// Software priority among the streams of one controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Priority {
    fn bits(self) -> u32 {
        match self {
            Priority::Low => 0b00,
            Priority::Medium => 0b01,
            Priority::High => 0b10,
            Priority::VeryHigh => 0b11,
        }
    }
}

/// Burst length on a port
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Burst {
    Single,
    Incr4,
    Incr8,
    Incr16,
}

impl Burst {
    fn bits(self) -> u32 {
        match self {
            Burst::Single => 0b00,
            Burst::Incr4 => 0b01,
            Burst::Incr8 => 0b10,
            Burst::Incr16 => 0b11,
        }
    }
}

/// FIFO fill level that triggers a memory access
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum FifoThreshold {
    Quarter = 0b00,
    Half = 0b01,
    ThreeQuarters = 0b10,
    Full = 0b11,
}

/// What happens after the last item of a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// The stream disables itself
    Normal,
    /// The item counter is reloaded and the stream keeps running
    Circular,
}

/// Request channel of a stream
///
/// See the request mapping tables in the reference manual; ADC1 is channel 0
/// on DMA2 streams 0 and 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Channel0,
    Channel1,
    Channel2,
    Channel3,
    Channel4,
    Channel5,
    Channel6,
    Channel7,
}

impl Channel {
    fn bits(self) -> u32 {
        self as u32
    }
}

/// Stream configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferConfig {
    pub channel: Channel,
    pub direction: Direction,
    pub mode: Mode,
    pub priority: Priority,
    pub peripheral_size: DataSize,
    pub memory_size: DataSize,
    pub peripheral_increment: bool,
    pub memory_increment: bool,
    /// Items per cycle
    pub count: u16,
    /// `None` selects direct mode
    pub fifo: Option<FifoThreshold>,
    pub peripheral_burst: Burst,
    pub memory_burst: Burst,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            channel: Channel::Channel0,
            direction: Direction::PeripheralToMemory,
            mode: Mode::Normal,
            priority: Priority::Low,
            peripheral_size: DataSize::HalfWord,
            memory_size: DataSize::HalfWord,
            peripheral_increment: false,
            memory_increment: false,
            count: 1,
            fifo: None,
            peripheral_burst: Burst::Single,
            memory_burst: Burst::Single,
        }
    }
}

impl TransferConfig {
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn circular(mut self, circular: bool) -> Self {
        self.mode = if circular {
            Mode::Circular
        } else {
            Mode::Normal
        };
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets both port widths
    pub fn data_size(mut self, size: DataSize) -> Self {
        self.peripheral_size = size;
        self.memory_size = size;
        self
    }

    pub fn memory_increment(mut self, increment: bool) -> Self {
        self.memory_increment = increment;
        self
    }

    pub fn peripheral_increment(mut self, increment: bool) -> Self {
        self.peripheral_increment = increment;
        self
    }

    pub fn count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    pub fn fifo(mut self, threshold: Option<FifoThreshold>) -> Self {
        self.fifo = threshold;
        self
    }

    pub fn burst(mut self, peripheral: Burst, memory: Burst) -> Self {
        self.peripheral_burst = peripheral;
        self.memory_burst = memory;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if self.count == 0 {
            return Err(Error::InvalidLength);
        }
        // The destination is a single half-word cell
        if self.memory_size != DataSize::HalfWord {
            return Err(Error::WidthMismatch);
        }
        // Direct mode has no packing, both ports move PSIZE
        if self.fifo.is_none() && self.peripheral_size != self.memory_size {
            return Err(Error::WidthMismatch);
        }
        if self.memory_increment && self.count > 1 {
            return Err(Error::BufferOverflow);
        }
        if self.fifo.is_none()
            && (self.memory_burst != Burst::Single || self.peripheral_burst != Burst::Single)
        {
            return Err(Error::BurstWithoutFifo);
        }
        if self.direction == Direction::MemoryToMemory && self.mode == Mode::Circular {
            return Err(Error::CircularMemoryToMemory);
        }
        Ok(())
    }

    fn cr_bits(&self) -> u32 {
        let mut cr = 0;
        cr = with_field(cr, CR_CHSEL.0, CR_CHSEL.1, self.channel.bits());
        cr = with_field(cr, CR_MBURST.0, CR_MBURST.1, self.memory_burst.bits());
        cr = with_field(cr, CR_PBURST.0, CR_PBURST.1, self.peripheral_burst.bits());
        cr = with_field(cr, CR_PL.0, CR_PL.1, self.priority.bits());
        cr = with_field(cr, CR_MSIZE.0, CR_MSIZE.1, self.memory_size.bits());
        cr = with_field(cr, CR_PSIZE.0, CR_PSIZE.1, self.peripheral_size.bits());
        cr = with_field(cr, CR_DIR.0, CR_DIR.1, self.direction.bits());
        if self.memory_increment {
            cr |= CR_MINC;
        }
        if self.peripheral_increment {
            cr |= CR_PINC;
        }
        if self.mode == Mode::Circular {
            cr |= CR_CIRC;
        }
        // DMA is the flow controller, double-buffer mode disabled
        cr & !(CR_PFCTRL | CR_DBM)
    }
}

/// Implemented for all types that represent DMA streams
///
/// This is an internal trait. End users neither need to implement it, nor use
/// it directly.
pub trait Stream {
    /// DMA controller the stream belongs to
    type Instance;

    fn number() -> u8;

    /// LISR or HISR
    fn status_register() -> Reg;
    /// LIFCR or HIFCR
    fn clear_register() -> Reg;
    /// Offset of the stream's flags within its status register
    fn flag_shift() -> u32;

    fn flags<I>(dma: &I) -> Flags
    where
        I: Registers<Reg = Reg>,
    {
        Flags::from_bits_truncate(dma.read(Self::status_register()) >> Self::flag_shift())
    }

    fn clear_flags<I>(dma: &I, flags: Flags)
    where
        I: Registers<Reg = Reg>,
    {
        dma.write(Self::clear_register(), flags.bits() << Self::flag_shift());
    }
}

macro_rules! impl_stream {
    (
        $(
            $name:ident,
            $name_lower:ident,
            $number:expr,
            $flag_reg:ident,
            $flag_clear_reg:ident,
            $shift:expr;
        )*
    ) => {
        pub struct Streams<I> {
            $(pub $name_lower: $name<I>,)*
        }

        impl<I> Streams<I> {
            fn new() -> Self {
                Self {
                    $($name_lower: $name(PhantomData),)*
                }
            }
        }

        $(
            pub struct $name<I>(PhantomData<I>);

            impl<I> Stream for $name<I> {
                type Instance = I;

                fn number() -> u8 { $number }

                fn status_register() -> Reg { Reg::$flag_reg }
                fn clear_register() -> Reg { Reg::$flag_clear_reg }
                fn flag_shift() -> u32 { $shift }
            }
        )*
    }
}

impl_stream!(
    Stream0, stream0, 0, Lisr, Lifcr, 0;
    Stream1, stream1, 1, Lisr, Lifcr, 6;
    Stream2, stream2, 2, Lisr, Lifcr, 16;
    Stream3, stream3, 3, Lisr, Lifcr, 22;
    Stream4, stream4, 4, Hisr, Hifcr, 0;
    Stream5, stream5, 5, Hisr, Hifcr, 6;
    Stream6, stream6, 6, Hisr, Hifcr, 16;
    Stream7, stream7, 7, Hisr, Hifcr, 22;
);

/// Implemented for all DMA instances
///
/// This is an internal trait. End users neither need to implement it, nor use
/// it directly.
pub trait Instance: Registers<Reg = Reg> {
    /// Clock gate of this controller
    fn peripheral(&self) -> Peripheral;

    /// Points the memory port of `stream` at `cell`
    fn bind_memory(&self, stream: u8, cell: &'static SampleCell);
}

/// Stream interrupt sources
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    TransferComplete,
    HalfTransfer,
    TransferError,
    DirectModeError,
}

impl Event {
    fn enable_bit(self) -> u32 {
        match self {
            Event::TransferComplete => CR_TCIE,
            Event::HalfTransfer => CR_HTIE,
            Event::TransferError => CR_TEIE,
            Event::DirectModeError => CR_DMEIE,
        }
    }
}

/// A DMA error
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    #[error("DMA clock is not enabled")]
    ClockDisabled,
    #[error("transfer item count must not be zero")]
    InvalidLength,
    #[error("port widths do not match the destination")]
    WidthMismatch,
    #[error("transfer would write past the destination cell")]
    BufferOverflow,
    #[error("burst transfers require FIFO mode")]
    BurstWithoutFifo,
    #[error("memory-to-memory transfers can not be circular")]
    CircularMemoryToMemory,
    #[error("bus error during transfer")]
    Transfer,
    #[error("direct mode error")]
    DirectMode,
}

impl Error {
    pub(crate) fn check(flags: Flags) -> Result<(), Self> {
        if flags.contains(Flags::TRANSFER_ERROR) {
            return Err(Error::Transfer);
        }
        if flags.contains(Flags::DIRECT_MODE_ERROR) {
            return Err(Error::DirectMode);
        }
        // FIFO errors are not checked; the flag can be raised in direct mode
        // even though every item is transferred.

        Ok(())
    }
}

/// Indicates that a DMA transfer is ready to be started
pub struct Ready;

/// Indicates that a DMA transfer has been started
pub struct Started;

#[cfg(feature = "device-selected")]
mod device {
    use super::{Instance, Reg, SampleCell};
    use crate::pac::{DMA1, DMA2};
    use crate::rcc::Peripheral;
    use crate::registers::Registers;

    macro_rules! impl_instance {
        ($($name:ident: $peripheral:ident,)+) => {
            $(
                impl Registers for $name {
                    type Reg = Reg;

                    fn read(&self, reg: Reg) -> u32 {
                        match reg {
                            Reg::Lisr => self.lisr.read().bits(),
                            Reg::Hisr => self.hisr.read().bits(),
                            // write-only
                            Reg::Lifcr | Reg::Hifcr => 0,
                            Reg::Cr(nr) => self.st[usize::from(nr)].cr.read().bits(),
                            Reg::Ndtr(nr) => self.st[usize::from(nr)].ndtr.read().bits(),
                            Reg::Par(nr) => self.st[usize::from(nr)].par.read().bits(),
                            Reg::M0ar(nr) => self.st[usize::from(nr)].m0ar.read().bits(),
                            Reg::M1ar(nr) => self.st[usize::from(nr)].m1ar.read().bits(),
                            Reg::Fcr(nr) => self.st[usize::from(nr)].fcr.read().bits(),
                        }
                    }

                    #[allow(unused_unsafe)]
                    fn write(&self, reg: Reg, bits: u32) {
                        match reg {
                            // read-only
                            Reg::Lisr | Reg::Hisr => {}
                            Reg::Lifcr => self.lifcr.write(|w| unsafe { w.bits(bits) }),
                            Reg::Hifcr => self.hifcr.write(|w| unsafe { w.bits(bits) }),
                            Reg::Cr(nr) => self.st[usize::from(nr)]
                                .cr
                                .write(|w| unsafe { w.bits(bits) }),
                            Reg::Ndtr(nr) => self.st[usize::from(nr)]
                                .ndtr
                                .write(|w| unsafe { w.bits(bits) }),
                            Reg::Par(nr) => self.st[usize::from(nr)]
                                .par
                                .write(|w| unsafe { w.bits(bits) }),
                            Reg::M0ar(nr) => self.st[usize::from(nr)]
                                .m0ar
                                .write(|w| unsafe { w.bits(bits) }),
                            Reg::M1ar(nr) => self.st[usize::from(nr)]
                                .m1ar
                                .write(|w| unsafe { w.bits(bits) }),
                            Reg::Fcr(nr) => self.st[usize::from(nr)]
                                .fcr
                                .write(|w| unsafe { w.bits(bits) }),
                        }
                    }
                }

                impl Instance for $name {
                    fn peripheral(&self) -> Peripheral {
                        Peripheral::$peripheral
                    }

                    fn bind_memory(&self, stream: u8, cell: &'static SampleCell) {
                        self.write(Reg::M0ar(stream), cell.address());
                    }
                }
            )+
        }
    }

    impl_instance!(
        DMA1: Dma1,
        DMA2: Dma2,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rcc::Rcc;
    use crate::registers::field;
    use crate::sim::{Sim, ADC1_DR};

    fn adc_config() -> TransferConfig {
        TransferConfig::default()
            .channel(Channel::Channel0)
            .direction(Direction::PeripheralToMemory)
            .circular(true)
            .priority(Priority::High)
            .data_size(DataSize::HalfWord)
            .count(1)
    }

    #[test]
    fn enable_requires_the_clock() {
        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        let dma = DMA::new(sim.dma2());
        assert_eq!(dma.handle.enable(&rcc).err(), Some(Error::ClockDisabled));

        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        assert!(dma.handle.enable(&rcc).is_ok());
    }

    #[test]
    fn new_programs_the_stream() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc).unwrap();

        let _transfer =
            Transfer::new(&handle, dma.streams.stream0, ADC1_DR, &CELL, adc_config()).unwrap();

        let cr = sim.dma2().read(Reg::Cr(0));
        assert_eq!(cr & CR_EN, 0);
        assert_ne!(cr & CR_CIRC, 0);
        assert_eq!(cr & (CR_MINC | CR_PINC), 0);
        assert_eq!(field(cr, CR_DIR.0, CR_DIR.1), 0b00);
        assert_eq!(field(cr, CR_PL.0, CR_PL.1), 0b10);
        assert_eq!(field(cr, CR_MSIZE.0, CR_MSIZE.1), 0b01);
        assert_eq!(field(cr, CR_PSIZE.0, CR_PSIZE.1), 0b01);
        assert_eq!(field(cr, CR_CHSEL.0, CR_CHSEL.1), 0);
        assert_eq!(sim.dma2().read(Reg::Ndtr(0)), 1);
        assert_eq!(sim.dma2().read(Reg::Par(0)), ADC1_DR);
        assert_eq!(sim.dma2().read(Reg::Fcr(0)) & FCR_DMDIS, 0);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let handle = DMA::new(sim.dma2()).handle.enable(&rcc).unwrap();
        let stream = || Stream4(PhantomData);

        let cases = [
            (adc_config().count(0), Error::InvalidLength),
            (adc_config().data_size(DataSize::Word), Error::WidthMismatch),
            (
                adc_config().memory_increment(true).count(4),
                Error::BufferOverflow,
            ),
            (
                adc_config().burst(Burst::Incr4, Burst::Single),
                Error::BurstWithoutFifo,
            ),
            (
                adc_config().direction(Direction::MemoryToMemory),
                Error::CircularMemoryToMemory,
            ),
        ];

        for (config, error) in cases {
            assert_eq!(
                Transfer::new(&handle, stream(), ADC1_DR, &CELL, config).err(),
                Some(error)
            );
        }

        // FIFO mode allows bursts and packing
        let config = adc_config()
            .fifo(Some(FifoThreshold::Half))
            .burst(Burst::Incr4, Burst::Single);
        assert!(Transfer::new(&handle, stream(), ADC1_DR, &CELL, config).is_ok());
        let fcr = sim.dma2().read(Reg::Fcr(4));
        assert_ne!(fcr & FCR_DMDIS, 0);
        assert_eq!(field(fcr, FCR_FTH.0, FCR_FTH.1), 0b01);
    }

    #[test]
    fn listen_sets_interrupt_enables() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc).unwrap();
        let mut transfer =
            Transfer::new(&handle, dma.streams.stream0, ADC1_DR, &CELL, adc_config()).unwrap();

        transfer.listen(&handle, Event::TransferComplete);
        transfer.listen(&handle, Event::TransferError);
        assert_eq!(
            sim.dma2().read(Reg::Cr(0)) & (CR_TCIE | CR_TEIE),
            CR_TCIE | CR_TEIE
        );

        transfer.unlisten(&handle, Event::TransferComplete);
        assert_eq!(sim.dma2().read(Reg::Cr(0)) & CR_TCIE, 0);
    }

    #[test]
    fn completion_flag_is_sticky_until_cleared() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc).unwrap();
        let mut transfer = Transfer::new(
            &handle,
            dma.streams.stream0,
            ADC1_DR,
            &CELL,
            adc_config(),
        )
        .unwrap()
        .start(&handle);

        assert!(transfer.is_active(&handle));
        assert!(!transfer.is_complete(&handle));

        sim.dma_request(0, 1234);
        assert!(transfer.is_complete(&handle));
        assert!(transfer.is_complete(&handle));
        assert_eq!(transfer.latest(), 1234);

        transfer.clear_complete(&handle);
        assert!(!transfer.is_complete(&handle));
        assert!(!transfer.is_complete(&handle));

        // Circular mode reloads the counter and keeps the stream enabled
        assert_eq!(transfer.remaining(&handle), 1);
        assert!(transfer.is_active(&handle));
    }

    #[test]
    fn last_value_wins() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc).unwrap();
        let mut transfer = Transfer::new(
            &handle,
            dma.streams.stream0,
            ADC1_DR,
            &CELL,
            adc_config(),
        )
        .unwrap()
        .start(&handle);

        sim.dma_request(0, 100);
        sim.dma_request(0, 200);

        assert_eq!(transfer.try_take(&handle), Some(200));
        assert_eq!(transfer.try_take(&handle), None);
    }

    #[test]
    fn normal_mode_disables_the_stream() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc).unwrap();
        let transfer = Transfer::new(
            &handle,
            dma.streams.stream4,
            ADC1_DR,
            &CELL,
            adc_config().circular(false),
        )
        .unwrap()
        .start(&handle);

        sim.dma_request(4, 7);
        assert!(transfer.is_complete(&handle));
        assert!(!transfer.is_active(&handle));
        assert_eq!(transfer.remaining(&handle), 0);
    }

    #[test]
    fn errors_are_reported_and_cleared_on_stop() {
        static CELL: SampleCell = SampleCell::new();

        let sim = Sim::new();
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Dma2);
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc).unwrap();
        let transfer = Transfer::new(&handle, dma.streams.stream0, ADC1_DR, &CELL, adc_config())
            .unwrap()
            .start(&handle);

        assert_eq!(transfer.check(&handle), Ok(()));
        sim.raise_transfer_error(0);
        assert_eq!(transfer.check(&handle), Err(Error::Transfer));
        assert!(!transfer.is_active(&handle));

        let stream = transfer.stop(&handle);
        assert_eq!(Stream0::<()>::number(), 0);
        assert!(Stream0::<()>::flags(&sim.dma2()).is_empty());

        // The stream token can be reused
        assert!(Transfer::new(&handle, stream, ADC1_DR, &CELL, adc_config()).is_ok());
    }

    #[test]
    fn flags_of_high_streams_live_in_hisr() {
        let sim = Sim::new();
        sim.raise_transfer_error(7);
        assert_eq!(
            sim.dma2().read(Reg::Hisr),
            Flags::TRANSFER_ERROR.bits() << 22
        );
        assert_eq!(Stream7::<()>::flags(&sim.dma2()), Flags::TRANSFER_ERROR);
        Stream7::<()>::clear_flags(&sim.dma2(), Flags::all());
        assert_eq!(sim.dma2().read(Reg::Hisr), 0);
    }
}
