//! Word-level register access
//!
//! Every driver in this crate talks to its peripheral through [`Registers`],
//! addressing registers with a small per-peripheral `Reg` enum. The device
//! backends implement it on top of the PAC register blocks; the `sim` module
//! implements it on an in-memory register image so the drivers can run on a
//! host.

/// Read/write access to the registers of one peripheral instance
///
/// Like the PAC register proxies, writes go through a shared reference: the
/// registers are volatile cells and the driver owning the instance is the
/// only one touching them.
pub trait Registers {
    /// Register selector for this peripheral
    type Reg: Copy;

    /// Reads the full register word
    fn read(&self, reg: Self::Reg) -> u32;

    /// Writes the full register word
    ///
    /// Writes to read-only registers are ignored.
    fn write(&self, reg: Self::Reg, bits: u32);

    /// Read-modify-write of a register
    #[inline]
    fn modify<F>(&self, reg: Self::Reg, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let bits = self.read(reg);
        self.write(reg, f(bits));
    }

    /// Sets the bits in `mask`, leaving the others untouched
    #[inline]
    fn set_bits(&self, reg: Self::Reg, mask: u32) {
        self.modify(reg, |r| r | mask);
    }

    /// Clears the bits in `mask`, leaving the others untouched
    #[inline]
    fn clear_bits(&self, reg: Self::Reg, mask: u32) {
        self.modify(reg, |r| r & !mask);
    }
}

impl<R: Registers> Registers for &R {
    type Reg = R::Reg;

    #[inline]
    fn read(&self, reg: Self::Reg) -> u32 {
        R::read(self, reg)
    }

    #[inline]
    fn write(&self, reg: Self::Reg, bits: u32) {
        R::write(self, reg, bits)
    }
}

/// Replaces the `width`-bit field at `offset` in `bits` with `value`
#[inline]
pub(crate) const fn with_field(bits: u32, offset: u32, width: u32, value: u32) -> u32 {
    let mask = ((1 << width) - 1) << offset;
    (bits & !mask) | ((value << offset) & mask)
}

/// Extracts the `width`-bit field at `offset` from `bits`
#[inline]
pub(crate) const fn field(bits: u32, offset: u32, width: u32) -> u32 {
    (bits >> offset) & ((1 << width) - 1)
}
