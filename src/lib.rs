//! HAL for the APM32F4xx family of microcontrollers
//!
//! The APM32F405/407 are register compatible with the STM32F405/407, so the
//! device backends are built on the `stm32f4` peripheral access crate.
//!
//! Drivers access their peripheral through [`registers::Registers`]. Without a
//! device feature the crate still builds for the host. With the `sim` feature,
//! the `sim` module stands in for the hardware.

#![cfg_attr(not(test), no_std)]
#![allow(non_camel_case_types)]

pub(crate) use embedded_hal as hal;

#[cfg(feature = "apm32f405")]
pub use stm32f4::stm32f405 as pac;

#[cfg(feature = "apm32f407")]
pub use stm32f4::stm32f407 as pac;

// Enable use of interrupt macro
#[cfg(all(feature = "rt", feature = "device-selected"))]
pub use crate::pac::interrupt;

pub mod acquisition;

pub mod adc;

pub mod delay;

pub mod dma;

pub mod prelude;

pub mod rcc;

pub mod registers;

pub mod serial;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub mod temperature;

pub mod state {
    /// Indicates that a peripheral is enabled
    pub struct Enabled;

    /// Indicates that a peripheral is disabled
    pub struct Disabled;
}
