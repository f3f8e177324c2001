//! Prints the on-die temperature over USART1 (PA9/PA10, 115200 8N1).
//!
//! ADC1 converts channel 16 continuously and DMA2 stream 0 copies every
//! result into a single static cell.
//!
//! Note: This example is for the APM32F407

#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

extern crate panic_halt;

use apm32f4xx_hal::{
    acquisition::{self, TemperatureMonitor},
    adc::{Adc, AdcCommon},
    delay::SysDelay,
    dma::{SampleCell, DMA},
    pac,
    prelude::*,
    rcc::{Clocks, Peripheral},
    serial::{self, Serial},
};
use cortex_m_rt::entry;

static SAMPLE: SampleCell = SampleCell::new();

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    let mut rcc = dp.RCC.constrain();
    rcc.enable(Peripheral::GpioA);
    rcc.enable(Peripheral::Adc1);
    rcc.enable(Peripheral::Dma2);
    rcc.enable(Peripheral::Usart1);
    let clocks = Clocks::hsi();

    // PA9 = TX, PA10 = RX, both on AF7
    dp.GPIOA
        .moder
        .modify(|_, w| w.moder9().alternate().moder10().alternate());
    dp.GPIOA.afrh.modify(|_, w| w.afrh9().af7().afrh10().af7());

    let serial = Serial::new(
        dp.USART1,
        &rcc,
        clocks,
        serial::Config::default().baudrate(115_200.Hz()),
    )
    .unwrap();
    let (tx, _rx) = serial.split();

    let dma = DMA::new(dp.DMA2);
    let handle = dma.handle.enable(&rcc).unwrap();
    let adc = Adc::new(dp.ADC1, &rcc, &clocks).unwrap();

    let mut monitor = TemperatureMonitor::start(
        adc,
        AdcCommon::new(dp.ADC_COMMON),
        handle,
        dma.streams.stream0,
        &SAMPLE,
        tx,
        SysDelay::new(cp.SYST, &clocks),
        acquisition::Config::default(),
    )
    .unwrap();

    // Only returns on a stream error
    match monitor.run().unwrap() {}
}
