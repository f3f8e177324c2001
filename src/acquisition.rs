//! Polled temperature acquisition
//!
//! [`TemperatureMonitor`] ties the converter, a circular single-item DMA
//! transfer and a text sink together. The converter runs continuously and
//! every result overwrites the same [`SampleCell`]; software only ever sees
//! the most recent sample.
//!
//! Bring-up order matters: the DMA stream is armed before the converter is
//! started, so the very first request already finds an enabled stream.

use core::{convert::Infallible, fmt};

use fugit::MillisDurationU32;

use crate::{
    adc::{self, Adc, AdcCommon, Align, Configured, Running, SampleTime, Unconfigured},
    dma::{self, DataSize, Direction, Handle, SampleCell, Started, Stream, Transfer},
    hal::blocking::delay::DelayMs,
    registers::Registers,
    state,
    temperature::Calibration,
};

/// Acquisition error
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("ADC: {0}")]
    Adc(#[from] adc::Error),
    #[error("DMA: {0}")]
    Dma(#[from] dma::Error),
    /// The text sink refused a reading
    #[error("failed to write reading")]
    Output,
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::Output
    }
}

/// Acquisition settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub resolution: adc::Resolution,
    pub sample_time: SampleTime,
    pub channel: adc::Channel,
    /// Request channel of the stream, see the DMA request mapping
    pub dma_channel: dma::Channel,
    pub priority: dma::Priority,
    /// Pause after every emitted reading
    pub inter_sample: MillisDurationU32,
    pub calibration: Calibration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolution: adc::Resolution::Twelve,
            // The sensor needs at least 10 us of sampling
            sample_time: SampleTime::T_480,
            channel: adc::Channel::TEMPERATURE,
            dma_channel: dma::Channel::Channel0,
            priority: dma::Priority::High,
            inter_sample: MillisDurationU32::millis(500),
            calibration: Calibration::default(),
        }
    }
}

impl Config {
    pub fn resolution(mut self, resolution: adc::Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn sample_time(mut self, sample_time: SampleTime) -> Self {
        self.sample_time = sample_time;
        self
    }

    pub fn channel(mut self, channel: adc::Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn dma_channel(mut self, channel: dma::Channel) -> Self {
        self.dma_channel = channel;
        self
    }

    pub fn priority(mut self, priority: dma::Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn inter_sample(mut self, delay: MillisDurationU32) -> Self {
        self.inter_sample = delay;
        self
    }

    pub fn calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    fn adc_config(&self) -> adc::Config {
        adc::Config::default()
            .resolution(self.resolution)
            .align(Align::Right)
            .scan(false)
            .continuous(true)
    }

    fn transfer_config(&self) -> dma::TransferConfig {
        dma::TransferConfig::default()
            .channel(self.dma_channel)
            .direction(Direction::PeripheralToMemory)
            .circular(true)
            .priority(self.priority)
            .data_size(DataSize::HalfWord)
            .peripheral_increment(false)
            .memory_increment(false)
            .count(1)
    }
}

/// One converted sample
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub raw: u16,
    pub celsius: f32,
}

/// Everything handed back by [`TemperatureMonitor::stop`]
pub struct Parts<A, C, S: Stream, W, T> {
    pub adc: Adc<A, Configured>,
    pub common: AdcCommon<C>,
    pub dma: Handle<S::Instance, state::Enabled>,
    pub stream: S,
    pub out: W,
    pub delay: T,
}

/// Continuous temperature acquisition through ADC and DMA
pub struct TemperatureMonitor<A, C, S: Stream, W, T> {
    adc: Adc<A, Running>,
    common: AdcCommon<C>,
    dma: Handle<S::Instance, state::Enabled>,
    transfer: Transfer<S, Started>,
    out: W,
    delay: T,
    config: Config,
    last: Option<Reading>,
}

impl<A, C, S, W, T> TemperatureMonitor<A, C, S, W, T>
where
    A: adc::Instance,
    C: Registers<Reg = adc::CommonReg>,
    S: Stream,
    S::Instance: dma::Instance,
    W: fmt::Write,
    T: DelayMs<u32>,
{
    /// Configures the converter and the stream and starts conversions
    ///
    /// `cell` receives every conversion result.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        adc: Adc<A, Unconfigured>,
        mut common: AdcCommon<C>,
        dma: Handle<S::Instance, state::Enabled>,
        stream: S,
        cell: &'static SampleCell,
        out: W,
        delay: T,
        config: Config,
    ) -> Result<Self, Error> {
        let mut adc = adc.configure(config.adc_config());
        if config.channel.is_internal() {
            adc.enable_temperature_sensor(&mut common);
        }
        adc.bind_channel(config.channel, 1, config.sample_time)?;
        adc.enable_dma_request();

        let transfer = Transfer::new(
            &dma,
            stream,
            adc.data_address(),
            cell,
            config.transfer_config(),
        )?
        .start(&dma);

        let adc = adc.start(&common)?;

        log::info!(
            "temperature acquisition started on channel {}, {} bit",
            config.channel.id(),
            config.resolution.bits()
        );

        Ok(TemperatureMonitor {
            adc,
            common,
            dma,
            transfer,
            out,
            delay,
            config,
            last: None,
        })
    }

    /// Handles the latest sample, if a new one arrived since the last call
    ///
    /// A new reading is converted, written to the sink as one line and
    /// followed by the inter-sample pause.
    pub fn poll(&mut self) -> Result<Option<Reading>, Error> {
        self.transfer.check(&self.dma)?;

        if self.adc.is_overrun() {
            log::warn!("ADC overrun, restarting conversions");
            self.adc.clear_overrun();
        }

        let raw = match self.transfer.try_take(&self.dma) {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let reading = Reading {
            raw,
            celsius: self.config.calibration.celsius(raw, self.config.resolution),
        };
        log::debug!("raw {} -> {} °C", reading.raw, reading.celsius);

        write!(self.out, "Temperature:{:.2}°C\r\n", reading.celsius)?;
        self.last = Some(reading);

        self.delay.delay_ms(self.config.inter_sample.ticks());

        Ok(Some(reading))
    }

    /// Polls forever, only returning on error
    pub fn run(&mut self) -> Result<Infallible, Error> {
        loop {
            self.poll()?;
        }
    }

    /// Most recent reading handed out by [`TemperatureMonitor::poll`]
    pub fn last_reading(&self) -> Option<Reading> {
        self.last
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stops conversions and the stream
    pub fn stop(self) -> Parts<A, C, S, W, T> {
        let adc = self.adc.stop();
        let stream = self.transfer.stop(&self.dma);

        log::info!("temperature acquisition stopped");

        Parts {
            adc,
            common: self.common,
            dma: self.dma,
            stream,
            out: self.out,
            delay: self.delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::DMA;
    use crate::rcc::{Clocks, Peripheral, Rcc};
    use crate::serial::{self, Serial, Tx};
    use crate::sim::{Sim, SimAdc, SimAdcCommon, SimDelay, SimDma, SimUsart};

    type Monitor<'a> = TemperatureMonitor<
        SimAdc<'a>,
        SimAdcCommon<'a>,
        dma::Stream0<SimDma<'a>>,
        Tx<SimUsart<'a>>,
        SimDelay<'a>,
    >;

    fn monitor<'a>(
        sim: &'a Sim,
        cell: &'static SampleCell,
        config: Config,
    ) -> Result<Monitor<'a>, Error> {
        let mut rcc = Rcc::new(sim.rcc());
        rcc.enable(Peripheral::Adc1);
        rcc.enable(Peripheral::Dma2);
        rcc.enable(Peripheral::Usart1);

        let clocks = Clocks::hsi();
        let adc = Adc::new(sim.adc1(), &rcc, &clocks)?;
        let dma = DMA::new(sim.dma2());
        let handle = dma.handle.enable(&rcc)?;
        let (tx, _rx) = Serial::new(sim.usart1(), &rcc, clocks, serial::Config::default())
            .map_err(|_| Error::Output)?
            .split();

        TemperatureMonitor::start(
            adc,
            AdcCommon::new(sim.adc_common()),
            handle,
            dma.streams.stream0,
            cell,
            tx,
            sim.delay(),
            config,
        )
    }

    #[test]
    fn start_runs_converter_and_stream() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let _monitor = monitor(&sim, &CELL, Config::default()).unwrap();

        assert!(sim.adc1_converting());
        assert!(sim.dma2().read(dma::Reg::Cr(0)) & dma::CR_EN != 0);
        assert!(AdcCommon::new(sim.adc_common()).temperature_sensor_enabled());
    }

    #[test]
    fn nothing_happens_without_a_conversion() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let mut monitor = monitor(&sim, &CELL, Config::default()).unwrap();

        assert_eq!(monitor.poll(), Ok(None));
        assert!(sim.transmitted().is_empty());
        assert_eq!(sim.delayed_ms(), 0);
    }

    #[test]
    fn reading_is_printed_and_throttled() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let config = Config::default().inter_sample(MillisDurationU32::millis(250));
        let mut monitor = monitor(&sim, &CELL, config).unwrap();

        assert!(sim.complete_conversion(943));
        let reading = monitor.poll().unwrap().unwrap();

        assert_eq!(reading.raw, 943);
        assert!((reading.celsius - 24.896_484).abs() < 1e-4);
        assert_eq!(monitor.last_reading(), Some(reading));
        assert_eq!(&sim.transmitted()[..], "Temperature:24.90°C\r\n".as_bytes());
        assert_eq!(sim.delayed_ms(), 250);

        // Consumed: the next poll waits for a new conversion
        assert_eq!(monitor.poll(), Ok(None));
    }

    #[test]
    fn transfer_errors_stop_polling() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let mut monitor = monitor(&sim, &CELL, Config::default()).unwrap();

        sim.raise_transfer_error(0);
        assert_eq!(monitor.poll(), Err(Error::Dma(dma::Error::Transfer)));
        assert_eq!(monitor.run().err(), Some(Error::Dma(dma::Error::Transfer)));
    }

    #[test]
    fn overrun_restarts_conversions() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let mut monitor = monitor(&sim, &CELL, Config::default()).unwrap();

        // Stream disabled behind the monitor's back: the request is lost
        sim.dma2().clear_bits(dma::Reg::Cr(0), dma::CR_EN);
        assert!(sim.complete_conversion(100));
        assert!(!sim.adc1_converting());

        sim.dma2().set_bits(dma::Reg::Cr(0), dma::CR_EN);
        assert_eq!(monitor.poll(), Ok(None));
        assert!(sim.adc1_converting());

        assert!(sim.complete_conversion(943));
        assert_eq!(monitor.poll().map(|r| r.map(|r| r.raw)), Ok(Some(943)));
    }

    #[test]
    fn stop_returns_everything_idle() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let monitor = monitor(&sim, &CELL, Config::default()).unwrap();

        let mut parts = monitor.stop();
        assert!(!sim.adc1_converting());
        assert_eq!(sim.dma2().read(dma::Reg::Cr(0)) & dma::CR_EN, 0);
        assert!(!sim.complete_conversion(1));

        // The stream can be armed again
        let transfer = Transfer::new(
            &parts.dma,
            parts.stream,
            parts.adc.data_address(),
            &CELL,
            Config::default().transfer_config(),
        );
        assert!(transfer.is_ok());

        // Restarting after the sensor was switched off is refused
        parts.common.disable_temperature_sensor();
        assert_eq!(
            parts.adc.start(&parts.common).err(),
            Some(adc::Error::SensorPathDisabled)
        );
    }

    #[test]
    fn vrefint_enables_the_sense_path() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let config = Config::default().channel(adc::Channel::VREFINT);
        let _monitor = monitor(&sim, &CELL, config).unwrap();

        assert!(AdcCommon::new(sim.adc_common()).temperature_sensor_enabled());
    }

    #[test]
    fn vbat_starts_without_the_sense_path() {
        static CELL: SampleCell = SampleCell::new();
        let sim = Sim::new();
        let config = Config::default().channel(adc::Channel::VBAT);
        // VBAT is not behind TSVREFE, so it starts without the sensor path
        assert!(monitor(&sim, &CELL, config).is_ok());
        assert!(!AdcCommon::new(sim.adc_common()).temperature_sensor_enabled());
    }
}
