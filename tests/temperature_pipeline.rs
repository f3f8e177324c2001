use apm32f4xx_hal::{
    acquisition::{self, TemperatureMonitor},
    adc::{self, Adc, AdcCommon, Align, Channel, Resolution, SampleTime},
    dma::{self, DataSize, Direction, Priority, SampleCell, Transfer, TransferConfig, DMA},
    prelude::*,
    rcc::{Clocks, Peripheral, Rcc},
    serial::{self, Serial},
    sim::Sim,
    temperature::{engineering_value, APM32F407_SENSOR},
};

fn sensor_transfer() -> TransferConfig {
    TransferConfig::default()
        .channel(dma::Channel::Channel0)
        .direction(Direction::PeripheralToMemory)
        .circular(true)
        .priority(Priority::High)
        .data_size(DataSize::HalfWord)
        .count(1)
}

#[test]
fn sensor_sample_reaches_memory_and_converts() {
    static CELL: SampleCell = SampleCell::new();

    let sim = Sim::new();
    let mut rcc = Rcc::new(sim.rcc());
    rcc.enable(Peripheral::Adc1);
    rcc.enable(Peripheral::Dma2);
    let clocks = Clocks::hsi();

    let mut common = AdcCommon::new(sim.adc_common());
    let mut adc = Adc::new(sim.adc1(), &rcc, &clocks).unwrap().configure(
        adc::Config::default()
            .resolution(Resolution::Twelve)
            .align(Align::Right)
            .continuous(true),
    );
    adc.enable_temperature_sensor(&mut common);
    adc.bind_channel(Channel::TEMPERATURE, 1, SampleTime::T_480)
        .unwrap();
    adc.enable_dma_request();

    let dma = DMA::new(sim.dma2());
    let handle = dma.handle.enable(&rcc).unwrap();
    let mut transfer = Transfer::new(
        &handle,
        dma.streams.stream0,
        adc.data_address(),
        &CELL,
        sensor_transfer(),
    )
    .unwrap()
    .start(&handle);
    let _adc = adc.start(&common).unwrap();

    assert!(!transfer.is_complete(&handle));

    assert!(sim.complete_conversion(943));
    assert!(transfer.is_complete(&handle));
    // Sticky: polling again without a new cycle gives the same answer
    assert!(transfer.is_complete(&handle));
    assert_eq!(transfer.latest(), 943);

    let celsius = engineering_value(transfer.latest());
    let expected = ((943.0 / 4096.0 * 3.3) - 0.76) / 0.0025 + 25.0;
    assert!((f64::from(celsius) - expected).abs() < 1e-4);

    transfer.clear_complete(&handle);
    assert!(!transfer.is_complete(&handle));
    assert!(!transfer.is_complete(&handle));

    assert!(sim.complete_conversion(950));
    assert!(transfer.is_complete(&handle));
    assert_eq!(transfer.try_take(&handle), Some(950));
    assert!(!transfer.is_complete(&handle));
}

#[test]
fn second_cycle_overwrites_the_first() {
    static CELL: SampleCell = SampleCell::new();

    let sim = Sim::new();
    let mut rcc = Rcc::new(sim.rcc());
    rcc.enable(Peripheral::Adc1);
    rcc.enable(Peripheral::Dma2);

    let mut common = AdcCommon::new(sim.adc_common());
    let mut adc = Adc::new(sim.adc1(), &rcc, &Clocks::hsi())
        .unwrap()
        .configure(adc::Config::default().continuous(true));
    adc.enable_temperature_sensor(&mut common);
    adc.bind_channel(Channel::TEMPERATURE, 1, SampleTime::T_480)
        .unwrap();
    adc.enable_dma_request();

    let dma = DMA::new(sim.dma2());
    let handle = dma.handle.enable(&rcc).unwrap();
    let mut transfer = Transfer::new(
        &handle,
        dma.streams.stream0,
        adc.data_address(),
        &CELL,
        sensor_transfer(),
    )
    .unwrap()
    .start(&handle);
    let _adc = adc.start(&common).unwrap();

    assert!(sim.complete_conversion(900));
    assert!(sim.complete_conversion(1000));

    assert_eq!(transfer.try_take(&handle), Some(1000));
    assert_eq!(transfer.try_take(&handle), None);
}

#[test]
fn monitor_prints_one_line_per_cycle() {
    static CELL: SampleCell = SampleCell::new();

    let sim = Sim::new();
    let mut rcc = Rcc::new(sim.rcc());
    rcc.enable(Peripheral::Adc1);
    rcc.enable(Peripheral::Dma2);
    rcc.enable(Peripheral::Usart1);
    let clocks = Clocks::hsi();

    let (tx, _rx) = Serial::new(
        sim.usart1(),
        &rcc,
        clocks,
        serial::Config::default().baudrate(115_200.Hz()),
    )
    .unwrap()
    .split();
    let dma = DMA::new(sim.dma2());

    let mut monitor = TemperatureMonitor::start(
        Adc::new(sim.adc1(), &rcc, &clocks).unwrap(),
        AdcCommon::new(sim.adc_common()),
        dma.handle.enable(&rcc).unwrap(),
        dma.streams.stream0,
        &CELL,
        tx,
        sim.delay(),
        acquisition::Config::default()
            .calibration(APM32F407_SENSOR)
            .inter_sample(100.millis()),
    )
    .unwrap();

    assert_eq!(monitor.poll(), Ok(None));

    assert!(sim.complete_conversion(943));
    assert!(sim.complete_conversion(1000));
    let reading = monitor.poll().unwrap().unwrap();
    assert_eq!(reading.raw, 1000);
    assert_eq!(monitor.poll(), Ok(None));

    assert!(sim.complete_conversion(943));
    assert_eq!(monitor.poll().unwrap().map(|r| r.raw), Some(943));

    let out = sim.transmitted();
    let text = core::str::from_utf8(&out).unwrap();
    let lines: Vec<&str> = text.split_terminator("\r\n").collect();
    assert_eq!(lines, ["Temperature:43.27°C", "Temperature:24.90°C"]);
    assert_eq!(sim.delayed_ms(), 200);

    let parts = monitor.stop();
    assert!(!sim.complete_conversion(943));
    drop(parts);
}
