//! Internal temperature sensor transfer function
//!
//! The sensor output is linear around its 25 °C point:
//!
//! ```text
//! V     = raw / 2^bits * VREF
//! T(°C) = (V - V25) / Avg_Slope + 25
//! ```
//!
//! The sensed voltage is kept in single precision while the rest of the
//! computation runs in double precision, which reproduces the results of the
//! vendor firmware bit for bit.

use crate::adc::Resolution;

/// Calibration data of a temperature sensor
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// ADC reference voltage, in volts
    pub vref: f64,
    /// Sensor output at 25 °C, in volts
    pub v25: f64,
    /// Sensor slope, in volts per °C
    pub avg_slope: f64,
}

/// Datasheet typical values of the APM32F407 sensor
pub const APM32F407_SENSOR: Calibration = Calibration {
    vref: 3.3,
    v25: 0.76,
    avg_slope: 0.0025,
};

impl Default for Calibration {
    fn default() -> Self {
        APM32F407_SENSOR
    }
}

impl Calibration {
    /// Voltage at the converter input for sample `raw`
    ///
    /// The full scale is `2^bits` steps, not `2^bits - 1`.
    pub fn voltage(&self, raw: u16, resolution: Resolution) -> f32 {
        let fraction = f32::from(raw) / resolution.steps() as f32;
        (f64::from(fraction) * self.vref) as f32
    }

    /// Temperature in °C for a sensed `voltage`
    pub fn celsius_from_voltage(&self, voltage: f32) -> f32 {
        ((f64::from(voltage) - self.v25) / self.avg_slope + 25.0) as f32
    }

    /// Temperature in °C for sample `raw`
    pub fn celsius(&self, raw: u16, resolution: Resolution) -> f32 {
        self.celsius_from_voltage(self.voltage(raw, resolution))
    }

    /// Temperature change per converter step
    pub fn celsius_per_step(&self, resolution: Resolution) -> f32 {
        (self.vref / f64::from(resolution.steps()) / self.avg_slope) as f32
    }
}

/// Temperature in °C of a 12-bit sample of the APM32F407 sensor
pub fn engineering_value(raw: u16) -> f32 {
    APM32F407_SENSOR.celsius(raw, Resolution::Twelve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_sensor_offset() {
        assert_eq!(engineering_value(0), -279.0);
    }

    #[test]
    fn full_scale() {
        // 4095 / 4096 * 3.3 = 3.2991943359375 V
        let expected = ((4095.0 / 4096.0 * 3.3) - 0.76) / 0.0025 + 25.0;
        assert!((f64::from(engineering_value(4095)) - expected).abs() < 1e-3);
        assert!((engineering_value(4095) - 1040.6777).abs() < 1e-3);
    }

    #[test]
    fn strictly_increasing() {
        let mut previous = engineering_value(0);
        for raw in 1..4096 {
            let value = engineering_value(raw);
            assert!(value > previous, "not increasing at {}", raw);
            previous = value;
        }
    }

    #[test]
    fn nominal_point_reads_25_degrees() {
        let raw = (0.76 / 3.3 * 4096.0_f64).round() as u16;
        assert_eq!(raw, 943);

        let step = APM32F407_SENSOR.celsius_per_step(Resolution::Twelve);
        assert!((engineering_value(raw) - 25.0).abs() <= step);
        assert!((APM32F407_SENSOR.celsius_from_voltage(0.76) - 25.0).abs() < 1e-4);
    }

    #[test]
    fn resolution_sets_the_full_scale() {
        let cal = APM32F407_SENSOR;
        assert_eq!(cal.voltage(2048, Resolution::Twelve), 1.65);
        assert_eq!(cal.voltage(32, Resolution::Six), 1.65);
        assert_eq!(
            cal.celsius(943 >> 4, Resolution::Eight),
            cal.celsius(58 << 4, Resolution::Twelve)
        );
    }

    #[test]
    fn other_sensors_supply_their_own_constants() {
        let cal = Calibration {
            vref: 3.0,
            v25: 1.43,
            avg_slope: -0.0043,
        };
        // Negative slope: higher voltage means colder
        assert!(cal.celsius(2000, Resolution::Twelve) < cal.celsius(1000, Resolution::Twelve));
        assert!((cal.celsius_from_voltage(1.43) - 25.0).abs() < 1e-4);
    }
}
