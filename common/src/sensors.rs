use std::ops::RangeInclusive;

use log::warn;

use crate::{
    config::{Calibration, SensorConfig},
    types::{SensorSample, TemperatureUnit},
};

/// Returned by the temperature reader when the unit selector is not `'C'` or `'F'`.
///
/// Indistinguishable from a genuine -1.0 reading.
pub const UNRECOGNIZED_UNIT_SENTINEL: f32 = -1.0;

/// Lowest and highest temperatures (°C) the linear calibration is trusted for.
const PLAUSIBLE_MIN_C: f32 = -40.0;
const PLAUSIBLE_MAX_C: f32 = 125.0;

/// Digital input primitive. Implemented by the platform GPIO driver.
pub trait DigitalInput {
    fn is_high(&mut self) -> bool;
}

/// Analog input primitive. Implemented by the platform ADC driver.
pub trait AnalogInput {
    fn read_raw(&mut self) -> u16;
}

/// Reads the door contact. The circuit idles high behind a pull-up, so a low
/// level means the contact is closed and the reader reports `true`.
pub struct DoorReader<P> {
    pin: P,
}

impl<P: DigitalInput> DoorReader<P> {
    pub fn new(pin: P) -> Self {
        Self { pin }
    }

    pub fn read(&mut self) -> bool {
        !self.pin.is_high()
    }

    pub fn sample(&mut self) -> SensorSample {
        SensorSample::DoorState(self.read())
    }
}

/// Raw sample to volts conversion for an ADC with a fixed reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcScale {
    volts_per_count: f32,
}

impl AdcScale {
    pub fn new(reference_volts: f32, resolution_bits: u8) -> Self {
        let counts = 2_f32.powi(i32::from(resolution_bits));
        Self {
            volts_per_count: reference_volts / counts,
        }
    }

    pub fn volts(&self, raw: u16) -> f32 {
        raw as f32 * self.volts_per_count
    }

    fn raw_for_volts(&self, volts: f32) -> f32 {
        volts / self.volts_per_count
    }
}

impl Calibration {
    pub fn celsius(&self, volts: f32) -> f32 {
        self.reference_temp_c - (volts - self.reference_volts) / self.slope_volts_per_c
    }

    fn volts_at(&self, temp_c: f32) -> f32 {
        self.reference_volts - (temp_c - self.reference_temp_c) * self.slope_volts_per_c
    }

    /// Raw sample window for which the linear approximation holds
    /// (-40 °C ..= 125 °C). With the default calibration and a 12-bit, 3.3 V
    /// ADC this is roughly `666..=1020`; raw 876 is about 27 °C.
    ///
    /// Samples outside the window still convert, but the result is not a
    /// meaningful temperature (raw 0 yields about 437 °C).
    pub fn plausible_raw_range(&self, scale: &AdcScale) -> RangeInclusive<u16> {
        let low = scale.raw_for_volts(self.volts_at(PLAUSIBLE_MAX_C));
        let high = scale.raw_for_volts(self.volts_at(PLAUSIBLE_MIN_C));
        let clamp = |raw: f32| raw.clamp(0.0, u16::MAX as f32) as u16;
        clamp(low.floor())..=clamp(high.ceil())
    }
}

pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

/// Expresses a Celsius temperature in the unit named by `selector`.
/// Unknown selectors yield [`UNRECOGNIZED_UNIT_SENTINEL`].
pub fn convert_celsius(temp_c: f32, selector: char) -> f32 {
    match TemperatureUnit::from_selector(selector) {
        Some(TemperatureUnit::Celsius) => temp_c,
        Some(TemperatureUnit::Fahrenheit) => celsius_to_fahrenheit(temp_c),
        None => UNRECOGNIZED_UNIT_SENTINEL,
    }
}

pub struct TemperatureReader<A> {
    adc: A,
    scale: AdcScale,
    calibration: Calibration,
    selector: char,
    plausible: RangeInclusive<u16>,
    out_of_range: bool,
}

impl<A: AnalogInput> TemperatureReader<A> {
    pub fn new(adc: A, config: &SensorConfig) -> Self {
        let scale = AdcScale::new(config.adc_reference_volts, config.adc_resolution_bits);
        let plausible = config.calibration.plausible_raw_range(&scale);
        Self {
            adc,
            scale,
            calibration: config.calibration,
            selector: config.temperature_unit,
            plausible,
            out_of_range: false,
        }
    }

    pub fn unit(&self) -> Option<TemperatureUnit> {
        TemperatureUnit::from_selector(self.selector)
    }

    /// Converts one raw sample. Returns the sentinel for an unknown unit.
    pub fn read(&mut self) -> f32 {
        let raw = self.adc.read_raw();
        self.track_range(raw);

        let temp_c = self.calibration.celsius(self.scale.volts(raw));
        convert_celsius(temp_c, self.selector)
    }

    pub fn sample(&mut self) -> SensorSample {
        SensorSample::Temperature {
            value: self.read(),
            unit: self.unit(),
        }
    }

    fn track_range(&mut self, raw: u16) {
        let inside = self.plausible.contains(&raw);
        if !inside && !self.out_of_range {
            warn!(
                "raw temperature sample {raw} outside calibrated range {}..={}",
                self.plausible.start(),
                self.plausible.end()
            );
        }
        self.out_of_range = !inside;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPin(bool);

    impl DigitalInput for FixedPin {
        fn is_high(&mut self) -> bool {
            self.0
        }
    }

    struct FixedAdc(u16);

    impl AnalogInput for FixedAdc {
        fn read_raw(&mut self) -> u16 {
            self.0
        }
    }

    fn reader(raw: u16, unit: char) -> TemperatureReader<FixedAdc> {
        let config = SensorConfig {
            temperature_unit: unit,
            ..SensorConfig::default()
        };
        TemperatureReader::new(FixedAdc(raw), &config)
    }

    fn assert_close(actual: f32, expected: f32, tolerance: f32) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} ± {tolerance}, got {actual}"
        );
    }

    #[test]
    fn door_reader_inverts_pull_up_level() {
        assert!(DoorReader::new(FixedPin(false)).read());
        assert!(!DoorReader::new(FixedPin(true)).read());
        assert_eq!(
            DoorReader::new(FixedPin(false)).sample(),
            SensorSample::DoorState(true)
        );
    }

    #[test]
    fn raw_zero_lands_far_outside_realistic_range() {
        assert_eq!(AdcScale::new(3.3, 12).volts(0), 0.0);
        assert_close(reader(0, 'C').read(), 437.227, 0.01);
    }

    #[test]
    fn converts_mid_range_samples() {
        assert_close(reader(701, 'C').read(), 109.062, 0.01);
        assert_close(reader(876, 'C').read(), 27.138, 0.01);
    }

    #[test]
    fn fahrenheit_conversion() {
        assert_eq!(convert_celsius(20.0, 'F'), 68.0);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
        assert_close(reader(876, 'F').read(), 80.85, 0.02);
    }

    #[test]
    fn unknown_unit_yields_sentinel() {
        assert_eq!(convert_celsius(20.0, 'K'), -1.0);
        assert_eq!(convert_celsius(20.0, 'c'), UNRECOGNIZED_UNIT_SENTINEL);

        let mut reader = reader(876, 'X');
        assert_eq!(reader.read(), -1.0);
        assert_eq!(
            reader.sample(),
            SensorSample::Temperature {
                value: -1.0,
                unit: None
            }
        );
    }

    #[test]
    fn plausible_range_brackets_room_temperature() {
        let scale = AdcScale::new(3.3, 12);
        let range = Calibration::default().plausible_raw_range(&scale);
        assert_eq!(*range.start(), 666);
        assert_eq!(*range.end(), 1020);
        assert!(range.contains(&876));
        assert!(!range.contains(&0));
    }

    #[test]
    fn adc_scale_accepts_any_resolution() {
        assert_close(AdcScale::new(3.3, 12).volts(4096), 3.3, 1e-6);
        assert_close(AdcScale::new(3.3, 16).volts(65_535), 3.3, 1e-3);
        // Wider than any real converter; the scale just gets very fine.
        let wide = AdcScale::new(3.3, 40);
        assert!(wide.volts(u16::MAX) > 0.0);
        assert!(wide.volts(u16::MAX) < 1e-6);
    }
}
