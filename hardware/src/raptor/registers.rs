//! Raptor register map and physical unit conversions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::protocol::{ProtocolError, ProtocolResult};

/// A named value stored across one or more single-byte register pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    /// Page addresses, most significant byte first.
    pub addresses: &'static [u8],
}

impl Register {
    pub const fn new(name: &'static str, addresses: &'static [u8]) -> Self {
        Self { name, addresses }
    }

    pub fn width(&self) -> usize {
        self.addresses.len()
    }
}

pub const FRAME_RATE: Register = Register::new("frame rate", &[0xDD, 0xDE, 0xDF, 0xE0]);
pub const EXPOSURE: Register = Register::new("exposure", &[0xEE, 0xEF, 0xF0, 0xF1]);
pub const DIGITAL_GAIN: Register = Register::new("digital gain", &[0xC6, 0xC7]);
pub const TEC_SETPOINT: Register = Register::new("TEC setpoint", &[0xFB, 0xFA]);
pub const SENSOR_TEMPERATURE: Register = Register::new("sensor temperature", &[0x6E, 0x6F]);
pub const GAIN_MODE: Register = Register::new("gain mode", &[0xF2]);

/// Fixed single-page writes issued during camera setup.
pub const NUC_OFF: (u8, u8) = (0xF9, 0x01);
pub const AUTO_LEVEL_OFF: (u8, u8) = (0x23, 0x00);
pub const TEC_ENABLE: (u8, u8) = (0x00, 0x81);

/// Timing clock for frame period and exposure registers.
pub const CLOCK_HZ: f64 = 40.0e6;
const TICKS_PER_MS: f64 = CLOCK_HZ / 1000.0;

/// Digital gain fixed point scale (8 fractional bits).
pub const DIGITAL_GAIN_SCALE: f64 = 256.0;

fn to_ticks(register: &Register, value: f64, ticks: f64) -> ProtocolResult<u32> {
    if !ticks.is_finite() || ticks < 0.0 || ticks > f64::from(u32::MAX) {
        return Err(ProtocolError::ValueOutOfRange {
            register: register.name,
            value,
        });
    }
    Ok(ticks.floor() as u32)
}

/// Frame period in clock ticks for a rate in Hz.
pub fn frame_rate_to_ticks(hz: f64) -> ProtocolResult<u32> {
    if hz <= 0.0 {
        return Err(ProtocolError::ValueOutOfRange {
            register: FRAME_RATE.name,
            value: hz,
        });
    }
    to_ticks(&FRAME_RATE, hz, CLOCK_HZ / hz)
}

/// Rate in Hz for a frame period; a zero period reads as 0 Hz.
pub fn ticks_to_frame_rate(ticks: u32) -> f64 {
    if ticks == 0 {
        return 0.0;
    }
    CLOCK_HZ / f64::from(ticks)
}

pub fn exposure_to_ticks(ms: f64) -> ProtocolResult<u32> {
    to_ticks(&EXPOSURE, ms, ms * TICKS_PER_MS)
}

pub fn ticks_to_exposure(ticks: u32) -> f64 {
    f64::from(ticks) / TICKS_PER_MS
}

pub fn digital_gain_to_raw(gain: f64) -> ProtocolResult<u32> {
    let raw = (gain * DIGITAL_GAIN_SCALE).round();
    if !raw.is_finite() || !(0.0..=f64::from(u16::MAX)).contains(&raw) {
        return Err(ProtocolError::ValueOutOfRange {
            register: DIGITAL_GAIN.name,
            value: gain,
        });
    }
    Ok(raw as u32)
}

pub fn raw_to_digital_gain(raw: u32) -> f64 {
    f64::from(raw) / DIGITAL_GAIN_SCALE
}

/// Analog gain mode register values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum GainMode {
    Low,
    High,
}

impl GainMode {
    pub fn register_value(self) -> u8 {
        match self {
            GainMode::Low => 0,
            GainMode::High => 6,
        }
    }

    pub fn from_register_value(value: u8) -> ProtocolResult<Self> {
        match value {
            0 => Ok(GainMode::Low),
            6 => Ok(GainMode::High),
            other => Err(ProtocolError::MalformedResponse(format!(
                "unknown gain mode 0x{other:02x}"
            ))),
        }
    }
}

/// Factory counts at 0 and 40 degrees C for one converter.
///
/// `physical = (raw - at0) * 40 / (at40 - at0)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPoint {
    pub at0: u16,
    pub at40: u16,
}

impl TwoPoint {
    pub fn to_physical(&self, raw: u32) -> f64 {
        let span = f64::from(self.at40) - f64::from(self.at0);
        (f64::from(raw) - f64::from(self.at0)) * 40.0 / span
    }

    /// Inverse of [`to_physical`](Self::to_physical), rounded to whole counts.
    pub fn to_raw(&self, register: &Register, physical: f64) -> ProtocolResult<u32> {
        let span = f64::from(self.at40) - f64::from(self.at0);
        let counts = (physical * span / 40.0 + f64::from(self.at0)).round();
        if !counts.is_finite() || !(0.0..=f64::from(u16::MAX)).contains(&counts) {
            return Err(ProtocolError::ValueOutOfRange {
                register: register.name,
                value: physical,
            });
        }
        Ok(counts as u32)
    }
}

/// Request that selects the manufacturing data block.
pub const MANUFACTURING_SELECT: [u8; 10] = [0x53, 0xAE, 0x05, 0x01, 0x00, 0x00, 0x02, 0x00, 0x50, 0xAB];
/// Request that reads the selected block back.
pub const MANUFACTURING_READ: [u8; 5] = [0x53, 0xAF, 0x12, 0x50, 0xBE];
/// Bytes in the manufacturing block.
pub const MANUFACTURING_LEN: usize = 0x12;

const ADC0_OFFSET: usize = 10;
const ADC40_OFFSET: usize = 12;
const DAC0_OFFSET: usize = 14;
const DAC40_OFFSET: usize = 16;

/// Two-point temperature calibration from the manufacturing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturingData {
    /// Sensor temperature ADC
    pub adc: TwoPoint,
    /// TEC setpoint DAC
    pub dac: TwoPoint,
}

impl ManufacturingData {
    /// Parse the block; calibration words are little-endian.
    pub fn parse(block: &[u8]) -> ProtocolResult<Self> {
        if block.len() < MANUFACTURING_LEN {
            return Err(ProtocolError::MalformedResponse(format!(
                "manufacturing block has {} bytes, need {MANUFACTURING_LEN}",
                block.len()
            )));
        }
        let word = |offset: usize| u16::from_le_bytes([block[offset], block[offset + 1]]);
        let data = Self {
            adc: TwoPoint {
                at0: word(ADC0_OFFSET),
                at40: word(ADC40_OFFSET),
            },
            dac: TwoPoint {
                at0: word(DAC0_OFFSET),
                at40: word(DAC40_OFFSET),
            },
        };
        if data.adc.at0 == data.adc.at40 || data.dac.at0 == data.dac.at40 {
            return Err(ProtocolError::MalformedResponse(format!(
                "degenerate calibration {data:?}"
            )));
        }
        Ok(data)
    }

    /// Encode back into block layout. Bytes outside the calibration words are zero.
    pub fn to_block(&self) -> [u8; MANUFACTURING_LEN] {
        let mut block = [0u8; MANUFACTURING_LEN];
        for (offset, value) in [
            (ADC0_OFFSET, self.adc.at0),
            (ADC40_OFFSET, self.adc.at40),
            (DAC0_OFFSET, self.dac.at0),
            (DAC40_OFFSET, self.dac.at40),
        ] {
            block[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    #[test]
    fn test_frame_rate_ticks() {
        assert_eq!(frame_rate_to_ticks(50.0).unwrap(), 800_000);
        assert_eq!(frame_rate_to_ticks(120.0).unwrap(), 333_333);
        assert_relative_eq!(ticks_to_frame_rate(800_000), 50.0);
        assert_eq!(ticks_to_frame_rate(0), 0.0);
        assert!(frame_rate_to_ticks(0.0).is_err());
        assert!(frame_rate_to_ticks(-5.0).is_err());
    }

    #[test]
    fn test_exposure_ticks() {
        assert_eq!(exposure_to_ticks(10.0).unwrap(), 400_000);
        assert_relative_eq!(ticks_to_exposure(400_000), 10.0);
        assert_relative_eq!(ticks_to_exposure(1), 2.5e-5);
        assert!(exposure_to_ticks(1.0e6).is_err());
    }

    #[test]
    fn test_digital_gain() {
        assert_eq!(digital_gain_to_raw(1.0).unwrap(), 256);
        assert_relative_eq!(raw_to_digital_gain(384), 1.5);
        assert!(digital_gain_to_raw(-1.0).is_err());
        assert!(digital_gain_to_raw(300.0).is_err());
    }

    #[test]
    fn test_gain_mode() {
        assert_eq!(GainMode::High.register_value(), 6);
        assert_eq!(GainMode::from_register_value(0).unwrap(), GainMode::Low);
        assert!(GainMode::from_register_value(3).is_err());
        assert_eq!(GainMode::from_str("high").unwrap(), GainMode::High);
        assert_eq!(GainMode::Low.to_string(), "low");
    }

    #[test]
    fn test_two_point_round_trip_at_calibration_points() {
        let dac = TwoPoint { at0: 1000, at40: 3000 };
        assert_relative_eq!(dac.to_physical(1000), 0.0);
        assert_relative_eq!(dac.to_physical(3000), 40.0);
        // Extrapolates below zero
        assert_relative_eq!(dac.to_physical(200), -16.0);
        assert_eq!(dac.to_raw(&TEC_SETPOINT, -16.0).unwrap(), 200);
        assert_eq!(dac.to_raw(&TEC_SETPOINT, 20.0).unwrap(), 2000);
        assert!(dac.to_raw(&TEC_SETPOINT, -100.0).is_err());
    }

    #[test]
    fn test_manufacturing_block_layout() {
        let mut block = [0u8; MANUFACTURING_LEN];
        block[10..12].copy_from_slice(&0x0123u16.to_le_bytes());
        block[12..14].copy_from_slice(&0x0456u16.to_le_bytes());
        block[14..16].copy_from_slice(&0x0789u16.to_le_bytes());
        block[16..18].copy_from_slice(&0x0abcu16.to_le_bytes());

        let data = ManufacturingData::parse(&block).unwrap();
        assert_eq!(data.adc, TwoPoint { at0: 0x0123, at40: 0x0456 });
        assert_eq!(data.dac, TwoPoint { at0: 0x0789, at40: 0x0abc });
        assert_eq!(data.to_block(), block);

        assert!(ManufacturingData::parse(&block[..17]).is_err());
        assert!(ManufacturingData::parse(&[0u8; MANUFACTURING_LEN]).is_err());
    }
}
