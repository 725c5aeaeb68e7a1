//! Raptor guide camera control over its serial register protocol.
//!
//! [`RaptorCamera`] wraps a [`RegisterProtocol`] with typed accessors for
//! each physical quantity (frame rate, exposure, gain, cooler setpoint and
//! sensor temperature) and the fixed startup sequence that brings the
//! camera into a known state.
//!
//! # Example
//!
//! ```
//! use hardware::raptor::{sim::SimulatedRaptor, RaptorCamera};
//!
//! let mut camera = RaptorCamera::new(SimulatedRaptor::new());
//! camera.set_frame_rate(50.0)?;
//! assert!((camera.frame_rate()? - 50.0).abs() < 1e-6);
//! # Ok::<(), hardware::raptor::ProtocolError>(())
//! ```

pub mod checksum;
pub mod protocol;
pub mod registers;
pub mod sim;
pub mod transport;

use tracing::{debug, info, warn};

pub use protocol::{ProtocolError, ProtocolResult, RegisterProtocol};
pub use registers::{GainMode, ManufacturingData};
pub use transport::SerialLink;

use registers::{
    digital_gain_to_raw, exposure_to_ticks, frame_rate_to_ticks, raw_to_digital_gain,
    ticks_to_exposure, ticks_to_frame_rate, AUTO_LEVEL_OFF, DIGITAL_GAIN, EXPOSURE, FRAME_RATE,
    GAIN_MODE, MANUFACTURING_LEN, MANUFACTURING_READ, MANUFACTURING_SELECT, NUC_OFF,
    SENSOR_TEMPERATURE, TEC_ENABLE, TEC_SETPOINT,
};

/// Sensor geometry in pixels.
pub const SENSOR_WIDTH: usize = 640;
pub const SENSOR_HEIGHT: usize = 512;

const STATUS_REQUEST: [u8; 3] = [0x49, 0x50, 0x19];
const SET_STATUS: [u8; 4] = [0x4f, 0x53, 0x50, 0x4c];
const STATUS_OK: [u8; 2] = [0x50, 0x4c];

/// Settings applied by [`RaptorCamera::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub gain_mode: GainMode,
    pub tec_setpoint: f64,
    pub digital_gain: f64,
    pub exposure_ms: f64,
    pub frame_rate: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            gain_mode: GainMode::High,
            tec_setpoint: -40.0,
            digital_gain: 1.0,
            exposure_ms: 10.0,
            frame_rate: 50.0,
        }
    }
}

/// High-level Raptor camera driver.
pub struct RaptorCamera<L: SerialLink> {
    protocol: RegisterProtocol<L>,
    manufacturing: Option<ManufacturingData>,
}

impl<L: SerialLink> RaptorCamera<L> {
    pub fn new(link: L) -> Self {
        Self {
            protocol: RegisterProtocol::new(link),
            manufacturing: None,
        }
    }

    pub fn protocol_mut(&mut self) -> &mut RegisterProtocol<L> {
        &mut self.protocol
    }

    /// Confirm the controller is alive and in its normal state.
    pub fn check_status(&mut self) -> ProtocolResult<()> {
        self.protocol.exchange(&STATUS_REQUEST, None)?;
        self.protocol.expect(&SET_STATUS, &STATUS_OK)
    }

    pub fn nuc_off(&mut self) -> ProtocolResult<()> {
        self.protocol.write_page(NUC_OFF.0, NUC_OFF.1)
    }

    pub fn auto_level_off(&mut self) -> ProtocolResult<()> {
        self.protocol.write_page(AUTO_LEVEL_OFF.0, AUTO_LEVEL_OFF.1)
    }

    pub fn tec_enable(&mut self) -> ProtocolResult<()> {
        self.protocol.write_page(TEC_ENABLE.0, TEC_ENABLE.1)
    }

    pub fn set_gain_mode(&mut self, mode: GainMode) -> ProtocolResult<()> {
        self.protocol
            .write_register(&GAIN_MODE, u32::from(mode.register_value()))
    }

    pub fn gain_mode(&mut self) -> ProtocolResult<GainMode> {
        let value = self.protocol.read_byte(GAIN_MODE.addresses[0])?;
        GainMode::from_register_value(value)
    }

    pub fn set_digital_gain(&mut self, gain: f64) -> ProtocolResult<()> {
        let raw = digital_gain_to_raw(gain)?;
        self.protocol.write_register(&DIGITAL_GAIN, raw)
    }

    pub fn digital_gain(&mut self) -> ProtocolResult<f64> {
        Ok(raw_to_digital_gain(
            self.protocol.read_register_value(&DIGITAL_GAIN)?,
        ))
    }

    /// Set the frame rate in Hz.
    pub fn set_frame_rate(&mut self, hz: f64) -> ProtocolResult<()> {
        let ticks = frame_rate_to_ticks(hz)?;
        debug!("frame rate {hz} Hz -> {ticks} ticks");
        self.protocol.write_register(&FRAME_RATE, ticks)
    }

    /// Frame rate in Hz as programmed in the camera.
    pub fn frame_rate(&mut self) -> ProtocolResult<f64> {
        Ok(ticks_to_frame_rate(
            self.protocol.read_register_value(&FRAME_RATE)?,
        ))
    }

    pub fn set_exposure_ms(&mut self, ms: f64) -> ProtocolResult<()> {
        let ticks = exposure_to_ticks(ms)?;
        debug!("exposure {ms} ms -> {ticks} ticks");
        self.protocol.write_register(&EXPOSURE, ticks)
    }

    pub fn exposure_ms(&mut self) -> ProtocolResult<f64> {
        Ok(ticks_to_exposure(
            self.protocol.read_register_value(&EXPOSURE)?,
        ))
    }

    /// Factory temperature calibration, read once and cached.
    pub fn manufacturing_data(&mut self) -> ProtocolResult<ManufacturingData> {
        if let Some(data) = self.manufacturing {
            return Ok(data);
        }
        self.protocol.exchange(&MANUFACTURING_SELECT, None)?;
        let response = self
            .protocol
            .transact(&MANUFACTURING_READ, Some(MANUFACTURING_LEN))?;
        let data = ManufacturingData::parse(&protocol::decode_hex(&response)?)?;
        debug!("manufacturing calibration {data:?}");
        self.manufacturing = Some(data);
        Ok(data)
    }

    /// Set the cooler setpoint in degrees C.
    pub fn set_tec_setpoint(&mut self, celsius: f64) -> ProtocolResult<()> {
        let dac = self.manufacturing_data()?.dac;
        let counts = dac.to_raw(&TEC_SETPOINT, celsius)?;
        self.protocol.write_register(&TEC_SETPOINT, counts)
    }

    /// Cooler setpoint in degrees C.
    pub fn tec_setpoint(&mut self) -> ProtocolResult<f64> {
        let dac = self.manufacturing_data()?.dac;
        Ok(dac.to_physical(self.protocol.read_register_value(&TEC_SETPOINT)?))
    }

    /// Live sensor temperature in degrees C.
    pub fn sensor_temperature(&mut self) -> ProtocolResult<f64> {
        let adc = self.manufacturing_data()?.adc;
        Ok(adc.to_physical(
            self.protocol.read_register_value(&SENSOR_TEMPERATURE)?,
        ))
    }

    /// Bring the camera to a known state.
    ///
    /// Every step must succeed. Returns the settings as read back from the
    /// camera where a read-back exists.
    pub fn initialize(&mut self, settings: &CameraSettings) -> ProtocolResult<CameraSettings> {
        self.check_status()?;
        self.nuc_off()?;
        self.auto_level_off()?;
        self.tec_enable()?;
        self.check_status()?;

        self.set_gain_mode(settings.gain_mode)?;
        let gain_mode = self.gain_mode()?;
        if gain_mode != settings.gain_mode {
            return Err(ProtocolError::UnexpectedResponse {
                expected: settings.gain_mode.to_string(),
                received: gain_mode.to_string(),
            });
        }

        self.set_tec_setpoint(settings.tec_setpoint)?;

        self.set_digital_gain(settings.digital_gain)?;
        let digital_gain = self.digital_gain()?;
        if (digital_gain - settings.digital_gain).abs() > 0.5 / registers::DIGITAL_GAIN_SCALE {
            return Err(ProtocolError::UnexpectedResponse {
                expected: format!("{:.3}", settings.digital_gain),
                received: format!("{digital_gain:.3}"),
            });
        }

        self.set_exposure_ms(settings.exposure_ms)?;
        self.set_frame_rate(settings.frame_rate)?;

        let applied = CameraSettings {
            gain_mode,
            tec_setpoint: settings.tec_setpoint,
            digital_gain,
            exposure_ms: settings.exposure_ms,
            frame_rate: settings.frame_rate,
        };
        info!("camera initialized: {applied:?}");
        Ok(applied)
    }

    /// Status check whose failure is only logged.
    pub fn check_status_logged(&mut self) -> bool {
        match self.check_status() {
            Ok(()) => true,
            Err(e) => {
                warn!("camera status check failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use sim::SimulatedRaptor;

    #[test]
    fn test_initialize_applies_defaults() {
        let sim = SimulatedRaptor::new();
        let handle = sim.handle();
        let mut camera = RaptorCamera::new(sim);

        let applied = camera.initialize(&CameraSettings::default()).unwrap();

        assert_eq!(applied.gain_mode, GainMode::High);
        assert_eq!(handle.register(NUC_OFF.0), NUC_OFF.1);
        assert_eq!(handle.register(TEC_ENABLE.0), TEC_ENABLE.1);
        assert_eq!(handle.register(0xF2), 6);
        assert_abs_diff_eq!(camera.frame_rate().unwrap(), 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(camera.exposure_ms().unwrap(), 10.0, epsilon = 1e-9);
        assert_abs_diff_eq!(camera.tec_setpoint().unwrap(), -40.0, epsilon = 0.1);
        assert_abs_diff_eq!(camera.digital_gain().unwrap(), 1.0);
    }

    #[test]
    fn test_initialize_fails_on_bad_status() {
        let sim = SimulatedRaptor::new();
        sim.handle().set_bad_status(true);
        let mut camera = RaptorCamera::new(sim);

        assert!(matches!(
            camera.initialize(&CameraSettings::default()),
            Err(ProtocolError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn test_frame_rate_read_back_rounding() {
        let mut camera = RaptorCamera::new(SimulatedRaptor::new());
        camera.set_frame_rate(33.0).unwrap();
        // 40e6 / 33 truncates to 1212121 ticks
        assert_abs_diff_eq!(camera.frame_rate().unwrap(), 40.0e6 / 1_212_121.0);
        assert_abs_diff_eq!(camera.frame_rate().unwrap(), 33.0, epsilon = 1e-4);
    }

    #[test]
    fn test_sensor_temperature_follows_setpoint() {
        let mut camera = RaptorCamera::new(SimulatedRaptor::new());
        camera.set_tec_setpoint(-20.0).unwrap();
        assert_abs_diff_eq!(camera.sensor_temperature().unwrap(), -20.0, epsilon = 0.1);
    }

    #[test]
    fn test_manufacturing_data_is_cached() {
        let sim = SimulatedRaptor::new();
        let handle = sim.handle();
        let mut camera = RaptorCamera::new(sim);

        camera.manufacturing_data().unwrap();
        let frames = handle.frames_received();
        camera.manufacturing_data().unwrap();
        assert_eq!(handle.frames_received(), frames);
    }

    #[test]
    fn test_unresponsive_camera_reports_timeout() {
        let sim = SimulatedRaptor::new();
        sim.handle().set_unresponsive(true);
        let mut camera = RaptorCamera::new(sim);

        assert!(matches!(camera.frame_rate(), Err(ProtocolError::Timeout { .. })));
        assert!(!camera.check_status_logged());
    }
}
