//! Device state owned by the guide loop.

use std::fmt;

use hardware::raptor::CameraSettings;
use shared::config_storage::GuiderConfig;
use shared::setup_to_true::SetupToTrue;
use shared::{ImageSize, Window};

use crate::config::{FRAME_SIZE, GUIDE_SIZE};
use crate::session::SessionRegistry;

/// Phase of the guide loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideLoopState {
    Init,
    Idle,
    Streaming,
    Guiding,
    Shutdown,
}

impl fmt::Display for GuideLoopState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            GuideLoopState::Init => "INIT",
            GuideLoopState::Idle => "IDLE",
            GuideLoopState::Streaming => "STREAMING",
            GuideLoopState::Guiding => "GUIDING",
            GuideLoopState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

/// Metadata of the current observation, set by STARTEXP.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposureSession {
    pub filename: String,
    pub ra: Option<String>,
    pub dec: Option<String>,
    pub equinox: Option<f64>,
    pub objmag: Option<f64>,
}

/// Frame tagging armed by SAVE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveState {
    pub count: u32,
    pub sequence: u32,
    pub comment: String,
}

impl SaveState {
    pub fn arm(&mut self, count: u32, comment: String) {
        self.count = count;
        self.sequence = 0;
        self.comment = if count == 0 { String::new() } else { comment };
    }

    /// Sequence number for the next emitted frame, 0 when nothing is armed.
    ///
    /// Saved frames are numbered from 1. Once the armed count is reached the
    /// save is disarmed, but the returned number still belongs to that frame.
    pub fn next_frame(&mut self) -> u32 {
        if !self.is_armed() {
            return 0;
        }
        self.sequence += 1;
        let sequence = self.sequence;
        if sequence >= self.count {
            self.count = 0;
            self.sequence = 0;
            self.comment.clear();
        }
        sequence
    }

    pub fn is_armed(&self) -> bool {
        self.count > 0
    }
}

/// Result of the last guiding iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GuideSolution {
    /// Star offset from the null position, arcsec. `None` in simulated-star mode.
    pub offset_arcsec: Option<(f64, f64)>,
    /// Delta sent to the steering unit, mrad.
    pub delta_mrad: (f64, f64),
    /// Angles read back from the steering unit, mrad.
    pub status_mrad: Option<(f64, f64)>,
}

/// The single record of guiding configuration and last-known values.
///
/// Only the guide loop thread touches it. Background work receives copies.
#[derive(Debug)]
pub struct DeviceState {
    pub frame_rate: f64,
    pub exposure_ms: f64,
    pub tec_setpoint: f64,
    pub digital_gain: f64,

    pub frame_size: ImageSize,
    /// Window the grabber is currently reading.
    pub window: Window,
    guide_origin: (usize, usize),
    null: (f64, f64),
    pub setup_to_true: SetupToTrue,

    pub solution: Option<GuideSolution>,
    pub fwhm: Option<(f64, f64)>,

    pub video_on: bool,
    pub guide_on: bool,
    pub isu_on: bool,
    /// Set once the one-shot FWHM and fault check ran for this guiding run.
    pub first_frame_done: bool,

    pub exposure_active: bool,
    pub exposure: ExposureSession,
    pub save: SaveState,

    pub sessions: SessionRegistry,
}

impl DeviceState {
    pub fn new(config: &GuiderConfig, camera: &CameraSettings) -> Self {
        Self {
            frame_rate: camera.frame_rate,
            exposure_ms: camera.exposure_ms,
            tec_setpoint: camera.tec_setpoint,
            digital_gain: camera.digital_gain,
            frame_size: FRAME_SIZE,
            window: Window::full_frame(FRAME_SIZE),
            guide_origin: (config.guide_raster_x0, config.guide_raster_y0),
            null: (config.hole_null_x, config.hole_null_y),
            setup_to_true: config.setup_to_true.clone(),
            solution: None,
            fwhm: None,
            video_on: false,
            guide_on: false,
            isu_on: false,
            first_frame_done: false,
            exposure_active: false,
            exposure: ExposureSession::default(),
            save: SaveState::default(),
            sessions: SessionRegistry::default(),
        }
    }

    pub fn guide_origin(&self) -> (usize, usize) {
        self.guide_origin
    }

    pub fn null_position(&self) -> (f64, f64) {
        self.null
    }

    pub fn guide_window(&self) -> Window {
        Window::new(self.guide_origin.0, self.guide_origin.1, GUIDE_SIZE)
    }

    /// True if a guide window at `(x0, y0)` lies on the sensor.
    pub fn guide_origin_in_range(&self, x0: i64, y0: i64) -> bool {
        match self.frame_size.max_origin_for(GUIDE_SIZE) {
            Some((max_x, max_y)) => {
                (0..=max_x as i64).contains(&x0) && (0..=max_y as i64).contains(&y0)
            }
            None => false,
        }
    }

    pub fn null_in_range(&self, x: f64, y: f64) -> bool {
        self.frame_size.contains_point(x, y)
    }

    /// Commit a guide origin already checked with [`guide_origin_in_range`].
    ///
    /// [`guide_origin_in_range`]: Self::guide_origin_in_range
    pub fn set_guide_origin(&mut self, x0: usize, y0: usize) {
        self.guide_origin = (x0, y0);
        if self.guide_on {
            self.window = self.guide_window();
        }
    }

    /// Commit a null position already checked with [`null_in_range`].
    ///
    /// [`null_in_range`]: Self::null_in_range
    pub fn set_null_position(&mut self, x: f64, y: f64) {
        self.null = (x, y);
    }

    pub fn enter_guide_mode(&mut self) {
        self.window = self.guide_window();
        self.guide_on = true;
    }

    pub fn leave_guide_mode(&mut self) {
        self.window = Window::full_frame(self.frame_size);
        self.guide_on = false;
        self.first_frame_done = false;
        self.solution = None;
    }

    /// Loop phase implied by the streaming and guiding flags.
    pub fn loop_state(&self) -> GuideLoopState {
        match (self.video_on, self.guide_on) {
            (false, _) => GuideLoopState::Idle,
            (true, false) => GuideLoopState::Streaming,
            (true, true) => GuideLoopState::Guiding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DeviceState {
        DeviceState::new(&GuiderConfig::default(), &CameraSettings::default())
    }

    #[test]
    fn test_defaults_from_config() {
        let s = state();
        assert_eq!(s.guide_origin(), (304, 240));
        assert_eq!(s.null_position(), (320.0, 256.0));
        assert_eq!(s.window, Window::full_frame(FRAME_SIZE));
        assert_eq!(s.frame_rate, 50.0);
        assert_eq!(s.loop_state(), GuideLoopState::Idle);
    }

    #[test]
    fn test_guide_origin_range() {
        let s = state();
        assert!(s.guide_origin_in_range(0, 0));
        assert!(s.guide_origin_in_range(608, 480));
        assert!(!s.guide_origin_in_range(609, 0));
        assert!(!s.guide_origin_in_range(0, 481));
        assert!(!s.guide_origin_in_range(-1, 10));
    }

    #[test]
    fn test_null_range_is_inclusive() {
        let s = state();
        assert!(s.null_in_range(0.0, 0.0));
        assert!(s.null_in_range(640.0, 512.0));
        assert!(!s.null_in_range(-1.0, 10.0));
        assert!(!s.null_in_range(10.0, 512.5));
    }

    #[test]
    fn test_guide_mode_round_trip() {
        let mut s = state();
        s.video_on = true;
        s.enter_guide_mode();
        assert_eq!(s.window.size, GUIDE_SIZE);
        assert_eq!(s.loop_state(), GuideLoopState::Guiding);

        s.first_frame_done = true;
        s.leave_guide_mode();
        assert_eq!(s.window, Window::full_frame(FRAME_SIZE));
        assert!(!s.first_frame_done);
        assert_eq!(s.loop_state(), GuideLoopState::Streaming);
    }

    #[test]
    fn test_origin_change_moves_active_window() {
        let mut s = state();
        s.set_guide_origin(10, 20);
        assert_eq!(s.window, Window::full_frame(FRAME_SIZE));

        s.enter_guide_mode();
        s.set_guide_origin(30, 40);
        assert_eq!(s.window, Window::new(30, 40, GUIDE_SIZE));
    }

    #[test]
    fn test_save_sequence_rules() {
        let mut save = SaveState::default();
        save.arm(2, "flat".to_string());
        assert!(save.is_armed());
        assert_eq!(save.next_frame(), 1);
        assert_eq!(save.comment, "flat");
        assert_eq!(save.next_frame(), 2);
        assert!(!save.is_armed());
        assert!(save.comment.is_empty());
        assert_eq!(save.sequence, 0);
        assert_eq!(save.next_frame(), 0);
    }

    #[test]
    fn test_save_zero_clears_comment() {
        let mut save = SaveState::default();
        save.arm(5, "x".to_string());
        save.next_frame();
        save.arm(0, "ignored".to_string());
        assert_eq!(save, SaveState::default());
    }
}
