//! Per-frame metadata and the sinks frames are handed to.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use shared::Window;

use crate::config::PIXEL_SCALE;
use crate::state::DeviceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExposureType {
    /// Frame belongs to an armed SAVE sequence.
    Guide,
    Acquire,
}

/// Everything recorded about one emitted frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub naxis1: usize,
    pub naxis2: usize,
    pub date: String,
    pub unix_time: f64,
    pub exposure_ms: f64,
    pub frame_rate: f64,
    pub tec_setpoint: f64,
    pub pixel_scale: f64,
    pub exposure_type: ExposureType,
    pub sequence: u32,
    pub comment: Option<String>,
    /// Read-out window bounds `[x0, y0, x1, y1]`.
    pub window: [usize; 4],
    pub guide_window: [usize; 4],
    pub null_x: f64,
    pub null_y: f64,
    pub guide_x_offset: Option<f64>,
    pub guide_y_offset: Option<f64>,
    pub isu_delta_x: Option<f64>,
    pub isu_delta_y: Option<f64>,
    pub isu_status_x: Option<f64>,
    pub isu_status_y: Option<f64>,
    pub fwhm_x: Option<f64>,
    pub fwhm_y: Option<f64>,
    pub filename: Option<String>,
    pub ra: Option<String>,
    pub dec: Option<String>,
    pub equinox: Option<f64>,
    pub objmag: Option<f64>,
}

fn bounds(window: Window) -> [usize; 4] {
    let (x0, y0, x1, y1) = window.bounds();
    [x0, y0, x1, y1]
}

impl FrameMetadata {
    /// Snapshot the state for a frame of `width` x `height` taken at `now`.
    ///
    /// Advances the SAVE sequence, so call it exactly once per emitted frame.
    pub fn capture(state: &mut DeviceState, width: usize, height: usize, now: DateTime<Utc>) -> Self {
        let comment = state.save.is_armed().then(|| state.save.comment.clone());
        let sequence = state.save.next_frame();

        let solution = state.solution.filter(|_| state.guide_on);
        let offset = solution.and_then(|s| s.offset_arcsec);
        let steering = solution.filter(|_| state.isu_on);
        let status = steering.and_then(|s| s.status_mrad);
        let fwhm = state.fwhm.filter(|_| state.guide_on);
        let session = state.exposure_active.then_some(&state.exposure);
        let (null_x, null_y) = state.null_position();

        Self {
            naxis1: width,
            naxis2: height,
            date: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            unix_time: now.timestamp_micros() as f64 / 1e6,
            exposure_ms: state.exposure_ms,
            frame_rate: state.frame_rate,
            tec_setpoint: state.tec_setpoint,
            pixel_scale: PIXEL_SCALE,
            exposure_type: if sequence > 0 {
                ExposureType::Guide
            } else {
                ExposureType::Acquire
            },
            sequence,
            comment,
            window: bounds(state.window),
            guide_window: bounds(state.guide_window()),
            null_x,
            null_y,
            guide_x_offset: offset.map(|o| o.0),
            guide_y_offset: offset.map(|o| o.1),
            isu_delta_x: steering.map(|s| s.delta_mrad.0),
            isu_delta_y: steering.map(|s| s.delta_mrad.1),
            isu_status_x: status.map(|s| s.0),
            isu_status_y: status.map(|s| s.1),
            fwhm_x: fwhm.map(|f| f.0),
            fwhm_y: fwhm.map(|f| f.1),
            filename: session.map(|s| s.filename.clone()),
            ra: session.and_then(|s| s.ra.clone()),
            dec: session.and_then(|s| s.dec.clone()),
            equinox: session.and_then(|s| s.equinox),
            objmag: session.and_then(|s| s.objmag),
        }
    }
}

/// Receives each emitted frame.
pub trait FrameSink: Send {
    fn write_frame(&mut self, pixels: &Array2<u16>, metadata: &FrameMetadata) -> std::io::Result<()>;
}

/// Writes one JSON object of metadata per line. Pixels are not encoded.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FrameSink for JsonLinesSink<W> {
    fn write_frame(&mut self, _pixels: &Array2<u16>, metadata: &FrameMetadata) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, metadata)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Keeps every frame's metadata in memory. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<FrameMetadata>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<FrameMetadata> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, _pixels: &Array2<u16>, metadata: &FrameMetadata) -> std::io::Result<()> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(metadata.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ExposureSession, GuideSolution};
    use chrono::TimeZone;
    use hardware::raptor::CameraSettings;
    use shared::config_storage::GuiderConfig;

    fn state() -> DeviceState {
        DeviceState::new(&GuiderConfig::default(), &CameraSettings::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_streaming_frame_has_null_guiding_fields() {
        let mut s = state();
        s.video_on = true;
        let meta = FrameMetadata::capture(&mut s, 640, 512, now());

        assert_eq!(meta.date, "2024-03-01T12:00:00.000Z");
        assert_eq!(meta.unix_time, 1_709_294_400.0);
        assert_eq!(meta.exposure_type, ExposureType::Acquire);
        assert_eq!(meta.sequence, 0);
        assert_eq!(meta.window, [0, 0, 639, 511]);
        assert_eq!(meta.guide_window, [304, 240, 335, 271]);
        assert_eq!(meta.guide_x_offset, None);
        assert_eq!(meta.isu_delta_x, None);
        assert_eq!(meta.filename, None);
    }

    #[test]
    fn test_guiding_fields_follow_flags() {
        let mut s = state();
        s.video_on = true;
        s.enter_guide_mode();
        s.solution = Some(GuideSolution {
            offset_arcsec: Some((0.1, -0.2)),
            delta_mrad: (0.01, -0.02),
            status_mrad: Some((0.3, 0.4)),
        });

        let meta = FrameMetadata::capture(&mut s, 32, 32, now());
        assert_eq!(meta.guide_x_offset, Some(0.1));
        assert_eq!(meta.guide_y_offset, Some(-0.2));
        assert_eq!(meta.isu_delta_x, None);

        s.isu_on = true;
        let meta = FrameMetadata::capture(&mut s, 32, 32, now());
        assert_eq!(meta.isu_delta_y, Some(-0.02));
        assert_eq!(meta.isu_status_x, Some(0.3));
    }

    #[test]
    fn test_session_fields_only_while_active() {
        let mut s = state();
        s.exposure = ExposureSession {
            filename: "obs.fits".to_string(),
            ra: Some("10:00:00".to_string()),
            dec: None,
            equinox: Some(2000.0),
            objmag: None,
        };
        assert_eq!(FrameMetadata::capture(&mut s, 640, 512, now()).filename, None);

        s.exposure_active = true;
        let meta = FrameMetadata::capture(&mut s, 640, 512, now());
        assert_eq!(meta.filename.as_deref(), Some("obs.fits"));
        assert_eq!(meta.equinox, Some(2000.0));
        assert_eq!(meta.dec, None);
    }

    #[test]
    fn test_save_sequence_tags_frames() {
        let mut s = state();
        s.save.arm(2, "focus run".to_string());

        let first = FrameMetadata::capture(&mut s, 640, 512, now());
        let second = FrameMetadata::capture(&mut s, 640, 512, now());
        let third = FrameMetadata::capture(&mut s, 640, 512, now());

        assert_eq!((first.sequence, first.exposure_type), (1, ExposureType::Guide));
        assert_eq!(first.comment.as_deref(), Some("focus run"));
        assert_eq!((second.sequence, second.exposure_type), (2, ExposureType::Guide));
        assert_eq!(second.comment.as_deref(), Some("focus run"));
        assert_eq!((third.sequence, third.exposure_type), (0, ExposureType::Acquire));
        assert_eq!(third.comment, None);
    }

    #[test]
    fn test_json_lines_sink() {
        let mut s = state();
        let meta = FrameMetadata::capture(&mut s, 640, 512, now());
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_frame(&Array2::zeros((2, 2)), &meta).unwrap();
        sink.write_frame(&Array2::zeros((2, 2)), &meta).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["exposure_type"], "ACQUIRE");
        assert_eq!(value["guide_x_offset"], serde_json::Value::Null);
        assert_eq!(value["naxis1"], 640);
    }
}
