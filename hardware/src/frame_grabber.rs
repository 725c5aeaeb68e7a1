//! Frame grabber interface.
//!
//! The grabber yields raw 16-bit pixel buffers for the current read-out
//! window. Buffer allocation, DMA and blocking-wait configuration belong to
//! the vendor driver behind [`FrameGrabber::setup`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ndarray::{s, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::synthetic::{render_star, render_star_with_noise, StarSpec};
use shared::{ImageSize, Window};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrabberError {
    /// No frame arrived within the grabber's image timeout.
    #[error("timed out waiting for frame")]
    Timeout,

    #[error("grabber setup failed: {0}")]
    Setup(String),

    #[error("ROI rejected: {0}")]
    Roi(String),
}

pub type GrabberResult<T> = Result<T, GrabberError>;

/// Source of raw frames from the guide camera.
pub trait FrameGrabber: Send {
    /// Allocate `buffers` ring buffers and start acquisition.
    fn setup(&mut self, buffers: usize) -> GrabberResult<()>;

    /// Restrict read-out to `window` (in full-frame pixels).
    fn set_roi(&mut self, window: Window) -> GrabberResult<()>;

    /// Return to full-frame read-out.
    fn clear_roi(&mut self) -> GrabberResult<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> GrabberResult<Array2<u16>>;

    /// Number of image timeouts seen since setup.
    fn timeouts(&self) -> u64;

    /// Size of the frames currently being delivered.
    fn frame_size(&self) -> ImageSize;
}

#[derive(Debug)]
struct SimScene {
    star: Option<StarSpec>,
    read_noise: f64,
    drop_next: usize,
}

/// Cloneable control surface for a [`SimulatedGrabber`].
#[derive(Debug, Clone)]
pub struct SimulatedSceneHandle {
    scene: Arc<Mutex<SimScene>>,
}

impl SimulatedSceneHandle {
    fn lock(&self) -> MutexGuard<'_, SimScene> {
        self.scene.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Place the star at a full-frame position, or remove it with `None`.
    pub fn set_star(&self, star: Option<StarSpec>) {
        self.lock().star = star;
    }

    pub fn set_read_noise(&self, noise: f64) {
        self.lock().read_noise = noise;
    }

    /// Make the next `count` frame requests time out.
    pub fn drop_frames(&self, count: usize) {
        self.lock().drop_next = count;
    }
}

/// Renders a single star on a flat background.
pub struct SimulatedGrabber {
    sensor: ImageSize,
    roi: Option<Window>,
    scene: Arc<Mutex<SimScene>>,
    frame_interval: Duration,
    rng: StdRng,
    started: bool,
    timeouts: u64,
    setup_calls: usize,
}

impl SimulatedGrabber {
    pub fn new(sensor: ImageSize) -> Self {
        let center = StarSpec::round(
            sensor.width as f64 / 2.0,
            sensor.height as f64 / 2.0,
            1.2,
            8000.0,
            500.0,
        );
        Self {
            sensor,
            roi: None,
            scene: Arc::new(Mutex::new(SimScene {
                star: Some(center),
                read_noise: 0.0,
                drop_next: 0,
            })),
            frame_interval: Duration::ZERO,
            rng: StdRng::seed_from_u64(0x5eed),
            started: false,
            timeouts: 0,
            setup_calls: 0,
        }
    }

    /// Pace frame delivery at `interval` per frame.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn handle(&self) -> SimulatedSceneHandle {
        SimulatedSceneHandle {
            scene: Arc::clone(&self.scene),
        }
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls
    }

    pub fn roi(&self) -> Option<Window> {
        self.roi
    }
}

impl FrameGrabber for SimulatedGrabber {
    fn setup(&mut self, buffers: usize) -> GrabberResult<()> {
        if buffers == 0 {
            return Err(GrabberError::Setup("at least one buffer required".to_string()));
        }
        self.started = true;
        self.timeouts = 0;
        self.setup_calls += 1;
        debug!("sim grabber started with {buffers} buffers");
        Ok(())
    }

    fn set_roi(&mut self, window: Window) -> GrabberResult<()> {
        if !window.fits_within(self.sensor) {
            return Err(GrabberError::Roi(format!(
                "{window} outside sensor {}",
                self.sensor
            )));
        }
        self.roi = Some(window);
        Ok(())
    }

    fn clear_roi(&mut self) -> GrabberResult<()> {
        self.roi = None;
        Ok(())
    }

    fn next_frame(&mut self) -> GrabberResult<Array2<u16>> {
        if !self.started {
            return Err(GrabberError::Setup("acquisition not started".to_string()));
        }
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }

        let mut scene = self.scene.lock().unwrap_or_else(|e| e.into_inner());
        if scene.drop_next > 0 {
            scene.drop_next -= 1;
            self.timeouts += 1;
            return Err(GrabberError::Timeout);
        }

        let window = self.roi.unwrap_or(Window::full_frame(self.sensor));
        let star = scene.star.map(|star| StarSpec {
            x: star.x - window.x0 as f64,
            y: star.y - window.y0 as f64,
            ..star
        });
        let frame = match star {
            Some(star) if scene.read_noise > 0.0 => render_star_with_noise(
                window.width(),
                window.height(),
                &star,
                scene.read_noise,
                &mut self.rng,
            ),
            Some(star) => render_star(window.width(), window.height(), &star),
            None => Array2::from_elem((window.height(), window.width()), 500),
        };
        trace!("sim frame {window}");
        Ok(frame)
    }

    fn timeouts(&self) -> u64 {
        self.timeouts
    }

    fn frame_size(&self) -> ImageSize {
        self.roi.map(|w| w.size).unwrap_or(self.sensor)
    }
}

/// Crop a full frame to `window`.
pub fn crop(frame: &Array2<u16>, window: Window) -> Array2<u16> {
    let (x0, y0, x1, y1) = window.bounds();
    frame.slice(s![y0..=y1, x0..=x1]).to_owned()
}
