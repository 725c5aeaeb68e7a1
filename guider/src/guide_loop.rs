//! The guide loop: command polling, frame acquisition, centroiding and
//! steering corrections on one thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use hardware::frame_grabber::{FrameGrabber, GrabberError};
use hardware::isu::{arcsec_to_mrad, SteeringUnit};
use hardware::raptor::{CameraSettings, RaptorCamera, SerialLink};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use shared::config_storage::GuiderConfig;
use shared::image_proc::{CentroidConfig, CentroidEstimator, FitMode};
use tracing::{debug, error, info, warn};

use crate::command::{notice, CommandContext, CommandInterpreter, Reply};
use crate::config::{GuiderOptions, GRABBER_BUFFERS, SIM_STAR_SIGMA_ARCSEC};
use crate::dispatcher::{
    correction_from_centroid, slew_rate, CorrectionCommand, CorrectionDispatcher, DispatchMode,
};
use crate::error::{GuiderError, GuiderResult};
use crate::homing::{HomingOutcome, HomingTask};
use crate::metadata::{FrameMetadata, FrameSink};
use crate::server::{CommandChannel, ServerEvent};
use crate::state::{DeviceState, GuideLoopState, GuideSolution};

/// Centroid convention offset applied to guiding centroids.
const CENTROID_CONVENTION_OFFSET: f64 = 0.5;

/// Time spent in each part of one iteration.
#[derive(Debug, Clone, Copy, Default)]
struct FrameTiming {
    acquire: Duration,
    centroid: Duration,
    dispatch: Duration,
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1e3
}

pub struct GuideLoop {
    options: GuiderOptions,
    state: DeviceState,
    camera: RaptorCamera<Box<dyn SerialLink>>,
    grabber: Box<dyn FrameGrabber>,
    isu: Option<Arc<dyn SteeringUnit>>,
    dispatcher: Option<CorrectionDispatcher>,
    homing: HomingTask,
    interpreter: CommandInterpreter,
    estimator: CentroidEstimator,
    sink: Box<dyn FrameSink>,
    phase: GuideLoopState,
    streaming_started: bool,
    last_timeouts: u64,
    frame_index: u64,
    jitter: StdRng,
    notices: Vec<String>,
}

impl GuideLoop {
    pub fn new(
        options: GuiderOptions,
        config: &GuiderConfig,
        camera: RaptorCamera<Box<dyn SerialLink>>,
        grabber: Box<dyn FrameGrabber>,
        isu: Option<Arc<dyn SteeringUnit>>,
        sink: Box<dyn FrameSink>,
    ) -> Self {
        let mode = if options.direct_corrections {
            DispatchMode::Direct
        } else {
            DispatchMode::Workers
        };
        let dispatcher = isu
            .as_ref()
            .map(|isu| CorrectionDispatcher::new(Arc::clone(isu), mode));

        Self {
            state: DeviceState::new(config, &CameraSettings::default()),
            jitter: StdRng::seed_from_u64(options.jitter_seed),
            options,
            camera,
            grabber,
            isu,
            dispatcher,
            homing: HomingTask::default(),
            interpreter: CommandInterpreter::new(),
            estimator: CentroidEstimator::new(CentroidConfig::default()),
            sink,
            phase: GuideLoopState::Init,
            streaming_started: false,
            last_timeouts: 0,
            frame_index: 0,
            notices: Vec::new(),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn phase(&self) -> GuideLoopState {
        self.phase
    }

    pub fn dispatcher_mut(&mut self) -> Option<&mut CorrectionDispatcher> {
        self.dispatcher.as_mut()
    }

    /// Bring the camera to its default settings. Any failure is fatal.
    pub fn initialize(&mut self) -> GuiderResult<()> {
        let applied = self
            .camera
            .initialize(&CameraSettings::default())
            .map_err(|e| {
                error!("camera initialization failed: {e}");
                GuiderError::Fatal(format!("camera initialization failed: {e}"))
            })?;
        self.state.frame_rate = applied.frame_rate;
        self.state.exposure_ms = applied.exposure_ms;
        self.state.tec_setpoint = applied.tec_setpoint;
        self.state.digital_gain = applied.digital_gain;
        self.update_phase();
        Ok(())
    }

    /// Handle one operator command line.
    pub fn handle_command(&mut self, line: &str) -> Reply {
        let mut ctx = CommandContext {
            state: &mut self.state,
            camera: &mut self.camera,
            grabber: self.grabber.as_mut(),
            isu: self.isu.as_ref(),
            homing: &mut self.homing,
        };
        let reply = self.interpreter.handle(line, &mut ctx);
        if self.phase != GuideLoopState::Init {
            self.update_phase();
        }
        reply
    }

    /// Out-of-band notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    /// Block until a running homing finishes and apply its result.
    ///
    /// Returns `false` if no homing finished within `timeout`.
    pub fn wait_for_homing(&mut self, timeout: Duration) -> bool {
        match self.homing.wait(timeout) {
            Some(outcome) => {
                self.apply_homing(outcome);
                true
            }
            None => false,
        }
    }

    fn apply_homing(&mut self, outcome: HomingOutcome) {
        match outcome {
            HomingOutcome::Enabled => {
                info!("ISU homed and enabled");
                self.state.isu_on = true;
                self.notices.push(notice("ISU ON"));
            }
            HomingOutcome::Cancelled if self.homing.take_restart() => {
                info!("ISU switched back on during homing");
                self.enable_homed_isu();
            }
            HomingOutcome::Cancelled => {
                info!("ISU homed, left disabled after ISU OFF");
                self.state.isu_on = false;
                self.notices.push(notice("ISU OFF"));
            }
            HomingOutcome::Failed(e) => {
                warn!("ISU homing failed: {e}");
                self.state.isu_on = false;
                self.notices.push(notice("ISU OFF"));
            }
        }
    }

    fn enable_homed_isu(&mut self) {
        let Some(isu) = &self.isu else {
            return;
        };
        match isu.enable() {
            Ok(()) => {
                self.state.isu_on = true;
                self.notices.push(notice("ISU ON"));
            }
            Err(e) => {
                warn!("ISU enable failed: {e}");
                self.state.isu_on = false;
                self.notices.push(notice("ISU OFF"));
            }
        }
    }

    fn collect_background(&mut self) {
        if let Some(outcome) = self.homing.poll() {
            self.apply_homing(outcome);
        }
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.poll_completed();
        }
    }

    fn update_phase(&mut self) {
        let next = self.state.loop_state();
        if next != self.phase && self.phase != GuideLoopState::Shutdown {
            info!("guide loop {} -> {}", self.phase, next);
            self.phase = next;
        }
    }

    /// One iteration without command polling.
    pub fn step(&mut self) -> GuiderResult<()> {
        self.collect_background();

        if !self.state.video_on {
            if self.streaming_started {
                self.streaming_started = false;
                info!("streaming stopped after {} frames", self.frame_index);
            }
            self.update_phase();
            return Ok(());
        }

        if !self.streaming_started {
            self.grabber.setup(GRABBER_BUFFERS)?;
            self.last_timeouts = self.grabber.timeouts();
            self.streaming_started = true;
            info!("streaming started");
        }
        self.update_phase();

        let mut timing = FrameTiming::default();
        let start = Instant::now();
        let frame = match self.grabber.next_frame() {
            Ok(frame) => frame,
            Err(GrabberError::Timeout) => {
                debug!("frame wait timed out");
                self.log_timeouts();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        timing.acquire = start.elapsed();

        if self.state.guide_on {
            self.guide_frame(&frame, &mut timing)?;
        }

        self.log_timeouts();

        let (height, width) = frame.dim();
        let metadata = FrameMetadata::capture(&mut self.state, width, height, Utc::now());
        if let Err(e) = self.sink.write_frame(&frame, &metadata) {
            warn!("unable to hand frame to sink: {e}");
        }

        if self.options.verbose && self.state.guide_on {
            self.log_timing(&timing);
        }
        self.frame_index += 1;
        Ok(())
    }

    fn log_timeouts(&mut self) {
        let timeouts = self.grabber.timeouts();
        if timeouts > self.last_timeouts {
            info!(
                "received {} timeouts since the last image",
                timeouts - self.last_timeouts
            );
            self.last_timeouts = timeouts;
        }
    }

    fn log_timing(&self, timing: &FrameTiming) {
        let Some(solution) = self.state.solution else {
            return;
        };
        let (xoff, yoff) = solution.offset_arcsec.unwrap_or((f64::NAN, f64::NAN));
        let (xisu, yisu) = solution.status_mrad.unwrap_or((f64::NAN, f64::NAN));
        info!(
            "frame {}: acquire {:.2} ms, centroid {:.2} ms, dispatch {:.2} ms; \
             offset ({:.2}, {:.2}) arcsec; isu ({:.2}, {:.2}) mrad; delta ({:.2}, {:.2}) mrad",
            self.frame_index,
            ms(timing.acquire),
            ms(timing.centroid),
            ms(timing.dispatch),
            xoff,
            yoff,
            xisu,
            yisu,
            solution.delta_mrad.0,
            solution.delta_mrad.1
        );
    }

    /// One-shot width estimate and fault check on the first guiding frame.
    fn first_guide_frame(&mut self, frame: &Array2<u16>) -> GuiderResult<()> {
        match self.estimator.estimate(&frame.view(), FitMode::Fwhm) {
            Ok(result) => {
                info!(
                    "guide star FWHM {:.2} x {:.2} px",
                    result.fwhm_x, result.fwhm_y
                );
                self.state.fwhm = Some((result.fwhm_x, result.fwhm_y));
            }
            Err(e) => warn!("FWHM estimate failed: {e}"),
        }

        if let Some(isu) = &self.isu {
            match isu.check_faults() {
                Ok(faults) => {
                    if let Some(axis) = faults.first_fault() {
                        error!("fatal error on the fast guiding loop: ISU {axis} axis is in error");
                        return Err(GuiderError::Fatal(format!("ISU {axis} axis is in error")));
                    }
                }
                Err(e) => warn!("failed checking ISU: {e}"),
            }
        }
        Ok(())
    }

    fn guide_frame(&mut self, frame: &Array2<u16>, timing: &mut FrameTiming) -> GuiderResult<()> {
        if !self.state.first_frame_done {
            self.first_guide_frame(frame)?;
            self.state.first_frame_done = true;
        }

        let start = Instant::now();
        let (offset_arcsec, delta_mrad) = if self.options.simulate_star {
            let jx: f64 = self.jitter.sample(StandardNormal);
            let jy: f64 = self.jitter.sample(StandardNormal);
            let delta = (
                arcsec_to_mrad(jx * SIM_STAR_SIGMA_ARCSEC),
                arcsec_to_mrad(jy * SIM_STAR_SIGMA_ARCSEC),
            );
            (None, delta)
        } else {
            let result = match self.estimator.estimate(&frame.view(), FitMode::Centroid) {
                Ok(result) => result,
                Err(e) => {
                    warn!("centroid failed, skipping correction: {e}");
                    return Ok(());
                }
            };
            let centroid = (
                result.x + CENTROID_CONVENTION_OFFSET,
                result.y + CENTROID_CONVENTION_OFFSET,
            );
            let correction = correction_from_centroid(
                centroid,
                self.state.guide_origin(),
                self.state.null_position(),
                &self.state.setup_to_true,
            );
            (Some(correction.offset_arcsec), correction.delta_mrad)
        };

        let status_mrad = match &self.isu {
            Some(isu) => Some(isu.angles().map_err(|e| {
                error!("fatal error on the fast guiding loop: failed getting ISU angles: {e}");
                GuiderError::Fatal(format!("failed getting ISU angles: {e}"))
            })?),
            None => None,
        };
        self.state.solution = Some(GuideSolution {
            offset_arcsec,
            delta_mrad,
            status_mrad,
        });
        timing.centroid = start.elapsed();

        let start = Instant::now();
        if self.state.isu_on {
            if let (Some(dispatcher), Some(status_mrad)) = (self.dispatcher.as_mut(), status_mrad) {
                dispatcher.submit(&CorrectionCommand {
                    rate_hz: slew_rate(self.state.frame_rate),
                    status_mrad,
                    delta_mrad,
                });
            }
        }
        timing.dispatch = start.elapsed();
        Ok(())
    }

    /// Serve commands and frames until SHUTDOWN or a fatal fault.
    pub fn run<C: CommandChannel>(&mut self, channel: &mut C) -> GuiderResult<()> {
        if self.phase == GuideLoopState::Init {
            self.initialize()?;
        }

        loop {
            let timeout = if self.state.video_on {
                self.options.poll_timeout
            } else {
                self.options.idle_poll_timeout
            };
            for event in channel.poll(timeout)? {
                match event {
                    ServerEvent::Connected(session) => {
                        info!("client {} connected from {}", session.id, session.hostname);
                        self.state.sessions.insert(session);
                    }
                    ServerEvent::Disconnected(id) => {
                        if let Some(session) = self.state.sessions.remove(id) {
                            info!("client {} ({}) disconnected", id, session.hostname);
                        }
                    }
                    ServerEvent::Line { session, line } => match self.handle_command(&line) {
                        Reply::Line(text) => {
                            if let Err(e) = channel.send(session, &text) {
                                warn!("unable to reply to client {session}: {e}");
                            }
                        }
                        Reply::Close => {
                            channel.close(session);
                            self.state.sessions.remove(session);
                        }
                        Reply::Shutdown => {
                            self.shutdown();
                            return Ok(());
                        }
                        Reply::Silent => {}
                    },
                }
            }

            self.step()?;

            for notice in self.take_notices() {
                channel.broadcast(&notice);
            }
        }
    }

    /// Stop background work and enter SHUTDOWN.
    pub fn shutdown(&mut self) {
        if let Some(dispatcher) = self.dispatcher.as_mut() {
            dispatcher.shutdown();
        }
        info!("guide loop {} -> {}", self.phase, GuideLoopState::Shutdown);
        self.phase = GuideLoopState::Shutdown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FRAME_SIZE;
    use crate::metadata::MemorySink;
    use hardware::frame_grabber::SimulatedGrabber;
    use hardware::isu::sim::SimulatedIsu;
    use hardware::isu::AxisFaults;
    use hardware::raptor::sim::SimulatedRaptor;

    fn guide_loop(isu: &SimulatedIsu) -> GuideLoop {
        GuideLoop::new(
            GuiderOptions::default(),
            &GuiderConfig::default(),
            RaptorCamera::new(Box::new(SimulatedRaptor::new()) as Box<dyn SerialLink>),
            Box::new(SimulatedGrabber::new(FRAME_SIZE)),
            Some(Arc::new(isu.clone()) as Arc<dyn SteeringUnit>),
            Box::new(MemorySink::new()),
        )
    }

    #[test]
    fn test_first_frame_check_runs_once_when_centroid_fails() {
        let isu = SimulatedIsu::new();
        let mut guide_loop = guide_loop(&isu);
        let empty = Array2::<u16>::zeros((0, 0));
        let mut timing = FrameTiming::default();

        guide_loop.guide_frame(&empty, &mut timing).unwrap();
        assert!(guide_loop.state.first_frame_done);
        assert!(guide_loop.state.solution.is_none());

        isu.set_faults(AxisFaults { x: true, y: false });
        guide_loop.guide_frame(&empty, &mut timing).unwrap();
    }

    #[test]
    fn test_first_frame_fault_leaves_check_pending() {
        let isu = SimulatedIsu::new();
        isu.set_faults(AxisFaults { x: false, y: true });
        let mut guide_loop = guide_loop(&isu);
        let frame = Array2::<u16>::from_elem((32, 32), 500);

        let result = guide_loop.guide_frame(&frame, &mut FrameTiming::default());
        assert!(matches!(result, Err(GuiderError::Fatal(_))));
        assert!(!guide_loop.state.first_frame_done);
    }
}
