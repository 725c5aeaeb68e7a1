//! Steering corrections derived from guide-star centroids.
//!
//! The loop thread computes each correction and hands it to the
//! [`CorrectionDispatcher`]. In worker mode each axis has its own thread fed
//! by a one-slot channel, and at most one slew per axis is outstanding: a
//! correction for a busy axis is skipped rather than queued. Results come back
//! on a channel drained by the loop thread, so workers never touch device
//! state.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use hardware::isu::{arcsec_to_mrad, Axis, IsuResult, SteeringUnit};
use shared::setup_to_true::SetupToTrue;
use tracing::{debug, info, trace, warn};

use crate::config::{DEFAULT_SLEW_RATE_HZ, PIXEL_SCALE};

/// Offset of the star from the null position and the matching mechanism delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub offset_arcsec: (f64, f64),
    pub delta_mrad: (f64, f64),
}

/// Convert a guide-window centroid into a mechanism delta.
///
/// `centroid` is in guide-window pixels with the +0.5 convention applied.
pub fn correction_from_centroid(
    centroid: (f64, f64),
    guide_origin: (usize, usize),
    null: (f64, f64),
    transform: &SetupToTrue,
) -> Correction {
    let offset_arcsec = (
        (guide_origin.0 as f64 + centroid.0 - null.0) * PIXEL_SCALE,
        (guide_origin.1 as f64 + centroid.1 - null.1) * PIXEL_SCALE,
    );
    let delta_mrad = transform.apply(
        arcsec_to_mrad(offset_arcsec.0),
        arcsec_to_mrad(offset_arcsec.1),
    );
    Correction {
        offset_arcsec,
        delta_mrad,
    }
}

/// Slew rate for a frame rate; a zero frame rate falls back to the default.
pub fn slew_rate(frame_rate: f64) -> f64 {
    if frame_rate != 0.0 {
        frame_rate
    } else {
        DEFAULT_SLEW_RATE_HZ
    }
}

/// Everything one correction needs, captured by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionCommand {
    pub rate_hz: f64,
    /// Angles read back before the correction, mrad.
    pub status_mrad: (f64, f64),
    /// Delta to remove, mrad.
    pub delta_mrad: (f64, f64),
}

impl CorrectionCommand {
    /// `(from, to)` angles for one axis. The mechanism moves against the delta.
    pub fn endpoints(&self, axis: Axis) -> (f64, f64) {
        let (status, delta) = match axis {
            Axis::X => (self.status_mrad.0, self.delta_mrad.0),
            Axis::Y => (self.status_mrad.1, self.delta_mrad.1),
        };
        (status, status - delta)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Per-axis worker threads.
    Workers,
    /// Slew on the calling thread.
    Direct,
}

/// What happened to one axis of a submitted correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Dispatched,
    /// A previous slew on this axis had not finished.
    Busy,
    /// The worker is gone.
    Closed,
}

/// A finished slew.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisOutcome {
    pub axis: Axis,
    pub result: IsuResult<()>,
    pub elapsed: Duration,
}

struct SlewJob {
    axis: Axis,
    rate_hz: f64,
    from_mrad: f64,
    to_mrad: f64,
}

fn run_slew(isu: &dyn SteeringUnit, job: &SlewJob) -> AxisOutcome {
    let start = Instant::now();
    let result = isu.slew(job.axis, job.rate_hz, job.from_mrad, job.to_mrad);
    AxisOutcome {
        axis: job.axis,
        result,
        elapsed: start.elapsed(),
    }
}

struct AxisWorker {
    sender: Sender<SlewJob>,
    handle: JoinHandle<()>,
}

fn slot(axis: Axis) -> usize {
    match axis {
        Axis::X => 0,
        Axis::Y => 1,
    }
}

/// Applies corrections to the steering unit without blocking the loop.
pub struct CorrectionDispatcher {
    isu: Arc<dyn SteeringUnit>,
    mode: DispatchMode,
    workers: Vec<AxisWorker>,
    results_rx: Receiver<AxisOutcome>,
    in_flight: [bool; 2],
    skipped: u64,
}

impl CorrectionDispatcher {
    pub fn new(isu: Arc<dyn SteeringUnit>, mode: DispatchMode) -> Self {
        let (results_tx, results_rx) = unbounded();

        let workers = match mode {
            DispatchMode::Direct => Vec::new(),
            DispatchMode::Workers => [Axis::X, Axis::Y]
                .into_iter()
                .map(|axis| {
                    let (sender, receiver) = bounded::<SlewJob>(1);
                    let isu = Arc::clone(&isu);
                    let results = results_tx.clone();
                    let handle = std::thread::spawn(move || {
                        debug!("{axis} correction worker started");
                        while let Ok(job) = receiver.recv() {
                            let outcome = run_slew(isu.as_ref(), &job);
                            if results.send(outcome).is_err() {
                                break;
                            }
                        }
                        debug!("{axis} correction worker shutting down");
                    });
                    AxisWorker { sender, handle }
                })
                .collect(),
        };

        info!("correction dispatcher started in {mode:?} mode");
        Self {
            isu,
            mode,
            workers,
            results_rx,
            in_flight: [false; 2],
            skipped: 0,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// True if a slew on `axis` has been dispatched but not yet collected.
    pub fn is_busy(&self, axis: Axis) -> bool {
        self.in_flight[slot(axis)]
    }

    /// Corrections dropped because their axis was busy.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Submit a correction on both axes.
    ///
    /// Finished slews are collected first, so an axis whose previous slew has
    /// completed is free again.
    pub fn submit(&mut self, command: &CorrectionCommand) -> [(Axis, Submission); 2] {
        let finished = self.poll_completed();
        if !finished.is_empty() {
            trace!("collected {} finished slews before submit", finished.len());
        }
        [Axis::X, Axis::Y].map(|axis| (axis, self.submit_axis(axis, command)))
    }

    fn submit_axis(&mut self, axis: Axis, command: &CorrectionCommand) -> Submission {
        let (from_mrad, to_mrad) = command.endpoints(axis);
        let job = SlewJob {
            axis,
            rate_hz: command.rate_hz,
            from_mrad,
            to_mrad,
        };

        if self.in_flight[slot(axis)] {
            self.skipped += 1;
            debug!("{axis} slew still in flight, skipping correction");
            return Submission::Busy;
        }

        match self.mode {
            DispatchMode::Direct => {
                let outcome = run_slew(self.isu.as_ref(), &job);
                log_outcome(&outcome);
                Submission::Dispatched
            }
            DispatchMode::Workers => {
                let Some(worker) = self.workers.get(slot(axis)) else {
                    return Submission::Closed;
                };
                match worker.sender.try_send(job) {
                    Ok(()) => {
                        self.in_flight[slot(axis)] = true;
                        Submission::Dispatched
                    }
                    Err(TrySendError::Full(_)) => {
                        self.skipped += 1;
                        debug!("{axis} correction slot full, skipping correction");
                        Submission::Busy
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("{axis} correction worker has shut down");
                        Submission::Closed
                    }
                }
            }
        }
    }

    /// Collect slews that have finished since the last call.
    pub fn poll_completed(&mut self) -> Vec<AxisOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.results_rx.try_recv() {
            self.record(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Block until no slew is in flight or `timeout` passes.
    ///
    /// Returns the outcomes collected while waiting.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<AxisOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcomes = self.poll_completed();
        while self.in_flight.iter().any(|busy| *busy) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results_rx.recv_timeout(remaining) {
                Ok(outcome) => {
                    self.record(&outcome);
                    outcomes.push(outcome);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        outcomes
    }

    fn record(&mut self, outcome: &AxisOutcome) {
        self.in_flight[slot(outcome.axis)] = false;
        log_outcome(outcome);
    }

    /// Stop the workers after their current slew.
    pub fn shutdown(&mut self) {
        for (index, worker) in self.workers.drain(..).enumerate() {
            drop(worker.sender);
            if let Err(e) = worker.handle.join() {
                warn!("correction worker {index} panicked: {e:?}");
            }
        }
        while self.results_rx.try_recv().is_ok() {}
        self.in_flight = [false; 2];
    }
}

impl Drop for CorrectionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn log_outcome(outcome: &AxisOutcome) {
    match &outcome.result {
        Ok(()) => trace!(
            "{} slew finished in {:.3} ms",
            outcome.axis,
            outcome.elapsed.as_secs_f64() * 1e3
        ),
        Err(e) => warn!("{} slew failed: {e}", outcome.axis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use hardware::isu::sim::SimulatedIsu;
    use hardware::isu::MRAD_PER_ARCSEC;

    fn enabled_isu() -> SimulatedIsu {
        let isu = SimulatedIsu::new();
        isu.home().unwrap();
        isu.enable().unwrap();
        isu
    }

    fn command() -> CorrectionCommand {
        CorrectionCommand {
            rate_hz: 50.0,
            status_mrad: (0.2, -0.1),
            delta_mrad: (0.05, 0.02),
        }
    }

    #[test]
    fn test_correction_from_centroid() {
        let correction = correction_from_centroid(
            (16.5, 15.5),
            (304, 240),
            (320.0, 256.0),
            &SetupToTrue::identity(),
        );
        assert_abs_diff_eq!(correction.offset_arcsec.0, 0.5 * PIXEL_SCALE, epsilon = 1e-12);
        assert_abs_diff_eq!(correction.offset_arcsec.1, -0.5 * PIXEL_SCALE, epsilon = 1e-12);
        assert_abs_diff_eq!(
            correction.delta_mrad.0,
            0.5 * PIXEL_SCALE * MRAD_PER_ARCSEC,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_star_on_null_gives_zero_delta() {
        let correction = correction_from_centroid(
            (16.0, 16.0),
            (304, 240),
            (320.0, 256.0),
            &SetupToTrue::identity(),
        );
        assert_eq!(correction.offset_arcsec, (0.0, 0.0));
        assert_eq!(correction.delta_mrad, (0.0, 0.0));
    }

    #[test]
    fn test_slew_rate_fallback() {
        assert_eq!(slew_rate(33.0), 33.0);
        assert_eq!(slew_rate(0.0), DEFAULT_SLEW_RATE_HZ);
    }

    #[test]
    fn test_endpoints_move_against_delta() {
        let cmd = command();
        let (from, to) = cmd.endpoints(Axis::X);
        assert_eq!(from, 0.2);
        assert_abs_diff_eq!(to, 0.15, epsilon = 1e-12);
        let (from, to) = cmd.endpoints(Axis::Y);
        assert_eq!(from, -0.1);
        assert_abs_diff_eq!(to, -0.12, epsilon = 1e-12);
    }

    #[test]
    fn test_direct_mode_slews_synchronously() {
        let isu = enabled_isu();
        let mut dispatcher = CorrectionDispatcher::new(Arc::new(isu.clone()), DispatchMode::Direct);
        let submitted = dispatcher.submit(&command());
        assert_eq!(
            submitted,
            [(Axis::X, Submission::Dispatched), (Axis::Y, Submission::Dispatched)]
        );

        let slews = isu.slews();
        assert_eq!(slews.len(), 2);
        assert_eq!(slews[0].axis, Axis::X);
        assert_eq!(slews[0].rate_hz, 50.0);
        assert_abs_diff_eq!(slews[0].to_mrad, 0.15, epsilon = 1e-12);
    }

    #[test]
    fn test_worker_mode_completes() {
        let isu = enabled_isu();
        let mut dispatcher =
            CorrectionDispatcher::new(Arc::new(isu.clone()), DispatchMode::Workers);
        dispatcher.submit(&command());
        let outcomes = dispatcher.wait_idle(Duration::from_secs(5));

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert!(!dispatcher.is_busy(Axis::X));
        assert!(!dispatcher.is_busy(Axis::Y));
        let (x, y) = isu.angles().unwrap();
        assert_abs_diff_eq!(x, 0.15, epsilon = 1e-12);
        assert_abs_diff_eq!(y, -0.12, epsilon = 1e-12);
    }

    #[test]
    fn test_busy_axis_is_skipped() {
        let isu = enabled_isu().with_slew_delay(Duration::from_millis(200));
        let mut dispatcher =
            CorrectionDispatcher::new(Arc::new(isu.clone()), DispatchMode::Workers);

        dispatcher.submit(&command());
        let second = dispatcher.submit(&command());
        assert_eq!(second, [(Axis::X, Submission::Busy), (Axis::Y, Submission::Busy)]);
        assert_eq!(dispatcher.skipped(), 2);

        dispatcher.wait_idle(Duration::from_secs(5));
        assert_eq!(isu.slews().len(), 2);

        let third = dispatcher.submit(&command());
        assert_eq!(
            third,
            [(Axis::X, Submission::Dispatched), (Axis::Y, Submission::Dispatched)]
        );
        dispatcher.wait_idle(Duration::from_secs(5));
        assert_eq!(isu.slews().len(), 4);
    }

    #[test]
    fn test_failed_slew_is_reported() {
        let isu = SimulatedIsu::new();
        let mut dispatcher = CorrectionDispatcher::new(Arc::new(isu), DispatchMode::Workers);
        dispatcher.submit(&command());
        let outcomes = dispatcher.wait_idle(Duration::from_secs(5));
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_err()));
    }
}
