//! Background homing of the steering unit.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use hardware::isu::{IsuError, SteeringUnit};
use tracing::{info, warn};

/// How a homing run ended.
#[derive(Debug, PartialEq)]
pub enum HomingOutcome {
    /// Homed and enabled.
    Enabled,
    /// Switched off by the operator before the run finished. The unit is
    /// left disabled.
    Cancelled,
    Failed(IsuError),
}

/// Shared between the loop and the homing thread. The thread holds the lock
/// across its cancel check and `enable()`, so a cancel either lands before
/// the check or after the enable, where the caller's `stop()` undoes it.
#[derive(Debug, Default)]
struct Gate {
    cancelled: bool,
    decided: bool,
}

fn lock(gate: &Mutex<Gate>) -> MutexGuard<'_, Gate> {
    gate.lock().unwrap_or_else(|e| e.into_inner())
}

/// Homes and enables the unit on its own thread.
///
/// At most one homing runs at a time. The loop collects the result with
/// [`HomingTask::poll`].
#[derive(Default)]
pub struct HomingTask {
    receiver: Option<Receiver<HomingOutcome>>,
    handle: Option<JoinHandle<()>>,
    gate: Arc<Mutex<Gate>>,
    restart: bool,
}

impl HomingTask {
    /// Start homing. Returns `false` if a homing is already running.
    pub fn start(&mut self, isu: Arc<dyn SteeringUnit>) -> bool {
        if self.is_running() {
            return false;
        }
        let (sender, receiver) = bounded(1);
        let gate = Arc::new(Mutex::new(Gate::default()));
        let worker_gate = Arc::clone(&gate);
        let handle = std::thread::spawn(move || {
            info!("homing steering unit");
            let outcome = match isu.home() {
                Ok(()) => {
                    let mut gate = lock(&worker_gate);
                    gate.decided = true;
                    if gate.cancelled {
                        info!("homing cancelled, leaving steering unit disabled");
                        HomingOutcome::Cancelled
                    } else {
                        match isu.enable() {
                            Ok(()) => HomingOutcome::Enabled,
                            Err(e) => HomingOutcome::Failed(e),
                        }
                    }
                }
                Err(e) => HomingOutcome::Failed(e),
            };
            let _ = sender.send(outcome);
        });
        self.receiver = Some(receiver);
        self.handle = Some(handle);
        self.gate = gate;
        self.restart = false;
        true
    }

    pub fn is_running(&self) -> bool {
        self.receiver.is_some()
    }

    /// Keep the running homing from enabling the unit.
    ///
    /// Call before stopping the unit.
    pub fn cancel(&mut self) {
        self.restart = false;
        if self.is_running() {
            lock(&self.gate).cancelled = true;
        }
    }

    /// Undo a [`HomingTask::cancel`] while homing is still running.
    ///
    /// If the thread has already skipped the enable, the run still ends
    /// [`HomingOutcome::Cancelled`] and [`HomingTask::take_restart`] reports
    /// that the operator asked for the unit again.
    pub fn resume(&mut self) {
        if !self.is_running() {
            return;
        }
        let mut gate = lock(&self.gate);
        if !gate.cancelled {
            return;
        }
        if gate.decided {
            self.restart = true;
        } else {
            gate.cancelled = false;
        }
    }

    /// Whether the unit was switched back on after a cancelled run.
    pub fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restart)
    }

    /// Result of a finished homing, if one finished since the last call.
    pub fn poll(&mut self) -> Option<HomingOutcome> {
        let receiver = self.receiver.as_ref()?;
        let outcome = match receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => HomingOutcome::Failed(lost_result()),
        };
        Some(self.finish(outcome))
    }

    /// Block until the running homing finishes or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> Option<HomingOutcome> {
        let receiver = self.receiver.as_ref()?;
        let outcome = match receiver.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => HomingOutcome::Failed(lost_result()),
        };
        Some(self.finish(outcome))
    }

    fn finish(&mut self, outcome: HomingOutcome) -> HomingOutcome {
        self.receiver = None;
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("homing thread panicked: {e:?}");
            }
        }
        // Enabled before a cancel landed; the canceller stopped the unit.
        if outcome == HomingOutcome::Enabled && lock(&self.gate).cancelled {
            return HomingOutcome::Cancelled;
        }
        outcome
    }
}

fn lost_result() -> IsuError {
    IsuError::Communication("homing task ended without a result".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware::isu::sim::SimulatedIsu;

    #[test]
    fn test_homing_enables_unit() {
        let isu = SimulatedIsu::new();
        let mut task = HomingTask::default();
        assert!(task.start(Arc::new(isu.clone())));
        assert_eq!(task.wait(Duration::from_secs(5)), Some(HomingOutcome::Enabled));
        assert!(!task.is_running());
        assert!(isu.is_enabled());
        assert_eq!(isu.home_calls(), 1);
    }

    #[test]
    fn test_duplicate_request_not_started() {
        let isu = SimulatedIsu::new().with_home_delay(Duration::from_millis(200));
        let mut task = HomingTask::default();
        assert!(task.start(Arc::new(isu.clone())));
        assert!(!task.start(Arc::new(isu.clone())));
        assert_eq!(task.poll(), None);

        assert_eq!(task.wait(Duration::from_secs(5)), Some(HomingOutcome::Enabled));
        assert_eq!(isu.home_calls(), 1);
    }

    #[test]
    fn test_homing_failure_reported() {
        let isu = SimulatedIsu::new();
        isu.set_fail_home(true);
        let mut task = HomingTask::default();
        task.start(Arc::new(isu.clone()));
        let result = task.wait(Duration::from_secs(5));
        assert!(matches!(
            result,
            Some(HomingOutcome::Failed(IsuError::Communication(_)))
        ));
        assert!(!isu.is_enabled());
    }

    #[test]
    fn test_cancel_leaves_unit_disabled() {
        let isu = SimulatedIsu::new().with_home_delay(Duration::from_millis(200));
        let mut task = HomingTask::default();
        task.start(Arc::new(isu.clone()));
        task.cancel();

        assert_eq!(
            task.wait(Duration::from_secs(5)),
            Some(HomingOutcome::Cancelled)
        );
        assert!(isu.is_homed().unwrap());
        assert!(!isu.is_enabled());
        assert!(!task.take_restart());
    }

    #[test]
    fn test_resume_before_enable_enables() {
        let isu = SimulatedIsu::new().with_home_delay(Duration::from_millis(200));
        let mut task = HomingTask::default();
        task.start(Arc::new(isu.clone()));
        task.cancel();
        task.resume();

        assert_eq!(
            task.wait(Duration::from_secs(5)),
            Some(HomingOutcome::Enabled)
        );
        assert!(isu.is_enabled());
        assert!(!task.take_restart());
    }

    #[test]
    fn test_resume_after_skipped_enable_requests_restart() {
        let isu = SimulatedIsu::new();
        let mut task = HomingTask::default();
        task.start(Arc::new(isu.clone()));
        task.cancel();
        // Let the thread reach its decision with the cancel in place
        while !lock(&task.gate).decided {
            std::thread::sleep(Duration::from_millis(1));
        }
        task.resume();

        let outcome = task.wait(Duration::from_secs(5));
        assert!(task.take_restart());
        // Depending on timing the cancel landed before or after the enable
        assert_eq!(outcome, Some(HomingOutcome::Cancelled));
    }

    #[test]
    fn test_cancel_without_task_is_noop() {
        let mut task = HomingTask::default();
        task.cancel();
        task.resume();
        assert!(!task.take_restart());
    }

    #[test]
    fn test_poll_without_task() {
        let mut task = HomingTask::default();
        assert_eq!(task.poll(), None);
    }
}
