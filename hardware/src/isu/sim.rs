//! Simulated steering unit.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::{Axis, AxisFaults, IsuError, IsuResult, SteeringUnit};

/// One recorded `slew` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlewRecord {
    pub axis: Axis,
    pub rate_hz: f64,
    pub from_mrad: f64,
    pub to_mrad: f64,
}

#[derive(Debug, Default)]
struct IsuState {
    homed: bool,
    enabled: bool,
    angles: (f64, f64),
    faults: AxisFaults,
    fail_home: bool,
    fail_enable: bool,
    home_calls: usize,
    slews: Vec<SlewRecord>,
}

/// In-memory mechanism. Slews complete instantly (or after a configured
/// delay) and leave the axis at the target angle.
#[derive(Debug, Clone, Default)]
pub struct SimulatedIsu {
    state: Arc<Mutex<IsuState>>,
    slew_delay: Duration,
    home_delay: Duration,
}

impl SimulatedIsu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make each slew block for `delay`.
    pub fn with_slew_delay(mut self, delay: Duration) -> Self {
        self.slew_delay = delay;
        self
    }

    pub fn with_home_delay(mut self, delay: Duration) -> Self {
        self.home_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, IsuState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_homed(&self, homed: bool) {
        self.lock().homed = homed;
    }

    pub fn set_faults(&self, faults: AxisFaults) {
        self.lock().faults = faults;
    }

    pub fn set_fail_home(&self, fail: bool) {
        self.lock().fail_home = fail;
    }

    pub fn set_fail_enable(&self, fail: bool) {
        self.lock().fail_enable = fail;
    }

    pub fn set_angles(&self, x: f64, y: f64) {
        self.lock().angles = (x, y);
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn home_calls(&self) -> usize {
        self.lock().home_calls
    }

    pub fn slews(&self) -> Vec<SlewRecord> {
        self.lock().slews.clone()
    }
}

impl SteeringUnit for SimulatedIsu {
    fn is_homed(&self) -> IsuResult<bool> {
        Ok(self.lock().homed)
    }

    fn home(&self) -> IsuResult<()> {
        self.lock().home_calls += 1;
        if !self.home_delay.is_zero() {
            std::thread::sleep(self.home_delay);
        }
        let mut state = self.lock();
        if state.fail_home {
            return Err(IsuError::Communication("homing failed".to_string()));
        }
        state.homed = true;
        state.angles = (0.0, 0.0);
        debug!("sim ISU homed");
        Ok(())
    }

    fn enable(&self) -> IsuResult<()> {
        let mut state = self.lock();
        if !state.homed {
            return Err(IsuError::NotHomed);
        }
        if state.fail_enable {
            return Err(IsuError::Communication("enable failed".to_string()));
        }
        state.enabled = true;
        Ok(())
    }

    fn stop(&self) -> IsuResult<()> {
        self.lock().enabled = false;
        Ok(())
    }

    fn check_faults(&self) -> IsuResult<AxisFaults> {
        Ok(self.lock().faults)
    }

    fn angles(&self) -> IsuResult<(f64, f64)> {
        Ok(self.lock().angles)
    }

    fn slew(&self, axis: Axis, rate_hz: f64, from_mrad: f64, to_mrad: f64) -> IsuResult<()> {
        if !self.slew_delay.is_zero() {
            std::thread::sleep(self.slew_delay);
        }
        let mut state = self.lock();
        if !state.enabled {
            return Err(IsuError::Communication("slew while disabled".to_string()));
        }
        match axis {
            Axis::X => state.angles.0 = to_mrad,
            Axis::Y => state.angles.1 = to_mrad,
        }
        state.slews.push(SlewRecord {
            axis,
            rate_hz,
            from_mrad,
            to_mrad,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_requires_homing() {
        let isu = SimulatedIsu::new();
        assert_eq!(isu.enable(), Err(IsuError::NotHomed));
        isu.home().unwrap();
        isu.enable().unwrap();
        assert!(isu.is_enabled());
    }

    #[test]
    fn test_slew_moves_axis() {
        let isu = SimulatedIsu::new();
        isu.set_homed(true);
        isu.enable().unwrap();

        isu.slew(Axis::Y, 50.0, 0.0, -0.25).unwrap();

        assert_eq!(isu.angles().unwrap(), (0.0, -0.25));
        assert_eq!(isu.slews().len(), 1);
        assert_eq!(isu.slews()[0].axis, Axis::Y);
    }

    #[test]
    fn test_clones_share_state() {
        let isu = SimulatedIsu::new();
        let other = isu.clone();
        other.set_faults(AxisFaults { x: true, y: false });
        assert_eq!(isu.check_faults().unwrap().first_fault(), Some(Axis::X));
    }
}
