//! Simulated Raptor camera controller.
//!
//! Implements [`SerialLink`] directly: every written frame is decoded and
//! answered the way the camera answers it, with responses queued for the
//! following reads. A cloneable [`SimulatedRaptorHandle`] lets tests inspect
//! registers and inject faults after the link has been moved into a driver.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use super::checksum::{compute_checksum, verify_checksum_bytes};
use super::protocol::{CMD_READ, CMD_WRITE, DEVICE_SELECT, ETX};
use super::registers::{
    ManufacturingData, TwoPoint, MANUFACTURING_READ, MANUFACTURING_SELECT, SENSOR_TEMPERATURE,
    TEC_SETPOINT,
};
use super::transport::SerialLink;

const STATUS_REQUEST: [u8; 3] = [0x49, 0x50, 0x19];
const SET_STATUS: [u8; 4] = [0x4f, 0x53, 0x50, 0x4c];

/// Calibration used unless a test supplies its own.
pub const DEFAULT_MANUFACTURING: ManufacturingData = ManufacturingData {
    adc: TwoPoint { at0: 1600, at40: 2400 },
    dac: TwoPoint { at0: 2600, at40: 1800 },
};

#[derive(Debug)]
struct SimState {
    registers: [u8; 256],
    read_address: u8,
    manufacturing: ManufacturingData,
    unresponsive: bool,
    corrupt_acks: bool,
    bad_status: bool,
    frames_received: usize,
}

/// Cloneable control surface for a [`SimulatedRaptor`].
#[derive(Debug, Clone)]
pub struct SimulatedRaptorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRaptorHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop answering any frame.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.lock().unresponsive = unresponsive;
    }

    /// Answer writes with an acknowledgement carrying the wrong checksum.
    pub fn set_corrupt_acks(&self, corrupt: bool) {
        self.lock().corrupt_acks = corrupt;
    }

    /// Answer the set-status frame with something other than `50 4c`.
    pub fn set_bad_status(&self, bad: bool) {
        self.lock().bad_status = bad;
    }

    pub fn register(&self, address: u8) -> u8 {
        self.lock().registers[usize::from(address)]
    }

    pub fn set_register(&self, address: u8, value: u8) {
        self.lock().registers[usize::from(address)] = value;
    }

    pub fn frames_received(&self) -> usize {
        self.lock().frames_received
    }
}

/// In-memory Raptor controller behind a [`SerialLink`].
#[derive(Debug)]
pub struct SimulatedRaptor {
    state: Arc<Mutex<SimState>>,
    pending: VecDeque<u8>,
}

impl Default for SimulatedRaptor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRaptor {
    pub fn new() -> Self {
        Self::with_manufacturing(DEFAULT_MANUFACTURING)
    }

    pub fn with_manufacturing(manufacturing: ManufacturingData) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                registers: [0u8; 256],
                read_address: 0,
                manufacturing,
                unresponsive: false,
                corrupt_acks: false,
                bad_status: false,
                frames_received: 0,
            })),
            pending: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> SimulatedRaptorHandle {
        SimulatedRaptorHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn respond(&mut self, frame: &[u8]) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frames_received += 1;
        if state.unresponsive {
            return;
        }

        if frame == STATUS_REQUEST {
            return;
        }
        if frame == SET_STATUS {
            let reply: &[u8] = if state.bad_status { &[0x51] } else { &[ETX, 0x4c] };
            self.pending.extend(reply);
            return;
        }
        if frame == MANUFACTURING_SELECT {
            self.pending.extend([ETX, 0xab]);
            return;
        }
        if frame == MANUFACTURING_READ {
            self.pending.extend(state.manufacturing.to_block());
            return;
        }
        if !verify_checksum_bytes(frame) || frame.first() != Some(&DEVICE_SELECT) {
            trace!("sim raptor ignoring frame {frame:02x?}");
            return;
        }

        let checksum = frame[frame.len() - 1];
        let ack_checksum = if state.corrupt_acks {
            checksum ^ 0xff
        } else {
            checksum
        };

        match frame {
            [_, CMD_WRITE, 0x02, address, value, ETX, _] => {
                state.registers[usize::from(*address)] = *value;
                self.pending.extend([ETX, ack_checksum]);
            }
            [_, CMD_WRITE, 0x01, address, ETX, _] => {
                state.read_address = *address;
                self.pending.extend([ETX, ack_checksum]);
            }
            [_, CMD_READ, 0x01, ETX, _] => {
                let value = read_value(&state, state.read_address);
                self.pending
                    .extend([value, ETX, compute_checksum(&[value, ETX])]);
            }
            _ => trace!("sim raptor unknown frame {frame:02x?}"),
        }
    }
}

/// Register value, with the sensor temperature tracking the TEC setpoint.
fn read_value(state: &SimState, address: u8) -> u8 {
    let [temp_msb, temp_lsb] = [SENSOR_TEMPERATURE.addresses[0], SENSOR_TEMPERATURE.addresses[1]];
    if address != temp_msb && address != temp_lsb {
        return state.registers[usize::from(address)];
    }

    let dac_counts = (u32::from(state.registers[usize::from(TEC_SETPOINT.addresses[0])]) << 8)
        | u32::from(state.registers[usize::from(TEC_SETPOINT.addresses[1])]);
    let setpoint = state.manufacturing.dac.to_physical(dac_counts);
    let adc_counts = state
        .manufacturing
        .adc
        .to_raw(&SENSOR_TEMPERATURE, setpoint)
        .unwrap_or(0);

    if address == temp_msb {
        (adc_counts >> 8) as u8
    } else {
        adc_counts as u8
    }
}

impl SerialLink for SimulatedRaptor {
    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }

    fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.respond(bytes);
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
