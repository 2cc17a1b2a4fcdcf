// Simulated bank of K-Cube units
//
// Used for headless runs (`--simulate N`) and as the gateway double in
// tests. Parameter writes take effect immediately; moves take a fixed number
// of motion-status polls to complete. Faults are injected per operation as
// non-zero vendor status codes. Tests turn on the call log with
// `recording()`; headless runs leave it off so nothing accumulates.

use std::collections::HashMap;
use std::thread::sleep;
use std::time::Duration;

use super::gateway::{
    DeviceGateway, GatewayError, HomeParams, Result, SerialNumber, VelocityLimits,
    VelocityParams,
};
use super::units::StageProfile;

/// First serial handed out to simulated units
pub const FIRST_SIM_SERIAL: u32 = 26_000_001;

/// Motion-status polls a simulated move takes
pub const DEFAULT_MOVE_POLLS: u32 = 3;

/// Gateway operations, used to target faults and to read the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Enumerate,
    SerialOf,
    OpenSession,
    HomeParams,
    Position,
    VelocityLimits,
    VelocityParams,
    SetVelocityParams,
    InMotion,
    MoveAbsolute,
    MoveHome,
}

/// One logged gateway call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Call {
    pub op: Operation,
    pub serial: Option<SerialNumber>,
}

#[derive(Debug, Clone)]
struct SimUnit {
    serial: SerialNumber,
    open: bool,
    position: f32,
    target: f32,
    polls_left: u32,
    velocity: VelocityParams,
    limits: VelocityLimits,
    home: HomeParams,
}

#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    units: Vec<SimUnit>,
    enumerated: usize,
    move_polls: u32,
    enumeration_fault: Option<i32>,
    enumeration_override: Option<usize>,
    enumeration_delay: Option<Duration>,
    /// Faults keyed by operation and serial; `None` hits every unit
    faults: HashMap<(Operation, Option<SerialNumber>), i32>,
    recording: bool,
    calls: Vec<Call>,
}

impl SimulatedGateway {
    /// A bank of `count` idle units at position 0 with the given stage limits
    pub fn new(count: usize, profile: StageProfile) -> Self {
        let units = (0..count)
            .map(|i| SimUnit {
                serial: SerialNumber(FIRST_SIM_SERIAL + i as u32),
                open: false,
                position: 0.0,
                target: 0.0,
                polls_left: 0,
                velocity: VelocityParams::new(0.0, 1.5, 1.0),
                limits: profile.limits,
                home: HomeParams {
                    direction: 2,
                    limit_switch: 1,
                    velocity: 1.0,
                    offset: 0.1,
                },
            })
            .collect();

        Self {
            units,
            enumerated: 0,
            move_polls: DEFAULT_MOVE_POLLS,
            enumeration_fault: None,
            enumeration_override: None,
            enumeration_delay: None,
            faults: HashMap::new(),
            recording: false,
            calls: Vec::new(),
        }
    }

    pub fn with_move_polls(mut self, polls: u32) -> Self {
        self.move_polls = polls;
        self
    }

    /// Log every gateway call for later inspection
    pub fn recording(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Make `enumerate` fail with a status code
    pub fn fail_enumeration(&mut self, code: i32) {
        self.enumeration_fault = Some(code);
    }

    /// Report `count` units from `enumerate` regardless of how many exist
    ///
    /// Indices past the real units fail in `serial_of`.
    pub fn override_enumeration(&mut self, count: usize) {
        self.enumeration_override = Some(count);
    }

    /// Block inside `enumerate` like a hung USB stack
    pub fn stall_enumeration(&mut self, delay: Duration) {
        self.enumeration_delay = Some(delay);
    }

    /// Make `op` fail with `code` for one unit, or for all units when `serial` is `None`
    pub fn inject_fault(&mut self, op: Operation, serial: Option<SerialNumber>, code: i32) {
        self.faults.insert((op, serial), code);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
        self.enumeration_fault = None;
        self.enumeration_override = None;
    }

    /// Serial of the simulated unit at an index
    pub fn serial_at(&self, index: usize) -> SerialNumber {
        SerialNumber(FIRST_SIM_SERIAL + index as u32)
    }

    pub fn set_position(&mut self, serial: SerialNumber, position: f32) {
        if let Some(u) = self.units.iter_mut().find(|u| u.serial == serial) {
            u.position = position;
            u.target = position;
        }
    }

    pub fn set_velocity(&mut self, serial: SerialNumber, params: VelocityParams) {
        if let Some(u) = self.units.iter_mut().find(|u| u.serial == serial) {
            u.velocity = params;
        }
    }

    /// Start a move on a unit outside of the gateway interface
    pub fn start_motion(&mut self, serial: SerialNumber, target: f32) {
        let polls = self.move_polls.max(1);
        if let Some(u) = self.units.iter_mut().find(|u| u.serial == serial) {
            u.target = target;
            u.polls_left = polls;
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Logged calls of one operation
    pub fn count(&self, op: Operation) -> usize {
        self.calls.iter().filter(|c| c.op == op).count()
    }

    /// Logged calls of one operation against one unit
    pub fn count_for(&self, op: Operation, serial: SerialNumber) -> usize {
        self.calls
            .iter()
            .filter(|c| c.op == op && c.serial == Some(serial))
            .count()
    }

    fn log(&mut self, op: Operation, serial: Option<SerialNumber>) {
        if self.recording {
            self.calls.push(Call { op, serial });
        }
    }

    /// Log the call and return the injected fault, if any
    fn enter(&mut self, op: Operation, serial: SerialNumber) -> Result<()> {
        self.log(op, Some(serial));
        let code = self
            .faults
            .get(&(op, Some(serial)))
            .or_else(|| self.faults.get(&(op, None)));
        match code {
            Some(&code) => Err(GatewayError::Status(code)),
            None => Ok(()),
        }
    }

    fn unit(&mut self, serial: SerialNumber) -> Result<&mut SimUnit> {
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.serial == serial)
            .ok_or(GatewayError::NotOpen(serial))?;
        if !unit.open {
            return Err(GatewayError::NotOpen(serial));
        }
        Ok(unit)
    }
}

impl DeviceGateway for SimulatedGateway {
    fn enumerate(&mut self) -> Result<usize> {
        self.log(Operation::Enumerate, None);
        if let Some(delay) = self.enumeration_delay {
            sleep(delay);
        }
        if let Some(code) = self.enumeration_fault {
            return Err(GatewayError::Status(code));
        }
        self.enumerated = self.enumeration_override.unwrap_or(self.units.len());
        Ok(self.enumerated)
    }

    fn serial_of(&mut self, index: usize) -> Result<SerialNumber> {
        if index >= self.enumerated {
            return Err(GatewayError::NoSuchIndex(index));
        }
        let serial = self
            .units
            .get(index)
            .map(|u| u.serial)
            .ok_or(GatewayError::NoSuchIndex(index))?;
        self.enter(Operation::SerialOf, serial)?;
        Ok(serial)
    }

    fn open_session(&mut self, serial: SerialNumber) -> Result<()> {
        self.enter(Operation::OpenSession, serial)?;
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.serial == serial)
            .ok_or(GatewayError::NotOpen(serial))?;
        unit.open = true;
        Ok(())
    }

    fn home_params(&mut self, serial: SerialNumber) -> Result<HomeParams> {
        self.enter(Operation::HomeParams, serial)?;
        Ok(self.unit(serial)?.home)
    }

    fn position(&mut self, serial: SerialNumber) -> Result<f32> {
        self.enter(Operation::Position, serial)?;
        Ok(self.unit(serial)?.position)
    }

    fn velocity_limits(&mut self, serial: SerialNumber) -> Result<VelocityLimits> {
        self.enter(Operation::VelocityLimits, serial)?;
        Ok(self.unit(serial)?.limits)
    }

    fn velocity_params(&mut self, serial: SerialNumber) -> Result<VelocityParams> {
        self.enter(Operation::VelocityParams, serial)?;
        Ok(self.unit(serial)?.velocity)
    }

    fn set_velocity_params(&mut self, serial: SerialNumber, params: VelocityParams) -> Result<()> {
        self.enter(Operation::SetVelocityParams, serial)?;
        self.unit(serial)?.velocity = params;
        Ok(())
    }

    fn is_in_motion(&mut self, serial: SerialNumber) -> Result<bool> {
        self.enter(Operation::InMotion, serial)?;
        let unit = self.unit(serial)?;
        if unit.polls_left == 0 {
            return Ok(false);
        }
        unit.polls_left -= 1;
        if unit.polls_left == 0 {
            unit.position = unit.target;
        }
        Ok(true)
    }

    fn move_absolute(&mut self, serial: SerialNumber, position: f32) -> Result<()> {
        self.enter(Operation::MoveAbsolute, serial)?;
        let polls = self.move_polls.max(1);
        let unit = self.unit(serial)?;
        unit.target = position;
        unit.polls_left = polls;
        Ok(())
    }

    fn move_home(&mut self, serial: SerialNumber) -> Result<()> {
        self.enter(Operation::MoveHome, serial)?;
        let polls = self.move_polls.max(1);
        let unit = self.unit(serial)?;
        unit.target = 0.0;
        unit.polls_left = polls;
        Ok(())
    }
}
