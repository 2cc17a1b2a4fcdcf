// Device Command Gateway: the narrow synchronous interface the core drives
//
// Every call is request/response and can fail. No call retries on its own;
// the transport underneath bounds how long a call may take.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique hardware identifier of a unit, assigned at enumeration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(pub u32);

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Velocity profile of a unit (mm/s, mm/s²)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityParams {
    pub min_velocity: f32,
    pub acceleration: f32,
    pub max_velocity: f32,
}

impl VelocityParams {
    pub fn new(min_velocity: f32, acceleration: f32, max_velocity: f32) -> Self {
        Self {
            min_velocity,
            acceleration,
            max_velocity,
        }
    }
}

/// Hardware-reported ceilings for the velocity profile
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityLimits {
    pub max_acceleration: f32,
    pub max_velocity: f32,
}

/// Homing routine parameters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HomeParams {
    pub direction: u16,
    pub limit_switch: u16,
    pub velocity: f32,
    pub offset: f32,
}

/// Error types for gateway calls
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for reply 0x{message:04X} from device {serial}")]
    Timeout { serial: SerialNumber, message: u16 },

    #[error("Device {serial} reported error code {code}")]
    Device { serial: SerialNumber, code: u16 },

    #[error("Invalid response from device {serial}: {reason}")]
    InvalidResponse {
        serial: SerialNumber,
        reason: String,
    },

    #[error("No unit at enumeration index {0}")]
    NoSuchIndex(usize),

    #[error("No open session for device {0}")]
    NotOpen(SerialNumber),

    /// Vendor status code, non-zero
    #[error("{0}")]
    Status(i32),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Synchronous command interface to a bank of motion controllers
///
/// Implementations are moved onto the initialization worker and handed back
/// to the polling loop once it finishes, hence the `Send` bound.
pub trait DeviceGateway: Send {
    /// Enumerate attached units, returning how many were found
    fn enumerate(&mut self) -> Result<usize>;

    /// Serial number of the unit at an enumeration index
    fn serial_of(&mut self, index: usize) -> Result<SerialNumber>;

    /// Open and initialize the communication session with a unit
    fn open_session(&mut self, serial: SerialNumber) -> Result<()>;

    fn home_params(&mut self, serial: SerialNumber) -> Result<HomeParams>;

    fn position(&mut self, serial: SerialNumber) -> Result<f32>;

    fn velocity_limits(&mut self, serial: SerialNumber) -> Result<VelocityLimits>;

    fn velocity_params(&mut self, serial: SerialNumber) -> Result<VelocityParams>;

    fn set_velocity_params(&mut self, serial: SerialNumber, params: VelocityParams) -> Result<()>;

    fn is_in_motion(&mut self, serial: SerialNumber) -> Result<bool>;

    /// Start a move to an absolute position; returns once the move is issued
    fn move_absolute(&mut self, serial: SerialNumber, position: f32) -> Result<()>;

    /// Start the homing routine; returns once the move is issued
    fn move_home(&mut self, serial: SerialNumber) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_is_surfaced_verbatim() {
        assert_eq!(GatewayError::Status(38).to_string(), "38");
        let err = GatewayError::Device {
            serial: SerialNumber(26000123),
            code: 10012,
        };
        assert_eq!(err.to_string(), "Device 26000123 reported error code 10012");
    }

    #[test]
    fn test_serial_number_serializes_as_plain_integer() {
        let json = serde_json::to_string(&SerialNumber(26000001)).unwrap();
        assert_eq!(json, "26000001");
    }
}
