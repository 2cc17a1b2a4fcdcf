// Device Command Gateway over USB-attached KST101 K-Cube stepper controllers
//
// Each cube enumerates as its own FTDI serial port whose USB serial number is
// the controller's serial number. Sessions are opened once and kept for the
// life of the gateway.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::apt::{self, AptPort, CHANNEL_1, MessageId};
use super::gateway::{
    DeviceGateway, GatewayError, HomeParams, Result, SerialNumber, VelocityLimits,
    VelocityParams,
};
use super::units::StageProfile;
use crate::config::{KST101_SERIAL_PREFIX, THORLABS_FTDI_VID};

/// A unit found during enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredUnit {
    pub serial: SerialNumber,
    pub port_name: String,
}

/// Gateway talking APT to real K-Cubes
pub struct KCubeGateway {
    profile: StageProfile,
    discovered: Vec<DiscoveredUnit>,
    sessions: HashMap<SerialNumber, AptPort>,
}

/// Pick the K-Cube ports out of a port listing, ordered by serial number
pub fn discover_units(ports: &[SerialPortInfo]) -> Vec<DiscoveredUnit> {
    let mut units: Vec<DiscoveredUnit> = ports
        .iter()
        .filter_map(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) if usb.vid == THORLABS_FTDI_VID => {
                let serial = usb.serial_number.as_deref()?;
                if !serial.starts_with(KST101_SERIAL_PREFIX) {
                    return None;
                }
                // FTDI sometimes appends a channel letter to the serial
                let digits: String = serial.chars().take_while(|c| c.is_ascii_digit()).collect();
                let serial = digits.parse().ok()?;
                Some(DiscoveredUnit {
                    serial: SerialNumber(serial),
                    port_name: p.port_name.clone(),
                })
            }
            _ => None,
        })
        .collect();

    units.sort_by_key(|u| u.serial);
    units.dedup_by_key(|u| u.serial);
    units
}

impl KCubeGateway {
    pub fn new(profile: StageProfile) -> Self {
        Self {
            profile,
            discovered: Vec::new(),
            sessions: HashMap::new(),
        }
    }

    fn session(&mut self, serial: SerialNumber) -> Result<&mut AptPort> {
        self.sessions
            .get_mut(&serial)
            .ok_or(GatewayError::NotOpen(serial))
    }
}

impl DeviceGateway for KCubeGateway {
    fn enumerate(&mut self) -> Result<usize> {
        let ports = serialport::available_ports()?;
        self.discovered = discover_units(&ports);
        info!(
            "Found {} K-Cube(s) among {} serial port(s)",
            self.discovered.len(),
            ports.len()
        );
        Ok(self.discovered.len())
    }

    fn serial_of(&mut self, index: usize) -> Result<SerialNumber> {
        self.discovered
            .get(index)
            .map(|u| u.serial)
            .ok_or(GatewayError::NoSuchIndex(index))
    }

    fn open_session(&mut self, serial: SerialNumber) -> Result<()> {
        let unit = self
            .discovered
            .iter()
            .find(|u| u.serial == serial)
            .ok_or(GatewayError::NotOpen(serial))?;

        info!("Opening K-Cube {} on {}", serial, unit.port_name);
        let mut port = AptPort::open(&unit.port_name, serial)?;

        // Confirm the port really belongs to this unit
        port.send_short(MessageId::HwReqInfo, 0, 0)?;
        let info = port.await_reply(MessageId::HwGetInfo)?;
        port.expect_len(&info, 4)?;
        let reported = apt::data_u32(&info.data, 0).unwrap_or_default();
        if reported != serial.0 {
            return Err(GatewayError::InvalidResponse {
                serial,
                reason: format!("unit reports serial {}", reported),
            });
        }

        port.send_short(MessageId::HwNoFlashProgramming, 0, 0)?;
        port.send_short(MessageId::ModSetChanEnableState, CHANNEL_1 as u8, 0x01)?;

        self.sessions.insert(serial, port);
        debug!("K-Cube {} session ready", serial);
        Ok(())
    }

    fn home_params(&mut self, serial: SerialNumber) -> Result<HomeParams> {
        let scaling = self.profile.scaling;
        let port = self.session(serial)?;
        let frame = port.request(MessageId::MotReqHomeParams, MessageId::MotGetHomeParams)?;
        port.expect_len(&frame, 14)?;

        // [chan, direction, limit switch, velocity, offset]
        Ok(HomeParams {
            direction: apt::data_u16(&frame.data, 2).unwrap_or_default(),
            limit_switch: apt::data_u16(&frame.data, 4).unwrap_or_default(),
            velocity: scaling.velocity_from_counts(apt::data_i32(&frame.data, 6).unwrap_or_default()),
            offset: scaling.position_from_counts(apt::data_i32(&frame.data, 10).unwrap_or_default()),
        })
    }

    fn position(&mut self, serial: SerialNumber) -> Result<f32> {
        let scaling = self.profile.scaling;
        let port = self.session(serial)?;
        let frame = port.request(MessageId::MotReqPosCounter, MessageId::MotGetPosCounter)?;
        port.expect_len(&frame, 6)?;
        Ok(scaling.position_from_counts(apt::data_i32(&frame.data, 2).unwrap_or_default()))
    }

    fn velocity_limits(&mut self, serial: SerialNumber) -> Result<VelocityLimits> {
        // The protocol has no limits message; the ceilings come from the stage profile
        self.session(serial)?;
        Ok(self.profile.limits)
    }

    fn velocity_params(&mut self, serial: SerialNumber) -> Result<VelocityParams> {
        let scaling = self.profile.scaling;
        let port = self.session(serial)?;
        let frame = port.request(MessageId::MotReqVelParams, MessageId::MotGetVelParams)?;
        port.expect_len(&frame, 14)?;

        // [chan, min velocity, acceleration, max velocity]
        Ok(VelocityParams {
            min_velocity: scaling.velocity_from_counts(apt::data_i32(&frame.data, 2).unwrap_or_default()),
            acceleration: scaling.acceleration_from_counts(apt::data_i32(&frame.data, 6).unwrap_or_default()),
            max_velocity: scaling.velocity_from_counts(apt::data_i32(&frame.data, 10).unwrap_or_default()),
        })
    }

    fn set_velocity_params(&mut self, serial: SerialNumber, params: VelocityParams) -> Result<()> {
        let scaling = self.profile.scaling;
        let mut data = CHANNEL_1.to_le_bytes().to_vec();
        data.extend_from_slice(&scaling.velocity_to_counts(params.min_velocity).to_le_bytes());
        data.extend_from_slice(&scaling.acceleration_to_counts(params.acceleration).to_le_bytes());
        data.extend_from_slice(&scaling.velocity_to_counts(params.max_velocity).to_le_bytes());

        self.session(serial)?.send_long(MessageId::MotSetVelParams, &data)
    }

    fn is_in_motion(&mut self, serial: SerialNumber) -> Result<bool> {
        let port = self.session(serial)?;
        let frame = port.request(MessageId::MotReqStatusUpdate, MessageId::MotGetStatusUpdate)?;
        // [chan, position, encoder count, status bits]
        port.expect_len(&frame, 14)?;
        let status = apt::data_u32(&frame.data, 10).unwrap_or_default();
        Ok(apt::status_in_motion(status))
    }

    fn move_absolute(&mut self, serial: SerialNumber, position: f32) -> Result<()> {
        let counts = self.profile.scaling.position_to_counts(position);
        let mut data = CHANNEL_1.to_le_bytes().to_vec();
        data.extend_from_slice(&counts.to_le_bytes());

        debug!("K-Cube {}: move to {} ({} counts)", serial, position, counts);
        self.session(serial)?.send_long(MessageId::MotMoveAbsolute, &data)
    }

    fn move_home(&mut self, serial: SerialNumber) -> Result<()> {
        self.session(serial)?
            .send_short(MessageId::MotMoveHome, CHANNEL_1 as u8, 0)
    }
}

impl Drop for KCubeGateway {
    fn drop(&mut self) {
        for (serial, port) in self.sessions.iter_mut() {
            if let Err(e) = port.send_short(MessageId::HwDisconnect, 0, 0) {
                warn!("Failed to disconnect K-Cube {}: {}", serial, e);
            }
        }
    }
}
