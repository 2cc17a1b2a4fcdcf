// Thorlabs APT binary protocol over the K-Cube's USB-serial port
//
// Header format (6 bytes, little-endian message id):
//   short: [id_lo, id_hi, param1, param2, dest, source]
//   long:  [id_lo, id_hi, len_lo, len_hi, dest | 0x80, source] followed by `len` data bytes

use serialport::{self, ClearBuffer, FlowControl, SerialPort};
use std::io::{Read, Write};
use std::thread::sleep;
use std::time::Duration;
use tracing::debug;

use super::gateway::{GatewayError, Result, SerialNumber};

/// Default serial configuration for K-Cube controllers
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Dwell before and after purging the port on open
const PURGE_DWELL: Duration = Duration::from_millis(50);

const HOST: u8 = 0x01;
const GENERIC_USB: u8 = 0x50;
const LONG_MESSAGE: u8 = 0x80;

/// Single-channel controllers address channel 1
pub const CHANNEL_1: u16 = 0x0001;

/// Unsolicited frames tolerated while waiting for a reply
const MAX_SKIPPED_FRAMES: usize = 16;

/// Motor status bits that mean the stage is moving
pub const STATUS_MOVING_CW: u32 = 0x0000_0010;
pub const STATUS_MOVING_CCW: u32 = 0x0000_0020;
pub const STATUS_JOGGING_CW: u32 = 0x0000_0040;
pub const STATUS_JOGGING_CCW: u32 = 0x0000_0080;
pub const STATUS_HOMING: u32 = 0x0000_0200;
const STATUS_IN_MOTION: u32 = STATUS_MOVING_CW
    | STATUS_MOVING_CCW
    | STATUS_JOGGING_CW
    | STATUS_JOGGING_CCW
    | STATUS_HOMING;

/// Message set used by the gateway
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageId {
    HwDisconnect = 0x0002,
    HwReqInfo = 0x0005,
    HwGetInfo = 0x0006,
    HwNoFlashProgramming = 0x0018,
    HwResponse = 0x0080,
    HwRichResponse = 0x0081,
    ModSetChanEnableState = 0x0210,
    MotReqPosCounter = 0x0411,
    MotGetPosCounter = 0x0412,
    MotSetVelParams = 0x0413,
    MotReqVelParams = 0x0414,
    MotGetVelParams = 0x0415,
    MotReqHomeParams = 0x0441,
    MotGetHomeParams = 0x0442,
    MotMoveHome = 0x0443,
    MotMoveAbsolute = 0x0453,
    MotReqStatusUpdate = 0x0480,
    MotGetStatusUpdate = 0x0481,
}

/// A decoded frame: message id, the two header parameters and any long-message data
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: u16,
    pub params: [u8; 2],
    pub data: Vec<u8>,
}

/// What a received header says about the rest of the frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub id: u16,
    pub params: [u8; 2],
    /// Number of data bytes following a long header, `None` for short messages
    pub data_len: Option<usize>,
}

/// Build a short (header-only) message
pub fn encode_short(id: MessageId, param1: u8, param2: u8) -> [u8; 6] {
    let [lo, hi] = (id as u16).to_le_bytes();
    [lo, hi, param1, param2, GENERIC_USB, HOST]
}

/// Build a long message: header with data length, then the data
pub fn encode_long(id: MessageId, data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + data.len());
    packet.extend_from_slice(&(id as u16).to_le_bytes());
    packet.extend_from_slice(&(data.len() as u16).to_le_bytes());
    packet.push(GENERIC_USB | LONG_MESSAGE);
    packet.push(HOST);
    packet.extend_from_slice(data);
    packet
}

pub fn decode_header(raw: &[u8; 6]) -> Header {
    let id = u16::from_le_bytes([raw[0], raw[1]]);
    let params = [raw[2], raw[3]];
    let data_len = if raw[4] & LONG_MESSAGE != 0 {
        Some(u16::from_le_bytes(params) as usize)
    } else {
        None
    };
    Header {
        id,
        params,
        data_len,
    }
}

/// Read a little-endian u16 from a frame's data
pub fn data_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn data_i32(data: &[u8], offset: usize) -> Option<i32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn data_u32(data: &[u8], offset: usize) -> Option<u32> {
    data_i32(data, offset).map(|v| v as u32)
}

/// Whether a status-update word reports motion of any kind
pub fn status_in_motion(status: u32) -> bool {
    status & STATUS_IN_MOTION != 0
}

/// Error code carried by an HW_RESPONSE / HW_RICHRESPONSE frame
fn response_code(frame: &Frame) -> u16 {
    if frame.id == MessageId::HwRichResponse as u16 {
        // [msg ident u16, code u16, notes...]
        data_u16(&frame.data, 2).unwrap_or_default()
    } else {
        u16::from_le_bytes(frame.params)
    }
}

/// One open K-Cube serial port
pub struct AptPort {
    port: Box<dyn SerialPort>,
    serial: SerialNumber,
}

/// A read that ran out the port timeout means the reply never came
fn read_error(e: std::io::Error, serial: SerialNumber, awaiting: MessageId) -> GatewayError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        GatewayError::Timeout {
            serial,
            message: awaiting as u16,
        }
    } else {
        GatewayError::Io(e)
    }
}

impl AptPort {
    /// Open the port belonging to a unit
    pub fn open(port_name: &str, serial: SerialNumber) -> Result<Self> {
        let mut port = serialport::new(port_name, DEFAULT_BAUDRATE)
            .flow_control(FlowControl::Hardware)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        sleep(PURGE_DWELL);
        port.clear(ClearBuffer::All)?;
        sleep(PURGE_DWELL);
        port.write_request_to_send(true)?;

        Ok(Self { port, serial })
    }

    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        self.port.write_all(packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Send a header-only message
    pub fn send_short(&mut self, id: MessageId, param1: u8, param2: u8) -> Result<()> {
        debug!(
            "APT -> {}: {:?} p1={} p2={}",
            self.serial, id, param1, param2
        );
        self.send_packet(&encode_short(id, param1, param2))
    }

    /// Send a message with a data block
    pub fn send_long(&mut self, id: MessageId, data: &[u8]) -> Result<()> {
        debug!("APT -> {}: {:?} {} data bytes", self.serial, id, data.len());
        self.send_packet(&encode_long(id, data))
    }

    fn read_frame(&mut self, awaiting: MessageId) -> Result<Frame> {
        let mut raw = [0u8; 6];
        self.port
            .read_exact(&mut raw)
            .map_err(|e| read_error(e, self.serial, awaiting))?;

        let header = decode_header(&raw);
        let mut data = vec![0u8; header.data_len.unwrap_or(0)];
        if !data.is_empty() {
            self.port
                .read_exact(&mut data)
                .map_err(|e| read_error(e, self.serial, awaiting))?;
        }

        Ok(Frame {
            id: header.id,
            params: header.params,
            data,
        })
    }

    /// Wait for a specific reply, skipping unsolicited traffic
    ///
    /// An error response from the controller ends the wait with its code.
    pub fn await_reply(&mut self, expected: MessageId) -> Result<Frame> {
        for _ in 0..MAX_SKIPPED_FRAMES {
            let frame = self.read_frame(expected)?;
            if frame.id == expected as u16 {
                return Ok(frame);
            }
            if frame.id == MessageId::HwRichResponse as u16
                || frame.id == MessageId::HwResponse as u16
            {
                return Err(GatewayError::Device {
                    serial: self.serial,
                    code: response_code(&frame),
                });
            }
            debug!(
                "APT <- {}: skipping unsolicited 0x{:04X} while awaiting {:?}",
                self.serial, frame.id, expected
            );
        }

        Err(GatewayError::InvalidResponse {
            serial: self.serial,
            reason: format!("no {:?} within {} frames", expected, MAX_SKIPPED_FRAMES),
        })
    }

    /// Request/reply for a channel-addressed short request
    pub fn request(&mut self, request: MessageId, reply: MessageId) -> Result<Frame> {
        self.send_short(request, CHANNEL_1 as u8, 0)?;
        let frame = self.await_reply(reply)?;
        debug!("APT <- {}: {:?} {} data bytes", self.serial, reply, frame.data.len());
        Ok(frame)
    }

    /// Fail with an `InvalidResponse` unless the reply carries at least `len` bytes
    pub fn expect_len(&self, frame: &Frame, len: usize) -> Result<()> {
        if frame.data.len() < len {
            return Err(GatewayError::InvalidResponse {
                serial: self.serial,
                reason: format!(
                    "0x{:04X}: expected {} data bytes, got {}",
                    frame.id,
                    len,
                    frame.data.len()
                ),
            });
        }
        Ok(())
    }
}
