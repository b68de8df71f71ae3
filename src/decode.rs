//! Register decoding for the three OBIS values we care about.
//!
//! The SML list entries are located by their object name; the value sits a
//! fixed distance behind it (status, time, unit and scaler are skipped
//! without interpretation).

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::frame::{Frame, END_MARKER, START_MARKER};
use crate::reading::Reading;

/// 1-0:1.8.1*255, energy import tariff 1
pub const ENERGY_NT_MARKER: [u8; 6] = [0x01, 0x00, 0x01, 0x08, 0x01, 0xFF];
/// 1-0:1.8.2*255, energy import tariff 2
pub const ENERGY_HT_MARKER: [u8; 6] = [0x01, 0x00, 0x01, 0x08, 0x02, 0xFF];
/// 1-0:16.7.0*255, current active power
pub const POWER_MARKER: [u8; 6] = [0x01, 0x00, 0x10, 0x07, 0x00, 0xFF];

/// Bytes between the end of an object name and its value
pub const VALUE_OFFSET: usize = 7;
pub const ENERGY_WIDTH: usize = 5;
pub const POWER_WIDTH: usize = 4;

const ENERGY_SCALE: f64 = 1e4;
const POWER_SCALE: f64 = 1e1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("marker {0} not present in frame")]
    MarkerNotFound(&'static str),
    #[error("value for {name} truncated: need {need} bytes at offset {offset}, frame has {len}")]
    Truncated {
        name: &'static str,
        offset: usize,
        need: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Register {
    pub name: &'static str,
    pub marker: [u8; 6],
    pub width: usize,
    pub scale: f64,
}

pub const ENERGY_NT: Register = Register {
    name: "energy_nt",
    marker: ENERGY_NT_MARKER,
    width: ENERGY_WIDTH,
    scale: ENERGY_SCALE,
};

pub const ENERGY_HT: Register = Register {
    name: "energy_ht",
    marker: ENERGY_HT_MARKER,
    width: ENERGY_WIDTH,
    scale: ENERGY_SCALE,
};

pub const POWER: Register = Register {
    name: "power",
    marker: POWER_MARKER,
    width: POWER_WIDTH,
    scale: POWER_SCALE,
};

/// Locate `register` in `frame` and return its scaled value.
pub fn decode_register(frame: &[u8], register: &Register) -> Result<f64, DecodeError> {
    let pos = find(frame, &register.marker).ok_or(DecodeError::MarkerNotFound(register.name))?;
    let offset = pos + register.marker.len() + VALUE_OFFSET;
    let raw = frame
        .get(offset..offset + register.width)
        .ok_or(DecodeError::Truncated {
            name: register.name,
            offset,
            need: register.width,
            len: frame.len(),
        })?;
    let value = raw.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok(value as f64 / register.scale)
}

/// Decode the three registers; a register that fails leaves its field empty.
pub fn decode(frame: &Frame, timestamp: DateTime<Utc>) -> Reading {
    let field = |register: &Register| match decode_register(frame.as_bytes(), register) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(register = register.name, error = %e, "register not decoded");
            None
        }
    };
    Reading::new(timestamp, field(&ENERGY_NT), field(&ENERGY_HT), field(&POWER))
}

/// Build a minimal frame carrying the given registers in the layout `decode` expects.
pub fn encode_frame(energy_nt: Option<f64>, energy_ht: Option<f64>, power: Option<f64>) -> Frame {
    let mut bytes = START_MARKER.to_vec();
    // SML open response header stand-in
    bytes.extend_from_slice(&[0x76, 0x05, 0x00, 0x00, 0x00, 0x01, 0x62, 0x00, 0x62, 0x00]);
    let mut push = |register: &Register, value: Option<f64>| {
        if let Some(v) = value {
            let raw = (v * register.scale).round() as u64;
            bytes.push(0x77);
            bytes.push(0x07);
            bytes.extend_from_slice(&register.marker);
            // status, val_time, unit, scaler
            bytes.extend_from_slice(&[0x65, 0x00, 0x00, 0x01, 0x82, 0x01, 0x62]);
            let be = raw.to_be_bytes();
            bytes.extend_from_slice(&be[be.len() - register.width..]);
            bytes.push(0x01);
        }
    };
    push(&ENERGY_NT, energy_nt);
    push(&ENERGY_HT, energy_ht);
    push(&POWER, power);
    bytes.extend_from_slice(&[0x00, 0x00]);
    bytes.extend_from_slice(&END_MARKER);
    Frame::from(bytes)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
