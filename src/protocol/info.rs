use super::{Layout, Reader};
use crate::error::DecodeError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

/// CAN protocol choices of the communication protocol setting.
pub const CAN_PROTOCOLS: &[(u8, &str)] = &[
    (0x00, "PACE"),
    (0x01, "Pylon"),
    (0x02, "Growatt"),
    (0x03, "Victron"),
    (0x04, "Schneider"),
    (0x05, "LuxPower"),
    (0x06, "SoroTec"),
    (0x07, "SMA"),
    (0x08, "GoodWe"),
    (0x09, "Studer"),
    (0x0A, "Sofar"),
    (0x0B, "Must"),
    (0x0C, "Solis"),
    (0x0D, "DIDU"),
    (0x0E, "Senergy"),
    (0x0F, "TBB"),
    (0x10, "Pylon_V202"),
    (0x11, "Growatt_V109"),
    (0x12, "Must_V202"),
    (0x13, "Afore"),
    (0x14, "INVT"),
    (0x15, "FUJI"),
    (0x16, "Sofar_V21003"),
    (0xFF, "Empty"),
];

/// RS485 protocol choices of the communication protocol setting.
pub const RS485_PROTOCOLS: &[(u8, &str)] = &[
    (0x00, "PACE_Modbus"),
    (0x01, "Pylon"),
    (0x02, "Growatt"),
    (0x03, "Voltronic"),
    (0x04, "Schneider"),
    (0x05, "PHOCOS"),
    (0x06, "LuxPower"),
    (0x07, "Solar"),
    (0x08, "Lithium"),
    (0x09, "EP"),
    (0x0A, "RTU04"),
    (0x0B, "LuxPower_V01"),
    (0x0C, "LuxPower_V03"),
    (0x0D, "SRNE"),
    (0x0E, "LEOCH"),
    (0x0F, "Pylon_F"),
    (0x10, "Afore"),
    (0x11, "UPS_AGXN"),
    (0x12, "Orex_Sunpolo"),
    (0x13, "XIONGTAO"),
    (0x14, "RONGKE"),
    (0x15, "XINRUI"),
    (0x16, "ELTEK"),
    (0x17, "GT"),
    (0x18, "Leoch_V106"),
    (0xFF, "Empty"),
];

/// How the pack picks its protocols.
pub const PROTOCOL_TYPES: &[(u8, &str)] = &[(0x00, "Auto"), (0x01, "Manual"), (0xFF, "Empty")];

/// A raw option byte and its name, when the table knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub raw: u8,
    pub name: Option<&'static str>,
}

impl SelectOption {
    pub fn resolve(field: &'static str, table: &[(u8, &'static str)], raw: u8) -> Self {
        let name = table
            .iter()
            .find(|(value, _)| *value == raw)
            .map(|(_, name)| *name);
        if name.is_none() {
            log::warn!(
                "{}",
                DecodeError::UnknownField {
                    field,
                    raw: u32::from(raw)
                }
            );
        }
        Self { raw, name }
    }
}

impl fmt::Display for SelectOption {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "Unknown ({:#04X})", self.raw),
        }
    }
}

/// Communication protocol selection of a V25 pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolSettings {
    pub can: SelectOption,
    pub rs485: SelectOption,
    pub kind: SelectOption,
}

fn trim_padding(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .rposition(|b| *b != b' ' && *b != 0)
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&payload[..end]).trim_start().to_string()
}

/// Free-form text: runs of spaces collapse, non-printable bytes become `[decimal]`.
fn legible(payload: &[u8]) -> String {
    let mut text = String::new();
    let mut in_space = false;
    for byte in payload {
        if *byte == b' ' {
            if !in_space && !text.is_empty() {
                text.push(' ');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if byte.is_ascii_graphic() {
            text.push(char::from(*byte));
        } else {
            text.push_str(&format!("[{byte}]"));
        }
    }
    text.trim_end().to_string()
}

pub(crate) fn hardware_version(layout: Layout, payload: &[u8]) -> String {
    match layout {
        Layout::V25 => trim_padding(payload),
        Layout::V20 => legible(payload),
    }
}

pub(crate) fn serial_number(payload: &[u8]) -> String {
    if payload.len() != 20 && payload.len() != 40 {
        log::debug!("Serial number has an unusual length of {} bytes", payload.len());
    }
    trim_padding(payload)
}

pub(crate) fn date_time(layout: Layout, payload: &[u8]) -> Result<NaiveDateTime, DecodeError> {
    let expected = match layout {
        Layout::V25 => 6,
        Layout::V20 => 7,
    };
    if payload.len() < expected {
        return Err(DecodeError::UnexpectedLength {
            expected,
            received: payload.len(),
        });
    }
    let mut reader = Reader::new(payload);
    let year = match layout {
        Layout::V25 => reader.u8().map(|year| 2000 + i32::from(year)),
        Layout::V20 => reader.u16().map(i32::from),
    };
    let fields = (
        year,
        reader.u8(),
        reader.u8(),
        reader.u8(),
        reader.u8(),
        reader.u8(),
    );
    let (Some(year), Some(month), Some(day), Some(hour), Some(minute), Some(second)) = fields
    else {
        return Err(DecodeError::UnexpectedLength {
            expected,
            received: payload.len(),
        });
    };
    NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
        .and_then(|date| {
            date.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
        })
        .ok_or(DecodeError::UnknownField {
            field: "date_time",
            raw: u32::from_be_bytes([month, day, hour, minute]),
        })
}

pub(crate) fn protocols(payload: &[u8]) -> Result<ProtocolSettings, DecodeError> {
    let [can, rs485, kind] = payload else {
        return Err(DecodeError::UnexpectedLength {
            expected: 3,
            received: payload.len(),
        });
    };
    Ok(ProtocolSettings {
        can: SelectOption::resolve("can_protocol", CAN_PROTOCOLS, *can),
        rs485: SelectOption::resolve("rs485_protocol", RS485_PROTOCOLS, *rs485),
        kind: SelectOption::resolve("protocol_type", PROTOCOL_TYPES, *kind),
    })
}
