//! Write requests for configuration registers, switches, selects, date/time and buttons.
//!
//! Every writable value is a [`Target`] in one declarative table. Numeric targets carry
//! their range, step, scale and offset, and the register group they live in. A group
//! holding more than one value is written as read-modify-write: the builder returns a
//! [`WritePlan::ReadModifyWrite`] whose [`Patch`] is applied to the group read back from
//! the pack.
//!
//! # Example
//!
//! ```
//! use pacebms_lib::command::{CommandBuilder, WritePlan};
//! use pacebms_lib::frame::{Chemistry, ProtocolVersion};
//! use pacebms_lib::protocol::Endpoint;
//!
//! let endpoint = Endpoint::new(ProtocolVersion::V25, 0, Chemistry::LithiumIron).unwrap();
//! let builder = CommandBuilder::new(&endpoint);
//! let plan = builder.build("cell_over_voltage_protection", 3.0.into()).unwrap();
//! let WritePlan::ReadModifyWrite { read, patch } = plan else { unreachable!() };
//! assert_eq!(read.cid2, 0xD1);
//! let write = patch.apply(&[0x01, 0x0E, 0x10, 0x0E, 0x74, 0x0D, 0x34, 0x0A]).unwrap();
//! assert_eq!(write.payload, vec![0x01, 0x0E, 0x10, 0x01, 0x2C, 0x0D, 0x34, 0x0A]);
//! ```

use crate::error::{DecodeError, ValidationError};
use crate::protocol::{
    Endpoint, Layout, Request, CAN_PROTOCOLS, PROTOCOL_TYPES, RS485_PROTOCOLS,
};
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;
use std::fmt;

type Result<T> = std::result::Result<T, ValidationError>;

const EPSILON: f64 = 1e-6;

/// A value handed to [`CommandBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Switch(bool),
    Option(String),
    DateTime(NaiveDateTime),
    Press,
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Switch(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Option(value.to_string())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

/// A configuration register group: read and write command codes and the byte layout of
/// the writable part.
#[derive(Debug, PartialEq, Eq)]
pub struct Group {
    pub read: u8,
    pub write: u8,
    /// Bytes written back. A longer read back is cut to this length.
    pub len: usize,
    /// Offsets of u16 fields that read back as negative numbers and are written as magnitudes.
    pub magnitudes: &'static [usize],
    /// Offset of a byte that carries the pack address.
    pub address_field: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Width {
    U8,
    U16,
}

impl Width {
    fn max(self) -> f64 {
        match self {
            Width::U8 => f64::from(u8::MAX),
            Width::U16 => f64::from(u16::MAX),
        }
    }
}

/// A numeric register field. `raw = value * scale + offset`.
#[derive(Debug, PartialEq)]
pub struct Number {
    pub group: &'static Group,
    pub field: usize,
    pub width: Width,
    pub scale: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub unit: &'static str,
}

/// Where a select option byte goes.
#[derive(Debug, PartialEq)]
pub enum SelectBinding {
    /// Sent as the payload of `cid2`.
    Command { cid2: u8 },
    /// Patched into a register group.
    Field {
        group: &'static Group,
        field: usize,
    },
}

#[derive(Debug, PartialEq)]
pub enum TargetKind {
    Number(Number),
    /// Payload byte sent with `cid2` for on and off.
    Switch { cid2: u8, on: u8, off: u8 },
    Select {
        binding: SelectBinding,
        options: &'static [(u8, &'static str)],
    },
    DateTime,
    Button,
}

/// One writable value.
#[derive(Debug, PartialEq)]
pub struct Target {
    pub id: &'static str,
    pub kind: TargetKind,
    /// Only a few targets exist on the V20 layout.
    pub legacy: bool,
}

impl Target {
    pub fn supports(&self, layout: Layout) -> bool {
        layout == Layout::V25 || self.legacy
    }

    /// Parses text into a value of the kind this target expects.
    ///
    /// Numbers for numeric targets, `on`/`off` for switches, an option name for selects,
    /// `now` or an RFC 3339 time for date/time, and anything for buttons.
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        let wrong_kind = |expected| ValidationError::WrongValueKind {
            target: self.id.to_string(),
            expected,
        };
        match &self.kind {
            TargetKind::Number(_) => text
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| wrong_kind("number")),
            TargetKind::Switch { .. } => match text.trim().to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Ok(Value::Switch(true)),
                "off" | "false" | "0" => Ok(Value::Switch(false)),
                _ => Err(wrong_kind("on/off")),
            },
            TargetKind::Select { .. } => Ok(Value::Option(text.trim().to_string())),
            TargetKind::DateTime => {
                if text.trim().eq_ignore_ascii_case("now") {
                    Ok(Value::DateTime(chrono::Local::now().naive_local()))
                } else {
                    chrono::DateTime::parse_from_rfc3339(text.trim())
                        .map(|time| Value::DateTime(time.naive_local()))
                        .or_else(|_| {
                            NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%dT%H:%M:%S")
                                .map(Value::DateTime)
                        })
                        .map_err(|_| wrong_kind("date/time"))
                }
            }
            TargetKind::Button => Ok(Value::Press),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            TargetKind::Number(number) => write!(
                f,
                "{}: number [{}, {}] step {} {}",
                self.id, number.min, number.max, number.step, number.unit
            ),
            TargetKind::Switch { .. } => write!(f, "{}: switch on/off", self.id),
            TargetKind::Select { options, .. } => {
                let names: Vec<&str> = options.iter().map(|(_, name)| *name).collect();
                write!(f, "{}: select {}", self.id, names.join("|"))
            }
            TargetKind::DateTime => write!(f, "{}: date/time", self.id),
            TargetKind::Button => write!(f, "{}: button", self.id),
        }
    }
}

/// What the scheduler has to do to carry out a write.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    Direct(Request),
    ReadModifyWrite { read: Request, patch: Patch },
}

/// One field to patch into a group that was read back from the pack.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    group: &'static Group,
    field: usize,
    bytes: Vec<u8>,
    address: u8,
}

impl Patch {
    /// Builds the write request from the current group payload.
    ///
    /// # Returns
    ///
    /// The write request, or [`DecodeError::UnexpectedLength`] when the read back is shorter
    /// than the group.
    pub fn apply(&self, current: &[u8]) -> std::result::Result<Request, DecodeError> {
        let group = self.group;
        if current.len() < group.len {
            return Err(DecodeError::UnexpectedLength {
                expected: group.len,
                received: current.len(),
            });
        }
        if current.len() > group.len {
            log::debug!(
                "Ignoring {} extra bytes of group {:#04X}",
                current.len() - group.len,
                group.read
            );
        }
        let mut payload = current[..group.len].to_vec();
        for offset in group.magnitudes {
            let value = i16::from_be_bytes([payload[*offset], payload[offset + 1]]);
            payload[*offset..offset + 2].copy_from_slice(&value.unsigned_abs().to_be_bytes());
        }
        if let Some(offset) = group.address_field {
            payload[offset] = self.address;
        }
        payload[self.field..self.field + self.bytes.len()].copy_from_slice(&self.bytes);
        Ok(Request::new(group.write, payload))
    }
}

/// Builds write plans for one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder {
    layout: Layout,
    address: u8,
}

impl CommandBuilder {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            layout: endpoint.layout(),
            address: endpoint.address,
        }
    }

    /// Targets available under the active protocol version.
    pub fn supported_targets(&self) -> impl Iterator<Item = &'static Target> + '_ {
        TARGETS.iter().filter(|target| target.supports(self.layout))
    }

    pub fn target(&self, id: &str) -> Result<&'static Target> {
        TARGETS
            .iter()
            .find(|target| target.id == id && target.supports(self.layout))
            .ok_or_else(|| ValidationError::UnsupportedTarget(id.to_string()))
    }

    /// Validates `value` for `target` and builds the plan to write it.
    ///
    /// Nothing is encoded unless the value is within the declared range and on the declared
    /// step.
    pub fn build(&self, target: &str, value: Value) -> Result<WritePlan> {
        let target = self.target(target)?;
        let result = self.plan(target, value);
        if let Err(err) = &result {
            log::warn!("Rejected write: {err}");
        }
        result
    }

    fn plan(&self, target: &'static Target, value: Value) -> Result<WritePlan> {
        let wrong_kind = |expected| ValidationError::WrongValueKind {
            target: target.id.to_string(),
            expected,
        };
        match (&target.kind, value) {
            (TargetKind::Number(number), Value::Number(value)) => {
                let bytes = encode_number(target.id, number, value)?;
                Ok(self.patch_plan(number.group, number.field, bytes))
            }
            (TargetKind::Number(_), _) => Err(wrong_kind("number")),
            (TargetKind::Switch { cid2, on, off }, Value::Switch(state)) => Ok(WritePlan::Direct(
                Request::new(*cid2, vec![if state { *on } else { *off }]),
            )),
            (TargetKind::Switch { .. }, _) => Err(wrong_kind("on/off")),
            (TargetKind::Select { binding, options }, Value::Option(name)) => {
                let raw = options
                    .iter()
                    .find(|(_, option)| option.eq_ignore_ascii_case(&name))
                    .map(|(raw, _)| *raw)
                    .ok_or_else(|| ValidationError::UnknownOption {
                        target: target.id.to_string(),
                        option: name.clone(),
                    })?;
                Ok(match binding {
                    SelectBinding::Command { cid2 } => {
                        WritePlan::Direct(Request::new(*cid2, vec![raw]))
                    }
                    SelectBinding::Field { group, field } => {
                        self.patch_plan(*group, *field, vec![raw])
                    }
                })
            }
            (TargetKind::Select { .. }, _) => Err(wrong_kind("option")),
            (TargetKind::DateTime, Value::DateTime(time)) => self.date_time(target.id, time),
            (TargetKind::DateTime, _) => Err(wrong_kind("date/time")),
            (TargetKind::Button, Value::Press) => Ok(WritePlan::Direct(self.shutdown())),
            (TargetKind::Button, _) => Err(wrong_kind("press")),
        }
    }

    fn patch_plan(&self, group: &'static Group, field: usize, bytes: Vec<u8>) -> WritePlan {
        // a group made of this one field needs no read back
        if group.len == bytes.len() && group.address_field.is_none() {
            return WritePlan::Direct(Request::new(group.write, bytes));
        }
        WritePlan::ReadModifyWrite {
            read: Request::new(group.read, Vec::new()),
            patch: Patch {
                group,
                field,
                bytes,
                address: self.address,
            },
        }
    }

    fn date_time(&self, id: &str, time: NaiveDateTime) -> Result<WritePlan> {
        let fields = [
            time.month() as u8,
            time.day() as u8,
            time.hour() as u8,
            time.minute() as u8,
            time.second() as u8,
        ];
        let request = match self.layout {
            Layout::V25 => {
                let year = time.year();
                if !(2000..=2255).contains(&year) {
                    return Err(ValidationError::OutOfRange {
                        target: id.to_string(),
                        value: f64::from(year),
                        min: 2000.0,
                        max: 2255.0,
                    });
                }
                let mut payload = vec![(year - 2000) as u8];
                payload.extend_from_slice(&fields);
                Request::new(0xB2, payload)
            }
            Layout::V20 => {
                let year = u16::try_from(time.year()).map_err(|_| ValidationError::OutOfRange {
                    target: id.to_string(),
                    value: f64::from(time.year()),
                    min: 0.0,
                    max: f64::from(u16::MAX),
                })?;
                let mut payload = year.to_be_bytes().to_vec();
                payload.extend_from_slice(&fields);
                Request::new(0x4E, payload)
            }
        };
        Ok(WritePlan::Direct(request))
    }

    fn shutdown(&self) -> Request {
        match self.layout {
            Layout::V25 => Request::new(0x9C, vec![0x01]),
            Layout::V20 => Request::new(0x95, vec![self.address]),
        }
    }
}

fn encode_number(id: &str, number: &Number, value: f64) -> Result<Vec<u8>> {
    if !value.is_finite() || value < number.min - EPSILON || value > number.max + EPSILON {
        return Err(ValidationError::OutOfRange {
            target: id.to_string(),
            value,
            min: number.min,
            max: number.max,
        });
    }
    let steps = value / number.step;
    if (steps - steps.round()).abs() > EPSILON {
        return Err(ValidationError::BadStep {
            target: id.to_string(),
            value,
            step: number.step,
        });
    }
    let raw = (value * number.scale + number.offset).round();
    if raw < 0.0 || raw > number.width.max() {
        return Err(ValidationError::OutOfRange {
            target: id.to_string(),
            value,
            min: number.min,
            max: number.max,
        });
    }
    Ok(match number.width {
        Width::U8 => vec![raw as u8],
        Width::U16 => (raw as u16).to_be_bytes().to_vec(),
    })
}

macro_rules! group {
    ($read:expr, $write:expr, $len:expr) => {
        Group {
            read: $read,
            write: $write,
            len: $len,
            magnitudes: &[],
            address_field: None,
        }
    };
}

static CELL_OVER_VOLTAGE: Group = group!(0xD1, 0xD0, 8);
static PACK_OVER_VOLTAGE: Group = group!(0xD5, 0xD4, 8);
static CELL_UNDER_VOLTAGE: Group = group!(0xD3, 0xD2, 8);
static PACK_UNDER_VOLTAGE: Group = group!(0xD7, 0xD6, 8);
static CHARGE_OVER_CURRENT: Group = group!(0xD9, 0xD8, 6);
static DISCHARGE_OVER_CURRENT1: Group = Group {
    read: 0xDB,
    write: 0xDA,
    len: 6,
    magnitudes: &[1, 3],
    address_field: None,
};
// read back twice in a row, only the first copy is written
static DISCHARGE_OVER_CURRENT2: Group = group!(0xE3, 0xE2, 3);
static SHORT_CIRCUIT: Group = group!(0xE5, 0xE4, 1);
static CELL_BALANCING: Group = group!(0xB6, 0xB5, 4);
static SLEEP: Group = group!(0xA0, 0xA8, 4);
static FULL_LOW_CHARGE: Group = group!(0xAF, 0xAE, 5);
static CHARGE_DISCHARGE_OVER_TEMPERATURE: Group = group!(0xDD, 0xDC, 13);
static CHARGE_DISCHARGE_UNDER_TEMPERATURE: Group = group!(0xDF, 0xDE, 13);
static MOSFET_OVER_TEMPERATURE: Group = group!(0xE1, 0xE0, 7);
static ENVIRONMENT_TEMPERATURE: Group = group!(0xE7, 0xE6, 13);
static LIMITER_START_CURRENT: Group = Group {
    read: 0xED,
    write: 0xEE,
    len: 2,
    magnitudes: &[],
    address_field: Some(0),
};
static COMMUNICATION_PROTOCOLS: Group = group!(0xEB, 0xEC, 3);

const MILLIVOLTS: (f64, f64) = (1000.0, 0.0);
// the cell over voltage protection field takes centivolts
const CENTIVOLTS: (f64, f64) = (100.0, 0.0);
const MILLIS_100: (f64, f64) = (0.01, 0.0);
const MILLIS_25: (f64, f64) = (0.04, 0.0);
const UNITS: (f64, f64) = (1.0, 0.0);
const CELSIUS: (f64, f64) = (10.0, 2730.0);

macro_rules! number {
    ($id:expr, $group:expr, $field:expr, $width:ident, $conv:expr, $min:expr, $max:expr, $step:expr, $unit:expr) => {
        Target {
            id: $id,
            kind: TargetKind::Number(Number {
                group: &$group,
                field: $field,
                width: Width::$width,
                scale: $conv.0,
                offset: $conv.1,
                min: $min,
                max: $max,
                step: $step,
                unit: $unit,
            }),
            legacy: false,
        }
    };
}

macro_rules! switch {
    ($id:expr, $cid2:expr, $on:expr, $off:expr) => {
        Target {
            id: $id,
            kind: TargetKind::Switch {
                cid2: $cid2,
                on: $on,
                off: $off,
            },
            legacy: false,
        }
    };
}

macro_rules! protocol_select {
    ($id:expr, $field:expr, $options:expr) => {
        Target {
            id: $id,
            kind: TargetKind::Select {
                binding: SelectBinding::Field {
                    group: &COMMUNICATION_PROTOCOLS,
                    field: $field,
                },
                options: $options,
            },
            legacy: false,
        }
    };
}

/// All write targets. Voltages are volts, currents amps unless the unit says otherwise,
/// temperatures degrees Celsius.
pub static TARGETS: &[Target] = &[
    number!("cell_over_voltage_alarm", CELL_OVER_VOLTAGE, 1, U16, MILLIVOLTS, 2.5, 4.5, 0.01, "V"),
    number!("cell_over_voltage_protection", CELL_OVER_VOLTAGE, 3, U16, CENTIVOLTS, 2.5, 4.5, 0.01, "V"),
    number!("cell_over_voltage_protection_release", CELL_OVER_VOLTAGE, 5, U16, MILLIVOLTS, 2.5, 4.5, 0.01, "V"),
    number!("cell_over_voltage_delay", CELL_OVER_VOLTAGE, 7, U8, MILLIS_100, 1000.0, 20000.0, 500.0, "ms"),
    number!("pack_over_voltage_alarm", PACK_OVER_VOLTAGE, 1, U16, MILLIVOLTS, 20.0, 65.0, 0.01, "V"),
    number!("pack_over_voltage_protection", PACK_OVER_VOLTAGE, 3, U16, MILLIVOLTS, 20.0, 65.0, 0.01, "V"),
    number!("pack_over_voltage_protection_release", PACK_OVER_VOLTAGE, 5, U16, MILLIVOLTS, 20.0, 65.0, 0.01, "V"),
    number!("pack_over_voltage_delay", PACK_OVER_VOLTAGE, 7, U8, MILLIS_100, 1000.0, 20000.0, 500.0, "ms"),
    number!("cell_under_voltage_alarm", CELL_UNDER_VOLTAGE, 1, U16, MILLIVOLTS, 2.0, 3.5, 0.01, "V"),
    number!("cell_under_voltage_protection", CELL_UNDER_VOLTAGE, 3, U16, MILLIVOLTS, 2.0, 3.5, 0.01, "V"),
    number!("cell_under_voltage_protection_release", CELL_UNDER_VOLTAGE, 5, U16, MILLIVOLTS, 2.0, 3.5, 0.01, "V"),
    number!("cell_under_voltage_delay", CELL_UNDER_VOLTAGE, 7, U8, MILLIS_100, 1000.0, 20000.0, 500.0, "ms"),
    number!("pack_under_voltage_alarm", PACK_UNDER_VOLTAGE, 1, U16, MILLIVOLTS, 15.0, 50.0, 0.01, "V"),
    number!("pack_under_voltage_protection", PACK_UNDER_VOLTAGE, 3, U16, MILLIVOLTS, 15.0, 50.0, 0.01, "V"),
    number!("pack_under_voltage_protection_release", PACK_UNDER_VOLTAGE, 5, U16, MILLIVOLTS, 15.0, 50.0, 0.01, "V"),
    number!("pack_under_voltage_delay", PACK_UNDER_VOLTAGE, 7, U8, MILLIS_100, 1000.0, 20000.0, 500.0, "ms"),
    number!("charge_over_current_alarm", CHARGE_OVER_CURRENT, 1, U16, UNITS, 1.0, 220.0, 1.0, "A"),
    number!("charge_over_current_protection", CHARGE_OVER_CURRENT, 3, U16, UNITS, 1.0, 220.0, 1.0, "A"),
    number!("charge_over_current_delay", CHARGE_OVER_CURRENT, 5, U8, MILLIS_100, 500.0, 25000.0, 500.0, "ms"),
    number!("discharge_over_current1_alarm", DISCHARGE_OVER_CURRENT1, 1, U16, UNITS, 1.0, 220.0, 1.0, "A"),
    number!("discharge_over_current1_protection", DISCHARGE_OVER_CURRENT1, 3, U16, UNITS, 1.0, 220.0, 1.0, "A"),
    number!("discharge_over_current1_delay", DISCHARGE_OVER_CURRENT1, 5, U8, MILLIS_100, 500.0, 25000.0, 500.0, "ms"),
    number!("discharge_over_current2_protection", DISCHARGE_OVER_CURRENT2, 1, U8, UNITS, 5.0, 255.0, 5.0, "A"),
    number!("discharge_over_current2_delay", DISCHARGE_OVER_CURRENT2, 2, U8, MILLIS_25, 100.0, 2000.0, 100.0, "ms"),
    number!("short_circuit_protection_delay", SHORT_CIRCUIT, 0, U8, MILLIS_25, 100.0, 500.0, 50.0, "us"),
    number!("cell_balancing_threshold", CELL_BALANCING, 0, U16, MILLIVOLTS, 3.3, 4.5, 0.01, "V"),
    number!("cell_balancing_delta", CELL_BALANCING, 2, U16, UNITS, 20.0, 500.0, 1.0, "mV"),
    number!("sleep_cell_voltage", SLEEP, 0, U16, MILLIVOLTS, 2.0, 4.0, 0.01, "V"),
    number!("sleep_delay", SLEEP, 3, U8, UNITS, 1.0, 120.0, 1.0, "min"),
    number!("full_charge_voltage", FULL_LOW_CHARGE, 0, U16, MILLIVOLTS, 20.0, 65.0, 0.01, "V"),
    number!("full_charge_amps", FULL_LOW_CHARGE, 2, U16, UNITS, 500.0, 5000.0, 500.0, "mA"),
    number!("low_charge_alarm_percent", FULL_LOW_CHARGE, 4, U8, UNITS, 0.0, 100.0, 1.0, "%"),
    number!("charge_over_temperature_alarm", CHARGE_DISCHARGE_OVER_TEMPERATURE, 1, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("charge_over_temperature_protection", CHARGE_DISCHARGE_OVER_TEMPERATURE, 3, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("charge_over_temperature_protection_release", CHARGE_DISCHARGE_OVER_TEMPERATURE, 5, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("discharge_over_temperature_alarm", CHARGE_DISCHARGE_OVER_TEMPERATURE, 7, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("discharge_over_temperature_protection", CHARGE_DISCHARGE_OVER_TEMPERATURE, 9, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("discharge_over_temperature_protection_release", CHARGE_DISCHARGE_OVER_TEMPERATURE, 11, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("charge_under_temperature_alarm", CHARGE_DISCHARGE_UNDER_TEMPERATURE, 1, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("charge_under_temperature_protection", CHARGE_DISCHARGE_UNDER_TEMPERATURE, 3, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("charge_under_temperature_protection_release", CHARGE_DISCHARGE_UNDER_TEMPERATURE, 5, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("discharge_under_temperature_alarm", CHARGE_DISCHARGE_UNDER_TEMPERATURE, 7, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("discharge_under_temperature_protection", CHARGE_DISCHARGE_UNDER_TEMPERATURE, 9, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("discharge_under_temperature_protection_release", CHARGE_DISCHARGE_UNDER_TEMPERATURE, 11, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("mosfet_over_temperature_alarm", MOSFET_OVER_TEMPERATURE, 1, U16, CELSIUS, 30.0, 120.0, 1.0, "C"),
    number!("mosfet_over_temperature_protection", MOSFET_OVER_TEMPERATURE, 3, U16, CELSIUS, 30.0, 120.0, 1.0, "C"),
    number!("mosfet_over_temperature_protection_release", MOSFET_OVER_TEMPERATURE, 5, U16, CELSIUS, 30.0, 120.0, 1.0, "C"),
    number!("environment_under_temperature_alarm", ENVIRONMENT_TEMPERATURE, 1, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("environment_under_temperature_protection", ENVIRONMENT_TEMPERATURE, 3, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("environment_under_temperature_protection_release", ENVIRONMENT_TEMPERATURE, 5, U16, CELSIUS, -35.0, 30.0, 1.0, "C"),
    number!("environment_over_temperature_alarm", ENVIRONMENT_TEMPERATURE, 7, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("environment_over_temperature_protection", ENVIRONMENT_TEMPERATURE, 9, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("environment_over_temperature_protection_release", ENVIRONMENT_TEMPERATURE, 11, U16, CELSIUS, 20.0, 100.0, 1.0, "C"),
    number!("charge_current_limiter_start_current", LIMITER_START_CURRENT, 1, U8, UNITS, 5.0, 150.0, 1.0, "A"),
    switch!("buzzer_alarm", 0x99, 0x0D, 0x0C),
    switch!("led_alarm", 0x99, 0x07, 0x06),
    switch!("charge_current_limiter", 0x99, 0x0B, 0x0A),
    switch!("charge_mosfet", 0x9A, 0x01, 0x00),
    switch!("discharge_mosfet", 0x9B, 0x01, 0x00),
    Target {
        id: "charge_current_limiter_gear",
        kind: TargetKind::Select {
            binding: SelectBinding::Command { cid2: 0x99 },
            options: &[(0x08, "High"), (0x09, "Low")],
        },
        legacy: false,
    },
    protocol_select!("can_protocol", 0, CAN_PROTOCOLS),
    protocol_select!("rs485_protocol", 1, RS485_PROTOCOLS),
    protocol_select!("protocol_type", 2, PROTOCOL_TYPES),
    Target {
        id: "system_date_time",
        kind: TargetKind::DateTime,
        legacy: true,
    },
    Target {
        id: "shutdown",
        kind: TargetKind::Button,
        legacy: true,
    },
];
