//! Version aware payload decoding and read requests.
//!
//! A [`Decoder`] is built once from the start-time configuration. It fixes the payload
//! [`Layout`] and the [`FeatureSet`] for the lifetime of the engine, so no call re-inspects
//! the protocol version.

mod analog;
mod info;
mod status;

pub use analog::AnalogRecord;
pub use info::{ProtocolSettings, SelectOption, CAN_PROTOCOLS, PROTOCOL_TYPES, RS485_PROTOCOLS};
pub use status::{Bitfield, StatusChannel, StatusFlag, StatusRecord, Warning};

use crate::error::{ConfigError, DecodeError, EncodeError};
use crate::frame::{self, Chemistry, Command, ProtocolVersion, MAX_ADDRESS};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_CELL_COUNT: usize = 16;
pub const MAX_TEMPERATURE_COUNT: usize = 6;

/// Payload layout family, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Layout {
    /// Versions 0x20 to 0x24.
    V20,
    /// Version 0x25.
    V25,
}

impl From<ProtocolVersion> for Layout {
    fn from(version: ProtocolVersion) -> Self {
        if version.is_legacy() {
            Layout::V20
        } else {
            Layout::V25
        }
    }
}

/// Optional analog blocks and count overrides. All of it only applies to the V20 layout,
/// except the count and design capacity overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureSet {
    pub skip_address_payload: bool,
    pub skip_ud2: bool,
    pub skip_soc: bool,
    pub skip_design_capacity: bool,
    pub skip_soh: bool,
    pub skip_port_voltage: bool,
    pub skip_status_flags: bool,
    /// Replaces the declared cell count when non-zero.
    pub cell_count_override: u8,
    /// Replaces the declared temperature count when non-zero.
    pub temperature_count_override: u8,
    /// Replaces the decoded design capacity when non-zero.
    pub design_capacity_mah_override: u32,
}

impl FeatureSet {
    /// Checks the set against the layout it will be used with.
    pub fn validate(&self, layout: Layout) -> Result<(), ConfigError> {
        if usize::from(self.cell_count_override) > MAX_CELL_COUNT {
            return Err(ConfigError::CountOverride {
                channel: "cell",
                value: self.cell_count_override,
                max: MAX_CELL_COUNT as u8,
            });
        }
        if usize::from(self.temperature_count_override) > MAX_TEMPERATURE_COUNT {
            return Err(ConfigError::CountOverride {
                channel: "temperature",
                value: self.temperature_count_override,
                max: MAX_TEMPERATURE_COUNT as u8,
            });
        }
        if layout == Layout::V25 {
            let legacy_only = [
                (self.skip_address_payload, "skip_address_payload"),
                (self.skip_ud2, "skip_ud2"),
                (self.skip_soc, "skip_soc"),
                (self.skip_design_capacity, "skip_design_capacity"),
                (self.skip_soh, "skip_soh"),
                (self.skip_port_voltage, "skip_port_voltage"),
                (self.skip_status_flags, "skip_status_flags"),
            ];
            if let Some((_, name)) = legacy_only.iter().find(|(set, _)| *set) {
                return Err(ConfigError::LegacyOnlyFeature(name));
            }
        }
        Ok(())
    }
}

/// Who is spoken to: version byte, pack address and chemistry byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub version: ProtocolVersion,
    pub address: u8,
    pub chemistry: Chemistry,
}

impl Endpoint {
    pub fn new(version: ProtocolVersion, address: u8, chemistry: Chemistry) -> Result<Self, ConfigError> {
        if address > MAX_ADDRESS {
            return Err(ConfigError::AddressOutOfRange(address));
        }
        Ok(Self {
            version,
            address,
            chemistry,
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::from(self.version)
    }

    /// Builds the wire frame for a request addressed to this endpoint.
    pub fn encode(&self, request: &Request) -> Result<Vec<u8>, EncodeError> {
        frame::encode(
            self.version,
            self.address,
            Command::new(self.chemistry.cid1(), request.cid2),
            &request.payload,
        )
    }
}

/// A request before it is bound to an endpoint: command code and binary payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub cid2: u8,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(cid2: u8, payload: Vec<u8>) -> Self {
        Self { cid2, payload }
    }
}

/// Everything the engine polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadKind {
    Analog,
    Status,
    HardwareVersion,
    SerialNumber,
    DateTime,
    Protocols,
}

impl ReadKind {
    pub const ALL: [ReadKind; 6] = [
        ReadKind::Analog,
        ReadKind::Status,
        ReadKind::HardwareVersion,
        ReadKind::SerialNumber,
        ReadKind::DateTime,
        ReadKind::Protocols,
    ];

    /// Protocol-info reads share the slower refresh cadence.
    pub fn is_info(self) -> bool {
        !matches!(self, ReadKind::Analog | ReadKind::Status)
    }

    /// Command code for this read, or `None` when the layout has no such read.
    pub fn cid2(self, layout: Layout) -> Option<u8> {
        match (layout, self) {
            (_, ReadKind::Analog) => Some(0x42),
            (_, ReadKind::Status) => Some(0x44),
            (Layout::V25, ReadKind::HardwareVersion) => Some(0xC1),
            (Layout::V25, ReadKind::SerialNumber) => Some(0xC2),
            (Layout::V25, ReadKind::DateTime) => Some(0xB1),
            (Layout::V25, ReadKind::Protocols) => Some(0xEB),
            (Layout::V20, ReadKind::HardwareVersion) => Some(0x51),
            (Layout::V20, ReadKind::SerialNumber) => Some(0x93),
            (Layout::V20, ReadKind::DateTime) => Some(0x4D),
            (Layout::V20, ReadKind::Protocols) => None,
        }
    }
}

impl fmt::Display for ReadKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ReadKind::Analog => "analog",
            ReadKind::Status => "status",
            ReadKind::HardwareVersion => "hardware_version",
            ReadKind::SerialNumber => "serial_number",
            ReadKind::DateTime => "date_time",
            ReadKind::Protocols => "protocols",
        };
        write!(f, "{name}")
    }
}

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Analog(AnalogRecord),
    Status(StatusRecord),
    HardwareVersion(String),
    SerialNumber(String),
    DateTime(chrono::NaiveDateTime),
    Protocols(ProtocolSettings),
}

/// Layout and feature aware decoder, chosen once per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoder {
    endpoint: Endpoint,
    layout: Layout,
    features: FeatureSet,
}

impl Decoder {
    pub fn new(endpoint: Endpoint, features: FeatureSet) -> Result<Self, ConfigError> {
        let layout = endpoint.layout();
        features.validate(layout)?;
        Ok(Self {
            endpoint,
            layout,
            features,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    /// Read kinds the active layout can serve.
    pub fn supported_reads(&self) -> impl Iterator<Item = ReadKind> + '_ {
        ReadKind::ALL
            .into_iter()
            .filter(|kind| kind.cid2(self.layout).is_some())
    }

    /// Builds the read request for `kind`, `None` when the layout lacks it.
    ///
    /// Analog and status reads carry the pack address as payload unless the address-omitted
    /// mode is configured. Info reads have no payload.
    pub fn request(&self, kind: ReadKind) -> Option<Request> {
        let cid2 = kind.cid2(self.layout)?;
        let payload = match kind {
            ReadKind::Analog | ReadKind::Status if !self.features.skip_address_payload => {
                vec![self.endpoint.address]
            }
            _ => Vec::new(),
        };
        Some(Request::new(cid2, payload))
    }

    pub fn decode(&self, kind: ReadKind, payload: &[u8]) -> Result<Record, DecodeError> {
        Ok(match kind {
            ReadKind::Analog => Record::Analog(self.analog(payload)?),
            ReadKind::Status => Record::Status(self.status(payload)?),
            ReadKind::HardwareVersion => Record::HardwareVersion(self.hardware_version(payload)),
            ReadKind::SerialNumber => Record::SerialNumber(self.serial_number(payload)),
            ReadKind::DateTime => Record::DateTime(self.date_time(payload)?),
            ReadKind::Protocols => Record::Protocols(self.protocols(payload)?),
        })
    }

    pub fn analog(&self, payload: &[u8]) -> Result<AnalogRecord, DecodeError> {
        AnalogRecord::decode(self, payload)
    }

    pub fn status(&self, payload: &[u8]) -> Result<StatusRecord, DecodeError> {
        StatusRecord::decode(self, payload)
    }

    pub fn hardware_version(&self, payload: &[u8]) -> String {
        info::hardware_version(self.layout, payload)
    }

    pub fn serial_number(&self, payload: &[u8]) -> String {
        info::serial_number(payload)
    }

    pub fn date_time(&self, payload: &[u8]) -> Result<chrono::NaiveDateTime, DecodeError> {
        info::date_time(self.layout, payload)
    }

    pub fn protocols(&self, payload: &[u8]) -> Result<ProtocolSettings, DecodeError> {
        info::protocols(payload)
    }

    /// Reads the leading flag byte and the echoed pack address.
    fn header(&self, reader: &mut Reader) -> Result<(), DecodeError> {
        let (Some(flag), Some(address)) = (reader.u8(), reader.u8()) else {
            return Err(DecodeError::UnexpectedLength {
                expected: 2,
                received: reader.len(),
            });
        };
        log::trace!("Payload flag {flag:#04X}");
        if address != self.endpoint.address {
            log::warn!(
                "Response from wrong address - expected={} received={}",
                self.endpoint.address,
                address
            );
            return Err(DecodeError::AddressMismatch {
                expected: self.endpoint.address,
                received: address,
            });
        }
        Ok(())
    }

    fn cell_count(&self, reader: &mut Reader, width: usize) -> Result<usize, DecodeError> {
        let declared = read_count(reader)?;
        let count = resolve(declared, self.features.cell_count_override);
        check_count(reader, "cell", count, MAX_CELL_COUNT, width)
    }

    /// `legacy_quirk` reads a declared count of 4 as 6, some V20 firmware declares 4 and
    /// then sends all 6 values.
    fn temperature_count(
        &self,
        reader: &mut Reader,
        width: usize,
        legacy_quirk: bool,
    ) -> Result<usize, DecodeError> {
        let declared = read_count(reader)?;
        let mut count = resolve(declared, self.features.temperature_count_override);
        if legacy_quirk && count == 4 {
            count = MAX_TEMPERATURE_COUNT;
        }
        check_count(reader, "temperature", count, MAX_TEMPERATURE_COUNT, width)
    }
}

fn read_count(reader: &mut Reader) -> Result<u8, DecodeError> {
    reader.u8().ok_or(DecodeError::UnexpectedLength {
        expected: reader.offset() + 1,
        received: reader.len(),
    })
}

fn resolve(declared: u8, configured: u8) -> usize {
    if configured != 0 {
        usize::from(configured)
    } else {
        usize::from(declared)
    }
}

/// A count must stay within the channel limit and within the bytes left in the payload.
fn check_count(
    reader: &Reader,
    channel: &'static str,
    count: usize,
    limit: usize,
    width: usize,
) -> Result<usize, DecodeError> {
    if count > limit || count * width > reader.remaining() {
        log::warn!(
            "{channel} count {count} does not fit - limit={limit} remaining={}",
            reader.remaining()
        );
        return Err(DecodeError::CountOverflow {
            channel,
            declared: count,
            limit: if count > limit {
                limit
            } else {
                reader.remaining() / width
            },
        });
    }
    Ok(count)
}

/// Big endian cursor over a payload. A read past the end returns `None` and exhausts the
/// cursor, so every later field is absent as well.
pub(crate) struct Reader<'a> {
    payload: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(payload: &'a [u8]) -> Self {
        Self { payload, offset: 0 }
    }

    pub(crate) fn len(&self) -> usize {
        self.payload.len()
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.payload.len() - self.offset
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let payload: &'a [u8] = self.payload;
        match payload.get(self.offset..self.offset + len) {
            Some(bytes) => {
                self.offset += len;
                Some(bytes)
            }
            None => {
                self.offset = self.payload.len();
                None
            }
        }
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|bytes| bytes[0])
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        self.bytes(2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn i16(&mut self) -> Option<i16> {
        self.u16().map(|value| value as i16)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Payload of a frame literal, skipping header and checksum.
    pub(crate) fn payload_of(frame: &[u8]) -> Vec<u8> {
        crate::frame::decode(frame).unwrap().payload
    }

    pub(crate) fn decoder(version: u8, address: u8, features: FeatureSet) -> Decoder {
        let version = ProtocolVersion::new(version).unwrap();
        Decoder::new(
            Endpoint::new(version, address, Chemistry::LithiumIron).unwrap(),
            features,
        )
        .unwrap()
    }

    #[test]
    fn layout_follows_version() {
        assert_eq!(Layout::from(ProtocolVersion::V25), Layout::V25);
        for version in 0x20..0x25 {
            assert_eq!(Layout::from(ProtocolVersion::new(version).unwrap()), Layout::V20);
        }
    }

    #[test]
    fn read_requests_match_captures() {
        let v25 = decoder(0x25, 1, FeatureSet::default());
        let bytes = v25
            .endpoint()
            .encode(&v25.request(ReadKind::Analog).unwrap())
            .unwrap();
        assert_eq!(bytes, b"~25014642E00201FD30\r");

        let eg4 = Decoder::new(
            Endpoint::new(ProtocolVersion::V20, 1, Chemistry::LithiumIronEg4).unwrap(),
            FeatureSet {
                skip_address_payload: true,
                ..Default::default()
            },
        )
        .unwrap();
        let bytes = eg4
            .endpoint()
            .encode(&eg4.request(ReadKind::Analog).unwrap())
            .unwrap();
        assert_eq!(bytes, b"~20014A420000FDA2\r");
        let bytes = eg4
            .endpoint()
            .encode(&eg4.request(ReadKind::HardwareVersion).unwrap())
            .unwrap();
        assert_eq!(bytes, b"~20014A510000FDA2\r");
        assert!(eg4.request(ReadKind::Protocols).is_none());
    }

    #[test]
    fn legacy_features_are_rejected_for_v25() {
        let endpoint = Endpoint::new(ProtocolVersion::V25, 1, Chemistry::LithiumIron).unwrap();
        let result = Decoder::new(
            endpoint,
            FeatureSet {
                skip_soc: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(ConfigError::LegacyOnlyFeature("skip_soc"))
        ));
    }

    #[test]
    fn count_overrides_are_bounded() {
        let endpoint = Endpoint::new(ProtocolVersion::V20, 1, Chemistry::LithiumIron).unwrap();
        let result = Decoder::new(
            endpoint,
            FeatureSet {
                temperature_count_override: 7,
                ..Default::default()
            },
        );
        assert!(matches!(
            result,
            Err(ConfigError::CountOverride {
                channel: "temperature",
                value: 7,
                max: 6
            })
        ));
        assert!(matches!(
            Endpoint::new(ProtocolVersion::V20, 16, Chemistry::LithiumIron),
            Err(ConfigError::AddressOutOfRange(16))
        ));
    }

    #[test]
    fn reader_stops_at_the_end() {
        let mut reader = Reader::new(&[0x01, 0xFF, 0x1F, 0x02]);
        assert_eq!(reader.u8(), Some(0x01));
        assert_eq!(reader.i16(), Some(-225));
        assert_eq!(reader.u16(), None);
        assert_eq!(reader.u8(), None);
        assert_eq!(reader.remaining(), 0);
    }
}
