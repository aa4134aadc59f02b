//! Wire framing shared by every PACE protocol version.
//!
//! A frame is ASCII on the wire:
//!
//! ```text
//! ~ VER ADR CID1 CID2 LENGTH INFO CHKSUM \r
//! ```
//!
//! Every field apart from the two markers is upper case hex. `LENGTH` carries the number of
//! INFO characters in its low 12 bits and a nibble checksum of that count in its top 4 bits.
//! `CHKSUM` is the two's complement of the byte sum of everything between the markers.

use crate::error::{EncodeError, FrameError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Start of information marker.
pub const SOI: u8 = b'~';
/// End of information marker.
pub const EOI: u8 = b'\r';
/// Size of a frame without payload.
pub const MIN_FRAME_LEN: usize = 18;
/// Largest binary payload: LENID is 12 bits wide and counts hex characters.
pub const MAX_PAYLOAD_LEN: usize = 0x0FFF / 2;
pub const MAX_ADDRESS: u8 = 0x0F;
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Checksum enforcement applied to a protocol version family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumFamily {
    /// Frame checksum and length checksum are both enforced.
    Strict,
    /// Only the frame checksum is enforced, a bad length nibble is logged and tolerated.
    FrameOnly,
}

/// Which of the two checksums failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Length,
    Frame,
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChecksumKind::Length => write!(f, "length"),
            ChecksumKind::Frame => write!(f, "frame"),
        }
    }
}

/// Protocol version byte, restricted to `0x20..=0x25`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ProtocolVersion(u8);

impl ProtocolVersion {
    pub const V20: ProtocolVersion = ProtocolVersion(0x20);
    pub const V25: ProtocolVersion = ProtocolVersion(0x25);

    pub fn new(version: u8) -> Result<Self, FrameError> {
        if (0x20..=0x25).contains(&version) {
            Ok(Self(version))
        } else {
            Err(FrameError::UnknownVersion(version))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Versions below 0x25 share the older payload layouts and their optional blocks.
    pub fn is_legacy(self) -> bool {
        self.0 < 0x25
    }

    pub fn checksum_family(self) -> ChecksumFamily {
        if self.is_legacy() {
            ChecksumFamily::FrameOnly
        } else {
            ChecksumFamily::Strict
        }
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> u8 {
        version.0
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#04X}", self.0)
    }
}

/// Battery chemistry, sent as CID1 in every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chemistry {
    #[default]
    LithiumIron,
    LithiumIon,
    /// Undocumented value used by EG4 packs for lithium iron.
    LithiumIronEg4,
}

impl Chemistry {
    pub fn cid1(self) -> u8 {
        match self {
            Chemistry::LithiumIron => 0x46,
            Chemistry::LithiumIon => 0x4F,
            Chemistry::LithiumIronEg4 => 0x4A,
        }
    }
}

/// CID1/CID2 pair. In a response CID2 carries the return code instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Command {
    pub cid1: u8,
    pub cid2: u8,
}

impl Command {
    pub const fn new(cid1: u8, cid2: u8) -> Self {
        Self { cid1, cid2 }
    }
}

/// RTN values a pack answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReturnCode {
    Ok,
    VersionError,
    ChecksumError,
    LengthChecksumError,
    UnknownCommand,
    CommandFormatError,
    InvalidData,
    OperationError,
    AddressError,
    CommunicationError,
    Undocumented(u8),
}

impl ReturnCode {
    /// Codes caused by a garbled request, so sending it again may succeed.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ReturnCode::ChecksumError
                | ReturnCode::LengthChecksumError
                | ReturnCode::CommunicationError
        )
    }
}

impl From<u8> for ReturnCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ReturnCode::Ok,
            1 => ReturnCode::VersionError,
            2 => ReturnCode::ChecksumError,
            3 => ReturnCode::LengthChecksumError,
            4 => ReturnCode::UnknownCommand,
            5 => ReturnCode::CommandFormatError,
            6 => ReturnCode::InvalidData,
            9 => ReturnCode::OperationError,
            90 => ReturnCode::AddressError,
            91 => ReturnCode::CommunicationError,
            other => ReturnCode::Undocumented(other),
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReturnCode::Ok => write!(f, "OK"),
            ReturnCode::VersionError => write!(f, "Version Error"),
            ReturnCode::ChecksumError => write!(f, "CKSUM Error"),
            ReturnCode::LengthChecksumError => write!(f, "LCKSUM Error"),
            ReturnCode::UnknownCommand => write!(f, "CID2 Undefined"),
            ReturnCode::CommandFormatError => write!(f, "Command Format Error"),
            ReturnCode::InvalidData => write!(f, "Invalid Data"),
            ReturnCode::OperationError => write!(f, "Operation or Write Error"),
            ReturnCode::AddressError => write!(f, "ADR Error"),
            ReturnCode::CommunicationError => write!(f, "Communication Error"),
            ReturnCode::Undocumented(code) => write!(f, "Undocumented Error Code {code}"),
        }
    }
}

/// One decoded frame. `payload` holds binary bytes, already converted from hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: ProtocolVersion,
    pub address: u8,
    pub command: Command,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    /// Interprets CID2 as the return code of a response.
    pub fn return_code(&self) -> ReturnCode {
        ReturnCode::from(self.command.cid2)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self.version, self.address, self.command, &self.payload)
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

pub(crate) fn push_hex_u8(out: &mut Vec<u8>, value: u8) {
    out.push(HEX_DIGITS[(value >> 4) as usize]);
    out.push(HEX_DIGITS[(value & 0x0F) as usize]);
}

pub(crate) fn push_hex_u16(out: &mut Vec<u8>, value: u16) {
    let [hi, lo] = value.to_be_bytes();
    push_hex_u8(out, hi);
    push_hex_u8(out, lo);
}

// Lower case is rejected so that a case flip in the checksum field is detected.
fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn parse_hex_u8(chars: &[u8]) -> Option<u8> {
    match chars {
        [hi, lo] => Some(hex_nibble(*hi)? << 4 | hex_nibble(*lo)?),
        _ => None,
    }
}

fn parse_hex_u16(chars: &[u8]) -> Option<u16> {
    match chars {
        [a, b, c, d] => Some(u16::from_be_bytes([
            parse_hex_u8(&[*a, *b])?,
            parse_hex_u8(&[*c, *d])?,
        ])),
        _ => None,
    }
}

/// Nibble checksum placed in the top 4 bits of the LENGTH field.
pub fn length_checksum(lenid: u16) -> u16 {
    let sum = (lenid & 0x0F) + ((lenid >> 4) & 0x0F) + ((lenid >> 8) & 0x0F);
    (!sum).wrapping_add(1) & 0x0F
}

/// Checksum over the ASCII characters between SOI and the checksum field.
pub fn frame_checksum(body: &[u8]) -> u16 {
    let sum = body
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    (!sum).wrapping_add(1)
}

/// Builds the wire representation of a frame.
///
/// # Arguments
///
/// * `version`: protocol version written into VER.
/// * `address`: pack address, `0x00..=0x0F` or [`BROADCAST_ADDRESS`].
/// * `command`: CID1/CID2 pair.
/// * `payload`: binary INFO bytes, hex encoded on the wire.
///
/// # Returns
///
/// The complete frame including both markers, or an [`EncodeError`] when the address or
/// payload size cannot be represented.
pub fn encode(
    version: ProtocolVersion,
    address: u8,
    command: Command,
    payload: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if address > MAX_ADDRESS && address != BROADCAST_ADDRESS {
        return Err(EncodeError::AddressOutOfRange(address));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }
    // bounded by MAX_PAYLOAD_LEN above
    let lenid = (payload.len() * 2) as u16;

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + payload.len() * 2);
    frame.push(SOI);
    push_hex_u8(&mut frame, version.value());
    push_hex_u8(&mut frame, address);
    push_hex_u8(&mut frame, command.cid1);
    push_hex_u8(&mut frame, command.cid2);
    push_hex_u16(&mut frame, length_checksum(lenid) << 12 | lenid);
    for byte in payload {
        push_hex_u8(&mut frame, *byte);
    }
    let checksum = frame_checksum(&frame[1..]);
    push_hex_u16(&mut frame, checksum);
    frame.push(EOI);
    Ok(frame)
}

/// Validates and decodes one complete frame.
///
/// The frame checksum is verified before any field is interpreted, so a corrupted byte
/// anywhere between the markers is reported as [`FrameError::ChecksumMismatch`].
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    if bytes.len() < MIN_FRAME_LEN {
        log::warn!(
            "Invalid frame size - required={} received={}",
            MIN_FRAME_LEN,
            bytes.len()
        );
        return Err(FrameError::Truncated {
            expected: MIN_FRAME_LEN,
            received: bytes.len(),
        });
    }
    if bytes[0] != SOI {
        return Err(FrameError::Malformed("missing start marker"));
    }
    if bytes[bytes.len() - 1] != EOI {
        return Err(FrameError::Malformed("missing end marker"));
    }

    let body = &bytes[1..bytes.len() - 5];
    let checksum_field = &bytes[bytes.len() - 5..bytes.len() - 1];
    let checksum = frame_checksum(body);
    if parse_hex_u16(checksum_field) != Some(checksum) {
        log::warn!(
            "Invalid checksum - calculated={:04X} received={:?}",
            checksum,
            String::from_utf8_lossy(checksum_field)
        );
        return Err(FrameError::ChecksumMismatch {
            kind: ChecksumKind::Frame,
            expected: checksum,
            received: String::from_utf8_lossy(checksum_field).into_owned(),
        });
    }

    let version = parse_hex_u8(&body[0..2]).ok_or(FrameError::Malformed("version is not hex"))?;
    let version = ProtocolVersion::new(version)?;
    let address = parse_hex_u8(&body[2..4]).ok_or(FrameError::Malformed("address is not hex"))?;
    let cid1 = parse_hex_u8(&body[4..6]).ok_or(FrameError::Malformed("CID1 is not hex"))?;
    let cid2 = parse_hex_u8(&body[6..8]).ok_or(FrameError::Malformed("CID2 is not hex"))?;
    let length = parse_hex_u16(&body[8..12]).ok_or(FrameError::Malformed("length is not hex"))?;

    let lenid = length & 0x0FFF;
    let expected_lchksum = length_checksum(lenid);
    if length >> 12 != expected_lchksum {
        match version.checksum_family() {
            ChecksumFamily::Strict => {
                log::warn!(
                    "Invalid length checksum - calculated={:X} received={:X}",
                    expected_lchksum,
                    length >> 12
                );
                return Err(FrameError::ChecksumMismatch {
                    kind: ChecksumKind::Length,
                    expected: expected_lchksum,
                    received: String::from_utf8_lossy(&body[8..9]).into_owned(),
                });
            }
            ChecksumFamily::FrameOnly => log::warn!(
                "Ignoring invalid length checksum for version {version} - calculated={:X} received={:X}",
                expected_lchksum,
                length >> 12
            ),
        }
    }

    let info = &body[12..];
    let lenid = usize::from(lenid);
    if info.len() < lenid {
        return Err(FrameError::Truncated {
            expected: lenid + MIN_FRAME_LEN,
            received: bytes.len(),
        });
    }
    if info.len() > lenid {
        return Err(FrameError::Malformed("frame is longer than its declared length"));
    }
    if lenid % 2 != 0 {
        return Err(FrameError::Malformed("odd number of payload characters"));
    }
    let payload = info
        .chunks_exact(2)
        .map(parse_hex_u8)
        .collect::<Option<Vec<u8>>>()
        .ok_or(FrameError::Malformed("payload is not hex"))?;

    Ok(Frame {
        version,
        address,
        command: Command::new(cid1, cid2),
        payload,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALOG_RESPONSE_V25: &[u8] = b"~25014600F07A0001100CC70CC80CC70CC70CC70CC50CC60CC70CC70CC60CC70CC60CC60CC70CC60CC7060B9B0B990B990B990BB30BBCFF1FCCCD12D303286A008C2710E1E4\r";

    /// Builds raw frame text with a correct frame checksum around an arbitrary body.
    fn with_checksum(body: &str) -> Vec<u8> {
        let mut frame = vec![SOI];
        frame.extend_from_slice(body.as_bytes());
        let checksum = frame_checksum(body.as_bytes());
        push_hex_u16(&mut frame, checksum);
        frame.push(EOI);
        frame
    }

    #[test]
    fn encodes_captured_requests() {
        let analog = encode(ProtocolVersion::V25, 0x01, Command::new(0x46, 0x42), &[0x01]).unwrap();
        assert_eq!(analog, b"~25014642E00201FD30\r");

        let date_time = encode(
            ProtocolVersion::V20,
            0x01,
            Command::new(0x4A, 0x4E),
            &[0x07, 0xE8, 0x09, 0x11, 0x0C, 0x04, 0x02],
        )
        .unwrap();
        assert_eq!(date_time, b"~20014A4E200E07E809110C0402FA90\r");

        let hardware = encode(ProtocolVersion::V25, 0x01, Command::new(0x46, 0xC1), &[]).unwrap();
        assert_eq!(hardware, b"~250146C10000FD9A\r");
    }

    #[test]
    fn decodes_captured_response() {
        let frame = decode(ANALOG_RESPONSE_V25).unwrap();
        assert_eq!(frame.version, ProtocolVersion::V25);
        assert_eq!(frame.address, 0x01);
        assert_eq!(frame.command, Command::new(0x46, 0x00));
        assert_eq!(frame.return_code(), ReturnCode::Ok);
        assert_eq!(frame.payload.len(), 61);
        assert_eq!(&frame.payload[..4], &[0x00, 0x01, 0x10, 0x0C]);
        assert_eq!(frame.checksum, 0xE1E4);
    }

    #[test]
    fn decode_reverses_encode_for_every_version() {
        let payloads: [&[u8]; 3] = [&[], &[0x01], &[0xFF; MAX_PAYLOAD_LEN]];
        for version in 0x20..=0x25 {
            let version = ProtocolVersion::new(version).unwrap();
            for address in [0x00, 0x07, MAX_ADDRESS, BROADCAST_ADDRESS] {
                for payload in payloads {
                    let command = Command::new(0x46, 0x42);
                    let bytes = encode(version, address, command, payload).unwrap();
                    let frame = decode(&bytes).unwrap();
                    assert_eq!(frame.version, version);
                    assert_eq!(frame.address, address);
                    assert_eq!(frame.command, command);
                    assert_eq!(frame.payload, payload);
                }
            }
        }
    }

    #[test]
    fn any_single_byte_flip_is_a_checksum_mismatch() {
        for original in [
            encode(ProtocolVersion::V25, 0x01, Command::new(0x46, 0xD0), &[0x01, 0x0E, 0x10]).unwrap(),
            ANALOG_RESPONSE_V25.to_vec(),
        ] {
            for index in 1..original.len() - 1 {
                for corrupt in [
                    original[index] ^ 0x01,
                    original[index] ^ 0x20,
                    original[index].wrapping_add(0x80),
                ] {
                    let mut bytes = original.clone();
                    bytes[index] = corrupt;
                    match decode(&bytes) {
                        Err(FrameError::ChecksumMismatch { kind, .. }) => {
                            assert_eq!(kind, ChecksumKind::Frame)
                        }
                        other => panic!("flip at {index} gave {other:?}"),
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_unencodable_frames() {
        let command = Command::new(0x46, 0x42);
        assert_eq!(
            encode(ProtocolVersion::V25, 0x10, command, &[]),
            Err(EncodeError::AddressOutOfRange(0x10))
        );
        assert_eq!(
            encode(ProtocolVersion::V25, 0x01, command, &[0; MAX_PAYLOAD_LEN + 1]),
            Err(EncodeError::PayloadTooLarge(MAX_PAYLOAD_LEN + 1))
        );
    }

    #[test]
    fn rejects_short_and_unmarked_input() {
        assert_eq!(
            decode(b"~25014642E002"),
            Err(FrameError::Truncated {
                expected: MIN_FRAME_LEN,
                received: 13
            })
        );
        assert_eq!(
            decode(b"X25014642E00201FD30\r"),
            Err(FrameError::Malformed("missing start marker"))
        );
        assert_eq!(
            decode(b"~25014642E00201FD30\n"),
            Err(FrameError::Malformed("missing end marker"))
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let bytes = with_checksum("260146420000");
        assert_eq!(decode(&bytes), Err(FrameError::UnknownVersion(0x26)));
    }

    #[test]
    fn length_checksum_is_enforced_per_family() {
        // LENID 0x002 needs nibble 0xE, 0x0 is wrong
        let strict = with_checksum("25014642000201");
        assert!(matches!(
            decode(&strict),
            Err(FrameError::ChecksumMismatch {
                kind: ChecksumKind::Length,
                ..
            })
        ));

        let legacy = decode(&with_checksum("20014A42000201")).unwrap();
        assert_eq!(legacy.version, ProtocolVersion::V20);
        assert_eq!(legacy.payload, vec![0x01]);
    }

    #[test]
    fn declared_length_must_match_payload() {
        // declares four payload characters but carries two
        let short = with_checksum("25014642C00401");
        assert_eq!(
            decode(&short),
            Err(FrameError::Truncated {
                expected: 4 + MIN_FRAME_LEN,
                received: short.len()
            })
        );
        // declares two payload characters but carries four
        let long = with_checksum("25014642E0020101");
        assert_eq!(
            decode(&long),
            Err(FrameError::Malformed("frame is longer than its declared length"))
        );
    }

    #[test]
    fn length_checksum_matches_captures() {
        assert_eq!(length_checksum(0x07A) << 12 | 0x07A, 0xF07A);
        assert_eq!(length_checksum(0x04C) << 12 | 0x04C, 0x004C);
        assert_eq!(length_checksum(0x002) << 12 | 0x002, 0xE002);
        assert_eq!(length_checksum(0), 0);
    }

    #[test]
    fn return_codes_map_documented_values() {
        assert_eq!(ReturnCode::from(0), ReturnCode::Ok);
        assert_eq!(ReturnCode::from(90), ReturnCode::AddressError);
        assert_eq!(ReturnCode::from(0x42), ReturnCode::Undocumented(0x42));
        assert!(ReturnCode::from(2).is_transient());
        assert!(!ReturnCode::from(6).is_transient());
    }
}
