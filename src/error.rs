use crate::frame::{ChecksumKind, ReturnCode, MAX_PAYLOAD_LEN};
use crate::protocol::ReadKind;

/// Errors raised while turning a request into wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes exceeds the frame limit of {MAX_PAYLOAD_LEN} bytes")]
    PayloadTooLarge(usize),
    #[error("address {0:#04X} is neither 0x00..=0x0F nor the broadcast address")]
    AddressOutOfRange(u8),
}

/// Errors raised while validating received wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    /// `received` holds the checksum characters exactly as they appeared on the wire.
    #[error("{kind} checksum mismatch - calculated={expected:04X} received={received}")]
    ChecksumMismatch {
        kind: ChecksumKind,
        expected: u16,
        received: String,
    },
    #[error("unknown protocol version {0:#04X}")]
    UnknownVersion(u8),
    #[error("truncated frame - required={expected} received={received}")]
    Truncated { expected: usize, received: usize },
}

/// Payload level decode problems.
///
/// `CountOverflow`, `AddressMismatch` and `UnexpectedLength` reject a whole record.
/// `UnknownField` is logged against a single slot which is then left empty.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{channel} count {declared} exceeds the {limit} channels available")]
    CountOverflow {
        channel: &'static str,
        declared: usize,
        limit: usize,
    },
    #[error("unrecognised value {raw:#X} in field '{field}'")]
    UnknownField { field: &'static str, raw: u32 },
    #[error("payload belongs to address {received:#04X}, expected {expected:#04X}")]
    AddressMismatch { expected: u8, received: u8 },
    #[error("payload length {received} does not match the expected {expected} bytes")]
    UnexpectedLength { expected: usize, received: usize },
}

/// Rejections of a write request. None of these ever reach the bus.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{target}: value {value} outside of [{min}, {max}]")]
    OutOfRange {
        target: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{target}: value {value} is not a multiple of {step}")]
    BadStep {
        target: String,
        value: f64,
        step: f64,
    },
    #[error("target '{0}' is not supported by this pack")]
    UnsupportedTarget(String),
    #[error("{target}: expected a {expected} value")]
    WrongValueKind {
        target: String,
        expected: &'static str,
    },
    #[error("{target}: unknown option '{option}'")]
    UnknownOption { target: String, option: String },
}

/// Failures of a single request/response exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no response within the timeout")]
    NoResponse,
    #[error("response incomplete after the timeout ({received} bytes received)")]
    Timeout { received: usize },
    #[error("bus busy, unsolicited data keeps arriving")]
    BusBusy,
    #[error("device rejected the request: {0}")]
    Rejected(ReturnCode),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
    #[cfg(feature = "tokio-serial-async")]
    #[error("Tokio serial error: {0}")]
    Serial(#[from] tokio_serial::Error),
}

impl TransportError {
    /// Whether another attempt of the same exchange may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::NoResponse
            | TransportError::Timeout { .. }
            | TransportError::BusBusy
            | TransportError::UnexpectedResponse(_)
            | TransportError::Frame(_) => true,
            TransportError::Rejected(code) => code.is_transient(),
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            TransportError::Encode(_) => false,
            #[cfg(feature = "tokio-serial-async")]
            TransportError::Serial(_) => false,
        }
    }
}

/// Invalid start-time configuration. Only ever returned before the engine runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("protocol version {0:#04X} is not supported (0x20..=0x25)")]
    UnsupportedVersion(u8),
    #[error("device address {0:#04X} is outside 0x00..=0x0F")]
    AddressOutOfRange(u8),
    #[error("{channel} count override {value} exceeds the maximum of {max}")]
    CountOverride {
        channel: &'static str,
        value: u8,
        max: u8,
    },
    #[error("'{0}' is only available for protocol versions below 0x25")]
    LegacyOnlyFeature(&'static str),
    #[error("'{0}' must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top level error returned by the device facade.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("read '{0}' is not available for this protocol version")]
    UnsupportedRead(ReadKind),
    #[error("engine is not running")]
    EngineStopped,
    #[error("write was cancelled before it was sent")]
    Cancelled,
}
