#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pacebms_lib
//!
//! This crate talks to PACE battery management systems over their ASCII-hex serial bus
//! protocol, versions 0x20 to 0x25.
//!
//! The engine is layered, leaves first:
//!
//! - [`frame`]: encodes and decodes wire frames, checksums per version family.
//! - [`protocol`]: turns response payloads into typed records.
//! - [`command`]: builds validated write requests.
//! - [`session`]: one request/response exchange with timeout and retry.
//! - [`scheduler`]: interleaves periodic reads and writes on a single bus.
//! - [`device`]: the handle applications use.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `pacebms`
//!   command-line tool.
//!
//! ### Client Features
//! - `tokio-serial-async`: Opens real serial ports with `tokio-serial`. Without it the
//!   engine runs on any `AsyncRead + AsyncWrite` stream.
//!
//! ### Utility Features
//! - `bin-dependencies`: Enables all features required by the `pacebms` binary executable.

pub mod command;
pub mod config;
pub mod device;
/// Contains error types for the library.
mod error;
pub mod frame;
pub mod protocol;
pub mod scheduler;
pub mod session;

pub use error::{
    ConfigError, DecodeError, EncodeError, Error, FrameError, TransportError, ValidationError,
};

/// Serial port support for the engine.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
