//! Runs the engine on a real serial port through `tokio-serial`.
//!
//! # Example
//!
//! ```no_run
//! use pacebms_lib::config::EngineConfig;
//! use pacebms_lib::protocol::ReadKind;
//! use pacebms_lib::tokio_serial_async;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pacebms_lib::Error> {
//!     let settings = EngineConfig::default().validate()?;
//!     let (device, _engine) = tokio_serial_async::spawn(
//!         "/dev/ttyUSB0",
//!         tokio_serial_async::DEFAULT_BAUD_RATE,
//!         settings,
//!     )?;
//!
//!     let analog = device.read(ReadKind::Analog).await?;
//!     println!("{analog:?}");
//!     Ok(())
//! }
//! ```

use crate::config::Settings;
use crate::device::Device;
use crate::error::TransportError;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Opens `port` as 8N1 without flow control.
pub fn open(port: &str, baud_rate: u32) -> Result<SerialStream, TransportError> {
    log::debug!("Opening serial port {port} at {baud_rate} baud");
    let serial = tokio_serial::new(port, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()?;
    Ok(serial)
}

/// Opens `port` and starts the engine on it.
///
/// Must be called from within a Tokio runtime.
pub fn spawn(
    port: &str,
    baud_rate: u32,
    settings: Settings,
) -> Result<(Device, JoinHandle<()>), TransportError> {
    let serial = open(port, baud_rate)?;
    Ok(Device::spawn(serial, settings))
}
