use crate::mqtt;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pacebms_lib::config::EngineConfig;
use pacebms_lib::frame::Chemistry;
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show cell voltages, temperatures, current, capacities, SOC and SOH
    Analog,
    /// Show warnings, protections, faults and balancing state
    Status,
    /// Show hardware version, serial number, system time and communication protocols
    Info,
    /// List the writable targets of the configured protocol version
    Targets,
    /// Write one target, e.g. `write cell_over_voltage_protection 3.6` or `write charge_mosfet off`
    Write {
        /// Target identifier as listed by `targets`
        target: String,
        /// A number, on/off, an option name, `now` or an RFC 3339 time, or `press`
        value: String,
    },
    /// Run in daemon mode, emitting every updated snapshot
    Daemon {
        /// Output destination for the snapshots
        #[command(subcommand)]
        output: DaemonOutput,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, PartialEq)]
pub enum MqttFormat {
    Simple,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum DaemonOutput {
    /// Continuously print snapshots to the standard output (console).
    Console,
    /// Continuously publish snapshots to an MQTT broker.
    Mqtt {
        /// The configuration file for the MQTT broker
        #[arg(long, default_value_t = mqtt::MqttConfig::DEFAULT_CONFIG_FILE.to_string())]
        config_file: String,
        /// Output format for MQTT messages
        #[arg(long, value_enum, default_value_t = MqttFormat::Simple)]
        format: MqttFormat,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum ChemistryArg {
    /// LiFePO4, CID1 0x46
    LithiumIron,
    /// Li-ion, CID1 0x4F
    LithiumIon,
    /// EG4 LiFePO4, CID1 0x4A
    LithiumIronEg4,
}

impl From<ChemistryArg> for Chemistry {
    fn from(arg: ChemistryArg) -> Self {
        match arg {
            ChemistryArg::LithiumIron => Chemistry::LithiumIron,
            ChemistryArg::LithiumIon => Chemistry::LithiumIon,
            ChemistryArg::LithiumIronEg4 => Chemistry::LithiumIronEg4,
        }
    }
}

const fn about_text() -> &'static str {
    "pace bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Baud rate of the serial port
    #[arg(short, long, default_value_t = pacebms_lib::tokio_serial_async::DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// Engine configuration file (YAML), command line flags take precedence
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pack address 0-15 (e.g., 1 or 0x01)
    #[arg(short, long, value_parser = maybe_hex::<u8>)]
    pub address: Option<u8>,

    /// Protocol version 0x20-0x25
    #[arg(long, value_parser = maybe_hex::<u8>)]
    pub protocol_version: Option<u8>,

    /// Battery chemistry sent as CID1
    #[arg(long, value_enum)]
    pub chemistry: Option<ChemistryArg>,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Response timeout (e.g., "200ms", "1s")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    // RS485 dongles need time to switch between TX and RX
    /// Minimum gap between requests on the bus (e.g., "50ms", "100ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub throttle: Option<Duration>,

    /// Number of retries for failed exchanges
    #[arg(long)]
    pub retries: Option<u8>,
}

impl CliArgs {
    /// The configuration file, if any, with the command line flags applied on top.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("Cannot load engine config from {path:?}"))?,
            None => EngineConfig::default(),
        };
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(version) = self.protocol_version {
            config.protocol_version = version;
        }
        if let Some(chemistry) = self.chemistry {
            config.chemistry = chemistry.into();
        }
        if let Some(timeout) = self.timeout {
            config.response_timeout = timeout;
        }
        if let Some(throttle) = self.throttle {
            config.throttle = throttle;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_defaults() {
        let args = CliArgs::parse_from([
            "pacebms",
            "--address",
            "0x01",
            "--protocol-version",
            "0x20",
            "--chemistry",
            "lithium-iron-eg4",
            "--throttle",
            "100ms",
            "analog",
        ]);
        assert_eq!(args.command, CliCommands::Analog);
        let config = args.engine_config().unwrap();
        assert_eq!(config.address, 1);
        assert_eq!(config.protocol_version, 0x20);
        assert_eq!(config.chemistry, Chemistry::LithiumIronEg4);
        assert_eq!(config.throttle, Duration::from_millis(100));
        assert_eq!(config.retries, 2);
    }

    #[test]
    fn write_takes_target_and_value() {
        let args = CliArgs::parse_from(["pacebms", "write", "charge_mosfet", "off"]);
        assert_eq!(
            args.command,
            CliCommands::Write {
                target: "charge_mosfet".into(),
                value: "off".into()
            }
        );
    }
}
