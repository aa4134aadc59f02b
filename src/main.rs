use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pacebms_lib::command::CommandBuilder;
use pacebms_lib::device::Device;
use pacebms_lib::protocol::ReadKind;
use pacebms_lib::tokio_serial_async;
use std::{ops::Deref, panic};

mod commandline;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

macro_rules! print_read {
    ($device:expr, $kind:expr) => {
        println!(
            "{:#?}",
            $device
                .read($kind)
                .await
                .with_context(|| format!("Cannot read {}", $kind))?
        )
    };
}

async fn write(device: &Device, target: &str, value: &str) -> Result<()> {
    let builder = CommandBuilder::new(device.decoder().endpoint());
    let value = builder.target(target)?.parse_value(value)?;
    device
        .write(target, value)
        .await
        .with_context(|| format!("Cannot write {target}"))?;
    info!("{target} written");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let settings = args
        .engine_config()?
        .validate()
        .with_context(|| "Invalid engine configuration")?;

    if args.command == CliCommands::Targets {
        let builder = CommandBuilder::new(settings.decoder.endpoint());
        for target in builder.supported_targets() {
            println!("{target}");
        }
        return Ok(());
    }

    let (device, engine) = tokio_serial_async::spawn(&args.device, args.baud, settings)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;

    match args.command {
        CliCommands::Analog => print_read!(device, ReadKind::Analog),
        CliCommands::Status => print_read!(device, ReadKind::Status),
        CliCommands::Info => {
            let kinds: Vec<ReadKind> = device
                .supported_reads()
                .filter(|kind| kind.is_info())
                .collect();
            for kind in kinds {
                print_read!(device, kind);
            }
        }
        CliCommands::Write { target, value } => write(&device, &target, &value).await?,
        CliCommands::Daemon { output } => daemon::run(device.clone(), output).await?,
        CliCommands::Targets => {}
    }

    drop(device);
    engine.await.with_context(|| "Engine task failed")?;
    Ok(())
}
