use anyhow::{bail, Context, Result};
use log::{error, info};
use pacebms_lib::device::Device;
use pacebms_lib::scheduler::{Reading, Snapshot};
use serde_json::json;
use std::fmt::Debug;

use crate::{commandline, mqtt};

fn print_reading<T: Debug>(name: &str, reading: &Reading<T>) {
    match reading.value() {
        Some(value) if reading.stale => println!("{name} (stale): {value:?}"),
        Some(value) => println!("{name}: {value:?}"),
        None => println!("{name}: -"),
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
    print_reading("analog", &snapshot.analog);
    print_reading("status", &snapshot.status);
    print_reading("hardware_version", &snapshot.hardware_version);
    print_reading("serial_number", &snapshot.serial_number);
    print_reading("date_time", &snapshot.date_time);
    print_reading("protocols", &snapshot.protocols);
    println!("--------------------------");
}

/// Flattens `value` into one topic per leaf, e.g. `pacebms/analog/value/cell_voltages_mv/3`.
fn flatten(topic: String, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                flatten(format!("{topic}/{k}"), v, out);
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                flatten(format!("{topic}/{i}"), v, out);
            }
        }
        serde_json::Value::String(s) => out.push((topic, s.clone())),
        serde_json::Value::Number(n) => out.push((topic, n.to_string())),
        serde_json::Value::Bool(b) => out.push((topic, b.to_string())),
        serde_json::Value::Null => {
            // Do not publish null values
        }
    }
}

async fn publish_simple_format(publisher: &mqtt::MqttPublisher, snapshot: &Snapshot) -> Result<()> {
    let value = serde_json::to_value(snapshot).with_context(|| "Cannot serialize snapshot")?;
    let mut messages = Vec::new();
    flatten(publisher.topic().to_string(), &value, &mut messages);
    for (topic, payload) in messages {
        if let Err(e) = publisher.publish(&topic, &payload).await {
            error!("Failed to publish message to topic {topic}: {e}");
        }
    }
    Ok(())
}

async fn publish_json_format(publisher: &mqtt::MqttPublisher, snapshot: &Snapshot) -> Result<()> {
    let mut data_to_publish = serde_json::Map::new();
    data_to_publish.insert(
        "timestamp".to_string(),
        json!(chrono::Utc::now().to_rfc3339()),
    );
    let value = serde_json::to_value(snapshot).with_context(|| "Cannot serialize snapshot")?;
    if let serde_json::Value::Object(readings) = value {
        data_to_publish.extend(readings);
    }
    let json_payload = serde_json::to_string(&data_to_publish)
        .with_context(|| "Failed to serialize data to JSON string")?;
    if let Err(e) = publisher.publish(publisher.topic(), &json_payload).await {
        error!("Failed to publish data to MQTT: {e:?}");
    }
    Ok(())
}

pub async fn run(device: Device, output: commandline::DaemonOutput) -> Result<()> {
    info!("Starting daemon mode: output={output:?}");

    let publisher = match &output {
        commandline::DaemonOutput::Mqtt { config_file, .. } => {
            let config = mqtt::MqttConfig::load(config_file)
                .with_context(|| format!("Failed to open MQTT config file at '{config_file}'"))?;
            info!("Successfully loaded MQTT config from {config_file}: {config:?}");
            Some(mqtt::MqttPublisher::new(config))
        }
        commandline::DaemonOutput::Console => None,
    };

    let mut updates = device.subscribe();
    drop(device);
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    bail!("Engine stopped");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping daemon");
                return Ok(());
            }
        }
        let snapshot = updates.borrow_and_update().clone();

        match (&output, &publisher) {
            (commandline::DaemonOutput::Mqtt { format, .. }, Some(publisher)) => match format {
                commandline::MqttFormat::Json => publish_json_format(publisher, &snapshot).await?,
                commandline::MqttFormat::Simple => {
                    publish_simple_format(publisher, &snapshot).await?
                }
            },
            _ => print_snapshot(&snapshot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_into_leaf_topics() {
        let value = json!({
            "analog": {
                "value": { "cell_voltages_mv": [3271, null], "current_ma": -2250 },
                "stale": false,
            },
            "serial_number": { "value": "1812101380309D" },
        });
        let mut messages = Vec::new();
        flatten("pacebms".to_string(), &value, &mut messages);
        messages.sort();
        assert_eq!(
            messages,
            vec![
                ("pacebms/analog/stale".to_string(), "false".to_string()),
                (
                    "pacebms/analog/value/cell_voltages_mv/0".to_string(),
                    "3271".to_string()
                ),
                (
                    "pacebms/analog/value/current_ma".to_string(),
                    "-2250".to_string()
                ),
                (
                    "pacebms/serial_number/value".to_string(),
                    "1812101380309D".to_string()
                ),
            ]
        );
    }
}
