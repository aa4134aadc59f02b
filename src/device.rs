//! The host facing side of the engine.
//!
//! A [`Device`] is a cheap handle. All clones talk to the same scheduler task, which owns
//! the bus. The scheduler stops once every handle is dropped.
//!
//! # Example
//!
//! ```no_run
//! use pacebms_lib::config::EngineConfig;
//! use pacebms_lib::device::Device;
//!
//! # async fn run() -> Result<(), pacebms_lib::Error> {
//! let settings = EngineConfig::default().validate()?;
//! let (io, _pack) = tokio::io::duplex(1024);
//! let (device, _engine) = Device::spawn(io, settings);
//!
//! device.write("buzzer_alarm", false).await?;
//! if let Some(analog) = device.snapshot().analog.value() {
//!     println!("{:?} mV", analog.total_voltage_mv);
//! }
//! # Ok(())
//! # }
//! ```

use crate::command::{CommandBuilder, Target, Value};
use crate::config::Settings;
use crate::error::Error;
use crate::protocol::{Decoder, ReadKind, Record};
use crate::scheduler::{Message, Scheduler, Snapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Device {
    sender: mpsc::Sender<Message>,
    snapshot: watch::Receiver<Snapshot>,
    decoder: Decoder,
    builder: CommandBuilder,
    next_id: Arc<AtomicU64>,
}

impl Device {
    /// Starts the engine on `io` and returns a handle to it.
    ///
    /// # Arguments
    ///
    /// * `io`: the bus, any byte stream such as a serial port.
    /// * `settings`: validated configuration, see [`crate::config::EngineConfig::validate`].
    ///
    /// # Returns
    ///
    /// The handle and the join handle of the scheduler task.
    pub fn spawn<T>(io: T, settings: Settings) -> (Self, JoinHandle<()>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (scheduler, sender, snapshot) =
            Scheduler::new(io, settings.decoder, settings.session, settings.schedule);
        let engine = tokio::spawn(scheduler.run());
        let device = Self {
            sender,
            snapshot,
            decoder: settings.decoder,
            builder: CommandBuilder::new(settings.decoder.endpoint()),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (device, engine)
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// A copy of everything read so far.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified after every poll.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    pub fn supported_targets(&self) -> impl Iterator<Item = &'static Target> + '_ {
        self.builder.supported_targets()
    }

    pub fn supported_reads(&self) -> impl Iterator<Item = ReadKind> + '_ {
        self.decoder.supported_reads()
    }

    /// Validates and queues a write, then waits for its outcome.
    pub async fn write(&self, target: &str, value: impl Into<Value>) -> Result<()> {
        self.submit(target, value).await?.outcome().await
    }

    /// Validates and queues a write without waiting for it.
    ///
    /// Invalid values and unsupported targets fail here and never reach the bus.
    pub async fn submit(&self, target: &str, value: impl Into<Value>) -> Result<PendingWrite> {
        let plan = self.builder.build(target, value.into())?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send(Message::Write { id, plan, reply })
            .await
            .map_err(|_| Error::EngineStopped)?;
        Ok(PendingWrite {
            id,
            sender: self.sender.clone(),
            outcome,
        })
    }

    /// Reads `kind` ahead of its schedule. The snapshot is updated before this returns.
    pub async fn read(&self, kind: ReadKind) -> Result<Record> {
        if self.decoder.request(kind).is_none() {
            return Err(Error::UnsupportedRead(kind));
        }
        let (reply, record) = oneshot::channel();
        self.sender
            .send(Message::Read { kind, reply })
            .await
            .map_err(|_| Error::EngineStopped)?;
        record.await.map_err(|_| Error::EngineStopped)?
    }
}

/// A queued write.
#[derive(Debug)]
pub struct PendingWrite {
    id: u64,
    sender: mpsc::Sender<Message>,
    outcome: oneshot::Receiver<Result<()>>,
}

impl PendingWrite {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Withdraws the write unless it already went on the bus.
    ///
    /// # Returns
    ///
    /// `true` when the write was withdrawn, `false` when it is running or finished. A
    /// withdrawn write's [`outcome`](Self::outcome) is [`Error::Cancelled`].
    pub async fn cancel(&self) -> Result<bool> {
        let (reply, withdrawn) = oneshot::channel();
        self.sender
            .send(Message::Cancel { id: self.id, reply })
            .await
            .map_err(|_| Error::EngineStopped)?;
        withdrawn.await.map_err(|_| Error::EngineStopped)
    }

    pub async fn outcome(self) -> Result<()> {
        self.outcome.await.map_err(|_| Error::EngineStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::ValidationError;
    use crate::scheduler::tests::replies;
    use crate::session::tests::{spawn_pack, spawn_slow_pack};
    use std::time::Duration;

    fn settings() -> Settings {
        EngineConfig {
            address: 1,
            analog_interval: Duration::from_millis(200),
            status_interval: Duration::from_millis(200),
            info_interval: Duration::from_secs(60),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_writes_never_reach_the_bus() {
        let (local, remote) = tokio::io::duplex(4096);
        let log = spawn_pack(remote, replies);
        let (device, engine) = Device::spawn(local, settings());

        let result = device.write("cell_over_voltage_protection", 1.0).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::OutOfRange { .. }))
        ));
        let result = device.write("no_such_target", 1.0).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::UnsupportedTarget(_)))
        ));

        device.write("cell_over_voltage_protection", 3.0).await.unwrap();
        drop(device);
        engine.await.unwrap();

        let requests = log.lock().unwrap();
        let writes: Vec<_> = requests
            .iter()
            .filter(|(_, frame)| frame.command.cid2 == 0xD0)
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].1.payload[3..5], &300u16.to_be_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_follows_the_polls() {
        let (local, remote) = tokio::io::duplex(4096);
        spawn_pack(remote, replies);
        let (device, engine) = Device::spawn(local, settings());
        let mut updates = device.subscribe();

        updates.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = device.snapshot();
        assert!(snapshot.analog.is_fresh());
        assert!(snapshot.status.is_fresh());
        assert_eq!(snapshot.analog.value().unwrap().cycle_count, Some(140));

        drop(updates);
        drop(device);
        engine.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn write_can_be_withdrawn_while_queued() {
        let (local, remote) = tokio::io::duplex(4096);
        spawn_pack(remote, replies);
        let (device, engine) = Device::spawn(local, settings());

        // queued behind the first write, still waiting for the bus
        let first = device.submit("charge_mosfet", true).await.unwrap();
        let second = device.submit("charge_mosfet", false).await.unwrap();
        assert_ne!(first.id(), second.id());
        first.outcome().await.unwrap();
        let withdrawn = device.submit("led_alarm", false).await.unwrap();
        assert!(withdrawn.cancel().await.unwrap());
        assert!(matches!(withdrawn.outcome().await, Err(Error::Cancelled)));
        second.outcome().await.unwrap();

        drop(device);
        engine.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn running_write_cannot_be_withdrawn() {
        let (local, remote) = tokio::io::duplex(4096);
        let log = spawn_slow_pack(remote, Duration::from_millis(100), replies);
        let (device, engine) = Device::spawn(local, settings());

        let pending = device.submit("discharge_mosfet", false).await.unwrap();
        // the pack holds the answer to the write back
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(log.lock().unwrap()[0].1.command.cid2, 0x9B);

        assert!(!pending.cancel().await.unwrap());
        pending.outcome().await.unwrap();

        drop(device);
        engine.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reads_on_demand() {
        let (local, remote) = tokio::io::duplex(4096);
        spawn_pack(remote, replies);
        let (device, engine) = Device::spawn(local, settings());

        let record = device.read(ReadKind::HardwareVersion).await.unwrap();
        assert_eq!(
            record,
            Record::HardwareVersion("P16S100A-1812-1.00".to_string())
        );
        assert!(device.snapshot().hardware_version.is_fresh());
        assert_eq!(device.supported_reads().count(), 6);
        assert!(device
            .supported_targets()
            .any(|target| target.id == "system_date_time"));

        drop(device);
        engine.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_pack_has_no_protocols_read() {
        let settings = EngineConfig {
            protocol_version: 0x20,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let (local, _remote) = tokio::io::duplex(4096);
        let (device, engine) = Device::spawn(local, settings);

        assert!(matches!(
            device.read(ReadKind::Protocols).await,
            Err(Error::UnsupportedRead(ReadKind::Protocols))
        ));
        assert!(matches!(
            device.write("buzzer_alarm", true).await,
            Err(Error::Validation(ValidationError::UnsupportedTarget(_)))
        ));

        drop(device);
        engine.await.unwrap();
    }
}
