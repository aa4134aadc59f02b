//! Decides on every tick which exchange runs next on the bus.
//!
//! The scheduler is the only owner of the [`Session`] and of the [`Snapshot`]. Writes,
//! cancellations and on-demand reads reach it through an mpsc channel. Snapshot changes
//! leave through a watch channel.
//!
//! Per tick at most one job starts, and only when the throttle interval since the
//! previous start has passed. Queued writes go first, then on-demand reads, then the
//! most overdue poll.

use crate::command::WritePlan;
use crate::error::Error;
use crate::protocol::{
    AnalogRecord, Decoder, ProtocolSettings, ReadKind, Record, StatusRecord,
};
use crate::session::{Session, SessionSettings};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Capacity of the command channel between the facade and the scheduler.
pub(crate) const CHANNEL_SIZE: usize = 16;

/// Cadence of the scheduler loop and of each read kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub tick: Duration,
    pub analog_interval: Duration,
    pub status_interval: Duration,
    /// Hardware version, serial number, date/time and protocols.
    pub info_interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            analog_interval: Duration::from_secs(10),
            status_interval: Duration::from_secs(10),
            info_interval: Duration::from_secs(600),
        }
    }
}

impl ScheduleSettings {
    pub fn interval(&self, kind: ReadKind) -> Duration {
        match kind {
            ReadKind::Analog => self.analog_interval,
            ReadKind::Status => self.status_interval,
            _ => self.info_interval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Pending,
    /// Due, but the bus was used less than a throttle interval ago.
    Throttled,
    Ready,
    InFlight,
    Completed,
    Failed,
}

/// A periodic read.
#[derive(Debug, Clone)]
pub struct PollJob {
    pub address: u8,
    pub kind: ReadKind,
    pub next_eligible: Instant,
    /// Latest moment the running exchange is expected to finish.
    pub deadline: Option<Instant>,
    /// Dispatches since the last success.
    pub attempts: u32,
    pub state: JobState,
}

impl PollJob {
    fn new(address: u8, kind: ReadKind, now: Instant) -> Self {
        Self {
            address,
            kind,
            next_eligible: now,
            deadline: None,
            attempts: 0,
            state: JobState::Pending,
        }
    }

    fn set_state(&mut self, state: JobState) {
        if self.state != state {
            log::trace!(
                "{} job of pack {} {:?} -> {:?}",
                self.kind,
                self.address,
                self.state,
                state
            );
            self.state = state;
        }
    }

    fn refresh(&mut self, now: Instant, bus_free: bool) {
        let state = if now < self.next_eligible {
            JobState::Pending
        } else if bus_free {
            JobState::Ready
        } else {
            JobState::Throttled
        };
        self.set_state(state);
    }

    fn dispatch(&mut self, deadline: Instant) {
        self.set_state(JobState::InFlight);
        self.deadline = Some(deadline);
        self.attempts += 1;
    }

    fn finish(&mut self, success: bool, next_eligible: Instant) {
        if success {
            self.set_state(JobState::Completed);
            self.attempts = 0;
        } else {
            self.set_state(JobState::Failed);
        }
        self.deadline = None;
        self.next_eligible = next_eligible;
        self.set_state(JobState::Pending);
    }
}

/// Latest value of one read kind.
///
/// `value` is `None` until the first successful read. After a failed read the previous
/// value is kept and `stale` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading<T> {
    pub value: Option<T>,
    pub updated_at: Option<DateTime<Utc>>,
    pub stale: bool,
    /// Consecutive failed reads.
    pub failures: u32,
}

impl<T> Default for Reading<T> {
    fn default() -> Self {
        Self {
            value: None,
            updated_at: None,
            stale: false,
            failures: 0,
        }
    }
}

impl<T> Reading<T> {
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// A value is present and the last read of it succeeded.
    pub fn is_fresh(&self) -> bool {
        self.value.is_some() && !self.stale
    }

    fn update(&mut self, value: T) {
        self.value = Some(value);
        self.updated_at = Some(Utc::now());
        self.stale = false;
        self.failures = 0;
    }

    fn fail(&mut self) {
        self.stale = true;
        self.failures = self.failures.saturating_add(1);
    }
}

/// Everything known about the pack.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub analog: Reading<AnalogRecord>,
    pub status: Reading<StatusRecord>,
    pub hardware_version: Reading<String>,
    pub serial_number: Reading<String>,
    pub date_time: Reading<NaiveDateTime>,
    pub protocols: Reading<ProtocolSettings>,
}

impl Snapshot {
    fn update(&mut self, record: Record) {
        match record {
            Record::Analog(value) => self.analog.update(value),
            Record::Status(value) => self.status.update(value),
            Record::HardwareVersion(value) => self.hardware_version.update(value),
            Record::SerialNumber(value) => self.serial_number.update(value),
            Record::DateTime(value) => self.date_time.update(value),
            Record::Protocols(value) => self.protocols.update(value),
        }
    }

    fn fail(&mut self, kind: ReadKind) {
        match kind {
            ReadKind::Analog => self.analog.fail(),
            ReadKind::Status => self.status.fail(),
            ReadKind::HardwareVersion => self.hardware_version.fail(),
            ReadKind::SerialNumber => self.serial_number.fail(),
            ReadKind::DateTime => self.date_time.fail(),
            ReadKind::Protocols => self.protocols.fail(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Message {
    Write {
        id: u64,
        plan: WritePlan,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Cancel {
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    Read {
        kind: ReadKind,
        reply: oneshot::Sender<Result<Record, Error>>,
    },
}

struct WriteJob {
    id: u64,
    plan: WritePlan,
    reply: oneshot::Sender<Result<(), Error>>,
}

struct ReadJob {
    kind: ReadKind,
    reply: oneshot::Sender<Result<Record, Error>>,
}

pub struct Scheduler<T> {
    session: Session<T>,
    decoder: Decoder,
    settings: ScheduleSettings,
    jobs: Vec<PollJob>,
    writes: VecDeque<WriteJob>,
    reads: VecDeque<ReadJob>,
    receiver: mpsc::Receiver<Message>,
    snapshot: watch::Sender<Snapshot>,
    last_start: Option<Instant>,
}

impl<T> Scheduler<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        io: T,
        decoder: Decoder,
        session: SessionSettings,
        settings: ScheduleSettings,
    ) -> (Self, mpsc::Sender<Message>, watch::Receiver<Snapshot>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_SIZE);
        let (snapshot, subscriber) = watch::channel(Snapshot::default());
        let now = Instant::now();
        let endpoint = *decoder.endpoint();
        let jobs = decoder
            .supported_reads()
            .map(|kind| PollJob::new(endpoint.address, kind, now))
            .collect();
        let scheduler = Self {
            session: Session::new(io, endpoint, session),
            decoder,
            settings,
            jobs,
            writes: VecDeque::new(),
            reads: VecDeque::new(),
            receiver,
            snapshot,
            last_start: None,
        };
        (scheduler, sender, subscriber)
    }

    pub fn jobs(&self) -> &[PollJob] {
        &self.jobs
    }

    /// Runs until every sender of the command channel is dropped.
    pub async fn run(mut self) {
        let endpoint = *self.session.endpoint();
        log::info!(
            "Scheduler started for address {} with protocol version {}",
            endpoint.address,
            endpoint.version
        );
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                message = self.receiver.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
            }
        }
        log::info!("Scheduler stopped");
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Write { id, plan, reply } => {
                log::debug!("Write {id} queued");
                self.writes.push_back(WriteJob { id, plan, reply });
            }
            Message::Cancel { id, reply } => {
                let withdrawn = match self.writes.iter().position(|job| job.id == id) {
                    Some(index) => {
                        if let Some(job) = self.writes.remove(index) {
                            let _ = job.reply.send(Err(Error::Cancelled));
                        }
                        log::debug!("Write {id} cancelled");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(withdrawn);
            }
            Message::Read { kind, reply } => self.reads.push_back(ReadJob { kind, reply }),
        }
    }

    async fn tick(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            self.handle(message);
        }

        let now = Instant::now();
        let throttle = self.session.settings().throttle;
        let bus_free = self
            .last_start
            .map_or(true, |last| now.duration_since(last) >= throttle);
        for job in &mut self.jobs {
            job.refresh(now, bus_free);
        }
        if !bus_free {
            return;
        }

        if let Some(job) = self.writes.pop_front() {
            self.last_start = Some(now);
            let result = self.write(&job.plan).await;
            match &result {
                Ok(()) => log::debug!("Write {} done", job.id),
                Err(err) => log::warn!("Write {} failed: {err}", job.id),
            }
            let _ = job.reply.send(result);
            return;
        }

        if let Some(job) = self.reads.pop_front() {
            self.last_start = Some(now);
            let result = self.poll(job.kind).await;
            let _ = job.reply.send(result);
            return;
        }

        let next = self
            .jobs
            .iter()
            .filter(|job| job.state == JobState::Ready)
            .min_by_key(|job| job.next_eligible)
            .map(|job| job.kind);
        if let Some(kind) = next {
            self.last_start = Some(now);
            let _ = self.poll(kind).await;
        }
    }

    /// Upper bound of one read including every retry.
    fn exchange_budget(&self) -> Duration {
        let settings = self.session.settings();
        (settings.throttle + settings.response_timeout * 2) * (u32::from(settings.retries) + 1)
    }

    async fn poll(&mut self, kind: ReadKind) -> Result<Record, Error> {
        let deadline = Instant::now() + self.exchange_budget();
        if let Some(job) = self.jobs.iter_mut().find(|job| job.kind == kind) {
            job.dispatch(deadline);
        }

        let result = self.read(kind).await;
        let finished = Instant::now();
        if finished > deadline {
            log::debug!("Reading {kind} overran its deadline by {:?}", finished - deadline);
        }
        match &result {
            Ok(record) => self
                .snapshot
                .send_modify(|snapshot| snapshot.update(record.clone())),
            Err(err) => {
                let address = self.session.endpoint().address;
                log::warn!("Reading {kind} from pack {address} failed: {err}");
                self.snapshot.send_modify(|snapshot| snapshot.fail(kind));
            }
        }

        let next_eligible = finished + self.settings.interval(kind);
        if let Some(job) = self.jobs.iter_mut().find(|job| job.kind == kind) {
            job.finish(result.is_ok(), next_eligible);
        }
        result
    }

    async fn read(&mut self, kind: ReadKind) -> Result<Record, Error> {
        let request = self
            .decoder
            .request(kind)
            .ok_or(Error::UnsupportedRead(kind))?;
        let frame = self.session.exchange(&request).await?;
        Ok(self.decoder.decode(kind, &frame.payload)?)
    }

    async fn write(&mut self, plan: &WritePlan) -> Result<(), Error> {
        match plan {
            WritePlan::Direct(request) => {
                self.session.command(request).await?;
            }
            WritePlan::ReadModifyWrite { read, patch } => {
                let current = self.session.exchange(read).await?;
                let request = patch.apply(&current.payload)?;
                self.session.command(&request).await?;
            }
        }
        Ok(())
    }
}
