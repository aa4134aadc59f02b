//! One request/response exchange at a time over a half-duplex byte stream.
//!
//! The session owns the link. Every exchange drains stale input, honours the throttle
//! interval since the previous exchange, writes the request and then reads until a frame
//! is complete or the response timeout elapses. Retryable failures are repeated up to the
//! configured count. Commands are only repeated when the pack cannot have acted on them.

use crate::error::{FrameError, TransportError};
use crate::frame::{self, Frame, ReturnCode, EOI, MIN_FRAME_LEN, SOI};
use crate::protocol::{Endpoint, Request};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};

type Result<T> = std::result::Result<T, TransportError>;

const READ_CHUNK: usize = 64;
const MAX_FRAME_LEN: usize = MIN_FRAME_LEN + 0x0FFF;
/// More unsolicited input than this while draining means someone else is talking.
const MAX_DRAIN: usize = 2 * MAX_FRAME_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    AwaitingResponse,
    FrameReceived,
    TimedOut,
    Errored,
}

/// When a failed exchange may be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Reads have no side effects and are repeated on every retryable failure.
    Always,
    /// Commands are repeated only if the request never left, or the pack answered that it
    /// dropped it. A lost answer is not a lost command.
    UnlessDelivered,
}

/// Timing of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Minimum gap between the end of one exchange and the next request.
    pub throttle: Duration,
    pub response_timeout: Duration,
    /// Additional attempts after the first one failed.
    pub retries: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(50),
            response_timeout: Duration::from_millis(200),
            retries: 2,
        }
    }
}

#[derive(Debug)]
pub struct Session<T> {
    io: T,
    endpoint: Endpoint,
    settings: SessionSettings,
    state: SessionState,
    last_execution: Option<Instant>,
    /// The request of the current attempt was written completely.
    delivered: bool,
    buffer: Vec<u8>,
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(io: T, endpoint: Endpoint, settings: SessionSettings) -> Self {
        Self {
            io,
            endpoint,
            settings,
            state: SessionState::Idle,
            last_execution: None,
            delivered: false,
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        log::trace!("session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Sends `request` and returns the validated response frame.
    ///
    /// # Arguments
    ///
    /// * `request`: command code and payload, bound to the session endpoint.
    ///
    /// # Returns
    ///
    /// The response frame with RTN 0, or the error of the last attempt.
    pub async fn exchange(&mut self, request: &Request) -> Result<Frame> {
        self.exchange_with(request, Retry::Always).await
    }

    /// Sends a command that changes the pack. See [`Retry::UnlessDelivered`].
    pub async fn command(&mut self, request: &Request) -> Result<Frame> {
        self.exchange_with(request, Retry::UnlessDelivered).await
    }

    pub async fn exchange_with(&mut self, request: &Request, retry: Retry) -> Result<Frame> {
        let bytes = self.endpoint.encode(request)?;
        let attempts = u16::from(self.settings.retries) + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&bytes).await {
                Ok(frame) => return Ok(frame),
                Err(err) if attempt < attempts && self.may_repeat(&err, retry) => {
                    log::trace!("Failed try {attempt} of {attempts}, repeating ({err})");
                }
                Err(err) => {
                    log::debug!("Exchange CID2 {:#04X} failed: {err}", request.cid2);
                    return Err(err);
                }
            }
        }
    }

    fn may_repeat(&self, err: &TransportError, retry: Retry) -> bool {
        if !err.is_retryable() {
            return false;
        }
        match retry {
            Retry::Always => true,
            Retry::UnlessDelivered => {
                !self.delivered || matches!(err, TransportError::Rejected(_))
            }
        }
    }

    async fn attempt(&mut self, bytes: &[u8]) -> Result<Frame> {
        let result = self.transact(bytes).await;
        self.last_execution = Some(Instant::now());
        self.set_state(match &result {
            Ok(_) => SessionState::FrameReceived,
            Err(TransportError::NoResponse | TransportError::Timeout { .. }) => {
                SessionState::TimedOut
            }
            Err(_) => SessionState::Errored,
        });
        self.set_state(SessionState::Idle);
        result
    }

    async fn transact(&mut self, bytes: &[u8]) -> Result<Frame> {
        self.delivered = false;
        self.drain().await?;
        self.await_delay().await;

        self.set_state(SessionState::Sending);
        log::trace!("write bytes: {:?}", String::from_utf8_lossy(bytes));
        timeout(self.settings.response_timeout, self.io.write_all(bytes))
            .await
            .map_err(|_| TransportError::Timeout { received: 0 })??;
        self.delivered = true;

        self.set_state(SessionState::AwaitingResponse);
        let frame = self.receive().await?;
        self.check(frame)
    }

    /// Waits until the throttle interval since the last exchange has passed.
    async fn await_delay(&mut self) {
        let Some(last_execution) = self.last_execution else {
            return;
        };
        let last_exec_diff = Instant::now().duration_since(last_execution);
        if let Some(time_until_delay_reached) = self.settings.throttle.checked_sub(last_exec_diff) {
            tokio::time::sleep(time_until_delay_reached).await;
        }
    }

    /// Discards input that arrived outside of an exchange, so a late answer to an earlier
    /// request is never taken for the answer to this one.
    async fn drain(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut drained = 0;
        loop {
            match timeout(Duration::ZERO, self.io.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(received)) => {
                    drained += received;
                    log::trace!("{received} pending bytes consumed");
                    if drained > MAX_DRAIN {
                        return Err(TransportError::BusBusy);
                    }
                }
                Ok(Err(err)) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Frame> {
        self.buffer.clear();
        let deadline = Instant::now() + self.settings.response_timeout;
        let mut chunk = [0u8; READ_CHUNK];
        let mut discarded = 0;
        loop {
            let received = match timeout_at(deadline, self.io.read(&mut chunk)).await {
                Ok(received) => received?,
                Err(_) if self.buffer.is_empty() => return Err(TransportError::NoResponse),
                Err(_) => {
                    log::trace!("partial response: {:?}", String::from_utf8_lossy(&self.buffer));
                    return Err(TransportError::Timeout {
                        received: self.buffer.len(),
                    });
                }
            };
            if received == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            for byte in &chunk[..received] {
                if self.buffer.is_empty() && *byte != SOI {
                    discarded += 1;
                    continue;
                }
                self.buffer.push(*byte);
                if *byte == EOI {
                    if discarded > 0 {
                        log::debug!("{discarded} bytes before start of frame discarded");
                    }
                    log::trace!("receive bytes: {:?}", String::from_utf8_lossy(&self.buffer));
                    return Ok(frame::decode(&self.buffer)?);
                }
            }
            if self.buffer.len() > MAX_FRAME_LEN {
                return Err(FrameError::Malformed("response exceeds the largest frame").into());
            }
        }
    }

    /// The response must come from the endpoint that was asked and report success.
    fn check(&self, frame: Frame) -> Result<Frame> {
        if frame.version != self.endpoint.version {
            return Err(TransportError::UnexpectedResponse("protocol version differs"));
        }
        if frame.address != self.endpoint.address {
            return Err(TransportError::UnexpectedResponse("address differs"));
        }
        if frame.command.cid1 != self.endpoint.chemistry.cid1() {
            return Err(TransportError::UnexpectedResponse("CID1 differs"));
        }
        match frame.return_code() {
            ReturnCode::Ok => Ok(frame),
            code => {
                log::warn!("Device rejected request: {code}");
                Err(TransportError::Rejected(code))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::{Chemistry, Command, ProtocolVersion};
    use std::sync::{Arc, Mutex};
    use tokio::io::DuplexStream;

    pub(crate) type RequestLog = Arc<Mutex<Vec<(Instant, Frame)>>>;

    pub(crate) const ANALOG_RESPONSE_V25: &[u8] = b"~25014600F07A0001100CC70CC80CC70CC70CC70CC50CC60CC70CC70CC60CC70CC60CC60CC70CC60CC7060B9B0B990B990B990BB30BBCFF1FCCCD12D303286A008C2710E1E4\r";
    pub(crate) const STATUS_RESPONSE_V25: &[u8] =
        b"~25014600004C000110000000000000000000000000000000000600000000000000000000000E000000000000EF3A\r";

    pub(crate) fn endpoint() -> Endpoint {
        Endpoint::new(ProtocolVersion::V25, 1, Chemistry::LithiumIron).unwrap()
    }

    /// A well-formed V25 response from address 1.
    pub(crate) fn response(rtn: u8, payload: &[u8]) -> Vec<u8> {
        frame::encode(ProtocolVersion::V25, 1, Command::new(0x46, rtn), payload).unwrap()
    }

    /// Runs a fake pack on the far end of a duplex pipe. For every request `respond` returns
    /// the chunks written back, nothing at all to stay silent.
    pub(crate) fn spawn_pack<F>(io: DuplexStream, respond: F) -> RequestLog
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        spawn_slow_pack(io, Duration::ZERO, respond)
    }

    /// Like [`spawn_pack`], but every answer is held back for `delay`.
    pub(crate) fn spawn_slow_pack<F>(
        io: DuplexStream,
        delay: Duration,
        mut respond: F,
    ) -> RequestLog
    where
        F: FnMut(&Frame) -> Vec<Vec<u8>> + Send + 'static,
    {
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let requests = log.clone();
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(io);
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let received = match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(received) => received,
                };
                for byte in &chunk[..received] {
                    buffer.push(*byte);
                    if *byte != EOI {
                        continue;
                    }
                    let frame = frame::decode(&buffer).unwrap();
                    buffer.clear();
                    requests.lock().unwrap().push((Instant::now(), frame.clone()));
                    let replies = respond(&frame);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    for reply in replies {
                        if writer.write_all(&reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        log
    }

    fn session(io: DuplexStream) -> Session<DuplexStream> {
        Session::new(io, endpoint(), SessionSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn exchange_returns_the_response() {
        let (local, remote) = tokio::io::duplex(4096);
        let log = spawn_pack(remote, |_| vec![ANALOG_RESPONSE_V25.to_vec()]);
        let mut session = session(local);

        let frame = session.exchange(&Request::new(0x42, vec![0x01])).await.unwrap();
        assert_eq!(frame.payload.len(), 61);
        assert_eq!(session.state(), SessionState::Idle);

        let requests = log.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.command, Command::new(0x46, 0x42));
        assert_eq!(requests[0].1.payload, vec![0x01]);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupted_response_is_retried() {
        let (local, remote) = tokio::io::duplex(4096);
        let mut first = true;
        let log = spawn_pack(remote, move |_| {
            let mut reply = ANALOG_RESPONSE_V25.to_vec();
            if std::mem::take(&mut first) {
                reply[20] ^= 0x01;
            }
            vec![reply]
        });
        let mut session = session(local);

        let frame = session.exchange(&Request::new(0x42, vec![0x01])).await.unwrap();
        assert_eq!(frame.payload.len(), 61);
        let requests = log.lock().unwrap();
        assert_eq!(requests.len(), 2);
        // the retry waited for the throttle interval
        assert!(requests[1].0 - requests[0].0 >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_exhausts_retries() {
        let (local, remote) = tokio::io::duplex(4096);
        let log = spawn_pack(remote, |_| Vec::new());
        let mut session = session(local);

        let result = session.exchange(&Request::new(0x42, vec![0x01])).await;
        assert!(matches!(result, Err(TransportError::NoResponse)));
        assert_eq!(log.lock().unwrap().len(), 3);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_response_times_out() {
        let (local, remote) = tokio::io::duplex(4096);
        spawn_pack(remote, |_| vec![ANALOG_RESPONSE_V25[..30].to_vec()]);
        let mut session = Session::new(
            local,
            endpoint(),
            SessionSettings {
                retries: 0,
                ..Default::default()
            },
        );

        let result = session.exchange(&Request::new(0x42, vec![0x01])).await;
        assert!(matches!(result, Err(TransportError::Timeout { received: 30 })));
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_retry_only_when_transient() {
        let (local, remote) = tokio::io::duplex(4096);
        let log = spawn_pack(remote, |_| vec![response(0x04, &[])]);
        let mut session = session(local);
        let result = session.exchange(&Request::new(0x42, vec![0x01])).await;
        assert!(matches!(
            result,
            Err(TransportError::Rejected(ReturnCode::UnknownCommand))
        ));
        assert_eq!(log.lock().unwrap().len(), 1);

        let (local, remote) = tokio::io::duplex(4096);
        let mut replies = vec![response(0, &[0x0D, 0x01]), response(91, &[])];
        let log = spawn_pack(remote, move |_| vec![replies.pop().unwrap_or_default()]);
        let mut session = self::session(local);
        let frame = session.exchange(&Request::new(0x99, vec![0x0D])).await.unwrap();
        assert_eq!(frame.payload, vec![0x0D, 0x01]);
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn command_answered_late_is_sent_once() {
        let (local, remote) = tokio::io::duplex(4096);
        let log = spawn_slow_pack(remote, Duration::from_millis(300), |_| vec![response(0, &[])]);
        let mut session = session(local);

        let result = session.command(&Request::new(0x9A, vec![0x00])).await;
        assert!(matches!(result, Err(TransportError::NoResponse)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_dropped_by_the_pack_is_repeated() {
        let (local, remote) = tokio::io::duplex(4096);
        let mut replies = vec![response(0, &[]), response(91, &[])];
        let log = spawn_pack(remote, move |_| vec![replies.pop().unwrap_or_default()]);
        let mut session = session(local);

        session.command(&Request::new(0x9B, vec![0x01])).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn noise_before_start_of_frame_is_skipped() {
        let (local, remote) = tokio::io::duplex(4096);
        spawn_pack(remote, |_| vec![b"\x00\xFFxx".to_vec(), STATUS_RESPONSE_V25.to_vec()]);
        let mut session = session(local);
        let frame = session.exchange(&Request::new(0x44, vec![0x01])).await.unwrap();
        assert_eq!(frame.payload.len(), 38);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_input_is_drained_before_the_next_request() {
        let (local, remote) = tokio::io::duplex(4096);
        // every answer is followed by a stray status frame
        spawn_pack(remote, |frame| match frame.command.cid2 {
            0x42 => vec![ANALOG_RESPONSE_V25.to_vec(), STATUS_RESPONSE_V25.to_vec()],
            _ => vec![response(0, &[0xAA])],
        });
        let mut session = session(local);
        session.exchange(&Request::new(0x42, vec![0x01])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let frame = session.exchange(&Request::new(0xC1, vec![])).await.unwrap();
        assert_eq!(frame.payload, vec![0xAA]);
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_responses_are_unexpected() {
        let (local, remote) = tokio::io::duplex(4096);
        spawn_pack(remote, |_| {
            vec![frame::encode(ProtocolVersion::V25, 2, Command::new(0x46, 0), &[]).unwrap()]
        });
        let mut session = Session::new(
            local,
            endpoint(),
            SessionSettings {
                retries: 0,
                ..Default::default()
            },
        );
        let result = session.exchange(&Request::new(0x42, vec![0x01])).await;
        assert!(matches!(
            result,
            Err(TransportError::UnexpectedResponse("address differs"))
        ));
    }
}
