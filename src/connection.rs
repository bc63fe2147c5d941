use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::frame::{leading_verb, Frame, FrameError};
use crate::framer::LineFramer;
use crate::Error;

/// Lifecycle and reply notifications, one broadcast channel per connection.
///
/// Command results come back as return values; the events exist for
/// observers (logging, pools, callers watching for drops), so missing a
/// lagging receiver is harmless.
#[derive(Clone, Debug)]
pub enum Event {
    Connected,
    Disconnected { had_error: bool },
    ConnectError(String),
    Error(String),
    Result { command: String, reply: Frame },
    RedisError(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Ready,
    Busy,
    Closing,
    Closed,
}

/// Availability flags shared with the pool scanner.
///
/// Written only by the owning connection, read lock-free by the pool's idle
/// scan. A ready connection with an open transaction stays reserved for the
/// caller that opened it.
#[derive(Debug, Default)]
pub(crate) struct Status {
    ready: AtomicBool,
    busy: AtomicBool,
    transaction_open: AtomicBool,
}

impl Status {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn transaction_open(&self) -> bool {
        self.transaction_open.load(Ordering::SeqCst)
    }

    fn set_ready(&self, value: bool) {
        self.ready.store(value, Ordering::SeqCst);
    }

    fn set_busy(&self, value: bool) {
        self.busy.store(value, Ordering::SeqCst);
    }

    fn set_transaction_open(&self, value: bool) {
        self.transaction_open.store(value, Ordering::SeqCst);
    }
}

/// One TCP connection to the server.
///
/// Owns the socket, the framed read buffer and the transaction flag. All
/// methods take `&mut self`, so a connection can never have more than one
/// command in flight; callers that want to share one connection across tasks
/// put it behind an async mutex and queue on the lock.
#[derive(Debug)]
pub struct Connection {
    config: Config,
    stream: Option<TcpStream>,
    framer: LineFramer,
    state: State,
    status: Arc<Status>,
    events: broadcast::Sender<Event>,
    reconnect_enabled: bool,
    reconnect_at: Option<Instant>,
    pending_discard: bool,
    pool_index: Option<usize>,
}

impl Connection {
    pub fn new(config: Config) -> Connection {
        let (events, _) = broadcast::channel(64);
        Connection {
            config,
            stream: None,
            framer: LineFramer::new(),
            state: State::Idle,
            status: Arc::new(Status::default()),
            events,
            reconnect_enabled: true,
            reconnect_at: None,
            pending_discard: false,
            pool_index: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub(crate) fn status(&self) -> Arc<Status> {
        self.status.clone()
    }

    pub(crate) fn events(&self) -> broadcast::Sender<Event> {
        self.events.clone()
    }

    pub(crate) fn set_pool_index(&mut self, index: usize) {
        self.pool_index = Some(index);
    }

    /// Dials the server, honoring the connect timeout.
    ///
    /// On failure the error is returned to the caller and, when
    /// auto-reconnect is on, the next submit waits out the backoff slot and
    /// dials again.
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.state = State::Connecting;
        debug!(addr = %self.config.addr(), "connecting");

        let attempt = TcpStream::connect((self.config.host.as_str(), self.config.port));
        let stream = match timeout(self.config.connect_timeout, attempt).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(self.connect_failed(err.to_string())),
            Err(_) => {
                return Err(self.connect_failed(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )))
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            return Err(self.connect_failed(err.to_string()));
        }

        self.stream = Some(stream);
        self.framer.clear();
        self.state = State::Ready;
        self.status.set_ready(true);
        self.reconnect_at = None;
        info!(addr = %self.config.addr(), index = ?self.pool_index, "connected");
        self.emit(Event::Connected);
        Ok(())
    }

    /// Submits one serialized command and waits for its reply.
    ///
    /// The connection is busy for the whole write-then-read round trip,
    /// which is what keeps a single connection at one outstanding command. A
    /// `-` reply comes back as `Error::Server` and leaves the connection
    /// usable.
    pub async fn send_raw(&mut self, serialized: Bytes, expects_map: bool) -> Result<Frame, Error> {
        self.ensure_ready().await?;

        let command = leading_verb(&serialized).unwrap_or_default();
        if command == "MULTI" && self.status.transaction_open() {
            return Err(Error::Usage("MULTI calls can not be nested".to_string()));
        }

        self.state = State::Busy;
        self.status.set_busy(true);
        debug!(%command, "sending command");
        let outcome = async {
            self.write_raw(&serialized).await?;
            self.read_reply(expects_map).await
        }
        .await;
        self.status.set_busy(false);
        if self.stream.is_some() {
            self.state = State::Ready;
        }

        let reply = outcome?;
        self.observe_reply(&command, &reply);
        if let Frame::Error(message) = reply {
            return Err(Error::Server(message));
        }
        Ok(reply)
    }

    /// Closes the connection for good: no reconnect, socket shut down,
    /// transaction state cleared. Safe to call more than once.
    pub async fn disconnect(&mut self) {
        self.reconnect_enabled = false;
        self.reconnect_at = None;

        if let Some(mut stream) = self.stream.take() {
            self.state = State::Closing;
            let _ = stream.shutdown().await;
            self.close_socket();
            info!(addr = %self.config.addr(), "disconnected");
            self.emit(Event::Disconnected { had_error: false });
        } else {
            self.state = State::Closed;
            self.status.set_ready(false);
        }
    }

    /// Drops the socket and dials again immediately.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        if !self.reconnect_enabled {
            return Err(Error::Usage(
                "reconnect requested on a closed connection".to_string(),
            ));
        }
        self.close_socket();
        self.connect().await
    }

    /// Drops the socket and dials again once `delay` has passed.
    pub async fn reconnect_after(&mut self, delay: Duration) -> Result<(), Error> {
        if !self.reconnect_enabled {
            return Err(Error::Usage(
                "reconnect requested on a closed connection".to_string(),
            ));
        }
        self.close_socket();
        sleep(delay).await;
        self.connect().await
    }

    /// Waits out any reconnect backoff and dials until ready.
    pub(crate) async fn ensure_ready(&mut self) -> Result<(), Error> {
        loop {
            match self.state {
                State::Ready | State::Busy => {
                    if self.pending_discard {
                        self.settle_abandoned_transaction().await?;
                    }
                    return Ok(());
                }
                State::Idle | State::Connecting | State::Closing => {
                    self.connect().await?;
                }
                State::Closed => {
                    if !self.reconnect_enabled || self.config.auto_reconnect_after.is_none() {
                        return Err(Error::Transport("connection closed".to_string()));
                    }
                    if let Some(at) = self.reconnect_at.take() {
                        sleep_until(at).await;
                    }
                    self.connect().await?;
                }
            }
        }
    }

    /// Writes a serialized command, or a whole pipeline buffer, to the
    /// socket.
    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Err(Error::Transport("not connected".to_string())),
        };
        match stream.write_all(bytes).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.broken(err.to_string())),
        }
    }

    /// Reads one reply, pulling more bytes from the socket whenever the
    /// framer comes up short of a complete value.
    pub(crate) async fn read_reply(&mut self, expects_map: bool) -> Result<Frame, Error> {
        loop {
            if self.framer.has_overload_notice() {
                warn!(addr = %self.config.addr(), "server reached its client limit");
                self.close_socket();
                self.emit(Event::Disconnected { had_error: true });
                self.schedule_reconnect();
                return Err(Error::Transport(
                    "server reached its client limit".to_string(),
                ));
            }

            let mut lines = self.framer.cursor();
            match Frame::parse(&mut lines) {
                Ok(frame) => {
                    let parsed = lines.consumed();
                    self.framer.consume(parsed);
                    if !expects_map {
                        return Ok(frame);
                    }
                    return match frame.fold_map() {
                        Ok(folded) => Ok(folded),
                        Err(err) => Err(self.malformed(err)),
                    };
                }
                Err(FrameError::Incomplete) => {}
                Err(err) => {
                    // Drop the offending line so the buffer cannot loop on it.
                    let scanned = lines.consumed();
                    self.framer.consume(scanned);
                    return Err(self.malformed(err));
                }
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => return Err(Error::Transport("not connected".to_string())),
            };
            match stream.read_buf(self.framer.buffer_mut()).await {
                Ok(0) => return Err(self.broken("connection closed by server".to_string())),
                Ok(_) => self.framer.enforce_cap(),
                Err(err) => return Err(self.broken(err.to_string())),
            }
        }
    }

    /// Marks the start and end of a pipeline flush, which occupies the
    /// connection the same way a single command does.
    pub(crate) fn begin_batch(&mut self) {
        self.state = State::Busy;
        self.status.set_busy(true);
    }

    pub(crate) fn end_batch(&mut self) {
        if self.state == State::Busy {
            self.state = State::Ready;
        }
        self.status.set_busy(false);
    }

    /// Records a reply for observers and keeps the transaction flag in sync.
    pub(crate) fn observe_reply(&mut self, command: &str, reply: &Frame) {
        match command {
            "MULTI" if matches!(reply, Frame::Simple(_)) => {
                self.status.set_transaction_open(true);
            }
            "EXEC" | "DISCARD" => self.status.set_transaction_open(false),
            _ => {}
        }
        self.emit(Event::Result {
            command: command.to_string(),
            reply: reply.clone(),
        });
        if let Frame::Error(message) = reply {
            self.emit(Event::RedisError(message.clone()));
        }
    }

    /// Called when a transaction guard is dropped without EXEC or DISCARD;
    /// the next command on this connection settles the dangling MULTI first.
    /// The reservation flag clears here so the pool can lease the connection
    /// again, knowing the discard runs before anything else.
    pub(crate) fn mark_abandoned(&mut self) {
        if self.status.transaction_open() {
            self.pending_discard = true;
            self.status.set_transaction_open(false);
        }
    }

    async fn settle_abandoned_transaction(&mut self) -> Result<(), Error> {
        self.pending_discard = false;
        debug!(addr = %self.config.addr(), "discarding abandoned transaction");
        let discard = crate::frame::serialize_command(&["DISCARD"]);
        self.write_raw(&discard).await?;
        let reply = self.read_reply(false).await?;
        self.observe_reply("DISCARD", &reply);
        Ok(())
    }

    fn connect_failed(&mut self, reason: String) -> Error {
        warn!(addr = %self.config.addr(), %reason, "connect failed");
        self.stream = None;
        self.state = State::Closed;
        self.status.set_ready(false);
        self.emit(Event::ConnectError(reason.clone()));
        self.schedule_reconnect();
        Error::Connect(reason)
    }

    fn broken(&mut self, reason: String) -> Error {
        error!(addr = %self.config.addr(), %reason, "connection error");
        self.emit(Event::Error(reason.clone()));
        self.close_socket();
        self.emit(Event::Disconnected { had_error: true });
        self.schedule_reconnect();
        Error::Transport(reason)
    }

    fn malformed(&mut self, err: FrameError) -> Error {
        let err: Error = err.into();
        self.emit(Event::RedisError(err.to_string()));
        err
    }

    fn close_socket(&mut self) {
        self.stream = None;
        self.framer.clear();
        self.state = State::Closed;
        self.status.set_ready(false);
        self.status.set_transaction_open(false);
        self.pending_discard = false;
    }

    fn schedule_reconnect(&mut self) {
        if !self.reconnect_enabled {
            return;
        }
        if let Some(delay) = self.config.auto_reconnect_after {
            self.reconnect_at = Some(Instant::now() + delay);
            warn!(addr = %self.config.addr(), ?delay, "reconnect scheduled");
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_is_idle() {
        let conn = Connection::new(Config::default());

        assert_eq!(conn.state(), State::Idle);
        assert!(!conn.status.is_ready());
        assert!(!conn.status.is_busy());
    }

    #[test]
    fn multi_reply_opens_and_exec_closes_the_transaction() {
        let mut conn = Connection::new(Config::default());

        conn.observe_reply("MULTI", &Frame::Simple("OK".to_string()));
        assert!(conn.status.transaction_open());

        conn.observe_reply("EXEC", &Frame::Array(Some(vec![])));
        assert!(!conn.status.transaction_open());
    }

    #[test]
    fn failed_multi_leaves_transaction_closed() {
        let mut conn = Connection::new(Config::default());

        conn.observe_reply("MULTI", &Frame::Error("ERR nope".to_string()));

        assert!(!conn.status.transaction_open());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut conn = Connection::new(Config::default());

        conn.disconnect().await;
        conn.disconnect().await;

        assert_eq!(conn.state(), State::Closed);
    }

    #[tokio::test]
    async fn send_after_disconnect_fails() {
        let mut conn = Connection::new(Config::default());
        conn.disconnect().await;

        let cmd = crate::frame::serialize_command(&["PING"]);
        let err = conn.send_raw(cmd, false).await.unwrap_err();

        assert!(matches!(err, Error::Transport(_)));
    }
}
