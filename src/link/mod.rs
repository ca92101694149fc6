//! Line-oriented link to the controller board.
//!
//! # Architecture
//!
//! ```text
//! bytes ─> LineFramer ─> WatcherRegistry ─(unclaimed)─> lines channel ─> waiters
//!                              │
//!                              └─(claimed)─> watcher side effects
//! ```
//!
//! Sample lines (`P<n>M<m>: ...`) never reach the lines channel. A sample no
//! watcher claims, such as one the board sent before a stream's `select`
//! cancellation took effect, is dropped.
//!
//! A [`SerialLink`] owns one transport, one watcher registry and one command
//! queue. The transport is opened on first use and read by a background task
//! that frames lines and dispatches them synchronously, so watchers always see
//! lines in arrival order. Anything that writes a command and then collects
//! its response must go through the queue ([`SerialLink::atomic`],
//! [`SerialLink::wait`], [`SerialLink::send`]); [`SerialLink::immediate`]
//! bypasses it for fire-and-forget control messages.

pub mod command;
pub mod events;
pub mod framer;
pub mod queue;
pub mod watcher;

pub use command::CommandLine;
pub use events::{EventChannel, Subscription};
pub use framer::LineFramer;
pub use queue::CommandQueue;
pub use watcher::{LinePredicate, WatcherId, WatcherRegistry};

use crate::error::{HatError, HatResult};
use crate::port::{BoxedIo, PortError, Transport};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 1024;

static PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^P\d+>").expect("valid regex"));
static SAMPLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^P\d+M\d+:").expect("valid regex"));

/// True for the lines that end the response to an ordinary command: an
/// empty line or a `P<n>>` prompt.
pub fn is_prompt(line: &str) -> bool {
    line.is_empty() || PROMPT.is_match(line)
}

/// Which way a logged line travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Tx,
    Rx,
}

/// A line mirrored onto the diagnostic log channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    pub direction: Direction,
    pub line: String,
    pub at: DateTime<Utc>,
}

impl LogMessage {
    fn new(direction: Direction, line: impl Into<String>) -> Self {
        Self {
            direction,
            line: line.into(),
            at: Utc::now(),
        }
    }
}

/// Behaviour knobs for a link.
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    /// Upper bound on any single wait for response lines. `None` waits forever.
    pub response_timeout: Option<Duration>,
}

struct LinkShared {
    name: String,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    opened: OnceCell<()>,
    writer: tokio::sync::Mutex<Option<WriteHalf<BoxedIo>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    watchers: WatcherRegistry,
    queue: CommandQueue,
    lines: EventChannel<String>,
    log: EventChannel<LogMessage>,
    raw: EventChannel<Vec<u8>>,
    errors: EventChannel<Arc<HatError>>,
    options: LinkOptions,
}

impl LinkShared {
    fn dispatch(&self, line: String) {
        debug!(direction = "rx", "{}", line);
        self.log.publish(LogMessage::new(Direction::Rx, line.as_str()));
        if self.watchers.offer(&line).is_some() {
            return;
        }
        // Samples belong to their stream; one nobody claims is stale.
        if SAMPLE.is_match(&line) {
            trace!(line = %line, "dropping unclaimed sample");
            return;
        }
        self.lines.publish(line);
    }
}

impl Drop for LinkShared {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

/// Cheaply cloneable handle to a board connection.
#[derive(Clone)]
pub struct SerialLink {
    shared: Arc<LinkShared>,
}

/// Non-owning handle to a [`SerialLink`], for callbacks the link itself stores.
#[derive(Clone)]
pub struct WeakLink(Weak<LinkShared>);

impl WeakLink {
    pub fn upgrade(&self) -> Option<SerialLink> {
        self.0.upgrade().map(|shared| SerialLink { shared })
    }
}

impl SerialLink {
    /// Wrap `transport`. Nothing is opened until the first write.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_options(transport, LinkOptions::default())
    }

    pub fn with_options(transport: impl Transport + 'static, options: LinkOptions) -> Self {
        let name = transport.name().to_string();
        Self {
            shared: Arc::new(LinkShared {
                name,
                transport: tokio::sync::Mutex::new(Some(Box::new(transport))),
                opened: OnceCell::new(),
                writer: tokio::sync::Mutex::new(None),
                reader: Mutex::new(None),
                watchers: WatcherRegistry::new(),
                queue: CommandQueue::new(),
                lines: EventChannel::new(),
                log: EventChannel::new(),
                raw: EventChannel::new(),
                errors: EventChannel::new(),
                options,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn downgrade(&self) -> WeakLink {
        WeakLink(Arc::downgrade(&self.shared))
    }

    pub fn options(&self) -> &LinkOptions {
        &self.shared.options
    }

    /// Whether the transport has been opened.
    pub fn is_open(&self) -> bool {
        self.shared.opened.initialized()
    }

    async fn init(&self) -> HatResult<()> {
        let shared = &self.shared;
        shared
            .opened
            .get_or_try_init(|| async {
                let mut slot = shared.transport.lock().await;
                let transport = slot.as_mut().ok_or(HatError::LinkClosed)?;
                let io = transport.open().await?;
                let (rd, wr) = tokio::io::split(io);
                *shared.writer.lock().await = Some(wr);
                let handle = tokio::spawn(read_loop(rd, Arc::downgrade(shared)));
                *shared.reader.lock() = Some(handle);
                debug!("Opened link to {}", shared.name);
                Ok::<(), HatError>(())
            })
            .await?;
        Ok(())
    }

    async fn write_line(&self, cmd: CommandLine) -> HatResult<()> {
        self.init().await?;
        {
            let mut writer = self.shared.writer.lock().await;
            let wr = writer.as_mut().ok_or(PortError::NotOpen)?;
            wr.write_all(&cmd.to_wire()).await?;
            wr.flush().await?;
        }
        let line = cmd.joined();
        debug!(direction = "tx", "{}", line);
        self.shared.log.publish(LogMessage::new(Direction::Tx, line));
        Ok(())
    }

    /// Write `cmd` now, outside the transaction queue.
    ///
    /// Completes once the transport has accepted the bytes. Only for control
    /// messages whose response does not need correlating.
    pub fn immediate(
        &self,
        cmd: impl Into<CommandLine>,
    ) -> impl Future<Output = HatResult<()>> + Send + 'static {
        let link = self.clone();
        let cmd = cmd.into();
        async move { link.write_line(cmd).await }
    }

    /// Run `job` as one transaction. See [`CommandQueue::atomic`].
    pub fn atomic<F, T>(&self, job: F) -> impl Future<Output = HatResult<T>> + Send + 'static
    where
        F: Future<Output = HatResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.queue.atomic(job)
    }

    /// Number of queued or running transactions.
    pub fn pending_transactions(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Write `cmd` in a transaction and collect the non-empty response lines
    /// up to and including the first line satisfying `until`.
    pub fn wait<P>(
        &self,
        cmd: impl Into<CommandLine>,
        until: P,
    ) -> impl Future<Output = HatResult<Vec<String>>> + Send + 'static
    where
        P: Fn(&str) -> bool + Send + 'static,
    {
        let link = self.clone();
        let cmd = cmd.into();
        let limit = self.shared.options.response_timeout;
        self.atomic(async move {
            let lines = link.subscribe_lines();
            link.write_line(cmd).await?;
            bounded(limit, collect_until(lines, until)).await
        })
    }

    /// Write `cmd` in a transaction and wait for the board's prompt.
    pub fn send(
        &self,
        cmd: impl Into<CommandLine>,
    ) -> impl Future<Output = HatResult<()>> + Send + 'static {
        let reply = self.wait(cmd, is_prompt);
        async move {
            reply.await?;
            Ok(())
        }
    }

    /// Collect generic lines, without writing anything, up to and including
    /// the first one satisfying `until`.
    ///
    /// Collection starts when this is called, not when the future is polled.
    pub fn keep_lines<P>(
        &self,
        until: P,
    ) -> impl Future<Output = HatResult<Vec<String>>> + Send + 'static
    where
        P: Fn(&str) -> bool + Send + 'static,
    {
        let lines = self.subscribe_lines();
        bounded(self.shared.options.response_timeout, collect_until(lines, until))
    }

    /// Resolve with the first line satisfying `pred`, claiming it.
    ///
    /// The watcher is installed when this is called and removed when it fires
    /// or the returned future is dropped.
    pub fn wait_for<P>(&self, pred: P) -> impl Future<Output = HatResult<String>> + Send + 'static
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.shared.watchers.add_once(move |line| {
            if !pred(line) {
                return false;
            }
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(line.to_string());
            }
            true
        });
        let guard = WatcherGuard {
            link: self.downgrade(),
            id,
        };
        let limit = self.shared.options.response_timeout;
        async move {
            let _guard = guard;
            bounded(limit, async { rx.await.map_err(|_| HatError::LinkClosed) }).await
        }
    }

    /// Register a persistent watcher. See [`WatcherRegistry`].
    pub fn add_watcher<F>(&self, pred: F) -> WatcherId
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.shared.watchers.add(pred)
    }

    /// Remove a watcher; a no-op if it is already gone.
    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        self.shared.watchers.remove(id)
    }

    pub fn watcher_count(&self) -> usize {
        self.shared.watchers.len()
    }

    /// Lines no watcher claimed.
    pub fn subscribe_lines(&self) -> Subscription<String> {
        self.shared.lines.subscribe()
    }

    /// Every line written or received, tagged tx/rx.
    pub fn subscribe_log(&self) -> Subscription<LogMessage> {
        self.shared.log.subscribe()
    }

    /// Raw received chunks, before framing.
    pub fn subscribe_raw(&self) -> Subscription<Vec<u8>> {
        self.shared.raw.subscribe()
    }

    /// Asynchronous error notifications.
    pub fn subscribe_errors(&self) -> Subscription<Arc<HatError>> {
        self.shared.errors.subscribe()
    }

    /// Broadcast an error notification to error subscribers.
    pub fn notify_error(&self, err: HatError) {
        warn!("{}", err);
        self.shared.errors.publish(Arc::new(err));
    }

    /// Stop reading, shut the stream down and end every line subscription.
    pub async fn close(&self) -> HatResult<()> {
        let reader = self.shared.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
        }
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut wr) = writer {
            wr.shutdown().await?;
        }
        self.shared.lines.close();
        debug!("Closed link to {}", self.shared.name);
        Ok(())
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.shared.name)
            .field("open", &self.is_open())
            .field("watchers", &self.shared.watchers)
            .field("queue", &self.shared.queue)
            .finish()
    }
}

/// Removes a watcher when dropped.
struct WatcherGuard {
    link: WeakLink,
    id: WatcherId,
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        if let Some(link) = self.link.upgrade() {
            link.remove_watcher(self.id);
        }
    }
}

async fn collect_until<P>(mut lines: Subscription<String>, until: P) -> HatResult<Vec<String>>
where
    P: Fn(&str) -> bool,
{
    let mut kept = Vec::new();
    while let Some(line) = lines.recv().await {
        let done = until(&line);
        if !line.is_empty() {
            kept.push(line);
        }
        if done {
            return Ok(kept);
        }
    }
    Err(HatError::LinkClosed)
}

async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> HatResult<T>
where
    F: Future<Output = HatResult<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| HatError::Timeout(limit))?,
    }
}

async fn read_loop(mut rd: ReadHalf<BoxedIo>, link: Weak<LinkShared>) {
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let result = rd.read(&mut buf).await;
        let Some(shared) = link.upgrade() else {
            break;
        };
        match result {
            Ok(0) => {
                debug!("Board closed the link to {}", shared.name);
                shared.lines.close();
                break;
            }
            Ok(n) => {
                shared.raw.publish(buf[..n].to_vec());
                for line in framer.push(&buf[..n]) {
                    shared.dispatch(line);
                }
            }
            Err(e) => {
                warn!("Read from {} failed: {}", shared.name, e);
                shared.errors.publish(Arc::new(HatError::from(e)));
                shared.lines.close();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MockTransport;

    #[test]
    fn test_prompt_detection() {
        assert!(is_prompt(""));
        assert!(is_prompt("P0> "));
        assert!(is_prompt("p3>"));
        assert!(!is_prompt("P0: connecting"));
        assert!(!is_prompt("deltat=12"));
    }

    #[tokio::test]
    async fn test_link_opens_lazily() {
        let (transport, mut board) = MockTransport::pair("MOCK0");
        let link = SerialLink::new(transport);
        assert!(!link.is_open());
        assert_eq!(board.open_count(), 0);

        link.immediate(["port 0", "pwm"]).await.unwrap();
        assert!(link.is_open());
        assert_eq!(board.next_command().await.as_deref(), Some("port 0; pwm"));
        assert_eq!(board.open_count(), 1);
    }

    #[tokio::test]
    async fn test_writes_are_logged() {
        let (transport, mut board) = MockTransport::pair("MOCK0");
        let link = SerialLink::new(transport);
        let mut log = link.subscribe_log();

        link.immediate("echo 0").await.unwrap();
        board.send_line("P0: disconnected").await.unwrap();

        let tx = log.recv().await.unwrap();
        assert_eq!(tx.direction, Direction::Tx);
        assert_eq!(tx.line, "echo 0");
        let rx = log.recv().await.unwrap();
        assert_eq!(rx.direction, Direction::Rx);
        assert_eq!(rx.line, "P0: disconnected");
    }
}
