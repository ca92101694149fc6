//! In-memory transport for tests.
//!
//! [`MockTransport::pair`] returns the transport handed to the link and a
//! [`MockBoard`] that plays the controller: it reads the CR-terminated
//! commands the host writes and answers with CRLF-terminated lines.

use super::error::PortError;
use super::traits::{BoxedIo, Transport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Host side of an in-memory board connection.
pub struct MockTransport {
    name: String,
    io: Option<DuplexStream>,
    opens: Arc<AtomicUsize>,
}

/// Board side of an in-memory connection.
///
/// # Example
/// ```
/// use buildhat::port::{MockTransport, Transport};
/// use tokio::io::AsyncWriteExt;
///
/// # tokio_test::block_on(async {
/// let (mut transport, mut board) = MockTransport::pair("MOCK0");
/// let mut io = transport.open().await.unwrap();
/// io.write_all(b"list\r").await.unwrap();
/// assert_eq!(board.next_command().await.as_deref(), Some("list"));
/// # });
/// ```
pub struct MockBoard {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    opens: Arc<AtomicUsize>,
}

impl MockTransport {
    /// Create a connected transport/board pair.
    pub fn pair(name: impl Into<String>) -> (MockTransport, MockBoard) {
        let (host, board) = tokio::io::duplex(PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(board);
        let opens = Arc::new(AtomicUsize::new(0));
        (
            MockTransport {
                name: name.into(),
                io: Some(host),
                opens: Arc::clone(&opens),
            },
            MockBoard {
                reader: BufReader::new(reader),
                writer,
                opens,
            },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<BoxedIo, PortError> {
        let io = self.io.take().ok_or(PortError::AlreadyOpen)?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(io))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("name", &self.name)
            .field("opened", &self.io.is_none())
            .finish()
    }
}

impl MockBoard {
    /// Number of times the host side has been opened.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Read the next command written by the host, without its CR terminator.
    ///
    /// Returns `None` once the host side has gone away.
    pub async fn next_command(&mut self) -> Option<String> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\r', &mut buf).await {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                Some(String::from_utf8_lossy(&buf).into_owned())
            }
        }
    }

    /// Send one line to the host, terminated with CRLF.
    pub async fn send_line(&mut self, line: &str) -> Result<(), PortError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send several lines in order.
    pub async fn send_lines<I, S>(&mut self, lines: I) -> Result<(), PortError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.send_line(line.as_ref()).await?;
        }
        Ok(())
    }

    /// Send raw bytes with no terminator, for exercising partial lines.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for MockBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBoard")
            .field("opens", &self.open_count())
            .finish()
    }
}
