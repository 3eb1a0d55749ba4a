//! TCP transport for the replication mesh.
//!
//! The node only needs a reliable, ordered byte stream per connection:
//! connect, accept, send a line, receive lines, close. Closing happens by
//! dropping (or shutting down) the halves handed out here.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Binds the listening socket for inbound peers.
pub async fn bind(addr: &str) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    debug!("Bound listener on {}", listener.local_addr()?);
    Ok(listener)
}

/// Dials a peer.
pub async fn connect(addr: &str) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Newline-delimited reader that skips lines which are not valid UTF-8.
///
/// Partial reads are kept across calls, so `next_line` can be used as a
/// `select!` branch without losing bytes.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Returns the next line without its terminator, or `None` at EOF.
    ///
    /// Only I/O failures are errors; undecodable lines are dropped.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let read = self.inner.read_until(b'\n', &mut self.buf).await?;
            if read == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let mut raw = std::mem::take(&mut self.buf);
            if raw.last() == Some(&b'\n') {
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
            }

            match String::from_utf8(raw) {
                Ok(line) => return Ok(Some(line)),
                Err(e) => debug!("Discarding line that is not UTF-8: {}", e.utf8_error()),
            }
        }
    }
}

/// Lazily yields newline-delimited lines from `reader`.
pub fn receive_lines<R>(reader: R) -> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    LineReader {
        inner: BufReader::new(reader),
        buf: Vec::new(),
    }
}

/// Writes one already-terminated line and flushes it.
pub async fn send_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
