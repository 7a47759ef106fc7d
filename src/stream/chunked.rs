//! HTTP/1.1 chunked transfer coding as a duplex stream.
//!
//! After a successful POST handshake both directions of the socket carry a
//! chunked body: each write becomes one chunk and each read returns bytes
//! from at most one chunk.

use super::control::StreamControl;
use super::{Addrs, AsyncStream, BoxedIo, CLOSE_GRACE, StreamConnection, StreamIo};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Terminating zero-length chunk with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// Longest chunk-size or trailer line accepted.
const MAX_LINE: u64 = 4096;

/// Encode `data` as a single chunk.
pub fn encode_chunk(data: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(data.len() + 20);
    frame.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    frame.put_slice(data);
    frame.put_slice(b"\r\n");
    frame
}

/// Incremental chunked-body decoder.
struct ChunkDecoder<R> {
    inner: BufReader<R>,
    remaining: u64,
    need_crlf: bool,
    done: bool,
}

impl<R: AsyncRead + Unpin> ChunkDecoder<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            remaining: 0,
            need_crlf: false,
            done: false,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            if self.need_crlf {
                let line = self.read_line().await?;
                if !line.is_empty() {
                    return Err(invalid("missing CRLF after chunk data"));
                }
                self.need_crlf = false;
            }

            let size = parse_chunk_size(&self.read_line().await?)?;
            if size == 0 {
                while !self.read_line().await?.is_empty() {}
                self.done = true;
                return Ok(0);
            }
            self.remaining = size;
        }

        let max = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let n = self.inner.read(&mut buf[..max]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended inside a chunk",
            ));
        }
        self.remaining -= n as u64;
        self.need_crlf = self.remaining == 0;
        Ok(n)
    }

    /// Read one line without its line terminator.
    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let n = (&mut self.inner).take(MAX_LINE).read_line(&mut line).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended before the last chunk",
            ));
        }
        if !line.ends_with('\n') {
            return Err(invalid("chunk line too long"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

fn parse_chunk_size(line: &str) -> io::Result<u64> {
    let size = line.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| invalid("malformed chunk size"))
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// [`StreamConnection`] speaking chunked coding in both directions.
pub struct ChunkedStreamAdapter<S> {
    reader: Mutex<ChunkDecoder<ReadHalf<S>>>,
    writer: Mutex<WriteHalf<S>>,
    control: StreamControl,
    closing: AtomicBool,
    addrs: Addrs,
}

impl<S: AsyncStream + 'static> ChunkedStreamAdapter<S> {
    pub fn new(io: S, addrs: Addrs) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: Mutex::new(ChunkDecoder::new(reader)),
            writer: Mutex::new(writer),
            control: StreamControl::new(),
            closing: AtomicBool::new(false),
            addrs,
        }
    }

    /// Write the terminating chunk.
    async fn finalize(&self) -> io::Result<()> {
        let write_last = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(LAST_CHUNK).await?;
            writer.flush().await
        };
        match tokio::time::timeout(CLOSE_GRACE, write_last).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "timed out writing the last chunk",
            )),
        }
    }
}

#[async_trait]
impl<S: AsyncStream + 'static> StreamConnection for ChunkedStreamAdapter<S> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.control
            .read(async { self.reader.lock().await.read(buf).await })
            .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        // A zero-size chunk would end the body.
        if buf.is_empty() {
            return Ok(0);
        }
        let frame = encode_chunk(buf);
        self.control
            .write(async {
                let mut writer = self.writer.lock().await;
                writer.write_all(&frame).await?;
                writer.flush().await?;
                Ok(buf.len())
            })
            .await
    }

    async fn close(&self) -> io::Result<()> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let finalized = self.finalize().await;
        self.control.close();

        let shutdown = async { self.writer.lock().await.shutdown().await };
        let shutdown = tokio::time::timeout(CLOSE_GRACE, shutdown).await;

        finalized?;
        match shutdown {
            Ok(Err(e)) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        self.control.set_deadline(deadline);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.local
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.addrs.peer
    }

    fn into_io(self: Box<Self>) -> BoxedIo {
        Box::new(StreamIo::new(self))
    }
}
