//! Reading the HTTP response to a proxy handshake.

use crate::error::DialError;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest status or header line accepted.
const MAX_LINE: u64 = 8 * 1024;

/// Most header lines accepted in one response.
const MAX_HEADERS: usize = 100;

/// Status line and headers of an HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub status_line: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read a response head, leaving any body bytes in `reader`.
pub async fn read_response_head<R>(reader: &mut R) -> io::Result<ResponseHead>
where
    R: AsyncBufRead + Unpin,
{
    let status_line = read_line(reader).await?;
    let status = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADERS {
            return Err(invalid("too many response headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| invalid("malformed response header"))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(ResponseHead {
        status,
        status_line,
        headers,
    })
}

/// Read the handshake response and require a 2xx status.
///
/// The read races `timeout`. When the timer wins the pending read is dropped
/// and the failure is reported as [`DialError::Timeout`]; the caller is
/// expected to close the connection.
pub async fn expect_success<R>(
    reader: &mut R,
    target: &str,
    timeout: Duration,
) -> Result<ResponseHead, DialError>
where
    R: AsyncBufRead + Unpin,
{
    let read = read_response_head(reader);
    let head = if timeout.is_zero() {
        read.await
    } else {
        tokio::select! {
            head = read => head,
            () = tokio::time::sleep(timeout) => {
                return Err(DialError::Timeout {
                    target: target.to_string(),
                    timeout,
                });
            }
        }
    };

    let head = head.map_err(|source| DialError::Io {
        target: target.to_string(),
        source,
    })?;

    if !head.is_success() {
        return Err(DialError::Protocol {
            target: target.to_string(),
            status: head.status,
            status_line: head.status_line,
        });
    }
    Ok(head)
}

async fn read_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.take(MAX_LINE).read_line(&mut line).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before response completed",
        ));
    }
    if !line.ends_with('\n') {
        return Err(invalid("response line too long"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_status_line(line: &str) -> io::Result<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(invalid("malformed status line"));
    }
    parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| invalid("malformed status code"))
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
