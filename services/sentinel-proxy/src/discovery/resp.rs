//! Sentinel reply decoding.
//!
//! Replies are decoded as generic RESP2 values from an accumulating buffer,
//! so the decoder never depends on how the bytes were split across reads.
//! The master lookup answer is an array whose first two elements are the
//! host and port bulk strings; anything else is reported as a `ReplyError`.

use bytes::Bytes;

use crate::endpoint::EndpointAddress;
use crate::error::{AddressError, ReplyError};

/// Largest reply accepted before the connection is considered broken.
pub const MAX_REPLY_BYTES: usize = 64 * 1024;

/// Deepest array nesting accepted.
const MAX_DEPTH: usize = 8;

/// A decoded reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Simple(_) => "simple string",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk string",
            Reply::Array(_) => "array",
        }
    }
}

/// Decode one reply from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the reply and
/// the number of bytes it occupied.
pub fn decode(buf: &[u8]) -> Result<Option<(Reply, usize)>, ReplyError> {
    if buf.len() > MAX_REPLY_BYTES {
        return Err(ReplyError::TooLarge(MAX_REPLY_BYTES));
    }
    decode_at(buf, 0, 0)
}

fn decode_at(buf: &[u8], pos: usize, depth: usize) -> Result<Option<(Reply, usize)>, ReplyError> {
    if depth > MAX_DEPTH {
        return Err(ReplyError::Malformed(format!(
            "arrays nested deeper than {MAX_DEPTH}"
        )));
    }

    let Some((line, next)) = read_line(buf, pos) else {
        return Ok(None);
    };
    let Some((&tag, body)) = line.split_first() else {
        return Err(ReplyError::Malformed("empty line".to_string()));
    };

    match tag {
        b'+' => Ok(Some((Reply::Simple(text(body)?), next))),
        b'-' => Ok(Some((Reply::Error(text(body)?), next))),
        b':' => Ok(Some((Reply::Integer(integer(body)?), next))),
        b'$' => {
            let Some(len) = length(body)? else {
                return Ok(Some((Reply::Bulk(None), next)));
            };
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ReplyError::Malformed(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&buf[next..end]);
            Ok(Some((Reply::Bulk(Some(data)), end + 2)))
        }
        b'*' => {
            let Some(count) = length(body)? else {
                return Ok(Some((Reply::Array(None), next)));
            };
            // Each element takes at least 3 bytes; cap the preallocation.
            let mut items = Vec::with_capacity(count.min(16));
            let mut cursor = next;
            for _ in 0..count {
                match decode_at(buf, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Reply::Array(Some(items)), cursor)))
        }
        other => Err(ReplyError::Malformed(format!(
            "unexpected type byte 0x{other:02x}"
        ))),
    }
}

/// Find the CRLF-terminated line starting at `pos`.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(pos..)?;
    let i = rest.windows(2).position(|w| w == b"\r\n")?;
    Some((&rest[..i], pos + i + 2))
}

fn text(body: &[u8]) -> Result<String, ReplyError> {
    String::from_utf8(body.to_vec())
        .map_err(|_| ReplyError::Malformed("line is not valid UTF-8".to_string()))
}

fn integer(body: &[u8]) -> Result<i64, ReplyError> {
    std::str::from_utf8(body)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ReplyError::Malformed(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(body)
            ))
        })
}

/// Parse a bulk/array length header; `-1` is the null marker.
fn length(body: &[u8]) -> Result<Option<usize>, ReplyError> {
    match integer(body)? {
        -1 => Ok(None),
        n if n < 0 => Err(ReplyError::Malformed(format!("negative length {n}"))),
        n if n as u64 > MAX_REPLY_BYTES as u64 => Err(ReplyError::TooLarge(MAX_REPLY_BYTES)),
        n => Ok(Some(n as usize)),
    }
}

/// Extract the master address from a `get-master-addr-by-name` reply.
pub fn master_addr(reply: Reply) -> Result<EndpointAddress, ReplyError> {
    let items = match reply {
        Reply::Array(Some(items)) => items,
        Reply::Array(None) | Reply::Bulk(None) => return Err(ReplyError::UnknownMaster),
        Reply::Error(msg) => return Err(ReplyError::Server(msg)),
        other => {
            return Err(ReplyError::Unexpected(format!(
                "expected array, got {}",
                other.kind()
            )))
        }
    };

    if items.len() < 2 {
        return Err(ReplyError::Unexpected(format!(
            "expected at least 2 elements, got {}",
            items.len()
        )));
    }

    let mut fields = items.into_iter();
    let host = bulk_text(fields.next(), "host")?;
    let port = bulk_text(fields.next(), "port")?;
    let port = port
        .parse::<u16>()
        .map_err(|_| AddressError::InvalidPort(port.clone()))?;

    Ok(EndpointAddress::new(host, port)?)
}

fn bulk_text(item: Option<Reply>, field: &str) -> Result<String, ReplyError> {
    match item {
        Some(Reply::Bulk(Some(data))) => String::from_utf8(data.to_vec())
            .map_err(|_| ReplyError::Unexpected(format!("{field} is not valid UTF-8"))),
        Some(Reply::Simple(s)) => Ok(s),
        Some(other) => Err(ReplyError::Unexpected(format!(
            "{field} is a {}",
            other.kind()
        ))),
        None => Err(ReplyError::Unexpected(format!("missing {field}"))),
    }
}
