//! A minimal RESP2 codec: just enough of the wire protocol for the verbs
//! `dispatcher` implements, built the idiomatic-tokio way
//! (`tokio_util::codec`) rather than hand-rolled buffering over a raw
//! socket.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// One parsed command: the verb and its arguments, still raw bytes —
/// `dispatcher` is responsible for interpreting them.
pub type Command = Vec<Vec<u8>>;

/// A reply the dispatcher hands back to the codec for encoding: the five
/// RESP reply kinds a command handler ever needs to produce.
#[derive(Debug, Clone)]
pub enum Reply {
    SimpleString(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Vec<u8>>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::SimpleString("OK".to_string())
    }

    pub fn nil() -> Self {
        Reply::Bulk(None)
    }
}

#[derive(Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Command;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Command>> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == b'*' {
            decode_array(src)
        } else {
            decode_inline(src)
        }
    }
}

/// `*<n>\r\n$<len>\r\n<bytes>\r\n` repeated `n` times — the framing every
/// real RESP client (redis-cli, hiredis, go-redisproto) sends for commands.
fn decode_array(src: &mut BytesMut) -> io::Result<Option<Command>> {
    let Some(header_end) = find_crlf(src, 0) else {
        return Ok(None);
    };
    let count: i64 = parse_prefixed_int(&src[1..header_end], '*')?;
    if count < 0 {
        src.advance(header_end + 2);
        return Ok(Some(Vec::new()));
    }

    let mut cursor = header_end + 2;
    let mut args = Vec::with_capacity(count as usize);

    for _ in 0..count {
        if cursor >= src.len() || src[cursor] != b'$' {
            let Some(_) = find_crlf(src, cursor) else {
                return Ok(None);
            };
            return Err(protocol_error("expected bulk string ('$')"));
        }
        let Some(len_end) = find_crlf(src, cursor) else {
            return Ok(None);
        };
        let len: i64 = parse_prefixed_int(&src[cursor + 1..len_end], '$')?;
        if len < 0 {
            return Err(protocol_error("negative bulk length"));
        }
        let len = len as usize;
        let data_start = len_end + 2;
        let data_end = data_start + len;
        if src.len() < data_end + 2 {
            return Ok(None);
        }
        args.push(src[data_start..data_end].to_vec());
        cursor = data_end + 2;
    }

    src.advance(cursor);
    Ok(Some(args))
}

/// A bare line of space-separated tokens, for clients (and health checks)
/// that don't speak full RESP arrays — the same affordance real Redis
/// offers alongside its binary protocol.
fn decode_inline(src: &mut BytesMut) -> io::Result<Option<Command>> {
    let Some(line_end) = find_lf(src, 0) else {
        if src.len() > 64 * 1024 {
            return Err(protocol_error("inline command too long"));
        }
        return Ok(None);
    };

    let line_bytes_end = if line_end > 0 && src[line_end - 1] == b'\r' {
        line_end - 1
    } else {
        line_end
    };
    let line = src[..line_bytes_end].to_vec();
    src.advance(line_end + 1);

    let args = line
        .split(|b| *b == b' ')
        .filter(|tok| !tok.is_empty())
        .map(|tok| tok.to_vec())
        .collect();
    Ok(Some(args))
}

fn find_crlf(src: &BytesMut, from: usize) -> Option<usize> {
    (from..src.len().saturating_sub(1)).find(|&i| src[i] == b'\r' && src[i + 1] == b'\n')
}

fn find_lf(src: &BytesMut, from: usize) -> Option<usize> {
    (from..src.len()).find(|&i| src[i] == b'\n')
}

fn parse_prefixed_int(bytes: &[u8], prefix: char) -> io::Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| protocol_error(&format!("invalid integer after '{prefix}'")))
}

fn protocol_error(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

impl Encoder<Reply> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, reply: Reply, dst: &mut BytesMut) -> io::Result<()> {
        match reply {
            Reply::SimpleString(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Error(s) => {
                dst.put_u8(b'-');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                dst.put_u8(b':');
                dst.put_slice(n.to_string().as_bytes());
                dst.put_slice(b"\r\n");
            }
            Reply::Bulk(None) => dst.put_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                dst.put_u8(b'$');
                dst.put_slice(data.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                dst.put_slice(&data);
                dst.put_slice(b"\r\n");
            }
            Reply::Array(items) => {
                dst.put_u8(b'*');
                dst.put_slice(items.len().to_string().as_bytes());
                dst.put_slice(b"\r\n");
                for item in items {
                    dst.put_u8(b'$');
                    dst.put_slice(item.len().to_string().as_bytes());
                    dst.put_slice(b"\r\n");
                    dst.put_slice(&item);
                    dst.put_slice(b"\r\n");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_standard_array_command() {
        let mut buf = BytesMut::from(&b"*3\r\n$5\r\nLPUSH\r\n$2\r\nq1\r\n$5\r\nhello\r\n"[..]);
        let mut codec = RespCodec;
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd, vec![b"LPUSH".to_vec(), b"q1".to_vec(), b"hello".to_vec()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let mut buf = BytesMut::from(&b"*2\r\n$4\r\nPING"[..]);
        let mut codec = RespCodec;
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decodes_inline_commands() {
        let mut buf = BytesMut::from(&b"PING\r\n"[..]);
        let mut codec = RespCodec;
        let cmd = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cmd, vec![b"PING".to_vec()]);
    }

    #[test]
    fn encodes_every_reply_kind() {
        let mut codec = RespCodec;
        let mut buf = BytesMut::new();

        codec.encode(Reply::SimpleString("PONG".into()), &mut buf).unwrap();
        assert_eq!(&buf[..], b"+PONG\r\n");

        buf.clear();
        codec.encode(Reply::Integer(42), &mut buf).unwrap();
        assert_eq!(&buf[..], b":42\r\n");

        buf.clear();
        codec.encode(Reply::Bulk(Some(b"hi".to_vec())), &mut buf).unwrap();
        assert_eq!(&buf[..], b"$2\r\nhi\r\n");

        buf.clear();
        codec.encode(Reply::nil(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"$-1\r\n");

        buf.clear();
        codec.encode(Reply::Error("bad".into()), &mut buf).unwrap();
        assert_eq!(&buf[..], b"-bad\r\n");

        buf.clear();
        codec
            .encode(Reply::Array(vec![b"a".to_vec(), b"bb".to_vec()]), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"*2\r\n$1\r\na\r\n$2\r\nbb\r\n");
    }
}
