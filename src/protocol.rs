/*!
 * Binary Wire Protocol
 *
 * Every message on the wire is a frame: a little-endian `u32` body length
 * followed by the body. Request bodies are an argument count followed by
 * length-prefixed arguments:
 *
 *   | len: u32 | argc: u32 | len0: u32 | arg0 | len1: u32 | arg1 | ...
 *
 * Reply bodies are a single tagged value. Arrays carry only their element
 * count; the elements follow as nested values. All numbers are fixed-width
 * binary, so nothing is ever scanned for delimiters.
 */

use crate::error::{CommandError, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Largest frame body accepted or produced.
pub const K_MAX_MSG: usize = 4096;

/// Size of the frame length prefix.
pub const FRAME_HEADER: usize = 4;

/// Deepest array nesting `decode_reply` accepts. An array header takes
/// five bytes, so no reply that fits in a frame comes close.
pub const MAX_REPLY_DEPTH: usize = K_MAX_MSG / 5;

pub const TAG_NIL: u8 = 0x00;
pub const TAG_ERR: u8 = 0x01;
pub const TAG_STR: u8 = 0x02;
pub const TAG_INT: u8 = 0x03;
pub const TAG_DBL: u8 = 0x04;
pub const TAG_ARR: u8 = 0x05;

/// Commands understood by the server
///
/// Verbs are matched case-insensitively; keys, values and member names
/// are arbitrary bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    /// KEYS - list every key
    Keys,
    /// GET key
    Get(Bytes),
    /// SET key value
    Set(Bytes, Bytes),
    /// DEL key
    Del(Bytes),
    /// ZADD key score name
    ZAdd { key: Bytes, score: f64, name: Bytes },
    /// ZREM key name
    ZRem { key: Bytes, name: Bytes },
    /// ZSCORE key name
    ZScore { key: Bytes, name: Bytes },
    /// ZQUERY key score name offset limit
    ZQuery {
        key: Bytes,
        score: f64,
        name: Bytes,
        offset: i64,
        limit: usize,
    },
    /// ZRANK key name
    ZRank { key: Bytes, name: Bytes },
    /// ZCARD key
    ZCard(Bytes),
}

impl Cmd {
    /// Turn a decoded argument list into a command, checking verb and arity.
    pub fn from_args(args: &[Bytes]) -> Result<Cmd, CommandError> {
        let verb = args.first().ok_or(CommandError::Unknown)?;
        let is = |name: &str, argc: usize| args.len() == argc && verb.eq_ignore_ascii_case(name.as_bytes());

        let cmd = if is("keys", 1) {
            Cmd::Keys
        } else if is("get", 2) {
            Cmd::Get(args[1].clone())
        } else if is("set", 3) {
            Cmd::Set(args[1].clone(), args[2].clone())
        } else if is("del", 2) {
            Cmd::Del(args[1].clone())
        } else if is("zadd", 4) {
            Cmd::ZAdd {
                key: args[1].clone(),
                score: parse_score(&args[2])?,
                name: args[3].clone(),
            }
        } else if is("zrem", 3) {
            Cmd::ZRem {
                key: args[1].clone(),
                name: args[2].clone(),
            }
        } else if is("zscore", 3) {
            Cmd::ZScore {
                key: args[1].clone(),
                name: args[2].clone(),
            }
        } else if is("zquery", 6) {
            Cmd::ZQuery {
                key: args[1].clone(),
                score: parse_score(&args[2])?,
                name: args[3].clone(),
                offset: parse_int(&args[4])?,
                limit: parse_int(&args[5])?,
            }
        } else if is("zrank", 3) {
            Cmd::ZRank {
                key: args[1].clone(),
                name: args[2].clone(),
            }
        } else if is("zcard", 2) {
            Cmd::ZCard(args[1].clone())
        } else {
            return Err(CommandError::Unknown);
        };
        Ok(cmd)
    }
}

fn parse_score(b: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(CommandError::BadArg("expect fp number"))
}

fn parse_int<T: std::str::FromStr>(b: &[u8]) -> Result<T, CommandError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or(CommandError::BadArg("expect int"))
}

#[inline]
fn take_u32(cur: &mut &[u8]) -> Result<u32, ProtocolError> {
    if cur.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(cur.get_u32_le())
}

/// Encode a request frame from its arguments.
pub fn encode_request<A: AsRef<[u8]>>(args: &[A]) -> Result<Vec<u8>, ProtocolError> {
    let body = 4 + args.iter().map(|a| 4 + a.as_ref().len()).sum::<usize>();
    if body > K_MAX_MSG {
        return Err(ProtocolError::TooLong { len: body });
    }
    let mut out = Vec::with_capacity(FRAME_HEADER + body);
    out.put_u32_le(body as u32);
    out.put_u32_le(args.len() as u32);
    for a in args {
        let a = a.as_ref();
        out.put_u32_le(a.len() as u32);
        out.put_slice(a);
    }
    Ok(out)
}

/// Try to cut one request frame off the front of `data`.
///
/// # Returns
/// * `Ok(Some((consumed, args)))` - a complete frame
/// * `Ok(None)` - the frame is not complete yet
/// * `Err(...)` - the peer broke the protocol
pub fn decode_frame(data: &[u8]) -> Result<Option<(usize, Vec<Bytes>)>, ProtocolError> {
    let mut cur = data;
    if cur.len() < FRAME_HEADER {
        return Ok(None);
    }
    let len = cur.get_u32_le() as usize;
    if len > K_MAX_MSG {
        return Err(ProtocolError::TooLong { len });
    }
    if cur.len() < len {
        return Ok(None);
    }
    let args = parse_args(&cur[..len])?;
    Ok(Some((FRAME_HEADER + len, args)))
}

/// Decode a request body; every byte must belong to an argument.
pub fn parse_args(body: &[u8]) -> Result<Vec<Bytes>, ProtocolError> {
    let mut cur = body;
    let argc = take_u32(&mut cur)? as usize;
    if argc > K_MAX_MSG {
        return Err(ProtocolError::TooManyArgs { argc });
    }
    let mut args = Vec::with_capacity(argc.min(cur.len() / 4));
    for _ in 0..argc {
        let n = take_u32(&mut cur)? as usize;
        if cur.len() < n {
            return Err(ProtocolError::Truncated);
        }
        args.push(Bytes::copy_from_slice(&cur[..n]));
        cur.advance(n);
    }
    if !cur.is_empty() {
        return Err(ProtocolError::TrailingBytes { extra: cur.len() });
    }
    Ok(args)
}

/// A decoded reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Err { code: i32, msg: String },
    Str(Bytes),
    Int(i64),
    Dbl(f64),
    Arr(Vec<Reply>),
}

impl Reply {
    pub fn err(code: i32, msg: impl Into<String>) -> Self {
        Reply::Err { code, msg: msg.into() }
    }
}

//
// Reply encoders
//
// These append one value to a reply body. Arrays are written as a header
// and then their elements one by one.
//

#[inline]
pub fn write_nil(out: &mut BytesMut) {
    out.put_u8(TAG_NIL);
}

pub fn write_err(code: i32, msg: &str, out: &mut BytesMut) {
    out.reserve(1 + 4 + 4 + msg.len());
    out.put_u8(TAG_ERR);
    out.put_i32_le(code);
    out.put_u32_le(msg.len() as u32);
    out.put_slice(msg.as_bytes());
}

pub fn write_str(b: &[u8], out: &mut BytesMut) {
    out.reserve(1 + 4 + b.len());
    out.put_u8(TAG_STR);
    out.put_u32_le(b.len() as u32);
    out.put_slice(b);
}

#[inline]
pub fn write_int(i: i64, out: &mut BytesMut) {
    out.put_u8(TAG_INT);
    out.put_i64_le(i);
}

#[inline]
pub fn write_dbl(f: f64, out: &mut BytesMut) {
    out.put_u8(TAG_DBL);
    out.put_f64_le(f);
}

#[inline]
pub fn write_arr(n: usize, out: &mut BytesMut) {
    out.put_u8(TAG_ARR);
    out.put_u32_le(n as u32);
}

/// Start an array whose length is not known yet; finish with `end_arr`.
pub fn begin_arr(out: &mut BytesMut) -> usize {
    write_arr(0, out);
    out.len() - 4
}

pub fn end_arr(out: &mut BytesMut, at: usize, n: usize) {
    out[at..at + 4].copy_from_slice(&(n as u32).to_le_bytes());
}

pub fn encode_reply(r: &Reply, out: &mut BytesMut) {
    match r {
        Reply::Nil => write_nil(out),
        Reply::Err { code, msg } => write_err(*code, msg, out),
        Reply::Str(b) => write_str(b, out),
        Reply::Int(i) => write_int(*i, out),
        Reply::Dbl(f) => write_dbl(*f, out),
        Reply::Arr(items) => {
            write_arr(items.len(), out);
            for it in items {
                encode_reply(it, out);
            }
        }
    }
}

/// Decode one reply value from the front of `data`.
///
/// Returns the value and the number of bytes it occupied; an array's
/// size is the sum of its header and all nested values.
pub fn decode_reply(data: &[u8]) -> Result<(Reply, usize), ProtocolError> {
    let mut cur = data;
    let reply = read_reply(&mut cur, 0)?;
    Ok((reply, data.len() - cur.len()))
}

fn read_reply(cur: &mut &[u8], depth: usize) -> Result<Reply, ProtocolError> {
    if cur.is_empty() {
        return Err(ProtocolError::Truncated);
    }
    let tag = cur.get_u8();
    let reply = match tag {
        TAG_NIL => Reply::Nil,
        TAG_ERR => {
            if cur.remaining() < 8 {
                return Err(ProtocolError::Truncated);
            }
            let code = cur.get_i32_le();
            let n = cur.get_u32_le() as usize;
            if cur.remaining() < n {
                return Err(ProtocolError::Truncated);
            }
            let msg = String::from_utf8_lossy(&cur[..n]).into_owned();
            cur.advance(n);
            Reply::Err { code, msg }
        }
        TAG_STR => {
            let n = take_u32(cur)? as usize;
            if cur.remaining() < n {
                return Err(ProtocolError::Truncated);
            }
            let s = Bytes::copy_from_slice(&cur[..n]);
            cur.advance(n);
            Reply::Str(s)
        }
        TAG_INT => {
            if cur.remaining() < 8 {
                return Err(ProtocolError::Truncated);
            }
            Reply::Int(cur.get_i64_le())
        }
        TAG_DBL => {
            if cur.remaining() < 8 {
                return Err(ProtocolError::Truncated);
            }
            Reply::Dbl(cur.get_f64_le())
        }
        TAG_ARR => {
            if depth >= MAX_REPLY_DEPTH {
                return Err(ProtocolError::TooDeep {
                    limit: MAX_REPLY_DEPTH,
                });
            }
            let n = take_u32(cur)? as usize;
            // Every element takes at least its tag byte.
            if n > cur.remaining() {
                return Err(ProtocolError::Truncated);
            }
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(read_reply(cur, depth + 1)?);
            }
            Reply::Arr(items)
        }
        other => return Err(ProtocolError::UnknownTag(other)),
    };
    Ok(reply)
}

/// Frame a reply body into the front of `out` and return the frame size.
/// `out` must have room for `FRAME_HEADER + body.len()` bytes.
pub fn frame_into(body: &[u8], out: &mut [u8]) -> usize {
    let end = FRAME_HEADER + body.len();
    out[..FRAME_HEADER].copy_from_slice(&(body.len() as u32).to_le_bytes());
    out[FRAME_HEADER..end].copy_from_slice(body);
    end
}

/// Append a framed reply body to `out`.
pub fn write_frame(body: &[u8], out: &mut BytesMut) {
    let at = out.len();
    out.resize(at + FRAME_HEADER + body.len(), 0);
    frame_into(body, &mut out[at..]);
}

/// Try to cut one reply frame off the front of `data` (client side).
pub fn decode_reply_frame(data: &[u8]) -> Result<Option<(usize, Reply)>, ProtocolError> {
    let mut cur = data;
    if cur.len() < FRAME_HEADER {
        return Ok(None);
    }
    let len = cur.get_u32_le() as usize;
    if len > K_MAX_MSG {
        return Err(ProtocolError::TooLong { len });
    }
    if cur.len() < len {
        return Ok(None);
    }
    let (reply, used) = decode_reply(&cur[..len])?;
    if used != len {
        return Err(ProtocolError::TrailingBytes { extra: len - used });
    }
    Ok(Some((FRAME_HEADER + len, reply)))
}
