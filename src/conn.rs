/*!
 * Connection State Machine
 *
 * A connection alternates between reading requests and writing the reply
 * to the request it just executed. Both buffers are fixed-size: a request
 * frame can never exceed the read buffer and a reply never exceeds the
 * write buffer, so nothing grows with the peer's behaviour.
 *
 * All socket I/O is non-blocking. A would-block result leaves the buffers
 * exactly as they were and hands control back to the reactor; the next
 * readiness event picks up from the same spot.
 */

use crate::error::ERR_2BIG;
use crate::protocol::{decode_frame, frame_into, write_err, FRAME_HEADER, K_MAX_MSG};
use crate::shard::Shard;
use bytes::BytesMut;
use log::{debug, warn};
use std::io::{self, Read, Write};

/// Capacity of both connection buffers: one maximal frame.
pub const CONN_BUF: usize = FRAME_HEADER + K_MAX_MSG;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for (more of) a request
    Reading,
    /// A reply is queued and not fully sent
    Writing,
    /// Terminal; the reactor drops the connection
    Closing,
}

pub struct Conn<S> {
    stream: S,
    state: ConnState,
    rbuf: Box<[u8; CONN_BUF]>,
    rbuf_size: usize,
    wbuf: Box<[u8; CONN_BUF]>,
    wbuf_size: usize,
    wbuf_sent: usize,
    /// Reply body scratch space, reused across requests
    reply: BytesMut,
}

impl<S: Read + Write> Conn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: ConnState::Reading,
            rbuf: Box::new([0; CONN_BUF]),
            rbuf_size: 0,
            wbuf: Box::new([0; CONN_BUF]),
            wbuf_size: 0,
            wbuf_sent: 0,
            reply: BytesMut::with_capacity(K_MAX_MSG),
        }
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Bytes received but not yet consumed as a request.
    pub fn pending_input(&self) -> usize {
        self.rbuf_size
    }

    /// Bytes of the queued reply not yet written.
    pub fn pending_output(&self) -> usize {
        self.wbuf_size - self.wbuf_sent
    }

    /// Drive the connection after a readiness event.
    pub fn on_ready(&mut self, shard: &mut Shard) {
        match self.state {
            ConnState::Reading => self.on_readable(shard),
            ConnState::Writing => self.on_writable(shard),
            ConnState::Closing => {}
        }
    }

    fn on_readable(&mut self, shard: &mut Shard) {
        while self.fill_buffer(shard) {}
    }

    fn on_writable(&mut self, shard: &mut Shard) {
        self.flush_all();
        if self.state == ConnState::Reading {
            // Requests that arrived behind the one just answered.
            while self.try_one_request(shard) {}
            if self.state == ConnState::Reading {
                self.on_readable(shard);
            }
        }
    }

    /// One read into the free tail of the read buffer, then dispatch every
    /// complete request in it. Returns true if reading should go on.
    fn fill_buffer(&mut self, shard: &mut Shard) -> bool {
        if self.rbuf_size == CONN_BUF {
            // A full buffer always holds a complete frame; reaching here
            // means the frame was never consumed.
            warn!("read buffer full without a complete frame");
            self.state = ConnState::Closing;
            return false;
        }
        let n = loop {
            match self.stream.read(&mut self.rbuf[self.rbuf_size..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    warn!("read error: {}", e);
                    self.state = ConnState::Closing;
                    return false;
                }
            }
        };
        if n == 0 {
            if self.rbuf_size > 0 {
                debug!("unexpected EOF with {} bytes buffered", self.rbuf_size);
            } else {
                debug!("EOF");
            }
            self.state = ConnState::Closing;
            return false;
        }
        self.rbuf_size += n;
        debug_assert!(self.rbuf_size <= CONN_BUF);

        // Pipelining: the buffer may hold several requests.
        while self.try_one_request(shard) {}
        self.state == ConnState::Reading
    }

    /// Execute the request at the front of the read buffer, if complete.
    /// Returns true if the connection can take the next one right away.
    fn try_one_request(&mut self, shard: &mut Shard) -> bool {
        let (used, args) = match decode_frame(&self.rbuf[..self.rbuf_size]) {
            Ok(Some(frame)) => frame,
            Ok(None) => return false,
            Err(e) => {
                warn!("bad request: {}", e);
                self.state = ConnState::Closing;
                return false;
            }
        };

        self.reply.clear();
        shard.dispatch(&args, &mut self.reply);
        if self.reply.len() > K_MAX_MSG {
            self.reply.clear();
            write_err(ERR_2BIG, "response is too big", &mut self.reply);
        }
        self.wbuf_size = frame_into(&self.reply, &mut self.wbuf[..]);
        self.wbuf_sent = 0;

        // Drop the consumed frame; anything behind it moves to the front.
        self.rbuf.copy_within(used..self.rbuf_size, 0);
        self.rbuf_size -= used;

        self.state = ConnState::Writing;
        self.flush_all();
        self.state == ConnState::Reading
    }

    fn flush_all(&mut self) {
        while self.flush_buffer() {}
    }

    /// One write of the unsent reply bytes. Returns true if more remain
    /// and the socket may take them.
    fn flush_buffer(&mut self) -> bool {
        let n = loop {
            match self.stream.write(&self.wbuf[self.wbuf_sent..self.wbuf_size]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
                Err(e) => {
                    warn!("write error: {}", e);
                    self.state = ConnState::Closing;
                    return false;
                }
            }
        };
        if n == 0 {
            warn!("peer stopped accepting data");
            self.state = ConnState::Closing;
            return false;
        }
        self.wbuf_sent += n;
        debug_assert!(self.wbuf_sent <= self.wbuf_size);
        if self.wbuf_sent == self.wbuf_size {
            self.state = ConnState::Reading;
            self.wbuf_sent = 0;
            self.wbuf_size = 0;
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_reply_frame, encode_request, Reply};
    use bytes::Bytes;
    use std::collections::VecDeque;

    /// In-memory socket: reads come from scripted chunks, writes are
    /// accepted up to a budget, and an exhausted script or budget would
    /// block. `read_error` and `write_error` fail every call once set.
    #[derive(Default)]
    struct MockStream {
        input: VecDeque<Vec<u8>>,
        eof: bool,
        output: Vec<u8>,
        write_budget: Option<usize>,
        read_error: Option<io::ErrorKind>,
        write_error: Option<io::ErrorKind>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(kind) = self.read_error {
                return Err(kind.into());
            }
            let Some(mut chunk) = self.input.pop_front() else {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.input.push_front(chunk.split_off(n));
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(kind.into());
            }
            let n = match self.write_budget {
                Some(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Some(b) => b.min(buf.len()),
                None => buf.len(),
            };
            if let Some(b) = self.write_budget.as_mut() {
                *b -= n;
            }
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn replies(mut out: &[u8]) -> Vec<Reply> {
        let mut v = Vec::new();
        while let Some((used, r)) = decode_reply_frame(out).unwrap() {
            v.push(r);
            out = &out[used..];
        }
        assert!(out.is_empty());
        v
    }

    #[test]
    fn partial_frame_waits_for_rest() {
        let frame = encode_request(&["set", "k", "v"]).unwrap();
        let mut conn = Conn::new(MockStream::default());
        let mut shard = Shard::new(0);

        conn.stream_mut().input.push_back(frame[..5].to_vec());
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Reading);
        assert_eq!(conn.pending_input(), 5);
        assert!(conn.stream().output.is_empty());

        conn.stream_mut().input.push_back(frame[5..].to_vec());
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Reading);
        assert_eq!(conn.pending_input(), 0);
        assert_eq!(replies(&conn.stream().output), vec![Reply::Nil]);
    }

    #[test]
    fn blocked_write_resumes_where_it_stopped() {
        let mut stream = MockStream {
            write_budget: Some(3),
            ..Default::default()
        };
        stream.input.push_back(encode_request(&["get", "nope"]).unwrap());
        stream.input.push_back(encode_request(&["del", "nope"]).unwrap());
        let mut conn = Conn::new(stream);
        let mut shard = Shard::new(0);

        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Writing);
        assert_eq!(conn.pending_output(), 2);

        conn.stream_mut().write_budget = None;
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Reading);
        assert_eq!(replies(&conn.stream().output), vec![Reply::Nil, Reply::Int(0)]);
    }

    #[test]
    fn pipelined_frames_answered_in_order() {
        let mut blob = Vec::new();
        for i in 0..20 {
            blob.extend(encode_request(&["set".to_string(), format!("k{}", i), format!("v{}", i)]).unwrap());
        }
        for i in 0..20 {
            blob.extend(encode_request(&["get".to_string(), format!("k{}", i)]).unwrap());
        }
        let mut conn = Conn::new(MockStream::default());
        let mut shard = Shard::new(0);
        // Chunks that straddle frame boundaries.
        for chunk in blob.chunks(37) {
            conn.stream_mut().input.push_back(chunk.to_vec());
        }
        conn.on_ready(&mut shard);

        let got = replies(&conn.stream().output);
        assert_eq!(got.len(), 40);
        assert!(got[..20].iter().all(|r| *r == Reply::Nil));
        for (i, r) in got[20..].iter().enumerate() {
            assert_eq!(*r, Reply::Str(Bytes::from(format!("v{}", i))));
        }
    }

    #[test]
    fn oversized_frame_closes_without_dispatch() {
        let mut shard = Shard::new(0);
        let mut bad = Vec::new();
        bad.extend_from_slice(&(K_MAX_MSG as u32 + 1).to_le_bytes());
        bad.extend_from_slice(&[0u8; 16]);
        let mut conn = Conn::new(MockStream::default());
        conn.stream_mut().input.push_back(bad);
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Closing);
        assert!(conn.stream().output.is_empty());
        assert!(shard.dict.is_empty());
    }

    #[test]
    fn malformed_frame_after_good_one() {
        let mut shard = Shard::new(0);
        let mut blob = encode_request(&["set", "a", "1"]).unwrap();
        // Declares one argument of 5 bytes but carries only 2.
        blob.extend_from_slice(&10u32.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&5u32.to_le_bytes());
        blob.extend_from_slice(b"ab");
        let mut conn = Conn::new(MockStream::default());
        conn.stream_mut().input.push_back(blob);
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Closing);
        assert_eq!(replies(&conn.stream().output), vec![Reply::Nil]);
        assert_eq!(shard.dict.len(), 1);
    }

    #[test]
    fn eof_closes() {
        let mut shard = Shard::new(0);
        let mut conn = Conn::new(MockStream {
            eof: true,
            ..Default::default()
        });
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn read_error_closes() {
        let mut shard = Shard::new(0);
        let mut conn = Conn::new(MockStream {
            read_error: Some(io::ErrorKind::ConnectionReset),
            ..Default::default()
        });
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Closing);
    }

    #[test]
    fn write_error_closes_mid_reply() {
        let mut shard = Shard::new(0);
        let mut stream = MockStream {
            write_budget: Some(2),
            ..Default::default()
        };
        stream.input.push_back(encode_request(&["set", "k", "v"]).unwrap());
        let mut conn = Conn::new(stream);
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Writing);

        conn.stream_mut().write_budget = None;
        conn.stream_mut().write_error = Some(io::ErrorKind::BrokenPipe);
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Closing);
        assert_eq!(conn.stream().output.len(), 2);
    }

    #[test]
    fn write_error_on_first_flush_closes() {
        let mut shard = Shard::new(0);
        let mut stream = MockStream {
            write_error: Some(io::ErrorKind::BrokenPipe),
            ..Default::default()
        };
        stream.input.push_back(encode_request(&["get", "k"]).unwrap());
        stream.input.push_back(encode_request(&["get", "k"]).unwrap());
        let mut conn = Conn::new(stream);
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Closing);
        // The second request is never read once the connection is closing.
        assert_eq!(conn.stream().input.len(), 1);
    }

    #[test]
    fn oversized_reply_replaced_by_error() {
        let mut shard = Shard::new(0);
        // 400 keys at 13 bytes each cannot fit in one reply.
        for i in 0..400 {
            shard.dict.set(Bytes::from(format!("key-{:04}", i)), Bytes::from_static(b"x"));
        }
        let mut conn = Conn::new(MockStream::default());
        conn.stream_mut().input.push_back(encode_request(&["keys"]).unwrap());
        conn.on_ready(&mut shard);
        assert_eq!(conn.state(), ConnState::Reading);
        assert_eq!(
            replies(&conn.stream().output),
            vec![Reply::err(ERR_2BIG, "response is too big")]
        );
    }
}
