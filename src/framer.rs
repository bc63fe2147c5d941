use bytes::{Buf, BytesMut};

use crate::frame::FrameError;

static CRLF: &[u8; 2] = b"\r\n";

/// Hard cap on how much CRLF-less input the framer will hold. A server that
/// streams garbage without ever terminating a line cannot grow the buffer
/// past this; the newest suffix wins.
pub(crate) const MAX_LINE_BUFFER: usize = 8 * 1024 * 1024;

/// Sent by the server instead of a reply when its client limit is hit. The
/// connection must drop itself rather than surface this as a command result.
pub(crate) const OVERLOAD_NOTICE: &[u8] = b"-ERR max number of clients reached";

/// Read buffer for one connection, framed at CRLF boundaries.
///
/// Bytes are appended by the socket read loop and only consumed once a whole
/// reply has parsed, so a parse interrupted by missing data restarts from the
/// same position after the next read. This is what makes the parsed value
/// stream independent of how the network chunked the bytes.
#[derive(Debug)]
pub(crate) struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> LineFramer {
        LineFramer {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// The backing buffer, for `read_buf` to append into. Callers must
    /// follow up with `enforce_cap`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Applies the overflow policy: when the buffer exceeds the cap without
    /// containing a single CRLF, drop the oldest bytes and keep the newest
    /// `MAX_LINE_BUFFER`.
    pub fn enforce_cap(&mut self) {
        if self.buf.len() > MAX_LINE_BUFFER && find_crlf(&self.buf).is_none() {
            let excess = self.buf.len() - MAX_LINE_BUFFER;
            self.buf.advance(excess);
        }
    }

    /// Non-consuming line scanner starting at the head of the buffer.
    pub fn cursor(&self) -> LineCursor<'_> {
        LineCursor::new(&self.buf)
    }

    /// Discards `n` bytes from the head, after a whole value parsed.
    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// True when the first complete line is the server's max-clients notice.
    ///
    /// Replies are consumed whole, so the head of the buffer is always a
    /// value boundary; a bulk payload that happens to contain the notice text
    /// sits behind its `$` header and cannot match here.
    pub fn has_overload_notice(&self) -> bool {
        match find_crlf(&self.buf) {
            Some(at) => &self.buf[..at] == OVERLOAD_NOTICE,
            None => false,
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == CRLF)
}

/// Scans CRLF-terminated lines out of a byte slice without consuming them
/// from the framer. `consumed` reports how far the scan got so the framer can
/// drop exactly one parsed value.
pub(crate) struct LineCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> LineCursor<'a> {
    pub fn new(buf: &'a [u8]) -> LineCursor<'a> {
        LineCursor { buf, pos: 0 }
    }

    /// Next line without its CRLF. Used for headers and simple replies.
    pub fn stripped(&mut self) -> Result<&'a [u8], FrameError> {
        let (line, end) = self.next_line()?;
        self.pos = end;
        Ok(line)
    }

    /// Next line including its CRLF. Used while absorbing bulk payloads,
    /// whose bytes may themselves contain CRLF.
    pub fn raw(&mut self) -> Result<&'a [u8], FrameError> {
        let (_, end) = self.next_line()?;
        let line = &self.buf[self.pos..end];
        self.pos = end;
        Ok(line)
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }

    fn next_line(&self) -> Result<(&'a [u8], usize), FrameError> {
        let rest = &self.buf[self.pos..];
        match find_crlf(rest) {
            Some(at) => Ok((&rest[..at], self.pos + at + CRLF.len())),
            None => Err(FrameError::Incomplete),
        }
    }
}
