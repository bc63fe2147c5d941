// https://redis.io/docs/reference/protocol-spec

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error as ThisError;

use crate::framer::LineCursor;

static CRLF: &[u8; 2] = b"\r\n";

#[derive(Debug, ThisError)]
pub enum FrameError {
    #[error("not enough data is available to parse an entire reply")]
    Incomplete,
    #[error("{0}")]
    Protocol(String),
}

impl From<FrameError> for crate::Error {
    fn from(err: FrameError) -> crate::Error {
        match err {
            // Incomplete is handled by the read loop and never escapes it;
            // seeing it here means a reply ended mid-value.
            FrameError::Incomplete => crate::Error::Protocol("truncated reply".to_string()),
            FrameError::Protocol(msg) => crate::Error::Protocol(msg),
        }
    }
}

/// One RESP reply value.
///
/// `Bulk(None)` and `Array(None)` are the protocol's null bulk and null
/// array; an empty string or empty array is a different value. `Map` never
/// comes off the wire directly, it is the folded form of an even-length
/// array reply requested by commands like HGETALL.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Option<Vec<Frame>>),
    Map(HashMap<String, String>),
}

/// Serializes an argv into the RESP array-of-bulk-strings request form.
pub fn serialize_command<S: AsRef<str>>(args: &[S]) -> Bytes {
    let mut buf =
        Vec::with_capacity(16 + args.iter().map(|a| a.as_ref().len() + 16).sum::<usize>());
    buf.push(b'*');
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    for arg in args {
        let arg = arg.as_ref().as_bytes();
        buf.push(b'$');
        buf.extend_from_slice(arg.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        buf.extend_from_slice(arg);
        buf.extend_from_slice(CRLF);
    }
    Bytes::from(buf)
}

impl Frame {
    /// Parses one reply value from the line cursor.
    ///
    /// Returns `FrameError::Incomplete` when the buffer does not yet hold the
    /// whole value; the caller reads more bytes and retries from the same
    /// buffer position, so the result is identical no matter how the input
    /// was chunked.
    pub(crate) fn parse(lines: &mut LineCursor<'_>) -> Result<Frame, FrameError> {
        let header = lines.stripped()?;
        let (first_byte, rest) = header
            .split_first()
            .ok_or_else(|| FrameError::Protocol("protocol error".to_string()))?;

        match first_byte {
            b'+' => Ok(Frame::Simple(text(rest)?)),
            b'-' => Ok(Frame::Error(text(rest)?)),
            b':' => Ok(Frame::Integer(integer(rest)?)),
            b'$' => Frame::parse_bulk(integer(rest)?, lines),
            b'*' => Frame::parse_array(integer(rest)?, lines),
            _ => Err(FrameError::Protocol("protocol error".to_string())),
        }
    }

    // $<length>\r\n<data>\r\n
    //
    // The payload is byte-count-delimited and may itself contain CRLF, so it
    // is absorbed line by line with terminators included until `length` bytes
    // have been taken; the last line covers the residue and its CRLF doubles
    // as the bulk terminator.
    fn parse_bulk(length: i64, lines: &mut LineCursor<'_>) -> Result<Frame, FrameError> {
        if length == -1 {
            return Ok(Frame::Bulk(None));
        }
        if length < 0 {
            return Err(FrameError::Protocol(format!(
                "protocol error; invalid bulk length {}",
                length
            )));
        }
        if length == 0 {
            let _ = lines.stripped()?;
            return Ok(Frame::Bulk(Some(String::new())));
        }

        let length = length as usize;
        let mut data = Vec::with_capacity(length);
        while data.len() < length {
            let line = lines.raw()?;
            let take = line.len().min(length - data.len());
            data.extend_from_slice(&line[..take]);
        }

        String::from_utf8(data)
            .map(|payload| Frame::Bulk(Some(payload)))
            .map_err(|_| FrameError::Protocol("protocol error; invalid frame format".to_string()))
    }

    // *<number-of-elements>\r\n<element-1>...<element-n>
    fn parse_array(length: i64, lines: &mut LineCursor<'_>) -> Result<Frame, FrameError> {
        if length == -1 {
            return Ok(Frame::Array(None));
        }
        if length < 0 {
            return Err(FrameError::Protocol(format!(
                "protocol error; invalid array length {}",
                length
            )));
        }

        let mut frames = Vec::with_capacity(length as usize);
        for _ in 0..length {
            frames.push(Frame::parse(lines)?);
        }

        Ok(Frame::Array(Some(frames)))
    }

    /// Refolds an even-length array reply into a field-to-value map.
    ///
    /// Null arrays and non-array replies pass through untouched; an array
    /// that cannot pair up fails.
    pub(crate) fn fold_map(self) -> Result<Frame, FrameError> {
        let items = match self {
            Frame::Array(Some(items)) => items,
            other => return Ok(other),
        };

        if items.len() % 2 != 0 {
            return Err(FrameError::Protocol("cannot convert to map".to_string()));
        }

        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(field), Some(value)) = (items.next(), items.next()) {
            map.insert(field.into_text()?, value.into_text()?);
        }

        Ok(Frame::Map(map))
    }

    fn into_text(self) -> Result<String, FrameError> {
        match self {
            Frame::Simple(s) | Frame::Bulk(Some(s)) => Ok(s),
            Frame::Integer(i) => Ok(i.to_string()),
            _ => Err(FrameError::Protocol("cannot convert to map".to_string())),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Frame::Error(_))
    }

    /// The textual content of a simple or bulk string reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) | Frame::Bulk(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The elements of a non-null array reply.
    pub fn into_vec(self) -> Option<Vec<Frame>> {
        match self {
            Frame::Array(items) => items,
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(Some(s)) => write!(f, "${}", s),
            Frame::Bulk(None) => write!(f, "$-1"),
            Frame::Array(None) => write!(f, "*-1"),
            Frame::Array(Some(items)) => {
                write!(f, "*{}", items.len())?;
                for item in items {
                    write!(f, " {}", item)?;
                }
                Ok(())
            }
            Frame::Map(map) => write!(f, "%{}", map.len()),
        }
    }
}

/// Reads the command verb back out of a serialized request, uppercased.
pub(crate) fn leading_verb(serialized: &[u8]) -> Option<String> {
    let mut lines = LineCursor::new(serialized);
    let header = lines.stripped().ok()?;
    if header.first() != Some(&b'*') {
        return None;
    }
    let length = lines.stripped().ok()?;
    if length.first() != Some(&b'$') {
        return None;
    }
    let verb = lines.stripped().ok()?;
    std::str::from_utf8(verb).ok().map(str::to_uppercase)
}

fn text(bytes: &[u8]) -> Result<String, FrameError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| FrameError::Protocol("protocol error; invalid frame format".to_string()))
}

fn integer(bytes: &[u8]) -> Result<i64, FrameError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            FrameError::Protocol(format!(
                "protocol error; invalid integer {:?}",
                String::from_utf8_lossy(bytes)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(data: &[u8]) -> Frame {
        let mut lines = LineCursor::new(data);
        let frame = Frame::parse(&mut lines).unwrap();
        assert_eq!(lines.consumed(), data.len(), "parse left bytes behind");
        frame
    }

    #[test]
    fn serialize_get() {
        let bytes = serialize_command(&["GET", "key"]);
        assert_eq!(&bytes[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn serialize_empty_argument() {
        let bytes = serialize_command(&["SET", "key", ""]);
        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$0\r\n\r\n");
    }

    #[test]
    fn serialize_counts_bytes_not_chars() {
        let bytes = serialize_command(&["ECHO", "héllo"]);
        assert_eq!(&bytes[..], b"*2\r\n$4\r\nECHO\r\n$6\r\nh\xc3\xa9llo\r\n");
    }

    #[test]
    fn parse_simple_string() {
        assert_eq!(parse_all(b"+OK\r\n"), Frame::Simple("OK".to_string()));
    }

    #[test]
    fn parse_error_value() {
        assert_eq!(
            parse_all(b"-ERR unknown command\r\n"),
            Frame::Error("ERR unknown command".to_string())
        );
    }

    #[test]
    fn parse_integer_positive() {
        assert_eq!(parse_all(b":1000\r\n"), Frame::Integer(1000));
    }

    #[test]
    fn parse_integer_negative() {
        assert_eq!(parse_all(b":-1000\r\n"), Frame::Integer(-1000));
    }

    #[test]
    fn parse_integer_positive_signed() {
        assert_eq!(parse_all(b":+42\r\n"), Frame::Integer(42));
    }

    #[test]
    fn parse_bulk_string() {
        assert_eq!(
            parse_all(b"$6\r\nfoobar\r\n"),
            Frame::Bulk(Some("foobar".to_string()))
        );
    }

    #[test]
    fn parse_bulk_string_empty() {
        assert_eq!(parse_all(b"$0\r\n\r\n"), Frame::Bulk(Some(String::new())));
    }

    #[test]
    fn parse_bulk_string_null() {
        assert_eq!(parse_all(b"$-1\r\n"), Frame::Bulk(None));
    }

    #[test]
    fn parse_bulk_string_with_embedded_crlf() {
        assert_eq!(
            parse_all(b"$6\r\nab\r\ncd\r\n"),
            Frame::Bulk(Some("ab\r\ncd".to_string()))
        );
    }

    #[test]
    fn parse_array() {
        assert_eq!(
            parse_all(b"*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n"),
            Frame::Array(Some(vec![
                Frame::Bulk(Some("hello".to_string())),
                Frame::Bulk(Some("world".to_string())),
            ]))
        );
    }

    #[test]
    fn parse_array_empty() {
        assert_eq!(parse_all(b"*0\r\n"), Frame::Array(Some(vec![])));
    }

    #[test]
    fn parse_array_null() {
        assert_eq!(parse_all(b"*-1\r\n"), Frame::Array(None));
    }

    #[test]
    fn parse_array_with_null_in_the_middle() {
        assert_eq!(
            parse_all(b"*3\r\n$3\r\nfoo\r\n$-1\r\n:42\r\n"),
            Frame::Array(Some(vec![
                Frame::Bulk(Some("foo".to_string())),
                Frame::Bulk(None),
                Frame::Integer(42),
            ]))
        );
    }

    #[test]
    fn parse_array_nested() {
        assert_eq!(
            parse_all(b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n"),
            Frame::Array(Some(vec![
                Frame::Array(Some(vec![
                    Frame::Integer(1),
                    Frame::Integer(2),
                    Frame::Integer(3),
                ])),
                Frame::Array(Some(vec![
                    Frame::Simple("Hello".to_string()),
                    Frame::Error("World".to_string()),
                ])),
            ]))
        );
    }

    #[test]
    fn parse_unknown_leading_byte() {
        let mut lines = LineCursor::new(b"?garbage\r\n");
        let err = Frame::parse(&mut lines).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ref msg) if msg == "protocol error"));
    }

    #[test]
    fn parse_incomplete_header() {
        let mut lines = LineCursor::new(b"$6\r\nfoo");
        assert!(matches!(
            Frame::parse(&mut lines),
            Err(FrameError::Incomplete)
        ));
    }

    #[test]
    fn parse_incomplete_array_tail() {
        let mut lines = LineCursor::new(b"*2\r\n$5\r\nhello\r\n");
        assert!(matches!(
            Frame::parse(&mut lines),
            Err(FrameError::Incomplete)
        ));
    }

    #[test]
    fn round_trip_argv() {
        let argv = ["SET", "key", "värde", ""];
        let bytes = serialize_command(&argv);

        let frame = parse_all(&bytes);

        let items: Vec<Frame> = argv
            .iter()
            .map(|a| Frame::Bulk(Some(a.to_string())))
            .collect();
        assert_eq!(frame, Frame::Array(Some(items)));
    }

    #[test]
    fn fold_even_array_into_map() {
        let frame = parse_all(b"*4\r\n$1\r\nf\r\n$3\r\n3.5\r\n$1\r\ng\r\n:2\r\n");

        let folded = frame.fold_map().unwrap();

        let mut expected = HashMap::new();
        expected.insert("f".to_string(), "3.5".to_string());
        expected.insert("g".to_string(), "2".to_string());
        assert_eq!(folded, Frame::Map(expected));
    }

    #[test]
    fn fold_odd_array_fails() {
        let frame = Frame::Array(Some(vec![Frame::Bulk(Some("f".to_string()))]));
        let err = frame.fold_map().unwrap_err();
        assert!(matches!(err, FrameError::Protocol(ref msg) if msg == "cannot convert to map"));
    }

    #[test]
    fn fold_null_array_passes_through() {
        assert_eq!(Frame::Array(None).fold_map().unwrap(), Frame::Array(None));
    }

    #[test]
    fn is_error_only_matches_error_replies() {
        assert!(Frame::Error("ERR boom".to_string()).is_error());
        assert!(!Frame::Simple("OK".to_string()).is_error());
        assert!(!Frame::Bulk(None).is_error());
    }

    #[test]
    fn as_text_reads_simple_and_bulk_strings() {
        assert_eq!(Frame::Simple("OK".to_string()).as_text(), Some("OK"));
        assert_eq!(
            Frame::Bulk(Some("value".to_string())).as_text(),
            Some("value")
        );
        assert_eq!(Frame::Bulk(None).as_text(), None);
        assert_eq!(Frame::Integer(42).as_text(), None);
    }

    #[test]
    fn as_integer_reads_integer_replies() {
        assert_eq!(Frame::Integer(-7).as_integer(), Some(-7));
        assert_eq!(Frame::Simple("42".to_string()).as_integer(), None);
    }

    #[test]
    fn into_vec_unwraps_non_null_arrays() {
        let array = parse_all(b"*2\r\n:1\r\n:2\r\n");
        assert_eq!(
            array.into_vec(),
            Some(vec![Frame::Integer(1), Frame::Integer(2)])
        );

        assert_eq!(Frame::Array(None).into_vec(), None);
        assert_eq!(Frame::Integer(1).into_vec(), None);
    }

    #[test]
    fn leading_verb_reads_back() {
        let bytes = serialize_command(&["hgetall", "h"]);
        assert_eq!(leading_verb(&bytes), Some("HGETALL".to_string()));
    }

    #[test]
    fn byte_at_a_time_parses_identically() {
        let data = b"*3\r\n$3\r\nfoo\r\n$-1\r\n:42\r\n";
        let whole = parse_all(data);

        // Feed the stream one byte at a time; each retry starts over from the
        // accumulated prefix, exactly like the connection read loop does.
        let mut acc: Vec<u8> = Vec::new();
        let mut parsed = None;
        for byte in data.iter() {
            acc.push(*byte);
            let mut lines = LineCursor::new(&acc);
            match Frame::parse(&mut lines) {
                Ok(frame) => {
                    parsed = Some(frame);
                    break;
                }
                Err(FrameError::Incomplete) => continue,
                Err(err) => panic!("unexpected parse failure: {}", err),
            }
        }

        assert_eq!(parsed.unwrap(), whole);
    }
}
