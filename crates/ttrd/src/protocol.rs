//! Wire protocol framing and request parsing.
//!
//! Client requests travel as `<command>|<payload>` terminated by a fixed
//! end marker and are reassembled by [`FrameReader`]. The duplex pipe to
//! the runner subprocess instead carries length-prefixed messages (see
//! [`write_message`] and [`MessageReader`]): run reports legitimately
//! contain dash rulers, so marker framing cannot delimit them.

use std::io::{self, Read, Write};
use std::str;

use thiserror::Error;

/// Literal byte sequence terminating one frame.
pub const END_MARKER: &[u8] = b"---";

/// Maximum size of a single frame in bytes.
///
/// Guards against a peer streaming unterminated garbage at the daemon.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Parsed client request.
///
/// The closed set of commands makes unknown commands an explicit parse
/// failure instead of a silent fall-through at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Run the identified tests, selected by exact id match.
    RunTests(Vec<String>),
    /// List catalogue ids containing the given substring.
    ListTests(String),
}

impl Request {
    /// Parses a frame (end marker already stripped) into a request.
    ///
    /// A well-formed frame contains exactly one `|` separating the command
    /// from the payload. For `run_tests` the payload is a newline-separated
    /// sequence of test ids; blank lines are ignored. For `list_tests` the
    /// payload is a single substring filter.
    pub fn parse(frame: &[u8]) -> Result<Self, RequestParseError> {
        let text = str::from_utf8(frame).map_err(|source| RequestParseError::NotUtf8 { source })?;
        let text = text.trim_matches(|c: char| c.is_ascii_whitespace());
        if text.bytes().filter(|byte| *byte == b'|').count() != 1 {
            return Err(RequestParseError::MissingSeparator);
        }
        let (command, payload) = text
            .split_once('|')
            .ok_or(RequestParseError::MissingSeparator)?;
        match command {
            "run_tests" => {
                let ids = payload
                    .split('\n')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned)
                    .collect();
                Ok(Self::RunTests(ids))
            }
            "list_tests" => Ok(Self::ListTests(payload.to_owned())),
            other => Err(RequestParseError::UnknownCommand {
                command: other.to_owned(),
            }),
        }
    }

    /// Encodes the request as a terminated wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Vec<u8> {
        let body = match self {
            Self::RunTests(ids) => format!("run_tests|{}", ids.join("\n")),
            Self::ListTests(filter) => format!("list_tests|{filter}"),
        };
        let mut frame = body.into_bytes();
        frame.extend_from_slice(END_MARKER);
        frame
    }
}

/// Errors raised while parsing a request frame.
#[derive(Debug, Error)]
pub enum RequestParseError {
    /// Frame payload was not valid UTF-8.
    #[error("request is not valid utf-8: {source}")]
    NotUtf8 {
        /// Underlying decode error.
        #[source]
        source: str::Utf8Error,
    },
    /// Frame did not contain exactly one command separator.
    #[error("request must contain exactly one '|' separator")]
    MissingSeparator,
    /// Command was not part of the protocol.
    #[error("unknown command '{command}'")]
    UnknownCommand {
        /// The unrecognised command word.
        command: String,
    },
}

/// Reassembles end-marker-delimited frames from a byte stream.
///
/// The reader retries on [`io::ErrorKind::Interrupted`] and surfaces
/// [`io::ErrorKind::WouldBlock`] / [`io::ErrorKind::TimedOut`] to the caller
/// without losing buffered state, so a caller using a read timeout can poll
/// for control events between reads and resume where it left off.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte stream in a frame reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    /// Reads until the next complete frame or end of stream.
    ///
    /// Returns `Ok(Some(frame))` with the end marker stripped, or `Ok(None)`
    /// on a zero-length read (peer closed). Bytes following a marker are kept
    /// for the next call, so several frames may arrive in one read.
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = find_marker(&self.buffer) {
                let mut frame: Vec<u8> = self.buffer.drain(..pos + END_MARKER.len()).collect();
                frame.truncate(pos);
                return Ok(Some(frame));
            }
            if self.buffer.len() > MAX_FRAME_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "frame exceeds maximum size",
                ));
            }

            let mut chunk = [0_u8; 1024];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(read) => self.buffer.extend_from_slice(&chunk[..read]),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            }
        }
    }
}

/// Maximum size of a single runner-channel message in bytes.
///
/// Run reports grow with the number of selected tests, so the cap is far
/// more generous than [`MAX_FRAME_BYTES`].
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Writes one length-prefixed message: a decimal byte count, a newline,
/// then the body.
pub fn write_message<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    writeln!(writer, "{}", body.len())?;
    writer.write_all(body)?;
    writer.flush()
}

/// Reads length-prefixed messages from a blocking byte stream.
///
/// The counterpart to [`write_message`]; used on the runner side of the
/// duplex pipe where reads block until the peer writes or closes.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
}

impl<R: Read> MessageReader<R> {
    /// Wraps a byte stream in a message reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next message, or `Ok(None)` once the stream is closed.
    ///
    /// End of stream in the middle of a message is an error: the peer died
    /// mid-write and the partial body must not be surfaced as a response.
    pub fn next_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(length) = self.read_header()? else {
            return Ok(None);
        };
        if length > MAX_MESSAGE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "message exceeds maximum size",
            ));
        }
        let mut body = vec![0_u8; length];
        self.inner.read_exact(&mut body)?;
        Ok(Some(body))
    }

    /// Reads the decimal length header up to its terminating newline.
    fn read_header(&mut self) -> io::Result<Option<usize>> {
        let mut digits = Vec::new();
        loop {
            let mut byte = [0_u8; 1];
            match self.inner.read(&mut byte) {
                Ok(0) => {
                    if digits.is_empty() {
                        return Ok(None);
                    }
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Ok(_) => match byte[0] {
                    b'\n' => break,
                    digit @ b'0'..=b'9' => digits.push(digit),
                    _ => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "malformed message length header",
                        ));
                    }
                },
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(error),
            }
        }
        str::from_utf8(&digits)
            .ok()
            .and_then(|text| text.parse::<usize>().ok())
            .map(Some)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "malformed message length header")
            })
    }
}

fn find_marker(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < END_MARKER.len() {
        return None;
    }
    buffer.windows(END_MARKER.len()).position(|w| w == END_MARKER)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    #[test]
    fn parses_run_tests_with_multiple_ids() {
        let request = Request::parse(b"run_tests|pkg.Case.test_a\npkg.Case.test_b").unwrap();
        assert_eq!(
            request,
            Request::RunTests(vec![
                "pkg.Case.test_a".to_owned(),
                "pkg.Case.test_b".to_owned(),
            ])
        );
    }

    #[test]
    fn parses_list_tests_filter() {
        let request = Request::parse(b"list_tests|Case").unwrap();
        assert_eq!(request, Request::ListTests("Case".to_owned()));
    }

    #[test]
    fn run_tests_skips_blank_lines() {
        let request = Request::parse(b"run_tests|a\n\nb\n").unwrap();
        assert_eq!(
            request,
            Request::RunTests(vec!["a".to_owned(), "b".to_owned()])
        );
    }

    #[rstest]
    #[case(b"no separator here".as_slice())]
    #[case(b"two|pipes|here".as_slice())]
    #[case(b"".as_slice())]
    fn rejects_frames_without_exactly_one_separator(#[case] frame: &[u8]) {
        let error = Request::parse(frame).unwrap_err();
        assert!(matches!(error, RequestParseError::MissingSeparator));
    }

    #[test]
    fn rejects_unknown_command() {
        let error = Request::parse(b"drop_tables|x").unwrap_err();
        assert!(matches!(
            error,
            RequestParseError::UnknownCommand { command } if command == "drop_tables"
        ));
    }

    #[test]
    fn round_trips_through_frame_encoding() {
        let request = Request::ListTests("pkg".to_owned());
        let frame = request.to_frame();
        assert!(frame.ends_with(END_MARKER));
        let stripped = &frame[..frame.len() - END_MARKER.len()];
        assert_eq!(Request::parse(stripped).unwrap(), request);
    }

    #[test]
    fn reads_single_frame() {
        let mut frames = FrameReader::new(Cursor::new(b"list_tests|x---".to_vec()));
        let frame = frames.next_frame().unwrap().unwrap();
        assert_eq!(frame, b"list_tests|x");
        assert!(frames.next_frame().unwrap().is_none());
    }

    #[test]
    fn reads_multiple_frames_from_one_stream() {
        let mut frames = FrameReader::new(Cursor::new(b"a|1---b|2---".to_vec()));
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"a|1");
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"b|2");
        assert!(frames.next_frame().unwrap().is_none());
    }

    #[test]
    fn reassembles_marker_split_across_reads() {
        // A reader yielding one byte at a time forces the marker to straddle
        // chunk boundaries.
        struct TrickleReader {
            data: Vec<u8>,
            position: usize,
        }
        impl Read for TrickleReader {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match (self.data.get(self.position), buf.first_mut()) {
                    (Some(byte), Some(slot)) => {
                        *slot = *byte;
                        self.position += 1;
                        Ok(1)
                    }
                    _ => Ok(0),
                }
            }
        }

        let mut frames = FrameReader::new(TrickleReader {
            data: b"run_tests|a---".to_vec(),
            position: 0,
        });
        assert_eq!(frames.next_frame().unwrap().unwrap(), b"run_tests|a");
    }

    #[test]
    fn incomplete_frame_at_eof_is_discarded() {
        let mut frames = FrameReader::new(Cursor::new(b"run_tests|a--".to_vec()));
        assert!(frames.next_frame().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut frames = FrameReader::new(Cursor::new(vec![b'x'; MAX_FRAME_BYTES + 2048]));
        let error = frames.next_frame().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn messages_round_trip_with_embedded_markers() {
        let report = b"a ... ok\n----------------------------------------------------------------------\nRan 1 test in 0.001s\n\nOK\n";
        let mut wire = Vec::new();
        write_message(&mut wire, report).unwrap();
        write_message(&mut wire, b"").unwrap();
        let mut messages = MessageReader::new(Cursor::new(wire));
        assert_eq!(messages.next_message().unwrap().unwrap(), report.to_vec());
        assert_eq!(messages.next_message().unwrap().unwrap(), Vec::<u8>::new());
        assert!(messages.next_message().unwrap().is_none());
    }

    #[test]
    fn truncated_message_body_is_an_error() {
        let mut messages = MessageReader::new(Cursor::new(b"10\nshort".to_vec()));
        let error = messages.next_message().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn garbage_length_header_is_rejected() {
        let mut messages = MessageReader::new(Cursor::new(b"abc\nwhatever".to_vec()));
        let error = messages.next_message().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }
}
