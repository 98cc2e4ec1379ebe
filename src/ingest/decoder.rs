//! Streaming decoder for the flight feed document.
//!
//! The feed is one JSON object holding a `flights` array among other fields:
//!
//! ```text
//! { "meta": {...}, "flights": [ {record}, {record}, ... ], "trailer": ... }
//! ```
//!
//! `FeedCodec` walks the top-level object token by token. The only values it
//! buffers are single `flights` elements, each decoded into a [`Flight`] and
//! held to the `max_value_bytes` bound. Unrelated fields are consumed as their
//! bytes arrive, whatever their size, with only their structure checked. The
//! codec is driven by `FramedRead`, so chunk boundaries in the byte stream do
//! not matter.
//!
//! An element that is balanced JSON but does not decode as a flight is reported
//! as [`FeedItem::Skipped`]. Anything that breaks the document's structure is a
//! `FeedMalformed` error for the run.

use crate::error::IngestError;
use crate::flight::Flight;
use bytes::{Buf, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::warn;

const FLIGHTS_FIELD: &str = "flights";

/// One step of progress through the feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Flight(Flight),
    /// Array element `index` could not be decoded as a flight
    Skipped { index: u64, reason: String },
    /// The `flights` array closed, or the object ended without one
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting `{`
    Start,
    /// Expecting a field name, or `}` if `allow_close`
    Key { allow_close: bool },
    /// Expecting `:` after a field name
    Colon { flights: bool },
    /// Expecting the value of an unrelated field
    SkipValue,
    /// Inside an unrelated field's value
    Skipping,
    /// Expecting `,` or `}` after a field value
    ObjectNext,
    /// Expecting `[` opening the flights array
    ArrayStart,
    /// Expecting an element, or `]` if `allow_close`
    Element { allow_close: bool },
    /// Expecting `,` or `]` after an element
    ArrayNext,
    Finished,
}

/// Result of looking for the end of one JSON value in a buffer
#[derive(Debug, PartialEq, Eq)]
enum Span {
    /// Value occupies `buf[..n]`
    Complete(usize),
    Incomplete,
    Invalid(String),
}

/// Position inside an unrelated value that is being discarded.
///
/// Strings must terminate and brackets must balance. Scalars are not checked
/// beyond their bytes.
#[derive(Debug, Default)]
struct Skipper {
    /// Unclosed `{` and `[`, innermost last
    open: Vec<u8>,
    in_string: bool,
    escaped: bool,
    in_scalar: bool,
}

impl Skipper {
    /// Enters the value whose first byte is `first`. The caller consumes it.
    fn begin(&mut self, first: u8) -> Result<(), String> {
        match first {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.open.push(first),
            b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => self.in_scalar = true,
            other => return Err(unexpected_value(other)),
        }
        Ok(())
    }

    /// Consumes as much of the value as `buf` holds. `Ok(true)` once it ended.
    fn advance(&mut self, buf: &mut BytesMut) -> Result<bool, String> {
        let mut i = 0;
        let done = loop {
            if i >= buf.len() {
                break false;
            }
            if self.in_scalar {
                if is_scalar_byte(buf[i]) {
                    i += 1;
                    continue;
                }
                self.in_scalar = false;
                break true;
            }
            if self.escaped {
                self.escaped = false;
                i += 1;
                continue;
            }
            if self.in_string {
                match memchr::memchr2(b'"', b'\\', &buf[i..]) {
                    None => i = buf.len(),
                    Some(offset) => {
                        let pos = i + offset;
                        i = pos + 1;
                        if buf[pos] == b'\\' {
                            self.escaped = true;
                        } else {
                            self.in_string = false;
                            if self.open.is_empty() {
                                break true;
                            }
                        }
                    }
                }
                continue;
            }

            let byte = buf[i];
            i += 1;
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.open.push(byte),
                b'}' | b']' => {
                    let opener = if byte == b'}' { b'{' } else { b'[' };
                    if self.open.pop() != Some(opener) {
                        return Err(format!("mismatched {:?}", byte as char));
                    }
                    if self.open.is_empty() {
                        break true;
                    }
                }
                _ => {}
            }
        };
        buf.advance(i);
        Ok(done)
    }
}

fn is_scalar_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'+' | b'.')
}

/// Token-level decoder for the feed document
#[derive(Debug)]
pub struct FeedCodec {
    state: State,
    next_index: u64,
    max_value_bytes: usize,
    skip: Skipper,
}

impl FeedCodec {
    pub fn new(max_value_bytes: usize) -> Self {
        FeedCodec {
            state: State::Start,
            next_index: 0,
            max_value_bytes,
            skip: Skipper::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    fn finish(&mut self) -> FeedItem {
        self.state = State::Finished;
        FeedItem::Finished
    }

    /// Not enough bytes buffered for the current field name or element.
    fn need_more(&self, buf: &BytesMut) -> Result<Option<FeedItem>, IngestError> {
        if buf.len() > self.max_value_bytes {
            return Err(malformed(format!(
                "value exceeds {} bytes without terminating",
                self.max_value_bytes
            )));
        }
        Ok(None)
    }

    fn decode_element(&mut self, raw: &[u8]) -> FeedItem {
        let index = self.next_index;
        self.next_index += 1;
        match serde_json::from_slice::<Flight>(raw) {
            Ok(flight) => FeedItem::Flight(flight),
            Err(e) => FeedItem::Skipped {
                index,
                reason: e.to_string(),
            },
        }
    }
}

impl Decoder for FeedCodec {
    type Item = FeedItem;
    type Error = IngestError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<FeedItem>, IngestError> {
        loop {
            if self.state == State::Finished {
                buf.clear();
                return Ok(None);
            }

            if self.state == State::Skipping {
                if !self.skip.advance(buf).map_err(malformed)? {
                    return Ok(None);
                }
                self.state = State::ObjectNext;
                continue;
            }

            skip_whitespace(buf);
            let Some(&next) = buf.first() else {
                return Ok(None);
            };

            match self.state {
                State::Start => {
                    if next != b'{' {
                        return Err(malformed(format!(
                            "expected '{{' at document start, found {:?}",
                            next as char
                        )));
                    }
                    buf.advance(1);
                    self.state = State::Key { allow_close: true };
                }
                State::Key { allow_close } => {
                    if next == b'}' && allow_close {
                        buf.advance(1);
                        return Ok(Some(self.finish()));
                    }
                    if next != b'"' {
                        return Err(malformed(format!(
                            "expected field name, found {:?}",
                            next as char
                        )));
                    }
                    match scan_string(buf) {
                        Span::Complete(end) => {
                            let key: String = serde_json::from_slice(&buf[..end])
                                .map_err(|e| malformed(format!("bad field name: {}", e)))?;
                            buf.advance(end);
                            self.state = State::Colon {
                                flights: key == FLIGHTS_FIELD,
                            };
                        }
                        Span::Incomplete => return self.need_more(buf),
                        Span::Invalid(reason) => return Err(malformed(reason)),
                    }
                }
                State::Colon { flights } => {
                    if next != b':' {
                        return Err(malformed(format!(
                            "expected ':' after field name, found {:?}",
                            next as char
                        )));
                    }
                    buf.advance(1);
                    self.state = if flights {
                        State::ArrayStart
                    } else {
                        State::SkipValue
                    };
                }
                State::SkipValue => {
                    self.skip.begin(next).map_err(malformed)?;
                    buf.advance(1);
                    self.state = State::Skipping;
                }
                State::ObjectNext => match next {
                    b',' => {
                        buf.advance(1);
                        self.state = State::Key { allow_close: false };
                    }
                    b'}' => {
                        buf.advance(1);
                        return Ok(Some(self.finish()));
                    }
                    other => {
                        return Err(malformed(format!(
                            "expected ',' or '}}' after field value, found {:?}",
                            other as char
                        )))
                    }
                },
                State::ArrayStart => {
                    if next != b'[' {
                        return Err(malformed(format!(
                            "\"{}\" is not an array (found {:?})",
                            FLIGHTS_FIELD, next as char
                        )));
                    }
                    buf.advance(1);
                    self.state = State::Element { allow_close: true };
                }
                State::Element { allow_close } => {
                    if next == b']' && allow_close {
                        buf.advance(1);
                        return Ok(Some(self.finish()));
                    }
                    match scan_value(buf) {
                        Span::Complete(end) => {
                            let item = self.decode_element(&buf[..end]);
                            buf.advance(end);
                            self.state = State::ArrayNext;
                            return Ok(Some(item));
                        }
                        Span::Incomplete => return self.need_more(buf),
                        Span::Invalid(reason) => return Err(malformed(reason)),
                    }
                }
                State::ArrayNext => match next {
                    b',' => {
                        buf.advance(1);
                        self.state = State::Element { allow_close: false };
                    }
                    b']' => {
                        buf.advance(1);
                        return Ok(Some(self.finish()));
                    }
                    other => {
                        return Err(malformed(format!(
                            "expected ',' or ']' after flight record, found {:?}",
                            other as char
                        )))
                    }
                },
                State::Skipping | State::Finished => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<FeedItem>, IngestError> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }
        match self.state {
            State::Finished => Ok(None),
            State::Start => Err(malformed("empty document".to_string())),
            _ => Err(malformed("document truncated".to_string())),
        }
    }
}

fn malformed(reason: String) -> IngestError {
    IngestError::FeedMalformed(reason)
}

fn skip_whitespace(buf: &mut BytesMut) {
    let n = buf
        .iter()
        .take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
        .count();
    buf.advance(n);
}

fn scan_value(buf: &[u8]) -> Span {
    match buf.first() {
        None => Span::Incomplete,
        Some(b'"') => scan_string(buf),
        Some(b'{' | b'[') => scan_composite(buf),
        Some(b'-' | b'0'..=b'9' | b't' | b'f' | b'n') => scan_scalar(buf),
        Some(&other) => Span::Invalid(unexpected_value(other)),
    }
}

fn unexpected_value(byte: u8) -> String {
    format!("unexpected {:?} where a value was expected", byte as char)
}

/// `buf[0]` is the opening quote.
fn scan_string(buf: &[u8]) -> Span {
    let mut i = 1;
    loop {
        if i >= buf.len() {
            return Span::Incomplete;
        }
        match memchr::memchr2(b'"', b'\\', &buf[i..]) {
            None => return Span::Incomplete,
            Some(offset) => {
                let pos = i + offset;
                if buf[pos] == b'\\' {
                    // Skip the escaped byte
                    i = pos + 2;
                } else {
                    return Span::Complete(pos + 1);
                }
            }
        }
    }
}

/// `buf[0]` is `{` or `[`.
fn scan_composite(buf: &[u8]) -> Span {
    let mut open: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            b'"' => match scan_string(&buf[i..]) {
                Span::Complete(len) => {
                    i += len;
                    continue;
                }
                other => return other,
            },
            bracket @ (b'{' | b'[') => open.push(bracket),
            b'}' => {
                if open.pop() != Some(b'{') {
                    return Span::Invalid("mismatched '}'".to_string());
                }
            }
            b']' => {
                if open.pop() != Some(b'[') {
                    return Span::Invalid("mismatched ']'".to_string());
                }
            }
            _ => {}
        }
        i += 1;
        if open.is_empty() {
            return Span::Complete(i);
        }
    }
    Span::Incomplete
}

/// Numbers and literals end at the next delimiter. Their content is checked
/// by whoever decodes the span.
fn scan_scalar(buf: &[u8]) -> Span {
    match buf
        .iter()
        .position(|b| matches!(b, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r'))
    {
        Some(end) => Span::Complete(end),
        None => Span::Incomplete,
    }
}

/// Counters for one decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub decoded: u64,
    pub skipped: u64,
}

/// Lazy, finite, non-restartable sequence of flights read from a feed body.
///
/// Skipped elements are logged and counted, never yielded. The stream ends
/// when the `flights` array closes; the rest of the body is not read.
pub struct FeedDecoder<R> {
    frames: FramedRead<R, FeedCodec>,
    stats: DecodeStats,
    done: bool,
}

impl<R: AsyncRead + Unpin> FeedDecoder<R> {
    pub fn new(reader: R, max_value_bytes: usize) -> Self {
        FeedDecoder {
            frames: FramedRead::new(reader, FeedCodec::new(max_value_bytes)),
            stats: DecodeStats::default(),
            done: false,
        }
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }
}

impl<R: AsyncRead + Unpin> Stream for FeedDecoder<R> {
    type Item = Result<Flight, IngestError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match ready!(Pin::new(&mut this.frames).poll_next(cx)) {
                Some(Ok(FeedItem::Flight(flight))) => {
                    this.stats.decoded += 1;
                    return Poll::Ready(Some(Ok(flight)));
                }
                Some(Ok(FeedItem::Skipped { index, reason })) => {
                    this.stats.skipped += 1;
                    warn!(index, %reason, "skipping undecodable flight record");
                }
                Some(Ok(FeedItem::Finished)) | None => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }
        }
    }
}
