//! Incremental framing of NovAtel OEM receiver byte streams.
//!
//! A [Framer] accepts arbitrarily chunked input through [Framer::write] and hands back one
//! validated frame per [Framer::get_frame] call. Bytes that do not belong to any frame are
//! handed back as [FrameStatus::Unknown] chunks so a caller never stalls on noise.
//!
//! # Example
//! ```
//! use novatel::framer::{FrameStatus, Framer};
//! use novatel::format::HeaderFormat;
//! use novatel::MetaData;
//!
//! let mut framer = Framer::new();
//! framer.write(b"GARBAGE_DATA%RAWIMUSXA,1692,484620.664;00,11,1692,484620.664389000,00801503,\
//!     43110635,-817242,-202184,-215194,-41188,-9895*a5db8c7b\r\n");
//!
//! let mut buf = vec![0u8; 1024];
//! let mut meta = MetaData::new();
//! assert_eq!(framer.get_frame(&mut buf, &mut meta), FrameStatus::Unknown);
//! assert_eq!(meta.length, 12);
//!
//! assert_eq!(framer.get_frame(&mut buf, &mut meta), FrameStatus::Success);
//! assert_eq!(meta.format, HeaderFormat::ShortAscii);
//! assert_eq!(&buf[..1], b"%");
//! ```
use tracing::trace;

use crate::crc::crc32;
use crate::format::{
    HeaderFormat, ABBREV_ASCII_SEPARATOR, ABBREV_ASCII_SYNC, ASCII_CRC_DELIMITER,
    ASCII_CRC_LENGTH, ASCII_SYNC, ASCII_SYNC_LENGTH, BINARY_CRC_LENGTH, BINARY_HEADER_LENGTH,
    BINARY_SYNC1, BINARY_SYNC2, BINARY_SYNC3, BINARY_SYNC_LENGTH, JSON_OBJECT_CLOSE,
    JSON_OBJECT_OPEN, MAX_ABB_ASCII_RESPONSE_LENGTH, MAX_ASCII_MESSAGE_LENGTH,
    MAX_BINARY_MESSAGE_LENGTH, MAX_NMEA_MESSAGE_LENGTH, MAX_SHORT_BINARY_MESSAGE_LENGTH,
    NMEA_CRC_LENGTH, NMEA_SYNC, NMEA_SYNC_LENGTH, PROPRIETARY_BINARY_SYNC2, SHORT_ASCII_SYNC,
    SHORT_BINARY_HEADER_LENGTH, SHORT_BINARY_SYNC3,
};
use crate::MetaData;

/// Default number of bytes the framer will hold before [Framer::write] starts refusing input.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1 << 18;

/// Result of a [Framer::get_frame] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus {
    /// A complete, validated frame was copied to the output buffer.
    Success,
    /// Bytes that are not part of any frame were removed from the buffer, and copied to the
    /// output buffer when unknown bytes are reported.
    Unknown,
    /// A frame has started but more bytes are needed.
    Incomplete,
    /// The output buffer cannot hold the pending frame. Nothing was consumed; retry with a
    /// buffer of at least [MetaData::length] bytes.
    BufferFull,
    /// There are no bytes to process.
    BufferEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitingForSync,
    WaitingForBinarySync2,
    WaitingForBinarySync3,
    WaitingForBinaryHeader,
    WaitingForShortBinaryHeader,
    WaitingForBinaryBodyAndCrc,
    WaitingForAsciiHeaderAndBody,
    WaitingForAsciiCrc,
    WaitingForAbbAsciiSync2,
    WaitingForAbbAsciiHeader,
    WaitingForAbbAsciiBody,
    WaitingForNmeaBody,
    WaitingForNmeaCrc,
    WaitingForJsonObject,
}

/// Byte stream framer for every NovAtel OEM message format.
///
/// Sync detection is first-match-wins in stream order. A candidate frame that fails its CRC is
/// abandoned and scanning resumes just after its sync bytes, so a real frame hidden inside a
/// corrupt one is still found.
#[derive(Debug)]
pub struct Framer {
    buffer: Vec<u8>,
    capacity: usize,
    state: State,
    format: HeaderFormat,
    /// Bytes of `buffer` examined toward the current candidate.
    byte_count: usize,
    /// Frame length last reported through [MetaData::length].
    length: usize,
    expected_payload_length: usize,
    expected_message_length: usize,
    abbrev_header_position: usize,
    crc_delimiter_position: usize,
    json_depth: u32,
    json_in_string: bool,
    json_escape: bool,
    report_unknown_bytes: bool,
    payload_only: bool,
    frame_json: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }
}

impl Framer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer that buffers at most `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Framer {
            buffer: Vec::with_capacity(capacity),
            capacity,
            state: State::WaitingForSync,
            format: HeaderFormat::Unknown,
            byte_count: 0,
            length: 0,
            expected_payload_length: 0,
            expected_message_length: 0,
            abbrev_header_position: 0,
            crc_delimiter_position: 0,
            json_depth: 0,
            json_in_string: false,
            json_escape: false,
            report_unknown_bytes: true,
            payload_only: false,
            frame_json: false,
        }
    }

    /// Copy unknown bytes to the output buffer. When disabled unknown bytes are still consumed
    /// and reported with [FrameStatus::Unknown], but the output buffer is left untouched.
    pub fn set_report_unknown_bytes(&mut self, report: bool) {
        self.report_unknown_bytes = report;
    }

    /// Output only the body of binary frames, without the header and CRC.
    pub fn set_payload_only(&mut self, payload_only: bool) {
        self.payload_only = payload_only;
    }

    /// Frame top-level JSON objects. Disabled by default since `{` is common in other data.
    pub fn set_frame_json(&mut self, frame_json: bool) {
        self.frame_json = frame_json;
    }

    /// Remaining space in the internal buffer.
    #[must_use]
    pub fn bytes_available(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Number of bytes written but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes to the internal buffer, returning how many were accepted. Fewer than
    /// `data.len()` are accepted when the buffer is near capacity; retry the rest after
    /// consuming frames.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.bytes_available());
        self.buffer.extend_from_slice(&data[..n]);
        n
    }

    /// Move up to `out.len()` buffered bytes to `out` regardless of framing state, returning the
    /// number moved.
    pub fn flush(&mut self, out: &mut [u8]) -> usize {
        let n = self.buffer.len().min(out.len());
        out[..n].copy_from_slice(&self.buffer[..n]);
        self.discard_unknown(n);
        n
    }

    fn reset_state(&mut self) {
        self.state = State::WaitingForSync;
        self.format = HeaderFormat::Unknown;
    }

    fn abandon(&mut self, resume_at: usize) {
        self.byte_count = resume_at;
        self.expected_payload_length = 0;
        self.expected_message_length = 0;
        self.abbrev_header_position = 0;
        self.reset_state();
    }

    fn discard_unknown(&mut self, count: usize) {
        let count = count.min(self.buffer.len());
        self.buffer.drain(..count);
        self.abandon(0);
    }

    fn handle_unknown_bytes(&mut self, out: &mut [u8], count: usize) {
        let count = count.min(self.buffer.len());
        if self.report_unknown_bytes {
            let n = count.min(out.len());
            out[..n].copy_from_slice(&self.buffer[..n]);
        }
        trace!(length = count, "unknown bytes");
        self.discard_unknown(count);
    }

    /// Copy a complete frame out of the buffer and consume it.
    fn complete(&mut self, out: &mut [u8], meta: &mut MetaData, start: usize, total: usize) {
        out[..self.length].copy_from_slice(&self.buffer[start..start + self.length]);
        self.buffer.drain(..total);
        meta.format = self.format;
        meta.length = self.length;
        trace!(format = %self.format, length = self.length, "frame");
        self.abandon(0);
    }

    fn buffer_full(&mut self, meta: &mut MetaData) -> FrameStatus {
        meta.format = self.format;
        meta.length = self.length;
        self.abandon(0);
        FrameStatus::BufferFull
    }

    fn is_crlf(&self, pos: usize) -> bool {
        pos + 1 < self.buffer.len() && self.buffer[pos] == b'\r' && self.buffer[pos + 1] == b'\n'
    }

    /// Whether the 8 bytes after an `*` at `pos - 1` are followed by CRLF.
    fn is_ascii_crc(&self, pos: usize) -> bool {
        self.is_crlf(pos + ASCII_CRC_LENGTH)
    }

    fn is_abbrev_separator_crlf(&self, pos: usize) -> bool {
        self.is_crlf(pos + 1) && self.buffer[pos] == ABBREV_ASCII_SEPARATOR
    }

    /// A continuation line holding only indentation, printed for an empty field array.
    fn is_empty_abbrev_line(&self, mut pos: usize) -> bool {
        while pos > 0 && self.buffer[pos] == ABBREV_ASCII_SEPARATOR {
            pos -= 1;
            if self.buffer[pos] == ABBREV_ASCII_SYNC {
                return true;
            }
        }
        false
    }

    fn is_abbrev_response(&self) -> bool {
        let pos = self.abbrev_header_position;
        let len = self.buffer.len();
        (pos + 2 < len && &self.buffer[pos..pos + 2] == b"OK")
            || (pos + 5 < len && &self.buffer[pos..pos + 5] == b"ERROR")
    }

    /// Compare a received hex checksum with the computed one.
    fn checksum_matches(text: &[u8], computed: u32) -> bool {
        std::str::from_utf8(text)
            .ok()
            .and_then(|s| u32::from_str_radix(s, 16).ok())
            == Some(computed)
    }

    /// Extract the next frame into `out`.
    ///
    /// On [FrameStatus::Success] `out[..meta.length]` holds the frame and `meta` carries its
    /// format, length and response flag. On [FrameStatus::Unknown] `meta.length` bytes were
    /// consumed. On [FrameStatus::Incomplete] `meta.length` is the number of bytes buffered
    /// toward the pending frame.
    pub fn get_frame(&mut self, out: &mut [u8], meta: &mut MetaData) -> FrameStatus {
        loop {
            meta.response = false;

            if self.byte_count == self.buffer.len() {
                if self.state != State::WaitingForSync {
                    // A CRLF landing at the end of the buffer is only recognised once the
                    // byte after it is known, so reread the last byte next time.
                    if self.format == HeaderFormat::AbbAscii {
                        self.byte_count = self.byte_count.saturating_sub(1);
                    }
                    meta.format = self.format;
                    meta.length = self.length;
                    return FrameStatus::Incomplete;
                }

                meta.format = HeaderFormat::Unknown;
                meta.length = self.byte_count;
                if self.byte_count == 0 {
                    return FrameStatus::BufferEmpty;
                }
                self.handle_unknown_bytes(out, self.byte_count);
                return FrameStatus::Unknown;
            }

            let byte = self.buffer[self.byte_count];
            self.byte_count += 1;
            self.length = self.byte_count;

            // Text frames never contain bytes above 127; treat the candidate as noise and
            // look at this byte again as a possible sync.
            if self.format.is_text() && byte > 127 {
                self.reset_state();
                self.byte_count -= 1;
                self.length = self.byte_count;
                continue;
            }

            match self.state {
                State::WaitingForSync => {
                    match byte {
                        BINARY_SYNC1 => self.state = State::WaitingForBinarySync2,
                        ASCII_SYNC => {
                            self.format = HeaderFormat::Ascii;
                            self.state = State::WaitingForAsciiHeaderAndBody;
                        }
                        SHORT_ASCII_SYNC => {
                            self.format = HeaderFormat::ShortAscii;
                            self.state = State::WaitingForAsciiHeaderAndBody;
                        }
                        NMEA_SYNC => {
                            self.format = HeaderFormat::Nmea;
                            self.state = State::WaitingForNmeaBody;
                        }
                        ABBREV_ASCII_SYNC => {
                            self.format = HeaderFormat::AbbAscii;
                            self.state = State::WaitingForAbbAsciiSync2;
                            self.abbrev_header_position = self.byte_count;
                        }
                        JSON_OBJECT_OPEN if self.frame_json => {
                            self.format = HeaderFormat::Json;
                            self.state = State::WaitingForJsonObject;
                            self.json_depth = 1;
                            self.json_in_string = false;
                            self.json_escape = false;
                        }
                        _ => {}
                    }

                    // Everything before a sync byte is unknown.
                    if self.state != State::WaitingForSync && self.byte_count > 1 {
                        meta.format = HeaderFormat::Unknown;
                        meta.length = self.byte_count - 1;
                        self.handle_unknown_bytes(out, self.byte_count - 1);
                        return FrameStatus::Unknown;
                    } else if out.is_empty() {
                        // Nothing can be handed back, so nothing can be consumed.
                        return self.buffer_full(meta);
                    } else if self.byte_count > out.len() {
                        meta.format = HeaderFormat::Unknown;
                        meta.length = out.len();
                        self.handle_unknown_bytes(out, out.len());
                        return FrameStatus::Unknown;
                    }
                }

                State::WaitingForBinarySync2 => match byte {
                    PROPRIETARY_BINARY_SYNC2 => {
                        self.format = HeaderFormat::ProprietaryBinary;
                        self.state = State::WaitingForBinarySync3;
                    }
                    BINARY_SYNC2 => self.state = State::WaitingForBinarySync3,
                    _ => {
                        self.reset_state();
                        self.byte_count -= 1;
                    }
                },

                State::WaitingForBinarySync3 => match byte {
                    BINARY_SYNC3 => {
                        if self.format != HeaderFormat::ProprietaryBinary {
                            self.format = HeaderFormat::Binary;
                        }
                        self.state = State::WaitingForBinaryHeader;
                    }
                    SHORT_BINARY_SYNC3 => {
                        self.format = HeaderFormat::ShortBinary;
                        self.state = State::WaitingForShortBinaryHeader;
                    }
                    _ => {
                        self.reset_state();
                        self.byte_count -= 1;
                    }
                },

                State::WaitingForAbbAsciiSync2 => {
                    if byte != ABBREV_ASCII_SEPARATOR && byte.is_ascii_alphabetic() {
                        self.state = State::WaitingForAbbAsciiHeader;
                    } else {
                        self.reset_state();
                        self.byte_count -= 1;
                    }
                }

                State::WaitingForBinaryHeader | State::WaitingForShortBinaryHeader => {
                    let short = self.state == State::WaitingForShortBinaryHeader;
                    let header_length = if short {
                        SHORT_BINARY_HEADER_LENGTH
                    } else {
                        BINARY_HEADER_LENGTH
                    };
                    if self.byte_count != header_length {
                        continue;
                    }
                    if out.len() < header_length {
                        return self.buffer_full(meta);
                    }

                    let (payload, max) = if short {
                        (
                            usize::from(self.buffer[3]),
                            MAX_SHORT_BINARY_MESSAGE_LENGTH,
                        )
                    } else {
                        (
                            usize::from(u16::from_le_bytes([self.buffer[8], self.buffer[9]])),
                            MAX_BINARY_MESSAGE_LENGTH,
                        )
                    };
                    let message = header_length + payload + BINARY_CRC_LENGTH;
                    if payload > max || message > max {
                        self.abandon(BINARY_SYNC_LENGTH);
                        continue;
                    }

                    let needed = if self.payload_only { payload } else { message };
                    if out.len() < needed {
                        self.length = needed;
                        return self.buffer_full(meta);
                    }

                    self.expected_payload_length = payload;
                    self.expected_message_length = message;
                    self.state = State::WaitingForBinaryBodyAndCrc;
                }

                State::WaitingForBinaryBodyAndCrc => {
                    if self.byte_count != self.expected_message_length {
                        continue;
                    }
                    let total = self.expected_message_length;
                    // The CRC of a frame with its CRC appended is zero.
                    if crc32(&self.buffer[..total]) == 0 {
                        let start = if self.payload_only {
                            self.length = self.expected_payload_length;
                            total - self.expected_payload_length - BINARY_CRC_LENGTH
                        } else {
                            0
                        };
                        self.complete(out, meta, start, total);
                        return FrameStatus::Success;
                    }
                    trace!(format = %self.format, length = total, "bad binary crc");
                    self.abandon(BINARY_SYNC_LENGTH);
                }

                State::WaitingForAsciiHeaderAndBody => {
                    if byte == ASCII_CRC_DELIMITER {
                        // Need *XXXXXXXX\r\n to decide
                        if self.byte_count + ASCII_CRC_LENGTH + 2 > self.buffer.len() {
                            self.byte_count -= 1;
                            meta.format = self.format;
                            meta.length = self.length;
                            return FrameStatus::Incomplete;
                        }
                        // RXCONFIG carries an embedded message with its own *CRC; a second
                        // delimiter 8 bytes on means this one is payload.
                        if self.buffer[self.byte_count + ASCII_CRC_LENGTH] != ASCII_CRC_DELIMITER
                            && self.is_ascii_crc(self.byte_count)
                        {
                            self.crc_delimiter_position = self.byte_count - 1;
                            self.state = State::WaitingForAsciiCrc;
                        }
                    } else if self.byte_count >= MAX_ASCII_MESSAGE_LENGTH {
                        self.abandon(ASCII_SYNC_LENGTH);
                    }
                }

                State::WaitingForAsciiCrc => {
                    if self.is_ascii_crc(self.byte_count - 1) {
                        let crc_start = self.byte_count - 1;
                        let total = crc_start + ASCII_CRC_LENGTH + 2;
                        self.length = total;

                        let computed = crc32(&self.buffer[ASCII_SYNC_LENGTH..self.crc_delimiter_position]);
                        let received = &self.buffer[crc_start..crc_start + ASCII_CRC_LENGTH];
                        if Self::checksum_matches(received, computed) {
                            if out.len() < total {
                                return self.buffer_full(meta);
                            }
                            self.complete(out, meta, 0, total);
                            return FrameStatus::Success;
                        }
                        trace!(format = %self.format, length = total, "bad ascii crc");
                        self.abandon(ASCII_SYNC_LENGTH);
                    } else if self.byte_count >= MAX_ASCII_MESSAGE_LENGTH {
                        self.abandon(ASCII_SYNC_LENGTH);
                    }
                }

                State::WaitingForAbbAsciiHeader => {
                    if self.is_crlf(self.byte_count - 1) {
                        if self.is_abbrev_response() {
                            // Consume the LF
                            self.length = self.byte_count + 1;
                            meta.response = true;
                            if out.len() < self.length {
                                return self.buffer_full(meta);
                            }
                            let total = self.length;
                            self.complete(out, meta, 0, total);
                            meta.response = true;
                            return FrameStatus::Success;
                        } else if self.byte_count + 2 >= self.buffer.len() {
                            // Can't look past the CRLF yet; reread the CR next time.
                            self.byte_count -= 1;
                            self.length = self.byte_count;
                            meta.format = self.format;
                            meta.length = self.length;
                            return FrameStatus::Incomplete;
                        } else if self.buffer[self.byte_count + 1] == ABBREV_ASCII_SYNC
                            && self.buffer[self.byte_count + 2] == ABBREV_ASCII_SEPARATOR
                        {
                            self.byte_count += 1;
                            self.state = State::WaitingForAbbAsciiBody;
                        } else {
                            self.abandon(ASCII_SYNC_LENGTH);
                        }
                    } else if self.byte_count >= MAX_ASCII_MESSAGE_LENGTH {
                        self.abandon(ASCII_SYNC_LENGTH);
                    }
                }

                State::WaitingForAbbAsciiBody => {
                    if self.byte_count + 3 >= self.buffer.len() {
                        self.byte_count -= 1;
                        self.length = self.buffer.len();
                        meta.format = self.format;
                        meta.length = self.length;
                        return FrameStatus::Incomplete;
                    }

                    // Array element lines end with " \r\n", more lines follow.
                    if self.is_abbrev_separator_crlf(self.byte_count - 1) {
                        self.byte_count += 2;
                        let next = self.byte_count;
                        if self.buffer[next] != ABBREV_ASCII_SYNC
                            || self.buffer[next + 1] != ABBREV_ASCII_SEPARATOR
                        {
                            // An empty array leaves an indentation-only line, which ends the
                            // message rather than continuing it.
                            if self.is_empty_abbrev_line(next - 3) {
                                self.byte_count -= 1;
                            } else {
                                self.abandon(ASCII_SYNC_LENGTH);
                                continue;
                            }
                        }
                    }

                    if self.is_crlf(self.byte_count - 1) {
                        self.length = self.byte_count + 1;
                        if out.len() < self.length {
                            return self.buffer_full(meta);
                        }
                        let total = self.length;
                        self.complete(out, meta, 0, total);
                        return FrameStatus::Success;
                    } else if self.byte_count >= MAX_ABB_ASCII_RESPONSE_LENGTH {
                        self.abandon(ASCII_SYNC_LENGTH);
                    }
                }

                State::WaitingForNmeaBody => {
                    if byte == ASCII_CRC_DELIMITER {
                        self.crc_delimiter_position = self.byte_count - 1;
                        self.state = State::WaitingForNmeaCrc;
                    } else if self.byte_count >= MAX_NMEA_MESSAGE_LENGTH {
                        self.abandon(NMEA_SYNC_LENGTH);
                    }
                }

                State::WaitingForNmeaCrc => {
                    if byte == b'\n' {
                        let end = self.byte_count - 2;
                        let received = &self.buffer[end - NMEA_CRC_LENGTH..end];
                        let computed = self.buffer[NMEA_SYNC_LENGTH..self.crc_delimiter_position]
                            .iter()
                            .fold(0u8, |acc, b| acc ^ b);
                        if Self::checksum_matches(received, u32::from(computed)) {
                            if out.len() < self.length {
                                return self.buffer_full(meta);
                            }
                            let total = self.length;
                            self.complete(out, meta, 0, total);
                            return FrameStatus::Success;
                        }
                        trace!(length = self.length, "bad nmea checksum");
                        self.abandon(NMEA_SYNC_LENGTH);
                    } else if self.byte_count >= MAX_NMEA_MESSAGE_LENGTH {
                        self.abandon(NMEA_SYNC_LENGTH);
                    }
                }

                State::WaitingForJsonObject => {
                    if out.len() < self.byte_count {
                        return self.buffer_full(meta);
                    }

                    if self.json_in_string {
                        if self.json_escape {
                            self.json_escape = false;
                        } else if byte == b'\\' {
                            self.json_escape = true;
                        } else if byte == b'"' {
                            self.json_in_string = false;
                        }
                    } else if byte == b'"' {
                        self.json_in_string = true;
                    } else if byte == JSON_OBJECT_OPEN {
                        self.json_depth += 1;
                    } else if byte == JSON_OBJECT_CLOSE {
                        self.json_depth -= 1;
                    }

                    if self.json_depth == 0 {
                        let total = self.byte_count;
                        self.complete(out, meta, 0, total);
                        return FrameStatus::Success;
                    }
                }
            }
        }
    }
}
