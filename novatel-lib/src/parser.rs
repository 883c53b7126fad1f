//! Stream conversion.
//!
//! A [Parser] ties the framer, decoders, filter and encoder together: bytes go in through
//! [Parser::write] and converted messages come out of [Parser::read]. [FileParser] drives a
//! parser from any [Read] and [parse_threaded] does the same on a background thread.
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, Receiver};
use tracing::{debug, info};

use crate::database::MessageDatabase;
use crate::decoder::MessageDecoder;
use crate::encoder::{Encoder, MessageData};
use crate::field::FieldContainer;
use crate::filter::Filter;
use crate::format::{EncodeFormat, HeaderFormat, MAX_ASCII_MESSAGE_LENGTH};
use crate::framer::{FrameStatus, Framer, DEFAULT_BUFFER_CAPACITY};
use crate::header::{HeaderDecoder, IntermediateHeader};
use crate::{MetaData, Result};

/// One item produced by a [Parser].
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedMessage {
    /// A decoded message re-encoded in the parser's [EncodeFormat].
    Encoded {
        message: Vec<u8>,
        data: MessageData,
        meta: MetaData,
    },
    /// A frame passed through unchanged: an abbreviated ASCII response or an NMEA sentence.
    Raw { message: Vec<u8>, meta: MetaData },
    /// Bytes that are not part of any frame.
    Unknown(Vec<u8>),
}

impl ParsedMessage {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            ParsedMessage::Encoded { message, .. } | ParsedMessage::Raw { message, .. } => message,
            ParsedMessage::Unknown(bytes) => bytes,
        }
    }

    #[must_use]
    pub fn meta(&self) -> Option<&MetaData> {
        match self {
            ParsedMessage::Encoded { meta, .. } | ParsedMessage::Raw { meta, .. } => Some(meta),
            ParsedMessage::Unknown(_) => None,
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, ParsedMessage::Unknown(_))
    }
}

/// A decoded message before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateMessage {
    pub header: IntermediateHeader,
    pub fields: Vec<FieldContainer>,
    pub meta: MetaData,
    /// The frame the message was decoded from.
    pub frame: Vec<u8>,
}

enum Framed {
    Frame(MetaData),
    Unknown(usize),
}

/// Converts a byte stream into messages of a single [EncodeFormat].
///
/// Frames that fail to decode are logged and skipped. Only contract violations
/// ([crate::Error::is_internal]) are returned as errors.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use novatel::{EncodeFormat, MessageDatabase, Parser};
///
/// let db = Arc::new(MessageDatabase::from_file("messages.json").unwrap());
/// let mut parser = Parser::new(db).with_encode_format(EncodeFormat::Json);
/// parser.write(b"#BESTPOSA,COM1,0,83.5,FINESTEERING,2163,329760.000,02400000,b1f6,65535;...");
/// while let Some(msg) = parser.read().unwrap() {
///     println!("{}", String::from_utf8_lossy(msg.bytes()));
/// }
/// ```
#[derive(Debug)]
pub struct Parser {
    framer: Framer,
    header_decoder: HeaderDecoder,
    message_decoder: MessageDecoder,
    encoder: Encoder,
    filter: Option<Filter>,
    encode_format: EncodeFormat,
    return_unknown_bytes: bool,
    ignore_abbreviated_responses: bool,
    frame: Vec<u8>,
}

impl Parser {
    #[must_use]
    pub fn new(db: Arc<MessageDatabase>) -> Self {
        let mut framer = Framer::new();
        framer.set_report_unknown_bytes(true);
        Self {
            framer,
            header_decoder: HeaderDecoder::new(db.clone()),
            message_decoder: MessageDecoder::new(db.clone()),
            encoder: Encoder::new(db),
            filter: None,
            encode_format: EncodeFormat::Ascii,
            return_unknown_bytes: true,
            ignore_abbreviated_responses: true,
            frame: vec![0u8; DEFAULT_BUFFER_CAPACITY],
        }
    }

    pub fn load_db(&mut self, db: Arc<MessageDatabase>) {
        self.header_decoder.load_db(db.clone());
        self.message_decoder.load_db(db.clone());
        self.encoder.load_db(db);
    }

    #[must_use]
    pub fn database(&self) -> &Arc<MessageDatabase> {
        self.encoder.database()
    }

    #[must_use]
    pub fn with_encode_format(mut self, format: EncodeFormat) -> Self {
        self.encode_format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Hand back bytes outside any frame as [ParsedMessage::Unknown]. Enabled by default.
    #[must_use]
    pub fn with_return_unknown_bytes(mut self, value: bool) -> Self {
        self.set_return_unknown_bytes(value);
        self
    }

    /// Decode abbreviated ASCII responses like any other frame instead of passing them through
    /// as [ParsedMessage::Raw]. Enabled by default.
    #[must_use]
    pub fn with_ignore_abbreviated_responses(mut self, value: bool) -> Self {
        self.ignore_abbreviated_responses = value;
        self
    }

    /// Frame and decode JSON messages in the input. Disabled by default.
    #[must_use]
    pub fn with_frame_json(mut self, value: bool) -> Self {
        self.set_frame_json(value);
        self
    }

    pub fn set_encode_format(&mut self, format: EncodeFormat) {
        self.encode_format = format;
    }

    pub fn set_frame_json(&mut self, value: bool) {
        self.framer.set_frame_json(value);
    }

    #[must_use]
    pub fn encode_format(&self) -> EncodeFormat {
        self.encode_format
    }

    pub fn set_filter(&mut self, filter: Option<Filter>) {
        self.filter = filter;
    }

    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn set_return_unknown_bytes(&mut self, value: bool) {
        self.return_unknown_bytes = value;
        self.framer.set_report_unknown_bytes(value);
    }

    pub fn set_ignore_abbreviated_responses(&mut self, value: bool) {
        self.ignore_abbreviated_responses = value;
    }

    /// Buffer stream bytes, returning how many were accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.framer.write(data)
    }

    /// Drain every buffered byte, framed or not.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.framer.buffered());
        let mut buf = vec![0u8; MAX_ASCII_MESSAGE_LENGTH];
        loop {
            let n = self.framer.flush(&mut buf);
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    /// Next converted message, or `None` when more input is needed.
    ///
    /// # Errors
    /// Only [crate::Error::Internal]; frames with data errors are skipped.
    pub fn read(&mut self) -> Result<Option<ParsedMessage>> {
        self.read_converted(false)
    }

    /// Like [Parser::read], but a trailing abbreviated ASCII frame, which has no terminator to
    /// mark its end, is flushed and decoded. Use once the input is exhausted.
    ///
    /// # Errors
    /// See [Parser::read].
    pub fn decode_incomplete_abbreviated(&mut self) -> Result<Option<ParsedMessage>> {
        self.read_converted(true)
    }

    /// Next decoded message without encoding it. Unknown bytes and pass-through frames are
    /// skipped.
    ///
    /// # Errors
    /// See [Parser::read].
    pub fn read_intermediate(&mut self) -> Result<Option<IntermediateMessage>> {
        self.read_decoded(false)
    }

    /// [Parser::read_intermediate] counterpart of [Parser::decode_incomplete_abbreviated].
    ///
    /// # Errors
    /// See [Parser::read].
    pub fn read_intermediate_final(&mut self) -> Result<Option<IntermediateMessage>> {
        self.read_decoded(true)
    }

    fn next_frame(&mut self, finish: bool) -> Option<Framed> {
        loop {
            let mut meta = MetaData::new();
            match self.framer.get_frame(&mut self.frame, &mut meta) {
                FrameStatus::Success => return Some(Framed::Frame(meta)),
                FrameStatus::Unknown => return Some(Framed::Unknown(meta.length)),
                FrameStatus::BufferFull => {
                    debug!(length = meta.length, "growing frame buffer");
                    self.frame.resize(meta.length, 0);
                }
                FrameStatus::Incomplete
                    if finish
                        && matches!(
                            meta.format,
                            HeaderFormat::AbbAscii | HeaderFormat::ShortAbbAscii
                        ) =>
                {
                    let n = self.framer.flush(&mut self.frame);
                    if n == 0 {
                        return None;
                    }
                    meta.length = n;
                    return Some(Framed::Frame(meta));
                }
                FrameStatus::Incomplete | FrameStatus::BufferEmpty => return None,
            }
        }
    }

    fn accepts(&self, meta: &MetaData) -> bool {
        self.filter.as_ref().map_or(true, |f| f.do_filtering(meta))
    }

    /// Decode the frame currently in the frame buffer. `Ok(None)` if it was filtered out.
    fn decode_frame(
        &self,
        meta: &mut MetaData,
    ) -> Result<Option<(IntermediateHeader, Vec<FieldContainer>)>> {
        let frame = &self.frame[..meta.length];
        let header = self.header_decoder.decode(frame, meta)?;
        if !self.accepts(meta) {
            return Ok(None);
        }
        let body = frame.get(meta.header_length..).unwrap_or_default();
        let fields = self.message_decoder.decode(body, meta)?;
        Ok(Some((header, fields)))
    }

    /// Frames that are handed back without decoding.
    fn passthrough(&self, meta: &MetaData) -> Option<bool> {
        if meta.format == HeaderFormat::Nmea {
            return Some(self.filter.as_ref().is_some_and(|f| f.do_filtering(meta)));
        }
        if !self.ignore_abbreviated_responses && meta.response && meta.format == HeaderFormat::AbbAscii {
            return Some(true);
        }
        None
    }

    fn read_converted(&mut self, finish: bool) -> Result<Option<ParsedMessage>> {
        loop {
            let mut meta = match self.next_frame(finish) {
                None => return Ok(None),
                Some(Framed::Unknown(length)) => {
                    if self.return_unknown_bytes {
                        let length = length.min(self.frame.len());
                        return Ok(Some(ParsedMessage::Unknown(self.frame[..length].to_vec())));
                    }
                    continue;
                }
                Some(Framed::Frame(meta)) => meta,
            };

            match self.passthrough(&meta) {
                Some(true) => {
                    return Ok(Some(ParsedMessage::Raw {
                        message: self.frame[..meta.length].to_vec(),
                        meta,
                    }))
                }
                Some(false) => continue,
                None => {}
            }

            let (header, fields) = match self.decode_frame(&mut meta) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => continue,
                Err(err) if err.is_internal() => return Err(err),
                Err(err) => {
                    info!(format = %meta.format, message_id = meta.message_id, "skipping frame: {err}");
                    continue;
                }
            };

            let encoded = self
                .encoder
                .encode_owned(&header, &fields, &meta, self.encode_format);
            match encoded {
                Ok((message, data)) => {
                    return Ok(Some(ParsedMessage::Encoded {
                        message,
                        data,
                        meta,
                    }))
                }
                Err(err) if err.is_internal() => return Err(err),
                Err(err) => {
                    info!(format = %self.encode_format, message_id = meta.message_id, "skipping frame: {err}");
                }
            }
        }
    }

    fn read_decoded(&mut self, finish: bool) -> Result<Option<IntermediateMessage>> {
        loop {
            let mut meta = match self.next_frame(finish) {
                None => return Ok(None),
                Some(Framed::Unknown(_)) => continue,
                Some(Framed::Frame(meta)) => meta,
            };
            if self.passthrough(&meta).is_some() {
                continue;
            }
            match self.decode_frame(&mut meta) {
                Ok(Some((header, fields))) => {
                    return Ok(Some(IntermediateMessage {
                        header,
                        fields,
                        frame: self.frame[..meta.length].to_vec(),
                        meta,
                    }))
                }
                Ok(None) => {}
                Err(err) if err.is_internal() => return Err(err),
                Err(err) => {
                    info!(format = %meta.format, message_id = meta.message_id, "skipping frame: {err}");
                }
            }
        }
    }
}

/// Feeds a [Parser] from a reader.
///
/// Iterating yields every converted message. Once the reader is exhausted a trailing abbreviated
/// frame is decoded and, when unknown bytes are returned, whatever remains buffered is handed
/// back as [ParsedMessage::Unknown].
pub struct FileParser<R> {
    reader: R,
    parser: Parser,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    exhausted: bool,
    done: bool,
}

impl<R: Read> FileParser<R> {
    pub fn new(reader: R, parser: Parser) -> Self {
        Self {
            reader,
            parser,
            chunk: vec![0u8; MAX_ASCII_MESSAGE_LENGTH],
            pending: Vec::new(),
            exhausted: false,
            done: false,
        }
    }

    #[must_use]
    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut Parser {
        &mut self.parser
    }

    pub fn into_parts(self) -> (R, Parser) {
        (self.reader, self.parser)
    }

    /// Move more input into the parser. Returns false once nothing more can be written.
    fn fill(&mut self) -> Result<bool> {
        if self.pending.is_empty() && !self.exhausted {
            let n = loop {
                match self.reader.read(&mut self.chunk) {
                    Ok(n) => break n,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            };
            if n == 0 {
                self.exhausted = true;
            } else {
                self.pending.extend_from_slice(&self.chunk[..n]);
            }
        }
        if self.pending.is_empty() {
            return Ok(false);
        }
        let n = self.parser.write(&self.pending);
        self.pending.drain(..n);
        Ok(n > 0)
    }

    /// Next converted message, or `None` at the end of input.
    ///
    /// # Errors
    /// [crate::Error::Io] if the reader fails, otherwise see [Parser::read].
    pub fn read(&mut self) -> Result<Option<ParsedMessage>> {
        loop {
            if let Some(msg) = self.parser.read()? {
                return Ok(Some(msg));
            }
            if self.fill()? {
                continue;
            }
            if !self.exhausted {
                // Buffer full of a frame that can never complete.
                let stuck = self.parser.flush();
                debug!(length = stuck.len(), "discarding stalled input");
                if self.parser.return_unknown_bytes && !stuck.is_empty() {
                    return Ok(Some(ParsedMessage::Unknown(stuck)));
                }
                continue;
            }
            if self.done {
                return Ok(None);
            }
            if let Some(msg) = self.parser.decode_incomplete_abbreviated()? {
                return Ok(Some(msg));
            }
            self.done = true;
            let rest = self.parser.flush();
            if self.parser.return_unknown_bytes && !rest.is_empty() {
                return Ok(Some(ParsedMessage::Unknown(rest)));
            }
            return Ok(None);
        }
    }

    /// Next decoded message without encoding, or `None` at the end of input.
    ///
    /// # Errors
    /// See [FileParser::read].
    pub fn read_intermediate(&mut self) -> Result<Option<IntermediateMessage>> {
        loop {
            if let Some(msg) = self.parser.read_intermediate()? {
                return Ok(Some(msg));
            }
            if self.fill()? {
                continue;
            }
            if !self.exhausted {
                self.parser.flush();
                continue;
            }
            if self.done {
                return Ok(None);
            }
            if let Some(msg) = self.parser.read_intermediate_final()? {
                return Ok(Some(msg));
            }
            self.done = true;
            self.parser.flush();
            return Ok(None);
        }
    }
}

impl<R: Read> Iterator for FileParser<R> {
    type Item = Result<ParsedMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}

/// Messages produced by [parse_threaded].
pub struct ThreadedParser {
    messages: Receiver<Result<ParsedMessage>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for ThreadedParser {
    type Item = Result<ParsedMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.messages.recv() {
            Ok(msg) => Some(msg),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        debug!("parser thread panicked");
                    }
                }
                None
            }
        }
    }
}

/// Run a [FileParser] on a background thread, handing messages back over a bounded channel of
/// `buffer_size` entries.
///
/// # Errors
/// [crate::Error::Io] if the thread cannot be started.
pub fn parse_threaded<R>(reader: R, parser: Parser, buffer_size: usize) -> Result<ThreadedParser>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(buffer_size);
    let handle = thread::Builder::new()
        .name("novatel_parser".into())
        .spawn(move || {
            for msg in FileParser::new(reader, parser) {
                let stop = msg.is_err();
                if tx.send(msg).is_err() {
                    debug!("parser receiver dropped");
                    break;
                }
                if stop {
                    break;
                }
            }
        })?;
    Ok(ThreadedParser {
        messages: rx,
        handle: Some(handle),
    })
}
