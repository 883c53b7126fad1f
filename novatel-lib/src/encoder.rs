//! Message encoding.
//!
//! The [Encoder] renders an [IntermediateHeader] and the decoded body fields in any
//! [EncodeFormat], writing into a caller supplied buffer. When the buffer is too small the
//! encode fails with [Error::BufferFull] and can be retried with a larger buffer.
use std::sync::Arc;

use tracing::trace;

use crate::crc::crc32;
use crate::database::{DataTypeName, EnumDefinition, FieldKind, MessageDatabase};
use crate::field::{FieldContainer, FieldValue};
use crate::format::{
    message_type_mask, EncodeFormat, ABBREV_ASCII_INDENTATION_LENGTH, ABBREV_ASCII_SYNC,
    ASCII_SYNC, BINARY_HEADER_LENGTH, BINARY_SYNC1, BINARY_SYNC2, BINARY_SYNC3,
    MESSAGE_SIZE_MAX, SHORT_ASCII_SYNC, SHORT_BINARY_HEADER_LENGTH, SHORT_BINARY_SYNC3,
};
use crate::header::IntermediateHeader;
use crate::{Error, MetaData, Result};

/// Location of an encoded message and its parts in the output buffer.
///
/// For text and binary formats the body runs from the end of the header to the end of the
/// message, including the CRC and terminator. For JSON the header and body are the two nested
/// objects.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageData {
    pub message_length: usize,
    pub header_offset: usize,
    pub header_length: usize,
    pub body_offset: usize,
    pub body_length: usize,
}

impl MessageData {
    #[must_use]
    pub fn message<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        buf.get(..self.message_length).unwrap_or_default()
    }

    #[must_use]
    pub fn header<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        buf.get(self.header_offset..self.header_offset + self.header_length)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn body<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        buf.get(self.body_offset..self.body_offset + self.body_length)
            .unwrap_or_default()
    }
}

/// Bounded writer over the caller's buffer.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn reserve(&self, n: usize) -> Result<()> {
        let needed = self.pos + n;
        if needed > self.buf.len() {
            return Err(Error::BufferFull {
                needed,
                capacity: self.buf.len(),
            });
        }
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    fn put_str(&mut self, s: &str) -> Result<()> {
        self.put(s.as_bytes())
    }

    fn fill(&mut self, byte: u8, n: usize) -> Result<()> {
        self.reserve(n)?;
        self.buf[self.pos..self.pos + n].fill(byte);
        self.pos += n;
        Ok(())
    }

    /// Zero pad so the position is a multiple of `align` relative to `start`.
    fn align(&mut self, start: usize, align: usize) -> Result<()> {
        let rem = (self.pos - start) % align;
        if rem != 0 {
            self.fill(0, align - rem)?;
        }
        Ok(())
    }

    /// Zero pad a span that began at `start` out to `size` bytes.
    fn pad_span(&mut self, start: usize, size: usize) -> Result<()> {
        let used = self.pos - start;
        if used < size {
            self.fill(0, size - used)?;
        }
        Ok(())
    }

    fn pop_if(&mut self, byte: u8) {
        if self.pos > 0 && self.buf[self.pos - 1] == byte {
            self.pos -= 1;
        }
    }

    fn patch(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn written(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

fn encode_err(fc: &FieldContainer, msg: impl std::fmt::Display) -> Error {
    Error::Encode(format!("field {}: {msg}", fc.name()))
}

fn int_value(fc: &FieldContainer) -> Result<i128> {
    fc.value
        .as_i128()
        .ok_or_else(|| encode_err(fc, format!("{} is not an integer", fc.value)))
}

fn float_value(fc: &FieldContainer) -> Result<f64> {
    fc.value
        .as_f64()
        .ok_or_else(|| encode_err(fc, format!("{} is not a number", fc.value)))
}

fn items(fc: &FieldContainer) -> Result<&[FieldContainer]> {
    fc.value
        .as_array()
        .ok_or_else(|| encode_err(fc, "expected an array value"))
}

fn text_value(fc: &FieldContainer) -> Result<&str> {
    fc.value
        .as_str()
        .ok_or_else(|| encode_err(fc, "expected a string value"))
}

fn is_nul(fc: &FieldContainer) -> bool {
    matches!(fc.value, FieldValue::I8(0) | FieldValue::U8(0))
}

fn non_finite(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_sign_negative() {
        "-inf".to_string()
    } else {
        "inf".to_string()
    }
}

fn fixed(v: f64, precision: usize) -> String {
    if !v.is_finite() {
        return non_finite(v);
    }
    format!("{v:.precision$}")
}

/// Scientific notation with a signed, at least two digit exponent, e.g., `1.500e+05`.
fn scientific(v: f64, precision: usize) -> String {
    if !v.is_finite() {
        return non_finite(v);
    }
    let s = format!("{v:.precision$e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s,
    }
}

/// `%k` formatting: fixed notation unless the magnitude does not fit `before` integer digits.
fn compact(v: f64, before: u32, after: u32, epsilon: f64) -> String {
    let abs = v.abs();
    let after_digits = after as usize;
    if abs < epsilon {
        fixed(v, after_digits)
    } else if before == 0 && after == 0 {
        fixed(v, 1)
    } else if abs > 10f64.powi(before as i32) {
        scientific(v, (before + after).saturating_sub(1) as usize)
    } else if abs < 10f64.powi(-(before as i32)) {
        scientific(v, after_digits)
    } else {
        fixed(v, after_digits)
    }
}

fn hex(v: i128, digits: usize) -> String {
    let mask = if digits >= 32 {
        u128::MAX
    } else {
        (1u128 << (digits * 4)) - 1
    };
    format!("{:0digits$x}", (v as u128) & mask)
}

fn satellite_id(v: i128) -> String {
    let raw = v as u32;
    let slot = raw & 0xFFFF;
    let channel = (raw >> 16) as u16 as i16;
    match channel {
        0 => slot.to_string(),
        c if c < 0 => format!("{slot}{c}"),
        c => format!("{slot}+{c}"),
    }
}

fn printable(v: i128) -> String {
    let b = v as u8;
    match b {
        b'\\' => "\\\\".to_string(),
        32..=126 => char::from(b).to_string(),
        _ => format!("\\x{b:02x}"),
    }
}

/// Encodes headers and bodies in every [EncodeFormat].
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use novatel::{EncodeFormat, Encoder, HeaderDecoder, MessageDatabase, MessageDecoder, MetaData};
///
/// let db = Arc::new(MessageDatabase::from_file("messages.json").unwrap());
/// let frame = b"%RAWIMUSXA,1692,484620.664;00,11*a5db8c7b\r\n";
/// let mut meta = MetaData::new();
/// let header = HeaderDecoder::new(db.clone()).decode(frame, &mut meta).unwrap();
/// let fields = MessageDecoder::new(db.clone())
///     .decode(&frame[meta.header_length..], &meta)
///     .unwrap();
///
/// let mut buf = vec![0u8; 1024];
/// let data = Encoder::new(db)
///     .encode(&header, &fields, &meta, EncodeFormat::Json, &mut buf)
///     .unwrap();
/// println!("{}", String::from_utf8_lossy(data.message(&buf)));
/// ```
#[derive(Debug, Clone)]
pub struct Encoder {
    db: Arc<MessageDatabase>,
    commands: Option<Arc<EnumDefinition>>,
    ports: Option<Arc<EnumDefinition>>,
    time_statuses: Option<Arc<EnumDefinition>>,
}

impl Encoder {
    #[must_use]
    pub fn new(db: Arc<MessageDatabase>) -> Self {
        let mut encoder = Self {
            db: db.clone(),
            commands: None,
            ports: None,
            time_statuses: None,
        };
        encoder.load_db(db);
        encoder
    }

    /// Replace the database used to name messages and header enumerations.
    pub fn load_db(&mut self, db: Arc<MessageDatabase>) {
        self.commands = db.get_enum_by_name("Commands");
        self.ports = db.get_enum_by_name("PortAddress");
        self.time_statuses = db.get_enum_by_name("GPSTimeStatus");
        self.db = db;
    }

    #[must_use]
    pub fn database(&self) -> &Arc<MessageDatabase> {
        &self.db
    }

    /// Encode a message into `out`.
    ///
    /// `meta` is the metadata of the source frame; a short source header produces the short
    /// variant of the target header.
    ///
    /// # Errors
    /// [Error::BufferFull] if `out` is too small, [Error::Encode] if a value cannot be rendered
    /// in the target format and [Error::Internal] if a field definition is inconsistent.
    pub fn encode(
        &self,
        header: &IntermediateHeader,
        fields: &[FieldContainer],
        meta: &MetaData,
        format: EncodeFormat,
        out: &mut [u8],
    ) -> Result<MessageData> {
        let mut w = Writer { buf: out, pos: 0 };
        let short = meta.format.is_short();
        let mut data = MessageData::default();

        match format {
            EncodeFormat::Ascii => {
                if short {
                    self.short_ascii_header(&mut w, header)?;
                } else {
                    self.ascii_header(&mut w, header)?;
                }
                data.header_length = w.pos;
                let body_start = w.pos;
                self.ascii_body(&mut w, fields, false, 0)?;
                if w.pos > body_start {
                    w.pop_if(b',');
                }
                let crc = crc32(&w.written()[1..]);
                w.put_str(&format!("*{crc:08x}\r\n"))?;
            }
            EncodeFormat::AbbrevAscii => {
                if header.is_response() {
                    w.put(&[ABBREV_ASCII_SYNC])?;
                    data.header_length = w.pos;
                    let response = fields
                        .iter()
                        .find(|f| f.def.kind == FieldKind::ResponseStr)
                        .map_or(Ok(""), text_value)?;
                    w.put_str(response)?;
                    w.put(b"\r\n")?;
                } else {
                    if short {
                        self.short_abbrev_header(&mut w, header)?;
                    } else {
                        self.abbrev_header(&mut w, header)?;
                    }
                    data.header_length = w.pos;
                    self.ascii_body(&mut w, fields, true, 1)?;
                    w.pop_if(b' ');
                    w.put(b"\r\n")?;
                }
            }
            EncodeFormat::Binary | EncodeFormat::FlattenedBinary => {
                if short {
                    Self::short_binary_header(&mut w, header)?;
                } else {
                    Self::binary_header(&mut w, header)?;
                }
                data.header_length = w.pos;
                let body_start = w.pos;
                self.binary_body(&mut w, fields, format == EncodeFormat::FlattenedBinary)?;
                let body_length = w.pos - body_start;
                if short {
                    let length = u8::try_from(body_length).map_err(|_| {
                        Error::Encode(format!(
                            "{body_length} byte body does not fit a short binary header"
                        ))
                    })?;
                    w.patch(3, &[length]);
                } else {
                    let length = u16::try_from(body_length).map_err(|_| {
                        Error::Encode(format!("{body_length} byte body does not fit a binary header"))
                    })?;
                    w.patch(8, &length.to_le_bytes());
                }
                let crc = crc32(w.written());
                w.put(&crc.to_le_bytes())?;
            }
            EncodeFormat::Json => {
                w.put(br#"{"header": "#)?;
                data.header_offset = w.pos;
                if short {
                    self.short_json_header(&mut w, header)?;
                } else {
                    self.json_header(&mut w, header)?;
                }
                data.header_length = w.pos - data.header_offset;
                w.put(br#","body": "#)?;
                data.body_offset = w.pos;
                self.json_body(&mut w, fields)?;
                data.body_length = w.pos - data.body_offset;
                w.put(b"}")?;
            }
        }

        data.message_length = w.pos;
        if format != EncodeFormat::Json {
            data.body_offset = data.header_length;
            data.body_length = data.message_length - data.header_length;
        }
        trace!(%format, message_id = header.message_id, length = data.message_length, "encoded message");
        Ok(data)
    }

    /// Encode into a new buffer, growing it as needed.
    ///
    /// # Errors
    /// See [Encoder::encode].
    pub fn encode_to_vec(
        &self,
        header: &IntermediateHeader,
        fields: &[FieldContainer],
        meta: &MetaData,
        format: EncodeFormat,
    ) -> Result<Vec<u8>> {
        self.encode_owned(header, fields, meta, format)
            .map(|(message, _)| message)
    }

    /// [Encoder::encode_to_vec], also returning the location of the header and body.
    ///
    /// # Errors
    /// See [Encoder::encode].
    pub fn encode_owned(
        &self,
        header: &IntermediateHeader,
        fields: &[FieldContainer],
        meta: &MetaData,
        format: EncodeFormat,
    ) -> Result<(Vec<u8>, MessageData)> {
        let mut buf = vec![0u8; MESSAGE_SIZE_MAX];
        loop {
            match self.encode(header, fields, meta, format, &mut buf) {
                Ok(data) => {
                    buf.truncate(data.message_length);
                    return Ok((buf, data));
                }
                Err(Error::BufferFull { needed, .. }) if buf.len() < 16 * MESSAGE_SIZE_MAX => {
                    let len = needed.max(buf.len() * 2);
                    buf.resize(len, 0);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn message_name(&self, header: &IntermediateHeader) -> String {
        self.db
            .get_msg_def(header.message_id)
            .map(|def| def.name.clone())
            .or_else(|| {
                self.commands
                    .as_ref()
                    .and_then(|e| e.name_of(i32::from(header.message_id)))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    fn sibling_suffix(header: &IntermediateHeader) -> String {
        match header.sibling_id() {
            0 => String::new(),
            id => format!("_{id}"),
        }
    }

    fn enum_string(def: Option<&Arc<EnumDefinition>>, value: u32) -> &str {
        def.and_then(|e| e.name_of(value as i32)).unwrap_or("UNKNOWN")
    }

    fn port_name(&self, header: &IntermediateHeader) -> &str {
        Self::enum_string(self.ports.as_ref(), header.port_address)
    }

    fn time_status_name(&self, header: &IntermediateHeader) -> &str {
        Self::enum_string(self.time_statuses.as_ref(), header.time_status)
    }

    fn seconds(header: &IntermediateHeader) -> String {
        format!("{:.3}", header.milliseconds / 1000.0)
    }

    fn ascii_header(&self, w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        let suffix = if header.is_response() { 'R' } else { 'A' };
        w.put_str(&format!(
            "{}{}{suffix}{},{},{},{:.1},{},{},{},{:08x},{:04x},{};",
            char::from(ASCII_SYNC),
            self.message_name(header),
            Self::sibling_suffix(header),
            self.port_name(header),
            header.sequence,
            header.idle_percent(),
            self.time_status_name(header),
            header.week,
            Self::seconds(header),
            header.receiver_status,
            header.message_definition_crc & 0xFFFF,
            header.receiver_sw_version,
        ))
    }

    fn short_ascii_header(&self, w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        let suffix = if header.is_response() { 'R' } else { 'A' };
        w.put_str(&format!(
            "{}{}{suffix}{},{},{};",
            char::from(SHORT_ASCII_SYNC),
            self.message_name(header),
            Self::sibling_suffix(header),
            header.week,
            Self::seconds(header),
        ))
    }

    fn abbrev_header(&self, w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        w.put_str(&format!(
            "{}{}{} {} {} {:.1} {} {} {} {:08x} {:04x} {}\r\n",
            char::from(ABBREV_ASCII_SYNC),
            self.message_name(header),
            Self::sibling_suffix(header),
            self.port_name(header),
            header.sequence,
            header.idle_percent(),
            self.time_status_name(header),
            header.week,
            Self::seconds(header),
            header.receiver_status,
            header.message_definition_crc & 0xFFFF,
            header.receiver_sw_version,
        ))
    }

    fn short_abbrev_header(&self, w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        w.put_str(&format!(
            "{}{}{} {} {}\r\n",
            char::from(ABBREV_ASCII_SYNC),
            self.message_name(header),
            Self::sibling_suffix(header),
            header.week,
            Self::seconds(header),
        ))
    }

    fn binary_header(w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        let mut hdr = [0u8; BINARY_HEADER_LENGTH];
        hdr[..3].copy_from_slice(&[BINARY_SYNC1, BINARY_SYNC2, BINARY_SYNC3]);
        hdr[3] = BINARY_HEADER_LENGTH as u8;
        hdr[4..6].copy_from_slice(&header.message_id.to_le_bytes());
        hdr[6] = header.message_type & !message_type_mask::MSGFORMAT;
        hdr[7] = header.port_address as u8;
        hdr[10..12].copy_from_slice(&header.sequence.to_le_bytes());
        hdr[12] = header.idle_time;
        hdr[13] = header.time_status as u8;
        hdr[14..16].copy_from_slice(&header.week.to_le_bytes());
        hdr[16..20].copy_from_slice(&(header.milliseconds.round() as u32).to_le_bytes());
        hdr[20..24].copy_from_slice(&header.receiver_status.to_le_bytes());
        hdr[24..26].copy_from_slice(&(header.message_definition_crc as u16).to_le_bytes());
        hdr[26..28].copy_from_slice(&header.receiver_sw_version.to_le_bytes());
        w.put(&hdr)
    }

    fn short_binary_header(w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        let mut hdr = [0u8; SHORT_BINARY_HEADER_LENGTH];
        hdr[..3].copy_from_slice(&[BINARY_SYNC1, BINARY_SYNC2, SHORT_BINARY_SYNC3]);
        hdr[4..6].copy_from_slice(&header.message_id.to_le_bytes());
        hdr[6..8].copy_from_slice(&header.week.to_le_bytes());
        hdr[8..12].copy_from_slice(&(header.milliseconds.round() as u32).to_le_bytes());
        w.put(&hdr)
    }

    fn json_header(&self, w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        w.put_str(&format!(
            concat!(
                r#"{{"message": "{}{}","id": {},"port": "{}","sequence_num": {},"#,
                r#""percent_idle_time": {:.1},"time_status": "{}","week": {},"seconds": {},"#,
                r#""receiver_status": {},"HEADER_reserved1": {},"receiver_sw_version": {}}}"#
            ),
            self.message_name(header),
            Self::sibling_suffix(header),
            header.message_id,
            self.port_name(header),
            header.sequence,
            header.idle_percent(),
            self.time_status_name(header),
            header.week,
            Self::seconds(header),
            header.receiver_status,
            header.message_definition_crc,
            header.receiver_sw_version,
        ))
    }

    fn short_json_header(&self, w: &mut Writer, header: &IntermediateHeader) -> Result<()> {
        w.put_str(&format!(
            r#"{{"message": "{}{}","id": {},"week": {},"seconds": {}}}"#,
            self.message_name(header),
            Self::sibling_suffix(header),
            header.message_id,
            header.week,
            Self::seconds(header),
        ))
    }

    fn enum_name(fc: &FieldContainer) -> Result<String> {
        let value = int_value(fc)? as i32;
        Ok(fc
            .def
            .enum_def
            .as_ref()
            .and_then(|e| e.name_of(value))
            .map_or_else(|| value.to_string(), str::to_string))
    }

    fn indent(w: &mut Writer, level: usize) -> Result<()> {
        w.put(b"\r\n<")?;
        w.fill(b' ', level * ABBREV_ASCII_INDENTATION_LENGTH)
    }

    fn ascii_body(
        &self,
        w: &mut Writer,
        fields: &[FieldContainer],
        abbreviated: bool,
        level: usize,
    ) -> Result<()> {
        let sep = if abbreviated { b' ' } else { b',' };
        let mut new_line = false;
        if abbreviated {
            w.put(&[ABBREV_ASCII_SYNC])?;
            w.fill(b' ', level * ABBREV_ASCII_INDENTATION_LENGTH)?;
        }

        for fc in fields {
            if new_line {
                Self::indent(w, level)?;
                new_line = false;
            }
            let def = &fc.def;
            match def.kind {
                FieldKind::FieldArray => {
                    let records = items(fc)?;
                    w.put_str(&records.len().to_string())?;
                    w.put(&[sep])?;
                    if abbreviated {
                        if records.is_empty() {
                            Self::indent(w, level + 1)?;
                        } else {
                            for record in records {
                                w.put(b"\r\n")?;
                                self.ascii_body(w, record.children(), true, level + 1)?;
                            }
                            new_line = true;
                        }
                    } else {
                        for record in records {
                            self.ascii_body(w, record.children(), false, level)?;
                        }
                    }
                }
                FieldKind::FixedLengthArray | FieldKind::VariableLengthArray => {
                    let elements = items(fc)?;
                    if def.kind == FieldKind::VariableLengthArray {
                        w.put_str(&elements.len().to_string())?;
                        w.put(&[sep])?;
                    }
                    if def.is_string() {
                        w.put(b"\"")?;
                        for element in elements.iter().take_while(|e| !is_nul(e)) {
                            w.put_str(&self.ascii_scalar(element)?)?;
                        }
                        w.put(b"\"")?;
                        w.put(&[sep])?;
                    } else if def.is_csv() {
                        for element in elements {
                            w.put_str(&self.ascii_scalar(element)?)?;
                            w.put(&[sep])?;
                        }
                    } else {
                        for element in elements {
                            w.put_str(&self.ascii_scalar(element)?)?;
                        }
                        w.put(&[sep])?;
                    }
                }
                FieldKind::String => {
                    w.put(b"\"")?;
                    w.put_str(text_value(fc)?)?;
                    w.put(b"\"")?;
                    w.put(&[sep])?;
                }
                FieldKind::Enum => {
                    w.put_str(&Self::enum_name(fc)?)?;
                    w.put(&[sep])?;
                }
                FieldKind::ResponseId => {}
                FieldKind::ResponseStr => {
                    w.put_str(text_value(fc)?)?;
                    w.put(&[sep])?;
                }
                FieldKind::Simple | FieldKind::Bitfield => {
                    w.put_str(&self.ascii_scalar(fc)?)?;
                    w.put(&[sep])?;
                }
                FieldKind::Unknown => {
                    return Err(Error::Internal(format!(
                        "field {} has an unknown kind",
                        def.name
                    )))
                }
            }
        }
        Ok(())
    }

    fn float_text(fc: &FieldContainer, letters: &str) -> Result<String> {
        let def = &fc.def;
        let v = float_value(fc)?;
        let precision = def.precision().unwrap_or(6) as usize;
        Ok(match letters {
            "e" | "le" => scientific(v, precision),
            "k" | "lk" => {
                let epsilon = if matches!(fc.value, FieldValue::F32(_)) {
                    f64::from(f32::EPSILON)
                } else {
                    f64::EPSILON
                };
                compact(
                    v,
                    def.width().unwrap_or(0),
                    def.precision().unwrap_or(0),
                    epsilon,
                )
            }
            _ => fixed(v, precision),
        })
    }

    fn ascii_scalar(&self, fc: &FieldContainer) -> Result<String> {
        let def = &fc.def;
        if def.data_type.name == DataTypeName::Bool {
            let v = match fc.value {
                FieldValue::Bool(b) => b,
                _ => int_value(fc)? != 0,
            };
            return Ok(if v { "TRUE" } else { "FALSE" }.to_string());
        }

        let letters = def.letters();
        Ok(match letters {
            "x" | "X" => hex(int_value(fc)?, 2 * usize::from(def.data_type.length)),
            "lx" => hex(int_value(fc)?, 8),
            "llx" => hex(int_value(fc)?, 16),
            "XB" | "Z" => hex(int_value(fc)?, 2),
            "s" | "S" | "c" | "uc" => char::from(int_value(fc)? as u8).to_string(),
            "m" => self.db.msg_id_to_msg_name(int_value(fc)? as u32),
            "T" => fixed(float_value(fc)? / 1000.0, 3),
            "id" => satellite_id(int_value(fc)?),
            "P" => printable(int_value(fc)?),
            "ucb" => format!("{:08b}", int_value(fc)? as u8),
            "f" | "lf" | "e" | "le" | "k" | "lk" => Self::float_text(fc, letters)?,
            _ => match def.data_type.name {
                DataTypeName::Hexbyte => hex(int_value(fc)?, 2),
                DataTypeName::Float | DataTypeName::Double => Self::float_text(fc, "f")?,
                _ => int_value(fc)?.to_string(),
            },
        })
    }

    fn json_body(&self, w: &mut Writer, fields: &[FieldContainer]) -> Result<()> {
        w.put(b"{")?;
        for (i, fc) in fields.iter().enumerate() {
            if i > 0 {
                w.put(b",")?;
            }
            let def = &fc.def;
            w.put_str(&format!(r#""{}": "#, def.name))?;
            match def.kind {
                FieldKind::FieldArray => {
                    w.put(b"[")?;
                    for (j, record) in items(fc)?.iter().enumerate() {
                        if j > 0 {
                            w.put(b",")?;
                        }
                        self.json_body(w, record.children())?;
                    }
                    w.put(b"]")?;
                }
                FieldKind::FixedLengthArray | FieldKind::VariableLengthArray => {
                    let elements = items(fc)?;
                    if def.is_string() {
                        let text: String = elements
                            .iter()
                            .take_while(|e| !is_nul(e))
                            .map(|e| int_value(e).map(|v| char::from(v as u8)))
                            .collect::<Result<_>>()?;
                        w.put_str(&serde_json::to_string(&text)?)?;
                    } else {
                        w.put(b"[")?;
                        for (j, element) in elements.iter().enumerate() {
                            if j > 0 {
                                w.put(b",")?;
                            }
                            w.put_str(&self.json_scalar(element)?)?;
                        }
                        w.put(b"]")?;
                    }
                }
                FieldKind::String | FieldKind::ResponseStr => {
                    w.put_str(&serde_json::to_string(text_value(fc)?)?)?;
                }
                FieldKind::Enum => {
                    let value = int_value(fc)? as i32;
                    match def.enum_def.as_ref().and_then(|e| e.name_of(value)) {
                        Some(name) => w.put_str(&serde_json::to_string(name)?)?,
                        None => w.put_str(&value.to_string())?,
                    }
                }
                FieldKind::ResponseId => w.put_str(&int_value(fc)?.to_string())?,
                FieldKind::Simple | FieldKind::Bitfield => w.put_str(&self.json_scalar(fc)?)?,
                FieldKind::Unknown => {
                    return Err(Error::Internal(format!(
                        "field {} has an unknown kind",
                        def.name
                    )))
                }
            }
        }
        w.put(b"}")
    }

    fn json_scalar(&self, fc: &FieldContainer) -> Result<String> {
        let def = &fc.def;
        if def.data_type.name == DataTypeName::Bool {
            let v = match fc.value {
                FieldValue::Bool(b) => b,
                _ => int_value(fc)? != 0,
            };
            return Ok(v.to_string());
        }

        let letters = def.letters();
        let quoted = |s: String| serde_json::to_string(&s).map_err(Error::from);
        match letters {
            "T" => Ok(fixed(float_value(fc)? / 1000.0, 3)),
            "m" => quoted(self.db.msg_id_to_msg_name(int_value(fc)? as u32)),
            "id" => quoted(satellite_id(int_value(fc)?)),
            "c" | "uc" => quoted(char::from(int_value(fc)? as u8).to_string()),
            "ucb" => quoted(format!("{:08b}", int_value(fc)? as u8)),
            _ if def.data_type.name == DataTypeName::Float
                || def.data_type.name == DataTypeName::Double =>
            {
                let v = float_value(fc)?;
                if !v.is_finite() {
                    return Err(encode_err(fc, format!("{v} has no JSON representation")));
                }
                let letters = if matches!(letters, "e" | "le" | "k" | "lk") {
                    letters
                } else {
                    "f"
                };
                Self::float_text(fc, letters)
            }
            _ => Ok(int_value(fc)?.to_string()),
        }
    }

    fn binary_body(&self, w: &mut Writer, fields: &[FieldContainer], flatten: bool) -> Result<()> {
        let start = w.pos;
        for fc in fields {
            let def = &fc.def;
            let align = usize::from(def.data_type.length.min(4));
            if align > 1 {
                w.align(start, align)?;
            }

            match def.kind {
                FieldKind::FieldArray => {
                    let records = items(fc)?;
                    w.put(&(records.len() as u32).to_le_bytes())?;
                    let records_start = w.pos;
                    for record in records {
                        self.binary_body(w, record.children(), flatten)?;
                    }
                    if flatten {
                        w.pad_span(records_start, def.field_size as usize)?;
                    }
                }
                FieldKind::FixedLengthArray | FieldKind::VariableLengthArray => {
                    def.data_type.check_width()?;
                    let elements = items(fc)?;
                    if elements.len() > def.array_length as usize {
                        return Err(encode_err(
                            fc,
                            format!("{} elements exceeds maximum {}", elements.len(), def.array_length),
                        ));
                    }
                    if def.kind == FieldKind::VariableLengthArray {
                        w.put(&(elements.len() as u32).to_le_bytes())?;
                    }
                    let elements_start = w.pos;
                    for element in elements {
                        Self::binary_scalar(w, element)?;
                    }
                    if flatten || def.kind == FieldKind::FixedLengthArray {
                        let size = def.array_length as usize * usize::from(def.data_type.length);
                        w.pad_span(elements_start, size)?;
                    }
                }
                FieldKind::String => {
                    let text = text_value(fc)?;
                    let text_start = w.pos;
                    w.put(text.as_bytes())?;
                    if flatten {
                        let size = def.array_length as usize * usize::from(def.data_type.length);
                        w.pad_span(text_start, size)?;
                    } else {
                        let rem = (w.pos - start) % 4;
                        w.fill(0, 4 - rem)?;
                    }
                }
                FieldKind::Enum => {
                    let value = int_value(fc)?;
                    match def.data_type.length {
                        2 => w.put(&(value as i16).to_le_bytes())?,
                        4 => w.put(&(value as i32).to_le_bytes())?,
                        n => {
                            return Err(Error::Internal(format!(
                                "enum field {} has length {n}",
                                def.name
                            )))
                        }
                    }
                }
                FieldKind::ResponseId => w.put(&(int_value(fc)? as i32).to_le_bytes())?,
                FieldKind::ResponseStr => w.put(text_value(fc)?.as_bytes())?,
                FieldKind::Simple | FieldKind::Bitfield => {
                    def.data_type.check_width()?;
                    Self::binary_scalar(w, fc)?;
                }
                FieldKind::Unknown => {
                    return Err(Error::Internal(format!(
                        "field {} has an unknown kind",
                        def.name
                    )))
                }
            }
        }
        Ok(())
    }

    fn binary_scalar(w: &mut Writer, fc: &FieldContainer) -> Result<()> {
        use DataTypeName::*;
        match fc.def.data_type.name {
            Bool => {
                let v = match fc.value {
                    FieldValue::Bool(b) => i32::from(b),
                    _ => i32::from(int_value(fc)? != 0),
                };
                w.put(&v.to_le_bytes())
            }
            Float => {
                let v = match fc.value {
                    FieldValue::F32(v) => v,
                    _ => float_value(fc)? as f32,
                };
                w.put(&v.to_le_bytes())
            }
            Double => w.put(&float_value(fc)?.to_le_bytes()),
            Hexbyte | Uchar | Char => w.put(&[int_value(fc)? as u8]),
            Short | Ushort => w.put(&(int_value(fc)? as u16).to_le_bytes()),
            Int | Uint | Long | Ulong | Satelliteid => w.put(&(int_value(fc)? as u32).to_le_bytes()),
            Longlong | Ulonglong => w.put(&(int_value(fc)? as u64).to_le_bytes()),
            Unknown => Err(Error::Internal(format!(
                "field {} has an unknown data type",
                fc.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::database::{Conversion, DataType, FieldDefinition};
    use crate::format::HeaderFormat;

    const DB: &str = r#"{
        "enums": [
            {"_id": "e-port", "name": "PortAddress", "enumerators": [
                {"name": "COM1", "value": 32, "description": null},
                {"name": "THISPORT", "value": 192, "description": null}
            ]},
            {"_id": "e-ts", "name": "GPSTimeStatus", "enumerators": [
                {"name": "FINESTEERING", "value": 180, "description": null}
            ]},
            {"_id": "e-sol", "name": "SolStatus", "enumerators": [
                {"name": "SOL_COMPUTED", "value": 0, "description": null}
            ]}
        ],
        "messages": [
            {"_id": "m-test", "messageID": 900, "name": "TESTMSG", "description": null,
             "latestMsgDefCrc": "1", "fields": {"1": []}}
        ]
    }"#;

    fn encoder() -> Encoder {
        Encoder::new(Arc::new(MessageDatabase::from_str(DB).unwrap()))
    }

    fn def(kind: FieldKind, name: DataTypeName, conv: &str) -> Arc<FieldDefinition> {
        Arc::new(
            FieldDefinition::builder()
                .name("f")
                .kind(kind)
                .data_type(DataType::new(name))
                .conversion(Conversion::parse(conv).ok())
                .array_length(4)
                .build(),
        )
    }

    fn scalar(name: DataTypeName, conv: &str, value: FieldValue) -> FieldContainer {
        FieldContainer::new(value, def(FieldKind::Simple, name, conv))
    }

    fn header() -> IntermediateHeader {
        IntermediateHeader {
            message_id: 900,
            port_address: 32,
            sequence: 3,
            idle_time: 167,
            time_status: 180,
            week: 2163,
            milliseconds: 329_760_000.0,
            receiver_status: 0x0240_0000,
            message_definition_crc: 1,
            receiver_sw_version: 65535,
            ..IntermediateHeader::default()
        }
    }

    fn meta(format: HeaderFormat) -> MetaData {
        MetaData {
            format,
            ..MetaData::default()
        }
    }

    fn encode(fields: &[FieldContainer], format: EncodeFormat) -> Vec<u8> {
        encoder()
            .encode_to_vec(&header(), fields, &meta(HeaderFormat::Ascii), format)
            .unwrap()
    }

    #[test_case(1.5e5, 3, "1.500e+05"; "positive exponent")]
    #[test_case(-2.25e-7, 2, "-2.25e-07"; "negative exponent")]
    #[test_case(0.0, 1, "0.0e+00"; "zero")]
    #[test_case(1e100, 0, "1e+100"; "three digit exponent")]
    fn scientific_is_c_style(v: f64, precision: usize, expected: &str) {
        assert_eq!(scientific(v, precision), expected);
    }

    #[test_case(12.5, 2, 3, "12.500"; "fits")]
    #[test_case(1234.5, 2, 3, "1.2345e+03"; "too large")]
    #[test_case(0.001, 2, 3, "1.000e-03"; "too small")]
    #[test_case(0.0, 2, 3, "0.000"; "zero")]
    #[test_case(7.25, 0, 0, "7.2"; "no digits")]
    fn compact_notation(v: f64, before: u32, after: u32, expected: &str) {
        assert_eq!(compact(v, before, after, f64::EPSILON), expected);
    }

    #[test]
    fn hex_masks_to_width() {
        assert_eq!(hex(-1, 2), "ff");
        assert_eq!(hex(0x2400000, 8), "02400000");
        assert_eq!(hex(i128::from(u64::MAX), 16), "ffffffffffffffff");
    }

    #[test]
    fn satellite_ids() {
        assert_eq!(satellite_id(12), "12");
        assert_eq!(satellite_id(3 | (4 << 16)), "3+4");
        assert_eq!(satellite_id(3 | (0xfff9 << 16)), "3-7");
    }

    #[test]
    fn printable_escapes() {
        assert_eq!(printable(i128::from(b'A')), "A");
        assert_eq!(printable(i128::from(b'\\')), "\\\\");
        assert_eq!(printable(7), "\\x07");
    }

    #[test]
    fn ascii_scalars() {
        let enc = encoder();
        let cases = [
            (scalar(DataTypeName::Double, "%.11lf", FieldValue::F64(51.15043874397)), "51.15043874397"),
            (scalar(DataTypeName::Float, "%.4f", FieldValue::F32(1.3648)), "1.3648"),
            (scalar(DataTypeName::Ulong, "%lx", FieldValue::U32(0x2a)), "0000002a"),
            (scalar(DataTypeName::Ushort, "%x", FieldValue::U16(0x2a)), "002a"),
            (scalar(DataTypeName::Hexbyte, "%x", FieldValue::U8(0x0b)), "0b"),
            (scalar(DataTypeName::Ulong, "%T", FieldValue::U32(604_800_000)), "604800.000"),
            (scalar(DataTypeName::Bool, "%d", FieldValue::Bool(true)), "TRUE"),
            (scalar(DataTypeName::Uchar, "%c", FieldValue::U8(b'Q')), "Q"),
            (scalar(DataTypeName::Uchar, "%ucb", FieldValue::U8(0x13)), "00010011"),
            (scalar(DataTypeName::Long, "%ld", FieldValue::I32(-42)), "-42"),
            (scalar(DataTypeName::Double, "%lf", FieldValue::F64(f64::NAN)), "nan"),
        ];
        for (fc, expected) in cases {
            assert_eq!(enc.ascii_scalar(&fc).unwrap(), expected, "{}", fc.def.letters());
        }
    }

    #[test]
    fn ascii_message() {
        let sol = Arc::new(
            FieldDefinition::builder()
                .name("sol")
                .kind(FieldKind::Enum)
                .data_type(DataType::new(DataTypeName::Int))
                .enum_def(encoder().db.get_enum_by_name("SolStatus"))
                .build(),
        );
        let fields = vec![
            FieldContainer::new(FieldValue::I32(0), sol),
            scalar(DataTypeName::Uchar, "%u", FieldValue::U8(18)),
        ];
        let out = encode(&fields, EncodeFormat::Ascii);
        let text = String::from_utf8(out).unwrap();
        let prefix = "#TESTMSGA,COM1,3,83.5,FINESTEERING,2163,329760.000,02400000,0001,65535;SOL_COMPUTED,18*";
        assert!(text.starts_with(prefix), "{text}");
        let crc = crc32(&prefix.as_bytes()[1..prefix.len() - 1]);
        assert_eq!(&text[prefix.len()..], format!("{crc:08x}\r\n"));
    }

    #[test]
    fn abbreviated_records_are_indented() {
        let child = def(FieldKind::Simple, DataTypeName::Ushort, "%hu");
        let records = Arc::new(
            FieldDefinition::builder()
                .name("obs")
                .kind(FieldKind::FieldArray)
                .array_length(4)
                .fields(vec![child.clone()])
                .build(),
        );
        let record = |v| {
            FieldContainer::new(
                FieldValue::Array(vec![FieldContainer::new(FieldValue::U16(v), child.clone())]),
                records.clone(),
            )
        };
        let fields = vec![
            FieldContainer::new(FieldValue::Array(vec![record(5), record(7)]), records.clone()),
            scalar(DataTypeName::Uchar, "%u", FieldValue::U8(1)),
        ];
        let out = encode(&fields, EncodeFormat::AbbrevAscii);
        let text = String::from_utf8(out).unwrap();
        let body = text.split_once("\r\n").unwrap().1;
        assert_eq!(body, "<     2 \r\n<          5 \r\n<          7 \r\n<     1\r\n");
    }

    #[test]
    fn binary_string_padding() {
        let string = def(FieldKind::String, DataTypeName::Char, "%s");
        let fields = vec![FieldContainer::new(FieldValue::String("WJ4HDW".into()), string)];
        let out = encode(&fields, EncodeFormat::Binary);
        assert_eq!(out[8], 8);
        assert_eq!(&out[28..36], b"WJ4HDW\0\0");
        assert_eq!(crc32(&out), 0);

        let four = vec![FieldContainer::new(
            FieldValue::String("ABCD".into()),
            def(FieldKind::String, DataTypeName::Char, "%s"),
        )];
        let out = encode(&four, EncodeFormat::Binary);
        assert_eq!(&out[28..36], b"ABCD\0\0\0\0");
    }

    #[test]
    fn flattened_arrays_are_zero_filled() {
        let array = def(FieldKind::VariableLengthArray, DataTypeName::Ushort, "%hu");
        let fields = vec![FieldContainer::new(
            FieldValue::Array(vec![FieldContainer::new(FieldValue::U16(9), array.clone())]),
            array,
        )];
        let out = encode(&fields, EncodeFormat::FlattenedBinary);
        assert_eq!(out[8], 4 + 4 * 2);
        assert_eq!(&out[28..40], &[1, 0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0]);

        let compact = encode(
            &[FieldContainer::new(
                FieldValue::Array(vec![FieldContainer::new(
                    FieldValue::U16(9),
                    def(FieldKind::VariableLengthArray, DataTypeName::Ushort, "%hu"),
                )]),
                def(FieldKind::VariableLengthArray, DataTypeName::Ushort, "%hu"),
            )],
            EncodeFormat::Binary,
        );
        assert_eq!(compact[8], 6);
    }

    #[test]
    fn short_binary_header() {
        let fields = vec![scalar(DataTypeName::Ulong, "%lu", FieldValue::U32(7))];
        let out = encoder()
            .encode_to_vec(&header(), &fields, &meta(HeaderFormat::ShortAscii), EncodeFormat::Binary)
            .unwrap();
        assert_eq!(&out[..4], &[0xAA, 0x44, 0x13, 4]);
        assert_eq!(out.len(), 12 + 4 + 4);
    }

    #[test]
    fn json_message() {
        let fields = vec![
            scalar(DataTypeName::Float, "%.1f", FieldValue::F32(44.5)),
            FieldContainer::new(
                FieldValue::String("a\"b".into()),
                def(FieldKind::String, DataTypeName::Char, "%s"),
            ),
        ];
        let out = encode(&fields, EncodeFormat::Json);
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["header"]["message"], "TESTMSG");
        assert_eq!(doc["header"]["port"], "COM1");
        assert_eq!(doc["body"]["f"], "a\"b");
    }

    #[test]
    fn json_rejects_non_finite() {
        let fields = vec![scalar(DataTypeName::Double, "%lf", FieldValue::F64(f64::INFINITY))];
        let err = encoder()
            .encode_to_vec(&header(), &fields, &meta(HeaderFormat::Ascii), EncodeFormat::Json)
            .unwrap_err();
        assert!(matches!(err, Error::Encode(_)), "{err}");
    }

    #[test]
    fn width_mismatch_is_internal() {
        let bad = Arc::new(
            FieldDefinition::builder()
                .name("bad")
                .kind(FieldKind::Simple)
                .data_type(DataType {
                    name: DataTypeName::Ulong,
                    length: 2,
                    description: String::new(),
                })
                .build(),
        );
        let fields = vec![FieldContainer::new(FieldValue::U16(1), bad)];
        let err = encoder()
            .encode_to_vec(&header(), &fields, &meta(HeaderFormat::Ascii), EncodeFormat::Binary)
            .unwrap_err();
        assert!(err.is_internal(), "{err}");
    }

    #[test]
    fn buffer_full_is_recoverable() {
        let fields = vec![scalar(DataTypeName::Ulong, "%lu", FieldValue::U32(7))];
        let mut small = [0u8; 16];
        let err = encoder()
            .encode(&header(), &fields, &meta(HeaderFormat::Ascii), EncodeFormat::Ascii, &mut small)
            .unwrap_err();
        assert!(err.is_buffer_full());

        let mut buf = [0u8; 256];
        let data = encoder()
            .encode(&header(), &fields, &meta(HeaderFormat::Ascii), EncodeFormat::Ascii, &mut buf)
            .unwrap();
        assert!(data.body(&buf).starts_with(b"7*"));
        assert!(data.body(&buf).ends_with(b"\r\n"));
        assert_eq!(data.header(&buf).last(), Some(&b';'));
        assert_eq!(data.message_length, data.header_length + data.body_length);
    }

    #[test]
    fn abbreviated_response() {
        let mut hdr = header();
        hdr.message_type = message_type_mask::RESPONSE;
        let resp = def(FieldKind::ResponseStr, DataTypeName::Char, "%s");
        let fields = vec![FieldContainer::new(FieldValue::String("OK".into()), resp)];
        let out = encoder()
            .encode_to_vec(&hdr, &fields, &meta(HeaderFormat::AbbAscii), EncodeFormat::AbbrevAscii)
            .unwrap();
        assert_eq!(out, b"<OK\r\n");
    }
}
