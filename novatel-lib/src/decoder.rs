//! Message body decoding.
//!
//! [MessageDecoder] walks the field list of a message definition and reads the body of a framed
//! message into a `Vec<FieldContainer>`, the format independent representation the
//! [crate::Encoder] writes back out.
//!
//! Text numerics are strict: integer fields only accept an optionally signed integer (with an
//! optional `0x` prefix for hex conversions) and wrap to the width of the field, so `-1` in an
//! unsigned 8-bit field decodes as 255. Float fields accept fixed and scientific notation and
//! overflow to infinity.
use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use crate::database::{
    DataType, DataTypeName, EnumDefinition, FieldDefinition, FieldKind, MessageDatabase,
};
use crate::field::{FieldContainer, FieldValue, ValueKind};
use crate::format::{HeaderFormat, ABBREV_ASCII_ERROR_PREFIX, ABBREV_ASCII_OK};
use crate::{Error, MetaData, Result};

fn malformed(field: &FieldDefinition, msg: impl std::fmt::Display) -> Error {
    Error::MessageDecode(format!("field {}: {msg}", field.name))
}

/// Parse an optionally signed integer. `0x` is accepted for base 16.
fn parse_int(token: &str, radix: u32) -> Option<i128> {
    let (neg, digits) = match token.as_bytes().first()? {
        b'-' => (true, &token[1..]),
        b'+' => (false, &token[1..]),
        _ => (false, token),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let v = i128::from_str_radix(digits, radix).ok()?;
    Some(if neg { -v } else { v })
}

/// Satellite id of the form `sv`, `sv+channel` or `sv-channel`. The slot is the low 16 bits and
/// the signed channel the high 16 bits.
fn parse_satellite_id(token: &str) -> Option<u32> {
    let split = token
        .rfind('+')
        .or_else(|| token.rfind('-'))
        .filter(|idx| *idx > 0);
    let (slot, channel) = match split {
        Some(idx) => (&token[..idx], parse_int(&token[idx..], 10)?),
        None => (token, 0),
    };
    let slot = u16::try_from(parse_int(slot, 10)?).ok()?;
    let channel = i16::try_from(channel).ok()?;
    Some(u32::from(slot) | (u32::from(channel as u16) << 16))
}

/// Value of an 8 character binary string such as `00010011`.
fn parse_bits(token: &str) -> Option<i128> {
    if token.is_empty() || token.len() > 8 || !token.bytes().all(|b| b == b'0' || b == b'1') {
        return None;
    }
    i128::from_str_radix(token, 2).ok()
}

fn is_hex_conversion(def: &FieldDefinition) -> bool {
    def.data_type.name == DataTypeName::Hexbyte
        || matches!(def.letters(), "x" | "X" | "lx" | "llx" | "XB")
}

fn hex_pair(field: &FieldDefinition, cur: &Cursor, at: usize) -> Result<i128> {
    let pair = std::str::from_utf8(cur.bytes(at, 2)).unwrap_or("");
    if pair.len() != 2 {
        return Err(malformed(field, "truncated hex value"));
    }
    parse_int(pair, 16).ok_or_else(|| malformed(field, format!("invalid hex {pair:?}")))
}

/// Delimiters for one of the two text body styles.
#[derive(Debug, Clone, Copy)]
struct Style {
    abbreviated: bool,
    separator: u8,
    terminator: u8,
}

impl Style {
    const ASCII: Style = Style {
        abbreviated: false,
        separator: b',',
        terminator: b'*',
    };
    const ABBREVIATED: Style = Style {
        abbreviated: true,
        separator: b' ',
        terminator: b'\r',
    };

    fn token_stops(&self) -> &'static [u8] {
        if self.abbreviated {
            b" \r\n"
        } else {
            b",*"
        }
    }

    fn field_stops(&self) -> [u8; 2] {
        [self.separator, self.terminator]
    }
}

/// Read position in a text body.
struct Cursor<'a> {
    dat: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.dat.len()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.dat.get(self.pos + offset).copied()
    }

    fn rest(&self, offset: usize) -> &'a [u8] {
        self.dat.get(self.pos + offset..).unwrap_or(&[])
    }

    /// Bytes from `offset` up to the first byte in `stops` or the end of the body.
    fn span(&self, offset: usize, stops: &[u8]) -> usize {
        let rest = self.rest(offset);
        rest.iter().position(|b| stops.contains(b)).unwrap_or(rest.len())
    }

    fn bytes(&self, offset: usize, len: usize) -> &'a [u8] {
        let rest = self.rest(offset);
        &rest[..len.min(rest.len())]
    }

    fn text(&self, offset: usize, len: usize) -> String {
        String::from_utf8_lossy(self.bytes(offset, len)).into_owned()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    /// Skip the `\r\n<` and indentation that start abbreviated continuation lines. Returns true
    /// if anything was skipped.
    fn skip_abbrev_formatting(&mut self, token_len: usize) -> bool {
        if token_len > 1 || !matches!(self.peek(0), Some(b'\r' | b'\n' | b'<')) {
            return false;
        }
        let mut continuation = false;
        while let Some(b) = self.peek(0) {
            match b {
                b'\r' | b'\n' => self.advance(1),
                b'<' => {
                    continuation = true;
                    self.advance(1);
                }
                b' ' if continuation => self.advance(1),
                _ => break,
            }
        }
        continuation
    }
}

/// Little-endian reader over a binary body.
struct BinaryReader<'a> {
    dat: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let bytes = self.dat.get(self.pos..end).ok_or_else(|| {
            Error::MessageDecode(format!(
                "binary body too short: need {end} bytes, have {}",
                self.dat.len()
            ))
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn scalar(&mut self, def: &FieldDefinition) -> Result<FieldValue> {
        use DataTypeName::*;
        Ok(match def.data_type.name {
            Bool => FieldValue::Bool(self.u32()? != 0),
            Hexbyte | Uchar => FieldValue::U8(self.array::<1>()?[0]),
            Char => FieldValue::I8(i8::from_le_bytes(self.array()?)),
            Ushort => FieldValue::U16(u16::from_le_bytes(self.array()?)),
            Short => FieldValue::I16(i16::from_le_bytes(self.array()?)),
            Uint | Ulong | Satelliteid => FieldValue::U32(self.u32()?),
            Int | Long => FieldValue::I32(self.i32()?),
            Ulonglong => FieldValue::U64(u64::from_le_bytes(self.array()?)),
            Longlong => FieldValue::I64(i64::from_le_bytes(self.array()?)),
            Float => FieldValue::F32(f32::from_le_bytes(self.array()?)),
            Double => FieldValue::F64(f64::from_le_bytes(self.array()?)),
            Unknown => {
                return Err(Error::Internal(format!(
                    "field {} has an unknown data type",
                    def.name
                )))
            }
        })
    }
}

/// Decodes message bodies in every supported format.
#[derive(Debug, Clone)]
pub struct MessageDecoder {
    db: Arc<MessageDatabase>,
    responses: Option<Arc<EnumDefinition>>,
    response_fields: Vec<Arc<FieldDefinition>>,
}

impl MessageDecoder {
    #[must_use]
    pub fn new(db: Arc<MessageDatabase>) -> Self {
        let mut decoder = Self {
            db: db.clone(),
            responses: None,
            response_fields: Vec::new(),
        };
        decoder.load_db(db);
        decoder
    }

    /// Replace the database used to resolve message layouts.
    pub fn load_db(&mut self, db: Arc<MessageDatabase>) {
        self.responses = db.get_enum_by_name("Responses");
        self.response_fields = vec![
            Arc::new(
                FieldDefinition::builder()
                    .name("response_id")
                    .kind(FieldKind::ResponseId)
                    .description("Response as numerical id")
                    .data_type(DataType::new(DataTypeName::Uint))
                    .enum_id(self.responses.as_ref().map(|e| e.id.clone()))
                    .enum_def(self.responses.clone())
                    .build(),
            ),
            Arc::new(
                FieldDefinition::builder()
                    .name("response_str")
                    .kind(FieldKind::ResponseStr)
                    .description("Response as a string")
                    .data_type(DataType::new(DataTypeName::Char))
                    .build(),
            ),
        ];
        self.db = db;
    }

    #[must_use]
    pub fn database(&self) -> &Arc<MessageDatabase> {
        &self.db
    }

    /// Field layout used for command responses.
    #[must_use]
    pub fn response_fields(&self) -> &[Arc<FieldDefinition>] {
        &self.response_fields
    }

    /// Decode a message body.
    ///
    /// `body` starts at `meta.header_length` in the frame. JSON frames have no separate header,
    /// so for them `body` is the whole frame. Responses use a fixed two field layout,
    /// `response_id` and `response_str`, in every format but abbreviated ASCII, which has no
    /// response body.
    ///
    /// # Errors
    /// [Error::NoDefinition] if the message is not in the database or is an abbreviated
    /// response, [Error::MessageDecode] if the body does not match the definition and
    /// [Error::Internal] if the definition itself is inconsistent.
    pub fn decode(&self, body: &[u8], meta: &MetaData) -> Result<Vec<FieldContainer>> {
        let msg_def;
        let fields: &[Arc<FieldDefinition>] = if meta.response {
            match meta.format {
                HeaderFormat::Binary
                | HeaderFormat::ShortBinary
                | HeaderFormat::Ascii
                | HeaderFormat::ShortAscii
                | HeaderFormat::ShortAbbAscii => &self.response_fields,
                _ => {
                    return Err(Error::NoDefinition(format!(
                        "{} response {}",
                        meta.format, meta.message_id
                    )))
                }
            }
        } else {
            msg_def = self.db.get_msg_def(meta.message_id).ok_or_else(|| {
                warn!(message_id = meta.message_id, "no definition for message");
                Error::NoDefinition(meta.message_id.to_string())
            })?;
            msg_def.fields_for_crc(meta.message_crc)
        };

        trace!(format = %meta.format, message_id = meta.message_id, fields = fields.len(), "decoding body");
        match meta.format {
            HeaderFormat::Ascii | HeaderFormat::ShortAscii => self.decode_ascii(fields, body, false),
            HeaderFormat::AbbAscii | HeaderFormat::ShortAbbAscii => {
                self.decode_ascii(fields, body, true)
            }
            HeaderFormat::Binary | HeaderFormat::ShortBinary => {
                let length = meta.binary_msg_length as usize;
                let body = body.get(..length).ok_or_else(|| {
                    Error::MessageDecode(format!(
                        "binary body is {} bytes, header declares {length}",
                        body.len()
                    ))
                })?;
                self.decode_binary(fields, body)
            }
            HeaderFormat::Json => self.decode_json(fields, body),
            other => Err(Error::Unsupported(format!("no message decoder for {other}"))),
        }
    }

    /// Decode a binary body of exactly the declared message length.
    ///
    /// # Errors
    /// See [MessageDecoder::decode].
    pub fn decode_binary(
        &self,
        fields: &[Arc<FieldDefinition>],
        body: &[u8],
    ) -> Result<Vec<FieldContainer>> {
        let mut reader = BinaryReader { dat: body, pos: 0 };
        let mut out = Vec::with_capacity(fields.len());
        Self::binary_fields(fields, &mut reader, body.len(), &mut out)?;
        Ok(out)
    }

    fn binary_fields(
        fields: &[Arc<FieldDefinition>],
        reader: &mut BinaryReader,
        limit: usize,
        out: &mut Vec<FieldContainer>,
    ) -> Result<()> {
        let start = reader.pos;
        for field in fields {
            let align = usize::from(field.data_type.length.min(4));
            if align > 1 {
                let rem = (reader.pos - start) % align;
                if rem != 0 {
                    reader.pos += align - rem;
                }
            }

            let value = match field.kind {
                FieldKind::Simple | FieldKind::Bitfield => {
                    field.data_type.check_width()?;
                    reader.scalar(field)?
                }
                FieldKind::Enum => match field.data_type.length {
                    2 => FieldValue::I32(i32::from(i16::from_le_bytes(reader.array()?))),
                    4 => FieldValue::I32(reader.i32()?),
                    n => {
                        return Err(Error::Internal(format!(
                            "enum field {} has length {n}",
                            field.name
                        )))
                    }
                },
                FieldKind::ResponseId => FieldValue::I32(reader.i32()?),
                FieldKind::ResponseStr => {
                    let len = limit.saturating_sub(reader.pos - start);
                    FieldValue::String(String::from_utf8_lossy(reader.take(len)?).into_owned())
                }
                FieldKind::FixedLengthArray | FieldKind::VariableLengthArray => {
                    field.data_type.check_width()?;
                    let count = if field.kind == FieldKind::FixedLengthArray {
                        field.array_length
                    } else {
                        let count = reader.u32()?;
                        if count > field.array_length {
                            return Err(malformed(
                                field,
                                format!("{count} elements exceeds maximum {}", field.array_length),
                            ));
                        }
                        count
                    };
                    let mut items = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        items.push(FieldContainer::new(reader.scalar(field)?, field.clone()));
                    }
                    FieldValue::Array(items)
                }
                FieldKind::String => {
                    let rest = &reader.dat[reader.pos.min(reader.dat.len())..];
                    let len = rest.iter().position(|b| *b == 0).ok_or_else(|| {
                        malformed(field, "string is not NUL terminated")
                    })?;
                    let text = String::from_utf8_lossy(&rest[..len]).into_owned();
                    reader.pos += len + 1;
                    FieldValue::String(text)
                }
                FieldKind::FieldArray => {
                    let count = reader.u32()?;
                    if count > field.array_length {
                        return Err(malformed(
                            field,
                            format!("{count} records exceeds maximum {}", field.array_length),
                        ));
                    }
                    let mut records = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let remaining = limit.saturating_sub(reader.pos - start);
                        let mut record = Vec::with_capacity(field.fields.len());
                        Self::binary_fields(&field.fields, reader, remaining, &mut record)?;
                        records.push(FieldContainer::new(FieldValue::Array(record), field.clone()));
                    }
                    FieldValue::Array(records)
                }
                FieldKind::Unknown => {
                    return Err(Error::Internal(format!(
                        "field {} has an unknown kind",
                        field.name
                    )))
                }
            };
            out.push(FieldContainer::new(value, field.clone()));

            if reader.pos - start >= limit {
                break;
            }
        }
        Ok(())
    }

    /// Decode an ASCII (`abbreviated == false`) or abbreviated ASCII body.
    ///
    /// An ASCII body may end early: decoding stops at the field followed by `*`. An abbreviated
    /// body must hold every field.
    ///
    /// # Errors
    /// See [MessageDecoder::decode]. Running out of input is [Error::MalformedInput].
    pub fn decode_ascii(
        &self,
        fields: &[Arc<FieldDefinition>],
        body: &[u8],
        abbreviated: bool,
    ) -> Result<Vec<FieldContainer>> {
        let style = if abbreviated {
            Style::ABBREVIATED
        } else {
            Style::ASCII
        };
        let mut cur = Cursor { dat: body, pos: 0 };
        let mut out = Vec::with_capacity(fields.len());
        self.ascii_fields(fields, &mut cur, style, &mut out)?;
        Ok(out)
    }

    fn ascii_fields(
        &self,
        fields: &[Arc<FieldDefinition>],
        cur: &mut Cursor,
        style: Style,
        out: &mut Vec<FieldContainer>,
    ) -> Result<()> {
        let stops = style.token_stops();
        let field_stops = style.field_stops();

        for field in fields {
            if cur.at_end() {
                return Err(Error::MalformedInput(format!(
                    "message ended before field {}",
                    field.name
                )));
            }

            let mut len = cur.span(0, stops);
            if style.abbreviated {
                if cur.skip_abbrev_formatting(len) {
                    len = cur.span(0, stops);
                }
                if len == 0 {
                    return Err(Error::MalformedInput(format!(
                        "empty token for field {}",
                        field.name
                    )));
                }
            }
            let mut early_end = cur.peek(len) == Some(style.terminator);

            let value = match field.kind {
                FieldKind::Simple | FieldKind::Bitfield => {
                    let token = cur.text(0, len);
                    cur.advance(len + 1);
                    self.text_scalar(field, &token)?
                }
                FieldKind::Enum => {
                    let token = cur.text(0, len);
                    cur.advance(len + 1);
                    FieldValue::I32(Self::enum_value(field, &token)?)
                }
                FieldKind::String => match cur.peek(0) {
                    Some(b',' | b'*') => {
                        cur.advance(1);
                        FieldValue::String(String::new())
                    }
                    Some(b'"') => {
                        let len = cur.span(1, &[b'"', style.terminator]);
                        let text = cur.text(1, len);
                        let close = 1 + len;
                        let skip = cur.span(close, &field_stops);
                        cur.advance(close + skip + 1);
                        FieldValue::String(text)
                    }
                    _ => {
                        let len = cur.span(0, &field_stops);
                        let text = cur.text(0, len);
                        cur.advance(len + 1);
                        FieldValue::String(text)
                    }
                },
                FieldKind::ResponseId => {
                    let len = cur.span(0, &[style.terminator]);
                    let response = cur.text(0, len);
                    // The same text is read again as the response string.
                    early_end = false;
                    FieldValue::I32(self.response_id(&response))
                }
                FieldKind::ResponseStr => {
                    let len = cur.span(0, &[style.terminator]);
                    let text = cur.text(0, len);
                    cur.advance(len + 1);
                    FieldValue::String(text)
                }
                FieldKind::FixedLengthArray | FieldKind::VariableLengthArray => {
                    self.text_array(field, cur, style, len)?
                }
                FieldKind::FieldArray => {
                    let token = cur.text(0, len);
                    let count = parse_int(&token, 10)
                        .and_then(|c| u32::try_from(c).ok())
                        .ok_or_else(|| malformed(field, format!("invalid record count {token:?}")))?;
                    cur.advance(len + 1);
                    if count > field.array_length {
                        return Err(malformed(
                            field,
                            format!("{count} records exceeds maximum {}", field.array_length),
                        ));
                    }
                    let mut records = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let mut record = Vec::with_capacity(field.fields.len());
                        self.ascii_fields(&field.fields, cur, style, &mut record)?;
                        records.push(FieldContainer::new(FieldValue::Array(record), field.clone()));
                    }
                    FieldValue::Array(records)
                }
                FieldKind::Unknown => {
                    return Err(Error::Internal(format!(
                        "field {} has an unknown kind",
                        field.name
                    )))
                }
            };
            out.push(FieldContainer::new(value, field.clone()));

            if !style.abbreviated && early_end {
                break;
            }
        }
        Ok(())
    }

    fn text_array(
        &self,
        field: &Arc<FieldDefinition>,
        cur: &mut Cursor,
        style: Style,
        mut len: usize,
    ) -> Result<FieldValue> {
        let field_stops = style.field_stops();
        let kind = ValueKind::of(field)?;

        let count = if field.kind == FieldKind::FixedLengthArray {
            field.array_length
        } else {
            let token = cur.text(0, len);
            let count = parse_int(&token, 10)
                .and_then(|c| u32::try_from(c).ok())
                .ok_or_else(|| malformed(field, format!("invalid element count {token:?}")))?;
            if count > field.array_length {
                return Err(malformed(
                    field,
                    format!("{count} elements exceeds maximum {}", field.array_length),
                ));
            }
            cur.advance(len + 1);
            len = cur.span(0, &field_stops);
            count
        };

        let is_string = field.is_string();
        let is_csv = field.is_csv();
        let hex_pairs = field.letters() == "Z";

        let mut p = 0;
        if is_string {
            if cur.peek(0) != Some(b'"') {
                return Err(malformed(field, "string array is not quoted"));
            }
            len = cur.span(1, &[b'"', style.terminator]) + 2;
            p = 1;
        }

        let mut items = Vec::with_capacity(count as usize);

        for i in 0..count {
            if is_csv {
                let len = cur.span(0, &field_stops);
                let token = cur.text(0, len);
                cur.advance(len + 1);
                items.push(FieldContainer::new(self.text_scalar(field, &token)?, field.clone()));
                continue;
            }

            let value = if hex_pairs {
                let v = hex_pair(field, cur, p)?;
                p += 2;
                v
            } else if is_string && cur.peek(p) == Some(b'"') {
                for _ in i..count {
                    items.push(FieldContainer::new(kind.wrap(0), field.clone()));
                }
                break;
            } else if cur.rest(p).starts_with(b"\\\\") {
                p += 2;
                i128::from(b'\\')
            } else if cur.rest(p).starts_with(b"\\x") {
                let v = hex_pair(field, cur, p + 2)?;
                p += 4;
                v
            } else {
                let b = cur
                    .peek(p)
                    .ok_or_else(|| malformed(field, "array ended early"))?;
                p += 1;
                i128::from(b)
            };
            items.push(FieldContainer::new(kind.wrap(value), field.clone()));
        }

        if !is_csv {
            cur.advance(len + 1);
        }
        Ok(FieldValue::Array(items))
    }

    /// Scalar from an ASCII or abbreviated ASCII token.
    fn text_scalar(&self, field: &FieldDefinition, token: &str) -> Result<FieldValue> {
        let kind = ValueKind::of(field)?;
        let invalid = || malformed(field, format!("invalid value {token:?}"));

        match field.letters() {
            "T" => {
                let seconds: f64 = token.parse().map_err(|_| invalid())?;
                return Ok(Self::gps_milliseconds(kind, seconds));
            }
            "m" => return Ok(kind.wrap(i128::from(self.db.msg_name_to_msg_id(token)))),
            "id" => {
                let id = parse_satellite_id(token).ok_or_else(invalid)?;
                return Ok(kind.wrap(i128::from(id)));
            }
            "c" | "uc" => {
                let b = token.bytes().next().ok_or_else(invalid)?;
                return Ok(kind.wrap(i128::from(b)));
            }
            "ucb" => return Ok(kind.wrap(parse_bits(token).ok_or_else(invalid)?)),
            _ => {}
        }

        match kind {
            ValueKind::Bool => match token {
                "TRUE" => Ok(FieldValue::Bool(true)),
                "FALSE" => Ok(FieldValue::Bool(false)),
                _ => Err(invalid()),
            },
            ValueKind::F32 => token.parse().map(FieldValue::F32).map_err(|_| invalid()),
            ValueKind::F64 => token.parse().map(FieldValue::F64).map_err(|_| invalid()),
            _ => {
                let radix = if is_hex_conversion(field) { 16 } else { 10 };
                parse_int(token, radix).map(|v| kind.wrap(v)).ok_or_else(invalid)
            }
        }
    }

    /// Milliseconds of a seconds value, rounded and wrapped to the width of the field.
    fn gps_milliseconds(kind: ValueKind, seconds: f64) -> FieldValue {
        let ms = (seconds * 1000.0).round();
        if kind.is_float() {
            kind.from_f64(ms)
        } else {
            kind.wrap(i128::from(ms as i64))
        }
    }

    fn enum_value(field: &FieldDefinition, token: &str) -> Result<i32> {
        let def = field
            .enum_def
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("enum field {} is not linked", field.name)))?;
        def.value_of(token)
            .or_else(|| parse_int(token, 10).and_then(|v| i32::try_from(v).ok()))
            .ok_or_else(|| malformed(field, format!("{token:?} is not a {} value", def.name)))
    }

    fn response_id(&self, response: &str) -> i32 {
        if response == ABBREV_ASCII_OK {
            return 1;
        }
        let description = response
            .strip_prefix(ABBREV_ASCII_ERROR_PREFIX)
            .unwrap_or(response);
        self.responses
            .as_ref()
            .and_then(|e| e.value_of_description(description))
            .unwrap_or(0)
    }

    /// Decode the `body` object of a JSON frame.
    ///
    /// # Errors
    /// See [MessageDecoder::decode].
    pub fn decode_json(
        &self,
        fields: &[Arc<FieldDefinition>],
        frame: &[u8],
    ) -> Result<Vec<FieldContainer>> {
        let doc: Value = serde_json::from_slice(frame)
            .map_err(|e| Error::MessageDecode(format!("invalid JSON message: {e}")))?;
        let body = doc
            .get("body")
            .ok_or_else(|| Error::MessageDecode("JSON message has no body".to_string()))?;
        let mut out = Vec::with_capacity(fields.len());
        self.json_fields(fields, body, &mut out)?;
        Ok(out)
    }

    fn json_fields(
        &self,
        fields: &[Arc<FieldDefinition>],
        obj: &Value,
        out: &mut Vec<FieldContainer>,
    ) -> Result<()> {
        for field in fields {
            let v = obj
                .get(&field.name)
                .ok_or_else(|| malformed(field, "missing from JSON body"))?;
            let invalid = || malformed(field, format!("invalid value {v}"));

            let value = match field.kind {
                FieldKind::Simple | FieldKind::Bitfield => self.json_scalar(field, v)?,
                FieldKind::Enum => match v {
                    Value::String(name) => FieldValue::I32(Self::enum_value(field, name)?),
                    _ => FieldValue::I32(
                        v.as_i64().and_then(|n| i32::try_from(n).ok()).ok_or_else(invalid)?,
                    ),
                },
                FieldKind::String | FieldKind::ResponseStr => {
                    FieldValue::String(v.as_str().ok_or_else(invalid)?.to_string())
                }
                FieldKind::ResponseId => match v {
                    Value::String(s) => FieldValue::I32(self.response_id(s)),
                    _ => FieldValue::I32(
                        v.as_i64().and_then(|n| i32::try_from(n).ok()).ok_or_else(invalid)?,
                    ),
                },
                FieldKind::FixedLengthArray | FieldKind::VariableLengthArray => {
                    let items = if field.is_string() {
                        let kind = ValueKind::of(field)?;
                        v.as_str()
                            .ok_or_else(invalid)?
                            .bytes()
                            .map(|b| FieldContainer::new(kind.wrap(i128::from(b)), field.clone()))
                            .collect()
                    } else {
                        v.as_array()
                            .ok_or_else(invalid)?
                            .iter()
                            .map(|e| {
                                self.json_scalar(field, e)
                                    .map(|value| FieldContainer::new(value, field.clone()))
                            })
                            .collect::<Result<Vec<_>>>()?
                    };
                    if items.len() > field.array_length as usize {
                        return Err(malformed(
                            field,
                            format!("{} elements exceeds maximum {}", items.len(), field.array_length),
                        ));
                    }
                    FieldValue::Array(items)
                }
                FieldKind::FieldArray => {
                    let records = v.as_array().ok_or_else(invalid)?;
                    if records.len() > field.array_length as usize {
                        return Err(malformed(
                            field,
                            format!("{} records exceeds maximum {}", records.len(), field.array_length),
                        ));
                    }
                    let mut items = Vec::with_capacity(records.len());
                    for record in records {
                        let mut sub = Vec::with_capacity(field.fields.len());
                        self.json_fields(&field.fields, record, &mut sub)?;
                        items.push(FieldContainer::new(FieldValue::Array(sub), field.clone()));
                    }
                    FieldValue::Array(items)
                }
                FieldKind::Unknown => {
                    return Err(Error::Internal(format!(
                        "field {} has an unknown kind",
                        field.name
                    )))
                }
            };
            out.push(FieldContainer::new(value, field.clone()));
        }
        Ok(())
    }

    fn json_scalar(&self, field: &FieldDefinition, v: &Value) -> Result<FieldValue> {
        let kind = ValueKind::of(field)?;
        let invalid = || malformed(field, format!("invalid value {v}"));

        match (field.letters(), v) {
            ("T", _) => {
                let seconds = v.as_f64().ok_or_else(invalid)?;
                return Ok(Self::gps_milliseconds(kind, seconds));
            }
            ("m", Value::String(name)) => {
                return Ok(kind.wrap(i128::from(self.db.msg_name_to_msg_id(name))))
            }
            ("id", Value::String(s)) => {
                let id = parse_satellite_id(s).ok_or_else(invalid)?;
                return Ok(kind.wrap(i128::from(id)));
            }
            ("c" | "uc", Value::String(s)) => {
                let b = s.bytes().next().ok_or_else(invalid)?;
                return Ok(kind.wrap(i128::from(b)));
            }
            ("ucb", Value::String(s)) => return Ok(kind.wrap(parse_bits(s).ok_or_else(invalid)?)),
            _ => {}
        }

        match kind {
            ValueKind::Bool => v.as_bool().map(FieldValue::Bool).ok_or_else(invalid),
            ValueKind::F32 | ValueKind::F64 => {
                v.as_f64().map(|f| kind.from_f64(f)).ok_or_else(invalid)
            }
            _ => v
                .as_i64()
                .map(i128::from)
                .or_else(|| v.as_u64().map(i128::from))
                .map(|n| kind.wrap(n))
                .ok_or_else(invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::database::{Conversion, DataType};

    const DB: &str = r#"{
        "enums": [
            {"_id": "e-sol", "name": "SolStatus", "enumerators": [
                {"name": "SOL_COMPUTED", "value": 0, "description": null},
                {"name": "INSUFFICIENT_OBS", "value": 1, "description": null}
            ]},
            {"_id": "e-pos", "name": "PosType", "enumerators": [
                {"name": "NONE", "value": 0, "description": null},
                {"name": "SINGLE", "value": 16, "description": null}
            ]},
            {"_id": "e-resp", "name": "Responses", "enumerators": [
                {"name": "OK", "value": 1, "description": "OK"},
                {"name": "INVALID_MESSAGE_ID", "value": 31, "description": "Invalid message ID"}
            ]}
        ],
        "messages": [
            {"_id": "m-pos", "messageID": 900, "name": "TESTPOS", "description": null,
             "latestMsgDefCrc": "1", "fields": {"1": [
                {"name": "sol", "type": "ENUM", "enumID": "e-sol",
                 "dataType": {"name": "INT", "length": 4}},
                {"name": "pos", "type": "ENUM", "enumID": "e-pos",
                 "dataType": {"name": "INT", "length": 4}},
                {"name": "lat", "type": "SIMPLE", "conversionString": "%.3lf",
                 "dataType": {"name": "DOUBLE", "length": 8}},
                {"name": "base", "type": "FIXED_LENGTH_ARRAY", "conversionString": "%s",
                 "arrayLength": 4, "dataType": {"name": "CHAR", "length": 1}},
                {"name": "svs", "type": "SIMPLE", "conversionString": "%u",
                 "dataType": {"name": "UCHAR", "length": 1}},
                {"name": "mask", "type": "SIMPLE", "conversionString": "%x",
                 "dataType": {"name": "HEXBYTE", "length": 1}}
             ]}},
            {"_id": "m-arr", "messageID": 901, "name": "TESTARR", "description": null,
             "latestMsgDefCrc": "2", "fields": {"2": [
                {"name": "vals", "type": "VARIABLE_LENGTH_ARRAY", "conversionString": "%hu",
                 "arrayLength": 3, "dataType": {"name": "USHORT", "length": 2}},
                {"name": "obs", "type": "FIELD_ARRAY", "arrayLength": 2, "fields": [
                    {"name": "prn", "type": "SIMPLE", "conversionString": "%hu",
                     "dataType": {"name": "USHORT", "length": 2}},
                    {"name": "cno", "type": "SIMPLE", "conversionString": "%.1f",
                     "dataType": {"name": "FLOAT", "length": 4}}
                ]},
                {"name": "label", "type": "STRING", "arrayLength": 8, "conversionString": "%s",
                 "dataType": {"name": "CHAR", "length": 1}}
             ]}}
        ]
    }"#;

    fn decoder() -> MessageDecoder {
        MessageDecoder::new(Arc::new(MessageDatabase::from_str(DB).unwrap()))
    }

    fn meta(format: HeaderFormat, id: u16, crc: u32) -> MetaData {
        MetaData {
            format,
            message_id: id,
            message_crc: crc,
            ..MetaData::default()
        }
    }

    fn simple(name: DataTypeName, length: u16, conv: &str) -> Arc<FieldDefinition> {
        Arc::new(
            FieldDefinition::builder()
                .name("f")
                .kind(FieldKind::Simple)
                .data_type(DataType {
                    name,
                    length,
                    description: String::new(),
                })
                .conversion(Some(Conversion::parse(conv).unwrap()))
                .build(),
        )
    }

    fn decode_one(def: Arc<FieldDefinition>, token: &str) -> Result<FieldValue> {
        let body = format!("{token}*00000000\r\n");
        let mut fields = decoder().decode_ascii(&[def], body.as_bytes(), false)?;
        Ok(fields.remove(0).value)
    }

    #[test]
    fn ascii_body() {
        let body = b"SOL_COMPUTED,SINGLE,51.150,\"131\",18,0b*12345678\r\n";
        let fields = decoder().decode(body, &meta(HeaderFormat::Ascii, 900, 1)).unwrap();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0].value, FieldValue::I32(0));
        assert_eq!(fields[1].value, FieldValue::I32(16));
        assert_eq!(fields[2].value, FieldValue::F64(51.15));
        assert_eq!(fields[3].as_text().as_deref(), Some("131"));
        assert_eq!(fields[3].children().len(), 4);
        assert_eq!(fields[4].value, FieldValue::U8(18));
        assert_eq!(fields[5].value, FieldValue::U8(0x0b));
    }

    #[test]
    fn ascii_empty_string_array_is_padded() {
        let body = b"SOL_COMPUTED,SINGLE,51.150,\"\",18,0b*12345678\r\n";
        let fields = decoder().decode(body, &meta(HeaderFormat::Ascii, 900, 1)).unwrap();
        assert_eq!(fields[3].children().len(), 4);
        assert_eq!(fields[3].as_text().as_deref(), Some(""));
        assert_eq!(fields[4].value, FieldValue::U8(18));
    }

    #[test]
    fn ascii_unknown_enum_name() {
        let body = b"SOL_BOGUS,SINGLE,51.150,\"\",18,0b*12345678\r\n";
        let err = decoder().decode(body, &meta(HeaderFormat::Ascii, 900, 1)).unwrap_err();
        assert!(matches!(err, Error::MessageDecode(_)), "{err}");
    }

    #[test]
    fn abbreviated_body_with_records() {
        let body = b"<     2 10 20 2 \r\n<          5 41.5 \r\n<          7 39.0 \r\n<     \"hi\"\r\n";
        let fields = decoder()
            .decode(body, &meta(HeaderFormat::AbbAscii, 901, 2))
            .unwrap();
        assert_eq!(fields.len(), 3);
        let vals: Vec<_> = fields[0].children().iter().map(|c| c.value.clone()).collect();
        assert_eq!(vals, vec![FieldValue::U16(10), FieldValue::U16(20)]);
        let records = fields[1].children();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].children()[0].value, FieldValue::U16(7));
        assert_eq!(records[1].children()[1].value, FieldValue::F32(39.0));
        assert_eq!(fields[2].value, FieldValue::String("hi".to_string()));
    }

    #[test]
    fn abbreviated_body_missing_fields() {
        let body = b"<     1 10 0\r\n";
        let err = decoder()
            .decode(body, &meta(HeaderFormat::AbbAscii, 901, 2))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)), "{err}");
    }

    #[test]
    fn array_count_over_maximum() {
        let body = b"4,1,2,3,4,0,\"\"*00000000\r\n";
        let err = decoder().decode(body, &meta(HeaderFormat::Ascii, 901, 2)).unwrap_err();
        assert!(matches!(err, Error::MessageDecode(_)), "{err}");
    }

    #[test]
    fn binary_body() {
        let mut body = Vec::new();
        body.extend(0i32.to_le_bytes());
        body.extend(16i32.to_le_bytes());
        body.extend(51.15f64.to_le_bytes());
        body.extend(b"131\0");
        body.push(18);
        body.push(0x0b);
        let mut m = meta(HeaderFormat::Binary, 900, 1);
        m.binary_msg_length = body.len() as u32;
        body.extend([0xde, 0xad, 0xbe, 0xef]);

        let fields = decoder().decode(&body, &m).unwrap();
        assert_eq!(fields[1].value, FieldValue::I32(16));
        assert_eq!(fields[2].value, FieldValue::F64(51.15));
        assert_eq!(fields[3].as_text().as_deref(), Some("131"));
        assert_eq!(fields[5].value, FieldValue::U8(0x0b));
    }

    #[test]
    fn binary_records_and_string() {
        let mut body = Vec::new();
        body.extend(1u32.to_le_bytes());
        body.extend(10u16.to_le_bytes());
        body.extend(1u32.to_le_bytes());
        body.extend(5u16.to_le_bytes());
        body.extend([0, 0]);
        body.extend(41.5f32.to_le_bytes());
        body.extend(b"hi\0\0");
        let mut m = meta(HeaderFormat::Binary, 901, 2);
        m.binary_msg_length = body.len() as u32;

        let fields = decoder().decode(&body, &m).unwrap();
        assert_eq!(fields[0].children().len(), 1);
        assert_eq!(fields[1].children()[0].children()[1].value, FieldValue::F32(41.5));
        assert_eq!(fields[2].value, FieldValue::String("hi".to_string()));
    }

    #[test]
    fn binary_body_shorter_than_declared() {
        let mut m = meta(HeaderFormat::Binary, 900, 1);
        m.binary_msg_length = 100;
        let err = decoder().decode(&[0u8; 10], &m).unwrap_err();
        assert!(matches!(err, Error::MessageDecode(_)));
    }

    #[test]
    fn binary_width_mismatch_is_internal() {
        let def = simple(DataTypeName::Ulong, 2, "%lu");
        let err = decoder().decode_binary(&[def], &[0u8; 4]).unwrap_err();
        assert!(err.is_internal(), "{err}");
    }

    #[test]
    fn json_body() {
        let frame = br#"{"header": {}, "body": {"vals": [1, 2], "obs": [{"prn": 3, "cno": 44.5}], "label": "abc"}}"#;
        let fields = decoder().decode(frame, &meta(HeaderFormat::Json, 901, 2)).unwrap();
        assert_eq!(fields[0].children()[1].value, FieldValue::U16(2));
        assert_eq!(fields[1].children()[0].children()[1].value, FieldValue::F32(44.5));
        assert_eq!(fields[2].value, FieldValue::String("abc".to_string()));
    }

    #[test]
    fn json_enum_by_name() {
        let frame = br#"{"body": {"sol": "INSUFFICIENT_OBS", "pos": "SINGLE", "lat": 1.5, "base": "", "svs": 3, "mask": 255}}"#;
        let fields = decoder().decode(frame, &meta(HeaderFormat::Json, 900, 1)).unwrap();
        assert_eq!(fields[0].value, FieldValue::I32(1));
        assert_eq!(fields[5].value, FieldValue::U8(255));
    }

    #[test]
    fn json_rejects_fractional_integer() {
        let frame = br#"{"body": {"sol": "SOL_COMPUTED", "pos": "SINGLE", "lat": 1.5, "base": "", "svs": 0.1, "mask": 0}}"#;
        assert!(decoder().decode(frame, &meta(HeaderFormat::Json, 900, 1)).is_err());
    }

    #[test]
    fn ascii_response() {
        let mut m = meta(HeaderFormat::Ascii, 1, 0);
        m.response = true;
        let fields = decoder().decode(b"ERROR:Invalid message ID*00000000\r\n", &m).unwrap();
        assert_eq!(fields[0].value, FieldValue::I32(31));
        assert_eq!(fields[1].value, FieldValue::String("ERROR:Invalid message ID".to_string()));

        let fields = decoder().decode(b"OK*00000000\r\n", &m).unwrap();
        assert_eq!(fields[0].value, FieldValue::I32(1));
    }

    #[test]
    fn binary_response() {
        let mut body = 1i32.to_le_bytes().to_vec();
        body.extend(b"OK");
        let mut m = meta(HeaderFormat::Binary, 1, 0);
        m.response = true;
        m.binary_msg_length = body.len() as u32;
        let fields = decoder().decode(&body, &m).unwrap();
        assert_eq!(fields[0].value, FieldValue::I32(1));
        assert_eq!(fields[1].value, FieldValue::String("OK".to_string()));
    }

    #[test]
    fn abbreviated_response_has_no_definition() {
        let mut m = meta(HeaderFormat::AbbAscii, 0, 0);
        m.response = true;
        assert!(matches!(
            decoder().decode(b"<OK\r\n", &m),
            Err(Error::NoDefinition(_))
        ));
    }

    #[test]
    fn unknown_message_has_no_definition() {
        let m = meta(HeaderFormat::Ascii, 4242, 0);
        assert!(matches!(decoder().decode(b"1*0\r\n", &m), Err(Error::NoDefinition(_))));
    }

    #[test_case(DataTypeName::Uchar, 1, "%u", "-1", FieldValue::U8(u8::MAX); "u8 minus one")]
    #[test_case(DataTypeName::Ushort, 2, "%hu", "-1", FieldValue::U16(u16::MAX); "u16 minus one")]
    #[test_case(DataTypeName::Ulong, 4, "%lu", "-1", FieldValue::U32(u32::MAX); "u32 minus one")]
    #[test_case(DataTypeName::Ulonglong, 8, "%llu", "-1", FieldValue::U64(u64::MAX); "u64 minus one")]
    #[test_case(DataTypeName::Uchar, 1, "%u", "256", FieldValue::U8(0); "u8 overflow")]
    #[test_case(DataTypeName::Ushort, 2, "%hu", "65536", FieldValue::U16(0); "u16 overflow")]
    #[test_case(DataTypeName::Ulong, 4, "%lu", "4294967296", FieldValue::U32(0); "u32 overflow")]
    #[test_case(DataTypeName::Ulonglong, 8, "%llu", "18446744073709551616", FieldValue::U64(0); "u64 overflow")]
    #[test_case(DataTypeName::Char, 1, "%B", "-129", FieldValue::I8(127); "char underflow")]
    #[test_case(DataTypeName::Char, 1, "%B", "128", FieldValue::I8(-128); "char overflow")]
    #[test_case(DataTypeName::Uchar, 1, "%UB", "-256", FieldValue::U8(0); "uchar wraps twice")]
    #[test_case(DataTypeName::Ulong, 1, "%lu", "255", FieldValue::U8(255); "ulong declared one byte")]
    #[test_case(DataTypeName::Ulong, 4, "%lx", "ffffffff", FieldValue::U32(u32::MAX); "hex")]
    #[test_case(DataTypeName::Ulong, 4, "%lx", "0x10", FieldValue::U32(16); "hex prefix")]
    #[test_case(DataTypeName::Long, 4, "%ld", "-42", FieldValue::I32(-42); "signed")]
    #[test_case(DataTypeName::Bool, 4, "%d", "TRUE", FieldValue::Bool(true); "bool true")]
    #[test_case(DataTypeName::Bool, 4, "%d", "FALSE", FieldValue::Bool(false); "bool false")]
    #[test_case(DataTypeName::Double, 8, "%lf", "1.5e3", FieldValue::F64(1500.0); "scientific")]
    #[test_case(DataTypeName::Float, 4, "%f", "1e39", FieldValue::F32(f32::INFINITY); "float overflow")]
    #[test_case(DataTypeName::Double, 8, "%lf", "-1e309", FieldValue::F64(f64::NEG_INFINITY); "double overflow")]
    #[test_case(DataTypeName::Ulong, 4, "%T", "604800.000", FieldValue::U32(604_800_000); "gps time")]
    #[test_case(DataTypeName::Ulong, 4, "%T", "-1.000", FieldValue::U32(4_294_966_296); "gps time negative")]
    #[test_case(DataTypeName::Ulong, 4, "%T", "4294967295.000", FieldValue::U32(4_294_966_296); "gps time wraps")]
    #[test_case(DataTypeName::Uchar, 1, "%uc", "Q", FieldValue::U8(b'Q'); "char conversion")]
    #[test_case(DataTypeName::Uchar, 1, "%ucb", "00010011", FieldValue::U8(0x13); "bit string")]
    #[test_case(DataTypeName::Ulong, 4, "%id", "12", FieldValue::U32(12); "satellite id")]
    #[test_case(DataTypeName::Ulong, 4, "%id", "3+4", FieldValue::U32(3 | (4 << 16)); "glonass id")]
    #[test_case(DataTypeName::Ulong, 4, "%id", "3-7", FieldValue::U32(3 | (0xfff9 << 16)); "glonass negative channel")]
    fn text_numerics(name: DataTypeName, length: u16, conv: &str, token: &str, expected: FieldValue) {
        assert_eq!(decode_one(simple(name, length, conv), token).unwrap(), expected);
    }

    #[test_case(DataTypeName::Uchar, 1, "%u", "0.1"; "fraction into integer")]
    #[test_case(DataTypeName::Char, 1, "%B", "0.1"; "fraction into char")]
    #[test_case(DataTypeName::Ulong, 4, "%lu", "abc"; "letters")]
    #[test_case(DataTypeName::Ulong, 4, "%lu", ""; "empty")]
    #[test_case(DataTypeName::Bool, 4, "%d", "True"; "bool case")]
    #[test_case(DataTypeName::Bool, 4, "%d", "1"; "bool number")]
    #[test_case(DataTypeName::Double, 8, "%lf", "1.0.0"; "two points")]
    fn text_numerics_rejected(name: DataTypeName, length: u16, conv: &str, token: &str) {
        let err = decode_one(simple(name, length, conv), token).unwrap_err();
        assert!(matches!(err, Error::MessageDecode(_)), "{err}");
    }

    #[test]
    fn text_float_with_invalid_length_is_internal() {
        let err = decode_one(simple(DataTypeName::Float, 5, "%f"), "1.0").unwrap_err();
        assert!(err.is_internal(), "{err}");
    }

    #[test]
    fn message_id_conversion() {
        let def = simple(DataTypeName::Ulong, 4, "%m");
        let FieldValue::U32(id) = decode_one(def, "TESTPOSA").unwrap() else {
            panic!("expected u32");
        };
        assert_eq!(id & 0xFFFF, 900);
    }
}
