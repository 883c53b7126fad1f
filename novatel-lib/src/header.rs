//! Message header decoding.
//!
//! The [HeaderDecoder] turns the header of a framed message into an [IntermediateHeader], a
//! format independent view of the header that the [crate::Encoder] can render in any format,
//! and completes the [MetaData] the framer started.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::database::{EnumDefinition, MessageDatabase};
use crate::format::{
    message_format, message_type_mask, HeaderFormat, ABBREV_ASCII_OK, ABBREV_ASCII_SYNC,
    ASCII_SYNC, BINARY_HEADER_LENGTH, BINARY_SYNC1, BINARY_SYNC3, JSON_OBJECT_OPEN,
    SHORT_ASCII_SYNC, SHORT_BINARY_HEADER_LENGTH, SHORT_BINARY_SYNC3,
};
use crate::metadata::{MessageId, TimeStatus};
use crate::{Error, MetaData, Result};

/// Header fields common to every message format.
///
/// Short formats only carry the message id, week and milliseconds; the remaining fields keep
/// their defaults.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntermediateHeader {
    pub message_id: u16,
    /// Binary header message type byte: sibling id, format and response flag.
    pub message_type: u8,
    pub port_address: u32,
    /// Body length from a binary header.
    pub length: u16,
    pub sequence: u16,
    /// Idle time in half percent units.
    pub idle_time: u8,
    pub time_status: u32,
    pub week: u16,
    pub milliseconds: f64,
    pub receiver_status: u32,
    pub message_definition_crc: u32,
    pub receiver_sw_version: u16,
}

impl IntermediateHeader {
    #[must_use]
    pub fn sibling_id(&self) -> u8 {
        self.message_type & message_type_mask::MEASSRC
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.message_type & message_type_mask::RESPONSE != 0
    }

    /// Idle time as a percentage.
    #[must_use]
    pub fn idle_percent(&self) -> f32 {
        f32::from(self.idle_time) * 0.5
    }
}

fn u16_le(dat: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([dat[offset], dat[offset + 1]])
}

fn u32_le(dat: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([dat[offset], dat[offset + 1], dat[offset + 2], dat[offset + 3]])
}

/// Kind of characters a header token must start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leading {
    Digit,
    Alpha,
    Hex,
}

/// Walks the delimited fields of a text header.
struct Tokens<'a> {
    dat: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(dat: &'a [u8], pos: usize) -> Self {
        Self { dat, pos }
    }

    /// Next token up to `delim`, consuming the delimiter. `None` if the token does not start
    /// with the expected kind of character or the delimiter is missing.
    fn next(&mut self, delim: &[u8], leading: Leading) -> Option<&'a str> {
        let rest = &self.dat[self.pos.min(self.dat.len())..];
        let first = *rest.first()?;
        let ok = match leading {
            Leading::Digit => first.is_ascii_digit(),
            Leading::Alpha => first.is_ascii_alphabetic(),
            Leading::Hex => first.is_ascii_hexdigit(),
        };
        if !ok {
            return None;
        }
        let end = rest.iter().position(|b| *b == delim[0])?;
        if !rest[end..].starts_with(delim) {
            trace!(pos = self.pos + end, "invalid header delimiter");
            return None;
        }
        let token = std::str::from_utf8(&rest[..end]).ok()?;
        self.pos += end + delim.len();
        Some(token)
    }
}

const COMMA: &[u8] = b",";
const SEMICOLON: &[u8] = b";";
const SPACE: &[u8] = b" ";
const CRLF: &[u8] = b"\r\n";

/// Decodes message headers in every supported format.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use novatel::{HeaderDecoder, MessageDatabase, MetaData};
///
/// let db = Arc::new(MessageDatabase::from_file("messages.json").unwrap());
/// let decoder = HeaderDecoder::new(db);
/// let mut meta = MetaData::new();
/// let frame = b"%RAWIMUSXA,1692,484620.664;00,11*a5db8c7b\r\n";
/// let header = decoder.decode(frame, &mut meta).unwrap();
/// assert_eq!(header.week, 1692);
/// ```
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    db: Arc<MessageDatabase>,
    ports: Option<Arc<EnumDefinition>>,
    time_statuses: Option<Arc<EnumDefinition>>,
}

impl HeaderDecoder {
    #[must_use]
    pub fn new(db: Arc<MessageDatabase>) -> Self {
        let mut decoder = Self {
            db: db.clone(),
            ports: None,
            time_statuses: None,
        };
        decoder.load_db(db);
        decoder
    }

    /// Replace the database used to resolve message names and header enumerations.
    pub fn load_db(&mut self, db: Arc<MessageDatabase>) {
        self.ports = db.get_enum_by_name("PortAddress");
        self.time_statuses = db.get_enum_by_name("GPSTimeStatus");
        self.db = db;
        debug!("header decoder database loaded");
    }

    #[must_use]
    pub fn database(&self) -> &Arc<MessageDatabase> {
        &self.db
    }

    fn port_value(&self, name: &str) -> u32 {
        self.ports
            .as_ref()
            .and_then(|e| e.value_of(name))
            .map_or(0, |v| v as u32)
    }

    fn time_status_value(&self, name: &str) -> u32 {
        match self.time_statuses.as_ref() {
            Some(e) => e.value_of(name).map_or(0, |v| v as u32),
            None => name
                .parse::<TimeStatus>()
                .map_or(0, |ts| u32::from(ts as u8)),
        }
    }

    /// Decode the header at the start of `frame`.
    ///
    /// The format is detected from the sync bytes, so `frame` may come from the [crate::Framer]
    /// or any other source. `meta` receives the format, message id and name, sibling id, time,
    /// response flag and the header length, i.e., the offset of the message body in `frame`.
    ///
    /// # Errors
    /// [Error::HeaderDecode] if a header field is missing or malformed, or if the message is
    /// not a response and its id is not in the database. [Error::Unsupported] for frames that
    /// do not start with a known sync.
    pub fn decode(&self, frame: &[u8], meta: &mut MetaData) -> Result<IntermediateHeader> {
        let mut header = IntermediateHeader::default();

        meta.format = match frame.first() {
            Some(&ASCII_SYNC) => HeaderFormat::Ascii,
            Some(&SHORT_ASCII_SYNC) => HeaderFormat::ShortAscii,
            Some(&ABBREV_ASCII_SYNC) => HeaderFormat::AbbAscii,
            Some(&JSON_OBJECT_OPEN) => HeaderFormat::Json,
            Some(&BINARY_SYNC1) if frame.len() > 2 => match frame[2] {
                BINARY_SYNC3 => HeaderFormat::Binary,
                SHORT_BINARY_SYNC3 => HeaderFormat::ShortBinary,
                _ => HeaderFormat::Unknown,
            },
            _ => HeaderFormat::Unknown,
        };

        let header_length = match meta.format {
            HeaderFormat::Ascii => self.decode_ascii(frame, &mut header)?,
            HeaderFormat::ShortAscii => self.decode_short_ascii(frame, &mut header)?,
            HeaderFormat::AbbAscii => {
                if Self::is_abbrev_response(frame) {
                    meta.response = true;
                    meta.message_name = "UNKNOWN".to_string();
                    meta.header_length = 1;
                    header.message_type = message_type_mask::RESPONSE;
                    return Ok(header);
                }
                let (length, short) = self.decode_abbrev_ascii(frame, &mut header)?;
                if short {
                    meta.format = HeaderFormat::ShortAbbAscii;
                }
                length
            }
            HeaderFormat::Binary => Self::decode_binary(frame, &mut header)?,
            HeaderFormat::ShortBinary => Self::decode_short_binary(frame, &mut header)?,
            HeaderFormat::Json => {
                self.decode_json(frame, &mut header)?;
                0
            }
            _ => {
                return Err(Error::Unsupported(format!(
                    "no header decoder for format {}",
                    meta.format
                )))
            }
        };

        meta.sibling_id = header.sibling_id();
        meta.time_status = TimeStatus::from_raw(header.time_status);
        meta.response = header.is_response();
        meta.week = header.week;
        meta.milliseconds = header.milliseconds.round();
        meta.message_id = header.message_id;
        meta.message_crc = header.message_definition_crc;
        meta.header_length = header_length;
        meta.binary_msg_length = u32::from(header.length);
        meta.message_name = self.db.msg_id_to_msg_name(
            MessageId::new(header.message_id, 0, message_format::ABBREV, false).pack(),
        );

        if !meta.response && self.db.get_msg_def(header.message_id).is_none() {
            return Err(Error::HeaderDecode(format!(
                "message id {} is not in the database",
                header.message_id
            )));
        }

        trace!(
            format = %meta.format,
            message_id = meta.message_id,
            name = %meta.message_name,
            header_length,
            "decoded header"
        );
        Ok(header)
    }

    fn is_abbrev_response(frame: &[u8]) -> bool {
        let rest = &frame[1..];
        rest.starts_with(ABBREV_ASCII_OK.as_bytes()) || rest.starts_with(b"ERROR")
    }

    fn missing(field: &str) -> Error {
        Error::HeaderDecode(format!("invalid or missing {field}"))
    }

    fn message_name(&self, tokens: &mut Tokens, delim: &[u8], header: &mut IntermediateHeader) -> Result<()> {
        let name = tokens
            .next(delim, Leading::Alpha)
            .ok_or_else(|| Self::missing("message name"))?;
        let id = MessageId::unpack(self.db.msg_name_to_msg_id(name));
        header.message_id = id.id;
        header.message_type = id.msg_type();
        Ok(())
    }

    fn week(tokens: &mut Tokens, delim: &[u8], header: &mut IntermediateHeader) -> Result<()> {
        header.week = tokens
            .next(delim, Leading::Digit)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Self::missing("week"))?;
        Ok(())
    }

    fn seconds(tokens: &mut Tokens, delim: &[u8], header: &mut IntermediateHeader) -> Result<()> {
        let seconds: f64 = tokens
            .next(delim, Leading::Digit)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Self::missing("seconds"))?;
        header.milliseconds = (seconds * 1000.0).round();
        Ok(())
    }

    /// Fields that follow the port in full ASCII and abbreviated headers, up to but not
    /// including the software version.
    fn long_fields(&self, tokens: &mut Tokens, delim: &[u8], header: &mut IntermediateHeader) -> Result<()> {
        header.sequence = tokens
            .next(delim, Leading::Digit)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Self::missing("sequence"))?;
        let idle: f32 = tokens
            .next(delim, Leading::Digit)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Self::missing("idle time"))?;
        header.idle_time = (2.0 * idle).round() as u8;
        let status = tokens
            .next(delim, Leading::Alpha)
            .ok_or_else(|| Self::missing("time status"))?;
        header.time_status = self.time_status_value(status);
        Self::week(tokens, delim, header)?;
        Self::seconds(tokens, delim, header)?;
        header.receiver_status = tokens
            .next(delim, Leading::Hex)
            .and_then(|t| u32::from_str_radix(t, 16).ok())
            .ok_or_else(|| Self::missing("receiver status"))?;
        header.message_definition_crc = tokens
            .next(delim, Leading::Hex)
            .and_then(|t| u32::from_str_radix(t, 16).ok())
            .ok_or_else(|| Self::missing("message definition crc"))?;
        Ok(())
    }

    fn sw_version(tokens: &mut Tokens, delim: &[u8], header: &mut IntermediateHeader) -> Result<()> {
        header.receiver_sw_version = tokens
            .next(delim, Leading::Digit)
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Self::missing("receiver software version"))?;
        Ok(())
    }

    fn decode_ascii(&self, frame: &[u8], header: &mut IntermediateHeader) -> Result<usize> {
        let mut tokens = Tokens::new(frame, 1);
        self.message_name(&mut tokens, COMMA, header)?;
        let port = tokens
            .next(COMMA, Leading::Alpha)
            .ok_or_else(|| Self::missing("port"))?;
        header.port_address = self.port_value(port);
        self.long_fields(&mut tokens, COMMA, header)?;
        Self::sw_version(&mut tokens, SEMICOLON, header)?;
        Ok(tokens.pos)
    }

    fn decode_short_ascii(&self, frame: &[u8], header: &mut IntermediateHeader) -> Result<usize> {
        let mut tokens = Tokens::new(frame, 1);
        self.message_name(&mut tokens, COMMA, header)?;
        Self::week(&mut tokens, COMMA, header)?;
        Self::seconds(&mut tokens, SEMICOLON, header)?;
        Ok(tokens.pos)
    }

    /// Returns the header length and whether the header turned out to be the short form.
    fn decode_abbrev_ascii(&self, frame: &[u8], header: &mut IntermediateHeader) -> Result<(usize, bool)> {
        let mut tokens = Tokens::new(frame, 1);
        self.message_name(&mut tokens, SPACE, header)?;

        // Only the long form has a port, so a failed port means a short header.
        if let Some(port) = tokens.next(SPACE, Leading::Alpha) {
            header.port_address = self.port_value(port);
            self.long_fields(&mut tokens, SPACE, header)?;
            Self::sw_version(&mut tokens, CRLF, header)?;
            Ok((tokens.pos, false))
        } else {
            Self::week(&mut tokens, SPACE, header)?;
            Self::seconds(&mut tokens, CRLF, header)?;
            Ok((tokens.pos, true))
        }
    }

    fn decode_binary(frame: &[u8], header: &mut IntermediateHeader) -> Result<usize> {
        if frame.len() < BINARY_HEADER_LENGTH {
            return Err(Error::HeaderDecode(format!(
                "binary header needs {BINARY_HEADER_LENGTH} bytes, got {}",
                frame.len()
            )));
        }
        header.message_id = u16_le(frame, 4);
        header.message_type = frame[6];
        header.port_address = u32::from(frame[7]);
        header.length = u16_le(frame, 8);
        header.sequence = u16_le(frame, 10);
        header.idle_time = frame[12];
        header.time_status = u32::from(frame[13]);
        header.week = u16_le(frame, 14);
        header.milliseconds = f64::from(u32_le(frame, 16));
        header.receiver_status = u32_le(frame, 20);
        header.message_definition_crc = u32::from(u16_le(frame, 24));
        header.receiver_sw_version = u16_le(frame, 26);
        Ok(BINARY_HEADER_LENGTH)
    }

    fn decode_short_binary(frame: &[u8], header: &mut IntermediateHeader) -> Result<usize> {
        if frame.len() < SHORT_BINARY_HEADER_LENGTH {
            return Err(Error::HeaderDecode(format!(
                "short binary header needs {SHORT_BINARY_HEADER_LENGTH} bytes, got {}",
                frame.len()
            )));
        }
        header.message_type = 0;
        header.length = u16::from(frame[3]);
        header.message_id = u16_le(frame, 4);
        header.week = u16_le(frame, 6);
        header.milliseconds = f64::from(u32_le(frame, 8));
        Ok(SHORT_BINARY_HEADER_LENGTH)
    }

    fn decode_json(&self, frame: &[u8], header: &mut IntermediateHeader) -> Result<()> {
        let doc: Value = serde_json::from_slice(frame)
            .map_err(|e| Error::HeaderDecode(format!("invalid json message: {e}")))?;
        let hdr = doc
            .get("header")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::HeaderDecode("json message has no header object".to_string()))?;

        let int = |key: &str| hdr.get(key).and_then(Value::as_i64);
        let float = |key: &str| hdr.get(key).and_then(Value::as_f64);
        let text = |key: &str| hdr.get(key).and_then(Value::as_str);

        match int("id") {
            Some(id) => header.message_id = id as u16,
            None => {
                // Older producers only carry the name.
                if let Some(name) = text("message") {
                    header.message_id = MessageId::unpack(self.db.msg_name_to_msg_id(name)).id;
                }
            }
        }
        if let Some(port) = text("port") {
            header.port_address = self.port_value(port);
        }
        if let Some(seq) = int("sequence_num") {
            header.sequence = seq as u16;
        }
        if let Some(idle) = float("percent_idle_time") {
            header.idle_time = (idle * 2.0) as u8;
        }
        if let Some(status) = text("time_status") {
            header.time_status = self.time_status_value(status);
        }
        if let Some(week) = int("week") {
            header.week = week as u16;
        }
        if let Some(seconds) = float("seconds") {
            header.milliseconds = (seconds * 1000.0).round();
        }
        if let Some(status) = int("receiver_status") {
            header.receiver_status = status as u32;
        }
        if let Some(version) = int("receiver_sw_version") {
            header.receiver_sw_version = version as u16;
        }
        if let Some(crc) = int("HEADER_reserved1") {
            header.message_definition_crc = crc as u32;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = r#"{
        "enums": [
            {"_id": "e-port", "name": "PortAddress", "enumerators": [
                {"name": "NO_PORTS", "value": 0, "description": null},
                {"name": "COM1", "value": 32, "description": null},
                {"name": "THISPORT", "value": 192, "description": null}
            ]},
            {"_id": "e-ts", "name": "GPSTimeStatus", "enumerators": [
                {"name": "UNKNOWN", "value": 20, "description": null},
                {"name": "FINESTEERING", "value": 180, "description": null}
            ]}
        ],
        "messages": [
            {"_id": "m-bestpos", "messageID": 42, "name": "BESTPOS", "description": null,
             "latestMsgDefCrc": "45558", "messageStyle": null, "fields": {"45558": []}},
            {"_id": "m-rawimusx", "messageID": 1462, "name": "RAWIMUSX", "description": null,
             "latestMsgDefCrc": "1", "messageStyle": null, "fields": {"1": []}},
            {"_id": "m-log", "messageID": 1, "name": "LOG", "description": null,
             "latestMsgDefCrc": "1", "messageStyle": null, "fields": {"1": []}}
        ]
    }"#;

    fn decoder() -> HeaderDecoder {
        HeaderDecoder::new(Arc::new(MessageDatabase::from_str(DB).unwrap()))
    }

    #[test]
    fn ascii() {
        let frame = b"#BESTPOSA_1,COM1,7,83.5,FINESTEERING,2163,329760.000,02400000,b1f6,65535;SOL_COMPUTED*00000000\r\n";
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();

        assert_eq!(header.message_id, 42);
        assert_eq!(header.port_address, 32);
        assert_eq!(header.sequence, 7);
        assert_eq!(header.idle_time, 167);
        assert_eq!(header.time_status, 180);
        assert_eq!(header.week, 2163);
        assert!((header.milliseconds - 329_760_000.0).abs() < 1e-6);
        assert_eq!(header.receiver_status, 0x0240_0000);
        assert_eq!(header.message_definition_crc, 0xb1f6);
        assert_eq!(header.receiver_sw_version, 65535);

        assert_eq!(meta.format, HeaderFormat::Ascii);
        assert_eq!(meta.sibling_id, 1);
        assert_eq!(meta.time_status, TimeStatus::FineSteering);
        assert_eq!(meta.message_name, "BESTPOS");
        assert_eq!(meta.header_length, 73);
        assert_eq!(&frame[meta.header_length..meta.header_length + 3], b"SOL");
        assert!(!meta.response);
    }

    #[test]
    fn ascii_response() {
        let frame = b"#LOGR,COM1,0,63.5,FINESTEERING,2163,329760.000,02400000,0000,65535;OK*00000000\r\n";
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();
        assert!(meta.response);
        assert!(header.is_response());
        assert_eq!(header.message_id, 1);
    }

    #[test]
    fn ascii_missing_field() {
        let frame = b"#BESTPOSA,COM1,0,83.5,FINESTEERING,2163;SOL*00000000\r\n";
        let mut meta = MetaData::new();
        assert!(matches!(
            decoder().decode(frame, &mut meta),
            Err(Error::HeaderDecode(_))
        ));
    }

    #[test]
    fn ascii_unknown_message() {
        let frame = b"#NOTALOGA,COM1,0,83.5,FINESTEERING,2163,329760.000,02400000,b1f6,65535;X*00000000\r\n";
        let mut meta = MetaData::new();
        assert!(matches!(
            decoder().decode(frame, &mut meta),
            Err(Error::HeaderDecode(_))
        ));
    }

    #[test]
    fn short_ascii() {
        let frame = b"%RAWIMUSXA,1692,484620.664;00,11*a5db8c7b\r\n";
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();
        assert_eq!(meta.format, HeaderFormat::ShortAscii);
        assert_eq!(header.message_id, 1462);
        assert_eq!(header.week, 1692);
        assert_eq!(meta.milliseconds, 484_620_664.0);
        assert_eq!(meta.header_length, 27);
    }

    #[test]
    fn abbreviated() {
        let frame = b"<BESTPOS COM1 0 72.0 FINESTEERING 2163 329760.000 02000000 b1f6 16248\r\n<     SOL_COMPUTED\r\n";
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();
        assert_eq!(meta.format, HeaderFormat::AbbAscii);
        assert_eq!(header.idle_time, 144);
        assert_eq!(header.receiver_sw_version, 16248);
        assert_eq!(&frame[meta.header_length..meta.header_length + 1], b"<");
    }

    #[test]
    fn short_abbreviated() {
        let frame = b"<RAWIMUSX 1692 484620.664\r\n<     00 11\r\n";
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();
        assert_eq!(meta.format, HeaderFormat::ShortAbbAscii);
        assert_eq!(header.week, 1692);
        assert_eq!(meta.header_length, 27);
    }

    #[test]
    fn abbreviated_responses_have_no_header() {
        for frame in [&b"<OK\r\n"[..], b"<ERROR:Invalid Message ID\r\n"] {
            let mut meta = MetaData::new();
            let header = decoder().decode(frame, &mut meta).unwrap();
            assert!(meta.response);
            assert_eq!(meta.header_length, 1);
            assert_eq!(meta.message_name, "UNKNOWN");
            assert!(header.is_response());
        }
    }

    #[test]
    fn binary() {
        let mut frame = vec![
            0xAA, 0x44, 0x12, 0x1C, 0x2A, 0x00, 0x01, 0x20, 0x48, 0x00, 0x05, 0x00, 0xA3, 0xB4,
            0x73, 0x08, 0x98, 0x74, 0xA8, 0x13, 0x00, 0x00, 0x00, 0x02, 0xF6, 0xB1, 0xFF, 0xFF,
        ];
        frame.extend_from_slice(&[0u8; 76]);
        let mut meta = MetaData::new();
        let header = decoder().decode(&frame, &mut meta).unwrap();
        assert_eq!(meta.format, HeaderFormat::Binary);
        assert_eq!(header.message_id, 42);
        assert_eq!(header.port_address, 0x20);
        assert_eq!(header.length, 72);
        assert_eq!(header.sequence, 5);
        assert_eq!(header.idle_percent(), 81.5);
        assert_eq!(meta.time_status, TimeStatus::FineSteering);
        assert_eq!(meta.week, 2163);
        assert_eq!(meta.milliseconds, 329_807_000.0);
        assert_eq!(meta.sibling_id, 1);
        assert_eq!(meta.message_crc, 0xb1f6);
        assert_eq!(meta.binary_msg_length, 72);
        assert_eq!(meta.header_length, 28);
    }

    #[test]
    fn short_binary() {
        let frame: &[u8] = &[
            0xAA, 0x44, 0x13, 0x28, 0xB6, 0x05, 0x9C, 0x06, 0x78, 0xB9, 0xE2, 0x1C, 0x00,
        ];
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();
        assert_eq!(meta.format, HeaderFormat::ShortBinary);
        assert_eq!(header.message_id, 1462);
        assert_eq!(header.length, 40);
        assert_eq!(header.week, 1692);
        assert_eq!(meta.milliseconds, 484_620_664.0);
        assert_eq!(meta.header_length, 12);
    }

    #[test]
    fn binary_too_short() {
        let mut meta = MetaData::new();
        assert!(decoder()
            .decode(&[0xAA, 0x44, 0x12, 0x1C], &mut meta)
            .is_err());
    }

    #[test]
    fn json() {
        let frame = br#"{"header": {"message": "BESTPOS","id": 42,"port": "COM1","sequence_num": 0,"percent_idle_time": 83.5,"time_status": "FINESTEERING","week": 2163,"seconds": 329760.000,"receiver_status": 37748736,"HEADER_reserved1": 45558,"receiver_sw_version": 65535},"body": {}}"#;
        let mut meta = MetaData::new();
        let header = decoder().decode(frame, &mut meta).unwrap();
        assert_eq!(meta.format, HeaderFormat::Json);
        assert_eq!(header.message_id, 42);
        assert_eq!(header.port_address, 32);
        assert_eq!(header.idle_time, 167);
        assert_eq!(header.receiver_status, 0x0240_0000);
        assert_eq!(header.message_definition_crc, 45558);
        assert_eq!(meta.header_length, 0);
        assert_eq!(meta.message_name, "BESTPOS");
    }

    #[test]
    fn json_without_header() {
        let mut meta = MetaData::new();
        assert!(matches!(
            decoder().decode(br#"{"body": {}}"#, &mut meta),
            Err(Error::HeaderDecode(_))
        ));
    }

    #[test]
    fn unknown_sync() {
        let mut meta = MetaData::new();
        assert!(matches!(
            decoder().decode(b"$GPGGA,1*00\r\n", &mut meta),
            Err(Error::Unsupported(_))
        ));
    }
}
