//! Receiver command encoding.
//!
//! Converts a command as typed at a receiver console, e.g., `LOG THISPORT BESTPOSA ONCE`, into the
//! ASCII or binary message the receiver accepts.
use std::sync::Arc;

use tracing::debug;

use crate::database::MessageDatabase;
use crate::decoder::MessageDecoder;
use crate::encoder::Encoder;
use crate::format::{EncodeFormat, HeaderFormat};
use crate::header::IntermediateHeader;
use crate::{Error, MetaData, Result};

/// Port address meaning "the port this command arrives on".
pub const THISPORT: u32 = 0xC0;

/// Encodes console style commands.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use novatel::{Commander, EncodeFormat, MessageDatabase};
///
/// let db = Arc::new(MessageDatabase::from_file("messages.json").unwrap());
/// let cmd = Commander::new(db)
///     .encode("LOG THISPORT BESTPOSA ONTIME 1", EncodeFormat::Binary)
///     .unwrap();
/// assert_eq!(&cmd[..3], &[0xAA, 0x44, 0x12]);
/// ```
#[derive(Debug, Clone)]
pub struct Commander {
    decoder: MessageDecoder,
    encoder: Encoder,
}

impl Commander {
    #[must_use]
    pub fn new(db: Arc<MessageDatabase>) -> Self {
        Self {
            decoder: MessageDecoder::new(db.clone()),
            encoder: Encoder::new(db),
        }
    }

    pub fn load_db(&mut self, db: Arc<MessageDatabase>) {
        self.decoder.load_db(db.clone());
        self.encoder.load_db(db);
    }

    #[must_use]
    pub fn database(&self) -> &Arc<MessageDatabase> {
        self.encoder.database()
    }

    /// Encode `command` as [EncodeFormat::Ascii] or [EncodeFormat::Binary].
    ///
    /// # Errors
    /// [Error::Unsupported] for other formats, [Error::NoDefinition] if the command name is not in
    /// the database and [Error::MalformedInput] if the parameters do not match the command
    /// definition.
    pub fn encode(&self, command: &str, format: EncodeFormat) -> Result<Vec<u8>> {
        if !matches!(format, EncodeFormat::Ascii | EncodeFormat::Binary) {
            return Err(Error::Unsupported(format!("commands cannot be encoded as {format}")));
        }

        let command = command.trim();
        let (name, params) = command.split_once(' ').unwrap_or((command, ""));
        let def = self
            .database()
            .get_msg_def_by_name(name)
            .ok_or_else(|| Error::NoDefinition(name.to_string()))?;

        let fields = self
            .decoder
            .decode_ascii(def.latest_fields(), params.as_bytes(), true)
            .map_err(|err| match err {
                Error::Internal(_) => err,
                other => Error::MalformedInput(format!("{name}: {other}")),
            })?;

        let header = IntermediateHeader {
            message_id: def.log_id,
            port_address: THISPORT,
            message_definition_crc: def.latest_message_crc,
            ..IntermediateHeader::default()
        };
        let meta = MetaData {
            format: HeaderFormat::Ascii,
            ..MetaData::default()
        };
        debug!(command = name, %format, "encoding command");
        self.encoder.encode_to_vec(&header, &fields, &meta, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = r#"{
        "enums": [
            {"_id": "e-port", "name": "PortAddress", "enumerators": [
                {"name": "THISPORT", "value": 192, "description": null}
            ]},
            {"_id": "e-switch", "name": "Switch", "enumerators": [
                {"name": "DISABLE", "value": 0, "description": null},
                {"name": "ENABLE", "value": 1, "description": null}
            ]}
        ],
        "messages": [
            {"_id": "m-ual", "messageID": 1627, "name": "UALCONTROL", "description": null,
             "latestMsgDefCrc": "18851", "fields": {"18851": [
                {"name": "switch", "type": "ENUM", "enumID": "e-switch",
                 "dataType": {"name": "INT", "length": 4}},
                {"name": "warning_limit", "type": "SIMPLE", "conversionString": "%lf",
                 "dataType": {"name": "DOUBLE", "length": 8}},
                {"name": "alarm_limit", "type": "SIMPLE", "conversionString": "%lf",
                 "dataType": {"name": "DOUBLE", "length": 8}}
             ]}}
        ]
    }"#;

    fn commander() -> Commander {
        Commander::new(Arc::new(MessageDatabase::from_str(DB).unwrap()))
    }

    #[test]
    fn binary_command() {
        let out = commander()
            .encode("UALCONTROL ENABLE 2.0 1.0", EncodeFormat::Binary)
            .unwrap();
        let expected = hex::decode(concat!(
            "AA44121C5B0600C014000000000000000000000000000000A3490000",
            "01000000",
            "0000000000000040",
            "000000000000F03F",
            "FFF83AA7"
        ))
        .unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn ascii_command() {
        let out = commander()
            .encode("UALCONTROL DISABLE 0.5 1", EncodeFormat::Ascii)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "#UALCONTROLA,THISPORT,0,0.0,UNKNOWN,0,0.000,00000000,49a3,0;DISABLE,0.500000,1.000000*1b090815\r\n"
        );
    }

    #[test]
    fn errors() {
        let cmd = commander();
        assert!(matches!(
            cmd.encode("NOSUCH 1", EncodeFormat::Ascii),
            Err(Error::NoDefinition(_))
        ));
        assert!(matches!(
            cmd.encode("UALCONTROL ENABLE", EncodeFormat::Binary),
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            cmd.encode("UALCONTROL MAYBE 1 2", EncodeFormat::Binary),
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            cmd.encode("UALCONTROL ENABLE 1 2", EncodeFormat::Json),
            Err(Error::Unsupported(_))
        ));
    }
}
