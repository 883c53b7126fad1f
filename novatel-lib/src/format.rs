//! Wire format identifiers and protocol constants.
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const ASCII_SYNC: u8 = b'#';
pub const SHORT_ASCII_SYNC: u8 = b'%';
pub const ABBREV_ASCII_SYNC: u8 = b'<';
pub const NMEA_SYNC: u8 = b'$';
pub const JSON_OBJECT_OPEN: u8 = b'{';
pub const JSON_OBJECT_CLOSE: u8 = b'}';

pub const ASCII_FIELD_SEPARATOR: u8 = b',';
pub const ASCII_HEADER_TERMINATOR: u8 = b';';
pub const ASCII_CRC_DELIMITER: u8 = b'*';
pub const ABBREV_ASCII_SEPARATOR: u8 = b' ';
pub const ASCII_SYNC_LENGTH: usize = 1;
pub const ASCII_CRC_LENGTH: usize = 8;
pub const NMEA_SYNC_LENGTH: usize = 1;
pub const NMEA_CRC_LENGTH: usize = 2;
pub const MAX_MESSAGE_NAME_LENGTH: usize = 40;

/// Spaces per nesting level on abbreviated ASCII continuation lines.
pub const ABBREV_ASCII_INDENTATION_LENGTH: usize = 5;
pub const ABBREV_ASCII_ERROR_PREFIX: &str = "ERROR:";
pub const ABBREV_ASCII_OK: &str = "OK";

pub const BINARY_SYNC1: u8 = 0xAA;
pub const BINARY_SYNC2: u8 = 0x44;
pub const PROPRIETARY_BINARY_SYNC2: u8 = 0x45;
pub const BINARY_SYNC3: u8 = 0x12;
pub const SHORT_BINARY_SYNC3: u8 = 0x13;
pub const BINARY_SYNC_LENGTH: usize = 3;
pub const BINARY_HEADER_LENGTH: usize = 28;
pub const SHORT_BINARY_HEADER_LENGTH: usize = 12;
pub const BINARY_CRC_LENGTH: usize = 4;

pub const MESSAGE_SIZE_MAX: usize = 0x8000;
pub const MAX_ASCII_MESSAGE_LENGTH: usize = MESSAGE_SIZE_MAX;
pub const MAX_BINARY_MESSAGE_LENGTH: usize = MESSAGE_SIZE_MAX;
pub const MAX_ABB_ASCII_RESPONSE_LENGTH: usize = MESSAGE_SIZE_MAX;
pub const MAX_SHORT_BINARY_MESSAGE_LENGTH: usize =
    SHORT_BINARY_HEADER_LENGTH + u8::MAX as usize + BINARY_CRC_LENGTH;
/// NMEA 0183 allows 82 characters but receiver-specific sentences run longer.
pub const MAX_NMEA_MESSAGE_LENGTH: usize = 256;

/// Format of a framed message as detected from its sync bytes and header.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderFormat {
    #[default]
    #[display("UNKNOWN")]
    Unknown,
    #[display("BINARY")]
    Binary,
    #[display("SHORT_BINARY")]
    ShortBinary,
    #[display("PROPRIETARY_BINARY")]
    ProprietaryBinary,
    #[display("ASCII")]
    Ascii,
    #[display("SHORT_ASCII")]
    ShortAscii,
    #[display("ABB_ASCII")]
    AbbAscii,
    #[display("SHORT_ABB_ASCII")]
    ShortAbbAscii,
    #[display("NMEA")]
    Nmea,
    #[display("JSON")]
    Json,
    /// Wildcard used by filters to match every format.
    #[display("ALL")]
    All,
}

impl HeaderFormat {
    #[must_use]
    pub fn is_short(self) -> bool {
        matches!(
            self,
            HeaderFormat::ShortAscii | HeaderFormat::ShortBinary | HeaderFormat::ShortAbbAscii
        )
    }

    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            HeaderFormat::Binary | HeaderFormat::ShortBinary | HeaderFormat::ProprietaryBinary
        )
    }

    /// Text formats in which a byte above 127 means the candidate frame is corrupt.
    #[must_use]
    pub fn is_text(self) -> bool {
        matches!(
            self,
            HeaderFormat::Ascii
                | HeaderFormat::ShortAscii
                | HeaderFormat::AbbAscii
                | HeaderFormat::ShortAbbAscii
                | HeaderFormat::Nmea
                | HeaderFormat::Json
        )
    }
}

impl FromStr for HeaderFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "UNKNOWN" => HeaderFormat::Unknown,
            "BINARY" => HeaderFormat::Binary,
            "SHORT_BINARY" => HeaderFormat::ShortBinary,
            "PROPRIETARY_BINARY" => HeaderFormat::ProprietaryBinary,
            "ASCII" => HeaderFormat::Ascii,
            "SHORT_ASCII" => HeaderFormat::ShortAscii,
            "ABB_ASCII" => HeaderFormat::AbbAscii,
            "SHORT_ABB_ASCII" => HeaderFormat::ShortAbbAscii,
            "NMEA" => HeaderFormat::Nmea,
            "JSON" => HeaderFormat::Json,
            "ALL" => HeaderFormat::All,
            _ => return Err(Error::MalformedInput(format!("unknown header format {s}"))),
        })
    }
}

/// Target format for [crate::Encoder].
///
/// `Ascii` and `Binary` produce the short variant when the source message used a short header.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncodeFormat {
    /// Binary layout with every array and string padded to its declared maximum so the body
    /// can be accessed through a fixed offset table.
    #[display("FLATTENED_BINARY")]
    FlattenedBinary,
    #[display("ASCII")]
    Ascii,
    #[display("ABBREV_ASCII")]
    AbbrevAscii,
    #[display("BINARY")]
    Binary,
    #[display("JSON")]
    Json,
}

impl FromStr for EncodeFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "FLATTENED_BINARY" => EncodeFormat::FlattenedBinary,
            "ASCII" => EncodeFormat::Ascii,
            "ABBREV_ASCII" | "ABB_ASCII" => EncodeFormat::AbbrevAscii,
            "BINARY" => EncodeFormat::Binary,
            "JSON" => EncodeFormat::Json,
            _ => return Err(Error::MalformedInput(format!("unknown encode format {s}"))),
        })
    }
}

/// Message format bits carried in the binary header message type byte.
pub mod message_format {
    pub const BINARY: u32 = 0b00;
    pub const ASCII: u32 = 0b01;
    pub const ABBREV: u32 = 0b10;
    pub const RESERVED: u32 = 0b11;
}

/// Masks for the binary header message type byte.
pub mod message_type_mask {
    pub const MEASSRC: u8 = 0b0001_1111;
    pub const MSGFORMAT: u8 = 0b0110_0000;
    pub const RESPONSE: u8 = 0b1000_0000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_format_from_cli_names() {
        assert_eq!(
            "flattened-binary".parse::<EncodeFormat>().unwrap(),
            EncodeFormat::FlattenedBinary
        );
        assert_eq!(
            "abbrev_ascii".parse::<EncodeFormat>().unwrap(),
            EncodeFormat::AbbrevAscii
        );
        assert!("xml".parse::<EncodeFormat>().is_err());
    }

    #[test]
    fn header_format_display_roundtrips() {
        for fmt in [
            HeaderFormat::Binary,
            HeaderFormat::ShortAbbAscii,
            HeaderFormat::Nmea,
            HeaderFormat::All,
        ] {
            assert_eq!(fmt.to_string().parse::<HeaderFormat>().unwrap(), fmt);
        }
    }

    #[test]
    fn short_binary_max_length() {
        assert_eq!(MAX_SHORT_BINARY_MESSAGE_LENGTH, 271);
    }
}
