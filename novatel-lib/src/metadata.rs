//! Per-frame descriptors shared by the framer, decoders and encoder.
use std::str::FromStr;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::format::{message_format, message_type_mask, HeaderFormat};
use crate::{Error, Result};

/// Receiver clock quality reported in every message header.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimeStatus {
    #[default]
    #[display("UNKNOWN")]
    Unknown = 20,
    #[display("APPROXIMATE")]
    Approximate = 60,
    #[display("COARSEADJUSTING")]
    CoarseAdjusting = 80,
    #[display("COARSE")]
    Coarse = 100,
    #[display("COARSESTEERING")]
    CoarseSteering = 120,
    #[display("FREEWHEELING")]
    FreeWheeling = 130,
    #[display("FINEADJUSTING")]
    FineAdjusting = 140,
    #[display("FINE")]
    Fine = 160,
    #[display("FINEBACKUPSTEERING")]
    FineBackupSteering = 170,
    #[display("FINESTEERING")]
    FineSteering = 180,
    #[display("SATTIME")]
    SatTime = 200,
    #[display("EXTERN")]
    Extern = 220,
    #[display("EXACT")]
    Exact = 240,
}

impl TimeStatus {
    const ALL: [TimeStatus; 13] = [
        TimeStatus::Unknown,
        TimeStatus::Approximate,
        TimeStatus::CoarseAdjusting,
        TimeStatus::Coarse,
        TimeStatus::CoarseSteering,
        TimeStatus::FreeWheeling,
        TimeStatus::FineAdjusting,
        TimeStatus::Fine,
        TimeStatus::FineBackupSteering,
        TimeStatus::FineSteering,
        TimeStatus::SatTime,
        TimeStatus::Extern,
        TimeStatus::Exact,
    ];

    /// Map a raw header value, falling back to [TimeStatus::Unknown] for values the receiver
    /// does not define.
    #[must_use]
    pub fn from_raw(value: u32) -> TimeStatus {
        Self::ALL
            .iter()
            .copied()
            .find(|ts| *ts as u32 == value)
            .unwrap_or_default()
    }
}

impl FromStr for TimeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|ts| ts.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::MalformedInput(format!("invalid time status {s}")))
    }
}

/// Antenna a measurement was made with, derived from the sibling id of the message.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementSource {
    #[default]
    #[display("PRIMARY")]
    Primary,
    #[display("SECONDARY")]
    Secondary,
}

impl From<u8> for MeasurementSource {
    fn from(sibling_id: u8) -> Self {
        if sibling_id == 0 {
            MeasurementSource::Primary
        } else {
            MeasurementSource::Secondary
        }
    }
}

/// Message identifier split into the parts packed into a 32-bit id.
///
/// The low 16 bits hold the log id. The upper bits mirror the binary header message type byte:
/// sibling id (measurement source), message format and response flag.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub id: u16,
    pub sibling_id: u8,
    pub format: u32,
    pub response: bool,
}

impl MessageId {
    #[must_use]
    pub fn new(id: u16, sibling_id: u8, format: u32, response: bool) -> Self {
        Self {
            id,
            sibling_id,
            format,
            response,
        }
    }

    #[must_use]
    pub fn pack(&self) -> u32 {
        u32::from(self.id) | (u32::from(self.msg_type()) << 16)
    }

    #[must_use]
    pub fn unpack(value: u32) -> Self {
        let msg_type = (value >> 16) as u8;
        Self {
            id: (value & 0xFFFF) as u16,
            sibling_id: msg_type & message_type_mask::MEASSRC,
            format: u32::from((msg_type & message_type_mask::MSGFORMAT) >> 5),
            response: msg_type & message_type_mask::RESPONSE != 0,
        }
    }

    /// The binary header message type byte.
    #[must_use]
    pub fn msg_type(&self) -> u8 {
        (u8::from(self.response) << 7)
            | (((self.format as u8) << 5) & message_type_mask::MSGFORMAT)
            | (self.sibling_id & message_type_mask::MEASSRC)
    }

    #[must_use]
    pub fn is_abbreviated(&self) -> bool {
        self.format == message_format::ABBREV
    }
}

/// Everything learned about a frame as it moves through the pipeline.
///
/// The framer fills in the format, length and response flag. The header decoder adds the rest.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    pub format: HeaderFormat,
    /// Sibling id from the message type; 0 is the primary antenna.
    pub sibling_id: u8,
    pub time_status: TimeStatus,
    pub response: bool,
    pub week: u16,
    pub milliseconds: f64,
    /// Body length declared by a binary header.
    pub binary_msg_length: u32,
    /// Frame length in bytes.
    pub length: usize,
    pub header_length: usize,
    pub message_id: u16,
    /// Message definition CRC the frame was encoded with.
    pub message_crc: u32,
    pub message_name: String,
}

impl MetaData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn measurement_source(&self) -> MeasurementSource {
        MeasurementSource::from(self.sibling_id)
    }

    /// GPS time of the message as a [hifitime::Epoch].
    #[cfg(feature = "timecode")]
    #[must_use]
    pub fn epoch(&self) -> hifitime::Epoch {
        crate::time::gps_epoch(self.week, self.milliseconds)
    }
}
