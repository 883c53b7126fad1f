#![doc = include_str!("../README.md")]

mod error;

pub mod commander;
pub mod crc;
pub mod database;
pub mod decoder;
pub mod encoder;
pub mod field;
pub mod filter;
pub mod format;
pub mod framer;
pub mod header;
pub mod metadata;
pub mod parser;

#[cfg(feature = "timecode")]
pub mod time;

pub use commander::Commander;
pub use database::MessageDatabase;
pub use decoder::MessageDecoder;
pub use encoder::{Encoder, MessageData};
pub use error::{Error, Result};
pub use field::{FieldContainer, FieldValue};
pub use filter::Filter;
pub use format::{EncodeFormat, HeaderFormat};
pub use framer::{FrameStatus, Framer};
pub use header::{HeaderDecoder, IntermediateHeader};
pub use metadata::{MeasurementSource, MetaData, TimeStatus};
pub use parser::{parse_threaded, FileParser, IntermediateMessage, ParsedMessage, Parser};
