use std::collections::HashMap;
use std::sync::Arc;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{Error, Result};

/// Primitive type of a field as stored in binary messages.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTypeName {
    #[display("BOOL")]
    Bool,
    #[display("HEXBYTE")]
    Hexbyte,
    #[display("CHAR")]
    Char,
    #[display("UCHAR")]
    Uchar,
    #[display("SHORT")]
    Short,
    #[display("USHORT")]
    Ushort,
    #[display("INT")]
    Int,
    #[display("UINT")]
    Uint,
    #[display("LONG")]
    Long,
    #[display("ULONG")]
    Ulong,
    #[display("LONGLONG")]
    Longlong,
    #[display("ULONGLONG")]
    Ulonglong,
    #[display("FLOAT")]
    Float,
    #[display("DOUBLE")]
    Double,
    #[display("SATELLITEID")]
    Satelliteid,
    #[default]
    #[serde(other)]
    #[display("UNKNOWN")]
    Unknown,
}

impl DataTypeName {
    /// Size of the type in a binary message, 0 for [DataTypeName::Unknown].
    #[must_use]
    pub fn natural_width(self) -> u16 {
        use DataTypeName::*;
        match self {
            Hexbyte | Char | Uchar => 1,
            Short | Ushort => 2,
            Bool | Int | Uint | Long | Ulong | Float | Satelliteid => 4,
            Longlong | Ulonglong | Double => 8,
            Unknown => 0,
        }
    }

    #[must_use]
    pub fn is_signed(self) -> bool {
        use DataTypeName::*;
        matches!(self, Char | Short | Int | Long | Longlong)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataType {
    pub name: DataTypeName,
    pub length: u16,
    #[serde(default, deserialize_with = "super::json::nullable_string")]
    pub description: String,
}

impl DataType {
    /// Data type with the natural width for `name`.
    #[must_use]
    pub fn new(name: DataTypeName) -> Self {
        Self {
            name,
            length: name.natural_width(),
            description: String::new(),
        }
    }

    /// Verify the declared length matches the natural width of the type.
    ///
    /// # Errors
    /// [Error::Internal] on a mismatch; a schema defect, not a data error.
    pub fn check_width(&self) -> Result<()> {
        if self.length != self.name.natural_width() {
            return Err(Error::Internal(format!(
                "{} declared with length {} but has width {}",
                self.name,
                self.length,
                self.name.natural_width()
            )));
        }
        Ok(())
    }
}

/// Structural kind of a field.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    #[default]
    Simple,
    Enum,
    Bitfield,
    FixedLengthArray,
    VariableLengthArray,
    String,
    FieldArray,
    /// Numeric id of a command response. Only used by the synthetic response definition.
    ResponseId,
    /// Text of a command response. Only used by the synthetic response definition.
    ResponseStr,
    #[serde(other)]
    Unknown,
}

/// A printf-style conversion string, e.g., `%7.2lf`, split into its parts.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub raw: String,
    /// Digits before the `.`.
    pub width: Option<u32>,
    /// Digits after the `.`.
    pub precision: Option<u32>,
    /// Conversion letters with the `%`, width and precision removed, e.g., `lf`.
    pub letters: String,
}

impl Conversion {
    /// Parse a conversion string of the form `%[width][.precision]letters`.
    ///
    /// # Errors
    /// [Error::Database] if the string does not have that form.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::Database(format!("invalid conversion string {raw:?}"));
        let rest = raw.strip_prefix('%').ok_or_else(invalid)?;

        let digits = |s: &str| s.bytes().take_while(u8::is_ascii_digit).count();

        let n = digits(rest);
        let width = if n > 0 {
            Some(rest[..n].parse().map_err(|_| invalid())?)
        } else {
            None
        };
        let mut rest = &rest[n..];

        let mut precision = None;
        if let Some(after) = rest.strip_prefix('.') {
            let n = digits(after);
            if n > 0 {
                precision = Some(after[..n].parse().map_err(|_| invalid())?);
            }
            rest = &after[n..];
        }

        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(invalid());
        }

        Ok(Self {
            raw: raw.to_string(),
            width,
            precision,
            letters: rest.to_string(),
        })
    }

    #[must_use]
    pub fn is(&self, letters: &str) -> bool {
        self.letters == letters
    }
}

/// One field of a message definition.
///
/// Array and string fields carry their element type in `data_type` and the maximum number of
/// elements in `array_length`. Field arrays carry their element record in `fields`.
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct FieldDefinition {
    #[builder(setter(into))]
    pub name: String,
    pub kind: FieldKind,
    #[builder(default, setter(into))]
    pub description: String,
    #[builder(default)]
    pub data_type: DataType,
    #[builder(default)]
    pub conversion: Option<Conversion>,
    #[builder(default)]
    pub enum_id: Option<String>,
    /// Linked from `enum_id` when the field is added to a database.
    #[builder(default)]
    pub enum_def: Option<Arc<EnumDefinition>>,
    #[builder(default)]
    pub array_length: u32,
    #[builder(default)]
    pub array_length_ref: Option<String>,
    #[builder(default)]
    pub fields: Vec<Arc<FieldDefinition>>,
    /// Bytes occupied by a field array with every element present.
    #[builder(default)]
    pub field_size: u32,
}

impl FieldDefinition {
    /// Conversion letters, or an empty string for fields without a conversion.
    #[must_use]
    pub fn letters(&self) -> &str {
        self.conversion.as_ref().map_or("", |c| c.letters.as_str())
    }

    /// Arrays rendered as a single quoted string in text formats.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.kind == FieldKind::String || matches!(self.letters(), "s" | "S")
    }

    /// Arrays whose elements are separated by the field delimiter in text formats.
    #[must_use]
    pub fn is_csv(&self) -> bool {
        !self.is_string() && !matches!(self.letters(), "Z" | "P")
    }

    #[must_use]
    pub fn precision(&self) -> Option<u32> {
        self.conversion.as_ref().and_then(|c| c.precision)
    }

    #[must_use]
    pub fn width(&self) -> Option<u32> {
        self.conversion.as_ref().and_then(|c| c.width)
    }

    /// Bytes this field occupies in a flattened binary message.
    #[must_use]
    pub fn flattened_size(&self) -> u32 {
        match self.kind {
            FieldKind::FieldArray => self.field_size,
            FieldKind::FixedLengthArray | FieldKind::VariableLengthArray | FieldKind::String => {
                self.array_length * u32::from(self.data_type.length)
            }
            _ => u32::from(self.data_type.length),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enumerator {
    pub name: String,
    pub value: i32,
    #[serde(default, deserialize_with = "super::json::nullable_string")]
    pub description: String,
}

/// Named set of integer values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDefinition {
    pub id: String,
    pub name: String,
    pub enumerators: Vec<Enumerator>,
    by_name: HashMap<String, i32>,
    by_value: HashMap<i32, usize>,
    by_description: HashMap<String, i32>,
}

impl EnumDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, enumerators: Vec<Enumerator>) -> Self {
        let mut by_name = HashMap::with_capacity(enumerators.len());
        let mut by_value = HashMap::with_capacity(enumerators.len());
        let mut by_description = HashMap::new();
        for (idx, e) in enumerators.iter().enumerate() {
            by_name.insert(e.name.clone(), e.value);
            by_value.entry(e.value).or_insert(idx);
            if !e.description.is_empty() {
                by_description.insert(e.description.clone(), e.value);
            }
        }
        Self {
            id: id.into(),
            name: name.into(),
            enumerators,
            by_name,
            by_value,
            by_description,
        }
    }

    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.by_value
            .get(&value)
            .map(|idx| self.enumerators[*idx].name.as_str())
    }

    /// Look up a value by its description, used for response text.
    #[must_use]
    pub fn value_of_description(&self, description: &str) -> Option<i32> {
        self.by_description.get(description).copied()
    }
}

/// A message and each version of its field layout keyed by definition CRC.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    pub id: String,
    pub log_id: u16,
    pub name: String,
    pub description: String,
    pub latest_message_crc: u32,
    pub message_style: String,
    pub fields: HashMap<u32, Vec<Arc<FieldDefinition>>>,
}

impl MessageDefinition {
    /// Field layout for a definition CRC, falling back to the latest layout when the CRC is
    /// not known.
    #[must_use]
    pub fn fields_for_crc(&self, crc: u32) -> &[Arc<FieldDefinition>] {
        self.fields
            .get(&crc)
            .or_else(|| self.fields.get(&self.latest_message_crc))
            .map_or(&[], Vec::as_slice)
    }

    /// Field layout of the latest definition.
    #[must_use]
    pub fn latest_fields(&self) -> &[Arc<FieldDefinition>] {
        self.fields_for_crc(self.latest_message_crc)
    }
}
