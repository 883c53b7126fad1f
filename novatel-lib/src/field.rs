//! Format independent message body representation.
//!
//! A decoded body is a `Vec<FieldContainer>` in definition order. Arrays hold one container per
//! element and field arrays hold one container per record, each record itself an
//! [FieldValue::Array] of the record's fields.
use std::fmt;
use std::sync::Arc;

use crate::database::{DataTypeName, FieldDefinition};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Array(Vec<FieldContainer>),
}

impl FieldValue {
    /// Integer value widened to `i128`, `None` for non-integer values. Bools are 0 or 1.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            FieldValue::Bool(v) => i128::from(v),
            FieldValue::I8(v) => i128::from(v),
            FieldValue::U8(v) => i128::from(v),
            FieldValue::I16(v) => i128::from(v),
            FieldValue::U16(v) => i128::from(v),
            FieldValue::I32(v) => i128::from(v),
            FieldValue::U32(v) => i128::from(v),
            FieldValue::I64(v) => i128::from(v),
            FieldValue::U64(v) => i128::from(v),
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Numeric value as `f64`; integers are converted.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            FieldValue::F32(v) => Some(f64::from(v)),
            FieldValue::F64(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[FieldContainer]> {
        match self {
            FieldValue::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::I8(v) => write!(f, "{v}"),
            FieldValue::U8(v) => write!(f, "{v}"),
            FieldValue::I16(v) => write!(f, "{v}"),
            FieldValue::U16(v) => write!(f, "{v}"),
            FieldValue::I32(v) => write!(f, "{v}"),
            FieldValue::U32(v) => write!(f, "{v}"),
            FieldValue::I64(v) => write!(f, "{v}"),
            FieldValue::U64(v) => write!(f, "{v}"),
            FieldValue::F32(v) => write!(f, "{v}"),
            FieldValue::F64(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{v:?}"),
            FieldValue::Array(v) => {
                write!(f, "[")?;
                for (i, c) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", c.value)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A decoded value and the definition it was decoded with.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldContainer {
    pub value: FieldValue,
    pub def: Arc<FieldDefinition>,
}

impl FieldContainer {
    #[must_use]
    pub fn new(value: FieldValue, def: Arc<FieldDefinition>) -> Self {
        Self { value, def }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Nested containers of an array or field array; empty for scalars.
    #[must_use]
    pub fn children(&self) -> &[FieldContainer] {
        self.value.as_array().unwrap_or(&[])
    }

    /// Array of characters as text, stopping at the first NUL.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match &self.value {
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Array(items) => Some(
                items
                    .iter()
                    .map_while(|c| match c.value {
                        FieldValue::I8(0) | FieldValue::U8(0) => None,
                        FieldValue::I8(v) => Some(v as u8 as char),
                        FieldValue::U8(v) => Some(v as char),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Representation of a scalar field, from its data type class and declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ValueKind {
    /// # Errors
    /// [Error::Internal] if the declared length is not a valid width for the type class.
    pub(crate) fn of(def: &FieldDefinition) -> Result<Self> {
        use DataTypeName::*;
        let length = def.data_type.length;
        let kind = match def.data_type.name {
            Bool => Some(ValueKind::Bool),
            Float | Double => match length {
                4 => Some(ValueKind::F32),
                8 => Some(ValueKind::F64),
                _ => None,
            },
            Char | Short | Int | Long | Longlong => match length {
                1 => Some(ValueKind::I8),
                2 => Some(ValueKind::I16),
                4 => Some(ValueKind::I32),
                8 => Some(ValueKind::I64),
                _ => None,
            },
            Hexbyte | Uchar | Ushort | Uint | Ulong | Ulonglong | Satelliteid => match length {
                1 => Some(ValueKind::U8),
                2 => Some(ValueKind::U16),
                4 => Some(ValueKind::U32),
                8 => Some(ValueKind::U64),
                _ => None,
            },
            Unknown => None,
        };
        kind.ok_or_else(|| {
            Error::Internal(format!(
                "field {}: {} with length {length} has no representation",
                def.name, def.data_type.name
            ))
        })
    }

    #[must_use]
    pub(crate) fn is_float(self) -> bool {
        matches!(self, ValueKind::F32 | ValueKind::F64)
    }

    /// Value of this kind from a wide integer. Integers wrap to the width of the kind.
    #[must_use]
    pub(crate) fn wrap(self, v: i128) -> FieldValue {
        match self {
            ValueKind::Bool => FieldValue::Bool(v != 0),
            ValueKind::I8 => FieldValue::I8(v as i8),
            ValueKind::U8 => FieldValue::U8(v as u8),
            ValueKind::I16 => FieldValue::I16(v as i16),
            ValueKind::U16 => FieldValue::U16(v as u16),
            ValueKind::I32 => FieldValue::I32(v as i32),
            ValueKind::U32 => FieldValue::U32(v as u32),
            ValueKind::I64 => FieldValue::I64(v as i64),
            ValueKind::U64 => FieldValue::U64(v as u64),
            ValueKind::F32 => FieldValue::F32(v as f32),
            ValueKind::F64 => FieldValue::F64(v as f64),
        }
    }

    /// Value of this kind from a float. Integers take the rounded value and wrap.
    #[must_use]
    pub(crate) fn from_f64(self, v: f64) -> FieldValue {
        match self {
            ValueKind::F32 => FieldValue::F32(v as f32),
            ValueKind::F64 => FieldValue::F64(v),
            _ => self.wrap(v.round() as i64 as i128),
        }
    }
}

/// Find a top level field by name.
#[must_use]
pub fn find_field<'a>(fields: &'a [FieldContainer], name: &str) -> Option<&'a FieldContainer> {
    fields.iter().find(|f| f.def.name == name)
}
