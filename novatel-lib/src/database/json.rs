//! Serde model of the JSON message database document.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use super::schema::{
    Conversion, DataType, EnumDefinition, Enumerator, FieldDefinition, FieldKind,
    MessageDefinition,
};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub(super) struct Document {
    #[serde(default)]
    pub enums: Vec<RawEnum>,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawEnum {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    enumerators: Vec<RawEnumerator>,
}

#[derive(Debug, Deserialize)]
struct RawEnumerator {
    name: String,
    value: i32,
    #[serde(default, deserialize_with = "nullable_string")]
    description: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawMessage {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "messageID")]
    message_id: u16,
    name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    description: String,
    #[serde(rename = "latestMsgDefCrc", deserialize_with = "crc_value")]
    latest_msg_def_crc: u32,
    #[serde(rename = "messageStyle", default, deserialize_with = "nullable_string")]
    message_style: String,
    fields: BTreeMap<String, Vec<RawField>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: FieldKind,
    #[serde(default, deserialize_with = "nullable_string")]
    description: String,
    #[serde(default)]
    data_type: Option<DataType>,
    #[serde(default)]
    conversion_string: Option<String>,
    // Present but null is a corrupt database for ENUM fields, so keep the distinction.
    #[serde(rename = "enumID", default, deserialize_with = "present")]
    enum_id: Option<Option<String>>,
    #[serde(default)]
    array_length: Option<u32>,
    #[serde(default)]
    array_length_ref: Option<String>,
    #[serde(default)]
    fields: Option<Vec<RawField>>,
}

pub(super) fn nullable_string<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

fn present<'de, D, T>(d: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(d)?))
}

/// Definition CRCs are written as decimal strings, older databases use numbers.
fn crc_value<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Crc {
        Num(u32),
        Str(String),
    }
    match Crc::deserialize(d)? {
        Crc::Num(n) => Ok(n),
        Crc::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl RawEnum {
    pub(super) fn into_definition(self) -> EnumDefinition {
        let enumerators = self
            .enumerators
            .into_iter()
            .map(|e| Enumerator {
                name: e.name,
                value: e.value,
                description: e.description,
            })
            .collect();
        EnumDefinition::new(self.id, self.name, enumerators)
    }
}

impl RawMessage {
    pub(super) fn into_definition(self) -> Result<MessageDefinition> {
        let mut fields = HashMap::with_capacity(self.fields.len());
        for (crc, raw_fields) in self.fields {
            let crc: u32 = crc.trim().parse().map_err(|_| {
                Error::Database(format!("message {}: invalid definition crc {crc:?}", self.name))
            })?;
            let (defs, _) = parse_fields(raw_fields)?;
            fields.insert(crc, defs);
        }
        Ok(MessageDefinition {
            id: self.id,
            log_id: self.message_id,
            name: self.name,
            description: self.description,
            latest_message_crc: self.latest_msg_def_crc,
            message_style: self.message_style,
            fields,
        })
    }
}

/// Convert raw fields, returning the definitions and the number of bytes they occupy when every
/// array is at its maximum length.
fn parse_fields(raw: Vec<RawField>) -> Result<(Vec<Arc<FieldDefinition>>, u32)> {
    let mut defs = Vec::with_capacity(raw.len());
    let mut size = 0u32;
    for field in raw {
        let (def, field_size) = parse_field(field)?;
        size += field_size;
        defs.push(Arc::new(def));
    }
    Ok((defs, size))
}

fn parse_field(raw: RawField) -> Result<(FieldDefinition, u32)> {
    let data_type = raw.data_type.unwrap_or_default();
    let conversion = match raw.conversion_string.as_deref() {
        None | Some("") => None,
        Some(s) => Some(Conversion::parse(s)?),
    };
    let array_length = raw.array_length.unwrap_or(0);
    let length = u32::from(data_type.length);

    let mut def = FieldDefinition::builder()
        .name(raw.name)
        .kind(raw.kind)
        .description(raw.description)
        .data_type(data_type)
        .conversion(conversion)
        .array_length(array_length)
        .array_length_ref(raw.array_length_ref)
        .build();

    let size = match def.kind {
        FieldKind::Enum => {
            let Some(Some(enum_id)) = raw.enum_id else {
                return Err(Error::Database(format!(
                    "enum field {} has no enumID",
                    def.name
                )));
            };
            def.enum_id = Some(enum_id);
            length
        }
        FieldKind::FixedLengthArray | FieldKind::VariableLengthArray | FieldKind::String => {
            length * array_length
        }
        FieldKind::FieldArray => {
            let (children, child_size) = parse_fields(raw.fields.unwrap_or_default())?;
            def.fields = children;
            def.field_size = array_length * child_size;
            // Field arrays are variable length on the wire; the parent sum only counts fixed
            // parts.
            0
        }
        _ => length,
    };
    Ok((def, size))
}
