//! Message and enumeration definitions loaded from a JSON database.
//!
//! Every decoder, the encoder and the commander resolve message layouts through a
//! [MessageDatabase]. The database is immutable once shared; mutations require exclusive access.
//!
//! # Example
//! ```no_run
//! use novatel::database::MessageDatabase;
//!
//! let db = MessageDatabase::from_file("messages.json").unwrap();
//! let bestpos = db.get_msg_def_by_name("BESTPOS").unwrap();
//! assert_eq!(bestpos.log_id, 42);
//! ```
mod json;
mod schema;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

pub use schema::{
    Conversion, DataType, DataTypeName, EnumDefinition, Enumerator, FieldDefinition, FieldKind,
    MessageDefinition,
};

use crate::format::message_format;
use crate::metadata::MessageId;
use crate::Result;

#[derive(Debug, Default, Clone)]
pub struct MessageDatabase {
    messages: Vec<Arc<MessageDefinition>>,
    enums: Vec<Arc<EnumDefinition>>,
    msg_by_name: HashMap<String, Arc<MessageDefinition>>,
    msg_by_id: HashMap<u16, Arc<MessageDefinition>>,
    enum_by_id: HashMap<String, Arc<EnumDefinition>>,
    enum_by_name: HashMap<String, Arc<EnumDefinition>>,
}

impl MessageDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a database document from a file.
    ///
    /// # Errors
    /// [crate::Error::Io] if the file cannot be read, [crate::Error::Json] if it is not a valid
    /// database document and [crate::Error::Database] if a definition is inconsistent.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Load a database document from a reader.
    ///
    /// # Errors
    /// See [MessageDatabase::from_file].
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let doc: json::Document = serde_json::from_reader(reader)?;
        Self::from_document(doc)
    }

    /// Load a database document from a string.
    ///
    /// # Errors
    /// See [MessageDatabase::from_file].
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        let doc: json::Document = serde_json::from_str(s)?;
        Self::from_document(doc)
    }

    fn from_document(doc: json::Document) -> Result<Self> {
        let enums = doc
            .enums
            .into_iter()
            .map(json::RawEnum::into_definition)
            .collect();
        let messages = doc
            .messages
            .into_iter()
            .map(json::RawMessage::into_definition)
            .collect::<Result<Vec<_>>>()?;

        let mut db = Self::new();
        db.append_enumerations(enums);
        db.append_messages(messages);
        debug!(
            messages = db.messages.len(),
            enums = db.enums.len(),
            "loaded message database"
        );
        Ok(db)
    }

    /// Add messages, replacing any existing message with the same log id or name.
    pub fn append_messages(&mut self, messages: Vec<MessageDefinition>) {
        for mut msg in messages {
            for fields in msg.fields.values_mut() {
                link_enums(&self.enum_by_id, fields);
            }
            self.messages
                .retain(|m| m.log_id != msg.log_id && m.name != msg.name);
            self.messages.push(Arc::new(msg));
        }
        self.index_messages();
    }

    /// Add enumerations, replacing any existing enumeration with the same id or name. Fields
    /// already in the database are relinked.
    pub fn append_enumerations(&mut self, enums: Vec<EnumDefinition>) {
        for def in enums {
            self.enums.retain(|e| e.id != def.id && e.name != def.name);
            self.enums.push(Arc::new(def));
        }
        self.index_enums();
        self.relink();
    }

    /// Add every message and enumeration of `other`, replacing existing entries.
    pub fn merge(&mut self, other: &MessageDatabase) {
        self.append_enumerations(other.enums.iter().map(|e| (**e).clone()).collect());
        self.append_messages(other.messages.iter().map(|m| (**m).clone()).collect());
    }

    /// Remove a message by name. Returns `true` if it existed.
    pub fn remove_message(&mut self, name: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.name != name);
        self.index_messages();
        before != self.messages.len()
    }

    /// Remove an enumeration by name. Fields linked to it are unlinked.
    pub fn remove_enumeration(&mut self, name: &str) -> bool {
        let before = self.enums.len();
        self.enums.retain(|e| e.name != name);
        self.index_enums();
        self.relink();
        before != self.enums.len()
    }

    fn index_messages(&mut self) {
        self.msg_by_name = self
            .messages
            .iter()
            .map(|m| (m.name.clone(), m.clone()))
            .collect();
        self.msg_by_id = self.messages.iter().map(|m| (m.log_id, m.clone())).collect();
    }

    fn index_enums(&mut self) {
        self.enum_by_id = self.enums.iter().map(|e| (e.id.clone(), e.clone())).collect();
        self.enum_by_name = self
            .enums
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();
    }

    fn relink(&mut self) {
        for msg in &mut self.messages {
            let msg = Arc::make_mut(msg);
            for fields in msg.fields.values_mut() {
                link_enums(&self.enum_by_id, fields);
            }
        }
        self.index_messages();
    }

    #[must_use]
    pub fn messages(&self) -> &[Arc<MessageDefinition>] {
        &self.messages
    }

    #[must_use]
    pub fn enums(&self) -> &[Arc<EnumDefinition>] {
        &self.enums
    }

    #[must_use]
    pub fn get_msg_def(&self, log_id: u16) -> Option<Arc<MessageDefinition>> {
        self.msg_by_id.get(&log_id).cloned()
    }

    #[must_use]
    pub fn get_msg_def_by_name(&self, name: &str) -> Option<Arc<MessageDefinition>> {
        self.msg_by_name.get(name).cloned()
    }

    #[must_use]
    pub fn get_enum_by_id(&self, id: &str) -> Option<Arc<EnumDefinition>> {
        self.enum_by_id.get(id).cloned()
    }

    #[must_use]
    pub fn get_enum_by_name(&self, name: &str) -> Option<Arc<EnumDefinition>> {
        self.enum_by_name.get(name).cloned()
    }

    /// Convert a message name as it appears in a header, e.g., `BESTPOSA_1`, to a packed message
    /// id. Returns 0 if the name is not in the database.
    ///
    /// A `_N` suffix is the sibling id. A name found as-is is abbreviated ASCII, otherwise a
    /// trailing `A`, `B` or `R` selects ASCII, binary or an ASCII response.
    #[must_use]
    pub fn msg_name_to_msg_id(&self, name: &str) -> u32 {
        let mut name = name;
        let mut sibling_id = 0;
        let bytes = name.as_bytes();
        if bytes.len() >= 2 && bytes[bytes.len() - 2] == b'_' {
            sibling_id = bytes[bytes.len() - 1].wrapping_sub(b'0');
            name = &name[..name.len() - 2];
        }

        if let Some(def) = self.msg_by_name.get(name) {
            return MessageId::new(def.log_id, sibling_id, message_format::ABBREV, false).pack();
        }

        let (stripped, format, response) = match name.as_bytes().last() {
            Some(b'R') => (&name[..name.len() - 1], message_format::ASCII, true),
            Some(b'A') => (&name[..name.len() - 1], message_format::ASCII, false),
            Some(b'B') => (&name[..name.len() - 1], message_format::BINARY, false),
            _ => (name, message_format::ABBREV, false),
        };

        self.msg_by_name.get(stripped).map_or(0, |def| {
            MessageId::new(def.log_id, sibling_id, format, response).pack()
        })
    }

    /// Inverse of [MessageDatabase::msg_name_to_msg_id]. Ids not in the database are named
    /// `UNKNOWN`.
    #[must_use]
    pub fn msg_id_to_msg_name(&self, msg_id: u32) -> String {
        let id = MessageId::unpack(msg_id);
        let mut name = self
            .msg_by_id
            .get(&id.id)
            .map_or_else(|| "UNKNOWN".to_string(), |def| def.name.clone());

        if id.response {
            name.push('R');
        } else if id.format == message_format::BINARY {
            name.push('B');
        } else if id.format == message_format::ASCII {
            name.push('A');
        }
        if id.sibling_id != 0 {
            name.push_str(&format!("_{}", id.sibling_id));
        }
        name
    }
}

fn link_enums(enums: &HashMap<String, Arc<EnumDefinition>>, fields: &mut [Arc<FieldDefinition>]) {
    for field in fields {
        let field = Arc::make_mut(field);
        match field.kind {
            FieldKind::Enum => {
                field.enum_def = field.enum_id.as_ref().and_then(|id| enums.get(id).cloned());
                if field.enum_def.is_none() {
                    warn!(field = %field.name, enum_id = ?field.enum_id, "enum definition not found");
                }
            }
            FieldKind::FieldArray => link_enums(enums, &mut field.fields),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const DB: &str = r#"{
        "enums": [
            {"_id": "e-sol", "name": "SolStatus", "enumerators": [
                {"name": "SOL_COMPUTED", "value": 0, "description": null},
                {"name": "INSUFFICIENT_OBS", "value": 1, "description": "Insufficient observations"}
            ]}
        ],
        "messages": [
            {"_id": "m-bestpos", "messageID": 42, "name": "BESTPOS", "description": "Best position",
             "latestMsgDefCrc": "51213", "messageStyle": null,
             "fields": {"51213": [
                {"name": "sol_stat", "type": "ENUM", "enumID": "e-sol", "description": null,
                 "dataType": {"name": "INT", "length": 4, "description": null}},
                {"name": "lat", "type": "SIMPLE", "conversionString": "%.11lf", "description": null,
                 "dataType": {"name": "DOUBLE", "length": 8, "description": null}}
             ]}}
        ]
    }"#;

    fn db() -> MessageDatabase {
        MessageDatabase::from_str(DB).unwrap()
    }

    #[test]
    fn enum_fields_are_linked() {
        let db = db();
        let def = db.get_msg_def(42).unwrap();
        let field = &def.latest_fields()[0];
        let linked = field.enum_def.as_ref().unwrap();
        assert_eq!(linked.name, "SolStatus");
        assert_eq!(linked.value_of("INSUFFICIENT_OBS"), Some(1));
    }

    #[test]
    fn name_to_id() {
        let db = db();
        let abbrev = MessageId::unpack(db.msg_name_to_msg_id("BESTPOS"));
        assert_eq!(abbrev, MessageId::new(42, 0, message_format::ABBREV, false));

        let ascii = MessageId::unpack(db.msg_name_to_msg_id("BESTPOSA_1"));
        assert_eq!(ascii, MessageId::new(42, 1, message_format::ASCII, false));

        let binary = MessageId::unpack(db.msg_name_to_msg_id("BESTPOSB"));
        assert_eq!(binary, MessageId::new(42, 0, message_format::BINARY, false));

        let response = MessageId::unpack(db.msg_name_to_msg_id("BESTPOSR"));
        assert!(response.response);

        assert_eq!(db.msg_name_to_msg_id("NOTAMESSAGEA"), 0);
    }

    #[test]
    fn id_to_name() {
        let db = db();
        for name in ["BESTPOS", "BESTPOSA", "BESTPOSB_2", "BESTPOSR"] {
            assert_eq!(db.msg_id_to_msg_name(db.msg_name_to_msg_id(name)), name);
        }
        let unknown = MessageId::new(9999, 0, message_format::ASCII, false).pack();
        assert_eq!(db.msg_id_to_msg_name(unknown), "UNKNOWNA");
    }

    #[test]
    fn append_replaces_by_id() {
        let mut db = db();
        let mut replacement = (*db.get_msg_def(42).unwrap()).clone();
        replacement.description = "replaced".into();
        db.append_messages(vec![replacement]);
        assert_eq!(db.messages().len(), 1);
        assert_eq!(db.get_msg_def_by_name("BESTPOS").unwrap().description, "replaced");
    }

    #[test]
    fn removing_enum_unlinks_fields() {
        let mut db = db();
        assert!(db.remove_enumeration("SolStatus"));
        assert!(!db.remove_enumeration("SolStatus"));
        let def = db.get_msg_def(42).unwrap();
        assert!(def.latest_fields()[0].enum_def.is_none());
        assert!(db.get_enum_by_id("e-sol").is_none());
    }

    #[test]
    fn merge_adds_missing() {
        let mut db = MessageDatabase::new();
        db.merge(&self::db());
        assert!(db.get_msg_def(42).is_some());
        assert!(db.get_enum_by_name("SolStatus").is_some());
        assert!(db.remove_message("BESTPOS"));
        assert!(db.get_msg_def(42).is_none());
    }

    #[test]
    fn from_file() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("messages.json");
        fs::write(&path, DB).unwrap();

        let db = MessageDatabase::from_file(&path).unwrap();
        assert_eq!(db.messages().len(), 1);
        assert_eq!(db.enums().len(), 1);

        assert!(matches!(
            MessageDatabase::from_file(tmpdir.path().join("missing.json")),
            Err(crate::Error::Io(_))
        ));
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            MessageDatabase::from_file(&path),
            Err(crate::Error::Json(_))
        ));
    }
}
