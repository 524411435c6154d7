//! Records and read results.
//!
//! A `Record` keeps the JSON document and its attachment as two separate
//! fields. Only `document` is ever encoded into the `.json` file; the
//! attachment travels through its own sibling file. A document never
//! carries a top-level `attachment` member of its own.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Key under which the attachment appears in the merged JSON view.
pub const ATTACHMENT_KEY: &str = "attachment";

/// A stored document plus its optional attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub document: Value,
    pub attachment: Option<Bytes>,
}

impl Record {
    /// A record from a document.
    ///
    /// Same as [`Record::from_value`]: a top-level `attachment` member is
    /// moved out of the document.
    pub fn new(document: Value) -> Self {
        Self::from_value(document)
    }

    pub fn with_attachment(mut self, attachment: impl Into<Bytes>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    /// Split a merged JSON value into document and attachment.
    ///
    /// A top-level `"attachment"` member of an object is always moved out of
    /// the document. A string becomes the attachment bytes as is; any other
    /// value is stored as its JSON text.
    pub fn from_value(mut value: Value) -> Self {
        let attachment = match &mut value {
            Value::Object(map) => match map.remove(ATTACHMENT_KEY) {
                Some(Value::String(s)) => Some(Bytes::from(s)),
                Some(other) => Some(Bytes::from(other.to_string())),
                None => None,
            },
            _ => None,
        };
        Self {
            document: value,
            attachment,
        }
    }

    /// Merge the attachment back into the document as a string member.
    ///
    /// Non-UTF-8 attachment bytes are replaced lossily. Attachments on
    /// non-object documents are dropped from the merged view.
    pub fn into_value(self) -> Value {
        let Record {
            mut document,
            attachment,
        } = self;
        if let (Value::Object(map), Some(attachment)) = (&mut document, attachment) {
            map.insert(
                ATTACHMENT_KEY.to_string(),
                Value::String(String::from_utf8_lossy(&attachment).into_owned()),
            );
        }
        document
    }

    /// Build a record from any serializable type.
    pub fn from_serializable<T: Serialize + ?Sized>(path: &str, data: &T) -> Result<Self> {
        let value = serde_json::to_value(data).map_err(|e| Error::Encode {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_value(value))
    }

    /// Deserialize the document (without the attachment) into `T`.
    pub fn document_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        T::deserialize(&self.document).map_err(|e| Error::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    /// The attachment as text, if it is present and valid UTF-8.
    pub fn attachment_str(&self) -> Option<&str> {
        self.attachment
            .as_deref()
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Encode the document for the `.json` file.
    ///
    /// Fails if `document` was given an `attachment` member by hand, since
    /// that member would otherwise land in the `.json` file.
    pub(crate) fn encode_document(&self, path: &str) -> Result<Bytes> {
        if let Value::Object(map) = &self.document {
            if map.contains_key(ATTACHMENT_KEY) {
                return Err(Error::Encode {
                    path: path.to_string(),
                    message: format!("document has a top-level {:?} member", ATTACHMENT_KEY),
                });
            }
        }
        serde_json::to_vec(&self.document)
            .map(Bytes::from)
            .map_err(|e| Error::Encode {
                path: path.to_string(),
                message: e.to_string(),
            })
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Record::from_value(value)
    }
}

/// The outcome of a read.
///
/// A path holding a document reads as `Record`. A path without a document
/// reads as the listing of the directory at that path.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Record(Record),
    /// Record names in the directory, `.json` suffix removed.
    Listing(Vec<String>),
}

impl Entry {
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Entry::Record(record) => Some(record),
            Entry::Listing(_) => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Entry::Record(record) => Some(record),
            Entry::Listing(_) => None,
        }
    }

    pub fn into_listing(self) -> Option<Vec<String>> {
        match self {
            Entry::Listing(names) => Some(names),
            Entry::Record(_) => None,
        }
    }

    /// JSON view: the merged record, or an array of names.
    pub fn into_value(self) -> Value {
        match self {
            Entry::Record(record) => record.into_value(),
            Entry::Listing(names) => Value::Array(names.into_iter().map(Value::String).collect()),
        }
    }
}
