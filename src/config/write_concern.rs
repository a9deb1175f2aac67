//! Write concern decoding
//!
//! The `write_concern` setting is JSON, optionally base64-encoded:
//!
//! ```text
//! {"w": "majority", "wtimeout": 5000, "j": true}
//! eyJ3IjogIm1ham9yaXR5In0=
//! ```

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bson::Document;
use serde::Deserialize;
use serde_json::Value;

/// Acknowledgment requirement (`w`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawAcknowledgment")]
pub enum Acknowledgment {
    /// Acknowledged by this many nodes
    Nodes(u32),
    /// Acknowledged by a majority of voting members
    Majority,
    /// Acknowledged by members matching a custom tag set
    Tag(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAcknowledgment {
    Nodes(u32),
    Name(String),
}

impl From<RawAcknowledgment> for Acknowledgment {
    fn from(raw: RawAcknowledgment) -> Self {
        match raw {
            RawAcknowledgment::Nodes(n) => Acknowledgment::Nodes(n),
            RawAcknowledgment::Name(name) if name == "majority" => Acknowledgment::Majority,
            RawAcknowledgment::Name(name) => Acknowledgment::Tag(name),
        }
    }
}

/// Durability policy applied to writes on the shared session
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteConcern {
    /// Required acknowledgment
    pub w: Option<Acknowledgment>,
    /// Named acknowledgment mode; takes precedence over `w`
    pub wmode: Option<String>,
    /// Acknowledgment timeout in milliseconds
    pub wtimeout: Option<u64>,
    /// Wait for the write to be flushed to disk
    pub fsync: bool,
    /// Wait for the write to reach the journal
    pub j: bool,
}

impl WriteConcern {
    /// Decode a write concern from literal or base64-encoded JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the input is not valid JSON for the
    /// policy structure, or if every field ends up at its zero value.
    pub fn decode(raw: &str) -> Result<Self> {
        let input = match BASE64.decode(raw) {
            Ok(bytes) => bytes,
            Err(_) => raw.as_bytes().to_vec(),
        };

        let invalid = |e: serde_json::Error| {
            Error::Validation(format!("error unmarshalling write_concern: {}", e))
        };
        let value: Value = serde_json::from_slice(&input).map_err(invalid)?;
        let concern: WriteConcern = serde_json::from_value(fold_keys(value)).map_err(invalid)?;

        if concern.is_empty() {
            return Err(Error::Validation(
                "provided write_concern values did not map to any write concern fields".into(),
            ));
        }

        Ok(concern)
    }

    /// Whether every field is at its zero value
    pub fn is_empty(&self) -> bool {
        matches!(self.w, None | Some(Acknowledgment::Nodes(0)))
            && self.wmode.as_deref().map_or(true, str::is_empty)
            && self.wtimeout.unwrap_or(0) == 0
            && !self.fsync
            && !self.j
    }

    /// Render as the `writeConcern` document sent with write commands
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();

        if let Some(mode) = self.wmode.as_deref().filter(|m| !m.is_empty()) {
            doc.insert("w", mode);
        } else if let Some(w) = &self.w {
            match w {
                Acknowledgment::Nodes(n) => {
                    doc.insert("w", i64::from(*n));
                }
                Acknowledgment::Majority => {
                    doc.insert("w", "majority");
                }
                Acknowledgment::Tag(tag) => {
                    doc.insert("w", tag.as_str());
                }
            }
        }

        if let Some(ms) = self.wtimeout.filter(|ms| *ms > 0) {
            doc.insert("wtimeout", ms as i64);
        }
        if self.j {
            doc.insert("j", true);
        }
        if self.fsync {
            doc.insert("fsync", true);
        }

        doc
    }

    /// Attach this policy to a write command
    pub fn apply_to(&self, command: &mut Document) {
        command.insert("writeConcern", self.to_document());
    }
}

/// Field names match regardless of case; the first spelling of a key wins
fn fold_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut folded = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                folded.entry(key.to_lowercase()).or_insert(value);
            }
            Value::Object(folded)
        }
        other => other,
    }
}
