//! Reading a world document, salvaging what can be salvaged.
//!
//! A document that fails to parse as a whole may still begin with a
//! complete JSON object, for example when a crash left trailing bytes after
//! an older, longer save. The leading object is kept in that case. Documents
//! are parsed as bytes so that a torn tail which is not even valid UTF-8
//! still leaves the leading object reachable.

use erbe_types::Value;
use tracing::warn;

/// How a document's bytes were interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// The whole document is one JSON object.
    Clean(Value),
    /// The document starts with a JSON object followed by garbage.
    Salvaged(Value),
    /// Nothing usable.
    Corrupt {
        /// Why the document was rejected.
        reason: String,
    },
}

/// Interpret the raw bytes of a world document.
///
/// Only objects are accepted, both for a clean parse and for salvage.
pub fn parse_document(bytes: &[u8]) -> Parsed {
    let error = match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Object(map)) => return Parsed::Clean(Value::from(serde_json::Value::Object(map))),
        Ok(other) => {
            return Parsed::Corrupt {
                reason: format!("document root is {}, not an object", Value::from(other).kind()),
            };
        }
        Err(error) => error,
    };

    match salvage_leading_object(bytes) {
        Some(value) => {
            warn!(error = %error, "document has trailing damage; salvaged leading object");
            Parsed::Salvaged(value)
        }
        None => Parsed::Corrupt {
            reason: error.to_string(),
        },
    }
}

/// The first complete JSON value in `bytes`, if it is an object.
pub fn salvage_leading_object(bytes: &[u8]) -> Option<Value> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<serde_json::Value>();
    match stream.next() {
        Some(Ok(value @ serde_json::Value::Object(_))) => Some(Value::from(value)),
        _ => None,
    }
}
