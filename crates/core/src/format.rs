//! Wire-format selector for the documents modality
//!
//! A tagged enum replaces integer format codes, so an unsupported input
//! format is unrepresentable rather than a runtime branch.

use std::fmt;

/// Wire formats the documents modality can parse and emit
///
/// Regardless of the caller's format, documents are persisted in exactly
/// one canonical binary encoding: MsgPack. It is compact, schema-less,
/// preserves JSON's value domain exactly, and streams well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocFormat {
    /// Textual JSON; outputs are NUL-terminated for C consumers
    Json,
    /// RFC 6902 JSON Patch; accepted on input only, as a mutation
    JsonPatch,
    /// MessagePack, the canonical on-disk encoding
    MsgPack,
    /// BSON; top-level value must be an object
    Bson,
    /// CBOR
    Cbor,
    /// UBJSON
    UbJson,
}

impl DocFormat {
    /// The canonical internal encoding used for persisted documents
    pub const CANONICAL: DocFormat = DocFormat::MsgPack;

    /// Whether this format can be emitted, not only parsed
    ///
    /// `JsonPatch` describes a mutation, not a document, so dumping to it
    /// is rejected as an invalid argument.
    pub fn is_emittable(&self) -> bool {
        !matches!(self, DocFormat::JsonPatch)
    }

    /// Short lowercase name, used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            DocFormat::Json => "json",
            DocFormat::JsonPatch => "json-patch",
            DocFormat::MsgPack => "msgpack",
            DocFormat::Bson => "bson",
            DocFormat::Cbor => "cbor",
            DocFormat::UbJson => "ubjson",
        }
    }
}

impl fmt::Display for DocFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_is_msgpack() {
        assert_eq!(DocFormat::CANONICAL, DocFormat::MsgPack);
    }

    #[test]
    fn test_json_patch_is_input_only() {
        assert!(!DocFormat::JsonPatch.is_emittable());
        assert!(DocFormat::Json.is_emittable());
        assert!(DocFormat::UbJson.is_emittable());
    }
}
