//! Wire-format translation for the documents modality
//!
//! One pair of choke points, [`parse_any`] and [`dump_any`], isolates
//! every format library behind the tagged [`DocFormat`] selector. The
//! rest of the modality only ever sees a parsed value tree.
//!
//! Serializers stream straight into the caller's sink (an arena writer or
//! a scratch buffer); no intermediate allocations besides what the format
//! libraries need internally.

use lamina_core::{DocFormat, LaminaError, Result};
use serde_json::Value;
use std::io::{self, Write};

use super::ubjson;

/// Parse `bytes` according to the declared format
///
/// `task` is the batch row the bytes came from; it is carried into the
/// error so a failing row inside a large batch can be identified.
/// `max_depth` caps container nesting uniformly across formats;
/// violations surface as `invalid_argument`, not a parse failure.
pub fn parse_any(bytes: &[u8], format: DocFormat, task: usize, max_depth: usize) -> Result<Value> {
    let fail = |message: String| LaminaError::parse_failed(task, message);
    let value = match format {
        DocFormat::Json | DocFormat::JsonPatch => {
            // Textual JSON travels NUL-terminated for C consumers; accept
            // one trailing terminator on the way back in.
            let trimmed = bytes.strip_suffix(&[0u8]).unwrap_or(bytes);
            serde_json::from_slice(trimmed).map_err(|e| fail(e.to_string()))
        }
        DocFormat::MsgPack => rmp_serde::from_slice(bytes).map_err(|e| fail(e.to_string())),
        DocFormat::Bson => bson::from_slice(bytes).map_err(|e| fail(e.to_string())),
        DocFormat::Cbor => ciborium::from_reader(bytes).map_err(|e| fail(e.to_string())),
        DocFormat::UbJson => ubjson::from_slice(bytes, max_depth).map_err(|e| match e {
            ubjson::DecodeError::TooDeep => LaminaError::invalid_argument(format!(
                "task {task} document exceeds nesting depth {max_depth}"
            )),
            malformed => fail(malformed.to_string()),
        }),
    }?;
    if value_depth(&value) > max_depth {
        return Err(LaminaError::invalid_argument(format!(
            "task {task} document exceeds nesting depth {max_depth}"
        )));
    }
    Ok(value)
}

/// Number of nested containers along the deepest path; scalars are 0
fn value_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(value_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(value_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Serialize a value tree in the requested format
///
/// `JsonPatch` describes a mutation, not a document, and is rejected.
/// Textual JSON is *not* NUL-terminated here; the read path appends the
/// terminator so that scratch encodings stay clean.
pub fn dump_any<W: Write>(value: &Value, format: DocFormat, out: &mut W) -> Result<()> {
    match format {
        DocFormat::Json => serde_json::to_writer(out, value).map_err(map_emit_error),
        DocFormat::JsonPatch => Err(LaminaError::invalid_argument(
            "json-patch is an input-only format",
        )),
        DocFormat::MsgPack => rmp_serde::encode::write(out, value).map_err(map_emit_error),
        DocFormat::Bson => {
            if !value.is_object() {
                return Err(LaminaError::invalid_argument(
                    "bson requires an object at the top level",
                ));
            }
            let bytes = bson::to_vec(value).map_err(map_emit_error)?;
            out.write_all(&bytes).map_err(map_emit_error)
        }
        DocFormat::Cbor => ciborium::into_writer(value, out).map_err(map_emit_error),
        DocFormat::UbJson => ubjson::to_writer(out, value).map_err(map_emit_error),
    }
}

/// Map a serializer failure onto the overlay error model
///
/// The only I/O sink in play is the arena, whose sole failure mode is
/// allocation; everything else is a value the format cannot express.
fn map_emit_error<E: std::fmt::Display + 'static>(error: E) -> LaminaError {
    let any: &dyn std::any::Any = &error;
    if let Some(io_err) = any.downcast_ref::<io::Error>() {
        if io_err.kind() == io::ErrorKind::OutOfMemory {
            return LaminaError::out_of_memory(io_err.to_string());
        }
    }
    LaminaError::invalid_argument(format!("cannot encode value: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_core::Limits;
    use serde_json::json;

    const DEPTH: usize = Limits::DEFAULT.max_nesting_depth;

    const EMITTABLE: [DocFormat; 5] = [
        DocFormat::Json,
        DocFormat::MsgPack,
        DocFormat::Bson,
        DocFormat::Cbor,
        DocFormat::UbJson,
    ];

    #[test]
    fn test_every_format_round_trips_an_object() {
        let value = json!({"_id": 7, "doc": "abc", "nested": {"x": [1, 2, 3]}});
        for format in EMITTABLE {
            let mut buf = Vec::new();
            dump_any(&value, format, &mut buf).unwrap();
            let back = parse_any(&buf, format, 0, DEPTH).unwrap();
            assert_eq!(back, value, "format {format}");
        }
    }

    #[test]
    fn test_depth_limit_applies_to_every_format() {
        let mut value = json!(0);
        for _ in 0..6 {
            value = json!({"a": value});
        }
        for format in EMITTABLE {
            let mut buf = Vec::new();
            dump_any(&value, format, &mut buf).unwrap();
            parse_any(&buf, format, 0, 6).unwrap();
            let err = parse_any(&buf, format, 0, 5).unwrap_err();
            assert_eq!(
                err.kind(),
                lamina_core::ErrorKind::InvalidArgument,
                "format {format}"
            );
        }
    }

    #[test]
    fn test_non_object_rejected_only_by_bson() {
        let value = json!([1, 2, 3]);
        for format in EMITTABLE {
            let mut buf = Vec::new();
            let result = dump_any(&value, format, &mut buf);
            if format == DocFormat::Bson {
                assert!(result.is_err());
            } else {
                result.unwrap();
            }
        }
    }

    #[test]
    fn test_json_patch_cannot_be_emitted() {
        let mut buf = Vec::new();
        let err = dump_any(&json!({}), DocFormat::JsonPatch, &mut buf).unwrap_err();
        assert_eq!(err.kind(), lamina_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_json_accepts_trailing_nul() {
        let value = parse_any(b"{\"a\":1}\0", DocFormat::Json, 0, DEPTH).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_garbage_reports_parse_failed_with_task() {
        // 0xc1 is invalid in every binary format here and is not JSON.
        for format in EMITTABLE {
            let err = parse_any(b"\xc1", format, 9, DEPTH).unwrap_err();
            assert_eq!(err.kind(), lamina_core::ErrorKind::ParseFailed, "{format}");
            assert!(err.to_string().contains("task 9"));
        }
    }
}
