//! UBJSON encoding and decoding
//!
//! There is no serde-ecosystem UBJSON codec, so this module implements the
//! subset the documents modality needs, directly over the value tree.
//!
//! ## Value Format
//!
//! ```text
//! Z                 null
//! T / F             true / false
//! i/U/I/l/L <int>   int8/uint8/int16/int32/int64, big-endian
//! d/D <float>       float32/float64, big-endian
//! C <byte>          single character
//! S <len> <bytes>   string; <len> is itself a marked integer
//! H <len> <bytes>   high-precision number as a decimal string
//! [ ... ]           array
//! { <k> <v> ... }   object; keys are length-prefixed without an S marker
//! ```
//!
//! The writer emits plain containers and the smallest integer marker that
//! fits. The reader additionally accepts the optimized container form
//! (`$` element type and/or `#` element count) and `N` no-op markers.
//! The caller's nesting limit is enforced during the parse, so hostile
//! inputs cannot exhaust the stack.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde_json::{Map, Number, Value};
use std::fmt;
use std::io::{self, Cursor, Read, Write};

/// Why a decode failed
///
/// Nesting violations are split out so the caller can report them as a
/// limit problem rather than malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input is not well-formed UBJSON
    Malformed(String),
    /// Container nesting exceeded the caller's limit
    TooDeep,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(message) => write!(f, "{message}"),
            DecodeError::TooDeep => write!(f, "nesting too deep"),
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Serialize a value tree as UBJSON
pub fn to_writer<W: Write>(out: &mut W, value: &Value) -> io::Result<()> {
    match value {
        Value::Null => out.write_u8(b'Z'),
        Value::Bool(true) => out.write_u8(b'T'),
        Value::Bool(false) => out.write_u8(b'F'),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => {
            out.write_u8(b'S')?;
            write_length(out, s.len())?;
            out.write_all(s.as_bytes())
        }
        Value::Array(items) => {
            out.write_u8(b'[')?;
            for item in items {
                to_writer(out, item)?;
            }
            out.write_u8(b']')
        }
        Value::Object(map) => {
            out.write_u8(b'{')?;
            for (key, item) in map {
                write_length(out, key.len())?;
                out.write_all(key.as_bytes())?;
                to_writer(out, item)?;
            }
            out.write_u8(b'}')
        }
    }
}

fn write_number<W: Write>(out: &mut W, n: &Number) -> io::Result<()> {
    if let Some(i) = n.as_i64() {
        write_int(out, i)
    } else if let Some(u) = n.as_u64() {
        // No unsigned 64-bit marker exists; fall back to a decimal string.
        let text = u.to_string();
        out.write_u8(b'H')?;
        write_length(out, text.len())?;
        out.write_all(text.as_bytes())
    } else {
        out.write_u8(b'D')?;
        out.write_f64::<BigEndian>(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn write_int<W: Write>(out: &mut W, i: i64) -> io::Result<()> {
    if let Ok(v) = i8::try_from(i) {
        out.write_u8(b'i')?;
        out.write_i8(v)
    } else if let Ok(v) = u8::try_from(i) {
        out.write_u8(b'U')?;
        out.write_u8(v)
    } else if let Ok(v) = i16::try_from(i) {
        out.write_u8(b'I')?;
        out.write_i16::<BigEndian>(v)
    } else if let Ok(v) = i32::try_from(i) {
        out.write_u8(b'l')?;
        out.write_i32::<BigEndian>(v)
    } else {
        out.write_u8(b'L')?;
        out.write_i64::<BigEndian>(i)
    }
}

fn write_length<W: Write>(out: &mut W, len: usize) -> io::Result<()> {
    let len = i64::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflows i64"))?;
    write_int(out, len)
}

// =============================================================================
// Decoding
// =============================================================================

/// Parse a UBJSON document into a value tree
///
/// `max_depth` bounds container nesting while the parse runs.
pub fn from_slice(bytes: &[u8], max_depth: usize) -> Result<Value, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let marker = next_marker(&mut cursor)?;
    let value = read_value(&mut cursor, marker, 0, max_depth)?;
    Ok(value)
}

fn fail<T>(message: impl Into<String>) -> Result<T, DecodeError> {
    Err(DecodeError::Malformed(message.into()))
}

fn next_marker(cursor: &mut Cursor<&[u8]>) -> Result<u8, DecodeError> {
    loop {
        let marker = cursor.read_u8().map_err(short)?;
        if marker != b'N' {
            return Ok(marker);
        }
    }
}

fn read_value(
    cursor: &mut Cursor<&[u8]>,
    marker: u8,
    depth: usize,
    max_depth: usize,
) -> Result<Value, DecodeError> {
    if depth > max_depth {
        return Err(DecodeError::TooDeep);
    }
    match marker {
        b'Z' => Ok(Value::Null),
        b'T' => Ok(Value::Bool(true)),
        b'F' => Ok(Value::Bool(false)),
        b'i' | b'U' | b'I' | b'l' | b'L' => Ok(Value::from(read_int(cursor, marker)?)),
        b'd' => {
            let v = cursor.read_f32::<BigEndian>().map_err(short)?;
            float_value(v as f64)
        }
        b'D' => {
            let v = cursor.read_f64::<BigEndian>().map_err(short)?;
            float_value(v)
        }
        b'C' => {
            let byte = cursor.read_u8().map_err(short)?;
            Ok(Value::String((byte as char).to_string()))
        }
        b'S' => Ok(Value::String(read_string(cursor)?)),
        b'H' => {
            let text = read_string(cursor)?;
            if let Ok(i) = text.parse::<i64>() {
                Ok(Value::from(i))
            } else if let Ok(u) = text.parse::<u64>() {
                Ok(Value::from(u))
            } else if let Ok(f) = text.parse::<f64>() {
                float_value(f)
            } else {
                fail(format!("bad high-precision number {text:?}"))
            }
        }
        b'[' => read_array(cursor, depth, max_depth),
        b'{' => read_object(cursor, depth, max_depth),
        other => fail(format!("unknown marker 0x{other:02x}")),
    }
}

fn short(_: io::Error) -> DecodeError {
    DecodeError::Malformed("unexpected end of input".to_string())
}

fn float_value(v: f64) -> Result<Value, DecodeError> {
    Number::from_f64(v)
        .map(Value::Number)
        .ok_or_else(|| DecodeError::Malformed("non-finite float".to_string()))
}

fn read_int(cursor: &mut Cursor<&[u8]>, marker: u8) -> Result<i64, DecodeError> {
    match marker {
        b'i' => Ok(cursor.read_i8().map_err(short)? as i64),
        b'U' => Ok(cursor.read_u8().map_err(short)? as i64),
        b'I' => Ok(cursor.read_i16::<BigEndian>().map_err(short)? as i64),
        b'l' => Ok(cursor.read_i32::<BigEndian>().map_err(short)? as i64),
        b'L' => Ok(cursor.read_i64::<BigEndian>().map_err(short)?),
        other => fail(format!("expected integer marker, got 0x{other:02x}")),
    }
}

fn read_length(cursor: &mut Cursor<&[u8]>) -> Result<usize, DecodeError> {
    let marker = next_marker(cursor)?;
    let len = read_int(cursor, marker)?;
    usize::try_from(len).map_err(|_| DecodeError::Malformed(format!("negative length {len}")))
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, DecodeError> {
    let len = read_length(cursor)?;
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf).map_err(short)?;
    String::from_utf8(buf).map_err(|_| DecodeError::Malformed("string is not UTF-8".to_string()))
}

/// Optional `$`/`#` container header; returns (element type, count)
fn read_container_header(
    cursor: &mut Cursor<&[u8]>,
) -> Result<(Option<u8>, Option<usize>), DecodeError> {
    let mark = cursor.position();
    let marker = next_marker(cursor)?;
    match marker {
        b'$' => {
            let elem = next_marker(cursor)?;
            let count_marker = next_marker(cursor)?;
            if count_marker != b'#' {
                return fail("typed container without a count");
            }
            let count = read_length(cursor)?;
            Ok((Some(elem), Some(count)))
        }
        b'#' => {
            let count = read_length(cursor)?;
            Ok((None, Some(count)))
        }
        _ => {
            cursor.set_position(mark);
            Ok((None, None))
        }
    }
}

fn read_array(
    cursor: &mut Cursor<&[u8]>,
    depth: usize,
    max_depth: usize,
) -> Result<Value, DecodeError> {
    let (elem, count) = read_container_header(cursor)?;
    let mut items = Vec::new();
    match count {
        Some(count) => {
            for _ in 0..count {
                let marker = match elem {
                    Some(m) => m,
                    None => next_marker(cursor)?,
                };
                items.push(read_value(cursor, marker, depth + 1, max_depth)?);
            }
        }
        None => loop {
            let marker = next_marker(cursor)?;
            if marker == b']' {
                break;
            }
            items.push(read_value(cursor, marker, depth + 1, max_depth)?);
        },
    }
    Ok(Value::Array(items))
}

fn read_object(
    cursor: &mut Cursor<&[u8]>,
    depth: usize,
    max_depth: usize,
) -> Result<Value, DecodeError> {
    let (elem, count) = read_container_header(cursor)?;
    let mut map = Map::new();
    match count {
        Some(count) => {
            for _ in 0..count {
                let key = read_string(cursor)?;
                let marker = match elem {
                    Some(m) => m,
                    None => next_marker(cursor)?,
                };
                map.insert(key, read_value(cursor, marker, depth + 1, max_depth)?);
            }
        }
        None => loop {
            let mark = cursor.position();
            let marker = next_marker(cursor)?;
            if marker == b'}' {
                break;
            }
            cursor.set_position(mark);
            let key = read_string(cursor)?;
            let marker = next_marker(cursor)?;
            map.insert(key, read_value(cursor, marker, depth + 1, max_depth)?);
        },
    }
    Ok(Value::Object(map))
}
