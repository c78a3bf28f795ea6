//! Columnar extraction of document fields
//!
//! `gather` projects one field per column out of a batch of documents and
//! coerces each cell to the column's scalar type. Fixed-width columns fill
//! a packed little-endian cell array; `str`/`bin`/`json` columns share one
//! joined blob addressed by per-cell offsets and lengths. A cleared
//! validity bit means the field was absent or the value did not coerce;
//! the cell then holds zeroes (fixed) or an empty range (variable).
//!
//! ## Coercion rules
//!
//! - numeric -> numeric: exact, range-checked; floats must be integral to
//!   land in an integer column
//! - string -> numeric: full-string lexical parse, no trailing garbage
//! - bool -> numeric: 0 or 1; numeric -> bool: zero/non-zero
//! - `str`/`bin`: strings only, raw bytes
//! - `json`: any value, rendered as canonical JSON text

use lamina_core::{Arena, Bitmap, ByteRange, Result};
use serde_json::Value;

use super::fieldpath::project;

/// Target scalar type of one gather column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Str,
    Bin,
    Json,
}

impl ScalarType {
    /// Cell width in bytes for fixed-width types, `None` for var-width
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ScalarType::I8 | ScalarType::U8 | ScalarType::Bool => Some(1),
            ScalarType::I16 | ScalarType::U16 => Some(2),
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => Some(4),
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => Some(8),
            ScalarType::Str | ScalarType::Bin | ScalarType::Json => None,
        }
    }
}

/// One requested column: a field selector plus a target type
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec<'a> {
    /// Field selector (JSON Pointer or top-level key)
    pub field: &'a str,
    /// Target scalar type
    pub ty: ScalarType,
}

/// Cell storage of one materialized column
#[derive(Debug)]
pub enum ColumnData {
    /// Packed little-endian cells in the arena, `width * rows` bytes
    Fixed(ByteRange),
    /// Per-cell offsets and lengths into the shared joined blob
    Variable {
        /// Cell start offsets, relative to the joined blob
        offsets: Vec<u32>,
        /// Cell lengths
        lengths: Vec<u32>,
    },
}

/// One materialized column
#[derive(Debug)]
pub struct GatherColumn {
    /// Target type the cells were coerced to
    pub ty: ScalarType,
    /// One bit per row; 0 = absent or failed coercion
    pub validity: Bitmap,
    /// Cell storage
    pub data: ColumnData,
}

/// Columnar result of a gather call
#[derive(Debug)]
pub struct GatherOutput {
    /// Number of rows (input tasks)
    pub rows: usize,
    /// One entry per requested column, in request order
    pub columns: Vec<GatherColumn>,
    /// Shared blob holding every var-width cell
    pub joined: ByteRange,
}

impl GatherOutput {
    /// Whether cell (`col`, `row`) holds a usable value
    pub fn is_valid(&self, col: usize, row: usize) -> bool {
        self.columns[col].validity.get(row)
    }

    /// Raw cell bytes, or `None` when the cell is invalid
    ///
    /// Fixed-width cells are little-endian and exactly
    /// `ty.fixed_width()` bytes long.
    pub fn cell<'a>(&self, arena: &'a Arena, col: usize, row: usize) -> Option<&'a [u8]> {
        let column = &self.columns[col];
        if !column.validity.get(row) {
            return None;
        }
        match &column.data {
            ColumnData::Fixed(range) => {
                let width = column.ty.fixed_width().unwrap_or(0);
                let cells = arena.slice(*range);
                Some(&cells[row * width..(row + 1) * width])
            }
            ColumnData::Variable { offsets, lengths } => {
                let blob = arena.slice(self.joined);
                let off = offsets[row] as usize;
                Some(&blob[off..off + lengths[row] as usize])
            }
        }
    }
}

/// A coerced cell before column assembly
enum Cell {
    Fixed([u8; 8]),
    Var(Vec<u8>),
}

/// Materialize columns from per-row documents
///
/// `rows[i]` is the parsed document for task `i`, or `None` when the key
/// was absent (every cell of that row is invalid). Rows borrow their
/// documents so a deduplicated batch can reference one parse many times.
pub(crate) fn gather_into(
    rows: &[Option<&Value>],
    specs: &[ColumnSpec<'_>],
    arena: &mut Arena,
) -> Result<GatherOutput> {
    let mut validities: Vec<Bitmap> = specs.iter().map(|_| Bitmap::zeroed(rows.len())).collect();
    let mut fixed_cells: Vec<Vec<u8>> = specs
        .iter()
        .map(|s| vec![0u8; s.ty.fixed_width().unwrap_or(0) * rows.len()])
        .collect();
    let mut var_cells: Vec<(Vec<u32>, Vec<u32>)> = specs
        .iter()
        .map(|s| {
            if s.ty.fixed_width().is_none() {
                (vec![0u32; rows.len()], vec![0u32; rows.len()])
            } else {
                (Vec::new(), Vec::new())
            }
        })
        .collect();
    let mut joined: Vec<u8> = Vec::new();

    for (row, doc) in rows.iter().enumerate() {
        for (col, spec) in specs.iter().enumerate() {
            let projected = doc.and_then(|d| project(d, spec.field));
            let Some(cell) = projected.and_then(|value| coerce(value, spec.ty)) else {
                continue;
            };
            validities[col].set(row, true);
            match cell {
                Cell::Fixed(bytes) => {
                    let width = spec.ty.fixed_width().unwrap_or(0);
                    let at = row * width;
                    fixed_cells[col][at..at + width].copy_from_slice(&bytes[..width]);
                }
                Cell::Var(bytes) => {
                    var_cells[col].0[row] = joined.len() as u32;
                    var_cells[col].1[row] = bytes.len() as u32;
                    joined.extend_from_slice(&bytes);
                }
            }
        }
    }

    let joined = arena.push(&joined)?;
    let mut columns = Vec::with_capacity(specs.len());
    for (col, spec) in specs.iter().enumerate() {
        let data = if spec.ty.fixed_width().is_some() {
            ColumnData::Fixed(arena.push(&fixed_cells[col])?)
        } else {
            let (offsets, lengths) = std::mem::take(&mut var_cells[col]);
            ColumnData::Variable { offsets, lengths }
        };
        columns.push(GatherColumn {
            ty: spec.ty,
            validity: std::mem::take(&mut validities[col]),
            data,
        });
    }
    Ok(GatherOutput {
        rows: rows.len(),
        columns,
        joined,
    })
}

// =============================================================================
// Coercion
// =============================================================================

fn coerce(value: &Value, ty: ScalarType) -> Option<Cell> {
    match ty {
        ScalarType::I8 => int_cell(value, i8::MIN as i128, i8::MAX as i128),
        ScalarType::I16 => int_cell(value, i16::MIN as i128, i16::MAX as i128),
        ScalarType::I32 => int_cell(value, i32::MIN as i128, i32::MAX as i128),
        ScalarType::I64 => int_cell(value, i64::MIN as i128, i64::MAX as i128),
        ScalarType::U8 => int_cell(value, 0, u8::MAX as i128),
        ScalarType::U16 => int_cell(value, 0, u16::MAX as i128),
        ScalarType::U32 => int_cell(value, 0, u32::MAX as i128),
        ScalarType::U64 => int_cell(value, 0, u64::MAX as i128),
        ScalarType::F32 => {
            let f = float_of(value)?;
            let narrowed = f as f32;
            narrowed.is_finite().then(|| {
                let mut bytes = [0u8; 8];
                bytes[..4].copy_from_slice(&narrowed.to_le_bytes());
                Cell::Fixed(bytes)
            })
        }
        ScalarType::F64 => {
            let f = float_of(value)?;
            let mut bytes = [0u8; 8];
            bytes[..8].copy_from_slice(&f.to_le_bytes());
            Some(Cell::Fixed(bytes))
        }
        ScalarType::Bool => {
            let b = match value {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64()? != 0.0,
                Value::String(s) => match s.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return None,
                },
                _ => return None,
            };
            let mut bytes = [0u8; 8];
            bytes[0] = b as u8;
            Some(Cell::Fixed(bytes))
        }
        ScalarType::Str | ScalarType::Bin => match value {
            Value::String(s) => Some(Cell::Var(s.as_bytes().to_vec())),
            _ => None,
        },
        ScalarType::Json => {
            let text = serde_json::to_string(value).ok()?;
            Some(Cell::Var(text.into_bytes()))
        }
    }
}

fn int_cell(value: &Value, min: i128, max: i128) -> Option<Cell> {
    let wide = int_of(value)?;
    if wide < min || wide > max {
        return None;
    }
    // Little-endian two's complement; columns narrower than 8 bytes take
    // the low bytes, which is exact for in-range values.
    Some(Cell::Fixed((wide as i64 as u64).to_le_bytes()))
}

fn int_of(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i as i128)
            } else if let Some(u) = n.as_u64() {
                Some(u as i128)
            } else {
                let f = n.as_f64()?;
                // Only integral floats cross into integer columns.
                (f.is_finite() && f.fract() == 0.0 && f.abs() < 2f64.powi(63))
                    .then(|| f as i128)
            }
        }
        Value::String(s) => s.parse::<i128>().ok(),
        Value::Bool(b) => Some(*b as i128),
        _ => None,
    }
}

fn float_of(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse::<f64>().ok()?,
        Value::Bool(b) => *b as u8 as f64,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one_row(doc: Value, field: &str, ty: ScalarType) -> (GatherOutput, Arena) {
        let mut arena = Arena::new();
        let out = gather_into(&[Some(&doc)], &[ColumnSpec { field, ty }], &mut arena).unwrap();
        (out, arena)
    }

    fn i64_cell(out: &GatherOutput, arena: &Arena) -> Option<i64> {
        out.cell(arena, 0, 0)
            .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
    }

    #[test]
    fn test_integer_column_round_trip() {
        let (out, arena) = one_row(json!({"n": -42}), "n", ScalarType::I64);
        assert_eq!(i64_cell(&out, &arena), Some(-42));
    }

    #[test]
    fn test_range_check_invalidates() {
        let (out, arena) = one_row(json!({"n": 300}), "n", ScalarType::I8);
        assert!(!out.is_valid(0, 0));
        assert_eq!(out.cell(&arena, 0, 0), None);

        let (out, _) = one_row(json!({"n": -1}), "n", ScalarType::U32);
        assert!(!out.is_valid(0, 0));
    }

    #[test]
    fn test_lexical_parse_rejects_trailing_garbage() {
        let (out, arena) = one_row(json!({"n": "123"}), "n", ScalarType::I32);
        assert_eq!(
            out.cell(&arena, 0, 0)
                .map(|b| i32::from_le_bytes(b.try_into().unwrap())),
            Some(123)
        );

        let (out, _) = one_row(json!({"n": "123abc"}), "n", ScalarType::I32);
        assert!(!out.is_valid(0, 0));
    }

    #[test]
    fn test_float_must_be_integral_for_int_columns() {
        let (out, _) = one_row(json!({"n": 4.5}), "n", ScalarType::I64);
        assert!(!out.is_valid(0, 0));

        let (out, arena) = one_row(json!({"n": 4.0}), "n", ScalarType::I64);
        assert_eq!(i64_cell(&out, &arena), Some(4));
    }

    #[test]
    fn test_f32_overflow_invalidates() {
        let (out, _) = one_row(json!({"n": 1e300}), "n", ScalarType::F32);
        assert!(!out.is_valid(0, 0));

        let (out, arena) = one_row(json!({"n": 1.5}), "n", ScalarType::F32);
        let bytes = out.cell(&arena, 0, 0).unwrap();
        assert_eq!(f32::from_le_bytes(bytes.try_into().unwrap()), 1.5);
    }

    #[test]
    fn test_json_column_takes_anything() {
        let (out, arena) = one_row(json!({"n": {"deep": [1]}}), "n", ScalarType::Json);
        assert_eq!(out.cell(&arena, 0, 0), Some(&br#"{"deep":[1]}"#[..]));
    }

    #[test]
    fn test_str_column_rejects_non_strings() {
        let (out, _) = one_row(json!({"n": 5}), "n", ScalarType::Str);
        assert!(!out.is_valid(0, 0));

        let (out, arena) = one_row(json!({"n": "text"}), "n", ScalarType::Str);
        assert_eq!(out.cell(&arena, 0, 0), Some(&b"text"[..]));
    }

    #[test]
    fn test_missing_doc_and_missing_field_invalidate() {
        let mut arena = Arena::new();
        let specs = [ColumnSpec {
            field: "x",
            ty: ScalarType::I64,
        }];
        let with_y = json!({"y": 1});
        let out = gather_into(&[None, Some(&with_y)], &specs, &mut arena).unwrap();
        assert!(!out.is_valid(0, 0));
        assert!(!out.is_valid(0, 1));
    }

    #[test]
    fn test_var_cells_share_one_blob() {
        let mut arena = Arena::new();
        let first = json!({"s": "ab", "t": "xyz"});
        let second = json!({"s": "cd", "t": 9});
        let rows = [Some(&first), Some(&second)];
        let specs = [
            ColumnSpec {
                field: "s",
                ty: ScalarType::Str,
            },
            ColumnSpec {
                field: "t",
                ty: ScalarType::Str,
            },
        ];
        let out = gather_into(&rows, &specs, &mut arena).unwrap();
        assert_eq!(out.cell(&arena, 0, 0), Some(&b"ab"[..]));
        assert_eq!(out.cell(&arena, 1, 0), Some(&b"xyz"[..]));
        assert_eq!(out.cell(&arena, 0, 1), Some(&b"cd"[..]));
        assert!(!out.is_valid(1, 1));
        assert_eq!(arena.slice(out.joined), b"abxyzcd");
    }
}
