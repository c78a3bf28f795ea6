//! Hash-bucket codec for the paths modality
//!
//! The substrate value at a hashed key is a bucket: every path whose hash
//! collided there, with its payload. Reads scan linearly, writes
//! append-or-replace, deletes compact; an empty bucket is deleted from
//! the substrate by the caller.
//!
//! ## Record Format
//!
//! ```text
//! [path_len: u32 LE][payload_len: u32 LE][path bytes][payload bytes]
//! ```
//!
//! Records keep their insertion order; that order is what pagination in
//! `match_paths` leans on.

use byteorder::{ByteOrder, LittleEndian};
use lamina_core::{LaminaError, Result};

const HEADER_BYTES: usize = 8;

/// Byte positions of one record inside a raw bucket value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordAt {
    /// Offset of the path bytes, relative to the bucket value
    pub path_offset: usize,
    /// Path length
    pub path_len: usize,
    /// Offset of the payload bytes, relative to the bucket value
    pub payload_offset: usize,
    /// Payload length
    pub payload_len: usize,
}

/// Walk the records of a raw bucket value without decoding it
///
/// Returns the position of every record, in stored order.
pub fn record_ranges(raw: &[u8]) -> Result<Vec<RecordAt>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < raw.len() {
        if raw.len() - pos < HEADER_BYTES {
            return Err(corrupt(raw.len(), pos));
        }
        let path_len = LittleEndian::read_u32(&raw[pos..pos + 4]) as usize;
        let payload_len = LittleEndian::read_u32(&raw[pos + 4..pos + 8]) as usize;
        let path_offset = pos + HEADER_BYTES;
        let payload_offset = path_offset + path_len;
        let end = payload_offset + payload_len;
        if end > raw.len() {
            return Err(corrupt(raw.len(), pos));
        }
        records.push(RecordAt {
            path_offset,
            path_len,
            payload_offset,
            payload_len,
        });
        pos = end;
    }
    Ok(records)
}

/// Find the payload of `path` inside a raw bucket value
///
/// Zero-copy companion of [`Bucket::get`]: returns the payload's offset
/// and length relative to the value.
pub fn find_payload(raw: &[u8], path: &[u8]) -> Result<Option<(usize, usize)>> {
    for record in record_ranges(raw)? {
        if &raw[record.path_offset..record.path_offset + record.path_len] == path {
            return Ok(Some((record.payload_offset, record.payload_len)));
        }
    }
    Ok(None)
}

fn corrupt(len: usize, pos: usize) -> LaminaError {
    LaminaError::substrate(format!(
        "path bucket of {len} bytes has a torn record at offset {pos}"
    ))
}

/// Decoded bucket, used on the write path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Bucket {
    /// Empty bucket
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a stored value
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let entries = record_ranges(raw)?
            .into_iter()
            .map(|r| {
                (
                    raw[r.path_offset..r.path_offset + r.path_len].to_vec(),
                    raw[r.payload_offset..r.payload_offset + r.payload_len].to_vec(),
                )
            })
            .collect();
        Ok(Self { entries })
    }

    /// Encode for storage
    pub fn encode(&self) -> Vec<u8> {
        let total: usize = self
            .entries
            .iter()
            .map(|(p, v)| HEADER_BYTES + p.len() + v.len())
            .sum();
        let mut raw = Vec::with_capacity(total);
        for (path, payload) in &self.entries {
            let mut header = [0u8; HEADER_BYTES];
            LittleEndian::write_u32(&mut header[0..4], path.len() as u32);
            LittleEndian::write_u32(&mut header[4..8], payload.len() as u32);
            raw.extend_from_slice(&header);
            raw.extend_from_slice(path);
            raw.extend_from_slice(payload);
        }
        raw
    }

    /// Payload stored under `path`, if any
    pub fn get(&self, path: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v.as_slice())
    }

    /// Replace the payload of `path`, or append a new record
    ///
    /// Returns whether an existing record was replaced.
    pub fn upsert(&mut self, path: &[u8], payload: &[u8]) -> bool {
        for (p, v) in &mut self.entries {
            if p == path {
                *v = payload.to_vec();
                return true;
            }
        }
        self.entries.push((path.to_vec(), payload.to_vec()));
        false
    }

    /// Remove the record of `path`, compacting the bucket
    pub fn remove(&mut self, path: &[u8]) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(p, _)| p != path);
        before != self.entries.len()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bucket holds no records
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
