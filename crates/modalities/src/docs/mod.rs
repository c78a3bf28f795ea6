//! Documents modality
//!
//! ## Design: STATELESS FACADE
//!
//! [`DocStore`] borrows a substrate and holds nothing else. Per-key
//! structured values are persisted in one canonical binary encoding
//! (MsgPack) no matter which wire format the caller speaks; the facade
//! translates on the way in and out.
//!
//! ## Batching
//!
//! Every entry point takes a batch descriptor and resolves the minimal
//! substrate operations:
//!
//! - whole-document canonical traffic is a pass-through, byte for byte
//! - everything else parses, and reads deduplicate document keys first:
//!   N tasks touching K distinct documents cost K substrate reads, with
//!   each parsed document sliced as many times as tasks need it
//! - outputs always come back in task order
//!
//! ## Failure semantics
//!
//! Malformed input aborts the whole batch before any substrate write. An
//! update-mode miss is a per-row degradation reported through the output
//! presence bitmap; the batch itself succeeds.

mod codec;
mod fieldpath;
mod gather;
mod ubjson;

pub use gather::{ColumnData, ColumnSpec, GatherColumn, GatherOutput, ScalarType};

use lamina_core::{
    Arena, Bitmap, ByteRange, BytesColumn, CollectionId, DocFormat, Key, LaminaError, Limits,
    Located, Result, Strided, Substrate,
};
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write as _;
use tracing::debug;

use fieldpath::{escape_token, project, set_field};

// =============================================================================
// Batch descriptors
// =============================================================================

/// How a write applies to the existing value of each key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole document, or set the addressed sub-tree
    Upsert,
    /// Like upsert, but the key must already exist
    Update,
    /// Like upsert, but the key must be absent
    Insert,
    /// Interpret the input as an RFC 6902 patch over the existing value
    Patch,
    /// RFC 7386 deep-merge of the input into the existing value
    Merge,
}

/// Where write keys come from
#[derive(Debug, Clone, Copy)]
pub enum DocKeys<'a> {
    /// Caller-supplied key column
    Explicit(Strided<'a, Key>),
    /// Extract the key from this field of each document
    FromField(&'a str),
}

/// Batch descriptor for [`DocStore::write`]
#[derive(Debug, Clone)]
pub struct DocWriteBatch<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionId>,
    /// Key source
    pub keys: DocKeys<'a>,
    /// Document payload per task, in `format`
    pub values: BytesColumn<'a>,
    /// Optional per-task presence; a cleared bit deletes the key
    pub presences: Option<&'a Bitmap>,
    /// Optional field selector per task
    pub fields: Strided<'a, Option<&'a str>>,
    /// Wire format of the payloads
    pub format: DocFormat,
    /// Modification mode
    pub mode: WriteMode,
    /// Number of tasks
    pub len: usize,
}

impl<'a> DocWriteBatch<'a> {
    /// Upsert one payload (broadcast) under each of `keys`
    pub fn upsert(
        collection: CollectionId,
        keys: &'a [Key],
        value: &'a [u8],
        format: DocFormat,
    ) -> Self {
        Self {
            collections: Strided::repeated(collection),
            keys: DocKeys::Explicit(Strided::from_slice(keys)),
            values: BytesColumn::Repeated(value),
            presences: None,
            fields: Strided::repeated(None),
            format,
            mode: WriteMode::Upsert,
            len: keys.len(),
        }
    }

    /// Upsert one payload per key
    pub fn upsert_many(
        collection: CollectionId,
        keys: &'a [Key],
        values: &'a [&'a [u8]],
        format: DocFormat,
    ) -> Self {
        Self {
            collections: Strided::repeated(collection),
            keys: DocKeys::Explicit(Strided::from_slice(keys)),
            values: BytesColumn::from_slices(values),
            presences: None,
            fields: Strided::repeated(None),
            format,
            mode: WriteMode::Upsert,
            len: keys.len(),
        }
    }

    /// Upsert documents keyed by an integer field of each document
    pub fn keyed_by_field(
        collection: CollectionId,
        id_field: &'a str,
        values: &'a [&'a [u8]],
        format: DocFormat,
    ) -> Self {
        Self {
            collections: Strided::repeated(collection),
            keys: DocKeys::FromField(id_field),
            values: BytesColumn::from_slices(values),
            presences: None,
            fields: Strided::repeated(None),
            format,
            mode: WriteMode::Upsert,
            len: values.len(),
        }
    }

    /// Change the modification mode
    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Address one field (broadcast) instead of whole documents
    pub fn with_field(mut self, field: &'a str) -> Self {
        self.fields = Strided::repeated(Some(field));
        self
    }

    /// Address a field per task
    pub fn with_fields(mut self, fields: &'a [Option<&'a str>]) -> Self {
        self.fields = Strided::from_slice(fields);
        self
    }

    /// Attach a presence bitmap; cleared bits delete their keys
    pub fn with_presences(mut self, presences: &'a Bitmap) -> Self {
        self.presences = Some(presences);
        self
    }

    fn is_delete(&self, i: usize) -> bool {
        self.presences.map(|p| !p.get(i)).unwrap_or(false)
    }
}

/// Batch descriptor for [`DocStore::read`]
#[derive(Debug, Clone)]
pub struct DocReadBatch<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionId>,
    /// Key per task
    pub keys: Strided<'a, Key>,
    /// Optional field selector per task
    pub fields: Strided<'a, Option<&'a str>>,
    /// Requested output format
    pub format: DocFormat,
    /// Number of tasks
    pub len: usize,
}

impl<'a> DocReadBatch<'a> {
    /// Read whole documents
    pub fn whole(collection: CollectionId, keys: &'a [Key], format: DocFormat) -> Self {
        Self {
            collections: Strided::repeated(collection),
            keys: Strided::from_slice(keys),
            fields: Strided::repeated(None),
            format,
            len: keys.len(),
        }
    }

    /// Project one field (broadcast) out of each document
    pub fn with_field(mut self, field: &'a str) -> Self {
        self.fields = Strided::repeated(Some(field));
        self
    }

    /// Project a field per task
    pub fn with_fields(mut self, fields: &'a [Option<&'a str>]) -> Self {
        self.fields = Strided::from_slice(fields);
        self
    }
}

/// Batch of plain (collection, key) addresses, used by gist and gather
#[derive(Debug, Clone)]
pub struct KeyBatch<'a> {
    /// Collection per task
    pub collections: Strided<'a, CollectionId>,
    /// Key per task
    pub keys: Strided<'a, Key>,
    /// Number of tasks
    pub len: usize,
}

impl<'a> KeyBatch<'a> {
    /// Batch over one collection
    pub fn new(collection: CollectionId, keys: &'a [Key]) -> Self {
        Self {
            collections: Strided::repeated(collection),
            keys: Strided::from_slice(keys),
            len: keys.len(),
        }
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Result of a write batch
#[derive(Debug)]
pub struct DocWriteOutput {
    /// One bit per task; 0 marks a per-row miss (update mode on an absent
    /// key) that the batch survived
    pub presences: Bitmap,
}

/// Result of a read batch; bytes live in the call's arena
#[derive(Debug)]
pub struct DocReadOutput {
    /// One bit per task; 0 means the key was absent
    pub presences: Bitmap,
    /// Per-task output location within the arena
    pub ranges: Vec<ByteRange>,
}

impl DocReadOutput {
    /// Output bytes for task `i`, or `None` when the key was absent
    pub fn bytes<'a>(&self, i: usize, arena: &'a Arena) -> Option<&'a [u8]> {
        self.presences.get(i).then(|| arena.slice(self.ranges[i]))
    }
}

/// Sorted, deduplicated field paths discovered across a batch
#[derive(Debug)]
pub struct GistOutput {
    /// One arena range per JSON-pointer path, in ascending order
    pub paths: Vec<ByteRange>,
}

impl GistOutput {
    /// Path `i` as a string slice
    pub fn path<'a>(&self, i: usize, arena: &'a Arena) -> &'a str {
        std::str::from_utf8(arena.slice(self.paths[i])).unwrap_or_default()
    }
}

// =============================================================================
// DocStore
// =============================================================================

/// Documents overlay over any substrate
///
/// Stateless; borrow it a substrate (or a transaction handle) and an arena
/// per call.
#[derive(Debug)]
pub struct DocStore<'s, S: Substrate + ?Sized> {
    substrate: &'s S,
    limits: Limits,
}

impl<'s, S: Substrate + ?Sized> DocStore<'s, S> {
    /// Facade over `substrate` with default limits
    pub fn new(substrate: &'s S) -> Self {
        Self {
            substrate,
            limits: Limits::DEFAULT,
        }
    }

    /// Facade with explicit limits
    pub fn with_limits(substrate: &'s S, limits: Limits) -> Self {
        Self { substrate, limits }
    }

    // =========================================================================
    // Write
    // =========================================================================

    /// Apply a batch of document writes
    ///
    /// After success every surviving task's key holds the canonical
    /// encoding of the requested update. See [`WriteMode`] for how each
    /// mode treats the existing value.
    pub fn write(&self, batch: &DocWriteBatch<'_>, arena: &mut Arena) -> Result<DocWriteOutput> {
        self.validate_write(batch)?;
        if batch.len == 0 {
            return Ok(DocWriteOutput {
                presences: Bitmap::zeroed(0),
            });
        }

        // Whole-document canonical upsert needs no parse at all; forward
        // the batch to the substrate unchanged.
        if batch.mode == WriteMode::Upsert
            && batch.format == DocFormat::CANONICAL
            && fields_all_none(&batch.fields, batch.len)
        {
            if let DocKeys::Explicit(keys) = batch.keys {
                return self.write_passthrough(batch, keys);
            }
        }

        // 1. Parse every payload up front; a malformed row aborts the
        //    batch before any substrate write.
        let mut parsed: Vec<Option<Value>> = Vec::with_capacity(batch.len);
        for i in 0..batch.len {
            if batch.is_delete(i) {
                parsed.push(None);
                continue;
            }
            let bytes = batch.values.get(i).ok_or_else(|| {
                LaminaError::invalid_argument(format!("task {i} has no value column cell"))
            })?;
            if bytes.len() > self.limits.max_doc_bytes {
                return Err(LaminaError::invalid_argument(format!(
                    "task {i} document of {} bytes exceeds limit {}",
                    bytes.len(),
                    self.limits.max_doc_bytes
                )));
            }
            parsed.push(Some(codec::parse_any(
                bytes,
                batch.format,
                i,
                self.limits.max_nesting_depth,
            )?));
        }

        // 2. Resolve the target address of every task.
        let targets = self.resolve_targets(batch, &parsed)?;

        // 3. Load current values when any mode or field addressing needs
        //    them, one read per distinct document.
        let needs_read =
            batch.mode != WriteMode::Upsert || !fields_all_none(&batch.fields, batch.len);
        let mut current: BTreeMap<Located, Option<Value>> = BTreeMap::new();
        if needs_read {
            let mut unique: Vec<Located> = targets.clone();
            unique.sort_unstable();
            unique.dedup();
            let read = self.substrate.read(&unique, arena)?;
            for (i, target) in unique.iter().enumerate() {
                let value = match read.bytes(i, arena) {
                    Some(bytes) => Some(codec::parse_any(
                        bytes,
                        DocFormat::CANONICAL,
                        i,
                        self.limits.max_nesting_depth,
                    )?),
                    None => None,
                };
                current.insert(*target, value);
            }
        }

        // 4. Apply tasks in input order; later tasks observe earlier ones,
        //    which gives later-wins semantics and keeps re-running the
        //    same batch idempotent.
        let mut presences = Bitmap::ones(batch.len);
        let mut dirty: FxHashSet<Located> = FxHashSet::default();
        for (i, input) in parsed.into_iter().enumerate() {
            let target = targets[i];
            let slot = current.entry(target).or_insert(None);
            match input {
                None => {
                    *slot = None;
                    dirty.insert(target);
                }
                Some(input) => {
                    let field = batch.fields.get(i);
                    if apply_mode(slot, input, batch.mode, field, i)? {
                        dirty.insert(target);
                    } else {
                        debug!(task = i, key = %target, "update-mode miss");
                        presences.set(i, false);
                    }
                }
            }
        }

        // 5. Serialize survivors to canonical bytes and issue one write.
        let mut write_targets = Vec::with_capacity(dirty.len());
        let mut encodings: Vec<Option<Vec<u8>>> = Vec::with_capacity(dirty.len());
        for (target, value) in &current {
            if !dirty.contains(target) {
                continue;
            }
            write_targets.push(*target);
            match value {
                Some(doc) => {
                    let mut buf = Vec::new();
                    codec::dump_any(doc, DocFormat::CANONICAL, &mut buf)?;
                    encodings.push(Some(buf));
                }
                None => encodings.push(None),
            }
        }
        let values: Vec<Option<&[u8]>> = encodings.iter().map(|e| e.as_deref()).collect();
        self.substrate.write(&write_targets, &values)?;
        Ok(DocWriteOutput { presences })
    }

    fn write_passthrough(
        &self,
        batch: &DocWriteBatch<'_>,
        keys: Strided<'_, Key>,
    ) -> Result<DocWriteOutput> {
        let mut targets = Vec::with_capacity(batch.len);
        let mut values = Vec::with_capacity(batch.len);
        for i in 0..batch.len {
            targets.push(Located::new(batch.collections.get(i), keys.get(i)));
            if batch.is_delete(i) {
                values.push(None);
            } else {
                let bytes = batch.values.get(i).ok_or_else(|| {
                    LaminaError::invalid_argument(format!("task {i} has no value column cell"))
                })?;
                values.push(Some(bytes));
            }
        }
        self.substrate.write(&targets, &values)?;
        Ok(DocWriteOutput {
            presences: Bitmap::ones(batch.len),
        })
    }

    fn resolve_targets(
        &self,
        batch: &DocWriteBatch<'_>,
        parsed: &[Option<Value>],
    ) -> Result<Vec<Located>> {
        let mut targets = Vec::with_capacity(batch.len);
        for i in 0..batch.len {
            let collection = batch.collections.get(i);
            let key = match batch.keys {
                DocKeys::Explicit(keys) => keys.get(i),
                DocKeys::FromField(field) => {
                    let doc = parsed[i].as_ref().ok_or_else(|| {
                        LaminaError::invalid_argument(format!(
                            "task {i} deletes by id field; deletes need explicit keys"
                        ))
                    })?;
                    project(doc, field).and_then(Value::as_i64).ok_or_else(|| {
                        LaminaError::invalid_argument(format!(
                            "task {i} has no integer at id field {field:?}"
                        ))
                    })?
                }
            };
            targets.push(Located::new(collection, key));
        }
        Ok(targets)
    }

    fn validate_write(&self, batch: &DocWriteBatch<'_>) -> Result<()> {
        check_column_len("collections", batch.collections.backing_len(), batch.len)?;
        if let DocKeys::Explicit(keys) = batch.keys {
            check_column_len("keys", keys.backing_len(), batch.len)?;
        }
        check_column_len("fields", batch.fields.backing_len(), batch.len)?;
        if let Some(presences) = batch.presences {
            check_column_len("presences", Some(presences.len()), batch.len)?;
        }
        Ok(())
    }

    // =========================================================================
    // Read
    // =========================================================================

    /// Read whole documents or projected fields, in any emittable format
    ///
    /// For each task: the presence bit mirrors key existence; the bytes
    /// encode the whole document or the addressed sub-tree (absent field
    /// projects as `null`). Textual JSON rows are NUL-terminated.
    pub fn read(&self, batch: &DocReadBatch<'_>, arena: &mut Arena) -> Result<DocReadOutput> {
        check_column_len("collections", batch.collections.backing_len(), batch.len)?;
        check_column_len("keys", batch.keys.backing_len(), batch.len)?;
        check_column_len("fields", batch.fields.backing_len(), batch.len)?;
        if !batch.format.is_emittable() {
            return Err(LaminaError::invalid_argument(
                "json-patch is an input-only format",
            ));
        }
        if batch.len == 0 {
            return Ok(DocReadOutput {
                presences: Bitmap::zeroed(0),
                ranges: Vec::new(),
            });
        }

        let targets: Vec<Located> = (0..batch.len)
            .map(|i| Located::new(batch.collections.get(i), batch.keys.get(i)))
            .collect();

        // Canonical whole-document reads are a pass-through.
        if batch.format == DocFormat::CANONICAL && fields_all_none(&batch.fields, batch.len) {
            let read = self.substrate.read(&targets, arena)?;
            return Ok(DocReadOutput {
                presences: read.presences,
                ranges: read.ranges,
            });
        }

        let (unique, parsed) = self.load_unique(&targets, arena)?;

        let mut presences = Bitmap::zeroed(batch.len);
        let mut ranges = vec![ByteRange::EMPTY; batch.len];
        for i in 0..batch.len {
            let at = unique.binary_search(&targets[i]).unwrap_or(usize::MAX);
            let Some(doc) = parsed.get(at).and_then(Option::as_ref) else {
                continue;
            };
            presences.set(i, true);
            let view = match batch.fields.get(i) {
                Some(field) => project(doc, field).unwrap_or(&Value::Null),
                None => doc,
            };
            let mut writer = arena.writer();
            codec::dump_any(view, batch.format, &mut writer)?;
            if batch.format == DocFormat::Json {
                writer
                    .write_all(&[0])
                    .map_err(|e| LaminaError::out_of_memory(e.to_string()))?;
            }
            ranges[i] = writer.finish();
        }
        Ok(DocReadOutput { presences, ranges })
    }

    // =========================================================================
    // Gist
    // =========================================================================

    /// Union of leaf field paths across a batch of documents
    ///
    /// Paths are JSON Pointers (RFC 6901 escaping), deduplicated and
    /// emitted in ascending order. A scalar root contributes the empty
    /// pointer; empty containers count as leaves of their own path.
    pub fn gist(&self, batch: &KeyBatch<'_>, arena: &mut Arena) -> Result<GistOutput> {
        check_column_len("collections", batch.collections.backing_len(), batch.len)?;
        check_column_len("keys", batch.keys.backing_len(), batch.len)?;
        let targets: Vec<Located> = (0..batch.len)
            .map(|i| Located::new(batch.collections.get(i), batch.keys.get(i)))
            .collect();
        let (_, parsed) = self.load_unique(&targets, arena)?;

        let mut paths = BTreeSet::new();
        let mut prefix = String::new();
        for doc in parsed.iter().flatten() {
            collect_leaf_paths(doc, &mut prefix, &mut paths);
        }
        let mut ranges = Vec::with_capacity(paths.len());
        for path in &paths {
            ranges.push(arena.push(path.as_bytes())?);
        }
        Ok(GistOutput { paths: ranges })
    }

    // =========================================================================
    // Gather
    // =========================================================================

    /// Project fields of a batch of documents into typed columns
    ///
    /// Column `j`, row `i` holds `specs[j].field` of the document at
    /// `keys[i]` coerced to `specs[j].ty`; the validity bit is cleared on
    /// absence or failed coercion. See [`GatherOutput`] for the cell
    /// layout and the coercion rules.
    pub fn gather(
        &self,
        batch: &KeyBatch<'_>,
        specs: &[ColumnSpec<'_>],
        arena: &mut Arena,
    ) -> Result<GatherOutput> {
        check_column_len("collections", batch.collections.backing_len(), batch.len)?;
        check_column_len("keys", batch.keys.backing_len(), batch.len)?;
        let targets: Vec<Located> = (0..batch.len)
            .map(|i| Located::new(batch.collections.get(i), batch.keys.get(i)))
            .collect();
        let (unique, parsed) = self.load_unique(&targets, arena)?;
        let rows: Vec<Option<&Value>> = targets
            .iter()
            .map(|t| {
                let at = unique.binary_search(t).unwrap_or(usize::MAX);
                parsed.get(at).and_then(Option::as_ref)
            })
            .collect();
        gather::gather_into(&rows, specs, arena)
    }

    /// One coalesced read: distinct sorted targets plus their parsed docs
    fn load_unique(
        &self,
        targets: &[Located],
        arena: &mut Arena,
    ) -> Result<(Vec<Located>, Vec<Option<Value>>)> {
        let mut unique = targets.to_vec();
        unique.sort_unstable();
        unique.dedup();
        let read = self.substrate.read(&unique, arena)?;
        let mut parsed = Vec::with_capacity(unique.len());
        for i in 0..unique.len() {
            match read.bytes(i, arena) {
                Some(bytes) => parsed.push(Some(codec::parse_any(
                    bytes,
                    DocFormat::CANONICAL,
                    i,
                    self.limits.max_nesting_depth,
                )?)),
                None => parsed.push(None),
            }
        }
        Ok((unique, parsed))
    }
}

// =============================================================================
// Mode application
// =============================================================================

/// Apply one task to the current value of its key
///
/// Returns `false` for the one survivable per-row failure: update mode on
/// an absent key.
fn apply_mode(
    slot: &mut Option<Value>,
    input: Value,
    mode: WriteMode,
    field: Option<&str>,
    task: usize,
) -> Result<bool> {
    match mode {
        WriteMode::Upsert => set_value(slot, input, field),
        WriteMode::Update => {
            if slot.is_none() {
                return Ok(false);
            }
            set_value(slot, input, field)
        }
        WriteMode::Insert => {
            if slot.is_some() {
                return Err(LaminaError::conflict(format!(
                    "task {task} inserts over an existing document"
                )));
            }
            set_value(slot, input, field)
        }
        WriteMode::Patch => {
            let ops: json_patch::Patch = serde_json::from_value(input)
                .map_err(|e| LaminaError::parse_failed(task, format!("bad patch: {e}")))?;
            let mut doc = slot.take().unwrap_or_else(empty_object);
            match field {
                Some(field) => {
                    let mut sub = project(&doc, field).cloned().unwrap_or_else(empty_object);
                    json_patch::patch(&mut sub, &ops).map_err(|e| patch_error(task, e))?;
                    set_field(&mut doc, field, sub)?;
                }
                None => json_patch::patch(&mut doc, &ops).map_err(|e| patch_error(task, e))?,
            }
            *slot = Some(doc);
            Ok(true)
        }
        WriteMode::Merge => {
            let mut doc = slot.take().unwrap_or_else(empty_object);
            match field {
                Some(field) => {
                    let mut sub = project(&doc, field).cloned().unwrap_or_else(empty_object);
                    json_patch::merge(&mut sub, &input);
                    set_field(&mut doc, field, sub)?;
                }
                None => json_patch::merge(&mut doc, &input),
            }
            *slot = Some(doc);
            Ok(true)
        }
    }
}

fn set_value(slot: &mut Option<Value>, input: Value, field: Option<&str>) -> Result<bool> {
    match field {
        None => *slot = Some(input),
        Some(field) => {
            let mut doc = slot.take().unwrap_or(Value::Null);
            set_field(&mut doc, field, input)?;
            *slot = Some(doc);
        }
    }
    Ok(true)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn patch_error(task: usize, e: json_patch::PatchError) -> LaminaError {
    LaminaError::invalid_argument(format!("task {task} patch failed: {e}"))
}

// =============================================================================
// Helpers
// =============================================================================

fn fields_all_none(fields: &Strided<'_, Option<&str>>, len: usize) -> bool {
    match fields {
        Strided::Repeated(field) => field.is_none(),
        Strided::Items(items) => items[..len].iter().all(Option::is_none),
    }
}

fn check_column_len(name: &str, backing: Option<usize>, len: usize) -> Result<()> {
    match backing {
        Some(have) if have < len => Err(LaminaError::invalid_argument(format!(
            "{name} column has {have} entries for {len} tasks"
        ))),
        _ => Ok(()),
    }
}

/// Accumulate the JSON-pointer path of every leaf under `value`
fn collect_leaf_paths(value: &Value, prefix: &mut String, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let mark = prefix.len();
                prefix.push('/');
                prefix.push_str(&escape_token(key));
                collect_leaf_paths(child, prefix, out);
                prefix.truncate(mark);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                let mark = prefix.len();
                prefix.push('/');
                prefix.push_str(&index.to_string());
                collect_leaf_paths(child, prefix, out);
                prefix.truncate(mark);
            }
        }
        _ => {
            out.insert(prefix.clone());
        }
    }
}
