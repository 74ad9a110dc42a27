//! Tantivy partitions
//!
//! One document per index entry:
//!
//! | field          | options                | content                          |
//! |----------------|------------------------|----------------------------------|
//! | `entity`       | INDEXED, STORED, FAST  | entity id                        |
//! | `posting`      | INDEXED bytes          | bincode of `(entity, values)`    |
//! | `values`       | STORED bytes           | bincode of the value tuple       |
//! | `exact`        | STRING                 | `{slot}:{coarse hash}` per slot  |
//! | `class`        | STRING                 | `{slot}:{b,n,s}` per slot        |
//! | `str_{slot}`   | STRING                 | raw string value                 |
//! | `num_{slot}`   | INDEXED f64            | number coerced to `f64`          |
//!
//! Ranges and string predicates run against the per-slot fields; number
//! ranges are widened to the coarse `f64` keys and rechecked on the stored
//! tuple. Searchers see what was committed by the last `refresh`; a mirror
//! of the stored entries answers writer-side lookups before that.

use crate::codec::remove_dir_if_exists;
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::partition::{EntityIds, IndexPartition, PartitionBackend, PartitionOp, PartitionSearcher};
use crate::partitioned::PartitionedIndexProvider;
use crate::query::IndexQuery;
use crate::sampling::IndexSampler;
use crate::types::{EntityId, IndexDescriptor};
use crate::value::{same_tuple, Value, ValueClass, ValueTuple};
use ::tantivy::collector::DocSetCollector;
use ::tantivy::query::{AllQuery, BooleanQuery, Query, RangeQuery, RegexQuery, TermQuery};
use ::tantivy::schema::{Field, IndexRecordOption, Schema, Value as _, FAST, INDEXED, STORED, STRING};
use ::tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use roaring::RoaringTreemap;
use smallvec::SmallVec;
use std::fs;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Tantivy refuses writer budgets below this
const MIN_WRITER_HEAP: usize = 15_000_000;

const ENTITY: &str = "entity";

/// Any string, newlines included
const ANY: &str = "(?s:.*)";

/// Provider over tantivy partitions.
pub type TantivyIndexProvider = PartitionedIndexProvider<TantivyBackend>;

impl TantivyIndexProvider {
    /// Open the tantivy provider rooted at `config.root`.
    pub fn open(config: &IndexConfig) -> Result<Self> {
        Self::new(TantivyBackend::new(config.writer_heap_bytes), config)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TantivyBackend {
    writer_heap_bytes: usize,
}

impl TantivyBackend {
    pub fn new(writer_heap_bytes: usize) -> Self {
        Self {
            writer_heap_bytes: writer_heap_bytes.max(MIN_WRITER_HEAP),
        }
    }
}

impl Default for TantivyBackend {
    fn default() -> Self {
        Self::new(50_000_000)
    }
}

impl PartitionBackend for TantivyBackend {
    type Partition = TantivyPartition;

    fn name(&self) -> &'static str {
        "tantivy"
    }

    fn version(&self) -> &'static str {
        "2.0"
    }

    fn create_partition(&self, dir: &Path, ordinal: usize, descriptor: &IndexDescriptor) -> Result<TantivyPartition> {
        remove_dir_if_exists(dir)?;
        fs::create_dir_all(dir)?;
        let arity = descriptor.schema().arity();
        let index = Index::create_in_dir(dir, build_schema(arity))?;
        TantivyPartition::new(index, ordinal, arity, self.writer_heap_bytes)
    }

    fn open_partition(&self, dir: &Path, ordinal: usize, descriptor: &IndexDescriptor) -> Result<TantivyPartition> {
        let index = Index::open_in_dir(dir)?;
        TantivyPartition::new(index, ordinal, descriptor.schema().arity(), self.writer_heap_bytes)
    }
}

fn build_schema(arity: usize) -> Schema {
    let mut schema_builder = Schema::builder();
    schema_builder.add_u64_field(ENTITY, INDEXED | STORED | FAST);
    schema_builder.add_bytes_field("posting", INDEXED);
    schema_builder.add_bytes_field("values", STORED);
    schema_builder.add_text_field("exact", STRING);
    schema_builder.add_text_field("class", STRING);
    for slot in 0..arity {
        schema_builder.add_text_field(&format!("str_{slot}"), STRING);
        schema_builder.add_f64_field(&format!("num_{slot}"), INDEXED);
    }
    schema_builder.build()
}

#[derive(Debug, Clone, Copy)]
struct SlotFields {
    text: Field,
    number: Field,
}

/// How a query runs against one partition.
enum Plan {
    Empty,
    /// Every hit matches.
    Hits(Box<dyn Query>),
    /// Hits are candidates; the stored tuple decides.
    Recheck(Box<dyn Query>),
}

#[derive(Debug, Clone)]
struct Fields {
    entity: Field,
    posting: Field,
    values: Field,
    exact: Field,
    class: Field,
    slots: Vec<SlotFields>,
}

impl Fields {
    fn from_schema(schema: &Schema, arity: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(arity);
        for slot in 0..arity {
            slots.push(SlotFields {
                text: schema.get_field(&format!("str_{slot}"))?,
                number: schema.get_field(&format!("num_{slot}"))?,
            });
        }
        Ok(Self {
            entity: schema.get_field(ENTITY)?,
            posting: schema.get_field("posting")?,
            values: schema.get_field("values")?,
            exact: schema.get_field("exact")?,
            class: schema.get_field("class")?,
            slots,
        })
    }

    fn document(&self, entity: EntityId, values: &[Value]) -> Result<TantivyDocument> {
        let mut doc = TantivyDocument::default();
        doc.add_u64(self.entity, entity);
        doc.add_bytes(self.posting, &posting_key(entity, values)?);
        doc.add_bytes(self.values, &bincode::serialize(values)?);
        for (slot, value) in values.iter().enumerate() {
            doc.add_text(self.exact, exact_key(slot, value));
            doc.add_text(self.class, class_key(slot, value.class()));
            let Some(fields) = self.slots.get(slot) else {
                continue;
            };
            match value {
                Value::String(s) => doc.add_text(fields.text, s),
                Value::Int(_) | Value::Float(_) => {
                    if let Some(n) = value.as_f64() {
                        doc.add_f64(fields.number, number_key(n));
                    }
                }
                Value::Bool(_) => {}
            }
        }
        Ok(doc)
    }

    fn read(&self, doc: &TantivyDocument) -> Result<(EntityId, ValueTuple)> {
        let entity = doc
            .get_first(self.entity)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| IndexError::InvalidUpdate("stored document without entity".into()))?;
        let bytes = doc
            .get_first(self.values)
            .and_then(|v| v.as_bytes())
            .ok_or_else(|| IndexError::InvalidUpdate(format!("stored document for {entity} without values")))?;
        Ok((entity, bincode::deserialize(bytes)?))
    }

    fn class_query(&self, slot: usize, class: ValueClass) -> Box<dyn Query> {
        let term = Term::from_field_text(self.class, &class_key(slot, class));
        Box::new(TermQuery::new(term, IndexRecordOption::Basic))
    }

    fn plan(&self, slot: usize, query: &IndexQuery) -> Result<Plan> {
        let Some(fields) = self.slots.get(slot).copied() else {
            return Ok(Plan::Empty);
        };
        let plan = match query {
            IndexQuery::Exists { .. } => Plan::Hits(Box::new(AllQuery)),
            IndexQuery::Exact { value, .. } => {
                let term = Term::from_field_text(self.exact, &exact_key(slot, value));
                Plan::Hits(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            IndexQuery::Range { lower, upper, .. } => match IndexQuery::range_class(lower, upper) {
                None => Plan::Empty,
                Some(None) => Plan::Hits(Box::new(BooleanQuery::union(vec![
                    self.class_query(slot, ValueClass::Number),
                    self.class_query(slot, ValueClass::String),
                ]))),
                Some(Some(ValueClass::String)) => Plan::Hits(Box::new(RangeQuery::new(
                    text_bound(fields.text, lower),
                    text_bound(fields.text, upper),
                ))),
                Some(Some(ValueClass::Number)) => {
                    if is_nan(lower) || is_nan(upper) {
                        Plan::Empty
                    } else {
                        Plan::Recheck(Box::new(RangeQuery::new(
                            number_bound(fields.number, lower),
                            number_bound(fields.number, upper),
                        )))
                    }
                }
                Some(Some(ValueClass::Bool)) => Plan::Recheck(self.class_query(slot, ValueClass::Bool)),
            },
            IndexQuery::StringPrefix { prefix, .. } => {
                Plan::Hits(regex(fields.text, &format!("{}{ANY}", escape(prefix)))?)
            }
            IndexQuery::StringSuffix { suffix, .. } => {
                Plan::Hits(regex(fields.text, &format!("{ANY}{}", escape(suffix)))?)
            }
            IndexQuery::StringContains { needle, .. } => {
                Plan::Hits(regex(fields.text, &format!("{ANY}{}{ANY}", escape(needle)))?)
            }
        };
        Ok(plan)
    }
}

fn posting_key(entity: EntityId, values: &[Value]) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&(entity, values))?)
}

fn exact_key(slot: usize, value: &Value) -> String {
    format!("{slot}:{:016x}", value.coarse_hash())
}

fn class_key(slot: usize, class: ValueClass) -> String {
    let tag = match class {
        ValueClass::Bool => 'b',
        ValueClass::Number => 'n',
        ValueClass::String => 's',
    };
    format!("{slot}:{tag}")
}

/// `-0.0` and `0.0` compare equal, so they share a key.
fn number_key(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

fn is_nan(bound: &Bound<Value>) -> bool {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => v.as_f64().is_some_and(f64::is_nan),
        Bound::Unbounded => false,
    }
}

fn text_bound(field: Field, bound: &Bound<Value>) -> Bound<Term> {
    let term = |v: &Value| Term::from_field_text(field, v.as_str().unwrap_or_default());
    match bound {
        Bound::Included(v) => Bound::Included(term(v)),
        Bound::Excluded(v) => Bound::Excluded(term(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Both ends become inclusive: `f64` keys round large integers, so values
/// next to an exclusive bound may share its key.
fn number_bound(field: Field, bound: &Bound<Value>) -> Bound<Term> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => {
            let n = v.as_f64().unwrap_or_default();
            Bound::Included(Term::from_field_f64(field, number_key(n)))
        }
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn regex(field: Field, pattern: &str) -> Result<Box<dyn Query>> {
    Ok(Box::new(RegexQuery::from_pattern(pattern, field)?))
}

/// Escape regex syntax so `text` matches literally.
fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$' | '#' | '&' | '-' | '~'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Every entry held, including writes not committed yet.
#[derive(Default)]
struct Mirror {
    entries: AHashMap<EntityId, SmallVec<[ValueTuple; 1]>>,
    len: u64,
}

/// Tantivy-based index partition
pub struct TantivyPartition {
    ordinal: usize,
    fields: Arc<Fields>,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    mirror: RwLock<Mirror>,
    dirty: AtomicBool,
}

impl TantivyPartition {
    fn new(index: Index, ordinal: usize, arity: usize, writer_heap_bytes: usize) -> Result<Self> {
        let fields = Fields::from_schema(&index.schema(), arity)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer: IndexWriter = index.writer_with_num_threads(1, writer_heap_bytes)?;

        let mut mirror = Mirror::default();
        for (entity, values) in collect_entries(&reader.searcher(), &fields, &AllQuery)? {
            mirror.entries.entry(entity).or_default().push(values);
            mirror.len += 1;
        }
        debug!(partition = ordinal, entries = mirror.len, "opened tantivy partition");

        Ok(Self {
            ordinal,
            fields: Arc::new(fields),
            reader,
            writer: Mutex::new(Some(writer)),
            mirror: RwLock::new(mirror),
            dirty: AtomicBool::new(false),
        })
    }

    fn closed(&self) -> IndexError {
        IndexError::Partition {
            partition: self.ordinal,
            reason: "partition is closed".into(),
        }
    }

    fn commit(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return Err(self.closed());
        };
        if let Err(e) = writer.commit() {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        self.reader.reload()?;
        Ok(())
    }
}

impl IndexPartition for TantivyPartition {
    type Searcher = TantivySearcher;

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn acquire_searcher(&self) -> Result<TantivySearcher> {
        if self.writer.lock().is_none() {
            return Err(self.closed());
        }
        Ok(TantivySearcher {
            ordinal: self.ordinal,
            fields: Arc::clone(&self.fields),
            searcher: Some(self.reader.searcher()),
        })
    }

    fn apply(&self, op: &PartitionOp) -> Result<bool> {
        let mut mirror = self.mirror.write();
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return Err(self.closed());
        };
        let changed = match op {
            PartitionOp::Insert { entity, values } => {
                let held = mirror
                    .entries
                    .get(entity)
                    .is_some_and(|tuples| tuples.iter().any(|t| same_tuple(t, values)));
                if held {
                    false
                } else {
                    writer.add_document(self.fields.document(*entity, values)?)?;
                    mirror.entries.entry(*entity).or_default().push(values.clone());
                    mirror.len += 1;
                    true
                }
            }
            PartitionOp::Delete { entity, values } => {
                let stored = mirror.entries.get_mut(entity).and_then(|tuples| {
                    let pos = tuples.iter().position(|t| same_tuple(t, values))?;
                    Some(tuples.remove(pos))
                });
                match stored {
                    Some(stored) => {
                        if mirror.entries.get(entity).is_some_and(|t| t.is_empty()) {
                            mirror.entries.remove(entity);
                        }
                        mirror.len -= 1;
                        let key = posting_key(*entity, &stored)?;
                        writer.delete_term(Term::from_field_bytes(self.fields.posting, &key));
                        true
                    }
                    None => false,
                }
            }
            PartitionOp::DeleteEntity { entity } => match mirror.entries.remove(entity) {
                Some(tuples) => {
                    mirror.len -= tuples.len() as u64;
                    writer.delete_term(Term::from_field_u64(self.fields.entity, *entity));
                    true
                }
                None => false,
            },
        };
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(changed)
    }

    fn values_of(&self, entity: EntityId) -> Result<Vec<ValueTuple>> {
        Ok(self
            .mirror
            .read()
            .entries
            .get(&entity)
            .map(|tuples| tuples.to_vec())
            .unwrap_or_default())
    }

    fn entry_count(&self) -> u64 {
        self.mirror.read().len
    }

    fn refresh(&self) -> Result<()> {
        self.commit()
    }

    fn flush(&self) -> Result<()> {
        self.commit()
    }

    /// Commit and release the writer lock on the index directory.
    fn close(&self) -> Result<()> {
        let committed = self.commit();
        let Some(writer) = self.writer.lock().take() else {
            return committed;
        };
        let merged = writer.wait_merging_threads();
        debug!(partition = self.ordinal, "closed tantivy partition");
        committed?;
        merged?;
        Ok(())
    }
}

/// Committed snapshot of one tantivy partition.
pub struct TantivySearcher {
    ordinal: usize,
    fields: Arc<Fields>,
    searcher: Option<Searcher>,
}

impl TantivySearcher {
    fn searcher(&self) -> Result<&Searcher> {
        self.searcher.as_ref().ok_or_else(|| IndexError::Partition {
            partition: self.ordinal,
            reason: "searcher is closed".into(),
        })
    }
}

impl PartitionSearcher for TantivySearcher {
    fn search(&self, slot: usize, query: &IndexQuery) -> Result<EntityIds<'_>> {
        let searcher = self.searcher()?;
        let ids: RoaringTreemap = match self.fields.plan(slot, query)? {
            Plan::Empty => RoaringTreemap::new(),
            Plan::Hits(q) => collect_entities(searcher, q.as_ref())?,
            Plan::Recheck(q) => collect_entries(searcher, &self.fields, q.as_ref())?
                .into_iter()
                .filter(|(_, values)| values.get(slot).is_some_and(|v| query.accepts(v)))
                .map(|(entity, _)| entity)
                .collect(),
        };
        Ok(Box::new(ids.into_iter()))
    }

    fn stored_values(&self, entity: EntityId) -> Result<Vec<ValueTuple>> {
        let term = Term::from_field_u64(self.fields.entity, entity);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        Ok(collect_entries(self.searcher()?, &self.fields, &query)?
            .into_iter()
            .map(|(_, values)| values)
            .collect())
    }

    fn sample_into(&self, sampler: &mut dyn IndexSampler) -> Result<()> {
        for (_, values) in collect_entries(self.searcher()?, &self.fields, &AllQuery)? {
            sampler.include(&values);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.searcher = None;
        Ok(())
    }
}

/// Entity ids of the hits, read from the fast field without loading documents.
fn collect_entities(searcher: &Searcher, query: &dyn Query) -> Result<RoaringTreemap> {
    let columns = searcher
        .segment_readers()
        .iter()
        .map(|segment| segment.fast_fields().u64(ENTITY))
        .collect::<::tantivy::Result<Vec<_>>>()?;
    let mut ids = RoaringTreemap::new();
    for address in searcher.search(query, &DocSetCollector)? {
        let entity = columns
            .get(address.segment_ord as usize)
            .and_then(|column| column.first(address.doc_id));
        if let Some(entity) = entity {
            ids.insert(entity);
        }
    }
    Ok(ids)
}

fn collect_entries(searcher: &Searcher, fields: &Fields, query: &dyn Query) -> Result<Vec<(EntityId, ValueTuple)>> {
    let mut entries = Vec::new();
    for address in searcher.search(query, &DocSetCollector)? {
        let doc: TantivyDocument = searcher.doc(address)?;
        entries.push(fields.read(&doc)?);
    }
    Ok(entries)
}
