//! In-memory reference store
//!
//! A partitioned, sorted table that paginates the way the real store does:
//! each response evaluates at most `limit` items and stops once the evaluated
//! data reaches the per-response byte cap. The filter runs after evaluation,
//! so a page can come back empty while still carrying a cursor.

use crate::error::StoreError;
use crate::item::{AttributeValue, Item, UniqueIdentifierSpec};
use crate::store::{
    BatchWriteOutput, BatchWriter, Cursor, Direction, Page, PageSource, QuerySpec, StoreResult,
    WriteOperation, DEFAULT_MAX_PAGE_BYTES, MAX_BATCH_SIZE,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::Arc;

/// Primary key layout of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
}

impl KeySchema {
    pub fn new(partition_key: impl Into<String>, sort_key: Option<&str>) -> Self {
        KeySchema {
            partition_key: partition_key.into(),
            sort_key: sort_key.map(str::to_string),
        }
    }

    /// Identity spec matching this key layout
    pub fn identity(&self) -> UniqueIdentifierSpec {
        UniqueIdentifierSpec {
            primary_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
        }
    }

    /// Extract the key attributes of `item`
    pub fn key_of(&self, item: &Item) -> StoreResult<Item> {
        let mut key = Item::new();
        for name in std::iter::once(&self.partition_key).chain(self.sort_key.as_ref()) {
            let value = item.get(name).ok_or_else(|| {
                StoreError::Validation(format!("item is missing key attribute '{}'", name))
            })?;
            key.insert(name.clone(), value.clone());
        }
        Ok(key)
    }
}

/// Sort-key wrapper giving attribute values the total order the table needs
#[derive(Debug, Clone)]
struct SortKey(AttributeValue);

impl SortKey {
    fn rank(&self) -> u8 {
        match &self.0 {
            AttributeValue::Null => 0,
            AttributeValue::N(_) => 1,
            AttributeValue::S(_) => 2,
            AttributeValue::B(_) => 3,
            _ => 4,
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .compare(&other.0)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

type Partition = BTreeMap<SortKey, Item>;

/// In-memory table for tests, DST and benchmarks
#[derive(Debug, Clone)]
pub struct InMemoryTable {
    name: String,
    schema: KeySchema,
    max_page_bytes: usize,
    data: Arc<RwLock<HashMap<String, Partition>>>,
}

impl InMemoryTable {
    pub fn new(name: impl Into<String>, schema: KeySchema) -> Self {
        InMemoryTable {
            name: name.into(),
            schema,
            max_page_bytes: DEFAULT_MAX_PAGE_BYTES,
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the per-response byte cap (at least one item is always returned)
    pub fn with_max_page_bytes(mut self, max_page_bytes: usize) -> Self {
        self.max_page_bytes = max_page_bytes.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &KeySchema {
        &self.schema
    }

    /// Insert or replace an item directly, bypassing batch limits
    pub fn put_item(&self, item: Item) -> StoreResult<()> {
        let (partition, sort) = self.locate(&item)?;
        self.data
            .write()
            .entry(partition)
            .or_default()
            .insert(sort, item);
        Ok(())
    }

    /// Look up an item by its key attributes
    pub fn get_item(&self, key: &Item) -> StoreResult<Option<Item>> {
        let (partition, sort) = self.locate(key)?;
        Ok(self
            .data
            .read()
            .get(&partition)
            .and_then(|p| p.get(&sort))
            .cloned())
    }

    /// Total number of items across all partitions
    pub fn len(&self) -> usize {
        self.data.read().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items stored under one partition value
    pub fn partition_len(&self, partition_value: &AttributeValue) -> usize {
        self.data
            .read()
            .get(&partition_value.canonical_string())
            .map_or(0, BTreeMap::len)
    }

    /// Clear all items (for testing)
    pub fn clear(&self) {
        self.data.write().clear();
    }

    fn locate(&self, item: &Item) -> StoreResult<(String, SortKey)> {
        let partition = item.get(&self.schema.partition_key).ok_or_else(|| {
            StoreError::Validation(format!(
                "item is missing partition key '{}'",
                self.schema.partition_key
            ))
        })?;
        let sort = match &self.schema.sort_key {
            Some(name) => item.get(name).cloned().ok_or_else(|| {
                StoreError::Validation(format!("item is missing sort key '{}'", name))
            })?,
            None => AttributeValue::Null,
        };
        Ok((partition.canonical_string(), SortKey(sort)))
    }

    fn validate(&self, spec: &QuerySpec, direction: Direction, cursor: Option<&Cursor>) -> StoreResult<()> {
        if spec.table != self.name {
            return Err(StoreError::Validation(format!(
                "requested table '{}' does not exist",
                spec.table
            )));
        }
        if spec.key_condition.partition_key != self.schema.partition_key {
            return Err(StoreError::Validation(format!(
                "key condition must address partition key '{}', got '{}'",
                self.schema.partition_key, spec.key_condition.partition_key
            )));
        }
        if let Some(cond) = &spec.key_condition.sort_key {
            if self.schema.sort_key.as_deref() != Some(cond.attribute.as_str()) {
                return Err(StoreError::Validation(format!(
                    "sort key condition on '{}' does not match the key schema",
                    cond.attribute
                )));
            }
        }
        if spec.projection.as_ref().is_some_and(|p| p.is_empty()) {
            return Err(StoreError::Validation(
                "projection must name at least one attribute".to_string(),
            ));
        }
        if spec.limit == Some(0) {
            return Err(StoreError::Validation("limit must be positive".to_string()));
        }
        if let Some(cursor) = cursor {
            if cursor.direction() != direction {
                return Err(StoreError::Validation(format!(
                    "cursor from a {} scan used for a {} scan",
                    cursor.direction(),
                    direction
                )));
            }
            if cursor.key().get(&self.schema.partition_key)
                != Some(&spec.key_condition.partition_value)
            {
                return Err(StoreError::Validation(
                    "cursor does not belong to the queried partition".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn query(&self, spec: &QuerySpec, direction: Direction, cursor: Option<&Cursor>) -> StoreResult<Page> {
        self.validate(spec, direction, cursor)?;

        let start = match cursor {
            Some(c) => {
                let (_, sort) = self.locate(c.key())?;
                Bound::Excluded(sort)
            }
            None => Bound::Unbounded,
        };

        let data = self.data.read();
        let Some(partition) = data.get(&spec.key_condition.partition_value.canonical_string())
        else {
            return Ok(Page::default());
        };

        let in_range = |item: &Item| match &spec.key_condition.sort_key {
            Some(cond) => item
                .get(&cond.attribute)
                .is_some_and(|v| cond.predicate.matches(v)),
            None => true,
        };

        let candidates: Box<dyn Iterator<Item = &Item> + '_> = match direction {
            Direction::Forward => Box::new(
                partition
                    .range((start, Bound::Unbounded))
                    .map(|(_, item)| item)
                    .filter(|item| in_range(*item)),
            ),
            Direction::Backward => Box::new(
                partition
                    .range((Bound::Unbounded, start))
                    .rev()
                    .map(|(_, item)| item)
                    .filter(|item| in_range(*item)),
            ),
        };
        let mut candidates = candidates.peekable();

        let limit = spec.limit.unwrap_or(usize::MAX);
        let mut page = Page::default();
        let mut evaluated_bytes = 0usize;
        let mut last_evaluated: Option<&Item> = None;

        while page.scanned_count < limit && evaluated_bytes < self.max_page_bytes {
            let Some(item) = candidates.next() else {
                break;
            };
            page.scanned_count += 1;
            evaluated_bytes += item.size_bytes();
            last_evaluated = Some(item);

            if spec.filter.as_ref().is_some_and(|f| !f.matches(item)) {
                continue;
            }
            page.items.push(match &spec.projection {
                Some(projection) => item.project(projection),
                None => item.clone(),
            });
        }

        if candidates.peek().is_some() {
            if let Some(last) = last_evaluated {
                page.next_cursor = Some(Cursor::new(direction, self.schema.key_of(last)?));
            }
        }

        Ok(page)
    }

    fn apply(&self, table: &str, operations: Vec<WriteOperation>) -> StoreResult<BatchWriteOutput> {
        if table != self.name {
            return Err(StoreError::Validation(format!(
                "requested table '{}' does not exist",
                table
            )));
        }
        if operations.is_empty() || operations.len() > MAX_BATCH_SIZE {
            return Err(StoreError::Validation(format!(
                "batch must contain between 1 and {} operations, got {}",
                MAX_BATCH_SIZE,
                operations.len()
            )));
        }

        let located = operations
            .into_iter()
            .map(|op| {
                let (partition, sort) = self.locate(op.payload())?;
                Ok((partition, sort, op))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut data = self.data.write();
        for (partition, sort, op) in located {
            match op {
                WriteOperation::Put(item) => {
                    data.entry(partition).or_default().insert(sort, item);
                }
                WriteOperation::Delete(_) => {
                    if let Some(p) = data.get_mut(&partition) {
                        p.remove(&sort);
                        if p.is_empty() {
                            data.remove(&partition);
                        }
                    }
                }
            }
        }

        Ok(BatchWriteOutput::default())
    }
}

impl PageSource for InMemoryTable {
    fn fetch_page<'a>(
        &'a self,
        spec: &'a QuerySpec,
        direction: Direction,
        cursor: Option<&'a Cursor>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Page>> + Send + 'a>> {
        Box::pin(async move { self.query(spec, direction, cursor) })
    }
}

impl BatchWriter for InMemoryTable {
    fn batch_write<'a>(
        &'a self,
        table: &'a str,
        operations: Vec<WriteOperation>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BatchWriteOutput>> + Send + 'a>> {
        Box::pin(async move { self.apply(table, operations) })
    }
}
