//! Immutable, load-once record storage.
//!
//! A [`RecordStore`] is built exactly once from a complete record collection
//! and never mutated afterwards. It is shared between calls as
//! `Arc<RecordStore>`; reads need no locking because there are no writers.
//!
//! Lookups go through a `guid -> source_id -> position` index. The index keeps
//! the *first* record for each key, so results are identical to a linear scan
//! over the records in load order.

use crate::{
    Error, Result,
    proto::{Record, RecordDatabase},
};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    index: HashMap<String, HashMap<i32, usize>>,
}

impl RecordStore {
    /// Builds a store from an already materialized record collection.
    pub fn new(records: Vec<Record>) -> Self {
        let mut index: HashMap<String, HashMap<i32, usize>> = HashMap::new();
        for (pos, record) in records.iter().enumerate() {
            let (guid, source_id) = record
                .item
                .as_ref()
                .map(|item| (item.guid.as_str(), item.source_id))
                .unwrap_or_default();
            index
                .entry(guid.to_owned())
                .or_default()
                .entry(source_id)
                .or_insert(pos);
        }

        Self { records, index }
    }

    /// Loads a store from a JSON record database on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the file cannot be opened and
    /// [`Error::Parse`] if it is not a valid record database. No store is
    /// produced in either case.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let store = Self::from_reader(BufReader::new(file))?;
        tracing::info!(
            path = %path.display(),
            records = store.len(),
            "Loaded record store"
        );
        Ok(store)
    }

    /// Loads a store from any reader producing a JSON record database.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let database: RecordDatabase = serde_json::from_reader(reader)?;
        Ok(Self::new(database.record))
    }

    /// Loads a store from an in-memory JSON record database.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let database: RecordDatabase = serde_json::from_slice(bytes)?;
        Ok(Self::new(database.record))
    }

    /// Exact-match lookup by `(guid, source_id)`.
    ///
    /// A miss is not an error; callers decide what absence means.
    pub fn lookup(&self, guid: &str, source_id: i32) -> Option<&Record> {
        self.index
            .get(guid)
            .and_then(|by_source| by_source.get(&source_id))
            .map(|&pos| &self.records[pos])
    }

    /// All records in load order, including sentinels.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Records that pass [`Record::exists`], in load order.
    pub fn existing(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|record| record.exists())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl From<Vec<Record>> for RecordStore {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}
