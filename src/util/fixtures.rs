#![allow(dead_code)]

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    data::{
        document::Document,
        record::{RecordLocation, RecordStore},
    },
    errors::{Errors, Result},
    options::{IndexOptions, StoreType},
};

pub const ALL_STORE_TYPES: [StoreType; 3] =
    [StoreType::BTree, StoreType::SkipList, StoreType::BPlusTree];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 测试用索引选项，目录在返回的 TempDir 释放时删除
pub fn test_options(store_type: StoreType) -> (IndexOptions, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("failed to create test dir");
    let options = IndexOptions {
        dir_path: dir.path().to_path_buf(),
        store_type,
        cursor_batch_size: 2,
    };
    (options, dir)
}

pub fn loc(offset: u64) -> RecordLocation {
    RecordLocation::new(0, offset)
}

/// In-memory record store, locations are handed out in insertion order.
#[derive(Default)]
pub struct MemRecordStore {
    records: RwLock<BTreeMap<RecordLocation, Bytes>>,
}

impl MemRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: &Document) -> RecordLocation {
        let mut records = self.records.write();
        let location = loc(records.keys().next_back().map_or(1, |l| l.offset() + 1));
        records.insert(location, doc.encode());
        location
    }

    pub fn remove(&self, location: RecordLocation) {
        self.records.write().remove(&location);
    }
}

impl RecordStore for MemRecordStore {
    fn record_for(&self, location: RecordLocation) -> Result<Bytes> {
        self.records
            .read()
            .get(&location)
            .cloned()
            .ok_or_else(|| Errors::RecordNotFound(location.to_string()))
    }

    fn locations(&self) -> Result<Vec<RecordLocation>> {
        Ok(self.records.read().keys().copied().collect())
    }

    fn num_records(&self) -> usize {
        self.records.read().len()
    }
}
