use std::{collections::VecDeque, ops::Bound, path::Path, sync::Arc};

use jammdb::{DB, Data};
use log::error;

use crate::errors::{Errors, Result};

use super::{InsertOutcome, OrderedStore, within_start};

const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";
const BPTREE_ENTRY_BUCKET_NAME: &str = "docidx-entries";
const BPTREE_META_BUCKET_NAME: &str = "docidx-meta";
/// 反向扫描窗口的预分配上限
const REVERSE_WINDOW_PREALLOC: usize = 1024;

/// Page-based, transactional B+ tree store backed by a jammdb file.
///
/// Every call runs in its own jammdb transaction; a bulk load runs in a
/// single write transaction that is only committed once all entries are in.
pub struct BPlusTree {
    tree: Arc<DB>,
}

impl BPlusTree {
    pub fn new(dir_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir_path).map_err(|e| {
            error!("Failed to create bptree index dir {}: {}", dir_path.display(), e);
            Errors::StoreError(e.to_string())
        })?;
        let tree_path = dir_path.join(BPTREE_INDEX_FILE_NAME);
        let tree = DB::open(tree_path).map_err(store_err)?;
        Ok(Self {
            tree: Arc::new(tree),
        })
    }
}

fn store_err(e: jammdb::Error) -> Errors {
    error!("bptree index failure: {}", e);
    Errors::StoreError(e.to_string())
}

fn entry_key(data: Data) -> Option<Vec<u8>> {
    match data {
        Data::KeyValue(kv) => Some(kv.key().to_vec()),
        Data::Bucket(_) => None,
    }
}

fn bucket_err(e: jammdb::Error) -> Errors {
    if e == jammdb::Error::BucketMissing {
        return Errors::IndexNotInitialized;
    }
    store_err(e)
}

impl OrderedStore for BPlusTree {
    fn create(&self) -> Result<()> {
        let tx = self.tree.tx(true).map_err(store_err)?;
        match tx.create_bucket(BPTREE_ENTRY_BUCKET_NAME) {
            Ok(_) => {}
            Err(jammdb::Error::BucketExists) => return Err(Errors::IndexAlreadyInitialized),
            Err(e) => return Err(store_err(e)),
        }
        tx.commit().map_err(store_err)
    }

    fn exists(&self) -> Result<bool> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        match tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME) {
            Ok(_) => Ok(true),
            Err(jammdb::Error::BucketMissing) => Ok(false),
            Err(e) => Err(store_err(e)),
        }
    }

    fn insert(
        &self,
        entry: &[u8],
        key_len: usize,
        no_overwrite_key: bool,
    ) -> Result<InsertOutcome> {
        let tx = self.tree.tx(true).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        if bucket.get_kv(entry).is_some() {
            return Ok(InsertOutcome::AlreadyExists);
        }
        if no_overwrite_key {
            let key = &entry[..key_len];
            let taken = {
                let mut cursor = bucket.cursor();
                cursor.seek(key);
                // seek 可能停在目标之前的条目上
                cursor
                    .filter_map(entry_key)
                    .find(|k| k.as_slice() >= key)
                    .is_some_and(|k| k.starts_with(key))
            };
            if taken {
                return Ok(InsertOutcome::AlreadyExists);
            }
        }
        bucket.put(entry.to_vec(), Vec::new()).map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        Ok(InsertOutcome::Inserted)
    }

    fn remove(&self, entry: &[u8]) -> Result<bool> {
        let tx = self.tree.tx(true).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        if let Err(e) = bucket.delete(entry) {
            if e == jammdb::Error::KeyValueMissing {
                return Ok(false);
            }
            return Err(store_err(e));
        }
        tx.commit().map_err(store_err)?;
        Ok(true)
    }

    fn contains(&self, entry: &[u8]) -> Result<bool> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        Ok(bucket.get_kv(entry).is_some())
    }

    fn first_with_prefix(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        let mut cursor = bucket.cursor();
        cursor.seek(prefix);
        let first = cursor
            .filter_map(entry_key)
            .find(|k| k.as_slice() >= prefix)
            .filter(|k| k.starts_with(prefix));
        Ok(first)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        let mut cursor = bucket.cursor();
        cursor.seek(prefix);
        let count = cursor
            .filter_map(entry_key)
            .skip_while(|k| k.as_slice() < prefix)
            .take_while(|k| k.starts_with(prefix))
            .count();
        Ok(count)
    }

    fn scan(&self, start: Bound<&[u8]>, reverse: bool, limit: usize) -> Result<Vec<Vec<u8>>> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        if reverse {
            // jammdb 游标只能正向移动，只保留边界前最后 limit 个条目
            let mut window = VecDeque::with_capacity(limit.min(REVERSE_WINDOW_PREALLOC));
            if limit > 0 {
                for kv in bucket
                    .kv_pairs()
                    .take_while(|kv| within_start(kv.key(), start, true))
                {
                    if window.len() == limit {
                        window.pop_front();
                    }
                    window.push_back(kv);
                }
            }
            return Ok(window.iter().rev().map(|kv| kv.key().to_vec()).collect());
        }
        let mut cursor = bucket.cursor();
        match start {
            Bound::Included(b) | Bound::Excluded(b) => {
                cursor.seek(b);
            }
            Bound::Unbounded => {}
        }
        let items = cursor
            .filter_map(entry_key)
            .filter(|k| within_start(k, start, false))
            .take(limit)
            .collect();
        Ok(items)
    }

    fn len(&self) -> Result<usize> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        Ok(bucket.kv_pairs().count())
    }

    fn is_empty(&self) -> Result<bool> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        Ok(bucket.kv_pairs().next().is_none())
    }

    fn bulk_load(&self, entries: &mut dyn Iterator<Item = Result<Vec<u8>>>) -> Result<usize> {
        let tx = self.tree.tx(true).map_err(store_err)?;
        let bucket = tx.get_bucket(BPTREE_ENTRY_BUCKET_NAME).map_err(bucket_err)?;
        if bucket.kv_pairs().next().is_some() {
            return Err(Errors::IndexNotEmpty);
        }
        let mut n = 0;
        for entry in entries {
            // 出错时直接返回，未提交的事务被丢弃
            let entry = entry?;
            bucket.put(entry, Vec::new()).map_err(store_err)?;
            n += 1;
        }
        tx.commit().map_err(store_err)?;
        Ok(n)
    }

    fn get_meta(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let tx = self.tree.tx(false).map_err(store_err)?;
        let bucket = match tx.get_bucket(BPTREE_META_BUCKET_NAME) {
            Ok(bucket) => bucket,
            Err(jammdb::Error::BucketMissing) => return Ok(None),
            Err(e) => return Err(store_err(e)),
        };
        Ok(bucket.get_kv(name).map(|kv| kv.value().to_vec()))
    }

    fn put_meta(&self, name: &str, value: &[u8]) -> Result<()> {
        let tx = self.tree.tx(true).map_err(store_err)?;
        let bucket = tx
            .get_or_create_bucket(BPTREE_META_BUCKET_NAME)
            .map_err(store_err)?;
        bucket
            .put(name.as_bytes().to_vec(), value.to_vec())
            .map_err(store_err)?;
        tx.commit().map_err(store_err)
    }
}
