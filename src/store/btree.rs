use parking_lot::RwLock;
use std::{
    collections::{BTreeSet, HashMap},
    ops::Bound,
    sync::Arc,
};

use crate::errors::{Errors, Result};

use super::{InsertOutcome, OrderedStore, within_start};

/// In-memory ordered store over a std BTreeSet
#[derive(Default)]
pub struct BTree {
    tree: Arc<RwLock<Option<BTreeSet<Vec<u8>>>>>,
    meta: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl BTree {
    pub fn new() -> Self {
        Self {
            tree: Default::default(),
            meta: Default::default(),
        }
    }
}

impl OrderedStore for BTree {
    fn create(&self) -> Result<()> {
        let mut write_guard = self.tree.write();
        if write_guard.is_some() {
            return Err(Errors::IndexAlreadyInitialized);
        }
        *write_guard = Some(BTreeSet::new());
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.tree.read().is_some())
    }

    fn insert(
        &self,
        entry: &[u8],
        key_len: usize,
        no_overwrite_key: bool,
    ) -> Result<InsertOutcome> {
        let mut write_guard = self.tree.write();
        let tree = write_guard.as_mut().ok_or(Errors::IndexNotInitialized)?;
        if tree.contains(entry) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        if no_overwrite_key {
            let key = &entry[..key_len];
            let mut range = tree.range::<[u8], _>((Bound::Included(key), Bound::Unbounded));
            if range.next().is_some_and(|e| e.starts_with(key)) {
                return Ok(InsertOutcome::AlreadyExists);
            }
        }
        tree.insert(entry.to_vec());
        Ok(InsertOutcome::Inserted)
    }

    fn remove(&self, entry: &[u8]) -> Result<bool> {
        let mut write_guard = self.tree.write();
        let tree = write_guard.as_mut().ok_or(Errors::IndexNotInitialized)?;
        Ok(tree.remove(entry))
    }

    fn contains(&self, entry: &[u8]) -> Result<bool> {
        let read_guard = self.tree.read();
        let tree = read_guard.as_ref().ok_or(Errors::IndexNotInitialized)?;
        Ok(tree.contains(entry))
    }

    fn first_with_prefix(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>> {
        let read_guard = self.tree.read();
        let tree = read_guard.as_ref().ok_or(Errors::IndexNotInitialized)?;
        Ok(tree
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .filter(|e| e.starts_with(prefix))
            .cloned())
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let read_guard = self.tree.read();
        let tree = read_guard.as_ref().ok_or(Errors::IndexNotInitialized)?;
        Ok(tree
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|e| e.starts_with(prefix))
            .count())
    }

    fn scan(&self, start: Bound<&[u8]>, reverse: bool, limit: usize) -> Result<Vec<Vec<u8>>> {
        let read_guard = self.tree.read();
        let tree = read_guard.as_ref().ok_or(Errors::IndexNotInitialized)?;
        let items: Vec<Vec<u8>> = if reverse {
            tree.range::<[u8], _>((Bound::Unbounded, start))
                .rev()
                .take(limit)
                .cloned()
                .collect()
        } else {
            tree.range::<[u8], _>((start, Bound::Unbounded))
                .take(limit)
                .cloned()
                .collect()
        };
        debug_assert!(items.iter().all(|e| within_start(e, start, reverse)));
        Ok(items)
    }

    fn len(&self) -> Result<usize> {
        let read_guard = self.tree.read();
        let tree = read_guard.as_ref().ok_or(Errors::IndexNotInitialized)?;
        Ok(tree.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn bulk_load(&self, entries: &mut dyn Iterator<Item = Result<Vec<u8>>>) -> Result<usize> {
        if !self.is_empty()? {
            return Err(Errors::IndexNotEmpty);
        }
        // 边读边插入暂存集合，出错时存储保持不变
        let mut staging = BTreeSet::new();
        for entry in entries {
            staging.insert(entry?);
        }
        let mut write_guard = self.tree.write();
        let tree = write_guard.as_mut().ok_or(Errors::IndexNotInitialized)?;
        if !tree.is_empty() {
            return Err(Errors::IndexNotEmpty);
        }
        let n = staging.len();
        *tree = staging;
        Ok(n)
    }

    fn get_meta(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.meta.read().get(name).cloned())
    }

    fn put_meta(&self, name: &str, value: &[u8]) -> Result<()> {
        self.meta.write().insert(name.to_string(), value.to_vec());
        Ok(())
    }
}
