use std::{
    collections::HashMap,
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use crossbeam_skiplist::SkipSet;
use parking_lot::{Mutex, RwLock};

use crate::errors::{Errors, Result};

use super::{InsertOutcome, OrderedStore};

/// Lock-free readers over a crossbeam SkipSet; writers are serialized so
/// the key-uniqueness check and the insert happen as one step.
pub struct SkipList {
    skip_list: Arc<SkipSet<Vec<u8>>>,
    created: AtomicBool,
    write_lock: Mutex<()>,
    meta: RwLock<HashMap<String, Vec<u8>>>,
}

impl SkipList {
    pub fn new() -> Self {
        Self {
            skip_list: Arc::new(SkipSet::new()),
            created: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            meta: Default::default(),
        }
    }

    fn check_created(&self) -> Result<()> {
        if !self.created.load(Ordering::Acquire) {
            return Err(Errors::IndexNotInitialized);
        }
        Ok(())
    }

    fn first_at_or_after(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.skip_list
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|entry| entry.value().clone())
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedStore for SkipList {
    fn create(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.created.swap(true, Ordering::AcqRel) {
            return Err(Errors::IndexAlreadyInitialized);
        }
        Ok(())
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.created.load(Ordering::Acquire))
    }

    fn insert(
        &self,
        entry: &[u8],
        key_len: usize,
        no_overwrite_key: bool,
    ) -> Result<InsertOutcome> {
        self.check_created()?;
        let _guard = self.write_lock.lock();
        if self.skip_list.contains(entry) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        if no_overwrite_key {
            let key = &entry[..key_len];
            if self
                .first_at_or_after(key)
                .is_some_and(|e| e.starts_with(key))
            {
                return Ok(InsertOutcome::AlreadyExists);
            }
        }
        self.skip_list.insert(entry.to_vec());
        Ok(InsertOutcome::Inserted)
    }

    fn remove(&self, entry: &[u8]) -> Result<bool> {
        self.check_created()?;
        let _guard = self.write_lock.lock();
        Ok(self.skip_list.remove(entry).is_some())
    }

    fn contains(&self, entry: &[u8]) -> Result<bool> {
        self.check_created()?;
        Ok(self.skip_list.contains(entry))
    }

    fn first_with_prefix(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_created()?;
        Ok(self
            .first_at_or_after(prefix)
            .filter(|e| e.starts_with(prefix)))
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        self.check_created()?;
        Ok(self
            .skip_list
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|entry| entry.value().starts_with(prefix))
            .count())
    }

    fn scan(&self, start: Bound<&[u8]>, reverse: bool, limit: usize) -> Result<Vec<Vec<u8>>> {
        self.check_created()?;
        let items = if reverse {
            self.skip_list
                .range::<[u8], _>((Bound::Unbounded, start))
                .rev()
                .take(limit)
                .map(|entry| entry.value().clone())
                .collect()
        } else {
            self.skip_list
                .range::<[u8], _>((start, Bound::Unbounded))
                .take(limit)
                .map(|entry| entry.value().clone())
                .collect()
        };
        Ok(items)
    }

    fn len(&self) -> Result<usize> {
        self.check_created()?;
        Ok(self.skip_list.len())
    }

    fn is_empty(&self) -> Result<bool> {
        self.check_created()?;
        Ok(self.skip_list.is_empty())
    }

    fn bulk_load(&self, entries: &mut dyn Iterator<Item = Result<Vec<u8>>>) -> Result<usize> {
        self.check_created()?;
        let _guard = self.write_lock.lock();
        if !self.skip_list.is_empty() {
            return Err(Errors::IndexNotEmpty);
        }
        // 直接写入，出错时清空；加载前存储为空
        let mut n = 0;
        for entry in entries {
            match entry {
                Ok(entry) => {
                    self.skip_list.insert(entry);
                    n += 1;
                }
                Err(e) => {
                    self.skip_list.clear();
                    return Err(e);
                }
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_bulk_load, exercise_prefix_lookups, exercise_store};

    #[test]
    fn test_skiplist_store() {
        exercise_store(&SkipList::new());
    }

    #[test]
    fn test_skiplist_prefix_lookups() {
        exercise_prefix_lookups(&SkipList::new());
    }

    #[test]
    fn test_skiplist_bulk_load() {
        exercise_bulk_load(&SkipList::new());
    }

    #[test]
    fn test_skiplist_concurrent_unique_insert() {
        let skl = Arc::new(SkipList::new());
        skl.create().unwrap();
        let handles = (0..8u8)
            .map(|i| {
                let skl = skl.clone();
                std::thread::spawn(move || skl.insert(&[b'k', i], 1, true).unwrap())
            })
            .collect::<Vec<_>>();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == InsertOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(skl.len(), Ok(1));
    }
}
