//! Ordered storage backends for index entries.
//!
//! A store holds encoded `key ++ location` byte strings in ascending byte
//! order, plus a small metadata area. All index logic above this module is
//! written once against [`OrderedStore`].

pub mod bptree;
pub mod btree;
pub mod skiplist;

use std::{ops::Bound, sync::Arc};

use crate::{
    errors::Result,
    options::{IndexOptions, StoreType},
};

/// 插入结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// 条目已存在，或唯一插入时相同 key 已存在
    AlreadyExists,
}

/// Abstract ordered store, for different backends
pub trait OrderedStore: Send + Sync {
    /// 创建空的存储结构，已存在时返回 IndexAlreadyInitialized
    fn create(&self) -> Result<()>;

    /// 存储结构是否已创建
    fn exists(&self) -> Result<bool>;

    /// Insert one entry. `key_len` is the length of the key part of `entry`;
    /// with `no_overwrite_key` the insert is refused when any entry with the
    /// same key part exists.
    fn insert(&self, entry: &[u8], key_len: usize, no_overwrite_key: bool)
    -> Result<InsertOutcome>;

    /// 删除条目，返回条目是否存在
    fn remove(&self, entry: &[u8]) -> Result<bool>;

    fn contains(&self, entry: &[u8]) -> Result<bool>;

    /// 以 prefix 开头的第一个条目
    fn first_with_prefix(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>>;

    /// 以 prefix 开头的条目数
    fn count_prefix(&self, prefix: &[u8]) -> Result<usize>;

    /// Up to `limit` entries starting at `start`. Forward scans return
    /// ascending entries above the bound; reverse scans return descending
    /// entries below it.
    fn scan(&self, start: Bound<&[u8]>, reverse: bool, limit: usize) -> Result<Vec<Vec<u8>>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool>;

    /// Load ascending entries into an empty store. If the iterator yields an
    /// error nothing is kept.
    fn bulk_load(&self, entries: &mut dyn Iterator<Item = Result<Vec<u8>>>) -> Result<usize>;

    fn get_meta(&self, name: &str) -> Result<Option<Vec<u8>>>;

    fn put_meta(&self, name: &str, value: &[u8]) -> Result<()>;
}

pub fn new_store(options: &IndexOptions) -> Result<Arc<dyn OrderedStore>> {
    match options.store_type {
        StoreType::BTree => Ok(Arc::new(btree::BTree::new())),
        StoreType::SkipList => Ok(Arc::new(skiplist::SkipList::new())),
        StoreType::BPlusTree => Ok(Arc::new(bptree::BPlusTree::new(&options.dir_path)?)),
    }
}

/// 大于所有以 prefix 开头的字符串的最小字符串，prefix 全为 0xFF 时不存在
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last != u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}

/// 判断条目是否在起始边界内
pub(crate) fn within_start(entry: &[u8], start: Bound<&[u8]>, reverse: bool) -> bool {
    match (start, reverse) {
        (Bound::Unbounded, _) => true,
        (Bound::Included(b), false) => entry >= b,
        (Bound::Excluded(b), false) => entry > b,
        (Bound::Included(b), true) => entry <= b,
        (Bound::Excluded(b), true) => entry < b,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::Errors;

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[1, 0xFF, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF]), None);
        assert_eq!(prefix_successor(&[]), None);
    }

    /// 所有后端共用的行为测试
    pub(crate) fn exercise_store(store: &dyn OrderedStore) {
        assert_eq!(store.exists(), Ok(false));
        assert_eq!(store.create(), Ok(()));
        assert_eq!(store.exists(), Ok(true));
        assert_eq!(store.create(), Err(Errors::IndexAlreadyInitialized));
        assert_eq!(store.is_empty(), Ok(true));

        assert_eq!(store.insert(b"a1", 1, false), Ok(InsertOutcome::Inserted));
        assert_eq!(store.insert(b"a2", 1, false), Ok(InsertOutcome::Inserted));
        assert_eq!(store.insert(b"a2", 1, false), Ok(InsertOutcome::AlreadyExists));
        assert_eq!(store.insert(b"a3", 1, true), Ok(InsertOutcome::AlreadyExists));
        assert_eq!(store.insert(b"b1", 1, true), Ok(InsertOutcome::Inserted));
        assert_eq!(store.insert(b"c9", 1, false), Ok(InsertOutcome::Inserted));
        assert_eq!(store.len(), Ok(4));

        assert_eq!(store.contains(b"a2"), Ok(true));
        assert_eq!(store.contains(b"a3"), Ok(false));
        assert_eq!(store.first_with_prefix(b"a"), Ok(Some(b"a1".to_vec())));
        assert_eq!(store.first_with_prefix(b"bb"), Ok(None));
        assert_eq!(store.count_prefix(b"a"), Ok(2));
        assert_eq!(store.count_prefix(b"z"), Ok(0));
        // 目标之前还有更小的条目
        assert_eq!(store.first_with_prefix(b"b"), Ok(Some(b"b1".to_vec())));
        assert_eq!(store.first_with_prefix(b"c"), Ok(Some(b"c9".to_vec())));
        assert_eq!(store.first_with_prefix(b"a3"), Ok(None));
        assert_eq!(store.count_prefix(b"b"), Ok(1));
        assert_eq!(store.count_prefix(b"c9"), Ok(1));
        assert_eq!(store.insert(b"b7", 1, true), Ok(InsertOutcome::AlreadyExists));
        assert_eq!(store.insert(b"c0", 1, true), Ok(InsertOutcome::AlreadyExists));
        assert_eq!(store.len(), Ok(4));

        assert_eq!(
            store.scan(Bound::Unbounded, false, 10),
            Ok(vec![b"a1".to_vec(), b"a2".to_vec(), b"b1".to_vec(), b"c9".to_vec()])
        );
        assert_eq!(
            store.scan(Bound::Included(b"a2"), false, 2),
            Ok(vec![b"a2".to_vec(), b"b1".to_vec()])
        );
        assert_eq!(
            store.scan(Bound::Excluded(b"a2"), false, 10),
            Ok(vec![b"b1".to_vec(), b"c9".to_vec()])
        );
        assert_eq!(
            store.scan(Bound::Included(b"b1"), true, 10),
            Ok(vec![b"b1".to_vec(), b"a2".to_vec(), b"a1".to_vec()])
        );
        assert_eq!(
            store.scan(Bound::Excluded(b"b1"), true, 1),
            Ok(vec![b"a2".to_vec()])
        );
        assert_eq!(
            store.scan(Bound::Unbounded, true, 2),
            Ok(vec![b"c9".to_vec(), b"b1".to_vec()])
        );

        assert_eq!(store.remove(b"a1"), Ok(true));
        assert_eq!(store.remove(b"a1"), Ok(false));
        assert_eq!(store.len(), Ok(3));

        // 非空存储不能批量加载
        let mut entries = vec![Ok(b"x".to_vec())].into_iter();
        assert_eq!(store.bulk_load(&mut entries), Err(Errors::IndexNotEmpty));

        assert_eq!(store.get_meta("multikey"), Ok(None));
        assert_eq!(store.put_meta("multikey", &[1]), Ok(()));
        assert_eq!(store.get_meta("multikey"), Ok(Some(vec![1])));
    }

    /// 按确定性乱序插入大量条目，与 BTreeSet 逐项比对
    pub(crate) fn exercise_prefix_lookups(store: &dyn OrderedStore) {
        store.create().unwrap();
        let mut model = std::collections::BTreeSet::new();
        for i in 0..300u32 {
            let k = (i * 7919) % 300;
            // 3 字节 key 加 1 字节后缀，key 相同的条目最多 3 个
            let entry = vec![b'k', (k / 3 / 10) as u8, (k / 3 % 10) as u8, (k % 3) as u8];
            assert_eq!(store.insert(&entry, 3, false), Ok(InsertOutcome::Inserted));
            model.insert(entry);
        }
        assert_eq!(store.len(), Ok(model.len()));

        for hi in 0..11u8 {
            for lo in 0..10u8 {
                let key = [b'k', hi, lo];
                let expected_first = model
                    .range::<[u8], _>((Bound::Included(&key[..]), Bound::Unbounded))
                    .next()
                    .filter(|e| e.starts_with(&key))
                    .cloned();
                let expected_count = model.iter().filter(|e| e.starts_with(&key)).count();
                assert_eq!(store.first_with_prefix(&key), Ok(expected_first.clone()));
                assert_eq!(store.count_prefix(&key), Ok(expected_count));

                let mut dup = key.to_vec();
                dup.push(9);
                let outcome = store.insert(&dup, 3, true).unwrap();
                if expected_first.is_some() {
                    assert_eq!(outcome, InsertOutcome::AlreadyExists);
                } else {
                    assert_eq!(outcome, InsertOutcome::Inserted);
                    assert_eq!(store.remove(&dup), Ok(true));
                }
            }
        }

        // 分批反向扫描完整覆盖全部条目
        let mut reversed = Vec::new();
        let mut batch = store.scan(Bound::Unbounded, true, 7).unwrap();
        while let Some(last) = batch.last().cloned() {
            reversed.extend(batch);
            batch = store.scan(Bound::Excluded(last.as_slice()), true, 7).unwrap();
        }
        assert_eq!(reversed, model.iter().rev().cloned().collect::<Vec<_>>());
        assert_eq!(store.scan(Bound::Unbounded, true, 0), Ok(vec![]));
    }

    pub(crate) fn exercise_bulk_load(store: &dyn OrderedStore) {
        store.create().unwrap();
        let mut failing = vec![Ok(b"a".to_vec()), Err(Errors::Interrupted)].into_iter();
        assert_eq!(store.bulk_load(&mut failing), Err(Errors::Interrupted));
        assert_eq!(store.is_empty(), Ok(true));

        let mut entries = vec![Ok(b"a".to_vec()), Ok(b"b".to_vec()), Ok(b"c".to_vec())].into_iter();
        assert_eq!(store.bulk_load(&mut entries), Ok(3));
        assert_eq!(
            store.scan(Bound::Unbounded, false, 10),
            Ok(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
        );
    }
}
