//! Directional, resumable cursors over the entries of one index.
//!
//! A cursor prefetches entries from the store in batches. Saving a position
//! drops the prefetched batch and keeps only the current entry; restoring
//! re-seeks the store from that entry, so entries removed while the cursor
//! was saved are skipped and entries added after the saved point are seen.

use std::{collections::VecDeque, ops::Bound, sync::Arc};

use crate::{
    data::{
        index_entry::{IndexEntry, entry_key_bytes, entry_location},
        record::{RECORD_LOCATION_SIZE, RecordLocation},
    },
    errors::{Errors, Result},
    key::{Key, KeyCodec, Value},
    store::{OrderedStore, prefix_successor},
};

/// 游标方向，创建后不可改变
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CursorState {
    /// 当前条目的完整字节
    Positioned(Vec<u8>),
    EndOfStream,
    /// 暂停时保存的条目
    Saved(Vec<u8>),
}

pub struct IndexCursor {
    store: Arc<dyn OrderedStore>,
    codec: KeyCodec,
    direction: ScanDirection,
    batch_size: usize,
    state: CursorState,
    /// 当前条目之后已预取的条目
    buffer: VecDeque<Vec<u8>>,
    /// 最近一次预取已到达存储末尾
    exhausted: bool,
}

impl IndexCursor {
    pub(crate) fn new(
        store: Arc<dyn OrderedStore>,
        codec: KeyCodec,
        direction: ScanDirection,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            codec,
            direction,
            batch_size: batch_size.max(1),
            state: CursorState::EndOfStream,
            buffer: VecDeque::new(),
            exhausted: true,
        }
    }

    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    pub fn is_eof(&self) -> bool {
        self.state == CursorState::EndOfStream
    }

    pub fn is_saved(&self) -> bool {
        matches!(self.state, CursorState::Saved(_))
    }

    fn reverse(&self) -> bool {
        self.direction == ScanDirection::Reverse
    }

    /// Position on the first entry at or past `values` in this cursor's
    /// direction. `values` may name only the leading fields of the index;
    /// with `inclusive == false` every entry whose leading fields equal
    /// `values` is skipped.
    pub fn seek(&mut self, values: &[Value], inclusive: bool) -> Result<()> {
        let prefix = self.codec.encode_prefix(values)?;
        self.seek_key(&prefix, inclusive)
    }

    /// 跳过所有与 values 相等的条目
    pub fn seek_after(&mut self, values: &[Value]) -> Result<()> {
        self.seek(values, false)
    }

    /// [`IndexCursor::seek`] over an already encoded (possibly partial) key.
    pub fn seek_key(&mut self, key: &Key, inclusive: bool) -> Result<()> {
        let prefix = key.as_bytes();
        match (self.direction, inclusive) {
            (ScanDirection::Forward, true) => self.position_at(Bound::Included(prefix)),
            (ScanDirection::Forward, false) => match prefix_successor(prefix) {
                Some(succ) => self.position_at(Bound::Included(succ.as_slice())),
                None => {
                    self.set_eof();
                    Ok(())
                }
            },
            (ScanDirection::Reverse, true) => match prefix_successor(prefix) {
                Some(succ) => self.position_at(Bound::Excluded(succ.as_slice())),
                None => self.position_at(Bound::Unbounded),
            },
            (ScanDirection::Reverse, false) => self.position_at(Bound::Excluded(prefix)),
        }
    }

    /// Compound seek: one bound value per leading field with a per-field
    /// inclusivity. All fields must share the same inclusivity.
    pub fn seek_fields(&mut self, position: &[Value], inclusive: &[bool]) -> Result<()> {
        let shared = inclusive.first().copied().unwrap_or(true);
        if inclusive.iter().any(|i| *i != shared) {
            return Err(Errors::MixedBoundInclusivity);
        }
        self.seek(position, shared)
    }

    /// Seek to the key made of the first `key_begin_len` fields of
    /// `key_begin` followed by the remaining fields of `key_end`. With
    /// `after_key` the cursor moves past every entry matching that key. The
    /// trailing `key_end` fields must all be inclusive exactly when
    /// `after_key` is false.
    pub fn skip(
        &mut self,
        key_begin: &[Value],
        key_begin_len: usize,
        after_key: bool,
        key_end: &[Value],
        key_end_inclusive: &[bool],
    ) -> Result<()> {
        let mut position = key_begin
            .iter()
            .take(key_begin_len)
            .cloned()
            .collect::<Vec<_>>();
        for (i, value) in key_end.iter().enumerate().skip(key_begin_len) {
            let inclusive = key_end_inclusive.get(i).copied().unwrap_or(!after_key);
            if inclusive == after_key {
                return Err(Errors::MixedBoundInclusivity);
            }
            position.push(value.clone());
        }
        self.seek(&position, !after_key)
    }

    /// Advance one entry. At end of stream this is a no-op.
    pub fn next(&mut self) -> Result<()> {
        match self.state {
            CursorState::Positioned(_) => self.advance(),
            CursorState::EndOfStream => Ok(()),
            CursorState::Saved(_) => Err(Errors::CursorNotPositioned),
        }
    }

    fn current(&self) -> Result<&[u8]> {
        match &self.state {
            CursorState::Positioned(entry) => Ok(entry),
            _ => Err(Errors::CursorNotPositioned),
        }
    }

    pub fn key(&self) -> Result<Key> {
        Ok(Key::from_bytes(entry_key_bytes(self.current()?).to_vec()))
    }

    /// 当前 key 解码后的字段值
    pub fn values(&self) -> Result<Vec<Value>> {
        self.codec.decode(&self.key()?)
    }

    pub fn location(&self) -> Result<RecordLocation> {
        entry_location(self.current()?)
    }

    /// 当前条目的 key 和 location
    pub fn entry(&self) -> Result<IndexEntry> {
        IndexEntry::decode(self.current()?)
    }

    /// Whether both cursors sit on the same entry. Two cursors at end of
    /// stream also point at the same place.
    pub fn points_at(&self, other: &IndexCursor) -> bool {
        match (&self.state, &other.state) {
            (CursorState::EndOfStream, CursorState::EndOfStream) => true,
            (CursorState::Positioned(ours), CursorState::Positioned(theirs)) => {
                let (our_key, our_loc) = split_entry(ours);
                let (their_key, their_loc) = split_entry(theirs);
                // 先比较定长的 location
                our_loc == their_loc && our_key == their_key
            }
            _ => false,
        }
    }

    /// Remember the current entry and release prefetched store state.
    pub fn save_position(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, CursorState::EndOfStream);
        self.state = match state {
            CursorState::Positioned(entry) | CursorState::Saved(entry) => {
                CursorState::Saved(entry)
            }
            CursorState::EndOfStream => return Err(Errors::SaveAtEndOfStream),
        };
        self.buffer.clear();
        self.exhausted = true;
        Ok(())
    }

    /// Re-seek from the saved entry: land on it if it still exists,
    /// otherwise on the nearest entry past it in the cursor's direction.
    pub fn restore_position(&mut self) -> Result<()> {
        let saved = match std::mem::replace(&mut self.state, CursorState::EndOfStream) {
            CursorState::Saved(entry) => entry,
            other => {
                self.state = other;
                return Err(Errors::NoSavedPosition);
            }
        };
        self.position_at(Bound::Included(saved.as_slice()))
    }

    fn set_eof(&mut self) {
        self.state = CursorState::EndOfStream;
        self.buffer.clear();
        self.exhausted = true;
    }

    fn position_at(&mut self, start: Bound<&[u8]>) -> Result<()> {
        let batch = self.store.scan(start, self.reverse(), self.batch_size)?;
        self.exhausted = batch.len() < self.batch_size;
        self.buffer = batch.into();
        self.state = match self.buffer.pop_front() {
            Some(entry) => CursorState::Positioned(entry),
            None => CursorState::EndOfStream,
        };
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        if self.buffer.is_empty() && !self.exhausted {
            if let CursorState::Positioned(current) = &self.state {
                let batch =
                    self.store
                        .scan(Bound::Excluded(current.as_slice()), self.reverse(), self.batch_size)?;
                self.exhausted = batch.len() < self.batch_size;
                self.buffer.extend(batch);
            }
        }
        self.state = match self.buffer.pop_front() {
            Some(entry) => CursorState::Positioned(entry),
            None => CursorState::EndOfStream,
        };
        Ok(())
    }
}

fn split_entry(entry: &[u8]) -> (&[u8], &[u8]) {
    entry.split_at(entry.len().saturating_sub(RECORD_LOCATION_SIZE))
}
