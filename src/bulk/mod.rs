//! Bulk construction of a new index from a full document scan.
//!
//! Keys are collected into an external sorter, then replayed in ascending
//! order into the empty store with a single bulk load. Adjacent equal keys
//! are found by comparing each entry to its predecessor.

pub(crate) mod sorter;

use std::{collections::BTreeSet, fmt, sync::Arc};

use log::{info, warn};

use crate::{
    data::{
        document::KeyExtractor,
        index_entry::{encode_entry, entry_key_bytes, entry_location},
        record::RecordLocation,
    },
    errors::{Errors, Result},
    interrupt::{Interrupt, RarelyCheck},
    key::{Key, KeyCodec},
    options::BulkOptions,
    spec::IndexSpec,
    store::OrderedStore,
};

use sorter::ExternalSorter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BulkPhase {
    Scanning,
    Sorting,
    Loading,
    Committed,
}

impl BulkPhase {
    fn name(&self) -> &'static str {
        match self {
            BulkPhase::Scanning => "scanning",
            BulkPhase::Sorting => "sorting",
            BulkPhase::Loading => "loading",
            BulkPhase::Committed => "committed",
        }
    }
}

impl fmt::Display for BulkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of one bulk build, from
/// [`IndexAccessMethod::initiate_bulk`](crate::access::IndexAccessMethod::initiate_bulk)
/// until [`IndexAccessMethod::commit_bulk`](crate::access::IndexAccessMethod::commit_bulk).
pub struct BulkBuilder {
    spec: IndexSpec,
    extractor: Arc<dyn KeyExtractor>,
    options: BulkOptions,
    sorter: Option<ExternalSorter>,
    phase: BulkPhase,
    /// 扫描阶段收集的 key 总数
    nkeys: u64,
    multikey: bool,
}

impl BulkBuilder {
    pub(crate) fn new(
        spec: IndexSpec,
        extractor: Arc<dyn KeyExtractor>,
        options: BulkOptions,
    ) -> Self {
        let sorter = ExternalSorter::new(&options);
        Self {
            spec,
            extractor,
            options,
            sorter: Some(sorter),
            phase: BulkPhase::Scanning,
            nkeys: 0,
            multikey: false,
        }
    }

    pub fn phase(&self) -> BulkPhase {
        self.phase
    }

    pub fn num_keys(&self) -> u64 {
        self.nkeys
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    /// Extract the keys of one document and queue them for sorting. Returns
    /// the number of keys queued.
    pub fn insert(&mut self, document: &[u8], location: RecordLocation) -> Result<u64> {
        if self.phase != BulkPhase::Scanning {
            return Err(Errors::BulkPhaseViolation(self.phase.name()));
        }
        let sorter = self
            .sorter
            .as_mut()
            .ok_or(Errors::BulkPhaseViolation(BulkPhase::Scanning.name()))?;
        let keys = self.extractor.extract_keys(document, &self.spec)?;
        if keys.len() > 1 {
            self.multikey = true;
        }
        for key in &keys {
            sorter.add(encode_entry(key, location))?;
        }
        self.nkeys += keys.len() as u64;
        Ok(keys.len() as u64)
    }

    /// Sort the queued entries and load them into the empty store. Any
    /// failure leaves the store empty and the builder unusable.
    pub(crate) fn load(
        &mut self,
        store: &dyn OrderedStore,
        codec: &KeyCodec,
        interrupt: Option<&Interrupt>,
        dups_to_drop: Option<&mut BTreeSet<RecordLocation>>,
    ) -> Result<u64> {
        if self.phase != BulkPhase::Scanning {
            return Err(Errors::BulkPhaseViolation(self.phase.name()));
        }
        let sorter = self
            .sorter
            .take()
            .ok_or(Errors::BulkPhaseViolation(BulkPhase::Scanning.name()))?;

        self.phase = BulkPhase::Sorting;
        info!(
            "Index bulk build (1/3) sorting {} keys in {} spilled runs for index {}",
            sorter.num_entries(),
            sorter.num_runs(),
            self.spec.name
        );
        let sorted = sorter.finish()?;

        self.phase = BulkPhase::Loading;
        info!(
            "Index bulk build (2/3) loading {} keys into index {}",
            self.nkeys, self.spec.name
        );
        let dups_allowed = !self.spec.enforces_uniqueness();
        let drop_dups = self.spec.drop_dups;
        let max_dropped = self.options.max_dropped_dups;
        let index_name = &self.spec.name;

        let mut local_dups = BTreeSet::new();
        let dropped_set = dups_to_drop.unwrap_or(&mut local_dups);
        let mut num_dropped = 0usize;
        let mut rarely = RarelyCheck::new(interrupt, self.options.interrupt_check_interval);
        let mut last_key: Option<Vec<u8>> = None;

        let loaded = {
            let mut entries = sorted.filter_map(|entry| {
                let entry = match entry.and_then(|e| rarely.tick().map(|_| e)) {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(e)),
                };
                let key = entry_key_bytes(&entry);
                let matches_last = last_key.as_deref() == Some(key);
                if matches_last && !dups_allowed {
                    if !drop_dups {
                        return Some(Err(Errors::DuplicateKey {
                            index: index_name.clone(),
                            key: codec.render(&Key::from_bytes(key.to_vec())),
                        }));
                    }
                    match entry_location(&entry) {
                        Ok(location) => {
                            dropped_set.insert(location);
                        }
                        Err(e) => return Some(Err(e)),
                    }
                    num_dropped += 1;
                    if num_dropped > max_dropped {
                        return Some(Err(Errors::TooManyDroppedDuplicates { limit: max_dropped }));
                    }
                    return None;
                }
                if !matches_last {
                    last_key = Some(key.to_vec());
                }
                Some(Ok(entry))
            });
            store.bulk_load(&mut entries)? as u64
        };

        if loaded != self.nkeys && num_dropped == 0 {
            warn!(
                "not all entries were added to index {}: scanned {} keys, loaded {}",
                self.spec.name, self.nkeys, loaded
            );
        }
        self.phase = BulkPhase::Committed;
        info!(
            "Index bulk build (3/3) committed {} keys into index {}, dropped {} duplicates",
            loaded, self.spec.name, num_dropped
        );
        Ok(loaded)
    }
}
