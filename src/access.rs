use std::{
    collections::BTreeSet,
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{debug, error, info, warn};

use crate::{
    bulk::BulkBuilder,
    cursor::{IndexCursor, ScanDirection},
    data::{
        document::KeyExtractor,
        index_entry::{IndexEntry, encode_entry, entry_location},
        record::{RecordLocation, RecordStore},
    },
    errors::{Errors, Result},
    interrupt::{Interrupt, RarelyCheck},
    key::{Key, KeyCodec},
    options::{BulkOptions, IndexOptions, InsertDeleteOptions},
    spec::IndexSpec,
    store::{InsertOutcome, OrderedStore, new_store},
    ticket::UpdateTicket,
};

const META_SPEC: &str = "spec";
const META_MULTIKEY: &str = "multikey";
const META_READY: &str = "ready";

/// 单个文档的 key 插入循环中检查中断的间隔
const INSERT_INTERRUPT_CHECK_INTERVAL: usize = 64;
/// validate 扫描时每批读取的条目数
const VALIDATE_BATCH_SIZE: usize = 1024;

/// Keeps one index consistent with the documents of its collection.
///
/// Key extraction is delegated to a [`KeyExtractor`] and physical storage to
/// an [`OrderedStore`]. The only persistent state besides the entries is the
/// index metadata: the `IndexSpec`, the multikey flag and the ready flag.
pub struct IndexAccessMethod {
    spec: IndexSpec,
    codec: KeyCodec,
    store: Arc<dyn OrderedStore>,
    extractor: Arc<dyn KeyExtractor>,
    multikey: AtomicBool,
    /// 索引构建完成前为 false
    ready: AtomicBool,
    cursor_batch_size: usize,
    interrupt: Option<Interrupt>,
}

impl IndexAccessMethod {
    /// Create the access method over a new store built from `options`. If
    /// the store already holds an index its metadata is loaded.
    pub fn new(
        spec: IndexSpec,
        options: &IndexOptions,
        extractor: Arc<dyn KeyExtractor>,
    ) -> Result<Self> {
        let store = new_store(options)?;
        Self::with_store(spec, store, extractor, options)
    }

    pub fn with_store(
        spec: IndexSpec,
        store: Arc<dyn OrderedStore>,
        extractor: Arc<dyn KeyExtractor>,
        options: &IndexOptions,
    ) -> Result<Self> {
        spec.validate()?;
        let iam = Self {
            codec: KeyCodec::new(&spec),
            spec,
            store,
            extractor,
            multikey: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            cursor_batch_size: options.cursor_batch_size,
            interrupt: None,
        };
        if iam.store.exists()? {
            iam.load_metadata()?;
        }
        Ok(iam)
    }

    /// Open an index that must already be initialized.
    pub fn open(
        spec: IndexSpec,
        options: &IndexOptions,
        extractor: Arc<dyn KeyExtractor>,
    ) -> Result<Self> {
        let iam = Self::new(spec, options, extractor)?;
        if !iam.store.exists()? {
            return Err(Errors::IndexNotInitialized);
        }
        Ok(iam)
    }

    /// Interruption signal checked by long-running operations.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    fn load_metadata(&self) -> Result<()> {
        let raw = self
            .store
            .get_meta(META_SPEC)?
            .ok_or_else(|| Errors::MetadataDecodeError("index spec is missing".into()))?;
        let persisted = IndexSpec::decode(&raw)?;
        if persisted != self.spec {
            error!(
                "index spec mismatch: opened as {:?}, persisted {:?}",
                self.spec, persisted
            );
            return Err(Errors::IndexSpecMismatch);
        }
        self.multikey
            .store(self.get_flag(META_MULTIKEY)?, Ordering::SeqCst);
        self.ready.store(self.get_flag(META_READY)?, Ordering::SeqCst);
        Ok(())
    }

    fn get_flag(&self, name: &str) -> Result<bool> {
        Ok(self
            .store
            .get_meta(name)?
            .is_some_and(|v| v.first() == Some(&1)))
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// Create the empty backing structure. Fails if one already exists.
    pub fn initialize_as_empty(&self) -> Result<()> {
        self.store.create()?;
        self.store.put_meta(META_SPEC, &self.spec.encode())?;
        self.store.put_meta(META_READY, &[0])?;
        self.ready.store(false, Ordering::SeqCst);
        info!("initialized empty index {}", self.spec.name);
        Ok(())
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey.load(Ordering::SeqCst)
    }

    /// Set the multikey flag. The flag is persisted before it becomes
    /// visible and is never cleared.
    pub fn set_multikey(&self) -> Result<()> {
        if self.is_multikey() {
            return Ok(());
        }
        self.store.put_meta(META_MULTIKEY, &[1])?;
        self.multikey.store(true, Ordering::SeqCst);
        debug!("index {} is now multikey", self.spec.name);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// 标记索引构建完成
    pub fn mark_ready(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.store.put_meta(META_READY, &[1])?;
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn duplicate_key_error(&self, key: &Key) -> Errors {
        Errors::DuplicateKey {
            index: self.spec.name.clone(),
            key: self.codec.render(key),
        }
    }

    /// Insert one entry. Returns false when the entry already existed and
    /// was skipped because the index is still being built.
    fn insert_one(&self, key: &Key, location: RecordLocation, unique: bool) -> Result<bool> {
        let entry = encode_entry(key, location);
        match self.store.insert(&entry, key.len(), unique)? {
            InsertOutcome::Inserted => Ok(true),
            InsertOutcome::AlreadyExists => {
                if !self.store.contains(&entry)? {
                    return Err(self.duplicate_key_error(key));
                }
                if !self.is_ready() {
                    debug!(
                        "key {} already in index {} during build, skipping",
                        self.codec.render(key),
                        self.spec.name
                    );
                    return Ok(false);
                }
                Err(Errors::EntryAlreadyIndexed(format!(
                    "{} at {}",
                    self.codec.render(key),
                    location
                )))
            }
        }
    }

    fn rollback(&self, inserted: &[&Key], location: RecordLocation) {
        for key in inserted {
            if let Err(e) = self.store.remove(&encode_entry(key, location)) {
                error!(
                    "failed to roll back key {} of index {}: {}",
                    self.codec.render(key),
                    self.spec.name,
                    e
                );
            }
        }
    }

    /// Index every key of `document` at `location`.
    ///
    /// On a duplicate key, interruption or store failure all keys already
    /// inserted for this document are removed again before the error is
    /// returned. Returns the number of keys inserted.
    pub fn insert(
        &self,
        document: &[u8],
        location: RecordLocation,
        options: &InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.extractor.extract_keys(document, &self.spec)?;
        let unique = self.spec.enforces_uniqueness() && !options.dups_allowed;
        let mut rarely = RarelyCheck::new(self.interrupt.as_ref(), INSERT_INTERRUPT_CHECK_INTERVAL);
        let mut inserted = Vec::with_capacity(keys.len());

        for key in &keys {
            let res = rarely
                .tick()
                .and_then(|_| self.insert_one(key, location, unique));
            match res {
                Ok(true) => inserted.push(key),
                Ok(false) => {}
                Err(e) => {
                    self.rollback(&inserted, location);
                    return Err(e);
                }
            }
        }

        if keys.len() > 1 {
            if let Err(e) = self.set_multikey() {
                self.rollback(&inserted, location);
                return Err(e);
            }
        }
        Ok(inserted.len() as u64)
    }

    /// Remove every key of `document` at `location`. Missing entries are
    /// skipped, and logged when `log_if_error` is set.
    pub fn remove(
        &self,
        document: &[u8],
        location: RecordLocation,
        options: &InsertDeleteOptions,
    ) -> Result<u64> {
        let keys = self.extractor.extract_keys(document, &self.spec)?;
        let mut removed = 0;
        for key in &keys {
            if self.store.remove(&encode_entry(key, location))? {
                removed += 1;
            } else if options.log_if_error {
                warn!(
                    "unindex failed: index {} key {} at {} not found",
                    self.spec.name,
                    self.codec.render(key),
                    location
                );
            }
        }
        Ok(removed)
    }

    /// Compute the key delta of replacing `from` with `to` at `location`.
    /// Never mutates the index.
    pub fn validate_update(
        &self,
        from: &[u8],
        to: &[u8],
        location: RecordLocation,
        options: &InsertDeleteOptions,
    ) -> Result<UpdateTicket> {
        let old_keys = self.extractor.extract_keys(from, &self.spec)?;
        let new_keys = self.extractor.extract_keys(to, &self.spec)?;
        let mut ticket = UpdateTicket::new(old_keys, new_keys, location, options.dups_allowed);

        let check_for_dups = !ticket.added.is_empty()
            && self.spec.enforces_uniqueness()
            && !options.dups_allowed;
        if check_for_dups {
            for key in &ticket.added {
                if let Some(entry) = self.store.first_with_prefix(key.as_bytes())? {
                    if entry_location(&entry)? != location {
                        return Err(self.duplicate_key_error(key));
                    }
                }
            }
        }
        ticket.valid = true;
        Ok(ticket)
    }

    /// Apply a validated ticket: insert the added keys, then remove the
    /// removed ones. On any failure the index is put back to its state
    /// before the call. Returns the number of keys added.
    pub fn update(&self, ticket: UpdateTicket) -> Result<u64> {
        if !ticket.valid {
            return Err(Errors::InvalidUpdateTicket);
        }
        if ticket.resulting_key_count() > 1 {
            self.set_multikey()?;
        }
        let location = ticket.location;
        let unique = self.spec.enforces_uniqueness() && !ticket.dups_allowed;
        let mut inserted = Vec::with_capacity(ticket.added.len());
        for key in &ticket.added {
            match self.insert_one(key, location, unique) {
                Ok(true) => inserted.push(key),
                Ok(false) => {}
                Err(e) => {
                    self.rollback(&inserted, location);
                    return Err(e);
                }
            }
        }

        for (i, key) in ticket.removed.iter().enumerate() {
            let err = match self.store.remove(&encode_entry(key, location)) {
                Ok(true) => continue,
                Ok(false) => Errors::MissingIndexEntry(format!(
                    "{} at {}",
                    self.codec.render(key),
                    location
                )),
                Err(e) => e,
            };
            // 恢复到更新前的状态
            self.rollback(&inserted, location);
            self.restore(&ticket.removed[..i], location);
            return Err(err);
        }
        Ok(inserted.len() as u64)
    }

    /// 重新插入回滚时已删除的条目
    fn restore(&self, removed: &[Key], location: RecordLocation) {
        for key in removed {
            if let Err(e) = self.store.insert(&encode_entry(key, location), key.len(), false) {
                error!(
                    "failed to restore key {} of index {}: {}",
                    self.codec.render(key),
                    self.spec.name,
                    e
                );
            }
        }
    }

    /// Look up every key of `document` in the store without changing it.
    pub fn touch(&self, document: &[u8]) -> Result<()> {
        let keys = self.extractor.extract_keys(document, &self.spec)?;
        for key in &keys {
            self.store.first_with_prefix(key.as_bytes())?;
        }
        Ok(())
    }

    /// Location of the first entry with `key`, in store order.
    pub fn find_single(&self, key: &Key) -> Result<Option<RecordLocation>> {
        match self.store.first_with_prefix(key.as_bytes())? {
            Some(entry) => Ok(Some(entry_location(&entry)?)),
            None => Ok(None),
        }
    }

    /// 以 key 索引的文档数
    pub fn count_key(&self, key: &Key) -> Result<u64> {
        Ok(self.store.count_prefix(key.as_bytes())? as u64)
    }

    pub fn new_cursor(&self, direction: ScanDirection) -> IndexCursor {
        IndexCursor::new(
            self.store.clone(),
            self.codec.clone(),
            direction,
            self.cursor_batch_size,
        )
    }

    pub fn num_entries(&self) -> Result<u64> {
        Ok(self.store.len()? as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// Walk every entry, checking store order and that each key decodes
    /// under this index's spec. Returns the number of entries.
    pub fn validate(&self) -> Result<u64> {
        let mut count = 0;
        let mut prev: Option<Vec<u8>> = None;
        loop {
            let batch = match &prev {
                Some(p) => self.store.scan(Bound::Excluded(p.as_slice()), false, VALIDATE_BATCH_SIZE)?,
                None => self.store.scan(Bound::Unbounded, false, VALIDATE_BATCH_SIZE)?,
            };
            if batch.is_empty() {
                break;
            }
            for raw in batch {
                if prev.as_ref().is_some_and(|p| raw <= *p) {
                    return Err(Errors::IndexCorrupted("entries out of order".into()));
                }
                let entry =
                    IndexEntry::decode(&raw).map_err(|e| Errors::IndexCorrupted(e.to_string()))?;
                self.codec
                    .decode(&entry.key)
                    .map_err(|e| Errors::IndexCorrupted(e.to_string()))?;
                count += 1;
                prev = Some(raw);
            }
        }
        Ok(count)
    }

    /// Start a bulk build. Returns `None` when the index is not empty and
    /// the caller has to insert documents one by one instead.
    pub fn initiate_bulk(&self, options: BulkOptions) -> Result<Option<BulkBuilder>> {
        if !self.store.is_empty()? {
            return Ok(None);
        }
        Ok(Some(BulkBuilder::new(
            self.spec.clone(),
            self.extractor.clone(),
            options,
        )))
    }

    /// Load a finished scan into the index and mark it ready. Dropped
    /// duplicates are added to `dups_to_drop` for the caller to delete from
    /// the collection.
    pub fn commit_bulk(
        &self,
        bulk: &mut BulkBuilder,
        may_interrupt: bool,
        dups_to_drop: Option<&mut BTreeSet<RecordLocation>>,
    ) -> Result<u64> {
        if !self.store.is_empty()? {
            error!(
                "trying to commit bulk build of index {}, but it has data already",
                self.spec.name
            );
            return Err(Errors::IndexNotEmpty);
        }
        if bulk.is_multikey() {
            self.set_multikey()?;
        }
        let interrupt = if may_interrupt {
            self.interrupt.as_ref()
        } else {
            None
        };
        let loaded = bulk.load(self.store.as_ref(), &self.codec, interrupt, dups_to_drop)?;
        self.mark_ready()?;
        Ok(loaded)
    }

    /// Build the index over every record of `records`: bulk when the index
    /// is empty, one document at a time otherwise. Returns the number of
    /// keys added.
    pub fn build_index(
        &self,
        records: &dyn RecordStore,
        options: BulkOptions,
        mut dups_to_drop: Option<&mut BTreeSet<RecordLocation>>,
    ) -> Result<u64> {
        let locations = records.locations()?;
        info!(
            "building index {} over {} records",
            self.spec.name,
            records.num_records()
        );
        let max_dropped = options.max_dropped_dups;
        let mut rarely = RarelyCheck::new(self.interrupt.as_ref(), options.interrupt_check_interval);

        if let Some(mut bulk) = self.initiate_bulk(options)? {
            for location in locations {
                rarely.tick()?;
                let document = records.record_for(location)?;
                bulk.insert(&document, location)?;
            }
            return self.commit_bulk(&mut bulk, true, dups_to_drop);
        }

        info!(
            "index {} is not empty, inserting documents one by one",
            self.spec.name
        );
        let insert_options = InsertDeleteOptions {
            dups_allowed: !self.spec.enforces_uniqueness(),
            log_if_error: false,
        };
        let mut total = 0;
        let mut num_dropped = 0;
        for location in locations {
            rarely.tick()?;
            let document = records.record_for(location)?;
            match self.insert(&document, location, &insert_options) {
                Ok(n) => total += n,
                Err(e) if e.is_duplicate_key() && self.spec.drop_dups => {
                    if let Some(dups) = dups_to_drop.as_deref_mut() {
                        dups.insert(location);
                    }
                    num_dropped += 1;
                    if num_dropped > max_dropped {
                        return Err(Errors::TooManyDroppedDuplicates { limit: max_dropped });
                    }
                }
                Err(e) => return Err(e),
            }
        }
        self.mark_ready()?;
        info!(
            "built index {}: {} keys added, {} duplicates dropped",
            self.spec.name, total, num_dropped
        );
        Ok(total)
    }
}
