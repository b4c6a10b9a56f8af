use thiserror::Error;
pub type Result<T> = std::result::Result<T, Errors>;

/// 错误类别，调用方据此决定是否重试
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DuplicateKey,
    InternalError,
    IllegalOperation,
    Interrupted,
}

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Errors {
    #[error("E11000 duplicate key error index: {index} dup key: {key}")]
    DuplicateKey { index: String, key: String },

    #[error("too many dups on index build with drop_dups=true (limit {limit})")]
    TooManyDroppedDuplicates { limit: usize },

    #[error("operation was interrupted")]
    Interrupted,

    #[error("invalid update ticket")]
    InvalidUpdateTicket,

    #[error("expected index entry is missing: {0}")]
    MissingIndexEntry(String),

    #[error("entry is already present in the index: {0}")]
    EntryAlreadyIndexed(String),

    #[error("invalid index version {0}")]
    InvalidIndexVersion(u32),

    #[error("index already initialized")]
    IndexAlreadyInitialized,

    #[error("index is not initialized")]
    IndexNotInitialized,

    #[error("index is not empty")]
    IndexNotEmpty,

    #[error("index is corrupted: {0}")]
    IndexCorrupted(String),

    #[error("index spec does not match the persisted spec")]
    IndexSpecMismatch,

    #[error("invalid index spec: {0}")]
    InvalidIndexSpec(String),

    #[error("failed to encode key: {0}")]
    KeyEncodeError(String),

    #[error("failed to decode key: {0}")]
    KeyDecodeError(String),

    #[error("failed to decode index metadata: {0}")]
    MetadataDecodeError(String),

    #[error("failed to decode document: {0}")]
    DocumentDecodeError(String),

    #[error("cannot index parallel arrays: {0}")]
    ParallelArrays(String),

    #[error("record not found at {0}")]
    RecordNotFound(String),

    #[error("index store failure: {0}")]
    StoreError(String),

    #[error("spill file failure: {0}")]
    SpillIoError(String),

    #[error("invalid crc in spill run record")]
    InvalidSpillRecordCrc,

    #[error("not enough space in spill directory: need {needed} bytes, {available} available")]
    SpillSpaceExhausted { needed: u64, available: u64 },

    #[error("cannot save position when at end of stream")]
    SaveAtEndOfStream,

    #[error("cursor has no saved position to restore")]
    NoSavedPosition,

    #[error("cursor is not positioned")]
    CursorNotPositioned,

    #[error("mixed inclusivity in compound seek bounds is not supported")]
    MixedBoundInclusivity,

    #[error("bulk builder is in phase {0} and cannot accept this call")]
    BulkPhaseViolation(&'static str),
}

impl Errors {
    /// 将具体错误归入四个对外类别
    pub fn code(&self) -> ErrorCode {
        match self {
            Errors::DuplicateKey { .. } => ErrorCode::DuplicateKey,
            Errors::Interrupted => ErrorCode::Interrupted,
            Errors::SaveAtEndOfStream
            | Errors::NoSavedPosition
            | Errors::CursorNotPositioned
            | Errors::MixedBoundInclusivity
            | Errors::BulkPhaseViolation(_) => ErrorCode::IllegalOperation,
            _ => ErrorCode::InternalError,
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        self.code() == ErrorCode::DuplicateKey
    }
}
