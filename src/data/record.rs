use std::fmt;

use bytes::Bytes;

use crate::errors::{Errors, Result};

pub const RECORD_LOCATION_SIZE: usize = 12;

/// Location of a document in the record store.
///
/// Produced by the record store; the index only compares and copies it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordLocation {
    pub(crate) file_id: u32,
    pub(crate) offset: u64,
}

impl RecordLocation {
    pub fn new(file_id: u32, offset: u64) -> Self {
        Self { file_id, offset }
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 大端定长编码，字节序与 Ord 一致
    pub fn encode(&self) -> [u8; RECORD_LOCATION_SIZE] {
        let mut buf = [0u8; RECORD_LOCATION_SIZE];
        buf[..4].copy_from_slice(&self.file_id.to_be_bytes());
        buf[4..].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != RECORD_LOCATION_SIZE {
            return Err(Errors::KeyDecodeError(format!(
                "record location must be {} bytes, got {}",
                RECORD_LOCATION_SIZE,
                buf.len()
            )));
        }
        let mut file_id = [0u8; 4];
        let mut offset = [0u8; 8];
        file_id.copy_from_slice(&buf[..4]);
        offset.copy_from_slice(&buf[4..]);
        Ok(Self {
            file_id: u32::from_be_bytes(file_id),
            offset: u64::from_be_bytes(offset),
        })
    }
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:x}", self.file_id, self.offset)
    }
}

/// Document storage owned by the collection, consumed by index builds.
pub trait RecordStore: Send + Sync {
    /// 读取指定位置的文档
    fn record_for(&self, location: RecordLocation) -> Result<Bytes>;
    /// 按存储顺序列出全部文档位置
    fn locations(&self) -> Result<Vec<RecordLocation>>;
    fn num_records(&self) -> usize;
}
