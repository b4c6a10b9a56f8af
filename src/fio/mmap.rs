use std::{path::Path, sync::Arc};

use log::error;
use parking_lot::Mutex;

use super::IOManager;
use crate::errors::{Errors, Result};

/// 只读内存映射，用于归并阶段顺序读取已排好序的临时文件
pub struct MmapIO {
    map: Arc<Mutex<memmap2::Mmap>>,
}

impl MmapIO {
    pub fn new(file_path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(file_path)
            .map_err(|e| {
                error!("Failed to open spill file {}: {}", file_path.display(), e);
                Errors::SpillIoError(e.to_string())
            })?;
        // 临时文件写完后才会映射，之后不再修改
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file) }.map_err(|e| {
            error!("Failed to mmap spill file {}: {}", file_path.display(), e);
            Errors::SpillIoError(e.to_string())
        })?;
        Ok(Self {
            map: Arc::new(Mutex::new(mmap)),
        })
    }
}

impl IOManager for MmapIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mmap = self.map.lock();
        let end = offset + buf.len() as u64;
        if end > mmap.len() as u64 {
            return Err(Errors::SpillIoError(format!(
                "read past end of run: {} > {}",
                end,
                mmap.len()
            )));
        }
        buf.copy_from_slice(&mmap[offset as usize..end as usize]);
        Ok(buf.len())
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Errors::SpillIoError("mmap spill reader is read-only".into()))
    }

    fn size(&self) -> u64 {
        let mmap = self.map.lock();
        mmap.len() as u64
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
