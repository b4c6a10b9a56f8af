use std::fs::OpenOptions;
use std::path::Path;
use std::{fs::File, os::unix::fs::FileExt, sync::Arc};

use super::IOManager;
use crate::errors::Errors;
use crate::errors::Result;

use log::error;
use parking_lot::RwLock;

pub struct FileIo {
    fd: Arc<RwLock<File>>,
}

impl IOManager for FileIo {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let read_guard = self.fd.read();
        read_guard.read_at(buf, offset).map_err(|e| {
            error!("Failed to read from spill file: {}", e);
            Errors::SpillIoError(e.to_string())
        })
    }
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut write_guard = self.fd.write();
        use std::io::Write;
        write_guard.write_all(buf).map_err(|e| {
            error!("Failed to write to spill file: {}", e);
            Errors::SpillIoError(e.to_string())
        })?;
        Ok(buf.len())
    }
    fn sync(&self) -> Result<()> {
        let read_guard = self.fd.read();
        read_guard.sync_all().map_err(|e| {
            error!("Failed to sync spill file: {}", e);
            Errors::SpillIoError(e.to_string())
        })
    }
    fn size(&self) -> u64 {
        let read_guard = self.fd.read();
        read_guard.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

impl FileIo {
    pub fn new(file_path: &Path) -> Result<Self> {
        match OpenOptions::new()
            .create(true)
            .read(true)
            .append(true) // 只支持追加写入
            .open(file_path)
        {
            Ok(file) => Ok(Self {
                fd: Arc::new(RwLock::new(file)),
            }),
            Err(e) => {
                error!("Failed to open spill file {}: {}", file_path.display(), e);
                Err(Errors::SpillIoError(e.to_string()))
            }
        }
    }
}
