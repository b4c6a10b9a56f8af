mod file_io;
mod mmap;
use std::path::Path;

use file_io::FileIo;
use mmap::MmapIO;

use crate::{
    errors::{Errors, Result},
    options::IOType,
};

/// File access for sorted spill runs: runs are appended once, synced, then
/// read back sequentially during the merge.
pub trait IOManager: Send + Sync {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;
    fn write(&self, buf: &[u8]) -> Result<usize>;
    fn sync(&self) -> Result<()>;
    fn size(&self) -> u64;

    /// 读满 buf，文件在 offset 之后不足 buf.len() 字节时报错
    fn read_exact(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let n = self.read(buf, offset)?;
        if n < buf.len() {
            return Err(Errors::SpillIoError(format!(
                "truncated run: wanted {} bytes at offset {}, got {}",
                buf.len(),
                offset,
                n
            )));
        }
        Ok(())
    }
}

/// Open a spill run file for the given access pattern.
pub fn new_io_manager(file_path: &Path, io_type: IOType) -> Result<Box<dyn IOManager>> {
    match io_type {
        IOType::StandardFileIO => Ok(Box::new(FileIo::new(file_path)?)),
        IOType::MmapIO => Ok(Box::new(MmapIO::new(file_path)?)),
    }
}
