use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Buf, BufMut, BytesMut};
use log::{debug, error, warn};
use prost::{decode_length_delimiter, encode_length_delimiter, length_delimiter_len};

use crate::{
    errors::{Errors, Result},
    fio::{IOManager, new_io_manager},
    options::{BulkOptions, IOType},
};

const SORT_RUN_FILE_SUFFIX: &str = "sort";
const SPILL_DIR_PREFIX: &str = "docidx-sort";
/// varint 长度前缀的最大字节数
const MAX_LEN_DELIMITER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;
/// 每个缓存条目除数据外的内存开销
const ENTRY_OVERHEAD: usize = std::mem::size_of::<Vec<u8>>();
/// 写临时文件时的缓冲区大小
const RUN_WRITE_BUFFER_SIZE: usize = 1024 * 1024;

static SPILL_DIR_SEQ: AtomicU64 = AtomicU64::new(0);

/// External merge sorter over index entry bytes.
///
/// Entries are buffered in memory; once the buffer exceeds the memory budget
/// it is sorted and written to a run file. `finish` merges all runs and the
/// remaining buffer into one ascending stream.
pub(crate) struct ExternalSorter {
    max_memory_bytes: usize,
    spill_root: PathBuf,
    spill_dir: Option<SpillDir>,
    buffer: Vec<Vec<u8>>,
    buffer_bytes: usize,
    runs: Vec<PathBuf>,
    num_entries: u64,
}

impl ExternalSorter {
    pub(crate) fn new(options: &BulkOptions) -> Self {
        Self {
            max_memory_bytes: options.max_memory_bytes,
            spill_root: options.spill_dir.clone(),
            spill_dir: None,
            buffer: Vec::new(),
            buffer_bytes: 0,
            runs: Vec::new(),
            num_entries: 0,
        }
    }

    pub(crate) fn add(&mut self, entry: Vec<u8>) -> Result<()> {
        self.buffer_bytes += entry.len() + ENTRY_OVERHEAD;
        self.buffer.push(entry);
        self.num_entries += 1;
        if self.buffer_bytes >= self.max_memory_bytes {
            self.spill()?;
        }
        Ok(())
    }

    pub(crate) fn num_entries(&self) -> u64 {
        self.num_entries
    }

    pub(crate) fn num_runs(&self) -> usize {
        self.runs.len()
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable();

        let needed = self
            .buffer
            .iter()
            .map(|e| (length_delimiter_len(e.len()) + e.len() + CRC_SIZE) as u64)
            .sum::<u64>();
        let dir_path = match &self.spill_dir {
            Some(dir) => dir.path.clone(),
            None => {
                let dir = SpillDir::create(&self.spill_root)?;
                let path = dir.path.clone();
                self.spill_dir = Some(dir);
                path
            }
        };
        check_available_space(&dir_path, needed)?;

        let run_path = run_file_name(&dir_path, self.runs.len());
        let io = new_io_manager(&run_path, IOType::StandardFileIO)?;
        let mut buf = BytesMut::with_capacity(RUN_WRITE_BUFFER_SIZE);
        for entry in self.buffer.drain(..) {
            encode_run_record(&entry, &mut buf);
            if buf.len() >= RUN_WRITE_BUFFER_SIZE {
                io.write(&buf)?;
                buf.clear();
            }
        }
        if !buf.is_empty() {
            io.write(&buf)?;
        }
        io.sync()?;

        debug!(
            "spilled sort run {} ({} bytes) to {}",
            self.runs.len(),
            needed,
            run_path.display()
        );
        self.runs.push(run_path);
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Sort what is left in memory and merge it with the spilled runs.
    pub(crate) fn finish(mut self) -> Result<SortedEntries> {
        self.buffer.sort_unstable();
        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        for path in &self.runs {
            sources.push(RunSource::Spilled(RunReader::open(path)?));
        }
        sources.push(RunSource::Memory(std::mem::take(&mut self.buffer).into_iter()));
        SortedEntries::new(sources, self.spill_dir.take())
    }
}

fn run_file_name(dir_path: &Path, run_id: usize) -> PathBuf {
    dir_path.join(format!("{:09}.{}", run_id, SORT_RUN_FILE_SUFFIX))
}

fn check_available_space(dir_path: &Path, needed: u64) -> Result<()> {
    let available = fs2::available_space(dir_path).map_err(|e| {
        error!("Failed to get available space of {}: {}", dir_path.display(), e);
        Errors::SpillIoError(e.to_string())
    })?;
    if available < needed {
        return Err(Errors::SpillSpaceExhausted { needed, available });
    }
    Ok(())
}

/// 记录格式：varint 长度 | 数据 | crc32
fn encode_run_record(data: &[u8], buf: &mut BytesMut) {
    let _ = encode_length_delimiter(data.len(), buf);
    buf.put_slice(data);
    buf.put_u32(crc32fast::hash(data));
}

/// Temporary directory holding the runs of one sort, removed on drop.
struct SpillDir {
    path: PathBuf,
}

impl SpillDir {
    fn create(root: &Path) -> Result<Self> {
        let name = format!(
            "{}-{}-{}",
            SPILL_DIR_PREFIX,
            std::process::id(),
            SPILL_DIR_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let path = root.join(name);
        std::fs::create_dir_all(&path).map_err(|e| {
            error!("Failed to create spill dir {}: {}", path.display(), e);
            Errors::SpillIoError(e.to_string())
        })?;
        Ok(Self { path })
    }
}

impl Drop for SpillDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("Failed to remove spill dir {}: {}", self.path.display(), e);
        }
    }
}

/// Sequential reader over one spilled run, through a read-only mmap.
struct RunReader {
    io: Box<dyn IOManager>,
    offset: u64,
    size: u64,
}

impl RunReader {
    fn open(path: &Path) -> Result<Self> {
        let io = new_io_manager(path, IOType::MmapIO)?;
        let size = io.size();
        Ok(Self { io, offset: 0, size })
    }

    fn next_entry(&mut self) -> Result<Option<Vec<u8>>> {
        if self.offset >= self.size {
            return Ok(None);
        }
        let header_len = ((self.size - self.offset) as usize).min(MAX_LEN_DELIMITER_SIZE);
        let mut header_buf = BytesMut::zeroed(header_len);
        self.io.read_exact(&mut header_buf, self.offset)?;
        let data_len = decode_length_delimiter(&mut header_buf)
            .map_err(|_| Errors::SpillIoError("bad run record length".into()))?;
        let header_size = length_delimiter_len(data_len) as u64;

        let mut data_crc_buf = BytesMut::zeroed(data_len + CRC_SIZE);
        self.io
            .read_exact(&mut data_crc_buf, self.offset + header_size)?;
        let data = data_crc_buf.split_to(data_len);
        let crc = data_crc_buf.get_u32();
        if crc32fast::hash(&data) != crc {
            return Err(Errors::InvalidSpillRecordCrc);
        }
        self.offset += header_size + (data_len + CRC_SIZE) as u64;
        Ok(Some(data.to_vec()))
    }
}

enum RunSource {
    Spilled(RunReader),
    Memory(std::vec::IntoIter<Vec<u8>>),
}

impl RunSource {
    fn next_entry(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            RunSource::Spilled(reader) => reader.next_entry(),
            RunSource::Memory(iter) => Ok(iter.next()),
        }
    }
}

/// Ascending k-way merge of sorted runs. Stops after the first error.
pub(crate) struct SortedEntries {
    sources: Vec<RunSource>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>,
    failed: bool,
    // 迭代结束后才删除临时文件
    _spill_dir: Option<SpillDir>,
}

impl SortedEntries {
    fn new(mut sources: Vec<RunSource>, spill_dir: Option<SpillDir>) -> Result<Self> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (i, source) in sources.iter_mut().enumerate() {
            if let Some(entry) = source.next_entry()? {
                heap.push(Reverse((entry, i)));
            }
        }
        Ok(Self {
            sources,
            heap,
            failed: false,
            _spill_dir: spill_dir,
        })
    }
}

impl Iterator for SortedEntries {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Reverse((entry, i)) = self.heap.pop()?;
        match self.sources[i].next_entry() {
            Ok(Some(next)) => self.heap.push(Reverse((next, i))),
            Ok(None) => {}
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }
        Some(Ok(entry))
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::FileExt;

    use super::*;

    fn options(dir: &Path, max_memory_bytes: usize) -> BulkOptions {
        BulkOptions {
            max_memory_bytes,
            spill_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    // 确定性打乱的输入
    fn shuffled(n: u32) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| format!("entry-{:05}", (i * 7919) % n).into_bytes())
            .collect()
    }

    #[test]
    fn test_sort_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::new(&options(dir.path(), 1024 * 1024));
        for entry in shuffled(100) {
            sorter.add(entry).unwrap();
        }
        assert_eq!(sorter.num_entries(), 100);
        assert_eq!(sorter.num_runs(), 0);

        let sorted = sorter.finish().unwrap().collect::<Result<Vec<_>>>().unwrap();
        let mut expected = shuffled(100);
        expected.sort();
        assert_eq!(sorted, expected);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_sort_with_spilled_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::new(&options(dir.path(), 512));
        for entry in shuffled(500) {
            sorter.add(entry).unwrap();
        }
        assert!(sorter.num_runs() > 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let entries = sorter.finish().unwrap();
        let sorted = entries.collect::<Result<Vec<_>>>().unwrap();
        let mut expected = shuffled(500);
        expected.sort();
        assert_eq!(sorted, expected);

        // 迭代器释放后临时目录被删除
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupted_run_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::new(&options(dir.path(), 256));
        for entry in shuffled(50) {
            sorter.add(entry).unwrap();
        }
        assert!(sorter.num_runs() > 0);

        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&sorter.runs[0])
            .unwrap();
        // 第一个记录的数据部分从偏移 1 开始
        file.write_at(b"X", 1).unwrap();

        match sorter.finish() {
            Err(e) => assert_eq!(e, Errors::InvalidSpillRecordCrc),
            Ok(_) => panic!("corrupted run was not detected"),
        }
    }
}
