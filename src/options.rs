use std::path::PathBuf;

const DEFAULT_CURSOR_BATCH_SIZE: usize = 256;
const DEFAULT_SORT_MEMORY_BYTES: usize = 100 * 1024 * 1024; // 100MB
const DEFAULT_MAX_DROPPED_DUPS: usize = 1_000_000;
const DEFAULT_INTERRUPT_CHECK_INTERVAL: usize = 128;

/// 索引选项
#[derive(Clone)]
pub struct IndexOptions {
    /// 索引目录，仅 BPlusTree 使用
    pub dir_path: PathBuf,
    /// 底层有序存储类型
    pub store_type: StoreType,
    /// 游标每次从存储中预取的条目数
    pub cursor_batch_size: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::default(),
            store_type: StoreType::BPlusTree,
            cursor_batch_size: DEFAULT_CURSOR_BATCH_SIZE,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreType {
    BTree,
    SkipList,
    BPlusTree,
}

/// 单个文档插入、删除时的选项
#[derive(Copy, Clone, Debug, Default)]
pub struct InsertDeleteOptions {
    /// 是否允许重复 key
    pub dups_allowed: bool,
    /// 删除时找不到条目是否记录日志
    pub log_if_error: bool,
}

/// 批量构建选项
#[derive(Clone, Debug)]
pub struct BulkOptions {
    /// 外部排序的内存上限，超过后写出到临时文件
    pub max_memory_bytes: usize,
    /// 临时排序文件目录
    pub spill_dir: PathBuf,
    /// drop_dups 模式下最多丢弃的重复记录数
    pub max_dropped_dups: usize,
    /// 每处理多少条记录检查一次中断信号
    pub interrupt_check_interval: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_SORT_MEMORY_BYTES,
            spill_dir: std::env::temp_dir(),
            max_dropped_dups: DEFAULT_MAX_DROPPED_DUPS,
            interrupt_check_interval: DEFAULT_INTERRUPT_CHECK_INTERVAL,
        }
    }
}

/// 临时文件 IO 类型
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IOType {
    /// 标准文件 IO，只支持追加写入
    StandardFileIO,
    /// 内存映射，只读
    MmapIO,
}
