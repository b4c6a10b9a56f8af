use bytes::{Buf, BufMut, BytesMut};
use prost::{decode_length_delimiter, encode_length_delimiter};

use crate::{
    data::{get_len_prefixed, put_len_prefixed},
    errors::{Errors, Result},
};

const ID_FIELD: &str = "_id";
const DEFAULT_INDEX_VERSION: u32 = 1;

const FLAG_UNIQUE: u8 = 0b001;
const FLAG_DROP_DUPS: u8 = 0b010;
const FLAG_SPARSE: u8 = 0b100;

/// 字段排序方向
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending = 1,
    Descending = 2,
}

impl Direction {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Direction::Ascending),
            2 => Some(Direction::Descending),
            _ => None,
        }
    }
}

/// 索引中的一个字段
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub path: String,
    pub direction: Direction,
}

/// Immutable description of one index, fixed when the index is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    /// 索引名，出现在重复键错误中
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub unique: bool,
    /// 批量构建时丢弃重复记录而不是失败
    pub drop_dups: bool,
    /// 不索引缺少全部字段的文档
    pub sparse: bool,
    /// key 编码格式版本
    pub version: u32,
}

impl IndexSpec {
    pub fn new(name: &str, fields: &[(&str, Direction)]) -> Self {
        Self {
            name: name.to_string(),
            fields: fields
                .iter()
                .map(|(path, direction)| FieldSpec {
                    path: path.to_string(),
                    direction: *direction,
                })
                .collect(),
            unique: false,
            drop_dups: false,
            sparse: false,
            version: DEFAULT_INDEX_VERSION,
        }
    }

    pub fn with_unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn with_drop_dups(mut self, drop_dups: bool) -> Self {
        self.drop_dups = drop_dups;
        self
    }

    pub fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn directions(&self) -> impl Iterator<Item = Direction> + '_ {
        self.fields.iter().map(|f| f.direction)
    }

    /// 单字段 `_id` 升序索引
    pub fn is_id_index(&self) -> bool {
        self.fields.len() == 1
            && self.fields[0].path == ID_FIELD
            && self.fields[0].direction == Direction::Ascending
    }

    /// `_id` 索引总是唯一的
    pub fn enforces_uniqueness(&self) -> bool {
        self.unique || self.is_id_index()
    }

    pub fn validate(&self) -> Result<()> {
        if self.version > 1 {
            return Err(Errors::InvalidIndexVersion(self.version));
        }
        if self.name.is_empty() {
            return Err(Errors::InvalidIndexSpec("index name is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(Errors::InvalidIndexSpec("index has no fields".into()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.path.is_empty() {
                return Err(Errors::InvalidIndexSpec(format!("field {} has empty path", i)));
            }
            if self.fields[..i].iter().any(|f| f.path == field.path) {
                return Err(Errors::InvalidIndexSpec(format!(
                    "field {} appears twice",
                    field.path
                )));
            }
        }
        Ok(())
    }

    /// 编码为元数据中保存的字节
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        // 编码长度前缀不会失败，BytesMut 会自动扩容
        let _ = encode_length_delimiter(self.version as usize, &mut buf);
        let mut flags = 0;
        if self.unique {
            flags |= FLAG_UNIQUE;
        }
        if self.drop_dups {
            flags |= FLAG_DROP_DUPS;
        }
        if self.sparse {
            flags |= FLAG_SPARSE;
        }
        buf.put_u8(flags);
        put_len_prefixed(&mut buf, self.name.as_bytes());
        let _ = encode_length_delimiter(self.fields.len(), &mut buf);
        for field in &self.fields {
            buf.put_u8(field.direction as u8);
            put_len_prefixed(&mut buf, field.path.as_bytes());
        }
        buf.to_vec()
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let err = |what: &str| Errors::MetadataDecodeError(format!("index spec: {}", what));
        let version =
            decode_length_delimiter(&mut buf).map_err(|_| err("bad version"))? as u32;
        if !buf.has_remaining() {
            return Err(err("missing flags"));
        }
        let flags = buf.get_u8();
        let name = get_len_prefixed(&mut buf).ok_or_else(|| err("bad name"))?;
        let name = String::from_utf8(name.to_vec()).map_err(|_| err("name is not utf-8"))?;
        let num_fields = decode_length_delimiter(&mut buf).map_err(|_| err("bad field count"))?;
        let mut fields = Vec::with_capacity(num_fields.min(buf.len()));
        for _ in 0..num_fields {
            if !buf.has_remaining() {
                return Err(err("missing direction"));
            }
            let direction = Direction::from_u8(buf.get_u8()).ok_or_else(|| err("bad direction"))?;
            let path = get_len_prefixed(&mut buf).ok_or_else(|| err("bad field path"))?;
            let path = String::from_utf8(path.to_vec()).map_err(|_| err("path is not utf-8"))?;
            fields.push(FieldSpec { path, direction });
        }
        if buf.has_remaining() {
            return Err(err("trailing bytes"));
        }
        Ok(Self {
            name,
            fields,
            unique: flags & FLAG_UNIQUE != 0,
            drop_dups: flags & FLAG_DROP_DUPS != 0,
            sparse: flags & FLAG_SPARSE != 0,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_encode_decode() {
        let spec = IndexSpec::new(
            "people.a_1_b_-1",
            &[("a", Direction::Ascending), ("b", Direction::Descending)],
        )
        .with_unique(true)
        .with_sparse(true);
        let decoded = IndexSpec::decode(&spec.encode());
        assert_eq!(decoded, Ok(spec));
    }

    #[test]
    fn test_spec_decode_truncated() {
        let spec = IndexSpec::new("x_1", &[("x", Direction::Ascending)]);
        let encoded = spec.encode();
        let res = IndexSpec::decode(&encoded[..encoded.len() - 1]);
        assert!(matches!(res, Err(Errors::MetadataDecodeError(_))));
    }

    #[test]
    fn test_spec_decode_huge_field_count() {
        let mut raw = vec![1, 0, 1, b'x'];
        raw.extend_from_slice(&[0xff; 8]);
        raw.push(0x7f);
        assert!(matches!(
            IndexSpec::decode(&raw),
            Err(Errors::MetadataDecodeError(_))
        ));
    }

    #[test]
    fn test_spec_validate() {
        let spec = IndexSpec::new("a_1", &[("a", Direction::Ascending)]);
        assert_eq!(spec.validate(), Ok(()));
        assert_eq!(
            spec.clone().with_version(2).validate(),
            Err(Errors::InvalidIndexVersion(2))
        );
        let empty = IndexSpec::new("empty", &[]);
        assert!(empty.validate().is_err());
        let twice = IndexSpec::new(
            "a_1_a_1",
            &[("a", Direction::Ascending), ("a", Direction::Descending)],
        );
        assert!(twice.validate().is_err());
    }

    #[test]
    fn test_id_index_is_unique() {
        let id = IndexSpec::new("_id_", &[("_id", Direction::Ascending)]);
        assert!(!id.unique);
        assert!(id.enforces_uniqueness());
        let other = IndexSpec::new("a_1", &[("a", Direction::Ascending)]);
        assert!(!other.enforces_uniqueness());
    }
}
