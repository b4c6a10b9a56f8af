//! Order-preserving key encoding.
//!
//! Every field is written as a type tag followed by a self-delimiting
//! payload, so the byte order of two encoded keys equals the field-by-field
//! order of their values. Descending fields have all their bytes inverted.
//! Encodings are prefix-free per field, which keeps `key ++ location` ordered
//! by key first and location second.

pub mod value;

use std::{cmp::Ordering, fmt};

use crate::{
    errors::{Errors, Result},
    spec::{Direction, IndexSpec},
};

pub use value::Value;
use value::{ValueTag, f64_from_ordered_bits, ordered_f64_bits};

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// An encoded index key. Comparing two keys byte-wise gives index order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key {
    bytes: Vec<u8>,
}

impl Key {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 是否以另一个 key 的编码开头，用于部分字段前缀匹配
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.bytes.starts_with(&prefix.bytes)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for b in &self.bytes {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// 按索引定义编码、解码和比较 key
#[derive(Clone, Debug)]
pub struct KeyCodec {
    directions: Vec<Direction>,
}

impl KeyCodec {
    pub fn new(spec: &IndexSpec) -> Self {
        Self {
            directions: spec.directions().collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.directions.len()
    }

    /// 编码完整的 key，字段数必须与索引定义一致
    pub fn encode(&self, values: &[Value]) -> Result<Key> {
        if values.len() != self.directions.len() {
            return Err(Errors::KeyEncodeError(format!(
                "expected {} fields, got {}",
                self.directions.len(),
                values.len()
            )));
        }
        self.encode_prefix(values)
    }

    /// 编码前若干个字段，用于复合索引的范围定位
    pub fn encode_prefix(&self, values: &[Value]) -> Result<Key> {
        if values.len() > self.directions.len() {
            return Err(Errors::KeyEncodeError(format!(
                "expected at most {} fields, got {}",
                self.directions.len(),
                values.len()
            )));
        }
        let mut out = Vec::new();
        for (value, direction) in values.iter().zip(self.directions.iter()) {
            let start = out.len();
            encode_value(value, &mut out)?;
            if *direction == Direction::Descending {
                for b in &mut out[start..] {
                    *b = !*b;
                }
            }
        }
        Ok(Key::from_bytes(out))
    }

    pub fn decode(&self, key: &Key) -> Result<Vec<Value>> {
        let mut reader = Reader {
            buf: key.as_bytes(),
            pos: 0,
            mask: 0,
        };
        let mut values = Vec::with_capacity(self.directions.len());
        for direction in &self.directions {
            reader.mask = match direction {
                Direction::Ascending => 0x00,
                Direction::Descending => 0xFF,
            };
            values.push(reader.read_value()?);
        }
        if reader.pos != key.len() {
            return Err(Errors::KeyDecodeError("trailing bytes after last field".into()));
        }
        Ok(values)
    }

    pub fn compare(&self, a: &Key, b: &Key) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }

    /// 字段值相同即相等，与字段名无关
    pub fn equal(&self, a: &Key, b: &Key) -> bool {
        a.as_bytes() == b.as_bytes()
    }

    /// Field-by-field comparison of unencoded values, honouring directions.
    pub fn compare_values(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((l, r), direction) in a.iter().zip(b.iter()).zip(self.directions.iter()) {
            let ord = match direction {
                Direction::Ascending => l.index_cmp(r),
                Direction::Descending => l.index_cmp(r).reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    }

    /// 形如 `{ : 5, : "x" }` 的可读形式，用于错误信息和日志
    pub fn render(&self, key: &Key) -> String {
        match self.decode(key) {
            Ok(values) => {
                let fields = values
                    .iter()
                    .map(|v| format!(": {}", v))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {} }}", fields)
            }
            Err(_) => format!("{:?}", key),
        }
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let tag = value.tag().ok_or_else(|| {
        Errors::KeyEncodeError("arrays are not indexable as a single key component".into())
    })?;
    out.push(tag as u8);
    match value {
        Value::Missing | Value::Null => {}
        Value::Bool(v) => out.push(*v as u8),
        Value::Int(v) => out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&ordered_f64_bits(*v).to_be_bytes()),
        Value::String(v) => encode_escaped(v.as_bytes(), out),
        Value::Bytes(v) => encode_escaped(v, out),
        Value::Array(_) => {}
    }
    Ok(())
}

// 0x00 -> 0x00 0xFF，以 0x00 0x00 结尾，保证字节序且无前缀冲突
fn encode_escaped(data: &[u8], out: &mut Vec<u8>) {
    for b in data {
        out.push(*b);
        if *b == ESCAPE {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    mask: u8,
}

impl Reader<'_> {
    fn read_u8(&mut self) -> Result<u8> {
        let b = self
            .buf
            .get(self.pos)
            .ok_or_else(|| Errors::KeyDecodeError("unexpected end of key".into()))?;
        self.pos += 1;
        Ok(*b ^ self.mask)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        for b in &mut raw {
            *b = self.read_u8()?;
        }
        Ok(u64::from_be_bytes(raw))
    }

    fn read_escaped(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b != ESCAPE {
                data.push(b);
                continue;
            }
            match self.read_u8()? {
                TERMINATOR => return Ok(data),
                ESCAPED_ZERO => data.push(ESCAPE),
                other => {
                    return Err(Errors::KeyDecodeError(format!(
                        "invalid escape byte {:#04x}",
                        other
                    )));
                }
            }
        }
    }

    fn read_value(&mut self) -> Result<Value> {
        let raw_tag = self.read_u8()?;
        let tag = ValueTag::from_u8(raw_tag)
            .ok_or_else(|| Errors::KeyDecodeError(format!("unknown type tag {:#04x}", raw_tag)))?;
        let value = match tag {
            ValueTag::Missing => Value::Missing,
            ValueTag::Null => Value::Null,
            ValueTag::Bool => match self.read_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(Errors::KeyDecodeError(format!("invalid bool byte {}", other)));
                }
            },
            ValueTag::Int => Value::Int((self.read_u64()? ^ (1 << 63)) as i64),
            ValueTag::Double => Value::Double(f64_from_ordered_bits(self.read_u64()?)),
            ValueTag::String => {
                let data = self.read_escaped()?;
                Value::String(
                    String::from_utf8(data)
                        .map_err(|_| Errors::KeyDecodeError("string is not utf-8".into()))?,
                )
            }
            ValueTag::Bytes => Value::Bytes(self.read_escaped()?),
        };
        Ok(value)
    }
}
