use std::collections::BTreeSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::{decode_length_delimiter, encode_length_delimiter};

use crate::{
    data::{get_len_prefixed, put_len_prefixed},
    errors::{Errors, Result},
    key::{Key, KeyCodec, Value},
    spec::IndexSpec,
};

const TAG_NULL: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_ARRAY: u8 = 7;

/// Turns a stored document into the set of keys it owns in one index.
pub trait KeyExtractor: Send + Sync {
    fn extract_keys(&self, document: &[u8], spec: &IndexSpec) -> Result<BTreeSet<Key>>;
}

/// 扁平文档：有序的字段名和值
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value.into());
        self
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        let _ = encode_length_delimiter(self.fields.len(), &mut buf);
        for (name, value) in &self.fields {
            put_len_prefixed(&mut buf, name.as_bytes());
            encode_doc_value(value, &mut buf);
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let num_fields = decode_length_delimiter(&mut buf)
            .map_err(|_| Errors::DocumentDecodeError("bad field count".into()))?;
        // 每个字段至少占一个字节
        let mut fields = Vec::with_capacity(num_fields.min(buf.len()));
        for _ in 0..num_fields {
            let name = get_len_prefixed(&mut buf)
                .ok_or_else(|| Errors::DocumentDecodeError("bad field name".into()))?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| Errors::DocumentDecodeError("field name is not utf-8".into()))?;
            let value = decode_doc_value(&mut buf)?;
            fields.push((name, value));
        }
        if buf.has_remaining() {
            return Err(Errors::DocumentDecodeError("trailing bytes".into()));
        }
        Ok(Self { fields })
    }
}

fn encode_doc_value(value: &Value, buf: &mut BytesMut) {
    match value {
        // Missing 按 null 写入
        Value::Missing | Value::Null => buf.put_u8(TAG_NULL),
        Value::Bool(v) => {
            buf.put_u8(TAG_BOOL);
            buf.put_u8(*v as u8);
        }
        Value::Int(v) => {
            buf.put_u8(TAG_INT);
            buf.put_i64(*v);
        }
        Value::Double(v) => {
            buf.put_u8(TAG_DOUBLE);
            buf.put_f64(*v);
        }
        Value::String(v) => {
            buf.put_u8(TAG_STRING);
            put_len_prefixed(buf, v.as_bytes());
        }
        Value::Bytes(v) => {
            buf.put_u8(TAG_BYTES);
            put_len_prefixed(buf, v);
        }
        Value::Array(vs) => {
            buf.put_u8(TAG_ARRAY);
            let _ = encode_length_delimiter(vs.len(), buf);
            for v in vs {
                encode_doc_value(v, buf);
            }
        }
    }
}

fn decode_doc_value(buf: &mut &[u8]) -> Result<Value> {
    let err = |what: &str| Errors::DocumentDecodeError(what.to_string());
    if !buf.has_remaining() {
        return Err(err("missing value tag"));
    }
    let value = match buf.get_u8() {
        TAG_NULL => Value::Null,
        TAG_BOOL if buf.remaining() >= 1 => Value::Bool(buf.get_u8() != 0),
        TAG_INT if buf.remaining() >= 8 => Value::Int(buf.get_i64()),
        TAG_DOUBLE if buf.remaining() >= 8 => Value::Double(buf.get_f64()),
        TAG_STRING => {
            let data = get_len_prefixed(buf).ok_or_else(|| err("bad string"))?;
            Value::String(String::from_utf8(data.to_vec()).map_err(|_| err("bad utf-8"))?)
        }
        TAG_BYTES => Value::Bytes(get_len_prefixed(buf).ok_or_else(|| err("bad bytes"))?.to_vec()),
        TAG_ARRAY => {
            let len = decode_length_delimiter(&mut *buf).map_err(|_| err("bad array length"))?;
            let mut values = Vec::with_capacity(len.min(buf.len()));
            for _ in 0..len {
                values.push(decode_doc_value(buf)?);
            }
            Value::Array(values)
        }
        other => return Err(err(&format!("bad value tag {}", other))),
    };
    Ok(value)
}

/// Key extractor for [`Document`]s.
///
/// Each indexed field is looked up by its top-level name; absent fields
/// become [`Value::Missing`]. One array-valued field is expanded into one key
/// per element (an empty array indexes as null). Two array-valued fields in
/// the same key are rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldKeyExtractor;

impl KeyExtractor for FieldKeyExtractor {
    fn extract_keys(&self, document: &[u8], spec: &IndexSpec) -> Result<BTreeSet<Key>> {
        let doc = Document::decode(document)?;
        let codec = KeyCodec::new(spec);
        let values = spec
            .fields
            .iter()
            .map(|f| doc.get(&f.path).cloned().unwrap_or(Value::Missing))
            .collect::<Vec<_>>();

        let mut keys = BTreeSet::new();
        if spec.sparse && values.iter().all(Value::is_missing) {
            return Ok(keys);
        }

        let mut arrays = values
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v, Value::Array(_)));
        let array_field = arrays.next().map(|(i, _)| i);
        if let Some((i, _)) = arrays.next() {
            return Err(Errors::ParallelArrays(format!(
                "{} and {}",
                spec.fields[array_field.unwrap_or_default()].path,
                spec.fields[i].path
            )));
        }

        match array_field {
            None => {
                keys.insert(codec.encode(&values)?);
            }
            Some(i) => {
                let Value::Array(elements) = &values[i] else {
                    return Ok(keys);
                };
                if elements.is_empty() {
                    let mut expanded = values.clone();
                    expanded[i] = Value::Null;
                    keys.insert(codec.encode(&expanded)?);
                }
                for element in elements {
                    let mut expanded = values.clone();
                    expanded[i] = element.clone();
                    keys.insert(codec.encode(&expanded)?);
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Direction;

    #[test]
    fn test_document_encode_decode() {
        let doc = Document::new()
            .with("a", 5)
            .with("b", "text")
            .with("c", Value::Array(vec![Value::Int(1), Value::Double(2.5)]))
            .with("d", Value::Bytes(vec![0, 1]))
            .with("e", Value::Null)
            .with("f", true);
        assert_eq!(Document::decode(&doc.encode()), Ok(doc));
        assert!(Document::decode(&[3, 1]).is_err());
    }

    #[test]
    fn test_decode_huge_counts() {
        // 字段数是一个极大的 varint，后面没有数据
        let mut raw = vec![0xff; 8];
        raw.push(0x7f);
        assert!(matches!(
            Document::decode(&raw),
            Err(Errors::DocumentDecodeError(_))
        ));

        // 一个字段 "a"，数组长度极大
        let mut raw = vec![1, 1, b'a', TAG_ARRAY];
        raw.extend_from_slice(&[0xff; 8]);
        raw.push(0x7f);
        assert!(matches!(
            Document::decode(&raw),
            Err(Errors::DocumentDecodeError(_))
        ));
    }

    #[test]
    fn test_extract_single_key() {
        let spec = IndexSpec::new("a_1_b_1", &[("a", Direction::Ascending), ("b", Direction::Ascending)]);
        let doc = Document::new().with("a", 5).encode();
        let keys = FieldKeyExtractor.extract_keys(&doc, &spec).unwrap();
        let codec = KeyCodec::new(&spec);
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&codec.encode(&[Value::Int(5), Value::Missing]).unwrap()));
    }

    #[test]
    fn test_extract_array_is_multikey() {
        let spec = IndexSpec::new("tags_1", &[("tags", Direction::Ascending)]);
        let doc = Document::new()
            .with("tags", Value::Array(vec!["x".into(), "y".into(), "x".into()]))
            .encode();
        let keys = FieldKeyExtractor.extract_keys(&doc, &spec).unwrap();
        assert_eq!(keys.len(), 2);

        let empty = Document::new().with("tags", Value::Array(vec![])).encode();
        let keys = FieldKeyExtractor.extract_keys(&empty, &spec).unwrap();
        let codec = KeyCodec::new(&spec);
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec![codec.encode(&[Value::Null]).unwrap()]);
    }

    #[test]
    fn test_extract_sparse_and_parallel_arrays() {
        let spec = IndexSpec::new("a_1", &[("a", Direction::Ascending)]).with_sparse(true);
        let doc = Document::new().with("z", 1).encode();
        assert!(FieldKeyExtractor.extract_keys(&doc, &spec).unwrap().is_empty());

        let spec = IndexSpec::new("a_1_b_1", &[("a", Direction::Ascending), ("b", Direction::Ascending)]);
        let doc = Document::new()
            .with("a", Value::Array(vec![Value::Int(1)]))
            .with("b", Value::Array(vec![Value::Int(2)]))
            .encode();
        assert!(matches!(
            FieldKeyExtractor.extract_keys(&doc, &spec),
            Err(Errors::ParallelArrays(_))
        ));
    }
}
