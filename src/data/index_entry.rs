use crate::{
    data::record::{RECORD_LOCATION_SIZE, RecordLocation},
    errors::{Errors, Result},
    key::Key,
};

/// One physical entry of an index: the key followed by the location.
///
/// The store keeps entries as `key ++ location` byte strings, so store order
/// is key order with ties broken by location.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexEntry {
    pub key: Key,
    pub location: RecordLocation,
}

impl IndexEntry {
    pub fn new(key: Key, location: RecordLocation) -> Self {
        Self { key, location }
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_entry(&self.key, self.location)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_LOCATION_SIZE {
            return Err(Errors::KeyDecodeError(format!(
                "index entry too short: {} bytes",
                buf.len()
            )));
        }
        let split = buf.len() - RECORD_LOCATION_SIZE;
        Ok(Self {
            key: Key::from_bytes(buf[..split].to_vec()),
            location: RecordLocation::decode(&buf[split..])?,
        })
    }
}

pub(crate) fn encode_entry(key: &Key, location: RecordLocation) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + RECORD_LOCATION_SIZE);
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&location.encode());
    buf
}

/// 条目中 key 部分的字节
pub(crate) fn entry_key_bytes(entry: &[u8]) -> &[u8] {
    &entry[..entry.len().saturating_sub(RECORD_LOCATION_SIZE)]
}

/// 条目中的 location 部分
pub(crate) fn entry_location(entry: &[u8]) -> Result<RecordLocation> {
    if entry.len() < RECORD_LOCATION_SIZE {
        return Err(Errors::KeyDecodeError("index entry too short".into()));
    }
    RecordLocation::decode(&entry[entry.len() - RECORD_LOCATION_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        key::{KeyCodec, Value},
        spec::{Direction, IndexSpec},
    };

    #[test]
    fn test_entry_order_is_key_then_location() {
        let codec = KeyCodec::new(&IndexSpec::new("a_1", &[("a", Direction::Ascending)]));
        let k1 = codec.encode(&[Value::Int(1)]).unwrap();
        let k2 = codec.encode(&[Value::Int(2)]).unwrap();
        let e1 = IndexEntry::new(k1.clone(), RecordLocation::new(9, 9)).encode();
        let e2 = IndexEntry::new(k2.clone(), RecordLocation::new(0, 0)).encode();
        let e3 = IndexEntry::new(k1.clone(), RecordLocation::new(10, 0)).encode();
        assert!(e1 < e2);
        assert!(e1 < e3);
        assert!(e3 < e2);

        let decoded = IndexEntry::decode(&e3).unwrap();
        assert_eq!(decoded.key, k1);
        assert_eq!(decoded.location, RecordLocation::new(10, 0));
        assert_eq!(entry_key_bytes(&e2), k2.as_bytes());
        assert_eq!(entry_location(&e2), Ok(RecordLocation::new(0, 0)));
    }
}
