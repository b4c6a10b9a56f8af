use std::{cmp::Ordering, fmt};

/// A typed field value as seen by the index.
///
/// `Array` only appears inside documents; key extraction expands it into one
/// key per element, so it is never a key component itself.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// 字段不存在
    Missing,
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

/// 类型标签，决定不同类型之间的顺序
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ValueTag {
    Missing = 0x10,
    Null = 0x20,
    Bool = 0x30,
    Int = 0x40,
    Double = 0x50,
    String = 0x60,
    Bytes = 0x70,
}

impl ValueTag {
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x10 => Some(ValueTag::Missing),
            0x20 => Some(ValueTag::Null),
            0x30 => Some(ValueTag::Bool),
            0x40 => Some(ValueTag::Int),
            0x50 => Some(ValueTag::Double),
            0x60 => Some(ValueTag::String),
            0x70 => Some(ValueTag::Bytes),
            _ => None,
        }
    }
}

impl Value {
    pub(crate) fn tag(&self) -> Option<ValueTag> {
        match self {
            Value::Missing => Some(ValueTag::Missing),
            Value::Null => Some(ValueTag::Null),
            Value::Bool(_) => Some(ValueTag::Bool),
            Value::Int(_) => Some(ValueTag::Int),
            Value::Double(_) => Some(ValueTag::Double),
            Value::String(_) => Some(ValueTag::String),
            Value::Bytes(_) => Some(ValueTag::Bytes),
            Value::Array(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// 升序下的比较，与编码后的字节序一致
    pub(crate) fn index_cmp(&self, other: &Value) -> Ordering {
        let (Some(lt), Some(rt)) = (self.tag(), other.tag()) else {
            return Ordering::Equal;
        };
        if lt != rt {
            return lt.cmp(&rt);
        }
        match (self, other) {
            (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
            (Value::Int(l), Value::Int(r)) => l.cmp(r),
            (Value::Double(l), Value::Double(r)) => {
                ordered_f64_bits(*l).cmp(&ordered_f64_bits(*r))
            }
            (Value::String(l), Value::String(r)) => l.as_bytes().cmp(r.as_bytes()),
            (Value::Bytes(l), Value::Bytes(r)) => l.cmp(r),
            _ => Ordering::Equal,
        }
    }
}

/// f64 映射到可按字节比较的 u64，-0.0 与 0.0 视为相同，NaN 统一为正 NaN
pub(crate) fn ordered_f64_bits(v: f64) -> u64 {
    let v = if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    };
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

pub(crate) fn f64_from_ordered_bits(bits: u64) -> f64 {
    if bits & (1 << 63) != 0 {
        f64::from_bits(bits & !(1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => write!(f, "MissingField"),
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::String(v) => write!(f, "\"{}\"", v),
            Value::Bytes(v) => {
                write!(f, "BinData(")?;
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, ")")
            }
            Value::Array(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_f64_bits() {
        let values = [f64::NEG_INFINITY, -10.5, -1.0, 0.0, 1e-9, 2.0, f64::INFINITY];
        for pair in values.windows(2) {
            assert!(ordered_f64_bits(pair[0]) < ordered_f64_bits(pair[1]));
        }
        assert_eq!(ordered_f64_bits(-0.0), ordered_f64_bits(0.0));
        for v in values {
            assert_eq!(f64_from_ordered_bits(ordered_f64_bits(v)), v);
        }
    }

    #[test]
    fn test_index_cmp_across_types() {
        assert_eq!(Value::Missing.index_cmp(&Value::Null), Ordering::Less);
        assert_eq!(Value::Int(100).index_cmp(&Value::Double(1.0)), Ordering::Less);
        assert_eq!(
            Value::from("b").index_cmp(&Value::from("ab")),
            Ordering::Greater
        );
        assert_eq!(Value::Int(-3).index_cmp(&Value::Int(2)), Ordering::Less);
    }
}
