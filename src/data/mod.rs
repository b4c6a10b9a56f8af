pub mod document;
pub mod index_entry;
pub mod record;

use bytes::BufMut;
use prost::{decode_length_delimiter, encode_length_delimiter};

/// 写入长度前缀和数据
pub(crate) fn put_len_prefixed(buf: &mut impl BufMut, data: &[u8]) {
    // 向可扩容缓冲区写长度前缀不会失败
    let _ = encode_length_delimiter(data.len(), buf);
    buf.put_slice(data);
}

/// 读取长度前缀和数据，数据不完整时返回 None
pub(crate) fn get_len_prefixed<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = decode_length_delimiter(&mut *buf).ok()?;
    if buf.len() < len {
        return None;
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Some(data)
}
