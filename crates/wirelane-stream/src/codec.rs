//! タグバイト方式の値エンコーダ/デコーダ

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use wirelane_float::{Endian, FloatFormat};

use crate::error::StreamError;
use crate::tag;
use crate::value::Value;

// ===== エンコード =====

/// 値を `out` の末尾に書き込む
///
/// `depth` はコンテナに入るたびに 1 減る残りネスト数。0 のときにコンテナを
/// 書こうとすると `DepthOverflow` になる（パスは呼び出し側で付け足していく）。
pub(crate) fn encode_value(out: &mut Vec<u8>, value: &Value, depth: usize) -> Result<(), StreamError> {
    match value {
        Value::Null => out.push(tag::NULL),
        Value::Bool(false) => out.push(tag::FALSE),
        Value::Bool(true) => out.push(tag::TRUE),
        Value::Float64(v) => encode_f64(out, *v),
        Value::Int64(v) => encode_i64(out, *v),
        Value::Uint64(v) => encode_u64(out, *v),
        Value::String(s) => encode_str(out, s)?,
        Value::Bytes(b) => encode_bytes(out, b)?,
        Value::Array(items) => {
            if items.is_empty() {
                out.push(tag::ARRAY_EMPTY);
                return Ok(());
            }
            let depth = enter(depth)?;
            let start = begin_container(out, tag::ARRAY_EMPTY, tag::ARRAY_LONG, items.len())?;
            for (i, item) in items.iter().enumerate() {
                encode_value(out, item, depth).map_err(|e| prefix_path(e, &format!("[{i}]")))?;
            }
            finish_container(out, start)?;
        }
        Value::Map(entries) => {
            if entries.is_empty() {
                out.push(tag::MAP_EMPTY);
                return Ok(());
            }
            let depth = enter(depth)?;
            let start = begin_container(out, tag::MAP_EMPTY, tag::MAP_LONG, entries.len())?;
            for (key, item) in entries {
                encode_str(out, key)?;
                encode_value(out, item, depth).map_err(|e| prefix_path(e, &format!("[{key:?}]")))?;
            }
            finish_container(out, start)?;
        }
    }
    Ok(())
}

pub(crate) fn encode_f64(out: &mut Vec<u8>, v: f64) {
    // +0.0 だけがゼロタグ。-0.0 は符号を保つため 9 バイト形式
    if v.to_bits() == 0 {
        out.push(tag::FLOAT64_ZERO);
        return;
    }
    out.push(tag::FLOAT64);
    let at = out.len();
    out.resize(at + 8, 0);
    // 8 バイト確保済みなので範囲外にはならない
    let _ = FloatFormat::BINARY64.pack(out, at, v, Endian::Little);
}

pub(crate) fn encode_i64(out: &mut Vec<u8>, v: i64) {
    if (tag::INT64_INLINE_MIN..=tag::INT64_INLINE_MAX).contains(&v) {
        out.push((v + tag::INT64_INLINE_BIAS) as u8);
    } else if let Ok(x) = i16::try_from(v) {
        out.push(tag::INT64_16);
        out.extend_from_slice(&x.to_le_bytes());
    } else if let Ok(x) = i32::try_from(v) {
        out.push(tag::INT64_32);
        out.extend_from_slice(&x.to_le_bytes());
    } else {
        out.push(tag::INT64_64);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub(crate) fn encode_u64(out: &mut Vec<u8>, v: u64) {
    if v <= tag::UINT64_INLINE_MAX {
        out.push(tag::UINT64_INLINE_START + v as u8);
    } else if let Ok(x) = u16::try_from(v) {
        out.push(tag::UINT64_16);
        out.extend_from_slice(&x.to_le_bytes());
    } else if let Ok(x) = u32::try_from(v) {
        out.push(tag::UINT64_32);
        out.extend_from_slice(&x.to_le_bytes());
    } else {
        out.push(tag::UINT64_64);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub(crate) fn encode_str(out: &mut Vec<u8>, s: &str) -> Result<(), StreamError> {
    let len = s.len();
    if len == 0 {
        out.push(tag::STRING_EMPTY);
        return Ok(());
    }
    if len <= tag::SHORT_LEN_MAX {
        out.push(tag::STRING_EMPTY + len as u8);
    } else {
        out.push(tag::STRING_LONG);
        out.extend_from_slice(&len_u32(len)?.to_le_bytes());
    }
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    Ok(())
}

pub(crate) fn encode_bytes(out: &mut Vec<u8>, b: &[u8]) -> Result<(), StreamError> {
    let len = b.len();
    if len == 0 {
        out.push(tag::BYTES_EMPTY);
        return Ok(());
    }
    if len <= tag::SHORT_LEN_MAX {
        out.push(tag::BYTES_EMPTY + len as u8);
    } else {
        out.push(tag::BYTES_LONG);
        out.extend_from_slice(&len_u32(len)?.to_le_bytes());
    }
    out.extend_from_slice(b);
    Ok(())
}

fn enter(depth: usize) -> Result<usize, StreamError> {
    depth
        .checked_sub(1)
        .ok_or(StreamError::DepthOverflow { path: String::new() })
}

fn prefix_path(err: StreamError, segment: &str) -> StreamError {
    match err {
        StreamError::DepthOverflow { path } => StreamError::DepthOverflow {
            path: format!("{segment}{path}"),
        },
        other => other,
    }
}

/// コンテナのタグと総バイト長のプレースホルダを書き、開始位置を返す
fn begin_container(out: &mut Vec<u8>, empty_tag: u8, long_tag: u8, count: usize) -> Result<usize, StreamError> {
    let start = out.len();
    if count <= tag::CONTAINER_INLINE_MAX {
        out.push(empty_tag + count as u8);
        out.extend_from_slice(&[0; 4]);
    } else {
        out.push(long_tag);
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&len_u32(count)?.to_le_bytes());
    }
    Ok(start)
}

/// タグ直後の総バイト長（タグから最終要素までのバイト数）を埋める
fn finish_container(out: &mut [u8], start: usize) -> Result<(), StreamError> {
    let total = len_u32(out.len() - start)?;
    out[start + 1..start + 5].copy_from_slice(&total.to_le_bytes());
    Ok(())
}

fn len_u32(len: usize) -> Result<u32, StreamError> {
    u32::try_from(len).map_err(|_| StreamError::TooLarge(len))
}

// ===== デコード =====

/// バッファ上の読み取りカーソル
///
/// 失敗時に呼び出し側のカーソルを進めないよう、成功した場合だけ `pos` を書き戻す。
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pub(crate) pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], pos: usize) -> Self {
        Reader { buf, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StreamError> {
        let end = self.pos.checked_add(n).ok_or(StreamError::Truncated(self.pos))?;
        let slice = self.buf.get(self.pos..end).ok_or(StreamError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    fn u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.take(1)?[0])
    }

    fn u32_len(&mut self) -> Result<usize, StreamError> {
        Ok(u32::from_le_bytes(self.take_array()?) as usize)
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn decode_value(&mut self, depth: usize) -> Result<Value, StreamError> {
        let offset = self.pos;
        let t = self.u8()?;
        let value = match t {
            tag::NULL => Value::Null,
            tag::FALSE => Value::Bool(false),
            tag::TRUE => Value::Bool(true),
            tag::FLOAT64_ZERO => Value::Float64(0.0),
            tag::FLOAT64 => {
                let raw: [u8; 8] = self.take_array()?;
                let v = FloatFormat::BINARY64
                    .unpack(&raw, 0, Endian::Little)
                    .map_err(|_| StreamError::Truncated(offset))?;
                Value::Float64(v)
            }
            tag::INT64_16 => Value::Int64(i16::from_le_bytes(self.take_array()?) as i64),
            tag::INT64_32 => Value::Int64(i32::from_le_bytes(self.take_array()?) as i64),
            tag::INT64_64 => Value::Int64(i64::from_le_bytes(self.take_array()?)),
            tag::UINT64_16 => Value::Uint64(u16::from_le_bytes(self.take_array()?) as u64),
            tag::UINT64_32 => Value::Uint64(u32::from_le_bytes(self.take_array()?) as u64),
            tag::UINT64_64 => Value::Uint64(u64::from_le_bytes(self.take_array()?)),
            tag::INT64_INLINE_START..=tag::INT64_INLINE_END => {
                Value::Int64(t as i64 - tag::INT64_INLINE_BIAS)
            }
            tag::UINT64_INLINE_START..=tag::UINT64_INLINE_END => {
                Value::Uint64((t - tag::UINT64_INLINE_START) as u64)
            }
            tag::ARRAY_EMPTY => Value::Array(Vec::new()),
            0x41..=tag::ARRAY_LONG => {
                let depth = enter(depth)?;
                let (declared, count) = self.container_header(t, tag::ARRAY_EMPTY, tag::ARRAY_LONG)?;
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let item = self
                        .decode_value(depth)
                        .map_err(|e| prefix_path(e, &format!("[{i}]")))?;
                    items.push(item);
                }
                self.check_container(offset, declared)?;
                Value::Array(items)
            }
            tag::MAP_EMPTY => Value::Map(BTreeMap::new()),
            0x61..=tag::MAP_LONG => {
                let depth = enter(depth)?;
                let (declared, count) = self.container_header(t, tag::MAP_EMPTY, tag::MAP_LONG)?;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key_offset = self.pos;
                    let key = self.decode_string()?;
                    if entries.contains_key(&key) {
                        return Err(StreamError::DuplicateKey(key_offset));
                    }
                    let item = self
                        .decode_value(depth)
                        .map_err(|e| prefix_path(e, &format!("[{key:?}]")))?;
                    entries.insert(key, item);
                }
                self.check_container(offset, declared)?;
                Value::Map(entries)
            }
            tag::STRING_EMPTY..=tag::STRING_LONG => Value::String(self.string_body(t, offset)?),
            tag::BYTES_EMPTY => Value::Bytes(Vec::new()),
            0xC1..=tag::BYTES_LONG => {
                let len = if t == tag::BYTES_LONG {
                    self.u32_len()?
                } else {
                    (t - tag::BYTES_EMPTY) as usize
                };
                Value::Bytes(self.take(len)?.to_vec())
            }
            other => return Err(StreamError::InvalidTag { tag: other, offset }),
        };
        Ok(value)
    }

    /// Map のキーなど、文字列であることが決まっている値を読む
    fn decode_string(&mut self) -> Result<String, StreamError> {
        let offset = self.pos;
        let t = self.u8()?;
        if !(tag::STRING_EMPTY..=tag::STRING_LONG).contains(&t) {
            return Err(StreamError::TypeMismatch { expected: "string", offset });
        }
        self.string_body(t, offset)
    }

    fn string_body(&mut self, t: u8, offset: usize) -> Result<String, StreamError> {
        let len = match t {
            tag::STRING_EMPTY => return Ok(String::new()),
            tag::STRING_LONG => self.u32_len()?,
            _ => (t - tag::STRING_EMPTY) as usize,
        };
        let body = self.take(len)?;
        if self.u8()? != 0 {
            return Err(StreamError::Terminator(offset));
        }
        core::str::from_utf8(body)
            .map(String::from)
            .map_err(|_| StreamError::Utf8(offset))
    }

    /// コンテナの総バイト長と要素数を読む
    fn container_header(&mut self, t: u8, empty_tag: u8, long_tag: u8) -> Result<(usize, usize), StreamError> {
        let declared = self.u32_len()?;
        let count = if t == long_tag {
            self.u32_len()?
        } else {
            (t - empty_tag) as usize
        };
        // 1 要素は最低 1 バイト。残りより多い要素数は巨大な確保を防ぐため即エラー
        if count > self.remaining() {
            return Err(StreamError::Truncated(self.pos));
        }
        Ok((declared, count))
    }

    fn check_container(&self, offset: usize, declared: usize) -> Result<(), StreamError> {
        let actual = self.pos - offset;
        if actual != declared {
            return Err(StreamError::ContainerLength { offset, declared, actual });
        }
        Ok(())
    }

    /// 値を 1 つ読み飛ばす。コンテナは総バイト長フィールドで一気に飛ばす
    pub(crate) fn skip_value(&mut self) -> Result<(), StreamError> {
        let offset = self.pos;
        let t = *self.buf.get(offset).ok_or(StreamError::Truncated(offset))?;
        let is_container = matches!(t, 0x41..=tag::ARRAY_LONG | 0x61..=tag::MAP_LONG);
        if !is_container {
            self.decode_value(0)?;
            return Ok(());
        }
        self.pos += 1;
        let declared = self.u32_len()?;
        if declared < 5 {
            return Err(StreamError::ContainerLength { offset, declared, actual: 5 });
        }
        self.pos = offset;
        self.take(declared)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn encoded(value: &Value) -> Vec<u8> {
        let mut out = Vec::new();
        encode_value(&mut out, value, 64).unwrap();
        out
    }

    fn decoded(bytes: &[u8]) -> Result<Value, StreamError> {
        let mut r = Reader::new(bytes, 0);
        let v = r.decode_value(64)?;
        assert_eq!(r.pos, bytes.len(), "全バイトを消費すべき");
        Ok(v)
    }

    #[test]
    fn test_scalar_tags() {
        assert_eq!(encoded(&Value::Null), vec![1]);
        assert_eq!(encoded(&Value::Bool(false)), vec![2]);
        assert_eq!(encoded(&Value::Bool(true)), vec![3]);
        assert_eq!(encoded(&Value::Float64(0.0)), vec![4]);
        assert_eq!(encoded(&Value::Float64(-0.0))[0], 5);
        assert_eq!(encoded(&Value::Float64(1.0)), [&[5u8][..], &1.0f64.to_le_bytes()[..]].concat());
    }

    #[test]
    fn test_int64_width_selection() {
        assert_eq!(encoded(&Value::Int64(-7)), vec![14]);
        assert_eq!(encoded(&Value::Int64(0)), vec![21]);
        assert_eq!(encoded(&Value::Int64(32)), vec![53]);
        assert_eq!(encoded(&Value::Int64(33)), vec![6, 33, 0]);
        assert_eq!(encoded(&Value::Int64(-8)), vec![6, 0xF8, 0xFF]);
        assert_eq!(encoded(&Value::Int64(40_000)).len(), 5);
        assert_eq!(encoded(&Value::Int64(40_000))[0], 7);
        assert_eq!(encoded(&Value::Int64(i64::MIN))[0], 8);
        assert_eq!(encoded(&Value::Int64(i64::MIN)).len(), 9);
    }

    #[test]
    fn test_uint64_width_selection() {
        assert_eq!(encoded(&Value::Uint64(0)), vec![54]);
        assert_eq!(encoded(&Value::Uint64(9)), vec![63]);
        assert_eq!(encoded(&Value::Uint64(10)), vec![9, 10, 0]);
        assert_eq!(encoded(&Value::Uint64(70_000))[0], 10);
        assert_eq!(encoded(&Value::Uint64(u64::MAX)), [&[11u8][..], &[0xFFu8; 8][..]].concat());
    }

    #[test]
    fn test_string_and_bytes_layout() {
        assert_eq!(encoded(&Value::from("")), vec![128]);
        assert_eq!(encoded(&Value::from("ab")), vec![130, b'a', b'b', 0]);
        assert_eq!(encoded(&Value::Bytes(vec![])), vec![192]);
        assert_eq!(encoded(&Value::Bytes(vec![7, 8])), vec![194, 7, 8]);

        let long = "x".repeat(63);
        let bytes = encoded(&Value::from(long.as_str()));
        assert_eq!(bytes[0], 191);
        assert_eq!(&bytes[1..5], &63u32.to_le_bytes());
        assert_eq!(bytes.len(), 1 + 4 + 63 + 1);
    }

    #[test]
    fn test_container_total_length() {
        let value = Value::Array(vec![Value::Int64(1), Value::from("a")]);
        let bytes = encoded(&value);
        // tag(1) + total(4) + int(1) + "a"(3)
        assert_eq!(bytes[0], 66);
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 9);
        assert_eq!(bytes.len(), 9);
        assert_eq!(decoded(&bytes).unwrap(), value);
    }

    #[test]
    fn test_invalid_tags_rejected() {
        for t in [0u8, 12, 13] {
            assert_eq!(decoded(&[t]), Err(StreamError::InvalidTag { tag: t, offset: 0 }));
        }
    }

    #[test]
    fn test_truncated_rejected() {
        assert!(matches!(decoded(&[6, 1]), Err(StreamError::Truncated(_))));
        assert!(matches!(decoded(&[5, 0, 0]), Err(StreamError::Truncated(_))));
        assert!(matches!(decoded(&[131, b'a', b'b']), Err(StreamError::Truncated(_))));
        assert!(matches!(decoded(&[66, 9, 0, 0, 0, 22]), Err(StreamError::Truncated(_))));
    }

    #[test]
    fn test_string_terminator_and_utf8() {
        assert_eq!(decoded(&[129, b'a', 1]), Err(StreamError::Terminator(0)));
        assert_eq!(decoded(&[129, 0xFF, 0]), Err(StreamError::Utf8(0)));
    }

    #[test]
    fn test_container_length_mismatch() {
        let mut bytes = encoded(&Value::Array(vec![Value::Null]));
        bytes[1] = 99;
        assert_eq!(
            decoded(&bytes),
            Err(StreamError::ContainerLength { offset: 0, declared: 99, actual: 6 })
        );
    }

    #[test]
    fn test_map_key_must_be_string() {
        // map(1) total=7: key=int 1, value=null
        let bytes = [97u8, 7, 0, 0, 0, 22, 1];
        assert_eq!(
            decoded(&bytes),
            Err(StreamError::TypeMismatch { expected: "string", offset: 5 })
        );
    }

    #[test]
    fn test_map_duplicate_key_rejected() {
        // map(2) total=13: "a" -> 1, "a" -> 2
        let bytes = [98u8, 13, 0, 0, 0, 129, b'a', 0, 22, 129, b'a', 0, 23];
        assert_eq!(decoded(&bytes), Err(StreamError::DuplicateKey(9)));
    }

    #[test]
    fn test_skip_uses_container_length() {
        let value = Value::Array(vec![Value::from("skip me"), Value::Array(vec![Value::Null])]);
        let mut bytes = encoded(&value);
        bytes.push(tag::TRUE);

        let mut r = Reader::new(&bytes, 0);
        r.skip_value().unwrap();
        assert_eq!(r.decode_value(64).unwrap(), Value::Bool(true));
    }
}
