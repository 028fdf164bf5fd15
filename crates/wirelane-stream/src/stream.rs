//! フレーム（ヘッダー + タグ付き body）のバッファ
//!
//! 書き込みカーソルはバッファ末尾、読み取りカーソルは独立して管理する。
//! 長さフィールドは書き込みのたびに更新するため、常に書き込み済みバイト数と一致する。
//! チェックサムは `build_check()` で確定させる。

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::codec::{self, Reader};
use crate::error::StreamError;
use crate::frame::{
    xor_fold, StreamKind, CALLBACK_OFFSET, CALLBACK_TAG_OFFSET, CHECKSUM_LEN, CHECKSUM_OFFSET,
    HEADER_LEN, KIND_OFFSET, LENGTH_OFFSET, PROTOCOL_VERSION, VERSION_OFFSET,
};
use crate::tag;
use crate::value::Value;
use crate::DEFAULT_MAX_DEPTH;

/// 1 つのフレーム
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    buf: Vec<u8>,
    read_pos: usize,
}

impl Stream {
    /// ヘッダーだけを書いた空のフレームを作る（callback ID は 0）
    pub fn new(kind: StreamKind) -> Self {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[VERSION_OFFSET] = PROTOCOL_VERSION;
        buf[KIND_OFFSET] = kind as u8;
        buf[CALLBACK_TAG_OFFSET] = tag::UINT64_64;
        let mut stream = Stream { buf, read_pos: HEADER_LEN };
        stream.sync_length();
        stream
    }

    /// 受信したバイト列を検証してフレームを復元する
    ///
    /// 検証順: ヘッダー長 → 長さフィールド → チェックサム → バージョン → 種別 → callback タグ。
    /// 読み取りカーソルは body の先頭に置かれる。
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, StreamError> {
        if bytes.len() < HEADER_LEN {
            return Err(StreamError::TooShort(bytes.len()));
        }
        let declared = read_u32(&bytes, LENGTH_OFFSET) as usize;
        if declared != bytes.len() {
            return Err(StreamError::LengthMismatch { declared, actual: bytes.len() });
        }
        if xor_fold(&bytes) != [0; 8] {
            return Err(StreamError::Checksum);
        }
        if bytes[VERSION_OFFSET] != PROTOCOL_VERSION {
            return Err(StreamError::Version(bytes[VERSION_OFFSET]));
        }
        StreamKind::from_u8(bytes[KIND_OFFSET])?;
        if bytes[CALLBACK_TAG_OFFSET] != tag::UINT64_64 {
            return Err(StreamError::CallbackTag(bytes[CALLBACK_TAG_OFFSET]));
        }
        Ok(Stream { buf: bytes, read_pos: HEADER_LEN })
    }

    /// バイト列が正しいフレームかどうかだけを判定する
    pub fn check_bytes(bytes: &[u8]) -> bool {
        Stream::from_bytes(bytes.to_vec()).is_ok()
    }

    // ===== ヘッダー =====

    pub fn version(&self) -> u8 {
        self.buf[VERSION_OFFSET]
    }

    /// フレーム種別（`new` / `from_bytes` を経ているので常に既知の値）
    pub fn kind(&self) -> StreamKind {
        StreamKind::from_u8(self.buf[KIND_OFFSET]).unwrap_or(StreamKind::SystemErrorReport)
    }

    pub fn set_kind(&mut self, kind: StreamKind) {
        self.buf[KIND_OFFSET] = kind as u8;
    }

    pub fn callback_id(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[CALLBACK_OFFSET..CALLBACK_OFFSET + 8]);
        u64::from_le_bytes(raw)
    }

    /// callback ID を書き換える（送信前に `build_check()` をやり直すこと）
    pub fn set_callback_id(&mut self, id: u64) {
        self.buf[CALLBACK_OFFSET..CALLBACK_OFFSET + 8].copy_from_slice(&id.to_le_bytes());
    }

    /// 長さフィールドの値
    pub fn declared_len(&self) -> usize {
        read_u32(&self.buf, LENGTH_OFFSET) as usize
    }

    /// 書き込み済みバイト数（= 書き込みカーソル）
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// body に何も書かれていないか（ヘッダーは常にある）
    pub fn is_body_empty(&self) -> bool {
        self.body_len() == 0
    }

    pub fn body_len(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // ===== 整合性 =====

    /// 長さとチェックサムを確定させる
    pub fn build_check(&mut self) {
        self.sync_length();
        self.buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].fill(0);
        let fold = xor_fold(&self.buf);
        self.buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].copy_from_slice(&fold);
    }

    /// 長さフィールドが一致し、全体の XOR 畳み込みがゼロになるか
    pub fn verify_check(&self) -> bool {
        self.declared_len() == self.buf.len() && xor_fold(&self.buf) == [0; 8]
    }

    fn sync_length(&mut self) {
        // 4GB を超えるフレームは書き込み時に TooLarge で弾いている
        let len = self.buf.len() as u32;
        self.buf[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&len.to_le_bytes());
    }

    // ===== 書き込み =====

    /// 値を書き込む（ネスト上限はデフォルトの 64）
    pub fn write_value(&mut self, value: &Value) -> Result<(), StreamError> {
        self.write_value_with_depth(value, DEFAULT_MAX_DEPTH)
    }

    /// ネスト上限を指定して値を書き込む
    ///
    /// 失敗した場合、バッファは呼び出し前の状態に戻る。
    /// `DepthOverflow` の `path` は `$[2]["items"][0]` のような位置パス。
    pub fn write_value_with_depth(&mut self, value: &Value, max_depth: usize) -> Result<(), StreamError> {
        self.write_with(|out| codec::encode_value(out, value, max_depth))
            .map_err(|e| match e {
                StreamError::DepthOverflow { path } => {
                    StreamError::DepthOverflow { path: alloc::format!("${path}") }
                }
                other => other,
            })
    }

    pub fn write_null(&mut self) {
        self.buf.push(tag::NULL);
        self.sync_length();
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(if v { tag::TRUE } else { tag::FALSE });
        self.sync_length();
    }

    pub fn write_f64(&mut self, v: f64) {
        codec::encode_f64(&mut self.buf, v);
        self.sync_length();
    }

    pub fn write_i64(&mut self, v: i64) {
        codec::encode_i64(&mut self.buf, v);
        self.sync_length();
    }

    pub fn write_u64(&mut self, v: u64) {
        codec::encode_u64(&mut self.buf, v);
        self.sync_length();
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), StreamError> {
        self.write_with(|out| codec::encode_str(out, s))
    }

    pub fn write_bytes(&mut self, b: &[u8]) -> Result<(), StreamError> {
        self.write_with(|out| codec::encode_bytes(out, b))
    }

    fn write_with<F>(&mut self, encode: F) -> Result<(), StreamError>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), StreamError>,
    {
        let mark = self.buf.len();
        let result = encode(&mut self.buf).and_then(|()| {
            if u32::try_from(self.buf.len()).is_err() {
                return Err(StreamError::TooLarge(self.buf.len()));
            }
            Ok(())
        });
        if result.is_err() {
            self.buf.truncate(mark);
        }
        self.sync_length();
        result
    }

    // ===== 読み取り =====

    /// 読み取りカーソルの位置
    pub fn read_pos(&self) -> usize {
        self.read_pos
    }

    /// body をすべて読み終えたか
    pub fn is_read_finish(&self) -> bool {
        self.read_pos >= self.buf.len()
    }

    /// 読み取りカーソルを body の先頭に戻す
    pub fn rewind(&mut self) {
        self.read_pos = HEADER_LEN;
    }

    /// 値を 1 つ読む。失敗した場合カーソルは動かない
    pub fn read_value(&mut self) -> Result<Value, StreamError> {
        self.read_value_with_depth(DEFAULT_MAX_DEPTH)
    }

    pub fn read_value_with_depth(&mut self, max_depth: usize) -> Result<Value, StreamError> {
        self.read_with(|r| r.decode_value(max_depth))
            .map_err(|e| match e {
                StreamError::DepthOverflow { path } => {
                    StreamError::DepthOverflow { path: alloc::format!("${path}") }
                }
                other => other,
            })
    }

    /// 値を 1 つ読み飛ばす（コンテナは総バイト長で一気に飛ばす）
    pub fn skip_value(&mut self) -> Result<(), StreamError> {
        self.read_with(|r| r.skip_value())
    }

    pub fn read_null(&mut self) -> Result<(), StreamError> {
        self.read_typed("null", |v| v.is_null().then_some(()))
    }

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        self.read_typed("bool", |v| v.as_bool())
    }

    pub fn read_f64(&mut self) -> Result<f64, StreamError> {
        self.read_typed("float64", |v| v.as_f64())
    }

    /// 整数を i64 として読む（uint64 タグも範囲内なら受け付ける）
    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        self.read_integer(|v| v.as_i64())
    }

    /// 整数を u64 として読む（非負の int64 タグも受け付ける）
    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        self.read_integer(|v| v.as_u64())
    }

    pub fn read_string(&mut self) -> Result<String, StreamError> {
        self.read_typed("string", |v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, StreamError> {
        self.read_typed("bytes", |v| match v {
            Value::Bytes(b) => Some(b),
            _ => None,
        })
    }

    fn read_with<T, F>(&mut self, read: F) -> Result<T, StreamError>
    where
        F: FnOnce(&mut Reader<'_>) -> Result<T, StreamError>,
    {
        let mut reader = Reader::new(&self.buf, self.read_pos);
        let value = read(&mut reader)?;
        self.read_pos = reader.pos;
        Ok(value)
    }

    fn read_typed<T, F>(&mut self, expected: &'static str, convert: F) -> Result<T, StreamError>
    where
        F: FnOnce(Value) -> Option<T>,
    {
        let offset = self.read_pos;
        self.read_with(|r| {
            let value = r.decode_value(DEFAULT_MAX_DEPTH)?;
            convert(value).ok_or(StreamError::TypeMismatch { expected, offset })
        })
    }

    fn read_integer<T, F>(&mut self, convert: F) -> Result<T, StreamError>
    where
        F: FnOnce(&Value) -> Option<T>,
    {
        let offset = self.read_pos;
        self.read_with(|r| {
            let value = r.decode_value(DEFAULT_MAX_DEPTH)?;
            match value {
                Value::Int64(_) | Value::Uint64(_) => {
                    convert(&value).ok_or(StreamError::OutOfRange(offset))
                }
                _ => Err(StreamError::TypeMismatch { expected: "integer", offset }),
            }
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}
