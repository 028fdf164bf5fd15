//! wirelane-stream エラー型

use alloc::string::String;

use wirelane_error::{errors, RpcError};

/// ストリームの符号化・復号エラー
///
/// 復号は厳格で、途中までの値を返すことはない。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// ヘッダーに満たないフレーム
    #[error("frame too short: {0} bytes")]
    TooShort(usize),
    /// 長さフィールドと実サイズの不一致
    #[error("length field {declared} does not match frame size {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    /// チェックサムの畳み込みがゼロにならない
    #[error("checksum mismatch")]
    Checksum,
    /// 未対応のプロトコルバージョン
    #[error("unsupported protocol version {0}")]
    Version(u8),
    /// 未知のフレーム種別
    #[error("unknown stream kind {0}")]
    UnknownKind(u8),
    /// callback ID のタグが uint64 ではない
    #[error("callback id tag {0} is not uint64")]
    CallbackTag(u8),
    /// バッファ末尾を越えて読もうとした
    #[error("truncated value at offset {0}")]
    Truncated(usize),
    /// 割り当てのないタグ
    #[error("invalid tag {tag} at offset {offset}")]
    InvalidTag { tag: u8, offset: usize },
    /// 期待した型と異なる値
    #[error("expected {expected} at offset {offset}")]
    TypeMismatch { expected: &'static str, offset: usize },
    /// 整数が要求された型に収まらない
    #[error("integer out of range at offset {0}")]
    OutOfRange(usize),
    /// 文字列が UTF-8 として不正
    #[error("invalid utf-8 string at offset {0}")]
    Utf8(usize),
    /// 文字列の終端 0 がない
    #[error("missing string terminator at offset {0}")]
    Terminator(usize),
    /// コンテナの総バイト長と実際の消費バイト数の不一致
    #[error("container at offset {offset} declares {declared} bytes but spans {actual}")]
    ContainerLength {
        offset: usize,
        declared: usize,
        actual: usize,
    },
    /// map に同じキーが 2 回現れた
    #[error("duplicate map key at offset {0}")]
    DuplicateKey(usize),
    /// ネスト上限を超えた。`path` は問題の要素への位置パス
    #[error("depth overflow at {path}")]
    DepthOverflow { path: String },
    /// 4 バイト長フィールドに収まらない
    #[error("value too large: {0} bytes")]
    TooLarge(usize),
}

impl StreamError {
    /// フレームの整合性（改ざん・破損）に関するエラーか
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            StreamError::LengthMismatch { .. }
                | StreamError::Checksum
                | StreamError::ContainerLength { .. }
        )
    }
}

impl From<StreamError> for RpcError {
    fn from(err: StreamError) -> Self {
        let detail = alloc::format!("{err}");
        match err {
            StreamError::DepthOverflow { path } => errors::depth_overflow(&path),
            StreamError::TooLarge(_) => errors::unsupported_value(&detail),
            ref e if e.is_integrity() => errors::integrity_failed(&detail),
            _ => errors::stream_error(&detail),
        }
    }
}
