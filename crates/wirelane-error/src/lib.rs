//! # wirelane-error
//!
//! トランスポート全体で使うエラー値。
//!
//! ## コード体系
//!
//! ```text
//! code = (category << 20) | (severity << 16) | index
//!
//!   bit 20..  : Category（Config / Net / Action / Develop / Kernel / Security）
//!   bit 16..19: Severity（Warn / Error / Fatal）
//!   bit 0..15 : カテゴリ内のインデックス
//! ```
//!
//! `RpcError` は不変値。`add_debug()` は元の値を変更せず、メッセージに追記した
//! 新しい値を返す。呼び出し境界をまたいでデバッグ情報を積み重ねても
//! エイリアシングが起きない。

#![no_std]
extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};

/// エラーのカテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// クライアント設定の誤り
    Config = 1,
    /// 接続・ソケット・スキーム・タイムアウト
    Net = 2,
    /// 呼び出し側の操作が不正（転送上限超過など）
    Action = 3,
    /// 開発時の誤用（サポート外の値、ネスト超過など）
    Develop = 4,
    /// フレームの構造が壊れている
    Kernel = 5,
    /// 整合性検査の失敗（チェックサム・長さ不一致）
    Security = 6,
}

impl Category {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Category::Config),
            2 => Some(Category::Net),
            3 => Some(Category::Action),
            4 => Some(Category::Develop),
            5 => Some(Category::Kernel),
            6 => Some(Category::Security),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Config => "Config",
            Category::Net => "Net",
            Category::Action => "Action",
            Category::Develop => "Develop",
            Category::Kernel => "Kernel",
            Category::Security => "Security",
        }
    }
}

/// エラーの重大度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warn = 1,
    Error = 2,
    Fatal = 3,
}

impl Severity {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Severity::Warn),
            2 => Some(Severity::Error),
            3 => Some(Severity::Fatal),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Severity::Warn => "Warn",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }
}

/// インデックス部のマスク（下位 16 ビット）
pub const INDEX_MASK: u32 = 0xFFFF;

/// カテゴリ・重大度・インデックスを 1 つの整数にまとめたエラー値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    code: u32,
    message: String,
}

impl RpcError {
    pub fn new(category: Category, severity: Severity, index: u16, message: impl Into<String>) -> Self {
        RpcError {
            code: compose_code(category, severity, index),
            message: message.into(),
        }
    }

    /// 受信したコードからエラー値を復元する
    ///
    /// 未知のカテゴリ・重大度でもコードはそのまま保持する（`category()` が `None` を返す）。
    pub fn from_code(code: u32, message: impl Into<String>) -> Self {
        RpcError { code, message: message.into() }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn category(&self) -> Option<Category> {
        Category::from_raw(self.code >> 20)
    }

    pub fn severity(&self) -> Option<Severity> {
        Severity::from_raw((self.code >> 16) & 0xF)
    }

    pub fn index(&self) -> u16 {
        (self.code & INDEX_MASK) as u16
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `text` をメッセージ末尾に追記した新しいエラー値を返す（self は変更しない）
    pub fn add_debug(&self, text: &str) -> Self {
        let message = if self.message.is_empty() {
            text.to_string()
        } else {
            format!("{}\n{}", self.message, text)
        };
        RpcError { code: self.code, message }
    }

    pub fn is(&self, other: &RpcError) -> bool {
        self.code == other.code
    }
}

impl core::fmt::Display for RpcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let category = self.category().map(|c| c.name()).unwrap_or("Unknown");
        let severity = self.severity().map(|s| s.name()).unwrap_or("Unknown");
        write!(f, "{}{}[{}]: {}", category, severity, self.code & INDEX_MASK, self.message)
    }
}

impl core::error::Error for RpcError {}

const fn compose_code(category: Category, severity: Severity, index: u16) -> u32 {
    ((category as u32) << 20) | ((severity as u32) << 16) | index as u32
}

/// トランスポートが発生させるエラーの定義済みコンストラクタ
pub mod errors {
    use super::{Category, RpcError, Severity};

    /// クライアント設定が不正
    pub fn config_invalid(detail: &str) -> RpcError {
        RpcError::new(Category::Config, Severity::Fatal, 1, detail)
    }

    /// サポートしない接続スキーム
    pub fn unsupported_scheme(url: &str) -> RpcError {
        RpcError::new(Category::Net, Severity::Fatal, 1, alloc::format!("unsupported scheme: {url}"))
    }

    /// ソケットの接続失敗
    pub fn dial_failed(detail: &str) -> RpcError {
        RpcError::new(Category::Net, Severity::Error, 2, detail)
    }

    /// ソケットレベルのエラー
    pub fn socket_error(detail: &str) -> RpcError {
        RpcError::new(Category::Net, Severity::Error, 3, detail)
    }

    /// リクエストのタイムアウト
    pub fn timeout(target: &str) -> RpcError {
        RpcError::new(Category::Net, Severity::Error, 4, alloc::format!("request timeout: {target}"))
    }

    /// ハートビート応答がなく接続を切断した
    pub fn heartbeat_lost(silent_ms: u64) -> RpcError {
        RpcError::new(
            Category::Net,
            Severity::Warn,
            5,
            alloc::format!("no traffic for {silent_ms}ms, connection dropped"),
        )
    }

    /// クライアントが閉じられた
    pub fn client_closed() -> RpcError {
        RpcError::new(Category::Net, Severity::Error, 6, "client closed")
    }

    /// 送信フレームがセッションの転送上限を超えた
    pub fn transfer_limit(len: usize, limit: u64) -> RpcError {
        RpcError::new(
            Category::Action,
            Severity::Error,
            1,
            alloc::format!("frame of {len} bytes exceeds transfer limit {limit}"),
        )
    }

    /// ストリームに書き込めない値
    pub fn unsupported_value(detail: &str) -> RpcError {
        RpcError::new(Category::Develop, Severity::Error, 1, detail)
    }

    /// コンテナのネストが深すぎる
    pub fn depth_overflow(path: &str) -> RpcError {
        RpcError::new(Category::Develop, Severity::Error, 2, alloc::format!("depth overflow at {path}"))
    }

    /// フレームの構造が壊れている
    pub fn stream_error(detail: &str) -> RpcError {
        RpcError::new(Category::Kernel, Severity::Error, 1, detail)
    }

    /// ハンドシェイクの内容が不正
    pub fn handshake_invalid(detail: &str) -> RpcError {
        RpcError::new(Category::Kernel, Severity::Fatal, 2, detail)
    }

    /// 想定外のフレーム種別を受信した
    pub fn unexpected_frame(detail: &str) -> RpcError {
        RpcError::new(Category::Kernel, Severity::Warn, 3, detail)
    }

    /// チェックサム・長さの整合性検査に失敗した
    pub fn integrity_failed(detail: &str) -> RpcError {
        RpcError::new(Category::Security, Severity::Fatal, 1, detail)
    }
}
