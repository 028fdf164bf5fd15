//! wirelane-adapter エラー型

use alloc::string::String;

use wirelane_error::{errors, RpcError};

/// 接続アダプタのエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// ws / wss 以外のスキーム
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// 接続が確立していない状態で送信しようとした
    #[error("connection is not open")]
    NotOpen,
    /// Connector がフレームの送信に失敗した
    #[error("send failed: {0}")]
    Send(String),
}

impl From<AdapterError> for RpcError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::UnsupportedScheme(url) => errors::unsupported_scheme(&url),
            AdapterError::NotOpen => errors::socket_error("connection is not open"),
            AdapterError::Send(detail) => errors::socket_error(&detail),
        }
    }
}
