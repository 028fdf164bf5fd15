//! クライアント設定

use alloc::string::String;

use serde::{Deserialize, Serialize};
use wirelane_error::{errors, RpcError};

/// リクエストのデフォルトタイムアウト（ミリ秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 8000;
/// タイムアウト掃除の間隔（ミリ秒）
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
/// ハンドシェイク完了までの待ち時間（ミリ秒）
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// クライアント設定
///
/// JS からは camelCase の JSON で渡される。`url` 以外は省略可能。
///
/// ```json
/// { "url": "wss://example.com/rpc", "defaultTimeoutMs": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub url: String,
    pub default_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub retry_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: String::new(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            retry_interval_ms: wirelane_adapter::DEFAULT_RETRY_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_depth: wirelane_stream::DEFAULT_MAX_DEPTH,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        ClientConfig { url: url.into(), ..Default::default() }
    }

    /// 設定値を検証する
    ///
    /// # エラー
    /// 空の URL、0 の間隔・タイムアウト・ネスト上限は Config エラー
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.url.is_empty() {
            return Err(errors::config_invalid("url is required"));
        }
        let intervals = [
            ("defaultTimeoutMs", self.default_timeout_ms),
            ("sweepIntervalMs", self.sweep_interval_ms),
            ("retryIntervalMs", self.retry_interval_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("maxDepth", self.max_depth as u64),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(errors::config_invalid(&alloc::format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirelane_error::Category;

    #[test]
    fn test_defaults_from_json() {
        let config: ClientConfig = serde_json::from_str(r#"{"url":"ws://h/rpc"}"#).unwrap();
        assert_eq!(config, ClientConfig::new("ws://h/rpc"));
        assert_eq!(config.default_timeout_ms, 8000);
        assert_eq!(config.sweep_interval_ms, 1000);
        assert_eq!(config.retry_interval_ms, 3000);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.max_depth, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_camel_case_fields() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"url":"wss://h","defaultTimeoutMs":250,"maxDepth":8}"#).unwrap();
        assert_eq!(config.default_timeout_ms, 250);
        assert_eq!(config.max_depth, 8);
    }

    #[test]
    fn test_validation() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert_eq!(err.category(), Some(Category::Config));

        let mut config = ClientConfig::new("ws://h");
        config.sweep_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.message().contains("sweepIntervalMs"));
    }
}
