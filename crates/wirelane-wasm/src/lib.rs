//! # wirelane-wasm
//!
//! wasm-bindgen エクスポート：ブラウザ / Node.js から呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { RpcClient, init_panic_hook, initLogging } from './wirelane-pkg/wirelane_wasm';
//!
//! // パニック時のスタックトレースを有効化（開発時）
//! init_panic_hook();
//! initLogging("debug");
//!
//! const client = new RpcClient(JSON.stringify({ url: "wss://example.com/rpc" }));
//! client.setErrorSink((frame, summary) => console.warn(summary));
//! client.open();
//!
//! // 定期タイマー（再接続・ハートビート・タイムアウト）
//! setInterval(() => client.tick(), 200);
//!
//! const user = await client.send(5000, "user.get", [42]);
//!
//! const sub = client.subscribe("chat", ".message", (msg) => render(msg));
//! sub.close();
//! ```

use serde_json::{json, Map as JsonMap};
use wasm_bindgen::prelude::*;
use wirelane_stream::Stream;

mod client;
mod connector;
mod convert;
mod logging;

pub use client::{JsSubscription, RpcClient};
pub use connector::WebSocketConnector;

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// tracing の出力をコンソールに向ける
///
/// # 引数
/// - `level`: `"error"` / `"warn"` / `"info"` / `"debug"` / `"trace"`。省略時は info
///
/// # エラー
/// - 未知のレベル名
/// - 2 回目以降の呼び出し
#[wasm_bindgen(js_name = "initLogging")]
pub fn init_logging(level: Option<String>) -> Result<(), JsError> {
    let level = logging::parse_level(level.as_deref()).map_err(|e| JsError::new(&e))?;
    logging::install(level).map_err(|e| JsError::new(&e))
}

/// フレームの中身を JSON 文字列にする（デバッグ用）
///
/// ヘッダーの検証に失敗した場合も `error` フィールド付きで返す。
#[wasm_bindgen(js_name = "describeFrame")]
pub fn describe_frame(bytes: &[u8]) -> String {
    describe(bytes).to_string()
}

fn describe(bytes: &[u8]) -> serde_json::Value {
    let mut stream = match Stream::from_bytes(bytes.to_vec()) {
        Ok(stream) => stream,
        Err(e) => return json!({ "length": bytes.len(), "error": e.to_string() }),
    };
    let mut out = JsonMap::new();
    out.insert("version".into(), json!(stream.version()));
    out.insert("kind".into(), json!(stream.kind() as u8));
    out.insert("kindName".into(), json!(stream.kind().name()));
    out.insert("callbackId".into(), json!(stream.callback_id()));
    out.insert("length".into(), json!(stream.len()));

    let mut values = Vec::new();
    while !stream.is_read_finish() {
        match stream.read_value() {
            Ok(value) => values.push(json!(value)),
            Err(e) => {
                out.insert("error".into(), json!(e.to_string()));
                break;
            }
        }
    }
    out.insert("values".into(), serde_json::Value::Array(values));
    serde_json::Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirelane_client::protocol;
    use wirelane_stream::{StreamKind, Value};

    #[test]
    fn test_describe_request() {
        let mut stream = protocol::rpc_request("user.get", "at app.ts:3", &[Value::from(7u64)], 64).unwrap();
        stream.build_check();
        let dump = describe(stream.as_bytes());
        assert_eq!(dump["kindName"], "rpc-request");
        assert_eq!(dump["kind"], StreamKind::RpcRequest as u8);
        assert_eq!(dump["values"][0], "user.get");
        assert_eq!(dump["values"][1], "at app.ts:3");
        assert_eq!(dump["values"][2], 7);
        assert!(dump.get("error").is_none());
    }

    #[test]
    fn test_describe_corrupted() {
        let stream = protocol::empty(StreamKind::Ping);
        let mut bytes = stream.into_bytes();
        bytes[20] ^= 0x01;
        let dump = describe(&bytes);
        assert!(dump["error"].is_string());
        assert_eq!(dump["length"], bytes.len());
    }

    #[test]
    fn test_describe_short_input() {
        let dump = describe(&[1, 2, 3]);
        assert!(dump["error"].is_string());
    }
}
