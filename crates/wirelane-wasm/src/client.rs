//! RpcClient wasm-bindgen エクスポート
//!
//! ブラウザ / Node.js から使うクライアントの主エントリポイント。
//! 実体は `Rc<RefCell<Client<WebSocketConnector>>>` で、ソケットのイベントハンドラは
//! 弱参照経由で同じクライアントを触る。

use std::rc::Rc;
use std::cell::RefCell;

use js_sys::{Array, Function, Promise, Reflect, Uint8Array};
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use wirelane_client::{protocol, Client, ClientConfig, SubscriptionHandle};
use wirelane_error::RpcError;
use wirelane_stream::{Stream, Value};

use crate::connector::{now_ms, WebSocketConnector, WsClient};
use crate::convert::{error_to_js, js_to_value, value_to_js};

/// 多重化 RPC クライアント
///
/// ## スレッド安全性
///
/// WASM はシングルスレッドのため `!Send + !Sync`。
/// JS から呼ばれたコールバック（購読ハンドラ・エラー通知）はクライアントの借用中に
/// 発火しうるので、すべて `spawn_local` で次のマイクロタスクに回してから呼ぶ。
#[wasm_bindgen]
pub struct RpcClient {
    inner: Rc<RefCell<WsClient>>,
}

#[wasm_bindgen]
impl RpcClient {
    /// クライアントを生成する（接続はまだ開かない）
    ///
    /// # 引数
    /// - `config_json`: camelCase の JSON。例: `{"url":"wss://example.com/rpc"}`
    ///
    /// # エラー
    /// - JSON として解釈できない
    /// - 設定値が不正（空の URL、0 の間隔など）
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<RpcClient, JsValue> {
        let config: ClientConfig = serde_json::from_str(config_json)
            .map_err(|e| JsValue::from(JsError::new(&format!("invalid config: {e}"))))?;
        let client = Client::new(config, WebSocketConnector::new()).map_err(|e| error_to_js(&e))?;
        let inner = Rc::new(RefCell::new(client));
        inner.borrow_mut().adapter_mut().connector_mut().set_owner(Rc::downgrade(&inner));
        Ok(RpcClient { inner })
    }

    /// 接続を開始する
    ///
    /// # 戻り値
    /// すでに開始済みなら false
    ///
    /// # エラー
    /// URL のスキームが ws / wss 以外
    pub fn open(&self) -> Result<bool, JsValue> {
        self.inner.borrow_mut().open(now_ms()).map_err(|e| error_to_js(&e))
    }

    /// 接続を閉じ、未完了の呼び出しをすべて reject する
    pub fn close(&self) -> bool {
        self.inner.borrow_mut().close()
    }

    /// RPC を送信する
    ///
    /// # 引数
    /// - `timeout_ms`: 省略時は設定の `defaultTimeoutMs`
    /// - `target`: 呼び出す RPC 名
    /// - `args`: 引数の配列
    ///
    /// # 戻り値
    /// 結果値で resolve、`code` 付きの Error で reject される Promise
    pub fn send(&self, timeout_ms: Option<f64>, target: &str, args: Array) -> Promise {
        let debug = caller_stack();
        let max_depth = self.inner.borrow().config().max_depth;
        let values = match convert_args(&args, max_depth) {
            Ok(values) => values,
            Err(e) => return Promise::reject(&error_to_js(&e.add_debug(&debug))),
        };
        let timeout_ms = timeout_ms.filter(|t| t.is_finite() && *t >= 0.0).map(|t| t as u64);
        let reply = self.inner.borrow_mut().send_with_debug(now_ms(), timeout_ms, target, &values, debug);
        future_to_promise(async move {
            match reply.await {
                Ok(value) => Ok(value_to_js(&value)),
                Err(e) => Err(error_to_js(&e)),
            }
        })
    }

    /// `target + event` のブロードキャストを購読する
    pub fn subscribe(&self, target: &str, event: &str, handler: Function) -> JsSubscription {
        let handle = self.inner.borrow_mut().subscribe(target, event, move |value: &Value| {
            let value = value_to_js(value);
            let handler = handler.clone();
            spawn_local(async move {
                if let Err(e) = handler.call1(&JsValue::NULL, &value) {
                    warn!(error = ?e, "subscription handler threw");
                }
            });
        });
        JsSubscription { handle }
    }

    /// エラー通知先を設定する（`null` で解除）
    ///
    /// 通知先は `(frame: Uint8Array, summary: string)` で呼ばれる。
    #[wasm_bindgen(js_name = "setErrorSink")]
    pub fn set_error_sink(&self, sink: Option<Function>) {
        let sink = sink.map(|f| -> wirelane_client::ErrorSink {
            Box::new(move |stream: &Stream| {
                let bytes = Uint8Array::from(stream.as_bytes());
                let summary = JsValue::from_str(&summarize(stream));
                let f = f.clone();
                spawn_local(async move {
                    if let Err(e) = f.call2(&JsValue::NULL, &bytes, &summary) {
                        warn!(error = ?e, "error sink threw");
                    }
                });
            })
        });
        self.inner.borrow_mut().set_error_sink(sink);
    }

    /// 定期処理（再接続・ハートビート・タイムアウト掃除）
    ///
    /// `setInterval` などから数百ミリ秒ごとに呼ぶ。
    pub fn tick(&self) {
        self.inner.borrow_mut().tick(now_ms());
    }

    #[wasm_bindgen(getter, js_name = "isReady")]
    pub fn is_ready(&self) -> bool {
        self.inner.borrow().is_ready()
    }

    /// 統計情報を JSON 文字列で返す
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.inner.borrow().stats()).map_err(|e| JsError::new(&e.to_string()))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Ok(mut client) = self.inner.try_borrow_mut() {
            client.close();
        }
    }
}

/// 購読ハンドル
#[wasm_bindgen(js_name = "SubscriptionHandle")]
pub struct JsSubscription {
    handle: SubscriptionHandle,
}

#[wasm_bindgen(js_class = "SubscriptionHandle")]
impl JsSubscription {
    /// 購読を解除する（2 回目以降は false）
    pub fn close(&self) -> bool {
        self.handle.close()
    }

    #[wasm_bindgen(getter)]
    pub fn path(&self) -> String {
        self.handle.path().to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn closed(&self) -> bool {
        self.handle.is_closed()
    }
}

fn convert_args(args: &Array, max_depth: usize) -> Result<Vec<Value>, RpcError> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| js_to_value(&arg, max_depth).map_err(|e| e.add_debug(&format!("argument {i}"))))
        .collect()
}

/// JS 側の呼び出し元スタック（先頭の "Error" 行を除く）
fn caller_stack() -> String {
    let stack = Reflect::get(&js_sys::Error::new(""), &JsValue::from_str("stack"))
        .ok()
        .and_then(|s| s.as_string())
        .unwrap_or_default();
    let lines: Vec<&str> = stack
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "Error")
        .collect();
    if lines.is_empty() {
        "at <unknown>".to_string()
    } else {
        lines.join("\n")
    }
}

/// エラー通知用の 1 行要約
fn summarize(stream: &Stream) -> String {
    let mut copy = stream.clone();
    copy.rewind();
    match protocol::parse_error(&mut copy) {
        Ok(e) => format!("{}: {e}", stream.kind().name()),
        Err(_) => stream.kind().name().to_string(),
    }
}
