//! `web_sys::WebSocket` を使う Connector
//!
//! ソケットのイベントハンドラはクライアントへの弱参照を持ち、イベントごとに
//! `Client::handle_*` を呼ぶ。クライアントが借用中（同期的に発火した場合など）なら
//! `spawn_local` で次のマイクロタスクに回す。

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Weak;

use js_sys::{ArrayBuffer, Uint8Array};
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, CloseEvent, Event, MessageEvent, WebSocket};
use wirelane_adapter::{Connector, SocketId};
use wirelane_client::Client;

pub(crate) type WsClient = Client<WebSocketConnector>;

/// 1 本のソケットとイベントハンドラ
///
/// ハンドラは `forget()` せずここで保持し、ソケットを閉じるときに外してから破棄する。
struct Socket {
    ws: WebSocket,
    _onopen: Closure<dyn FnMut()>,
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(Event)>,
    _onclose: Closure<dyn FnMut(CloseEvent)>,
}

impl Socket {
    fn detach(&self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
    }
}

pub struct WebSocketConnector {
    owner: Weak<RefCell<WsClient>>,
    sockets: BTreeMap<SocketId, Socket>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        WebSocketConnector { owner: Weak::new(), sockets: BTreeMap::new() }
    }

    /// イベントの届け先を設定する（クライアント生成直後に一度だけ呼ぶ）
    pub(crate) fn set_owner(&mut self, owner: Weak<RefCell<WsClient>>) {
        self.owner = owner;
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for WebSocketConnector {
    fn dial(&mut self, url: &str, socket: SocketId) -> Result<(), String> {
        let ws = WebSocket::new(url).map_err(|e| describe_js(&e))?;
        ws.set_binary_type(BinaryType::Arraybuffer);

        let owner = self.owner.clone();
        let onopen = Closure::<dyn FnMut()>::new(move || {
            with_client(&owner, move |c| c.handle_open(socket, now_ms()));
        });

        let owner = self.owner.clone();
        let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |e: MessageEvent| {
            match e.data().dyn_into::<ArrayBuffer>() {
                Ok(buffer) => {
                    let bytes = Uint8Array::new(&buffer).to_vec();
                    with_client(&owner, move |c| c.handle_message(socket, bytes, now_ms()));
                }
                Err(_) => {
                    with_client(&owner, move |c| c.handle_error(socket, "text message on binary channel", now_ms()));
                }
            }
        });

        let owner = self.owner.clone();
        let onerror = Closure::<dyn FnMut(Event)>::new(move |_e: Event| {
            with_client(&owner, move |c| c.handle_error(socket, "websocket error", now_ms()));
        });

        let owner = self.owner.clone();
        let onclose = Closure::<dyn FnMut(CloseEvent)>::new(move |e: CloseEvent| {
            debug!(socket = socket.0, code = e.code(), reason = %e.reason(), "websocket closed");
            with_client(&owner, move |c| c.handle_close(socket, now_ms()));
        });

        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));

        self.sockets.insert(
            socket,
            Socket { ws, _onopen: onopen, _onmessage: onmessage, _onerror: onerror, _onclose: onclose },
        );
        Ok(())
    }

    fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), String> {
        let entry = self
            .sockets
            .get(&socket)
            .ok_or_else(|| format!("socket {} is not open", socket.0))?;
        entry.ws.send_with_u8_array(bytes).map_err(|e| describe_js(&e))
    }

    fn close(&mut self, socket: SocketId) {
        let Some(entry) = self.sockets.remove(&socket) else {
            return;
        };
        entry.detach();
        if let Err(e) = entry.ws.close() {
            warn!(socket = socket.0, error = %describe_js(&e), "websocket close failed");
        }
        // ハンドラを外したので close イベントは自分で届ける（アダプタは Closing → Closed に進む）
        with_client(&self.owner, move |c| c.handle_close(socket, now_ms()));
    }
}

impl Drop for WebSocketConnector {
    fn drop(&mut self) {
        // ハンドラを残したまま Closure を破棄すると JS 側から解放済み関数を呼ばれる
        for (_, entry) in std::mem::take(&mut self.sockets) {
            entry.detach();
            let _ = entry.ws.close();
        }
    }
}

/// クライアントを借用して `f` を実行する。借用中なら次のタスクに回す
///
/// 次のタスクでもまだ借用中なら、さらに後ろへ回す。クライアントが破棄済みなら何もしない。
pub(crate) fn with_client<F>(owner: &Weak<RefCell<WsClient>>, f: F)
where
    F: FnOnce(&mut WsClient) + 'static,
{
    let Some(shared) = owner.upgrade() else {
        return;
    };
    let borrowed = shared.try_borrow_mut();
    match borrowed {
        Ok(mut client) => f(&mut client),
        Err(_) => {
            debug!("client busy, deferring socket event");
            let owner = owner.clone();
            wasm_bindgen_futures::spawn_local(async move {
                with_client(&owner, f);
            });
        }
    };
}

pub(crate) fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

fn describe_js(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| value.dyn_ref::<js_sys::Error>().map(|e| String::from(e.message())))
        .unwrap_or_else(|| format!("{value:?}"))
}
