//! 接続アダプタの状態機械

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use tracing::{debug, info, warn};
use wirelane_error::{errors, RpcError};
use wirelane_stream::Stream;

use crate::error::AdapterError;
use crate::SUPPORTED_SCHEMES;

/// ソケットの世代番号
///
/// 再接続のたびに新しい値を払い出す。イベントに付いている ID が現在のソケットと
/// 一致しない場合、そのイベントは捨てられる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

/// ソケット操作の抽象
///
/// ブラウザでは `web_sys::WebSocket`、テストでは記録用のモックが実装する。
/// 結果（open / message / error / close）は非同期に `Adapter::handle_*` へ届ける。
pub trait Connector {
    /// `url` への接続を開始する
    ///
    /// # エラー
    /// 同期的に接続を開始できなかった場合は理由を返す（再接続の対象になる）
    fn dial(&mut self, url: &str, socket: SocketId) -> Result<(), String>;

    /// 接続済みソケットにバイト列を書き込む
    fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), String>;

    /// ソケットを閉じる（以降そのソケットのイベントは無視される）
    fn close(&mut self, socket: SocketId);
}

/// アダプタの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// `open()` 前
    Idle,
    /// 接続中、または再接続待ち
    Opening,
    /// 接続済み
    Opened,
    /// `close()` 済み、ソケットのクローズ待ち
    Closing,
    /// 終端
    Closed,
}

/// 上位レイヤーへ渡すイベント
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// ソケットが開いた
    Connected,
    /// 検証済みのフレームを受信した
    Frame(Stream),
    /// 接続レベルのエラー（dial 失敗、ソケットエラー、壊れたフレーム）
    Error(RpcError),
    /// 接続済みだったソケットが失われた
    Disconnected,
}

/// 接続アダプタ
pub struct Adapter<C: Connector> {
    url: String,
    retry_interval_ms: u64,
    connector: C,
    state: AdapterState,
    /// 現在のソケット（dial 済みで閉じていないもの）
    socket: Option<SocketId>,
    next_socket: u64,
    /// 次に再接続を試みる時刻
    redial_at_ms: Option<u64>,
    /// 最後に何かを受信した時刻（dial 時にも更新する）
    last_recv_ms: u64,
    /// 2 回目以降の dial 回数
    reconnects: u64,
    events: VecDeque<AdapterEvent>,
}

impl<C: Connector> Adapter<C> {
    /// 新しいアダプタを生成する（まだ接続しない）
    ///
    /// # 引数
    /// - `url`: 接続先（`ws://` または `wss://`）
    /// - `retry_interval_ms`: 再接続を試みる間隔
    /// - `connector`: ソケット操作の実装
    pub fn new(url: impl Into<String>, retry_interval_ms: u64, connector: C) -> Self {
        Adapter {
            url: url.into(),
            retry_interval_ms,
            connector,
            state: AdapterState::Idle,
            socket: None,
            next_socket: 1,
            redial_at_ms: None,
            last_recv_ms: 0,
            reconnects: 0,
            events: VecDeque::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == AdapterState::Opened
    }

    /// 現在のソケット ID（dial 中も含む）
    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn last_recv_ms(&self) -> u64 {
        self.last_recv_ms
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// 接続を開始する
    ///
    /// # 戻り値
    /// - `Ok(true)`: dial を開始した（dial の同期失敗も再接続対象として `Ok(true)`）
    /// - `Ok(false)`: `Idle` 以外の状態だったので何もしなかった
    ///
    /// # エラー
    /// URL のスキームが ws / wss 以外なら `UnsupportedScheme`（状態は `Idle` のまま）
    pub fn open(&mut self, now_ms: u64) -> Result<bool, AdapterError> {
        if self.state != AdapterState::Idle {
            return Ok(false);
        }
        if !has_supported_scheme(&self.url) {
            warn!(url = %self.url, "unsupported scheme");
            return Err(AdapterError::UnsupportedScheme(self.url.clone()));
        }
        self.state = AdapterState::Opening;
        self.dial(now_ms);
        Ok(true)
    }

    /// 接続を閉じる。以降は再接続しない
    ///
    /// # 戻り値
    /// すでに `Closing` / `Closed` なら `false`
    pub fn close(&mut self) -> bool {
        match self.state {
            AdapterState::Closing | AdapterState::Closed => return false,
            AdapterState::Opened => self.events.push_back(AdapterEvent::Disconnected),
            AdapterState::Idle | AdapterState::Opening => {}
        }
        self.redial_at_ms = None;
        match self.socket {
            Some(id) => {
                info!(socket = id.0, "closing connection");
                self.state = AdapterState::Closing;
                self.connector.close(id);
            }
            None => self.state = AdapterState::Closed,
        }
        true
    }

    /// 現在のソケットを捨て、`retry_interval_ms` 後に再接続する
    ///
    /// ハートビートの途絶や壊れたフレームの受信時に使う。
    /// `Opening` / `Opened` 以外では何もしない。
    pub fn drop_connection(&mut self, now_ms: u64) {
        if !matches!(self.state, AdapterState::Opening | AdapterState::Opened) {
            return;
        }
        if self.state == AdapterState::Opened {
            self.events.push_back(AdapterEvent::Disconnected);
        }
        if let Some(id) = self.socket.take() {
            warn!(socket = id.0, "dropping connection");
            self.connector.close(id);
        }
        self.state = AdapterState::Opening;
        self.schedule_redial(now_ms);
    }

    /// 定期処理: 再接続時刻を過ぎていれば dial する
    pub fn tick(&mut self, now_ms: u64) {
        if self.state != AdapterState::Opening || self.socket.is_some() {
            return;
        }
        if let Some(at) = self.redial_at_ms {
            if now_ms >= at {
                self.reconnects += 1;
                self.dial(now_ms);
            }
        }
    }

    /// 次に `tick()` で再接続を試みる時刻
    pub fn redial_at_ms(&self) -> Option<u64> {
        self.redial_at_ms
    }

    /// 最後の受信から `timeout_ms` 以内か
    pub fn is_active(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_recv_ms) <= timeout_ms
    }

    /// フレームを送信する
    ///
    /// # エラー
    /// - `NotOpen`: `Opened` 以外の状態
    /// - `Send`: Connector が書き込みに失敗した
    pub fn send(&mut self, stream: &Stream) -> Result<(), AdapterError> {
        let id = match (self.state, self.socket) {
            (AdapterState::Opened, Some(id)) => id,
            _ => return Err(AdapterError::NotOpen),
        };
        self.connector
            .send(id, stream.as_bytes())
            .map_err(AdapterError::Send)
    }

    /// キューに溜まったイベントを 1 つ取り出す
    pub fn poll_event(&mut self) -> Option<AdapterEvent> {
        self.events.pop_front()
    }

    /// キューに溜まったイベントをすべて取り出す
    pub fn drain_events(&mut self) -> Vec<AdapterEvent> {
        self.events.drain(..).collect()
    }

    // ===== ソケットイベント =====

    /// ソケットが開いた
    pub fn handle_open(&mut self, socket: SocketId, now_ms: u64) {
        if !self.is_current(socket) || self.state != AdapterState::Opening {
            return;
        }
        info!(socket = socket.0, url = %self.url, "connection opened");
        self.state = AdapterState::Opened;
        self.last_recv_ms = now_ms;
        self.redial_at_ms = None;
        self.events.push_back(AdapterEvent::Connected);
    }

    /// バイナリメッセージを受信した
    ///
    /// フレームとして検証できなければエラーイベントを積み、接続を張り直す。
    pub fn handle_message(&mut self, socket: SocketId, bytes: Vec<u8>, now_ms: u64) {
        if !self.is_current(socket) || self.state != AdapterState::Opened {
            return;
        }
        self.last_recv_ms = now_ms;
        match Stream::from_bytes(bytes) {
            Ok(stream) => self.events.push_back(AdapterEvent::Frame(stream)),
            Err(e) => {
                warn!(socket = socket.0, error = %e, "discarding corrupted frame");
                self.events.push_back(AdapterEvent::Error(e.into()));
                self.drop_connection(now_ms);
            }
        }
    }

    /// ソケットエラー（ブラウザでは直後に close が届く）
    pub fn handle_error(&mut self, socket: SocketId, detail: &str) {
        if !self.is_current(socket) {
            return;
        }
        warn!(socket = socket.0, detail, "socket error");
        self.events.push_back(AdapterEvent::Error(errors::socket_error(detail)));
    }

    /// ソケットが閉じた
    pub fn handle_close(&mut self, socket: SocketId, now_ms: u64) {
        if !self.is_current(socket) {
            return;
        }
        self.socket = None;
        match self.state {
            AdapterState::Closing => {
                debug!(socket = socket.0, "connection closed");
                self.state = AdapterState::Closed;
            }
            AdapterState::Opened | AdapterState::Opening => {
                if self.state == AdapterState::Opened {
                    self.events.push_back(AdapterEvent::Disconnected);
                }
                info!(socket = socket.0, retry_in_ms = self.retry_interval_ms, "connection lost");
                self.state = AdapterState::Opening;
                self.schedule_redial(now_ms);
            }
            AdapterState::Idle | AdapterState::Closed => {}
        }
    }

    fn is_current(&self, socket: SocketId) -> bool {
        self.socket == Some(socket)
    }

    fn dial(&mut self, now_ms: u64) {
        let id = SocketId(self.next_socket);
        self.next_socket += 1;
        self.last_recv_ms = now_ms;
        self.redial_at_ms = None;
        debug!(socket = id.0, url = %self.url, "dialing");
        match self.connector.dial(&self.url, id) {
            Ok(()) => self.socket = Some(id),
            Err(detail) => {
                warn!(socket = id.0, detail = %detail, "dial failed");
                self.events
                    .push_back(AdapterEvent::Error(errors::dial_failed(&detail)));
                self.schedule_redial(now_ms);
            }
        }
    }

    fn schedule_redial(&mut self, now_ms: u64) {
        self.redial_at_ms = Some(now_ms.saturating_add(self.retry_interval_ms));
    }
}

/// URL のスキームが ws / wss か（大文字小文字は区別しない）
pub fn has_supported_scheme(url: &str) -> bool {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            !rest.is_empty()
                && SUPPORTED_SCHEMES
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(scheme))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;
    use wirelane_error::Category;
    use wirelane_stream::StreamKind;

    /// 呼び出しを記録するだけの Connector
    #[derive(Default)]
    struct Recorder {
        dials: Vec<SocketId>,
        sent: Vec<(SocketId, Vec<u8>)>,
        closed: Vec<SocketId>,
        fail_dials: usize,
    }

    impl Connector for Recorder {
        fn dial(&mut self, _url: &str, socket: SocketId) -> Result<(), String> {
            if self.fail_dials > 0 {
                self.fail_dials -= 1;
                return Err("refused".to_string());
            }
            self.dials.push(socket);
            Ok(())
        }

        fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), String> {
            self.sent.push((socket, bytes.to_vec()));
            Ok(())
        }

        fn close(&mut self, socket: SocketId) {
            self.closed.push(socket);
        }
    }

    fn adapter() -> Adapter<Recorder> {
        Adapter::new("ws://localhost:9000/rpc", 3000, Recorder::default())
    }

    fn ping_bytes() -> Vec<u8> {
        let mut s = Stream::new(StreamKind::Ping);
        s.build_check();
        s.into_bytes()
    }

    #[test]
    fn test_scheme_validation() {
        assert!(has_supported_scheme("ws://a"));
        assert!(has_supported_scheme("WSS://a/b"));
        assert!(!has_supported_scheme("http://a"));
        assert!(!has_supported_scheme("ws://"));
        assert!(!has_supported_scheme("localhost:9000"));

        let mut a = Adapter::new("http://example.com", 3000, Recorder::default());
        assert_eq!(
            a.open(0),
            Err(AdapterError::UnsupportedScheme("http://example.com".to_string()))
        );
        assert_eq!(a.state(), AdapterState::Idle);
        assert!(a.connector().dials.is_empty(), "dial してはいけない");
    }

    #[test]
    fn test_open_then_connected() {
        let mut a = adapter();
        assert_eq!(a.open(0), Ok(true));
        assert_eq!(a.open(0), Ok(false), "2 回目の open は何もしない");
        assert_eq!(a.state(), AdapterState::Opening);

        let id = a.socket().unwrap();
        a.handle_open(id, 10);
        assert!(a.is_open());
        assert_eq!(a.drain_events(), vec![AdapterEvent::Connected]);
    }

    #[test]
    fn test_frames_are_validated() {
        let mut a = adapter();
        a.open(0).unwrap();
        let id = a.socket().unwrap();
        a.handle_open(id, 0);
        a.drain_events();

        a.handle_message(id, ping_bytes(), 5);
        match a.poll_event() {
            Some(AdapterEvent::Frame(s)) => assert_eq!(s.kind(), StreamKind::Ping),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.last_recv_ms(), 5);

        let mut corrupted = ping_bytes();
        corrupted[20] ^= 1;
        a.handle_message(id, corrupted, 6);
        match a.poll_event() {
            Some(AdapterEvent::Error(e)) => assert_eq!(e.category(), Some(Category::Security)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.poll_event(), Some(AdapterEvent::Disconnected));
        assert_eq!(a.state(), AdapterState::Opening);
        assert_eq!(a.connector().closed, vec![id]);
    }

    #[test]
    fn test_stale_socket_events_ignored() {
        let mut a = adapter();
        a.open(0).unwrap();
        let first = a.socket().unwrap();
        a.handle_open(first, 0);
        a.drop_connection(100);
        a.drain_events();

        a.tick(3100);
        let second = a.socket().unwrap();
        assert_ne!(first, second);

        a.handle_open(first, 3101);
        a.handle_message(first, ping_bytes(), 3102);
        a.handle_error(first, "late");
        a.handle_close(first, 3103);
        assert!(a.drain_events().is_empty(), "古いソケットのイベントは捨てる");
        assert_eq!(a.state(), AdapterState::Opening);

        a.handle_open(second, 3104);
        assert!(a.is_open());
    }

    #[test]
    fn test_redial_on_fixed_interval() {
        let mut a = adapter();
        a.connector_mut().fail_dials = 2;
        a.open(0).unwrap();
        assert!(matches!(a.poll_event(), Some(AdapterEvent::Error(_))));
        assert_eq!(a.socket(), None);
        assert_eq!(a.redial_at_ms(), Some(3000));

        a.tick(2999);
        assert!(a.drain_events().is_empty());
        a.tick(3000);
        assert!(matches!(a.poll_event(), Some(AdapterEvent::Error(_))));
        assert_eq!(a.redial_at_ms(), Some(6000));

        a.tick(6000);
        assert!(a.socket().is_some());
        assert_eq!(a.reconnects(), 2);
    }

    #[test]
    fn test_close_while_opened() {
        let mut a = adapter();
        a.open(0).unwrap();
        let id = a.socket().unwrap();
        a.handle_open(id, 0);
        a.drain_events();

        assert!(a.close());
        assert!(!a.close());
        assert_eq!(a.state(), AdapterState::Closing);
        assert_eq!(a.drain_events(), vec![AdapterEvent::Disconnected]);

        a.handle_close(id, 50);
        assert_eq!(a.state(), AdapterState::Closed);
        a.tick(100_000);
        assert_eq!(a.connector().dials.len(), 1, "Closed からは再接続しない");
    }

    #[test]
    fn test_close_before_open() {
        let mut a = adapter();
        assert!(a.close());
        assert_eq!(a.state(), AdapterState::Closed);
        assert_eq!(a.open(0), Ok(false));
    }

    #[test]
    fn test_unexpected_close_schedules_redial() {
        let mut a = adapter();
        a.open(0).unwrap();
        let id = a.socket().unwrap();
        a.handle_open(id, 0);
        a.drain_events();

        a.handle_error(id, "reset");
        a.handle_close(id, 500);
        let events = a.drain_events();
        assert!(matches!(events[0], AdapterEvent::Error(_)));
        assert_eq!(events[1], AdapterEvent::Disconnected);
        assert_eq!(a.redial_at_ms(), Some(3500));
    }

    #[test]
    fn test_send_requires_open() {
        let mut a = adapter();
        let mut s = Stream::new(StreamKind::Ping);
        s.build_check();
        assert_eq!(a.send(&s), Err(AdapterError::NotOpen));

        a.open(0).unwrap();
        assert_eq!(a.send(&s), Err(AdapterError::NotOpen));
        let id = a.socket().unwrap();
        a.handle_open(id, 0);
        assert_eq!(a.send(&s), Ok(()));
        assert_eq!(a.connector().sent.len(), 1);
    }

    #[test]
    fn test_is_active() {
        let mut a = adapter();
        a.open(1000).unwrap();
        let id = a.socket().unwrap();
        a.handle_open(id, 1000);
        assert!(a.is_active(1500, 500));
        assert!(!a.is_active(1501, 500));
    }
}
