//! クライアントランタイム
//!
//! ハンドシェイク、チャネルへの割り当て、送信前キュー、ハートビート、
//! タイムアウト掃除、ブロードキャスト配信をまとめて扱う。
//!
//! すべての状態変更はソケットイベント（`handle_*`）と `tick()` の中で起きる。
//! 呼び出し側は単一スレッドのイベントループから順に呼ぶこと。

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use serde::Serialize;
use tracing::{debug, info, warn};
use wirelane_adapter::{Adapter, AdapterEvent, AdapterState, Connector, SocketId};
use wirelane_error::{errors, RpcError};
use wirelane_stream::{Stream, StreamKind, Value};

use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::operation::PendingOperation;
use crate::protocol::{self, SessionConfig};
use crate::reply::{reply_pair, ReplyFuture};
use crate::subscription::{self, topic_path, Handler, SubscriptionHandle, SubscriptionTable};

/// エラー通知先。タイムアウトは rpc-response-error、接続レベルのエラーは
/// system-error-report フレームとして渡される
pub type ErrorSink = Box<dyn FnMut(&Stream)>;

/// `getStats()` 用の統計情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    pub queued: usize,
    pub busy_channels: usize,
    pub channel_count: usize,
    pub session_established: bool,
    pub sent_frames: u64,
    pub received_frames: u64,
    pub timeouts: u64,
    pub replayed: u64,
    pub reconnects: u64,
}

pub struct Client<C: Connector> {
    config: ClientConfig,
    adapter: Adapter<C>,
    /// 最後に合意したセッション（再接続をまたいで保持する）
    session: Option<SessionConfig>,
    /// 現在の接続でハンドシェイクが完了しているか
    handshaken: bool,
    channels: Vec<Channel>,
    queue: VecDeque<PendingOperation>,
    subscriptions: Rc<RefCell<SubscriptionTable>>,
    error_sink: Option<ErrorSink>,
    last_ping_ms: u64,
    last_sweep_ms: u64,
    closed: bool,
    stats: ClientStats,
}

impl<C: Connector> Client<C> {
    /// 設定を検証してクライアントを作る（まだ接続しない）
    ///
    /// # エラー
    /// 設定が不正なら Config エラー
    pub fn new(config: ClientConfig, connector: C) -> Result<Self, RpcError> {
        config.validate()?;
        let adapter = Adapter::new(config.url.clone(), config.retry_interval_ms, connector);
        Ok(Client {
            config,
            adapter,
            session: None,
            handshaken: false,
            channels: Vec::new(),
            queue: VecDeque::new(),
            subscriptions: Rc::new(RefCell::new(SubscriptionTable::default())),
            error_sink: None,
            last_ping_ms: 0,
            last_sweep_ms: 0,
            closed: false,
            stats: ClientStats::default(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Adapter<C> {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut Adapter<C> {
        &mut self.adapter
    }

    pub fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }

    /// ハンドシェイクが済んで送信できる状態か
    pub fn is_ready(&self) -> bool {
        self.handshaken && self.adapter.is_open()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 接続を開始する
    ///
    /// # 戻り値
    /// すでに開始済みなら `Ok(false)`
    ///
    /// # エラー
    /// URL のスキームが ws / wss 以外なら Net エラー
    pub fn open(&mut self, now_ms: u64) -> Result<bool, RpcError> {
        self.last_sweep_ms = now_ms;
        let started = self.adapter.open(now_ms)?;
        self.pump(now_ms);
        Ok(started)
    }

    /// クライアントを閉じる
    ///
    /// 送信前キューとチャネル上の操作はすべて `client closed` で reject される。
    ///
    /// # 戻り値
    /// すでに閉じていれば false
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.handshaken = false;
        self.adapter.close();
        // 溜まったイベントは閉じた後には意味がない
        self.adapter.drain_events();

        let mut rejected = 0usize;
        while let Some(op) = self.queue.pop_front() {
            op.reject(errors::client_closed());
            rejected += 1;
        }
        for channel in &mut self.channels {
            if let Some((op, _)) = channel.take() {
                op.reject(errors::client_closed());
                rejected += 1;
            }
        }
        info!(rejected, "client closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// エラー通知先を設定する（`None` で解除）
    pub fn set_error_sink(&mut self, sink: Option<ErrorSink>) {
        self.error_sink = sink;
    }

    // ===== 送信 =====

    /// RPC を送信する
    ///
    /// 呼び出し位置を `from` とデバッグ情報に使う。
    ///
    /// # 引数
    /// - `now_ms`: 現在時刻（タイムアウトの起点）
    /// - `timeout_ms`: `None` なら設定のデフォルト
    /// - `target`: 呼び出す RPC 名
    /// - `args`: 引数
    #[track_caller]
    pub fn send(&mut self, now_ms: u64, timeout_ms: Option<u64>, target: &str, args: &[Value]) -> ReplyFuture {
        let location = core::panic::Location::caller();
        let debug = format!("at {}:{}:{}", location.file(), location.line(), location.column());
        self.send_with_debug(now_ms, timeout_ms, target, args, debug)
    }

    /// 呼び出し位置を明示して RPC を送信する（JS のスタックを渡す場合など）
    pub fn send_with_debug(
        &mut self,
        now_ms: u64,
        timeout_ms: Option<u64>,
        target: &str,
        args: &[Value],
        debug: String,
    ) -> ReplyFuture {
        if self.closed {
            return ReplyFuture::ready(Err(errors::client_closed().add_debug(&debug)));
        }
        let stream = match protocol::rpc_request(target, first_line(&debug), args, self.config.max_depth) {
            Ok(stream) => stream,
            Err(e) => {
                let err = RpcError::from(e).add_debug(&format!("target: {target}"));
                return ReplyFuture::ready(Err(err.add_debug(&debug)));
            }
        };
        let (completer, future) = reply_pair();
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let op = PendingOperation::new(completer, stream, now_ms, timeout_ms, target.into(), debug);
        self.queue.push_back(op);
        self.dispatch(now_ms);
        future
    }

    /// 送信前キューの先頭を空いたチャネルへ順に割り当てる
    ///
    /// ハンドシェイク前は何もしない。空きチャネルの数だけ回って終わる。
    fn dispatch(&mut self, now_ms: u64) {
        if !self.is_ready() {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let channel_count = session.channel_count;
        let transfer_limit = session.transfer_limit;

        while !self.queue.is_empty() {
            let Some(index) = self.channels.iter().position(Channel::is_idle) else {
                break;
            };
            let Some(op) = self.queue.pop_front() else {
                break;
            };
            if op.is_expired(now_ms) {
                self.expire(op, 0);
                continue;
            }
            let len = op.stream.len();
            if len as u64 > transfer_limit {
                warn!(rpc = %op.target, len, transfer_limit, "frame exceeds transfer limit");
                op.reject(errors::transfer_limit(len, transfer_limit));
                continue;
            }
            let channel = &mut self.channels[index];
            let callback_id = channel.assign(op, channel_count, now_ms);
            debug!(channel = index, callback_id, "dispatched");
            if let Some(stream) = channel.stream() {
                // 送れなかった場合もチャネルに残し、再接続時の再送かタイムアウトに任せる
                match self.adapter.send(stream) {
                    Ok(()) => self.stats.sent_frames += 1,
                    Err(e) => warn!(callback_id, error = %e, "send failed"),
                }
            }
        }
    }

    // ===== 購読 =====

    /// `target + event` のブロードキャストを購読する
    pub fn subscribe(&mut self, target: &str, event: &str, handler: impl Fn(&Value) + 'static) -> SubscriptionHandle {
        let handler: Handler = Rc::new(handler);
        let path = topic_path(target, event);
        let id = self.subscriptions.borrow_mut().add(path.clone(), handler);
        SubscriptionHandle::new(&self.subscriptions, path, id)
    }

    /// 購読を解除する（`handle.close()` と同じ）
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> bool {
        handle.close()
    }

    pub fn subscriptions(&self) -> &Rc<RefCell<SubscriptionTable>> {
        &self.subscriptions
    }

    // ===== ソケットイベント =====

    pub fn handle_open(&mut self, socket: SocketId, now_ms: u64) {
        self.adapter.handle_open(socket, now_ms);
        self.pump(now_ms);
    }

    pub fn handle_message(&mut self, socket: SocketId, bytes: Vec<u8>, now_ms: u64) {
        self.adapter.handle_message(socket, bytes, now_ms);
        self.pump(now_ms);
    }

    pub fn handle_error(&mut self, socket: SocketId, detail: &str, now_ms: u64) {
        self.adapter.handle_error(socket, detail);
        self.pump(now_ms);
    }

    pub fn handle_close(&mut self, socket: SocketId, now_ms: u64) {
        self.adapter.handle_close(socket, now_ms);
        self.pump(now_ms);
    }

    /// 定期処理: 再接続、ハートビート、タイムアウト掃除
    pub fn tick(&mut self, now_ms: u64) {
        if self.closed {
            return;
        }
        self.adapter.tick(now_ms);
        self.pump(now_ms);
        self.heartbeat(now_ms);
        self.pump(now_ms);
        if now_ms.saturating_sub(self.last_sweep_ms) >= self.config.sweep_interval_ms {
            self.last_sweep_ms = now_ms;
            self.sweep(now_ms);
        }
    }

    /// 統計情報
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            queued: self.queue.len(),
            busy_channels: self.channels.iter().filter(|c| !c.is_idle()).count(),
            channel_count: self.channels.len(),
            session_established: self.is_ready(),
            reconnects: self.adapter.reconnects(),
            ..self.stats.clone()
        }
    }

    // ===== 内部処理 =====

    /// アダプタに溜まったイベントを処理する
    fn pump(&mut self, now_ms: u64) {
        while let Some(event) = self.adapter.poll_event() {
            match event {
                AdapterEvent::Connected => self.on_connected(now_ms),
                AdapterEvent::Frame(stream) => self.on_frame(stream, now_ms),
                AdapterEvent::Error(e) => self.report(StreamKind::SystemErrorReport, 0, &e),
                AdapterEvent::Disconnected => {
                    debug!(busy = self.busy_count(), queued = self.queue.len(), "disconnected");
                    self.handshaken = false;
                }
            }
        }
    }

    fn on_connected(&mut self, now_ms: u64) {
        let known = self.session.as_ref().map_or("", |s| s.session.as_str());
        info!(session = known, "sending connect request");
        self.handshaken = false;
        self.last_ping_ms = now_ms;
        let sent = protocol::connect_request(known)
            .map_err(RpcError::from)
            .and_then(|stream| self.adapter.send(&stream).map_err(RpcError::from));
        match sent {
            Ok(()) => self.stats.sent_frames += 1,
            Err(e) => warn!(error = %e, "connect request failed"),
        }
    }

    fn on_frame(&mut self, mut stream: Stream, now_ms: u64) {
        self.stats.received_frames += 1;
        match stream.kind() {
            StreamKind::ConnectResponse => self.on_connect_response(&mut stream, now_ms),
            StreamKind::Ping => {
                if self.adapter.send(&protocol::empty(StreamKind::Pong)).is_ok() {
                    self.stats.sent_frames += 1;
                }
            }
            StreamKind::Pong => {}
            StreamKind::RpcResponseOk | StreamKind::RpcResponseError => self.on_response(stream, now_ms),
            StreamKind::Broadcast => self.on_broadcast(&mut stream, now_ms),
            StreamKind::SystemErrorReport => {
                warn!("system error report from server");
                stream.rewind();
                if let Some(sink) = self.error_sink.as_mut() {
                    sink(&stream);
                }
            }
            kind @ (StreamKind::ConnectRequest | StreamKind::RpcRequest) => {
                let err = errors::unexpected_frame(&format!("client received {}", kind.name()));
                self.report(StreamKind::SystemErrorReport, stream.callback_id(), &err);
            }
        }
    }

    fn on_connect_response(&mut self, stream: &mut Stream, now_ms: u64) {
        // 同じ接続での 2 度目の応答で再送すると、処理中の操作を二重に届けてしまう
        if self.handshaken {
            warn!("duplicate connect response ignored");
            let err = errors::unexpected_frame("connect-response after handshake");
            self.report(StreamKind::SystemErrorReport, 0, &err);
            return;
        }
        let config = match protocol::parse_connect_response(stream) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "invalid handshake");
                self.report(StreamKind::SystemErrorReport, 0, &e);
                self.adapter.drop_connection(now_ms);
                return;
            }
        };

        let unchanged = self.session.as_ref().is_some_and(|s| s.session == config.session);
        if unchanged {
            self.replay();
        } else {
            self.start_session(config);
        }
        self.handshaken = true;
        self.last_ping_ms = now_ms;
        self.dispatch(now_ms);
    }

    /// 同じセッションへの再接続: 処理中のフレームをそのまま送り直す
    fn replay(&mut self) {
        let mut replayed = 0u64;
        for channel in &self.channels {
            if let Some(stream) = channel.stream() {
                match self.adapter.send(stream) {
                    Ok(()) => replayed += 1,
                    Err(e) => warn!(channel = channel.index(), error = %e, "replay failed"),
                }
            }
        }
        info!(replayed, "session resumed");
        self.stats.replayed += replayed;
        self.stats.sent_frames += replayed;
    }

    /// 新しいセッション: 処理中の操作を callback ID 順に送信前キューの先頭へ戻す
    fn start_session(&mut self, config: SessionConfig) {
        let mut in_flight: Vec<(u64, PendingOperation)> = self
            .channels
            .iter_mut()
            .filter_map(|c| c.take().map(|(op, callback_id)| (callback_id, op)))
            .collect();
        in_flight.sort_by_key(|(callback_id, _)| *callback_id);
        let requeued = in_flight.len();
        for (_, op) in in_flight.into_iter().rev() {
            self.queue.push_front(op);
        }

        info!(
            session = %config.session,
            channels = config.channel_count,
            transfer_limit = config.transfer_limit,
            requeued,
            "session established"
        );
        self.channels = (0..config.channel_count).map(Channel::new).collect();
        self.session = Some(config);
    }

    fn on_response(&mut self, mut stream: Stream, now_ms: u64) {
        if self.channels.is_empty() {
            debug!("response before handshake, dropped");
            return;
        }
        let callback_id = stream.callback_id();
        let index = (callback_id % self.channels.len() as u64) as usize;
        let Some(op) = self.channels[index].take_if(callback_id) else {
            debug!(callback_id, "stale response dropped");
            return;
        };

        if stream.kind() == StreamKind::RpcResponseOk {
            match protocol::parse_ok(&mut stream) {
                Ok(value) => op.resolve(value),
                Err(e) => op.reject(RpcError::from(e)),
            }
        } else {
            match protocol::parse_error(&mut stream) {
                Ok(remote) => op.reject(remote),
                Err(e) => op.reject(RpcError::from(e)),
            }
        }
        self.dispatch(now_ms);
    }

    fn on_broadcast(&mut self, stream: &mut Stream, now_ms: u64) {
        match protocol::parse_broadcast(stream) {
            Ok((path, value)) => {
                let delivered = subscription::deliver(&self.subscriptions, &path, &value);
                debug!(path = %path, delivered, "broadcast");
            }
            Err(e) => {
                warn!(error = %e, "malformed broadcast");
                self.report(StreamKind::SystemErrorReport, 0, &RpcError::from(e));
                self.adapter.drop_connection(now_ms);
            }
        }
    }

    /// ハートビート送信と、無通信の接続の切断
    ///
    /// ハンドシェイク前は `connect_timeout_ms` を無通信の上限とする。
    fn heartbeat(&mut self, now_ms: u64) {
        let has_socket = self.adapter.socket().is_some();
        let timeout_ms = match (&self.session, self.handshaken) {
            (Some(session), true) => {
                if now_ms.saturating_sub(self.last_ping_ms) >= session.heartbeat_interval_ms {
                    self.last_ping_ms = now_ms;
                    if self.adapter.send(&protocol::empty(StreamKind::Ping)).is_ok() {
                        self.stats.sent_frames += 1;
                    }
                }
                session.heartbeat_timeout_ms
            }
            _ => self.config.connect_timeout_ms,
        };
        let watching = matches!(self.adapter.state(), AdapterState::Opening | AdapterState::Opened) && has_socket;
        if watching && !self.adapter.is_active(now_ms, timeout_ms) {
            let silent_ms = now_ms.saturating_sub(self.adapter.last_recv_ms());
            warn!(silent_ms, timeout_ms, "connection is silent, dropping");
            self.report(StreamKind::SystemErrorReport, 0, &errors::heartbeat_lost(silent_ms));
            self.handshaken = false;
            self.adapter.drop_connection(now_ms);
        }
    }

    /// 期限切れの操作を集めて reject する
    fn sweep(&mut self, now_ms: u64) {
        let mut expired = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.queue.len());
        while let Some(op) = self.queue.pop_front() {
            if op.is_expired(now_ms) {
                expired.push((op, 0));
            } else {
                remaining.push_back(op);
            }
        }
        self.queue = remaining;

        for channel in &mut self.channels {
            if channel.is_expired(now_ms) {
                if let Some((op, callback_id)) = channel.take() {
                    expired.push((op, callback_id));
                }
            }
        }
        if expired.is_empty() {
            return;
        }
        for (op, callback_id) in expired {
            self.expire(op, callback_id);
        }
        self.dispatch(now_ms);
    }

    /// タイムアウトで reject し、エラー通知先にも一度だけ知らせる
    fn expire(&mut self, op: PendingOperation, callback_id: u64) {
        let err = op.timeout_error();
        warn!(rpc = %op.target(), callback_id, "request timed out");
        self.stats.timeouts += 1;
        self.report(StreamKind::RpcResponseError, callback_id, &err);
        op.fail(err);
    }

    fn report(&mut self, kind: StreamKind, callback_id: u64, error: &RpcError) {
        match self.error_sink.as_mut() {
            Some(sink) => sink(&protocol::error_frame(kind, callback_id, error)),
            None => debug!(error = %error, "no error sink"),
        }
    }

    fn busy_count(&self) -> usize {
        self.channels.iter().filter(|c| !c.is_idle()).count()
    }
}

/// デバッグ情報の 1 行目（rpc-request の `from` に入れる）
fn first_line(debug: &str) -> &str {
    debug.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;
    use wirelane_error::Category;

    /// 送受信を記録する Connector
    #[derive(Default)]
    struct Wire {
        dials: Vec<SocketId>,
        sent: Vec<(SocketId, Vec<u8>)>,
        closed: Vec<SocketId>,
    }

    impl Connector for Wire {
        fn dial(&mut self, _url: &str, socket: SocketId) -> Result<(), String> {
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

    fn session(token: &str, channels: usize) -> SessionConfig {
        SessionConfig {
            session: token.to_string(),
            channel_count: channels,
            transfer_limit: 4096,
            heartbeat_interval_ms: 5000,
            heartbeat_timeout_ms: 15_000,
        }
    }

    fn client() -> Client<Wire> {
        Client::new(ClientConfig::new("ws://localhost/rpc"), Wire::default()).unwrap()
    }

    /// open → socket open → connect-response まで進める
    fn connected(token: &str, channels: usize, now_ms: u64) -> Client<Wire> {
        let mut c = client();
        c.open(now_ms).unwrap();
        handshake(&mut c, token, channels, now_ms);
        c
    }

    fn handshake(c: &mut Client<Wire>, token: &str, channels: usize, now_ms: u64) {
        let id = c.adapter().socket().unwrap();
        c.handle_open(id, now_ms);
        let resp = protocol::connect_response(&session(token, channels)).unwrap();
        c.handle_message(id, resp.into_bytes(), now_ms);
        assert!(c.is_ready());
    }

    /// 送信済みフレームのうち rpc-request だけを取り出す
    fn sent_requests(c: &Client<Wire>) -> Vec<Stream> {
        c.adapter()
            .connector()
            .sent
            .iter()
            .filter_map(|(_, b)| Stream::from_bytes(b.clone()).ok())
            .filter(|s| s.kind() == StreamKind::RpcRequest)
            .collect()
    }

    fn respond_ok(c: &mut Client<Wire>, callback_id: u64, value: &Value, now_ms: u64) {
        let id = c.adapter().socket().unwrap();
        let frame = protocol::ok_response(callback_id, value).unwrap();
        c.handle_message(id, frame.into_bytes(), now_ms);
    }

    fn recording_sink(c: &mut Client<Wire>) -> Rc<RefCell<Vec<Stream>>> {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let r = reports.clone();
        c.set_error_sink(Some(Box::new(move |s: &Stream| r.borrow_mut().push(s.clone()))));
        reports
    }

    #[test]
    fn test_connect_request_carries_known_session() {
        let mut c = client();
        c.open(0).unwrap();
        let id = c.adapter().socket().unwrap();
        c.handle_open(id, 0);

        let (_, bytes) = c.adapter().connector().sent.last().unwrap().clone();
        let mut req = Stream::from_bytes(bytes).unwrap();
        assert_eq!(req.kind(), StreamKind::ConnectRequest);
        assert_eq!(req.read_string().unwrap(), "", "初回は空文字");
    }

    #[test]
    fn test_four_channels_six_sends() {
        let mut c = connected("s1", 4, 0);
        let futures: Vec<ReplyFuture> = (0..6)
            .map(|i| c.send(10, Some(8000), "work.run", &[Value::Int64(i)]))
            .collect();

        let sent = sent_requests(&c);
        assert_eq!(sent.len(), 4, "最初の 4 件だけ即送信");
        let ids: Vec<u64> = sent.iter().map(Stream::callback_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(c.queued(), 2);

        respond_ok(&mut c, 0, &Value::from("done"), 20);
        assert_eq!(futures[0].try_take(), Some(Ok(Value::from("done"))));

        let sent = sent_requests(&c);
        assert_eq!(sent.len(), 5);
        let mut fifth = sent.last().unwrap().clone();
        assert_eq!(fifth.callback_id(), 4, "チャネル 0 の sequence は 0 + 4");
        fifth.read_string().unwrap();
        fifth.read_string().unwrap();
        assert_eq!(fifth.read_value().unwrap(), Value::Int64(4), "5 件目が割り当てられる");
        assert_eq!(c.queued(), 1);
        assert!(!futures[4].is_settled());
    }

    #[test]
    fn test_routing_invariant() {
        let mut c = connected("s1", 3, 0);
        let mut outstanding = Vec::new();
        for round in 0..5u64 {
            for i in 0..3 {
                outstanding.push(c.send(round, None, "r", &[Value::Int64(i)]));
            }
            let sent = sent_requests(&c);
            for s in &sent[sent.len() - 3..] {
                let index = (s.callback_id() % 3) as usize;
                assert_eq!(c.channels()[index].callback_id(), Some(s.callback_id()));
            }
            for s in sent[sent.len() - 3..].to_vec() {
                respond_ok(&mut c, s.callback_id(), &Value::Null, round);
            }
        }
        assert!(outstanding.iter().all(ReplyFuture::is_settled));
    }

    #[test]
    fn test_stale_and_duplicate_responses_dropped() {
        let mut c = connected("s1", 2, 0);
        let first = c.send(0, None, "a", &[]);
        respond_ok(&mut c, 0, &Value::Int64(1), 1);
        assert_eq!(first.try_take(), Some(Ok(Value::Int64(1))));

        let second = c.send(2, None, "b", &[]);
        // 同じチャネル 0 だが callback ID は 2
        respond_ok(&mut c, 0, &Value::Int64(99), 3);
        assert!(!second.is_settled(), "古い callback ID の応答は捨てる");
        respond_ok(&mut c, 2, &Value::Int64(2), 4);
        assert_eq!(second.try_take(), Some(Ok(Value::Int64(2))));
    }

    #[test]
    fn test_error_response_rejects_with_trail() {
        let mut c = connected("s1", 1, 0);
        let fut = c.send_with_debug(0, None, "user.get", &[], "at ui.js:10".to_string());
        let id = c.adapter().socket().unwrap();
        let remote = RpcError::new(Category::Action, wirelane_error::Severity::Error, 7, "denied");
        let frame = protocol::error_frame(StreamKind::RpcResponseError, 0, &remote);
        c.handle_message(id, frame.into_bytes(), 1);

        let err = fut.try_take().unwrap().unwrap_err();
        assert!(err.is(&remote));
        assert_eq!(err.message(), "denied\nat ui.js:10");
    }

    #[test]
    fn test_timeout_exactly_once() {
        let mut c = client();
        let reports = recording_sink(&mut c);
        c.open(0).unwrap();

        // ハンドシェイク前に送信 → キューに残る
        let fut = c.send_with_debug(0, Some(500), "slow.op", &[], "at app:1".to_string());
        c.tick(400);
        assert!(!fut.is_settled());
        c.tick(1000);
        let err = fut.try_take().unwrap().unwrap_err();
        assert!(err.is(&errors::timeout("")));
        assert!(err.message().contains("slow.op"));
        assert!(err.message().contains("at app:1"));
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(reports.borrow()[0].kind(), StreamKind::RpcResponseError);

        // 後から接続しても再送されず、二度目の通知もない
        handshake(&mut c, "s1", 2, 1100);
        c.tick(2100);
        assert!(sent_requests(&c).is_empty());
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(c.stats().timeouts, 1);
    }

    #[test]
    fn test_busy_channel_timeout_then_late_response() {
        let mut c = connected("s1", 1, 0);
        let reports = recording_sink(&mut c);
        let fut = c.send(0, Some(1000), "a", &[]);
        let queued = c.send(0, Some(60_000), "b", &[]);

        c.tick(1001);
        assert!(fut.try_take().unwrap().is_err());
        assert_eq!(reports.borrow()[0].callback_id(), 0);
        // 空いたチャネルに b が載る
        assert_eq!(c.channels()[0].callback_id(), Some(1));

        // タイムアウト済みの応答が遅れて届いても何も起きない
        respond_ok(&mut c, 0, &Value::Null, 1002);
        assert!(!queued.is_settled());
        assert!(fut.try_take().is_none());
    }

    #[test]
    fn test_heartbeat_ping_and_dead_connection() {
        let mut c = connected("s1", 2, 0);
        let reports = recording_sink(&mut c);
        let first_socket = c.adapter().socket().unwrap();

        c.tick(5000);
        let pings = c
            .adapter()
            .connector()
            .sent
            .iter()
            .filter(|(_, b)| b[1] == StreamKind::Ping as u8)
            .count();
        assert_eq!(pings, 1);

        // サーバーからの ping には pong を返し、受信時刻も進む
        let ping = protocol::empty(StreamKind::Ping);
        c.handle_message(first_socket, ping.into_bytes(), 6000);
        let (_, last) = c.adapter().connector().sent.last().unwrap();
        assert_eq!(last[1], StreamKind::Pong as u8);

        c.tick(21_000);
        assert!(c.adapter().is_open(), "timeout 以内なら切らない");
        c.tick(21_001);
        assert!(!c.adapter().is_open(), "無通信が続いたら切断");
        assert_eq!(c.adapter().connector().closed, vec![first_socket]);
        assert!(!c.is_closed(), "アプリからの close ではない");
        assert_eq!(reports.borrow().len(), 1);

        c.tick(24_001);
        assert_eq!(c.adapter().connector().dials.len(), 2, "再接続する");
    }

    #[test]
    fn test_handshake_timeout() {
        let mut c = client();
        c.open(0).unwrap();
        let id = c.adapter().socket().unwrap();
        c.handle_open(id, 0);
        c.tick(10_000);
        assert!(c.adapter().is_open());
        c.tick(10_001);
        assert!(!c.adapter().is_open());
    }

    #[test]
    fn test_unchanged_session_replays_verbatim() {
        let mut c = connected("s1", 2, 0);
        let fut = c.send(0, Some(60_000), "long.op", &[Value::from("x")]);
        let original = sent_requests(&c)[0].as_bytes().to_vec();

        let old = c.adapter().socket().unwrap();
        c.handle_close(old, 100);
        c.tick(3100);
        handshake(&mut c, "s1", 2, 3200);

        let sent = sent_requests(&c);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].as_bytes(), &original[..], "同じバイト列を送り直す");
        assert_ne!(c.adapter().connector().sent.last().unwrap().0, old);
        assert_eq!(c.stats().replayed, 1);

        respond_ok(&mut c, 0, &Value::Bool(true), 3300);
        assert_eq!(fut.try_take(), Some(Ok(Value::Bool(true))));
    }

    #[test]
    fn test_second_connect_response_does_not_resend() {
        let mut c = connected("s1", 2, 0);
        let reports = recording_sink(&mut c);
        let fut = c.send(0, None, "charge.card", &[Value::Int64(100)]);
        assert_eq!(sent_requests(&c).len(), 1);

        let id = c.adapter().socket().unwrap();
        let again = protocol::connect_response(&session("s1", 2)).unwrap();
        c.handle_message(id, again.into_bytes(), 5);

        assert_eq!(sent_requests(&c).len(), 1, "同じ接続では送り直さない");
        assert_eq!(c.stats().replayed, 0);
        assert!(c.is_ready());
        let mut report = reports.borrow()[0].clone();
        assert!(protocol::parse_error(&mut report)
            .unwrap()
            .is(&errors::unexpected_frame("")));

        respond_ok(&mut c, 0, &Value::Bool(true), 6);
        assert_eq!(fut.try_take(), Some(Ok(Value::Bool(true))));
    }

    #[test]
    fn test_replay_keeps_deadline() {
        let mut c = connected("s1", 1, 0);
        let fut = c.send(0, Some(4000), "op", &[]);
        let old = c.adapter().socket().unwrap();
        c.handle_close(old, 100);
        c.tick(3100);
        handshake(&mut c, "s1", 1, 3200);
        // 掃除は 3100 の次は 4100 以降
        c.tick(4200);
        assert!(fut.try_take().unwrap().is_err(), "再送しても期限は送信時刻から");
    }

    #[test]
    fn test_new_session_requeues_in_callback_order() {
        let mut c = connected("s1", 2, 0);
        let a = c.send(0, Some(60_000), "a", &[]);
        let b = c.send(0, Some(60_000), "b", &[]);
        let queued = c.send(0, Some(60_000), "c", &[]);

        let old = c.adapter().socket().unwrap();
        c.handle_close(old, 10);
        c.tick(3010);
        handshake(&mut c, "s2", 1, 3020);

        assert_eq!(c.session().unwrap().session, "s2");
        assert_eq!(c.channels().len(), 1);
        // a が先頭で再割り当てされ、b と c が待つ
        let sent = sent_requests(&c);
        let mut last = sent.last().unwrap().clone();
        assert_eq!(last.callback_id(), 0);
        assert_eq!(last.read_string().unwrap(), "a");
        assert_eq!(c.queued(), 2);

        respond_ok(&mut c, 0, &Value::Null, 3030);
        assert!(a.is_settled());
        let mut next = sent_requests(&c).last().unwrap().clone();
        assert_eq!(next.callback_id(), 1);
        assert_eq!(next.read_string().unwrap(), "b");
        assert!(!b.is_settled());
        assert!(!queued.is_settled());
    }

    #[test]
    fn test_transfer_limit() {
        let mut c = connected("s1", 1, 0);
        let big = Value::Bytes(vec![0u8; 5000]);
        let fut = c.send(0, None, "upload", &[big]);
        let err = fut.try_take().unwrap().unwrap_err();
        assert_eq!(err.category(), Some(Category::Action));
        assert!(sent_requests(&c).is_empty());
        assert!(c.channels()[0].is_idle());
    }

    #[test]
    fn test_depth_overflow_rejects_immediately() {
        let mut c = connected("s1", 1, 0);
        let mut v = Value::Null;
        for _ in 0..65 {
            v = Value::Array(vec![v]);
        }
        let err = c.send(0, None, "deep", &[v]).try_take().unwrap().unwrap_err();
        assert_eq!(err.category(), Some(Category::Develop));
        assert!(err.message().contains("$[0]"));
        assert!(err.message().contains("target: deep"));
    }

    #[test]
    fn test_broadcast_delivery_and_unsubscribe() {
        let mut c = connected("s1", 1, 0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let l1 = log.clone();
        let h1 = c.subscribe("room.", "message", move |v| l1.borrow_mut().push((1, v.clone())));
        let l2 = log.clone();
        let _h2 = c.subscribe("room.", "message", move |v| l2.borrow_mut().push((2, v.clone())));
        let _other = c.subscribe("room.", "leave", |_| panic!("別のパスは呼ばれない"));

        let id = c.adapter().socket().unwrap();
        let frame = protocol::broadcast("room.message", &Value::from("hi")).unwrap();
        c.handle_message(id, frame.into_bytes(), 1);
        assert_eq!(*log.borrow(), vec![(1, Value::from("hi")), (2, Value::from("hi"))]);

        assert!(c.unsubscribe(&h1));
        let frame = protocol::broadcast("room.message", &Value::Null).unwrap();
        c.handle_message(id, frame.into_bytes(), 2);
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(log.borrow()[2].0, 2);
    }

    #[test]
    fn test_malformed_broadcast_drops_connection() {
        let mut c = connected("s1", 1, 0);
        let reports = recording_sink(&mut c);
        let id = c.adapter().socket().unwrap();
        let mut frame = Stream::new(StreamKind::Broadcast);
        frame.write_u64(3);
        frame.build_check();
        c.handle_message(id, frame.into_bytes(), 1);

        assert_eq!(reports.borrow()[0].kind(), StreamKind::SystemErrorReport);
        assert!(!c.adapter().is_open());
    }

    #[test]
    fn test_corrupted_frame_reported_once() {
        let mut c = connected("s1", 1, 0);
        let reports = recording_sink(&mut c);
        let id = c.adapter().socket().unwrap();
        let mut bytes = protocol::empty(StreamKind::Ping).into_bytes();
        bytes[30] ^= 0x40;
        c.handle_message(id, bytes, 1);

        assert_eq!(reports.borrow().len(), 1);
        let mut report = reports.borrow()[0].clone();
        let err = protocol::parse_error(&mut report).unwrap();
        assert_eq!(err.category(), Some(Category::Security));
        assert!(!c.is_ready());
    }

    #[test]
    fn test_invalid_handshake() {
        let mut c = client();
        let reports = recording_sink(&mut c);
        c.open(0).unwrap();
        let id = c.adapter().socket().unwrap();
        c.handle_open(id, 0);
        let mut bad = session("s1", 2);
        bad.channel_count = 0;
        c.handle_message(id, protocol::connect_response(&bad).unwrap().into_bytes(), 1);

        assert!(!c.is_ready());
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(c.adapter().state(), AdapterState::Opening);
    }

    #[test]
    fn test_server_error_report_forwarded() {
        let mut c = connected("s1", 1, 0);
        let reports = recording_sink(&mut c);
        let id = c.adapter().socket().unwrap();
        let err = RpcError::new(Category::Kernel, wirelane_error::Severity::Warn, 40, "overloaded");
        let frame = protocol::error_frame(StreamKind::SystemErrorReport, 0, &err);
        c.handle_message(id, frame.into_bytes(), 1);

        let mut forwarded = reports.borrow()[0].clone();
        assert_eq!(protocol::parse_error(&mut forwarded).unwrap(), err);
        assert!(c.is_ready(), "サーバーからの報告では切断しない");
    }

    #[test]
    fn test_close_rejects_everything() {
        let mut c = connected("s1", 1, 0);
        let busy = c.send(0, None, "a", &[]);
        let queued = c.send(0, None, "b", &[]);
        assert!(c.close());
        assert!(!c.close());

        for fut in [busy, queued] {
            let err = fut.try_take().unwrap().unwrap_err();
            assert!(err.is(&errors::client_closed()));
        }
        let after = c.send(0, None, "c", &[]);
        assert!(after.try_take().unwrap().is_err());
        assert_eq!(c.adapter().state(), AdapterState::Closing);
    }

    #[test]
    fn test_send_uses_call_site() {
        let mut c = connected("s1", 1, 0);
        let _fut = c.send(0, None, "where", &[]);
        let mut req = sent_requests(&c)[0].clone();
        req.read_string().unwrap();
        let from = req.read_string().unwrap();
        assert!(from.starts_with("at "), "{from}");
        assert!(from.contains("client.rs"), "{from}");
    }

    #[test]
    fn test_stats_serialize() {
        let mut c = connected("s1", 2, 0);
        let _fut = c.send(0, None, "a", &[]);
        let stats = c.stats();
        assert_eq!(stats.busy_channels, 1);
        assert_eq!(stats.channel_count, 2);
        assert!(stats.session_established);

        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"busyChannels\":1"));
        assert!(json.contains("\"sessionEstablished\":true"));
    }

    #[test]
    fn test_invalid_config_and_scheme() {
        let err = Client::new(ClientConfig::default(), Wire::default()).err().unwrap();
        assert_eq!(err.category(), Some(Category::Config));

        let mut c = Client::new(ClientConfig::new("http://h"), Wire::default()).unwrap();
        let err = c.open(0).unwrap_err();
        assert!(err.is(&errors::unsupported_scheme("")));
    }
}
