//! 送信待ち / 応答待ちの RPC 呼び出し

use alloc::string::String;

use wirelane_error::{errors, RpcError};
use wirelane_stream::{Stream, Value};

use crate::reply::Completer;

/// 1 回の `send()` に対応する操作
///
/// 送信前キューに積まれ、空いたチャネルに割り当てられ、応答・タイムアウト・
/// クライアントのクローズのいずれかで確定する。
pub struct PendingOperation {
    completer: Completer,
    /// 送信するフレーム（callback ID は割り当て時に書き込む）
    pub(crate) stream: Stream,
    /// `send()` 時刻。再送しても変わらない
    pub(crate) created_ms: u64,
    pub(crate) timeout_ms: u64,
    pub(crate) target: String,
    /// 呼び出し元の位置（Rust の呼び出し位置、または JS のスタック）
    pub(crate) debug: String,
}

impl PendingOperation {
    pub(crate) fn new(
        completer: Completer,
        stream: Stream,
        created_ms: u64,
        timeout_ms: u64,
        target: String,
        debug: String,
    ) -> Self {
        PendingOperation { completer, stream, created_ms, timeout_ms, target, debug }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// 経過時間が自身のタイムアウトを超えたか
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_ms) > self.timeout_ms
    }

    pub(crate) fn resolve(self, value: Value) {
        self.completer.resolve(value);
    }

    /// 呼び出し元の位置を追記して reject する
    pub(crate) fn reject(self, error: RpcError) {
        let error = error.add_debug(&self.debug);
        self.completer.reject(error);
    }

    /// タイムアウトエラーを作る（位置情報付き）
    pub(crate) fn timeout_error(&self) -> RpcError {
        errors::timeout(&self.target).add_debug(&self.debug)
    }

    /// 作成済みのエラーをそのまま渡して reject する
    pub(crate) fn fail(self, error: RpcError) {
        self.completer.reject(error);
    }
}
