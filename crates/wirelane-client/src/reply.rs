//! 応答待ちの Future と、それを一度だけ確定させる Completer
//!
//! 両者は `Rc<RefCell<_>>` のスロットを共有する。Completer は `resolve` / `reject` で
//! 消費されるので二重確定は型で防がれる。確定させずに破棄された Completer は
//! `client closed` エラーで reject する。

use alloc::rc::Rc;
use core::cell::RefCell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use wirelane_error::{errors, RpcError};
use wirelane_stream::Value;

/// RPC 呼び出しの結果
pub type Reply = Result<Value, RpcError>;

#[derive(Default)]
struct Slot {
    result: Option<Reply>,
    waker: Option<Waker>,
    /// 結果が書き込まれたか（取り出した後も true のまま）
    settled: bool,
}

/// 応答を待つ Future
///
/// `send()` が即座に返す。`Client` を駆動（socket イベント / `tick`）すると確定する。
pub struct ReplyFuture {
    slot: Rc<RefCell<Slot>>,
}

/// `ReplyFuture` を確定させる側
pub struct Completer {
    slot: Option<Rc<RefCell<Slot>>>,
}

/// 対になる Completer と ReplyFuture を生成する
pub fn reply_pair() -> (Completer, ReplyFuture) {
    let slot = Rc::new(RefCell::new(Slot::default()));
    (
        Completer { slot: Some(slot.clone()) },
        ReplyFuture { slot },
    )
}

impl ReplyFuture {
    /// 最初から確定済みの Future（送信前に失敗した呼び出し用）
    pub fn ready(result: Reply) -> Self {
        let (completer, future) = reply_pair();
        completer.settle(result);
        future
    }

    /// 結果が書き込まれているか
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().settled
    }

    /// 確定していれば結果を取り出す（取り出せるのは一度だけ）
    pub fn try_take(&self) -> Option<Reply> {
        self.slot.borrow_mut().result.take()
    }
}

impl Future for ReplyFuture {
    type Output = Reply;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.borrow_mut();
        if let Some(result) = slot.result.take() {
            return Poll::Ready(result);
        }
        if slot.settled {
            // 取り出し済みのものを再度 poll された
            return Poll::Ready(Err(errors::client_closed()));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Completer {
    pub fn resolve(self, value: Value) {
        self.settle(Ok(value));
    }

    pub fn reject(self, error: RpcError) {
        self.settle(Err(error));
    }

    fn settle(mut self, result: Reply) {
        if let Some(slot) = self.slot.take() {
            fill(&slot, result);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            fill(&slot, Err(errors::client_closed()));
        }
    }
}

fn fill(slot: &Rc<RefCell<Slot>>, result: Reply) {
    let waker = {
        let mut slot = slot.borrow_mut();
        slot.result = Some(result);
        slot.settled = true;
        slot.waker.take()
    };
    if let Some(waker) = waker {
        waker.wake();
    }
}
