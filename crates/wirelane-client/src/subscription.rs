//! トピック購読テーブル
//!
//! トピックパスは target と event をそのまま連結した文字列。
//! 最後のハンドラを外したパスはテーブルから取り除く。

use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use wirelane_stream::Value;

/// ブロードキャストを受け取るハンドラ
pub type Handler = Rc<dyn Fn(&Value)>;

/// トピックパス（target + event）
pub fn topic_path(target: &str, event: &str) -> String {
    let mut path = String::with_capacity(target.len() + event.len());
    path.push_str(target);
    path.push_str(event);
    path
}

#[derive(Default)]
pub struct SubscriptionTable {
    topics: BTreeMap<String, Vec<(u64, Handler)>>,
    next_id: u64,
}

impl SubscriptionTable {
    pub fn add(&mut self, path: String, handler: Handler) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.topics.entry(path).or_default().push((id, handler));
        id
    }

    /// ハンドラを 1 つ外す。空になったパスは削除する
    ///
    /// # 戻り値
    /// 外せた場合 true
    pub fn remove(&mut self, path: &str, id: u64) -> bool {
        let Some(handlers) = self.topics.get_mut(path) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.topics.remove(path);
        }
        removed
    }

    pub fn contains(&self, path: &str, id: u64) -> bool {
        self.topics
            .get(path)
            .is_some_and(|handlers| handlers.iter().any(|(h, _)| *h == id))
    }

    /// 登録順のハンドラ一覧（呼び出し中の登録解除に備えて複製を返す）
    pub fn snapshot(&self, path: &str) -> Vec<(u64, Handler)> {
        self.topics.get(path).cloned().unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn handler_count(&self, path: &str) -> usize {
        self.topics.get(path).map_or(0, Vec::len)
    }
}

/// `path` の購読者に `value` を登録順に配る
///
/// ハンドラの呼び出し中はテーブルを借用しない。配信中に外されたハンドラは呼ばない。
///
/// # 戻り値
/// 呼び出したハンドラの数
pub fn deliver(table: &Rc<RefCell<SubscriptionTable>>, path: &str, value: &Value) -> usize {
    let handlers = table.borrow().snapshot(path);
    let mut delivered = 0;
    for (id, handler) in handlers {
        if !table.borrow().contains(path, id) {
            continue;
        }
        handler(value);
        delivered += 1;
    }
    delivered
}

/// 購読の解除用ハンドル
///
/// テーブルは弱参照で持つので、クライアントが先に破棄されても安全に `close()` できる。
pub struct SubscriptionHandle {
    table: Weak<RefCell<SubscriptionTable>>,
    path: String,
    id: u64,
    closed: Cell<bool>,
}

impl SubscriptionHandle {
    pub(crate) fn new(table: &Rc<RefCell<SubscriptionTable>>, path: String, id: u64) -> Self {
        SubscriptionHandle { table: Rc::downgrade(table), path, id, closed: Cell::new(false) }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// 購読を解除する。2 回目以降は何もしない
    ///
    /// # 戻り値
    /// 今回の呼び出しで解除した場合 true
    pub fn close(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }
        match self.table.upgrade() {
            Some(table) => table.borrow_mut().remove(&self.path, self.id),
            None => false,
        }
    }
}
