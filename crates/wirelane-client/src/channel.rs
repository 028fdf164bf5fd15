//! 仮想チャネル
//!
//! サーバーと合意した本数だけ用意され、各チャネルは同時に 1 つの操作だけを運ぶ。
//! callback ID は `sequence` から払い出し、払い出すたびにチャネル数だけ進める。
//! そのため `callback_id % channel_count == index` が常に成り立つ。

use wirelane_stream::Stream;

use crate::operation::PendingOperation;

/// チャネルのスロット
pub enum ChannelSlot {
    Idle,
    Busy {
        operation: PendingOperation,
        callback_id: u64,
        assigned_ms: u64,
    },
}

pub struct Channel {
    index: usize,
    sequence: u64,
    slot: ChannelSlot,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        Channel { index, sequence: index as u64, slot: ChannelSlot::Idle }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// 次に払い出す callback ID
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.slot, ChannelSlot::Idle)
    }

    /// 処理中の callback ID
    pub fn callback_id(&self) -> Option<u64> {
        match &self.slot {
            ChannelSlot::Busy { callback_id, .. } => Some(*callback_id),
            ChannelSlot::Idle => None,
        }
    }

    pub fn assigned_ms(&self) -> Option<u64> {
        match &self.slot {
            ChannelSlot::Busy { assigned_ms, .. } => Some(*assigned_ms),
            ChannelSlot::Idle => None,
        }
    }

    /// 処理中の操作が持つフレーム
    pub fn stream(&self) -> Option<&Stream> {
        match &self.slot {
            ChannelSlot::Busy { operation, .. } => Some(&operation.stream),
            ChannelSlot::Idle => None,
        }
    }

    /// 操作を割り当て、フレームに callback ID を書き込む
    ///
    /// # 引数
    /// - `channel_count`: 合意済みチャネル数（sequence の増分）
    ///
    /// # 戻り値
    /// 払い出した callback ID
    pub fn assign(&mut self, mut operation: PendingOperation, channel_count: usize, now_ms: u64) -> u64 {
        let callback_id = self.sequence;
        self.sequence += channel_count as u64;
        operation.stream.set_callback_id(callback_id);
        operation.stream.build_check();
        self.slot = ChannelSlot::Busy { operation, callback_id, assigned_ms: now_ms };
        callback_id
    }

    /// `callback_id` の操作を処理中であれば取り出してチャネルを空ける
    pub fn take_if(&mut self, callback_id: u64) -> Option<PendingOperation> {
        if self.callback_id() != Some(callback_id) {
            return None;
        }
        self.take().map(|(operation, _)| operation)
    }

    /// 処理中の操作を取り出してチャネルを空ける
    pub fn take(&mut self) -> Option<(PendingOperation, u64)> {
        match core::mem::replace(&mut self.slot, ChannelSlot::Idle) {
            ChannelSlot::Busy { operation, callback_id, .. } => Some((operation, callback_id)),
            ChannelSlot::Idle => None,
        }
    }

    /// 処理中の操作がタイムアウトしたか
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match &self.slot {
            ChannelSlot::Busy { operation, .. } => operation.is_expired(now_ms),
            ChannelSlot::Idle => false,
        }
    }
}
