//! # wirelane-adapter
//!
//! 1 本の永続的な双方向接続（WebSocket）を管理する状態機械。
//!
//! ソケットそのものは持たず、[`Connector`] トレイト越しに操作する。
//! ソケットからのイベント（open / message / error / close）と定期 `tick(now_ms)` で駆動され、
//! 上位レイヤー向けの結果は [`AdapterEvent`] として内部キューに積まれる。
//!
//! ## 状態遷移
//!
//! ```text
//! Idle ──open()──▶ Opening ──handle_open()──▶ Opened
//!                    ▲  │                        │
//!                    │  └─ dial 失敗 / close ◀───┘ （retry_interval_ms 後に再接続）
//!                    │
//!  close() ─▶ Closing ──handle_close()──▶ Closed（終端）
//! ```
//!
//! ソケットごとに [`SocketId`] を払い出し、古いソケットから遅れて届いたイベントは無視する。

#![no_std]
extern crate alloc;

pub mod adapter;
pub mod error;

pub use adapter::{Adapter, AdapterEvent, AdapterState, Connector, SocketId};
pub use error::AdapterError;

/// 再接続間隔のデフォルト値（ミリ秒）
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 3000;

/// 受け付ける URL スキーム
pub const SUPPORTED_SCHEMES: [&str; 2] = ["ws", "wss"];
