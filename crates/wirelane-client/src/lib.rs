//! # wirelane-client
//!
//! 1 本の接続の上で多数の RPC を同時に扱うクライアントランタイム。
//!
//! ## 動作の流れ
//!
//! ```text
//! send() ──▶ 送信前キュー ──(空きチャネル)──▶ Channel[i] ──▶ Adapter ──▶ socket
//!                                              ▲
//! socket ──▶ Adapter ──▶ Stream ──▶ callback_id % N で Channel を特定して確定
//!                              └──▶ broadcast は購読テーブルへ
//! ```
//!
//! - 接続のたびに connect-request で既知のセッションを伝える
//! - セッションが変わらなければ処理中のフレームを送り直す（期限はそのまま）
//! - セッションが変われば処理中の操作をキューの先頭へ戻してチャネルを作り直す
//! - `tick()` で再接続、ハートビート、タイムアウト掃除を行う
//!
//! ## 使用例
//!
//! ```
//! use wirelane_adapter::{Connector, SocketId};
//! use wirelane_client::{Client, ClientConfig};
//! use wirelane_stream::Value;
//!
//! struct Null;
//! impl Connector for Null {
//!     fn dial(&mut self, _: &str, _: SocketId) -> Result<(), String> { Ok(()) }
//!     fn send(&mut self, _: SocketId, _: &[u8]) -> Result<(), String> { Ok(()) }
//!     fn close(&mut self, _: SocketId) {}
//! }
//!
//! let mut client = Client::new(ClientConfig::new("ws://localhost:9000/rpc"), Null).unwrap();
//! client.open(0).unwrap();
//! // ハンドシェイク前の送信はキューに積まれる
//! let reply = client.send(0, Some(1000), "user.get", &[Value::from(7u64)]);
//! assert!(!reply.is_settled());
//! assert_eq!(client.queued(), 1);
//! ```

#![no_std]
extern crate alloc;

pub mod channel;
pub mod client;
pub mod config;
pub mod operation;
pub mod protocol;
pub mod reply;
pub mod subscription;

pub use channel::{Channel, ChannelSlot};
pub use client::{Client, ClientStats, ErrorSink};
pub use config::ClientConfig;
pub use operation::PendingOperation;
pub use protocol::SessionConfig;
pub use reply::{Completer, Reply, ReplyFuture};
pub use subscription::{Handler, SubscriptionHandle};
