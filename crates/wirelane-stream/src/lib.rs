//! # wirelane-stream
//!
//! 自己記述型のバイナリストリーム（フレーム）とタグバイト型システム。
//!
//! ## フレームの Wire Format
//!
//! ```text
//! [0]        version (1)
//! [1]        kind
//! [2..4)     reserved
//! [4..8)     total length: u32 LE（= 書き込み済みバイト数）
//! [8..16)    checksum: 8 バイトレーンの XOR 畳み込み
//! [16..49)   reserved
//! [49]       callback ID タグ（11 = uint64 64bit）
//! [50..58)   callback ID: u64 LE
//! [58..60)   reserved
//! [60..)     body（タグバイトで符号化された値の列）
//! ```
//!
//! ## 値のタグバイト
//!
//! 先頭 1 バイトが型を表し、小さな値はタグ自体にペイロードを埋め込む。
//! 対応表は [`tag`] モジュールを参照。
//!
//! ## 使用例
//!
//! ```
//! use wirelane_stream::{Stream, StreamKind, Value};
//!
//! let mut out = Stream::new(StreamKind::RpcResponseOk);
//! out.set_callback_id(42);
//! out.write_value(&Value::from("hello")).unwrap();
//! out.build_check();
//!
//! let mut inbound = Stream::from_bytes(out.as_bytes().to_vec()).unwrap();
//! assert_eq!(inbound.callback_id(), 42);
//! assert_eq!(inbound.read_value().unwrap(), Value::from("hello"));
//! assert!(inbound.is_read_finish());
//! ```

#![no_std]
extern crate alloc;

mod codec;
pub mod error;
pub mod frame;
pub mod stream;
pub mod tag;
pub mod value;

#[cfg(feature = "serde")]
mod serde_impl;

pub use error::StreamError;
pub use frame::{xor_fold, StreamKind, HEADER_LEN, PROTOCOL_VERSION};
pub use stream::Stream;
pub use value::Value;

/// コンテナのネスト上限（デフォルト）
pub const DEFAULT_MAX_DEPTH: usize = 64;
