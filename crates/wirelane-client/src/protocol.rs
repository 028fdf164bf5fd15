//! フレーム種別ごとの body の組み立てと解析
//!
//! | 種別 | body |
//! |---|---|
//! | connect-request | session (string) |
//! | connect-response | session (string), channel count, transfer limit, heartbeat interval, heartbeat timeout |
//! | ping / pong | なし |
//! | rpc-request | target (string), from (string), 引数の値を順に |
//! | rpc-response-ok | 値 1 つ |
//! | rpc-response-error / system-error-report | code (integer), message (string) |
//! | broadcast | topic path (string), 値 1 つ |

use alloc::format;
use alloc::string::String;

use wirelane_error::{errors, RpcError};
use wirelane_stream::{Stream, StreamError, StreamKind, Value};

/// 受け付けるチャネル数の上限
pub const MAX_CHANNEL_COUNT: u64 = 4096;

/// ハンドシェイクで合意したセッション設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub session: String,
    pub channel_count: usize,
    /// 1 フレームの最大バイト数
    pub transfer_limit: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

pub fn connect_request(session: &str) -> Result<Stream, StreamError> {
    let mut stream = Stream::new(StreamKind::ConnectRequest);
    stream.write_str(session)?;
    stream.build_check();
    Ok(stream)
}

/// connect-response を検証してセッション設定を取り出す
///
/// # エラー
/// 欠けたフィールド、0 以下の値、上限を超えるチャネル数は `handshake_invalid`
pub fn parse_connect_response(stream: &mut Stream) -> Result<SessionConfig, RpcError> {
    let invalid = |field: &str, e: StreamError| errors::handshake_invalid(&format!("{field}: {e}"));

    let session = stream.read_string().map_err(|e| invalid("session", e))?;
    let mut positive = |field: &str| -> Result<u64, RpcError> {
        let v = stream.read_u64().map_err(|e| invalid(field, e))?;
        if v == 0 {
            return Err(errors::handshake_invalid(&format!("{field} must be positive")));
        }
        Ok(v)
    };
    let channel_count = positive("channel count")?;
    let transfer_limit = positive("transfer limit")?;
    let heartbeat_interval_ms = positive("heartbeat interval")?;
    let heartbeat_timeout_ms = positive("heartbeat timeout")?;

    if channel_count > MAX_CHANNEL_COUNT {
        return Err(errors::handshake_invalid(&format!(
            "channel count {channel_count} exceeds {MAX_CHANNEL_COUNT}"
        )));
    }
    Ok(SessionConfig {
        session,
        channel_count: channel_count as usize,
        transfer_limit,
        heartbeat_interval_ms,
        heartbeat_timeout_ms,
    })
}

/// connect-response を作る（サーバー側・テスト用）
pub fn connect_response(config: &SessionConfig) -> Result<Stream, StreamError> {
    let mut stream = Stream::new(StreamKind::ConnectResponse);
    stream.write_str(&config.session)?;
    stream.write_u64(config.channel_count as u64);
    stream.write_u64(config.transfer_limit);
    stream.write_u64(config.heartbeat_interval_ms);
    stream.write_u64(config.heartbeat_timeout_ms);
    stream.build_check();
    Ok(stream)
}

/// body のないフレーム（ping / pong）
pub fn empty(kind: StreamKind) -> Stream {
    let mut stream = Stream::new(kind);
    stream.build_check();
    stream
}

/// rpc-request を作る（callback ID は割り当て時に書き込む）
pub fn rpc_request(target: &str, from: &str, args: &[Value], max_depth: usize) -> Result<Stream, StreamError> {
    let mut stream = Stream::new(StreamKind::RpcRequest);
    stream.write_str(target)?;
    stream.write_str(from)?;
    for arg in args {
        stream.write_value_with_depth(arg, max_depth)?;
    }
    Ok(stream)
}

/// rpc-request の target / from / 引数
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub target: String,
    pub from: String,
    pub args: alloc::vec::Vec<Value>,
}

pub fn parse_rpc_request(stream: &mut Stream) -> Result<Request, StreamError> {
    let target = stream.read_string()?;
    let from = stream.read_string()?;
    let mut args = alloc::vec::Vec::new();
    while !stream.is_read_finish() {
        args.push(stream.read_value()?);
    }
    Ok(Request { target, from, args })
}

pub fn ok_response(callback_id: u64, value: &Value) -> Result<Stream, StreamError> {
    let mut stream = Stream::new(StreamKind::RpcResponseOk);
    stream.set_callback_id(callback_id);
    stream.write_value(value)?;
    stream.build_check();
    Ok(stream)
}

pub fn parse_ok(stream: &mut Stream) -> Result<Value, StreamError> {
    stream.read_value()
}

/// rpc-response-error / system-error-report を作る
pub fn error_frame(kind: StreamKind, callback_id: u64, error: &RpcError) -> Stream {
    let mut stream = Stream::new(kind);
    stream.set_callback_id(callback_id);
    stream.write_u64(error.code() as u64);
    if stream.write_str(error.message()).is_err() {
        // 4GB を超えるメッセージは持てないので本文を落とす
        stream.write_str("").ok();
    }
    stream.build_check();
    stream
}

pub fn parse_error(stream: &mut Stream) -> Result<RpcError, StreamError> {
    let offset = stream.read_pos();
    let code = u32::try_from(stream.read_u64()?).map_err(|_| StreamError::OutOfRange(offset))?;
    let message = stream.read_string()?;
    Ok(RpcError::from_code(code, message))
}

pub fn broadcast(path: &str, value: &Value) -> Result<Stream, StreamError> {
    let mut stream = Stream::new(StreamKind::Broadcast);
    stream.write_str(path)?;
    stream.write_value(value)?;
    stream.build_check();
    Ok(stream)
}

pub fn parse_broadcast(stream: &mut Stream) -> Result<(String, Value), StreamError> {
    let path = stream.read_string()?;
    let value = stream.read_value()?;
    Ok((path, value))
}
