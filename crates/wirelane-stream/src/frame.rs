//! フレームヘッダーの定数とフレーム種別

use crate::error::StreamError;

/// wire プロトコルのバージョン
pub const PROTOCOL_VERSION: u8 = 1;

pub const VERSION_OFFSET: usize = 0;
pub const KIND_OFFSET: usize = 1;
/// total length (u32 LE) の位置
pub const LENGTH_OFFSET: usize = 4;
/// checksum ブロック（8 バイト）の位置。8 バイトレーンの境界に揃っている
pub const CHECKSUM_OFFSET: usize = 8;
pub const CHECKSUM_LEN: usize = 8;
/// callback ID のタグバイト位置
pub const CALLBACK_TAG_OFFSET: usize = 49;
/// callback ID (u64 LE) の位置
pub const CALLBACK_OFFSET: usize = 50;
/// ヘッダー長（body の開始位置）
pub const HEADER_LEN: usize = 60;

/// フレーム種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// クライアント → サーバー: セッショントークンを提示して接続
    ConnectRequest = 1,
    /// サーバー → クライアント: セッション設定
    ConnectResponse = 2,
    Ping = 3,
    Pong = 4,
    /// RPC リクエスト（target / from / args）
    RpcRequest = 5,
    /// RPC 成功応答（結果値 1 つ）
    RpcResponseOk = 6,
    /// RPC 失敗応答（エラーコード + メッセージ）
    RpcResponseError = 7,
    /// サーバープッシュ（topic path + 値）
    Broadcast = 8,
    /// 接続レベルのエラー報告（エラーコード + メッセージ）
    SystemErrorReport = 9,
}

impl StreamKind {
    pub fn from_u8(raw: u8) -> Result<Self, StreamError> {
        Ok(match raw {
            1 => StreamKind::ConnectRequest,
            2 => StreamKind::ConnectResponse,
            3 => StreamKind::Ping,
            4 => StreamKind::Pong,
            5 => StreamKind::RpcRequest,
            6 => StreamKind::RpcResponseOk,
            7 => StreamKind::RpcResponseError,
            8 => StreamKind::Broadcast,
            9 => StreamKind::SystemErrorReport,
            other => return Err(StreamError::UnknownKind(other)),
        })
    }

    /// ログ・ダンプ用の名前
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::ConnectRequest => "connect-request",
            StreamKind::ConnectResponse => "connect-response",
            StreamKind::Ping => "ping",
            StreamKind::Pong => "pong",
            StreamKind::RpcRequest => "rpc-request",
            StreamKind::RpcResponseOk => "rpc-response-ok",
            StreamKind::RpcResponseError => "rpc-response-error",
            StreamKind::Broadcast => "broadcast",
            StreamKind::SystemErrorReport => "system-error-report",
        }
    }
}

/// バイト列を 8 バイトレーンに区切って XOR で畳み込む（末尾はゼロ埋め）
pub fn xor_fold(bytes: &[u8]) -> [u8; 8] {
    let mut lane = [0u8; 8];
    for chunk in bytes.chunks(8) {
        for (acc, b) in lane.iter_mut().zip(chunk) {
            *acc ^= *b;
        }
    }
    lane
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for raw in 1..=9u8 {
            let kind = StreamKind::from_u8(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert_eq!(StreamKind::from_u8(0), Err(StreamError::UnknownKind(0)));
        assert_eq!(StreamKind::from_u8(10), Err(StreamError::UnknownKind(10)));
    }

    #[test]
    fn test_xor_fold_pads_with_zero() {
        assert_eq!(xor_fold(&[]), [0; 8]);
        assert_eq!(xor_fold(&[1, 2, 3]), [1, 2, 3, 0, 0, 0, 0, 0]);
        // 2 レーン目の先頭が 1 レーン目の先頭と打ち消し合う
        let bytes = [0xAA, 0, 0, 0, 0, 0, 0, 0, 0xAA, 0x0F];
        assert_eq!(xor_fold(&bytes), [0, 0x0F, 0, 0, 0, 0, 0, 0]);
    }
}
