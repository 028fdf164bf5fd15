//! タグバイトの割り当て
//!
//! | 範囲 | 型 | 後続 |
//! |---|---|---|
//! | 1 | null | なし |
//! | 2 / 3 | false / true | なし |
//! | 4 | float64 (+0.0) | なし |
//! | 5 | float64 | 8 バイト |
//! | 6 / 7 / 8 | int64 16/32/64bit | 2 / 4 / 8 バイト |
//! | 9 / 10 / 11 | uint64 16/32/64bit | 2 / 4 / 8 バイト |
//! | 14..=53 | int64 -7..=32 | なし |
//! | 54..=63 | uint64 0..=9 | なし |
//! | 64 / 65..=94 / 95 | array 空 / 要素数埋め込み / 長形式 | 総バイト長 (+要素数) |
//! | 96 / 97..=126 / 127 | map 同上 | 総バイト長 (+要素数) |
//! | 128 / 129..=190 / 191 | string 空 / 短 / 長 | (長さ) + 本体 + 0 |
//! | 192 / 193..=254 / 255 | bytes 空 / 短 / 長 | (長さ) + 本体 |

pub const NULL: u8 = 1;
pub const FALSE: u8 = 2;
pub const TRUE: u8 = 3;

pub const FLOAT64_ZERO: u8 = 4;
pub const FLOAT64: u8 = 5;

pub const INT64_16: u8 = 6;
pub const INT64_32: u8 = 7;
pub const INT64_64: u8 = 8;

pub const UINT64_16: u8 = 9;
pub const UINT64_32: u8 = 10;
pub const UINT64_64: u8 = 11;

/// int64 インライン範囲の先頭タグ（値 -7）
pub const INT64_INLINE_START: u8 = 14;
/// int64 インライン範囲の末尾タグ（値 32）
pub const INT64_INLINE_END: u8 = 53;
/// int64 インラインのバイアス（tag = value + 21）
pub const INT64_INLINE_BIAS: i64 = 21;
pub const INT64_INLINE_MIN: i64 = -7;
pub const INT64_INLINE_MAX: i64 = 32;

pub const UINT64_INLINE_START: u8 = 54;
pub const UINT64_INLINE_END: u8 = 63;
pub const UINT64_INLINE_MAX: u64 = 9;

pub const ARRAY_EMPTY: u8 = 64;
pub const ARRAY_LONG: u8 = 95;
pub const MAP_EMPTY: u8 = 96;
pub const MAP_LONG: u8 = 127;

/// 要素数をタグに埋め込めるコンテナの最大要素数
pub const CONTAINER_INLINE_MAX: usize = 30;

pub const STRING_EMPTY: u8 = 128;
pub const STRING_LONG: u8 = 191;
pub const BYTES_EMPTY: u8 = 192;
pub const BYTES_LONG: u8 = 255;

/// 長さをタグに埋め込める string / bytes の最大バイト数（63 以上は長形式）
pub const SHORT_LEN_MAX: usize = 62;
