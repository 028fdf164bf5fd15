//! # wirelane-float
//!
//! 指数部・仮数部のビット幅を指定できる汎用 IEEE-754 パッカー/アンパッカー。
//!
//! ストリームの float64 フィールドは `FloatFormat::BINARY64`（リトルエンディアン）で
//! 書き込まれるが、実装自体は binary16 / binary32 など任意の幅で動作する。
//!
//! ## ビットレイアウト
//!
//! ```text
//! [sign: 1bit][exponent: E bits][mantissa: M bits]   (1 + E + M は 8 の倍数)
//! ```
//!
//! - 指数部オール 0: ゼロまたは非正規化数
//! - 指数部オール 1: 仮数部が 0 なら ±∞、それ以外は NaN
//! - 幅を狭める変換は round-half-to-even、表現できない大きさは ±∞ に飽和する

#![no_std]

/// f64 の仮数部マスク（52 ビット）
const F64_MANTISSA_MASK: u64 = (1 << 52) - 1;

/// f64 の指数部（オール 1）
const F64_EXPONENT_MASK: u64 = 0x7FF << 52;

/// バイト列のエンディアン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// 数値コーデックのエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FloatError {
    /// サポートしないビット幅の組み合わせ
    #[error("unsupported float layout: {exponent_bits} exponent bits, {mantissa_bits} mantissa bits")]
    UnsupportedLayout { exponent_bits: u32, mantissa_bits: u32 },
    /// バッファ範囲外へのアクセス
    #[error("float window out of bounds: {needed} bytes at offset {offset}, buffer has {available}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

/// 浮動小数点のビット幅定義
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatFormat {
    exponent_bits: u32,
    mantissa_bits: u32,
}

impl FloatFormat {
    /// IEEE-754 binary16（半精度）
    pub const BINARY16: Self = FloatFormat { exponent_bits: 5, mantissa_bits: 10 };
    /// IEEE-754 binary32（単精度）
    pub const BINARY32: Self = FloatFormat { exponent_bits: 8, mantissa_bits: 23 };
    /// IEEE-754 binary64（倍精度）。ストリームの float64 はこれを使う
    pub const BINARY64: Self = FloatFormat { exponent_bits: 11, mantissa_bits: 52 };

    /// 任意のビット幅でフォーマットを作る
    ///
    /// # エラー
    /// - 指数部が 2..=11 ビットの範囲外
    /// - 仮数部が 1..=52 ビットの範囲外
    /// - `1 + E + M` が 8 の倍数でない
    pub fn new(exponent_bits: u32, mantissa_bits: u32) -> Result<Self, FloatError> {
        let total = 1 + exponent_bits + mantissa_bits;
        if !(2..=11).contains(&exponent_bits)
            || !(1..=52).contains(&mantissa_bits)
            || total % 8 != 0
            || total > 64
        {
            return Err(FloatError::UnsupportedLayout { exponent_bits, mantissa_bits });
        }
        Ok(FloatFormat { exponent_bits, mantissa_bits })
    }

    pub fn exponent_bits(&self) -> u32 {
        self.exponent_bits
    }

    pub fn mantissa_bits(&self) -> u32 {
        self.mantissa_bits
    }

    /// エンコード後のバイト数
    pub fn byte_len(&self) -> usize {
        ((1 + self.exponent_bits + self.mantissa_bits) / 8) as usize
    }

    fn bias(&self) -> i32 {
        (1 << (self.exponent_bits - 1)) - 1
    }

    fn max_exponent_field(&self) -> u64 {
        (1 << self.exponent_bits) - 1
    }

    fn mantissa_mask(&self) -> u64 {
        (1 << self.mantissa_bits) - 1
    }

    /// f64 をこのフォーマットのビット列（下位 `1 + E + M` ビット）に変換する
    pub fn encode_bits(&self, value: f64) -> u64 {
        let m = self.mantissa_bits;
        let sign = (value.to_bits() >> 63) << (self.exponent_bits + m);
        let all_ones = self.max_exponent_field() << m;

        if value.is_nan() {
            // ペイロードの上位ビットを保持し、消えてしまう場合は quiet ビットを立てる
            let payload = (value.to_bits() & F64_MANTISSA_MASK) >> (52 - m);
            let payload = if payload == 0 { 1 << (m - 1) } else { payload };
            return sign | all_ones | payload;
        }
        if value.is_infinite() {
            return sign | all_ones;
        }
        if value == 0.0 {
            return sign;
        }

        let (significand, exponent) = decompose(value);
        let bias = self.bias();
        let emin = 1 - bias;

        if exponent > bias {
            return sign | all_ones;
        }

        let bits = if exponent >= emin {
            // 正規化数: 丸めで仮数部が桁上がりした場合は指数部へ自然に繰り上がる
            let rounded = round_half_even(significand, 52 - m);
            (((exponent + bias - 1) as u64) << m) + rounded
        } else {
            // 非正規化数: 最小正規化数に丸め上がった場合も指数部 1 になる
            let shift = (52 - m) as i64 + (emin - exponent) as i64;
            round_half_even(significand, shift.min(u32::MAX as i64) as u32)
        };

        if bits >= all_ones {
            return sign | all_ones;
        }
        sign | bits
    }

    /// このフォーマットのビット列を f64 に戻す
    pub fn decode_bits(&self, bits: u64) -> f64 {
        let m = self.mantissa_bits;
        let negative = (bits >> (self.exponent_bits + m)) & 1 == 1;
        let exponent_field = (bits >> m) & self.max_exponent_field();
        let mantissa = bits & self.mantissa_mask();

        if exponent_field == self.max_exponent_field() {
            if mantissa != 0 {
                let sign = (negative as u64) << 63;
                return f64::from_bits(sign | F64_EXPONENT_MASK | (mantissa << (52 - m)));
            }
            return if negative { f64::NEG_INFINITY } else { f64::INFINITY };
        }

        let bias = self.bias();
        let (significand, exponent) = if exponent_field == 0 {
            (mantissa, 1 - bias - m as i32)
        } else {
            (mantissa | (1 << m), exponent_field as i32 - bias - m as i32)
        };
        compose(negative, significand, exponent)
    }

    /// `buf[offset..offset + byte_len]` に値を書き込む
    pub fn pack(
        &self,
        buf: &mut [u8],
        offset: usize,
        value: f64,
        endian: Endian,
    ) -> Result<(), FloatError> {
        let len = self.byte_len();
        let available = buf.len();
        let window = buf
            .get_mut(offset..offset.saturating_add(len))
            .ok_or(FloatError::OutOfBounds { offset, needed: len, available })?;

        let bits = self.encode_bits(value);
        match endian {
            Endian::Little => window.copy_from_slice(&bits.to_le_bytes()[..len]),
            Endian::Big => window.copy_from_slice(&bits.to_be_bytes()[8 - len..]),
        }
        Ok(())
    }

    /// `buf[offset..offset + byte_len]` から値を読み出す
    pub fn unpack(&self, buf: &[u8], offset: usize, endian: Endian) -> Result<f64, FloatError> {
        let len = self.byte_len();
        let window = buf
            .get(offset..offset.saturating_add(len))
            .ok_or(FloatError::OutOfBounds { offset, needed: len, available: buf.len() })?;

        let mut raw = [0u8; 8];
        let bits = match endian {
            Endian::Little => {
                raw[..len].copy_from_slice(window);
                u64::from_le_bytes(raw)
            }
            Endian::Big => {
                raw[8 - len..].copy_from_slice(window);
                u64::from_be_bytes(raw)
            }
        };
        Ok(self.decode_bits(bits))
    }
}

/// 有限・非ゼロの f64 を `significand * 2^(exponent - 52)` に分解する
///
/// `significand` は常に `[2^52, 2^53)`（非正規化数も正規化して返す）。
fn decompose(value: f64) -> (u64, i32) {
    let bits = value.to_bits();
    let exponent_field = ((bits >> 52) & 0x7FF) as i32;
    let mantissa = bits & F64_MANTISSA_MASK;

    if exponent_field == 0 {
        let shift = mantissa.leading_zeros() - 11;
        (mantissa << shift, -1022 - shift as i32)
    } else {
        (mantissa | (1 << 52), exponent_field - 1023)
    }
}

/// `significand * 2^exp2` を f64 として組み立てる（値は f64 で正確に表現できること）
fn compose(negative: bool, significand: u64, exp2: i32) -> f64 {
    let sign = (negative as u64) << 63;
    if significand == 0 {
        return f64::from_bits(sign);
    }

    let msb = 63 - significand.leading_zeros() as i32;
    let exponent = exp2 + msb;
    if exponent >= -1022 {
        let normalized = if msb > 52 {
            significand >> (msb - 52)
        } else {
            significand << (52 - msb)
        };
        let field = (exponent + 1023) as u64;
        f64::from_bits(sign | (field << 52) | (normalized & F64_MANTISSA_MASK))
    } else {
        let shift = exp2 + 1074;
        let mantissa = if shift >= 0 {
            significand << shift
        } else {
            significand >> -shift
        };
        f64::from_bits(sign | mantissa)
    }
}

/// `value >> shift` を round-half-to-even で丸める
fn round_half_even(value: u64, shift: u32) -> u64 {
    if shift == 0 {
        return value;
    }
    if shift > 64 {
        return 0;
    }
    let value = value as u128;
    let quotient = value >> shift;
    let remainder = value & ((1u128 << shift) - 1);
    let half = 1u128 << (shift - 1);
    let rounded = if remainder > half || (remainder == half && quotient & 1 == 1) {
        quotient + 1
    } else {
        quotient
    };
    rounded as u64
}
