//! JsValue と Value の相互変換
//!
//! | JS | Value |
//! |---|---|
//! | null / undefined | Null |
//! | boolean | Bool |
//! | 安全な整数の number（-0 を除く） | Int64 |
//! | その他の number | Float64 |
//! | bigint | Int64（範囲外なら Uint64） |
//! | string | String |
//! | Uint8Array / ArrayBuffer | Bytes |
//! | Array | Array |
//! | plain object | Map |

use std::collections::BTreeMap;

use js_sys::{Array, ArrayBuffer, Object, Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wirelane_error::{errors, RpcError};
use wirelane_stream::Value;

/// Number.MAX_SAFE_INTEGER
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// JS の値を Value に変換する
///
/// # エラー
/// - 関数・シンボルなど表現できない値は Develop エラー
/// - `max_depth` を超えるネスト（循環参照を含む）は depth overflow
pub fn js_to_value(value: &JsValue, max_depth: usize) -> Result<Value, RpcError> {
    let mut path = String::from("$");
    convert(value, max_depth, &mut path)
}

fn convert(value: &JsValue, depth: usize, path: &mut String) -> Result<Value, RpcError> {
    if value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = value.as_f64() {
        return Ok(number_to_value(n));
    }
    if value.is_bigint() {
        if let Ok(v) = i64::try_from(value.clone()) {
            return Ok(Value::Int64(v));
        }
        if let Ok(v) = u64::try_from(value.clone()) {
            return Ok(Value::Uint64(v));
        }
        return Err(errors::unsupported_value(&format!("bigint out of 64-bit range at {path}")));
    }
    if let Some(s) = value.as_string() {
        return Ok(Value::String(s));
    }
    if let Some(bytes) = value.dyn_ref::<Uint8Array>() {
        return Ok(Value::Bytes(bytes.to_vec()));
    }
    if let Some(buffer) = value.dyn_ref::<ArrayBuffer>() {
        return Ok(Value::Bytes(Uint8Array::new(buffer).to_vec()));
    }
    if let Some(array) = value.dyn_ref::<Array>() {
        let depth = enter(depth, path)?;
        let mut items = Vec::with_capacity(array.length() as usize);
        for (i, item) in array.iter().enumerate() {
            let mark = path.len();
            path.push_str(&format!("[{i}]"));
            items.push(convert(&item, depth, path)?);
            path.truncate(mark);
        }
        return Ok(Value::Array(items));
    }
    if value.is_object() && !value.is_function() {
        let depth = enter(depth, path)?;
        let object: &Object = value.unchecked_ref();
        let mut entries = BTreeMap::new();
        for key in Object::keys(object).iter() {
            let Some(name) = key.as_string() else {
                continue;
            };
            let item = Reflect::get(object, &key).map_err(|e| unsupported(&e, path))?;
            let mark = path.len();
            path.push_str(&format!("[{name:?}]"));
            entries.insert(name, convert(&item, depth, path)?);
            path.truncate(mark);
        }
        return Ok(Value::Map(entries));
    }
    Err(errors::unsupported_value(&format!(
        "cannot encode {} at {path}",
        value.js_typeof().as_string().unwrap_or_default()
    )))
}

fn enter(depth: usize, path: &str) -> Result<usize, RpcError> {
    depth.checked_sub(1).ok_or_else(|| errors::depth_overflow(path))
}

fn unsupported(e: &JsValue, path: &str) -> RpcError {
    errors::unsupported_value(&format!("{e:?} at {path}"))
}

fn number_to_value(n: f64) -> Value {
    let is_safe_integer = n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER;
    if is_safe_integer && !(n == 0.0 && n.is_sign_negative()) {
        Value::Int64(n as i64)
    } else {
        Value::Float64(n)
    }
}

/// Value を JS の値に変換する
///
/// 安全な整数範囲を超える整数は bigint になる。
pub fn value_to_js(value: &Value) -> JsValue {
    match value {
        Value::Null => JsValue::NULL,
        Value::Bool(b) => JsValue::from_bool(*b),
        Value::Float64(n) => JsValue::from_f64(*n),
        Value::Int64(v) => {
            if (*v as f64).abs() <= MAX_SAFE_INTEGER {
                JsValue::from_f64(*v as f64)
            } else {
                JsValue::from(*v)
            }
        }
        Value::Uint64(v) => {
            if (*v as f64) <= MAX_SAFE_INTEGER {
                JsValue::from_f64(*v as f64)
            } else {
                JsValue::from(*v)
            }
        }
        Value::String(s) => JsValue::from_str(s),
        Value::Bytes(b) => Uint8Array::from(b.as_slice()).into(),
        Value::Array(items) => items.iter().map(value_to_js).collect::<Array>().into(),
        Value::Map(entries) => {
            let object = Object::new();
            for (key, item) in entries {
                // plain object への設定は失敗しない
                let _ = Reflect::set(&object, &JsValue::from_str(key), &value_to_js(item));
            }
            object.into()
        }
    }
}

/// RpcError を `code` プロパティ付きの JS Error にする
pub fn error_to_js(error: &RpcError) -> JsValue {
    let js_error = js_sys::Error::new(&error.to_string());
    let _ = Reflect::set(&js_error, &JsValue::from_str("code"), &JsValue::from_f64(error.code() as f64));
    js_error.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_classification() {
        assert_eq!(number_to_value(3.0), Value::Int64(3));
        assert_eq!(number_to_value(-12.0), Value::Int64(-12));
        assert_eq!(number_to_value(MAX_SAFE_INTEGER), Value::Int64(9_007_199_254_740_991));
        assert_eq!(number_to_value(0.5), Value::Float64(0.5));
        assert_eq!(number_to_value(1e300), Value::Float64(1e300));
        match number_to_value(-0.0) {
            Value::Float64(v) => assert!(v.is_sign_negative(), "-0 は float のまま"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(number_to_value(f64::NAN), Value::Float64(v) if v.is_nan()));
    }
}
