//! Value rendering - タスク値をログ・ステータス表示用の文字列にする
//!
//! 長さ制限はテキストにだけ効きます。数値を途中で切ると別の値に見えるため、
//! スカラーと JSON の非文字列値は常に全桁を出します。

use std::any::Any;

/// Render a type-erased task value for display.
///
/// Text (`String`, `&'static str`, byte buffers as lossy UTF-8, JSON strings)
/// is cut to `max_len` characters. Scalars and other JSON values are rendered
/// in full. Anything else is `<opaque>`.
pub fn render_value(value: &(dyn Any + Send + Sync), max_len: usize) -> String {
    if let Some(bytes) = value.downcast_ref::<Vec<u8>>() {
        truncate_chars(String::from_utf8_lossy(bytes).into_owned(), max_len)
    } else if let Some(s) = value.downcast_ref::<String>() {
        truncate_chars(s.clone(), max_len)
    } else if let Some(s) = value.downcast_ref::<&'static str>() {
        truncate_chars((*s).to_string(), max_len)
    } else if let Some(json) = value.downcast_ref::<serde_json::Value>() {
        match json {
            serde_json::Value::String(s) => truncate_chars(s.clone(), max_len),
            other => other.to_string(),
        }
    } else if let Some(scalar) = render_scalar(value) {
        scalar
    } else {
        "<opaque>".to_string()
    }
}

fn render_scalar(value: &(dyn Any + Send + Sync)) -> Option<String> {
    macro_rules! try_display {
        ($($ty:ty),*) => {
            $(
                if let Some(v) = value.downcast_ref::<$ty>() {
                    return Some(v.to_string());
                }
            )*
        };
    }
    try_display!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);
    None
}

fn truncate_chars(mut s: String, max_len: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max_len) {
        s.truncate(idx);
    }
    s
}
