use serde_json::Value;

/// 按 JavaScript 的真值规则判断 JSON 值
///
/// null / false / 0 / NaN / 空字符串为假；对象和数组（包括空的）为真。
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
