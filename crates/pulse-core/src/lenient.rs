//! Tolerant serde helpers for upstream JSON.
//!
//! Market and analysis endpoints are not consistent about numeric encoding:
//! the same field may arrive as a number, a numeric string, or `null`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Interpret a JSON value as a float. Strings are parsed, anything else is `None`.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Number, numeric string or null. Unparseable input becomes `0.0`.
pub fn f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value).unwrap_or(0.0))
}

/// Optional variant of [`f64`]: null and unparseable input become `None`.
pub fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value))
}

/// Integer leverage encoded as number or string; fractional values are truncated.
pub fn u32_or_default<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value)
        .filter(|v| *v >= 1.0 && *v <= f64::from(u32::MAX))
        .map(|v| v as u32)
        .unwrap_or(1))
}

/// Deserialize into `T` if the shape matches, otherwise `None`.
pub fn or_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "f64")]
        a: f64,
        #[serde(default, deserialize_with = "opt_f64")]
        b: Option<f64>,
        #[serde(default = "one", deserialize_with = "u32_or_default")]
        lev: u32,
    }

    fn one() -> u32 {
        1
    }

    #[test]
    fn test_value_as_f64_accepts_strings() {
        assert_eq!(value_as_f64(&json!("2.5")), Some(2.5));
        assert_eq!(value_as_f64(&json!(3)), Some(3.0));
        assert_eq!(value_as_f64(&json!("abc")), None);
        assert_eq!(value_as_f64(&json!(null)), None);
    }

    #[test]
    fn test_lenient_fields() {
        let s: Sample = serde_json::from_value(json!({"a": "1.5", "b": "?", "lev": "20"})).unwrap();
        assert_eq!(s.a, 1.5);
        assert_eq!(s.b, None);
        assert_eq!(s.lev, 20);

        let s: Sample = serde_json::from_value(json!({"a": null})).unwrap();
        assert_eq!(s.a, 0.0);
        assert_eq!(s.lev, 1);
    }
}
