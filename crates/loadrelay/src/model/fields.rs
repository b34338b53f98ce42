//! Lenient field extraction from loosely-shaped JSON records.
//!
//! Records reach the model from three producers and from files written by
//! older releases. Every accessor here returns `None` for a missing field and
//! logs (then returns `None`) for a field of the wrong type, so callers can
//! default field by field instead of rejecting the whole record.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Parses an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn timestamp_value(dt: Option<&DateTime<Utc>>) -> Value {
    dt.map(|d| Value::String(format_timestamp(d)))
        .unwrap_or(Value::Null)
}

pub(crate) struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    record: String,
}

impl<'a> FieldReader<'a> {
    /// `id_field` names the field used to identify the record in log lines.
    pub fn new(map: &'a Map<String, Value>, id_field: &str) -> Self {
        let record = map
            .get(id_field)
            .and_then(Value::as_str)
            .unwrap_or("<unidentified>")
            .to_string();
        Self { map, record }
    }

    pub fn record(&self) -> &str {
        &self.record
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn mistyped(&self, field: &str, expected: &str, value: &Value) {
        log::warn!(
            "Record {}: field '{}' expected {}, found {}; using default",
            self.record,
            field,
            expected,
            value
        );
    }

    pub fn string(&self, field: &str) -> Option<String> {
        match self.present(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => {
                self.mistyped(field, "a string", other);
                None
            }
        }
    }

    pub fn string_or(&self, field: &str, default: &str) -> String {
        self.string(field)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn f64(&self, field: &str) -> Option<f64> {
        let value = self.present(field)?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Some(v),
            _ => {
                self.mistyped(field, "a number", value);
                None
            }
        }
    }

    pub fn u64(&self, field: &str) -> Option<u64> {
        let value = self.present(field)?;
        if let Some(n) = value.as_u64() {
            return Some(n);
        }
        match self.f64(field) {
            Some(v) if v >= 0.0 => Some(v.trunc() as u64),
            Some(_) => {
                self.mistyped(field, "a non-negative count", value);
                None
            }
            None => None,
        }
    }

    pub fn bool(&self, field: &str) -> Option<bool> {
        match self.present(field)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            other => {
                self.mistyped(field, "a boolean", other);
                None
            }
        }
    }

    /// Missing, null and empty values are `None` without a warning; strings
    /// that fail to parse are logged.
    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        let value = self.present(field)?;
        match value {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => {
                let parsed = parse_timestamp(s);
                if parsed.is_none() {
                    log::warn!(
                        "Record {}: invalid timestamp '{}' in field '{}'",
                        self.record,
                        s,
                        field
                    );
                }
                parsed
            }
            other => {
                self.mistyped(field, "an ISO-8601 string", other);
                None
            }
        }
    }

    pub fn value(&self, field: &str) -> Option<Value> {
        self.present(field).cloned()
    }

    pub fn string_list(&self, field: &str) -> Vec<String> {
        match self.present(field) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(other) => {
                self.mistyped(field, "a list of strings", other);
                Vec::new()
            }
        }
    }

    pub fn array(&self, field: &str) -> Vec<Value> {
        match self.present(field) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                self.mistyped(field, "a list", other);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn reader(value: &Value) -> FieldReader<'_> {
        FieldReader::new(value.as_object().unwrap(), "job_id")
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp("2024-03-01T10:15:30.250+00:00").unwrap();
        assert_eq!(rfc.hour(), 10);
        let naive = parse_timestamp("2024-03-01T10:15:30.123456").unwrap();
        assert_eq!(naive.day(), 1);
        let spaced = parse_timestamp("2024-03-01 10:15:30").unwrap();
        assert_eq!(spaced.minute(), 15);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_timestamp_round_trip_is_exact() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(&format_timestamp(&now)), Some(now));
    }

    #[test]
    fn test_lenient_numbers() {
        let record = json!({
            "job_id": "j1",
            "a": 12,
            "b": "7",
            "c": 3.9,
            "d": -2,
            "e": "many",
            "f": null,
        });
        let r = reader(&record);
        assert_eq!(r.u64("a"), Some(12));
        assert_eq!(r.u64("b"), Some(7));
        assert_eq!(r.u64("c"), Some(3));
        assert_eq!(r.u64("d"), None);
        assert_eq!(r.u64("e"), None);
        assert_eq!(r.u64("f"), None);
        assert_eq!(r.u64("missing"), None);
        assert_eq!(r.f64("b"), Some(7.0));
    }

    #[test]
    fn test_lenient_strings_and_lists() {
        let record = json!({
            "job_id": "j1",
            "name": 42,
            "obj": {"x": 1},
            "list": ["a", 1, null],
            "single": "w",
        });
        let r = reader(&record);
        assert_eq!(r.record(), "j1");
        assert_eq!(r.string("name").as_deref(), Some("42"));
        assert_eq!(r.string("obj"), None);
        assert_eq!(r.string_or("missing", "unknown"), "unknown");
        assert_eq!(r.string_list("list"), vec!["a".to_string(), "1".to_string()]);
        assert_eq!(r.string_list("single"), vec!["w".to_string()]);
    }
}
