//! Row/column view of a decoded shipment file.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};

use super::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

impl DataFormat {
    /// Picks the decoder from the declared MIME type, then the extension.
    pub fn detect(filename: &str, mime_type: &str) -> Option<Self> {
        let mime = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/csv" | "application/csv" | "text/comma-separated-values" => {
                return Some(DataFormat::Csv)
            }
            "application/json" | "text/json" => return Some(DataFormat::Json),
            _ => {}
        }

        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Some(DataFormat::Csv),
            Some("json") => Some(DataFormat::Json),
            _ => None,
        }
    }
}

/// Headers plus string cells; every row has exactly one cell per header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularData {
    pub fn decode(filename: &str, mime_type: &str, content: &[u8]) -> Result<Self, PipelineError> {
        match DataFormat::detect(filename, mime_type) {
            Some(DataFormat::Csv) => Self::from_csv(content),
            Some(DataFormat::Json) => Self::from_json(filename, content),
            None => Err(PipelineError::UnsupportedFormat {
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
            }),
        }
    }

    /// Parses CSV with a header row. Blank rows are skipped and short rows
    /// padded.
    pub fn from_csv(content: &[u8]) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                if h.is_empty() {
                    format!("column_{}", i + 1)
                } else {
                    h.to_string()
                }
            })
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Accepts an array of objects or a single object. Nested objects are
    /// flattened into dotted column names.
    pub fn from_json(filename: &str, content: &[u8]) -> Result<Self, PipelineError> {
        let value: Value = serde_json::from_slice(content)?;
        let objects = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            other => {
                return Err(PipelineError::Parse {
                    filename: filename.to_string(),
                    reason: format!("expected an array of objects, found {}", json_kind(&other)),
                })
            }
        };

        let mut data = TabularData::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        for item in objects {
            let Value::Object(map) = item else {
                return Err(PipelineError::Parse {
                    filename: filename.to_string(),
                    reason: format!("expected objects, found {}", json_kind(&item)),
                });
            };
            let mut cells = Vec::new();
            flatten("", &map, &mut cells);

            let mut row = vec![String::new(); data.headers.len()];
            for (column, cell) in cells {
                let slot = *index.entry(column.clone()).or_insert_with(|| {
                    data.headers.push(column);
                    data.headers.len() - 1
                });
                if slot >= row.len() {
                    row.resize(slot + 1, String::new());
                }
                row[slot] = cell;
            }
            data.rows.push(row);
        }

        let width = data.headers.len();
        for row in &mut data.rows {
            row.resize(width, String::new());
        }
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column position by name, ignoring case and surrounding whitespace.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.find_column(column)?;
        self.rows.get(row).map(|r| r[index].as_str())
    }

    /// Rows as JSON objects keyed by header.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .zip(row)
                    .map(|(h, v)| (h.clone(), Value::from(v.clone())))
                    .collect()
            })
            .collect()
    }
}

fn flatten(prefix: &str, map: &Map<String, Value>, out: &mut Vec<(String, String)>) {
    for (key, value) in map {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) => flatten(&column, inner, out),
            Value::String(s) => out.push((column, s.clone())),
            Value::Null => out.push((column, String::new())),
            other => out.push((column, other.to_string())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
