//! Upload validation and content previews.

use std::path::Path;

use anyhow::Context;
use serde_json::{Map, Value as JsonValue};

const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Csv,
    Json,
}

impl UploadKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            Some(Self::Csv)
        } else if lower.ends_with(".json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Csv => "CSV",
            Self::Json => "JSON",
        }
    }
}

/// Final path component of a client-supplied name, or `None` when nothing
/// usable is left.
pub fn safe_filename(raw: &str) -> Option<String> {
    let name = Path::new(raw.trim()).file_name()?.to_str()?;
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// First rows of a CSV (as header-keyed objects) or the first items of a JSON
/// array. Any other JSON document is returned whole.
pub fn preview(kind: UploadKind, bytes: &[u8]) -> anyhow::Result<JsonValue> {
    match kind {
        UploadKind::Csv => preview_csv(bytes),
        UploadKind::Json => {
            let value: JsonValue = serde_json::from_slice(bytes).context("parsing JSON upload")?;
            Ok(match value {
                JsonValue::Array(items) => {
                    JsonValue::Array(items.into_iter().take(PREVIEW_ROWS).collect())
                }
                other => other,
            })
        }
    }
}

fn preview_csv(bytes: &[u8]) -> anyhow::Result<JsonValue> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers().context("reading CSV header")?.clone();
    let mut rows = Vec::new();
    for record in reader.records().take(PREVIEW_ROWS) {
        let record = record.context("reading CSV row")?;
        let row: Map<String, JsonValue> = headers
            .iter()
            .zip(record.iter())
            .map(|(key, value)| (key.to_string(), JsonValue::String(value.to_string())))
            .collect();
        rows.push(JsonValue::Object(row));
    }
    Ok(JsonValue::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_follows_extension() {
        assert_eq!(UploadKind::from_filename("q.CSV"), Some(UploadKind::Csv));
        assert_eq!(UploadKind::from_filename("data.json"), Some(UploadKind::Json));
        assert_eq!(UploadKind::from_filename("notes.txt"), None);
    }

    #[test]
    fn filenames_lose_directories() {
        assert_eq!(safe_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_filename("q.csv").as_deref(), Some("q.csv"));
        assert_eq!(safe_filename(".."), None);
        assert_eq!(safe_filename(""), None);
    }

    #[test]
    fn csv_preview_keys_rows_by_header() {
        let csv = b"name,qty\na,1\nb,2\nc,3\nd,4\ne,5\nf,6\n";
        let preview = preview(UploadKind::Csv, csv).unwrap();
        let rows = preview.as_array().unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], json!({"name": "a", "qty": "1"}));
    }

    #[test]
    fn json_preview_truncates_arrays_only() {
        let list = serde_json::to_vec(&json!([1, 2, 3, 4, 5, 6, 7])).unwrap();
        assert_eq!(preview(UploadKind::Json, &list).unwrap(), json!([1, 2, 3, 4, 5]));

        let object = serde_json::to_vec(&json!({"k": "v"})).unwrap();
        assert_eq!(preview(UploadKind::Json, &object).unwrap(), json!({"k": "v"}));

        assert!(preview(UploadKind::Json, b"{not json").is_err());
    }
}
