//! Line-delimited JSON files.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use squad_core::Result;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Append `value` as one line, creating parent directories as needed.
///
/// The line is written with a single `write_all` on an `O_APPEND` handle, so
/// concurrent appenders interleave whole lines.
pub async fn append_jsonl<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Every parseable line of `path`, in order.
///
/// A missing file reads as empty. Lines that are not valid JSON, including a
/// torn final line cut inside a multi-byte character, are skipped.
pub async fn read_jsonl_values(path: &Path) -> Result<Vec<Value>> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut rows = Vec::new();
    for (line_num, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) if !value.is_null() => rows.push(value),
            Ok(_) => {}
            Err(e) => {
                debug!(
                    "Skipping malformed line {} in {}: {}",
                    line_num + 1,
                    path.display(),
                    e
                );
            }
        }
    }
    Ok(rows)
}

/// Convert rows to `T`, dropping the ones that do not fit.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, source: &Path) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping invalid record in {}: {}", source.display(), e);
                None
            }
        })
        .collect()
}

/// [`read_jsonl_values`] decoded into `T`.
pub async fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let rows = read_jsonl_values(path).await?;
    Ok(decode_rows(rows, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
        v: u32,
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let rows = read_jsonl_values(&temp.path().join("absent.jsonl")).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_append_creates_parents_and_keeps_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a/b/rows.jsonl");
        append_jsonl(&path, &json!({"id": "a", "v": 1})).await.unwrap();
        append_jsonl(&path, &json!({"id": "b", "v": 2})).await.unwrap();

        let rows: Vec<Row> = read_jsonl(&path).await.unwrap();
        assert_eq!(
            rows,
            vec![
                Row { id: "a".into(), v: 1 },
                Row { id: "b".into(), v: 2 }
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rows.jsonl");
        tokio::fs::write(&path, "{\"id\":\"a\",\"v\":1}\nnot json\n\n{\"id\":\"b\"}\n{\"id\":\"c\",\"v\":3}\n")
            .await
            .unwrap();

        assert_eq!(read_jsonl_values(&path).await.unwrap().len(), 3);
        let rows: Vec<Row> = read_jsonl(&path).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].id, "c");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rows.jsonl");
        let mut content = b"{\"id\":\"a\",\"v\":1}\n".to_vec();
        content.extend_from_slice(b"{\"id\":\"torn\",\"title\":\"caf\xc3");
        content.extend_from_slice(b"\n{\"id\":\"b\",\"v\":2}\n");
        tokio::fs::write(&path, content).await.unwrap();

        let rows: Vec<Row> = read_jsonl(&path).await.unwrap();
        assert_eq!(
            rows,
            vec![
                Row { id: "a".into(), v: 1 },
                Row { id: "b".into(), v: 2 }
            ]
        );
    }
}
