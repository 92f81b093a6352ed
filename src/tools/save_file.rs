use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::{fs, io::AsyncWriteExt};

use crate::error::{MeetprepError, Result};
use crate::security::sanitize_filename;
use crate::tool::{required_str, Tool};

/// Appends timestamped research blocks to a text file.
///
/// An optional `filename` argument is reduced to a bare, sanitized file name
/// placed next to the default output file.
pub struct SaveTextTool {
    default_path: PathBuf,
}

impl SaveTextTool {
    pub fn new(default_path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: default_path.into(),
        }
    }

    fn resolve(&self, filename: Option<&str>) -> PathBuf {
        match filename {
            Some(name) if !name.trim().is_empty() => {
                let safe = sanitize_filename(name);
                match self.default_path.parent() {
                    Some(dir) => dir.join(safe),
                    None => PathBuf::from(safe),
                }
            }
            _ => self.default_path.clone(),
        }
    }
}

pub(crate) fn format_block(data: &str, timestamp: &str) -> String {
    format!("--- Research Output ---\nTimestamp: {timestamp}\n\n{data}\n\n")
}

#[async_trait]
impl Tool for SaveTextTool {
    fn name(&self) -> &str {
        "save_text_to_file"
    }

    fn description(&self) -> &str {
        "Save structured research data to a text file."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "data": {"type": "string"},
                "filename": {"type": "string", "description": "Optional file name"}
            },
            "required": ["data"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let data = required_str(&input, "data", "save_text_to_file")?;
        let path = self.resolve(input.get("filename").and_then(Value::as_str));
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| MeetprepError::tool(self.name(), err))?;
        file.write_all(format_block(data, &timestamp).as_bytes())
            .await
            .map_err(|err| MeetprepError::tool(self.name(), err))?;

        Ok(json!(format!("Data successfully saved to {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SaveTextTool::new(dir.path().join("research_output.txt"));

        tool.call(json!({"data": "first"})).await.unwrap();
        let out = tool.call(json!({"data": "second"})).await.unwrap();
        assert!(out.as_str().unwrap().starts_with("Data successfully saved to"));

        let written = std::fs::read_to_string(dir.path().join("research_output.txt")).unwrap();
        assert_eq!(written.matches("--- Research Output ---").count(), 2);
        assert!(written.find("first").unwrap() < written.find("second").unwrap());
    }

    #[tokio::test]
    async fn custom_filename_stays_in_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SaveTextTool::new(dir.path().join("research_output.txt"));

        tool.call(json!({"data": "x", "filename": "../../etc/passwd"}))
            .await
            .unwrap();

        assert!(dir.path().join("etcpasswd").exists());
    }

    #[test]
    fn block_layout() {
        assert_eq!(
            format_block("body", "2024-01-01 10:00:00"),
            "--- Research Output ---\nTimestamp: 2024-01-01 10:00:00\n\nbody\n\n"
        );
    }
}
