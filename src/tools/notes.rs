//! Key-value notes about the user, persisted as a single JSON object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::{MeetprepError, Result};
use crate::tool::{required_str, Tool, ToolRegistry};

/// Read-modify-write access to the notes file is serialized through `lock`.
pub struct NoteStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                MeetprepError::Storage(format!(
                    "notes file `{}` is corrupt: {err}",
                    self.path.display()
                ))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut notes = self.read_all().await?;
        notes.insert(key.to_string(), value.to_string());
        let serialized = serde_json::to_string_pretty(&notes)?;
        fs::write(&self.path, serialized).await?;
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    pub async fn list(&self) -> Result<BTreeMap<String, String>> {
        let _guard = self.lock.lock().await;
        self.read_all().await
    }
}

pub fn notes_toolkit(store: Arc<NoteStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(SaveInfoTool(store.clone()));
    registry.register(LoadInfoTool(store.clone()));
    registry.register(ListInfoTool(store));
    registry
}

struct SaveInfoTool(Arc<NoteStore>);

#[async_trait]
impl Tool for SaveInfoTool {
    fn name(&self) -> &str {
        "save_info"
    }

    fn description(&self) -> &str {
        "Remember a piece of information about the user under a key."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "key": {"type": "string"},
                "value": {"type": "string"}
            },
            "required": ["key", "value"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let key = required_str(&input, "key", "save_info")?;
        let value = required_str(&input, "value", "save_info")?;
        self.0.save(key, value).await?;
        Ok(json!(format!("Saved `{key}`")))
    }
}

struct LoadInfoTool(Arc<NoteStore>);

#[async_trait]
impl Tool for LoadInfoTool {
    fn name(&self) -> &str {
        "load_info"
    }

    fn description(&self) -> &str {
        "Recall a previously saved piece of information by key."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let key = required_str(&input, "key", "load_info")?;
        Ok(match self.0.load(key).await? {
            Some(value) => json!({ "key": key, "value": value }),
            None => json!(format!("No information saved under `{key}`")),
        })
    }
}

struct ListInfoTool(Arc<NoteStore>);

#[async_trait]
impl Tool for ListInfoTool {
    fn name(&self) -> &str {
        "list_info"
    }

    fn description(&self) -> &str {
        "List everything saved about the user. Takes no arguments."
    }

    async fn call(&self, _input: Value) -> Result<Value> {
        Ok(json!(self.0.list().await?))
    }
}
