use anyhow::Context as _;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ConversationStore;
use crate::conversation::Context;
use crate::error::{LoanflowError, Result};

/// Keeps saved conversations in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<HashMap<String, Context>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.saved.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl ConversationStore for MemoryStore {
    async fn save(&self, context: &Context) -> Result<()> {
        self.saved
            .lock()
            .insert(context.id.clone(), context.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Context>> {
        Ok(self.saved.lock().get(id).cloned())
    }
}

/// One pretty-printed JSON file per conversation
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new_in(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let file_stem: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root_dir.join(format!("{}.json", file_stem))
    }

    async fn write(&self, context: &Context) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(context)
            .context("Failed to serialize conversation")?;
        atomic_write(&self.path_for(&context.id), content.as_bytes()).await
    }

    async fn read(&self, id: &str) -> anyhow::Result<Option<Context>> {
        let path = self.path_for(id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read conversation file: {:?}", path))?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        let context = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse conversation file: {:?}", path))?;
        Ok(Some(context))
    }
}

#[async_trait::async_trait]
impl ConversationStore for JsonFileStore {
    async fn save(&self, context: &Context) -> Result<()> {
        self.write(context)
            .await
            .map_err(|e| LoanflowError::Persistence {
                id: context.id.clone(),
                message: format!("{:#}", e),
            })
    }

    async fn load(&self, id: &str) -> Result<Option<Context>> {
        self.read(id).await.map_err(|e| LoanflowError::Persistence {
            id: id.to_string(),
            message: format!("{:#}", e),
        })
    }
}

async fn atomic_write(dest: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = dest
        .parent()
        .context("Destination path has no parent directory")?;
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("Failed to create parent dir: {:?}", parent))?;

    let tmp = dest.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write temp file: {:?}", tmp))?;

    if let Err(rename_err) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(rename_err).context("Failed to rename temp file into place");
    }
    Ok(())
}
