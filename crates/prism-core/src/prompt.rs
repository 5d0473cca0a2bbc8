//! Prompt store: resolves prompt identifiers to prompt text.
//!
//! Templates are read from a [`PromptSource`] on first use and cached until
//! explicitly invalidated. Concurrent loads of the same id may both hit the
//! source; the first one to finish wins and every caller sees the same text.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

/// A loaded prompt. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub id: String,
    pub text: String,
    pub loaded_at: SystemTime,
}

/// Backing storage for prompt text.
#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Fetch the raw text for `id`. Must return `PromptNotFound` when absent.
    async fn fetch(&self, id: &str) -> PipelineResult<String>;
}

/// Prompts stored as `<dir>/<id>.<extension>` files.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    extension: String,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        if self.extension.is_empty() {
            self.dir.join(id)
        } else {
            self.dir.join(format!("{id}.{}", self.extension))
        }
    }
}

#[async_trait]
impl PromptSource for DirectorySource {
    async fn fetch(&self, id: &str) -> PipelineResult<String> {
        let path = self.path_for(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PipelineError::PromptNotFound { id: id.to_string() })
            }
            Err(e) => Err(PipelineError::PromptRead {
                id: id.to_string(),
                message: format!("{}: {e}", path.display()),
            }),
        }
    }
}

/// Prompts held in memory, e.g. compiled into the binary.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    prompts: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.prompts.insert(id.into(), text.into());
        self
    }
}

#[async_trait]
impl PromptSource for StaticSource {
    async fn fetch(&self, id: &str) -> PipelineResult<String> {
        self.prompts
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::PromptNotFound { id: id.to_string() })
    }
}

/// Caching front for a [`PromptSource`].
pub struct PromptStore {
    source: Arc<dyn PromptSource>,
    cache: RwLock<HashMap<String, Arc<PromptTemplate>>>,
}

impl PromptStore {
    pub fn new(source: Arc<dyn PromptSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Store backed by the configured prompt directory.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(DirectorySource::new(
            config.prompts_dir(),
            &config.prompts.extension,
        )))
    }

    /// Resolve a prompt, reading storage only on the first call per id.
    pub async fn load(&self, id: &str) -> PipelineResult<Arc<PromptTemplate>> {
        validate_id(id)?;

        if let Some(cached) = self.cached(id) {
            return Ok(cached);
        }

        let text = self.source.fetch(id).await?;
        let template = Arc::new(PromptTemplate {
            id: id.to_string(),
            text,
            loaded_at: SystemTime::now(),
        });

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let entry = cache.entry(id.to_string()).or_insert(template);
        tracing::info!(prompt_id = id, chars = entry.text.len(), "Loaded prompt");
        Ok(entry.clone())
    }

    /// Forget a cached prompt; the next `load` reads storage again.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some();
        if removed {
            tracing::debug!(prompt_id = id, "Invalidated prompt");
        }
        removed
    }

    /// Forget every cached prompt.
    pub fn invalidate_all(&self) {
        self.cache.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Invalidate and load again.
    pub async fn reload(&self, id: &str) -> PipelineResult<Arc<PromptTemplate>> {
        self.invalidate(id);
        self.load(id).await
    }

    /// Ids currently cached.
    pub fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn cached(&self, id: &str) -> Option<Arc<PromptTemplate>> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

/// Ids are logical names, never paths.
fn validate_id(id: &str) -> PipelineResult<()> {
    let bad = id.trim().is_empty()
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if bad {
        return Err(PipelineError::PromptNotFound { id: id.to_string() });
    }
    Ok(())
}
