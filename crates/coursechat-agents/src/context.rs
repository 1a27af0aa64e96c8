use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coursechat_common::{ContextCategory, Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, ContentCache};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub relevant_urls: Vec<String>,
    pub category: ContextCategory,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl DocumentMetadata {
    /// Stand-in used when a document has no readable metadata.
    pub fn synthesized(category: ContextCategory) -> Self {
        Self {
            title: category.title(),
            last_updated: Utc::now(),
            relevant_urls: vec![format!("/{category}")],
            category,
            keywords: vec![category.as_str().to_string()],
            description: format!("Information about {category}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Backing store of named category documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_document(&self, category: ContextCategory) -> Result<String>;

    async fn read_metadata(&self, category: ContextCategory) -> Result<DocumentMetadata>;
}

/// Reads `<dir>/<category>.md` and `<dir>/<category>.meta.json`.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, category: ContextCategory) -> PathBuf {
        self.dir.join(format!("{category}.md"))
    }

    fn metadata_path(&self, category: ContextCategory) -> PathBuf {
        self.dir.join(format!("{category}.meta.json"))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn read_document(&self, category: ContextCategory) -> Result<String> {
        let path = self.document_path(category);
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("no document for category '{category}'"))
            } else {
                Error::Io(e)
            }
        })
    }

    async fn read_metadata(&self, category: ContextCategory) -> Result<DocumentMetadata> {
        let raw = tokio::fs::read_to_string(self.metadata_path(category)).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// In-process store, mainly for tests and embedding.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<ContextCategory, (String, Option<DocumentMetadata>)>>,
    reads: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(
        self,
        category: ContextCategory,
        content: impl Into<String>,
        metadata: Option<DocumentMetadata>,
    ) -> Self {
        self.insert(category, content, metadata);
        self
    }

    pub fn insert(
        &self,
        category: ContextCategory,
        content: impl Into<String>,
        metadata: Option<DocumentMetadata>,
    ) {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(category, (content.into(), metadata));
    }

    /// Number of `read_document` calls served.
    pub fn document_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_document(&self, category: ContextCategory) -> Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| Error::NotFound(format!("no document for category '{category}'")))
    }

    async fn read_metadata(&self, category: ContextCategory) -> Result<DocumentMetadata> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .and_then(|(_, metadata)| metadata.clone())
            .ok_or_else(|| Error::NotFound(format!("no metadata for category '{category}'")))
    }
}

/// Serves category documents, from cache when fresh.
pub struct ContextProvider {
    store: Arc<dyn DocumentStore>,
    cache: Arc<ContentCache<CachedDocument>>,
}

impl ContextProvider {
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<ContentCache<CachedDocument>>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<ContentCache<CachedDocument>> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Retrieve by raw category name. Unknown names fail with a validation
    /// error before the store is touched.
    pub async fn retrieve(&self, category: &str) -> Result<CachedDocument> {
        let category: ContextCategory = category.parse()?;
        self.retrieve_category(category).await
    }

    #[instrument(skip(self), fields(category = %category))]
    pub async fn retrieve_category(&self, category: ContextCategory) -> Result<CachedDocument> {
        if let Some(cached) = self.cache.get(category.as_str()) {
            debug!("context cache hit");
            return Ok(cached);
        }

        debug!("context cache miss, reading from store");
        let content = self.store.read_document(category).await?;

        let metadata = match self.store.read_metadata(category).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("metadata unavailable, synthesizing: {}", e);
                DocumentMetadata::synthesized(category)
            }
        };

        let document = CachedDocument { content, metadata };
        self.cache.set(category.as_str(), document.clone(), None);
        Ok(document)
    }

    pub fn invalidate(&self, category: ContextCategory) -> bool {
        self.cache.delete(category.as_str())
    }
}
