//! Knowledge sources
//!
//! [`FileKnowledgeSource`] reads a module index and per-version detail files
//! from disk. [`CachedKnowledgeSource`] puts a moka cache in front of any
//! source.

use crate::capability::KnowledgeSource;
use crate::error::GatewayError;
use moka::future::Cache;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tf2avm_model::{module_key, KnowledgeIndex, ModuleDetail};

/// Index file plus a directory of `<module>_<version-with-dashes>.json` details
#[derive(Debug, Clone)]
pub struct FileKnowledgeSource {
    index_path: PathBuf,
    details_dir: PathBuf,
}

impl FileKnowledgeSource {
    #[must_use]
    pub fn new(index_path: impl Into<PathBuf>, details_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            details_dir: details_dir.into(),
        }
    }

    /// Path of the detail file for one module version
    #[must_use]
    pub fn detail_path(&self, name: &str, version: &str) -> PathBuf {
        self.details_dir.join(detail_file_name(name, version))
    }

    async fn read_index(&self) -> Result<KnowledgeIndex, GatewayError> {
        let bytes = tokio::fs::read(&self.index_path).await.map_err(|e| {
            GatewayError::KnowledgeUnavailable(format!("{}: {e}", self.index_path.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::KnowledgeUnavailable(format!("{}: {e}", self.index_path.display()))
        })
    }
}

/// `avm-res-network-virtualnetwork`, `0.7.1` -> `avm-res-network-virtualnetwork_0-7-1.json`
#[must_use]
pub fn detail_file_name(name: &str, version: &str) -> String {
    format!("{name}_{}.json", version.replace('.', "-"))
}

#[async_trait::async_trait]
impl KnowledgeSource for FileKnowledgeSource {
    async fn lookup_knowledge(
        &self,
        resource_types: &BTreeSet<String>,
        _use_cache: bool,
    ) -> Result<KnowledgeIndex, GatewayError> {
        let index = self.read_index().await?;
        Ok(index.restricted_to(resource_types))
    }

    async fn fetch_module_detail(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModuleDetail, GatewayError> {
        let path = self.detail_path(name, version);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::module_not_found(name, version))
            }
            Err(e) => {
                return Err(GatewayError::KnowledgeUnavailable(format!(
                    "{}: {e}",
                    path.display()
                )))
            }
        };
        let detail: ModuleDetail = serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::KnowledgeUnavailable(format!("{}: {e}", path.display()))
        })?;
        if detail.module_name != name || detail.version != version {
            return Err(GatewayError::module_not_found(name, version));
        }
        Ok(detail)
    }
}

/// Caching wrapper around any knowledge source
///
/// Index lookups are keyed by the requested resource types, details by
/// `<name>@<version>`. Entries expire after the configured TTL.
#[derive(Clone)]
pub struct CachedKnowledgeSource {
    inner: Arc<dyn KnowledgeSource>,
    indexes: Cache<String, KnowledgeIndex>,
    details: Cache<String, ModuleDetail>,
}

impl std::fmt::Debug for CachedKnowledgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedKnowledgeSource")
            .field("indexes", &self.indexes.entry_count())
            .field("details", &self.details.entry_count())
            .finish()
    }
}

impl CachedKnowledgeSource {
    /// Wrap `inner` with a cache whose entries live for `ttl`
    #[must_use]
    pub fn new(inner: Arc<dyn KnowledgeSource>, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner,
            indexes: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            details: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    fn index_key(resource_types: &BTreeSet<String>) -> String {
        resource_types.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

#[async_trait::async_trait]
impl KnowledgeSource for CachedKnowledgeSource {
    async fn lookup_knowledge(
        &self,
        resource_types: &BTreeSet<String>,
        use_cache: bool,
    ) -> Result<KnowledgeIndex, GatewayError> {
        let key = Self::index_key(resource_types);
        if !use_cache {
            let index = self.inner.lookup_knowledge(resource_types, false).await?;
            self.indexes.insert(key, index.clone()).await;
            return Ok(index);
        }
        self.indexes
            .try_get_with(key, self.inner.lookup_knowledge(resource_types, true))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn fetch_module_detail(
        &self,
        name: &str,
        version: &str,
    ) -> Result<ModuleDetail, GatewayError> {
        self.details
            .try_get_with(
                module_key(name, version),
                self.inner.fetch_module_detail(name, version),
            )
            .await
            .map_err(|e| (*e).clone())
    }
}

/// Write a detail file in the layout [`FileKnowledgeSource`] reads
pub async fn write_detail_file(dir: &Path, detail: &ModuleDetail) -> std::io::Result<PathBuf> {
    let path = dir.join(detail_file_name(&detail.module_name, &detail.version));
    let json = serde_json::to_vec_pretty(detail)?;
    tokio::fs::write(&path, json).await?;
    Ok(path)
}
