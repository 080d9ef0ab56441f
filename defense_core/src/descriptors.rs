//! Process-wide cache of unit capability descriptors.
//!
//! Descriptors are fetched from the remote source the first time a type is
//! seen and then kept for the life of the process. Each one is also written
//! to `<dir>/<type>.yaml` so a restart can preload them without asking the
//! server again.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use defense_rpc::{EntitySource, RpcError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EWR_ATTRIBUTE: &str = "EWR";
pub const SAM_TR_ATTRIBUTE: &str = "SAM TR";

/// Default bound on one remote descriptor fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Capability attributes shared by every unit of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl UnitDescriptor {
    pub fn new(type_name: impl Into<String>, attributes: Vec<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes,
        }
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|value| value == attribute)
    }
}

#[derive(Debug, Error)]
pub enum DescriptorCacheError {
    #[error("failed to fetch descriptor for type '{type_name}' via unit '{unit_name}': {source}")]
    Fetch {
        type_name: String,
        unit_name: String,
        #[source]
        source: RpcError,
    },
    #[error("descriptor fetch for type '{type_name}' via unit '{unit_name}' timed out after {after:?}")]
    TimedOut {
        type_name: String,
        unit_name: String,
        after: Duration,
    },
    #[error("descriptor cache i/o at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode descriptor record {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to encode descriptor for '{type_name}': {source}")]
    Encode {
        type_name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File name used for the record of `type_name`.
pub fn record_file_name(type_name: &str) -> String {
    let mut sanitized: String = type_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push('_');
    }
    format!("{sanitized}.yaml")
}

/// Shared descriptor cache. Cloning shares the same entries.
#[derive(Debug, Clone)]
pub struct DescriptorCache {
    dir: PathBuf,
    fetch_timeout: Duration,
    entries: Arc<RwLock<HashMap<String, Arc<UnitDescriptor>>>>,
}

impl DescriptorCache {
    /// Open the cache rooted at `dir`, creating it if needed and loading every
    /// record already on disk.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DescriptorCacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| DescriptorCacheError::Io {
            path: dir.clone(),
            source,
        })?;

        let cache = Self {
            dir,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            entries: Arc::new(RwLock::new(HashMap::new())),
        };
        let loaded = cache.preload()?;
        tracing::info!(
            target: "air_defense::descriptors",
            dir = %cache.dir.display(),
            loaded,
            "descriptors.preloaded"
        );
        Ok(cache)
    }

    fn preload(&self) -> Result<usize, DescriptorCacheError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| DescriptorCacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut loaded = HashMap::new();
        for entry in read_dir {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    tracing::warn!(
                        target: "air_defense::descriptors",
                        error = %err,
                        "descriptors.preload_entry_failed"
                    );
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("yaml") {
                continue;
            }
            match read_record(&path) {
                Ok(descriptor) => {
                    loaded.insert(descriptor.type_name.clone(), Arc::new(descriptor));
                }
                Err(err) => {
                    tracing::warn!(
                        target: "air_defense::descriptors",
                        path = %path.display(),
                        error = %err,
                        "descriptors.record_skipped"
                    );
                }
            }
        }

        let count = loaded.len();
        self.entries.write().extend(loaded);
        Ok(count)
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<UnitDescriptor>> {
        self.entries.read().get(type_name).cloned()
    }

    /// Cached descriptor for `type_name`, fetching it through `unit_name` on a
    /// miss. Fetch failures and timeouts are returned and nothing is cached.
    pub async fn resolve(
        &self,
        source: &dyn EntitySource,
        type_name: &str,
        unit_name: &str,
    ) -> Result<Arc<UnitDescriptor>, DescriptorCacheError> {
        if let Some(descriptor) = self.get(type_name) {
            return Ok(descriptor);
        }

        let attributes =
            match tokio::time::timeout(self.fetch_timeout, source.unit_descriptor(unit_name)).await
            {
                Ok(Ok(attributes)) => attributes,
                Ok(Err(source)) => {
                    return Err(DescriptorCacheError::Fetch {
                        type_name: type_name.to_string(),
                        unit_name: unit_name.to_string(),
                        source,
                    })
                }
                Err(_) => {
                    return Err(DescriptorCacheError::TimedOut {
                        type_name: type_name.to_string(),
                        unit_name: unit_name.to_string(),
                        after: self.fetch_timeout,
                    })
                }
            };

        tracing::debug!(
            target: "air_defense::descriptors",
            type_name,
            unit = unit_name,
            attributes = ?attributes,
            "descriptors.fetched"
        );
        let descriptor = Arc::new(UnitDescriptor::new(type_name, attributes));

        if let Err(err) = self.persist(&descriptor).await {
            tracing::warn!(
                target: "air_defense::descriptors",
                type_name,
                error = %err,
                "descriptors.persist_failed"
            );
        }

        // Racing misses for one type overwrite each other; the last one wins.
        self.entries
            .write()
            .insert(type_name.to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    async fn persist(&self, descriptor: &UnitDescriptor) -> Result<(), DescriptorCacheError> {
        let encoded =
            serde_yaml::to_string(descriptor).map_err(|source| DescriptorCacheError::Encode {
                type_name: descriptor.type_name.clone(),
                source,
            })?;

        let file_name = record_file_name(&descriptor.type_name);
        let target = self.dir.join(&file_name);
        let temp = self.dir.join(format!(
            ".{file_name}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| DescriptorCacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
        tokio::fs::write(&temp, encoded)
            .await
            .map_err(|source| DescriptorCacheError::Io {
                path: temp.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(DescriptorCacheError::Io {
                path: target,
                source,
            });
        }
        Ok(())
    }
}

fn read_record(path: &Path) -> Result<UnitDescriptor, DescriptorCacheError> {
    let contents = fs::read_to_string(path).map_err(|source| DescriptorCacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut descriptor: UnitDescriptor =
        serde_yaml::from_str(&contents).map_err(|source| DescriptorCacheError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    if descriptor.type_name.is_empty() {
        // Older records carry only the attribute list.
        descriptor.type_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
    }
    Ok(descriptor)
}
