//! In-process keyed store
//!
//! Keeps the whole tree in an ordered map guarded by a single lock, which
//! makes compare-and-swap atomic for every caller sharing the instance.
//! With a persistence path configured, a JSON snapshot is written after
//! every mutation (temp file + rename) and loaded again on startup. A
//! mutation whose snapshot cannot be written is not applied.

use super::{normalize_key, parent_key, KeyedStore, StoreError, StoreNode};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Width of generated in-order keys, so lexicographic order is numeric order
const ORDERED_KEY_WIDTH: usize = 20;

/// Configuration for [`LocalStore`]
#[derive(Debug, Clone, Default)]
pub struct LocalStoreConfig {
    /// Snapshot file; `None` keeps the store purely in memory
    pub persistence_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Entry {
    Directory,
    Value(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tree {
    next_index: u64,
    entries: BTreeMap<String, Entry>,
}

impl Tree {
    fn node(&self, key: &str) -> Option<StoreNode> {
        if key == "/" {
            return Some(StoreNode {
                key: key.to_string(),
                value: None,
                dir: true,
            });
        }
        self.entries.get(key).map(|entry| match entry {
            Entry::Directory => StoreNode {
                key: key.to_string(),
                value: None,
                dir: true,
            },
            Entry::Value(value) => StoreNode {
                key: key.to_string(),
                value: Some(value.clone()),
                dir: false,
            },
        })
    }

    fn is_directory(&self, key: &str) -> bool {
        key == "/" || matches!(self.entries.get(key), Some(Entry::Directory))
    }

    /// Create every missing ancestor directory of `key`
    fn ensure_parents(&mut self, key: &str) -> Result<(), StoreError> {
        let mut ancestors = Vec::new();
        let mut current = parent_key(key);
        while let Some(dir) = current {
            if dir == "/" {
                break;
            }
            current = parent_key(&dir);
            ancestors.push(dir);
        }

        for dir in ancestors.into_iter().rev() {
            match self.entries.get(&dir) {
                Some(Entry::Directory) => {}
                Some(Entry::Value(_)) => return Err(StoreError::NotADirectory(dir)),
                None => {
                    self.entries.insert(dir, Entry::Directory);
                }
            }
        }
        Ok(())
    }

    fn children(&self, dir: &str) -> Vec<StoreNode> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };

        self.entries
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .filter_map(|(key, _)| self.node(key))
            .collect()
    }

    fn remove_subtree(&mut self, key: &str) {
        let prefix = format!("{}/", key);
        let doomed: Vec<String> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();

        for k in doomed {
            self.entries.remove(&k);
        }
        self.entries.remove(key);
    }
}

/// Keyed store held in process memory
pub struct LocalStore {
    tree: RwLock<Tree>,
    config: LocalStoreConfig,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Create an empty, memory-only store
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::default()),
            config: LocalStoreConfig::default(),
        }
    }

    /// Create a store, loading the snapshot if one exists
    pub fn with_config(config: LocalStoreConfig) -> Result<Self> {
        let tree = match &config.persistence_path {
            Some(path) if path.exists() => load_snapshot(path)?,
            _ => Tree::default(),
        };

        Ok(Self {
            tree: RwLock::new(tree),
            config,
        })
    }

    /// Number of keys (values and directories) currently stored
    pub async fn len(&self) -> usize {
        self.tree.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tree.read().await.entries.is_empty()
    }

    /// Apply `change` to a copy, write its snapshot, then swap it in
    fn commit<T>(
        &self,
        tree: &mut Tree,
        change: impl FnOnce(&mut Tree) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let Some(path) = &self.config.persistence_path else {
            return change(tree);
        };

        let mut next = tree.clone();
        let output = change(&mut next)?;
        save_snapshot(path, &next).map_err(|e| StoreError::Persistence(format!("{:#}", e)))?;
        *tree = next;
        Ok(output)
    }
}

#[async_trait]
impl KeyedStore for LocalStore {
    async fn create(&self, key: &str, value: &str) -> Result<StoreNode, StoreError> {
        let key = normalize_key(key)?;
        if key == "/" {
            return Err(StoreError::InvalidKey(key));
        }

        let mut tree = self.tree.write().await;
        if tree.entries.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        self.commit(&mut tree, |tree| {
            tree.ensure_parents(&key)?;
            tree.entries.insert(key.clone(), Entry::Value(value.to_string()));
            Ok(())
        })?;

        debug!(key = %key, "Created key");
        Ok(StoreNode {
            key,
            value: Some(value.to_string()),
            dir: false,
        })
    }

    async fn get(&self, key: &str) -> Result<StoreNode, StoreError> {
        let key = normalize_key(key)?;
        let tree = self.tree.read().await;
        tree.node(&key).ok_or(StoreError::NotFound(key))
    }

    async fn update(&self, key: &str, value: &str) -> Result<StoreNode, StoreError> {
        let key = normalize_key(key)?;
        let mut tree = self.tree.write().await;
        match tree.entries.get(&key) {
            Some(Entry::Value(_)) => {}
            Some(Entry::Directory) => return Err(StoreError::NotADirectory(key)),
            None => return Err(StoreError::NotFound(key)),
        }
        self.commit(&mut tree, |tree| {
            tree.entries.insert(key.clone(), Entry::Value(value.to_string()));
            Ok(())
        })?;

        Ok(StoreNode {
            key,
            value: Some(value.to_string()),
            dir: false,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let key = normalize_key(key)?;
        if key == "/" {
            return Err(StoreError::InvalidKey(key));
        }

        let mut tree = self.tree.write().await;
        if !tree.entries.contains_key(&key) {
            return Err(StoreError::NotFound(key));
        }
        self.commit(&mut tree, |tree| {
            tree.remove_subtree(&key);
            Ok(())
        })?;

        debug!(key = %key, "Deleted key");
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<StoreNode>, StoreError> {
        let dir = normalize_key(dir)?;
        let tree = self.tree.read().await;
        match tree.entries.get(&dir) {
            _ if dir == "/" => {}
            Some(Entry::Directory) => {}
            Some(Entry::Value(_)) => return Err(StoreError::NotADirectory(dir)),
            None => return Err(StoreError::NotFound(dir)),
        }
        Ok(tree.children(&dir))
    }

    async fn create_directory(&self, key: &str) -> Result<(), StoreError> {
        let key = normalize_key(key)?;
        let mut tree = self.tree.write().await;
        if tree.is_directory(&key) {
            return Ok(());
        }
        if tree.entries.contains_key(&key) {
            return Err(StoreError::NotADirectory(key));
        }
        self.commit(&mut tree, |tree| {
            tree.ensure_parents(&key)?;
            tree.entries.insert(key, Entry::Directory);
            Ok(())
        })
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        prev: &str,
        new: &str,
    ) -> Result<bool, StoreError> {
        let key = normalize_key(key)?;
        let mut tree = self.tree.write().await;
        match tree.entries.get(&key) {
            Some(Entry::Value(current)) if current == prev => {}
            Some(Entry::Value(_)) => return Ok(false),
            Some(Entry::Directory) => return Err(StoreError::NotADirectory(key)),
            None => return Err(StoreError::NotFound(key)),
        }
        self.commit(&mut tree, |tree| {
            tree.entries.insert(key, Entry::Value(new.to_string()));
            Ok(true)
        })
    }

    async fn create_in_order(&self, dir: &str, value: &str) -> Result<StoreNode, StoreError> {
        let dir = normalize_key(dir)?;
        let mut tree = self.tree.write().await;
        let key = self.commit(&mut tree, |tree| {
            if !tree.is_directory(&dir) {
                if tree.entries.contains_key(&dir) {
                    return Err(StoreError::NotADirectory(dir.clone()));
                }
                tree.ensure_parents(&dir)?;
                tree.entries.insert(dir.clone(), Entry::Directory);
            }

            tree.next_index += 1;
            let name = format!("{:0width$}", tree.next_index, width = ORDERED_KEY_WIDTH);
            let key = if dir == "/" {
                format!("/{}", name)
            } else {
                format!("{}/{}", dir, name)
            };
            tree.entries.insert(key.clone(), Entry::Value(value.to_string()));
            Ok(key)
        })?;

        Ok(StoreNode {
            key,
            value: Some(value.to_string()),
            dir: false,
        })
    }
}

fn save_snapshot(path: &Path, tree: &Tree) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec(tree).context("Failed to serialize store snapshot")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json)
        .context("Failed to write store snapshot")?;
    file.sync_all().context("Failed to sync store snapshot")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    Ok(())
}

fn load_snapshot(path: &Path) -> Result<Tree> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read snapshot {:?}", path))?;
    let tree: Tree =
        serde_json::from_slice(&data).context("Failed to deserialize store snapshot")?;

    info!(path = %path.display(), keys = tree.entries.len(), "Loaded store snapshot");
    Ok(tree)
}
