//! Directory-tree key/value storage
//!
//! Every persisted record (apps, components, jobs, kubes, nodes) lives in a
//! [`KeyedStore`]. Keys are `/`-separated paths; directories are implicit
//! parents of values and can also be created explicitly.
//!
//! - Compare-and-swap for optimistic concurrency (job claiming)
//! - Ordered key creation for job ids
//! - [`LocalStore`]: in-memory tree with optional JSON snapshot persistence

mod local;


pub use local::{LocalStore, LocalStoreConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a keyed store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("store persistence failed: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// A single key as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNode {
    pub key: String,
    /// `None` for directories
    pub value: Option<String>,
    pub dir: bool,
}

impl StoreNode {
    /// Last path segment of the key
    pub fn name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Directory-tree key/value storage contract
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Create a value; fails if the key already exists
    async fn create(&self, key: &str, value: &str) -> Result<StoreNode, StoreError>;

    /// Read a value or directory
    async fn get(&self, key: &str) -> Result<StoreNode, StoreError>;

    /// Replace an existing value
    async fn update(&self, key: &str, value: &str) -> Result<StoreNode, StoreError>;

    /// Delete a value or a whole directory subtree
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Direct children of a directory in key order
    async fn list(&self, dir: &str) -> Result<Vec<StoreNode>, StoreError>;

    /// Create a directory if it does not exist yet
    async fn create_directory(&self, key: &str) -> Result<(), StoreError>;

    /// Replace the value only if it currently equals `prev`.
    ///
    /// Returns `Ok(false)` when the current value differs.
    async fn compare_and_swap(&self, key: &str, prev: &str, new: &str)
        -> Result<bool, StoreError>;

    /// Create a value under `dir` with a generated, monotonically increasing name
    async fn create_in_order(&self, dir: &str, value: &str) -> Result<StoreNode, StoreError>;
}

/// Normalize a key to `/a/b/c` form
pub(crate) fn normalize_key(key: &str) -> Result<String, StoreError> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Parent directory of a normalized key, `None` for the root
pub(crate) fn parent_key(key: &str) -> Option<String> {
    if key == "/" {
        return None;
    }
    match key.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(key[..idx].to_string()),
        None => None,
    }
}
