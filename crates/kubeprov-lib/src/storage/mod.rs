//! Typed repositories over the keyed store
//!
//! Each resource type maps to a path template such as `/apps/{name}` or
//! `/releases/{app}/{component}/{id}` and is stored as JSON. Parent names
//! are passed as a `scope` slice, outermost first.
//!
//! Deleting a resource also removes the subtrees it owns (an App owns its
//! components and releases). That cleanup is best-effort and not
//! transactional: a failure after the record is gone leaves orphans behind.

mod jobs;
mod resources;


pub use jobs::JobStorage;
pub use resources::Resource;

use crate::models::{App, Component, Environment, ImageRepo, Kube, Node, Release, Service};
use crate::store::{KeyedStore, StoreError};
use chrono::Utc;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by resource repositories
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} expects {expected} parent name(s), got {actual}")]
    Scope {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid {kind} name: {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("failed to encode {kind}: {source}")]
    Serialization {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    fn from_store(err: StoreError, kind: &'static str, name: &str) -> Self {
        match err {
            StoreError::NotFound(_) => StorageError::NotFound {
                kind,
                name: name.to_string(),
            },
            StoreError::AlreadyExists(_) => StorageError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            other => StorageError::Store(other),
        }
    }
}

pub type AppStorage = ResourceStorage<App>;
pub type ComponentStorage = ResourceStorage<Component>;
pub type EnvironmentStorage = ResourceStorage<Environment>;
pub type ServiceStorage = ResourceStorage<Service>;
pub type ReleaseStorage = ResourceStorage<Release>;
pub type ImageRepoStorage = ResourceStorage<ImageRepo>;
pub type KubeStorage = ResourceStorage<Kube>;
pub type NodeStorage = ResourceStorage<Node>;

/// CRUD repository for one resource type
pub struct ResourceStorage<R> {
    store: Arc<dyn KeyedStore>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceStorage<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> ResourceStorage<R> {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            store,
            _resource: PhantomData,
        }
    }

    fn check_scope(scope: &[&str]) -> Result<(), StorageError> {
        if scope.len() != R::SCOPE_DEPTH {
            return Err(StorageError::Scope {
                kind: R::KIND,
                expected: R::SCOPE_DEPTH,
                actual: scope.len(),
            });
        }
        for name in scope {
            check_name(R::KIND, name)?;
        }
        Ok(())
    }

    fn key(scope: &[&str], name: &str) -> Result<String, StorageError> {
        Self::check_scope(scope)?;
        check_name(R::KIND, name)?;
        Ok(format!("{}/{}", R::collection(scope), name))
    }

    fn encode(resource: &R) -> Result<String, StorageError> {
        serde_json::to_string(resource).map_err(|source| StorageError::Serialization {
            kind: R::KIND,
            source,
        })
    }

    fn decode(value: &str) -> Result<R, StorageError> {
        serde_json::from_str(value).map_err(|source| StorageError::Serialization {
            kind: R::KIND,
            source,
        })
    }

    /// Store a new resource and the placeholder directories it owns
    pub async fn create(&self, scope: &[&str], mut resource: R) -> Result<R, StorageError> {
        let key = Self::key(scope, resource.name())?;
        let meta = resource.meta_mut();
        if meta.created_at.is_none() {
            meta.created_at = Some(Utc::now());
        }

        let value = Self::encode(&resource)?;
        self.store
            .create(&key, &value)
            .await
            .map_err(|e| StorageError::from_store(e, R::KIND, resource.name()))?;

        for dir in R::owned_subtrees(scope, resource.name()) {
            self.store.create_directory(&dir).await?;
        }

        debug!(kind = R::KIND, key = %key, "Created resource");
        Ok(resource)
    }

    pub async fn get(&self, scope: &[&str], name: &str) -> Result<R, StorageError> {
        let key = Self::key(scope, name)?;
        let node = self
            .store
            .get(&key)
            .await
            .map_err(|e| StorageError::from_store(e, R::KIND, name))?;

        match node.value {
            Some(value) => Self::decode(&value),
            None => Err(StorageError::NotFound {
                kind: R::KIND,
                name: name.to_string(),
            }),
        }
    }

    /// All resources in the scope; empty when the collection does not exist
    pub async fn list(&self, scope: &[&str]) -> Result<Vec<R>, StorageError> {
        Self::check_scope(scope)?;
        let nodes = match self.store.list(&R::collection(scope)).await {
            Ok(nodes) => nodes,
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut resources = Vec::with_capacity(nodes.len());
        for node in nodes {
            if let Some(value) = node.value {
                resources.push(Self::decode(&value)?);
            }
        }
        Ok(resources)
    }

    pub async fn update(
        &self,
        scope: &[&str],
        name: &str,
        mut resource: R,
    ) -> Result<R, StorageError> {
        let key = Self::key(scope, name)?;
        resource.meta_mut().updated_at = Some(Utc::now());

        let value = Self::encode(&resource)?;
        self.store
            .update(&key, &value)
            .await
            .map_err(|e| StorageError::from_store(e, R::KIND, name))?;
        Ok(resource)
    }

    /// Update the resource, creating it when it does not exist yet
    pub async fn save(&self, scope: &[&str], resource: &R) -> Result<(), StorageError>
    where
        R: Clone,
    {
        match self.update(scope, resource.name(), resource.clone()).await {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound { .. }) => {
                self.create(scope, resource.clone()).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the resource, then every subtree it owns.
    ///
    /// Not transactional: the record is removed first and subtree failures
    /// are reported afterwards.
    pub async fn delete(&self, scope: &[&str], name: &str) -> Result<(), StorageError> {
        let key = Self::key(scope, name)?;
        self.store
            .delete(&key)
            .await
            .map_err(|e| StorageError::from_store(e, R::KIND, name))?;

        let mut first_error = None;
        for dir in R::owned_subtrees(scope, name) {
            match self.store.delete(&dir).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => {
                    warn!(kind = R::KIND, key = %dir, error = %e, "Failed to delete owned subtree");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn check_name(kind: &'static str, name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(StorageError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Every repository over one shared store
#[derive(Clone)]
pub struct Storage {
    pub apps: AppStorage,
    pub components: ComponentStorage,
    pub environments: EnvironmentStorage,
    pub services: ServiceStorage,
    pub releases: ReleaseStorage,
    pub image_repos: ImageRepoStorage,
    pub kubes: KubeStorage,
    pub nodes: NodeStorage,
    pub jobs: JobStorage,
}

impl Storage {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self {
            apps: ResourceStorage::new(store.clone()),
            components: ResourceStorage::new(store.clone()),
            environments: ResourceStorage::new(store.clone()),
            services: ResourceStorage::new(store.clone()),
            releases: ResourceStorage::new(store.clone()),
            image_repos: ResourceStorage::new(store.clone()),
            kubes: ResourceStorage::new(store.clone()),
            nodes: ResourceStorage::new(store.clone()),
            jobs: JobStorage::new(store),
        }
    }
}
