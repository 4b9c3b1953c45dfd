//! Cloud providers
//!
//! A [`Provider`] turns stored Kube and Node records into cloud resources.
//! Every operation is written to be re-run: it inspects the record's
//! [`crate::models::ResourceState`]s, creates only what is missing and
//! persists identifiers as soon as they are known.

pub mod aws;
pub mod discovery;
pub mod userdata;

pub use discovery::{EtcdDiscovery, HttpEtcdDiscovery, StaticEtcdDiscovery};
pub use userdata::{CloudConfigRenderer, UserdataRenderer};

use crate::models::{Kube, Node};
use crate::procedure::ActionStatus;
use anyhow::Result;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Check that the configured credentials can reach the cloud
    async fn validate_account(&self) -> Result<()>;

    async fn create_kube(&self, kube: &mut Kube, status: &ActionStatus) -> Result<()>;

    async fn delete_kube(&self, kube: &mut Kube) -> Result<()>;

    async fn create_node(&self, node: &mut Node, status: &ActionStatus) -> Result<()>;

    async fn delete_node(&self, node: &mut Node) -> Result<()>;
}

/// Lowercase alphanumeric string of `len` characters
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Name for a new worker node of `kube_name`
pub fn minion_name(kube_name: &str) -> String {
    format!("{}-minion-{}", kube_name, random_suffix(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_is_lowercase() {
        let suffix = random_suffix(10);
        assert_eq!(suffix.len(), 10);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_minion_name() {
        let name = minion_name("prod");
        assert!(name.starts_with("prod-minion-"));
        assert_eq!(name.len(), "prod-minion-".len() + 5);
    }
}
