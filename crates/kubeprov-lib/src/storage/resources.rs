//! Key layout of every stored resource type

use crate::models::{
    App, Component, Environment, ImageRepo, Kube, Meta, Node, Release, Service,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record stored at `{collection(scope)}/{name}`
pub trait Resource: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Resource kind used in errors and logs
    const KIND: &'static str;

    /// Number of parent names in the key path
    const SCOPE_DEPTH: usize;

    /// Directory holding all resources of this scope
    fn collection(scope: &[&str]) -> String;

    fn name(&self) -> &str;

    fn meta_mut(&mut self) -> &mut Meta;

    /// Directories created with the resource and removed with it
    fn owned_subtrees(_scope: &[&str], _name: &str) -> Vec<String> {
        Vec::new()
    }
}

impl Resource for App {
    const KIND: &'static str = "app";
    const SCOPE_DEPTH: usize = 0;

    fn collection(_scope: &[&str]) -> String {
        "/apps".to_string()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn owned_subtrees(_scope: &[&str], name: &str) -> Vec<String> {
        vec![format!("/components/{}", name), format!("/releases/{}", name)]
    }
}

impl Resource for Component {
    const KIND: &'static str = "component";
    const SCOPE_DEPTH: usize = 1;

    fn collection(scope: &[&str]) -> String {
        format!("/components/{}", scope[0])
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn owned_subtrees(scope: &[&str], name: &str) -> Vec<String> {
        vec![format!("/releases/{}/{}", scope[0], name)]
    }
}

impl Resource for Environment {
    const KIND: &'static str = "environment";
    const SCOPE_DEPTH: usize = 0;

    fn collection(_scope: &[&str]) -> String {
        "/environments".to_string()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn owned_subtrees(_scope: &[&str], name: &str) -> Vec<String> {
        vec![format!("/services/{}", name)]
    }
}

impl Resource for Service {
    const KIND: &'static str = "service";
    const SCOPE_DEPTH: usize = 1;

    fn collection(scope: &[&str]) -> String {
        format!("/services/{}", scope[0])
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }
}

impl Resource for Release {
    const KIND: &'static str = "release";
    const SCOPE_DEPTH: usize = 2;

    fn collection(scope: &[&str]) -> String {
        format!("/releases/{}/{}", scope[0], scope[1])
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }
}

impl Resource for ImageRepo {
    const KIND: &'static str = "image repo";
    const SCOPE_DEPTH: usize = 0;

    fn collection(_scope: &[&str]) -> String {
        "/repos/dockerhub".to_string()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }
}

impl Resource for Kube {
    const KIND: &'static str = "kube";
    const SCOPE_DEPTH: usize = 0;

    fn collection(_scope: &[&str]) -> String {
        "/kubes".to_string()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn owned_subtrees(_scope: &[&str], name: &str) -> Vec<String> {
        vec![format!("/nodes/{}", name)]
    }
}

impl Resource for Node {
    const KIND: &'static str = "node";
    const SCOPE_DEPTH: usize = 1;

    fn collection(scope: &[&str]) -> String {
        format!("/nodes/{}", scope[0])
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }
}
