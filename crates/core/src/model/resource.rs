// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource identifiers

use crate::error::LockError;
use serde::{Deserialize, Serialize};

/// Kind of resource being locked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[default]
    Project,
    Workspace,
    Global,
    Custom,
}

/// Identifies a lockable resource
///
/// Two identifiers name the same resource exactly when all four fields are
/// equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    /// Repository full name, e.g. `owner/repo`
    pub namespace: String,
    /// Project path relative to the repository root
    pub path: String,
    pub workspace: String,
}

impl ResourceIdentifier {
    pub fn new(
        kind: ResourceType,
        namespace: impl Into<String>,
        path: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            kind,
            namespace: namespace.into(),
            path: if path.is_empty() { ".".to_string() } else { path },
            workspace: workspace.into(),
        }
    }

    /// A project/workspace pair, the common case
    pub fn project(
        namespace: impl Into<String>,
        path: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Self {
        Self::new(ResourceType::Project, namespace, path, workspace)
    }

    /// `namespace:path:workspace`, the suffix of store keys
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.path, self.workspace)
    }

    pub fn lock_key(&self, prefix: &str) -> String {
        format!("{}lock:{}", prefix, self.key())
    }

    pub fn queue_key(&self, prefix: &str) -> String {
        format!("{}queue:{}", prefix, self.key())
    }

    pub fn validate(&self) -> Result<(), LockError> {
        if self.namespace.trim().is_empty() {
            return Err(LockError::InvalidRequest(
                "repository name is required".to_string(),
            ));
        }
        if self.workspace.trim().is_empty() {
            return Err(LockError::InvalidRequest("workspace is required".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.path, self.workspace)
    }
}
