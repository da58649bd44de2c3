// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Identity
//!
//! [`ApplicationId`] is the registry key for one logical hosted application.
//! Comparison and hashing are ASCII case-insensitive so `/App` and `/app`
//! resolve to the same slot; the original spelling is kept for display.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationId(String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a stable id from the virtual path, physical path and optional site.
    ///
    /// The same triple always yields the same id, independent of the casing
    /// of either path.
    pub fn from_paths(virtual_path: &str, physical_path: &str, site: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(virtual_path.to_ascii_lowercase().as_bytes());
        hasher.update(physical_path.to_ascii_lowercase().as_bytes());
        if let Some(site) = site.filter(|s| !s.is_empty()) {
            hasher.update(site.to_ascii_lowercase().as_bytes());
        }
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ApplicationId {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ApplicationId {}

impl Hash for ApplicationId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApplicationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApplicationId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Key of a well-known object inside one execution context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WellKnownKey(pub String);

impl WellKnownKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WellKnownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_case_insensitive_equality_and_hash() {
        let mut map = HashMap::new();
        map.insert(ApplicationId::new("/LM/W3SVC/1/ROOT"), 1);
        assert_eq!(map.get(&ApplicationId::new("/lm/w3svc/1/root")), Some(&1));
        assert_ne!(ApplicationId::new("/app"), ApplicationId::new("/app2"));
    }

    #[test]
    fn test_from_paths_is_stable() {
        let a = ApplicationId::from_paths("/shop", "/srv/www/shop", Some("1"));
        let b = ApplicationId::from_paths("/SHOP", "/srv/www/shop", Some("1"));
        let c = ApplicationId::from_paths("/shop", "/srv/www/shop", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }
}
