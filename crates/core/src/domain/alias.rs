use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceId;
use crate::matcher::normalize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasSource {
    Auto,
    Admin,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAlias {
    /// Normalized alias text; the lookup key.
    pub alias: String,
    pub device_id: DeviceId,
    pub created_by: AliasSource,
    pub created_at: DateTime<Utc>,
}

impl DeviceAlias {
    pub fn new(raw_text: &str, device_id: DeviceId, created_by: AliasSource) -> Self {
        Self { alias: normalize(raw_text), device_id, created_by, created_at: Utc::now() }
    }
}

/// Read-side view of the alias store keyed by normalized text.
///
/// Aliases are append-only, so several rows may share a key. The winner is the
/// newest admin alias, falling back to the newest auto alias.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliasIndex {
    entries: HashMap<String, DeviceAlias>,
}

impl AliasIndex {
    pub fn from_aliases<I>(aliases: I) -> Self
    where
        I: IntoIterator<Item = DeviceAlias>,
    {
        let mut index = Self::default();
        for alias in aliases {
            index.insert(alias);
        }
        index
    }

    pub fn insert(&mut self, alias: DeviceAlias) {
        if alias.alias.is_empty() {
            return;
        }
        match self.entries.get(&alias.alias) {
            Some(existing) if !supersedes(&alias, existing) => {}
            _ => {
                self.entries.insert(alias.alias.clone(), alias);
            }
        }
    }

    pub fn lookup(&self, normalized: &str) -> Option<&DeviceAlias> {
        self.entries.get(normalized)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn supersedes(candidate: &DeviceAlias, existing: &DeviceAlias) -> bool {
    match (candidate.created_by, existing.created_by) {
        (AliasSource::Admin, AliasSource::Auto) => true,
        (AliasSource::Auto, AliasSource::Admin) => false,
        _ => candidate.created_at >= existing.created_at,
    }
}
