use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub String);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub make: String,
    pub model: String,
    pub storage: String,
    pub category: CategoryId,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Text the matcher scores manifest rows against.
    pub fn label(&self) -> String {
        [self.make.trim(), self.model.trim(), self.storage.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.category, &self.make, &self.model, &self.storage)
    }
}

/// Case-insensitive uniqueness key for a catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub category: String,
    pub make: String,
    pub model: String,
    pub storage: String,
}

impl DeviceKey {
    pub fn new(category: &CategoryId, make: &str, model: &str, storage: &str) -> Self {
        Self {
            category: category.0.trim().to_ascii_lowercase(),
            make: make.trim().to_ascii_lowercase(),
            model: model.trim().to_ascii_lowercase(),
            storage: storage.trim().to_ascii_lowercase().replace(' ', ""),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDevice {
    pub make: String,
    pub model: String,
    pub storage: String,
    pub category: CategoryId,
}

impl NewDevice {
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.category, &self.make, &self.model, &self.storage)
    }
}
