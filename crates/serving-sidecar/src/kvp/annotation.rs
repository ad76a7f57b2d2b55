//! Prioritized lookup of annotations.
//!
//! Some annotations were renamed over time. Objects can carry any spelling, so lookups go through
//! a [`KeyPriority`] which checks the candidates in a fixed order.
use std::collections::BTreeMap;

use crate::kvp::consts::{
    QUEUE_SIDECAR_RESOURCE_PERCENTAGE_KEY, QUEUE_SIDECAR_RESOURCE_PERCENTAGE_LEGACY_KEY,
};

/// The annotation which sets the queue sidecar resources to a percentage of the user container
/// resources.
pub const QUEUE_SIDECAR_RESOURCE_PERCENTAGE: KeyPriority = KeyPriority::new(&[
    QUEUE_SIDECAR_RESOURCE_PERCENTAGE_KEY,
    QUEUE_SIDECAR_RESOURCE_PERCENTAGE_LEGACY_KEY,
]);

/// An ordered list of candidate keys. The first key present in a map wins, regardless of the
/// iteration order of the map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyPriority(&'static [&'static str]);

impl KeyPriority {
    pub const fn new(keys: &'static [&'static str]) -> Self {
        Self(keys)
    }

    /// The preferred key, which should be used when writing.
    pub fn key(&self) -> Option<&'static str> {
        self.0.first().copied()
    }

    /// Returns the first present key together with its value.
    pub fn get<'a>(&self, map: &'a BTreeMap<String, String>) -> Option<(&'static str, &'a str)> {
        self.0
            .iter()
            .find_map(|key| map.get(*key).map(|value| (*key, value.as_str())))
    }

    /// Like [`KeyPriority::get`], but for optional maps as found in `ObjectMeta`.
    pub fn get_opt<'a>(
        &self,
        map: Option<&'a BTreeMap<String, String>>,
    ) -> Option<(&'static str, &'a str)> {
        map.and_then(|map| self.get(map))
    }
}
