//
// resolver.rs
// Dicom-Volume-Tools-rs
//
// Merges command-line overrides, a header store and source defaults into one effective attribute set.
//
// Thales Matheus Mendonça Santos - November 2025

use crate::attributes::{AttributeKey, AttributeSet};
use crate::error::{Result, ToolError};
use crate::header_store::HeaderStore;

/// Parse `KEY VALUE` pairs given on the command line.
///
/// Two spellings of the same element with different values are a
/// `ConflictingAttribute` error; identical values collapse into one entry.
pub fn parse_pairs<K, V>(pairs: &[(K, V)]) -> Result<AttributeSet>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut set = AttributeSet::new();
    for (key, raw) in pairs {
        let parsed = AttributeKey::parse(key.as_ref())?;
        if let Some(previous) = set.insert_raw(key.as_ref(), raw.as_ref())? {
            let current = set.get(parsed).map(|a| a.value.clone());
            if current.as_ref() != Some(&previous.value) {
                return Err(ToolError::ConflictingAttribute {
                    key: parsed.label(),
                    first: previous.value.to_string(),
                    second: raw.as_ref().to_string(),
                });
            }
        }
    }
    Ok(set)
}

/// Precedence, highest first: overrides, header store, defaults.
#[derive(Debug, Clone, Default)]
pub struct AttributeResolver {
    overrides: AttributeSet,
    meta_overrides: AttributeSet,
    store: Option<HeaderStore>,
}

impl AttributeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dataset overrides. Group 0002 keys given here are moved to the file meta overrides.
    pub fn with_overrides(mut self, overrides: AttributeSet) -> Self {
        let (meta, data) = overrides.partition_file_meta();
        self.overrides.merge_from(&data);
        self.meta_overrides.merge_from(&meta);
        self
    }

    pub fn with_meta_overrides(mut self, overrides: AttributeSet) -> Self {
        self.meta_overrides.merge_from(&overrides);
        self
    }

    pub fn with_store(mut self, store: Option<HeaderStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> Option<&HeaderStore> {
        self.store.as_ref()
    }

    /// Effective dataset attributes on top of `defaults`.
    pub fn resolve(&self, defaults: &AttributeSet) -> AttributeSet {
        let mut effective = defaults.clone();
        if let Some(store) = &self.store {
            effective.merge_from(&store.data);
        }
        effective.merge_from(&self.overrides);
        tracing::debug!("Resolved {} attribute(s)", effective.len());
        effective
    }

    /// Effective file meta attributes on top of `defaults`.
    pub fn resolve_file_meta(&self, defaults: &AttributeSet) -> AttributeSet {
        let mut effective = defaults.clone();
        if let Some(store) = &self.store {
            effective.merge_from(&store.file_meta);
        }
        effective.merge_from(&self.meta_overrides);
        effective
    }
}
