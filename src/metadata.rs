//! ID-minting collaborator: tag key and tag value strings => stable integer IDs.

use crate::error::IndexError;
use crate::types::{TagKeyId, TagValueId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves tag key/value strings to IDs, minting new IDs on first sight.
///
/// Implementations must be safe for concurrent use. Failures are reported as
/// [`IndexError::IdResolution`]. Tag key IDs must never equal the tag-less sentinel configured on
/// the index ([`TAGLESS_TAG_KEY_ID`](crate::types::TAGLESS_TAG_KEY_ID) by default); the index
/// refuses to file a tag under that key.
pub trait Metadata: std::fmt::Debug + Send + Sync + 'static {
    fn gen_tag_key_id(
        &self,
        namespace: &str,
        metric_name: &str,
        tag_key: &str,
    ) -> Result<TagKeyId, IndexError>;

    fn gen_tag_value_id(
        &self,
        tag_key_id: TagKeyId,
        tag_value: &str,
    ) -> Result<TagValueId, IndexError>;
}

/// Limits enforced by [`InMemoryMetadata`]. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataLimits {
    pub max_tag_keys_per_metric: Option<u32>,
    pub max_tag_values_per_key: Option<u32>,
}

#[derive(Debug, Default)]
struct MetadataState {
    /// (namespace, metric) -> tag key -> id
    tag_keys: HashMap<(String, String), HashMap<String, TagKeyId>>,
    /// tag key id -> tag value -> id
    tag_values: HashMap<TagKeyId, HashMap<String, TagValueId>>,
    last_tag_key_id: TagKeyId,
}

/// Sequence-backed metadata store kept in memory.
///
/// Tag key IDs come from one sequence shared by all metrics; tag value IDs from one sequence per
/// tag key. Both start at 1, leaving 0 for the tag-less sentinel. Minting is idempotent.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    state: RwLock<MetadataState>,
    limits: MetadataLimits,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: MetadataLimits) -> Self {
        Self {
            state: RwLock::new(MetadataState::default()),
            limits,
        }
    }

    /// Looks up an existing tag key ID without minting.
    pub fn get_tag_key_id(
        &self,
        namespace: &str,
        metric_name: &str,
        tag_key: &str,
    ) -> Result<Option<TagKeyId>, IndexError> {
        let guard = self.state.read()?;
        Ok(guard
            .tag_keys
            .get(&(namespace.to_string(), metric_name.to_string()))
            .and_then(|keys| keys.get(tag_key))
            .copied())
    }

    /// Looks up an existing tag value ID without minting.
    pub fn get_tag_value_id(
        &self,
        tag_key_id: TagKeyId,
        tag_value: &str,
    ) -> Result<Option<TagValueId>, IndexError> {
        let guard = self.state.read()?;
        Ok(guard
            .tag_values
            .get(&tag_key_id)
            .and_then(|values| values.get(tag_value))
            .copied())
    }
}

impl Metadata for InMemoryMetadata {
    fn gen_tag_key_id(
        &self,
        namespace: &str,
        metric_name: &str,
        tag_key: &str,
    ) -> Result<TagKeyId, IndexError> {
        if let Some(id) = self.get_tag_key_id(namespace, metric_name, tag_key)? {
            return Ok(id);
        }

        let mut guard = self.state.write()?;
        let state = &mut *guard;
        let keys = state
            .tag_keys
            .entry((namespace.to_string(), metric_name.to_string()))
            .or_default();
        if let Some(id) = keys.get(tag_key) {
            return Ok(*id);
        }
        if let Some(limit) = self.limits.max_tag_keys_per_metric {
            if keys.len() as u64 >= u64::from(limit) {
                return Err(IndexError::IdResolution(format!(
                    "too many tag keys for metric {}/{}: limit={}",
                    namespace, metric_name, limit
                )));
            }
        }
        let id = state.last_tag_key_id.checked_add(1).ok_or_else(|| {
            IndexError::IdResolution("tag key id sequence exhausted".to_string())
        })?;
        state.last_tag_key_id = id;
        keys.insert(tag_key.to_string(), id);
        Ok(id)
    }

    fn gen_tag_value_id(
        &self,
        tag_key_id: TagKeyId,
        tag_value: &str,
    ) -> Result<TagValueId, IndexError> {
        if let Some(id) = self.get_tag_value_id(tag_key_id, tag_value)? {
            return Ok(id);
        }

        let mut guard = self.state.write()?;
        let values = guard.tag_values.entry(tag_key_id).or_default();
        if let Some(id) = values.get(tag_value) {
            return Ok(*id);
        }
        if let Some(limit) = self.limits.max_tag_values_per_key {
            if values.len() as u64 >= u64::from(limit) {
                return Err(IndexError::IdResolution(format!(
                    "too many tag values for tag key {}: limit={}",
                    tag_key_id, limit
                )));
            }
        }
        let id = (values.len() as TagValueId).checked_add(1).ok_or_else(|| {
            IndexError::IdResolution(format!(
                "tag value id sequence exhausted for tag key {}",
                tag_key_id
            ))
        })?;
        values.insert(tag_value.to_string(), id);
        Ok(id)
    }
}
