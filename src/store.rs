use crate::error::IndexError;
use crate::tag_index::TagIndex;
use crate::types::TagKeyId;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Outer index of one metric shard: tag key ID => [`TagIndex`].
///
/// The store lock only guards the key map; value mutation happens under each `TagIndex`'s own lock.
/// Keys are kept ordered so flush can walk them in ascending ID order. Entries are never removed.
#[derive(Debug, Default)]
pub struct TagIndexStore {
    indexes: RwLock<BTreeMap<TagKeyId, Arc<TagIndex>>>,
}

impl TagIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves the tag index for `tag_key_id`, if that key has ever been indexed.
    pub fn get(&self, tag_key_id: TagKeyId) -> Result<Option<Arc<TagIndex>>, IndexError> {
        Ok(self.indexes.read()?.get(&tag_key_id).cloned())
    }

    /// Inserts `tag_index` unless an index already exists for the key.
    ///
    /// Returns the retained index, which is the one all later writes must target.
    pub fn put(
        &self,
        tag_key_id: TagKeyId,
        tag_index: Arc<TagIndex>,
    ) -> Result<Arc<TagIndex>, IndexError> {
        let mut guard = self.indexes.write()?;
        Ok(Arc::clone(guard.entry(tag_key_id).or_insert(tag_index)))
    }

    /// Point-in-time list of `(tag key id, index)` in ascending key order.
    ///
    /// The store lock is released on return; the indexes keep accepting writes.
    pub fn snapshot(&self) -> Result<Vec<(TagKeyId, Arc<TagIndex>)>, IndexError> {
        let guard = self.indexes.read()?;
        Ok(guard
            .iter()
            .map(|(id, index)| (*id, Arc::clone(index)))
            .collect())
    }

    pub fn tag_key_ids(&self) -> Result<Vec<TagKeyId>, IndexError> {
        Ok(self.indexes.read()?.keys().copied().collect())
    }

    pub fn len(&self) -> Result<usize, IndexError> {
        Ok(self.indexes.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.indexes.read()?.is_empty())
    }
}
