//! Group-by support: maps scanned series back to the tag values they carry.
//!
//! A [`GroupingContext`] is created per query and dropped with it. Nothing is enumerated at
//! creation time; each [`TagValuesEntrySet`] resolves tag values only for the series a scan
//! actually hands it.

use crate::bitmap::SeriesIdBitmap;
use crate::error::IndexError;
use crate::tag_index::TagIndex;
use crate::types::{SeriesId, TagKeyId, TagValueId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Composite group key: one tag value ID per requested tag key, in request order.
pub type GroupKey = Vec<TagValueId>;

/// Resolves series => tag value for one tag key.
#[derive(Debug)]
pub struct TagValuesEntrySet {
    tag_key_id: TagKeyId,
    tag_index: Arc<TagIndex>,
    /// series id -> tag value id, filled as series are looked up. Misses are not kept: the
    /// series may be indexed under this key later in the query.
    resolved: Mutex<HashMap<SeriesId, TagValueId>>,
}

impl TagValuesEntrySet {
    pub(crate) fn new(tag_key_id: TagKeyId, tag_index: Arc<TagIndex>) -> Self {
        Self {
            tag_key_id,
            tag_index,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn tag_key_id(&self) -> TagKeyId {
        self.tag_key_id
    }

    /// The tag value `series_id` carries under this key, `None` if it has none.
    ///
    /// Point lookup for a few series; scans over many series should use [`Self::bucket`].
    pub fn tag_value_id(&self, series_id: SeriesId) -> Result<Option<TagValueId>, IndexError> {
        if let Some(hit) = self.resolved.lock()?.get(&series_id) {
            return Ok(Some(*hit));
        }
        let tag_value_id = self.tag_index.tag_value_id_of(series_id)?;
        if let Some(id) = tag_value_id {
            self.resolved.lock()?.insert(series_id, id);
        }
        Ok(tag_value_id)
    }

    /// Splits the scanned `series_ids` by tag value. Series without a value are dropped.
    pub fn bucket(
        &self,
        series_ids: &SeriesIdBitmap,
    ) -> Result<BTreeMap<TagValueId, SeriesIdBitmap>, IndexError> {
        self.tag_index.bucket_by_tag_value(series_ids)
    }

    /// Number of series resolved to a tag value through [`Self::tag_value_id`] so far.
    pub fn resolved_count(&self) -> Result<usize, IndexError> {
        Ok(self.resolved.lock()?.len())
    }
}

/// Per-query group-by context. Position `i` corresponds to the `i`-th requested tag key.
#[derive(Debug)]
pub struct GroupingContext {
    entries: Vec<TagValuesEntrySet>,
}

impl GroupingContext {
    pub(crate) fn new(entries: Vec<TagValuesEntrySet>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TagValuesEntrySet> {
        self.entries.get(idx)
    }

    pub fn entries(&self) -> &[TagValuesEntrySet] {
        &self.entries
    }

    pub fn tag_key_ids(&self) -> Vec<TagKeyId> {
        self.entries.iter().map(|e| e.tag_key_id()).collect()
    }

    /// Group key of one series, or `None` if it lacks a value for any requested key.
    pub fn group_key(&self, series_id: SeriesId) -> Result<Option<GroupKey>, IndexError> {
        let mut key = Vec::with_capacity(self.entries.len());
        for entry_set in &self.entries {
            match entry_set.tag_value_id(series_id)? {
                Some(tag_value_id) => key.push(tag_value_id),
                None => return Ok(None),
            }
        }
        Ok(Some(key))
    }

    /// Buckets the scanned `series_ids` by composite group key.
    ///
    /// Series lacking a value for any requested key fall out of every bucket.
    pub fn group(
        &self,
        series_ids: &SeriesIdBitmap,
    ) -> Result<BTreeMap<GroupKey, SeriesIdBitmap>, IndexError> {
        let mut groups = BTreeMap::new();
        if series_ids.is_empty() {
            return Ok(groups);
        }
        groups.insert(Vec::with_capacity(self.entries.len()), series_ids.clone());

        for entry_set in &self.entries {
            let mut refined = BTreeMap::new();
            for (key, series) in groups {
                for (tag_value_id, hit) in entry_set.bucket(&series)? {
                    let mut next_key = key.clone();
                    next_key.push(tag_value_id);
                    refined.insert(next_key, hit);
                }
            }
            groups = refined;
        }
        Ok(groups)
    }
}
