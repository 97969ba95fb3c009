//! Inverted index for one tag key: tag value ID => series ID bitmap, plus the union of all of them.

use crate::bitmap::SeriesIdBitmap;
use crate::error::IndexError;
use crate::types::{SeriesId, TagValueId};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct TagIndexInner {
    /// tag value id -> series ids carrying it, ascending by tag value id.
    values: BTreeMap<TagValueId, SeriesIdBitmap>,
    /// Union of every bitmap in `values`, maintained on insert.
    all_series: SeriesIdBitmap,
}

/// Per-tag-key inverted index.
///
/// Each `TagIndex` carries its own `RwLock`, so writers for different tag keys never contend.
/// Readers always observe a bitmap either before or after a given insert, never in between,
/// and every bitmap handed out is an owned copy.
#[derive(Debug, Default)]
pub struct TagIndex {
    inner: RwLock<TagIndexInner>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `series_id` under `tag_value_id`, creating the value's bitmap on first use.
    ///
    /// Idempotent: re-inserting a pair leaves the index unchanged.
    pub fn build_inverted_index(
        &self,
        tag_value_id: TagValueId,
        series_id: SeriesId,
    ) -> Result<(), IndexError> {
        let mut guard = self.inner.write()?;
        let inner = &mut *guard;
        inner
            .values
            .entry(tag_value_id)
            .or_default()
            .insert(series_id);
        inner.all_series.insert(series_id);
        Ok(())
    }

    /// Union of the bitmaps of every requested tag value. Unknown tag value IDs contribute nothing.
    pub fn get_series_ids_by_tag_value_ids(
        &self,
        tag_value_ids: &SeriesIdBitmap,
    ) -> Result<SeriesIdBitmap, IndexError> {
        let guard = self.inner.read()?;
        let mut out = SeriesIdBitmap::new();
        // Walk whichever side is smaller.
        if (tag_value_ids.len() as usize) < guard.values.len() {
            for tag_value_id in tag_value_ids.iter() {
                if let Some(series) = guard.values.get(&tag_value_id) {
                    out |= series;
                }
            }
        } else {
            for (tag_value_id, series) in guard.values.iter() {
                if tag_value_ids.contains(*tag_value_id) {
                    out |= series;
                }
            }
        }
        Ok(out)
    }

    /// All series indexed under this tag key.
    pub fn get_all_series_ids(&self) -> Result<SeriesIdBitmap, IndexError> {
        Ok(self.inner.read()?.all_series.clone())
    }

    /// Tag value IDs seen under this tag key.
    pub fn tag_value_ids(&self) -> Result<SeriesIdBitmap, IndexError> {
        Ok(self.inner.read()?.values.keys().copied().collect())
    }

    pub fn tag_value_count(&self) -> Result<usize, IndexError> {
        Ok(self.inner.read()?.values.len())
    }

    /// Snapshot of `(tag value id, series ids)` pairs in ascending tag value order.
    ///
    /// Taken under one read lock, so the pairs are mutually consistent.
    pub fn values_snapshot(&self) -> Result<Vec<(TagValueId, SeriesIdBitmap)>, IndexError> {
        let guard = self.inner.read()?;
        Ok(guard
            .values
            .iter()
            .map(|(id, series)| (*id, series.clone()))
            .collect())
    }

    /// The tag value carried by `series_id` under this key, if any.
    ///
    /// Walks every value bitmap, so a hit costs O(distinct values). Bulk callers should use
    /// [`Self::bucket_by_tag_value`], which handles a whole scanned set in one pass.
    pub fn tag_value_id_of(&self, series_id: SeriesId) -> Result<Option<TagValueId>, IndexError> {
        let guard = self.inner.read()?;
        if !guard.all_series.contains(series_id) {
            return Ok(None);
        }
        Ok(guard
            .values
            .iter()
            .find(|(_, series)| series.contains(series_id))
            .map(|(id, _)| *id))
    }

    /// Splits `series_ids` by tag value. Series without a value under this key are left out.
    pub fn bucket_by_tag_value(
        &self,
        series_ids: &SeriesIdBitmap,
    ) -> Result<BTreeMap<TagValueId, SeriesIdBitmap>, IndexError> {
        let guard = self.inner.read()?;
        if guard.all_series.is_disjoint(series_ids) {
            return Ok(BTreeMap::new());
        }
        let buckets = guard
            .values
            .par_iter()
            .filter_map(|(id, series)| {
                let hit = series & series_ids;
                if hit.is_empty() {
                    None
                } else {
                    Some((*id, hit))
                }
            })
            .collect::<Vec<_>>();
        Ok(buckets.into_iter().collect())
    }
}
