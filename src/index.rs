//! Inverted index facade: resolves tag strings through the metadata collaborator, maintains the
//! tag index store on the write path, and answers series-set lookups, grouping-context requests
//! and flushes on the read path.

use crate::bitmap::{union_all, SeriesIdBitmap};
use crate::error::IndexError;
use crate::flusher::Flusher;
use crate::grouping::{GroupingContext, TagValuesEntrySet};
use crate::metadata::Metadata;
use crate::store::TagIndexStore;
use crate::tag_index::TagIndex;
use crate::telemetry::{index_metrics, noop_event_listener, IndexEvent, IndexEventListener};
use crate::types::{SeriesId, TagKeyId, TagSet, TagValueId, TAGLESS_TAG_KEY_ID, TAGLESS_TAG_VALUE_ID};

use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Configuration options for the InvertedIndex
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn IndexEventListener>,
    /// Whether to emit counters/histograms through the `metrics` facade.
    pub enable_metrics: bool,
    /// Tag key ID under which series without tags are indexed.
    pub tagless_tag_key_id: TagKeyId,
    /// Tag value ID paired with `tagless_tag_key_id`.
    pub tagless_tag_value_id: TagValueId,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            event_listener: noop_event_listener(),
            enable_metrics: true,
            tagless_tag_key_id: TAGLESS_TAG_KEY_ID,
            tagless_tag_value_id: TAGLESS_TAG_VALUE_ID,
        }
    }
}

/// Point-in-time size of the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub tag_keys: usize,
    pub tag_values: usize,
    /// Distinct series across every tag key.
    pub series: u64,
}

/// Tag inverted index of one metric shard.
#[derive(Debug)]
pub struct InvertedIndex {
    store: TagIndexStore,
    metadata: Arc<dyn Metadata>,
    /// At most one flush walk at a time.
    flush_lock: Mutex<()>,
    config: IndexConfig,
}

impl InvertedIndex {
    pub fn new(metadata: Arc<dyn Metadata>) -> Self {
        Self::with_config(metadata, IndexConfig::default())
    }

    pub fn with_config(metadata: Arc<dyn Metadata>, config: IndexConfig) -> Self {
        Self {
            store: TagIndexStore::new(),
            metadata,
            flush_lock: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn tag_index(&self, tag_key_id: TagKeyId) -> Result<Arc<TagIndex>, IndexError> {
        self.store
            .get(tag_key_id)?
            .ok_or(IndexError::NotFound { tag_key_id })
    }

    /// Union of the series of every requested tag value under `tag_key_id`.
    ///
    /// # Errors
    /// [`IndexError::NotFound`] if the tag key was never indexed in this shard.
    pub fn get_series_ids_by_tag_value_ids(
        &self,
        tag_key_id: TagKeyId,
        tag_value_ids: &SeriesIdBitmap,
    ) -> Result<SeriesIdBitmap, IndexError> {
        self.tag_index(tag_key_id)?
            .get_series_ids_by_tag_value_ids(tag_value_ids)
    }

    /// All series carrying any value of `tag_key_id`.
    ///
    /// # Errors
    /// [`IndexError::NotFound`] if the tag key was never indexed in this shard.
    pub fn get_series_ids_for_tag(&self, tag_key_id: TagKeyId) -> Result<SeriesIdBitmap, IndexError> {
        self.tag_index(tag_key_id)?.get_all_series_ids()
    }

    /// Tag value IDs seen under `tag_key_id`.
    pub fn get_tag_value_ids(&self, tag_key_id: TagKeyId) -> Result<SeriesIdBitmap, IndexError> {
        self.tag_index(tag_key_id)?.tag_value_ids()
    }

    /// Builds the group-by context for `tag_key_ids`, one entry set per key in request order.
    ///
    /// Every key must exist; the first missing one fails the whole call with
    /// [`IndexError::NotFound`]. Tag values are resolved later, at scan time.
    pub fn get_grouping_context(
        &self,
        tag_key_ids: &[TagKeyId],
    ) -> Result<GroupingContext, IndexError> {
        let mut entries = Vec::with_capacity(tag_key_ids.len());
        for &tag_key_id in tag_key_ids {
            let tag_index = self.tag_index(tag_key_id)?;
            entries.push(TagValuesEntrySet::new(tag_key_id, tag_index));
        }
        Ok(GroupingContext::new(entries))
    }

    /// Indexes a newly registered series under each of its tags.
    ///
    /// A series without tags is indexed under the configured tag-less key. A tag whose key or
    /// value ID cannot be resolved is reported to the event listener and skipped; the remaining
    /// tags are still indexed. A tag key resolving to the tag-less key counts as unresolvable.
    /// Never fails.
    pub fn build_inverted_index(
        &self,
        namespace: &str,
        metric_name: &str,
        tags: Option<&TagSet>,
        series_id: SeriesId,
    ) {
        if self.config.enable_metrics {
            index_metrics::record_series_indexed();
        }

        let tags = match tags {
            Some(tags) if !tags.is_empty() => tags,
            _ => {
                self.insert(
                    self.config.tagless_tag_key_id,
                    self.config.tagless_tag_value_id,
                    series_id,
                );
                return;
            }
        };

        for (tag_key, tag_value) in tags {
            let resolved = self
                .metadata
                .gen_tag_key_id(namespace, metric_name, tag_key)
                .and_then(|id| {
                    if id == self.config.tagless_tag_key_id {
                        Err(IndexError::IdResolution(format!(
                            "tag key id {} is reserved for tag-less series",
                            id
                        )))
                    } else {
                        Ok(id)
                    }
                });
            let tag_key_id = match resolved {
                Ok(id) => id,
                Err(e) => {
                    self.report_resolution_failure(IndexEvent::TagKeyIdResolutionFailed {
                        namespace: namespace.to_string(),
                        metric_name: metric_name.to_string(),
                        tag_key: tag_key.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let tag_value_id = match self.metadata.gen_tag_value_id(tag_key_id, tag_value) {
                Ok(id) => id,
                Err(e) => {
                    self.report_resolution_failure(IndexEvent::TagValueIdResolutionFailed {
                        tag_key: tag_key.clone(),
                        tag_value: tag_value.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            self.insert(tag_key_id, tag_value_id, series_id);
        }
    }

    fn insert(&self, tag_key_id: TagKeyId, tag_value_id: TagValueId, series_id: SeriesId) {
        if let Err(e) = self.try_insert(tag_key_id, tag_value_id, series_id) {
            self.config
                .event_listener
                .on_event(IndexEvent::TagIndexLockPoisoned {
                    tag_key_id,
                    error: e.to_string(),
                });
        }
    }

    fn try_insert(
        &self,
        tag_key_id: TagKeyId,
        tag_value_id: TagValueId,
        series_id: SeriesId,
    ) -> Result<(), IndexError> {
        if let Some(tag_index) = self.store.get(tag_key_id)? {
            return tag_index.build_inverted_index(tag_value_id, series_id);
        }

        // Populate before publishing so no reader or flush ever sees an empty tag index.
        let fresh = Arc::new(TagIndex::new());
        fresh.build_inverted_index(tag_value_id, series_id)?;
        let retained = self.store.put(tag_key_id, Arc::clone(&fresh))?;
        if Arc::ptr_eq(&retained, &fresh) {
            self.config
                .event_listener
                .on_event(IndexEvent::TagKeyCreated { tag_key_id });
            if self.config.enable_metrics {
                index_metrics::record_tag_key_created();
            }
            return Ok(());
        }
        // Lost the creation race: the retained index is the only write target.
        retained.build_inverted_index(tag_value_id, series_id)
    }

    fn report_resolution_failure(&self, event: IndexEvent) {
        if self.config.enable_metrics {
            index_metrics::record_tag_resolution_failure();
        }
        self.config.event_listener.on_event(event);
    }

    /// Hands the whole index to `flusher` in ascending tag key order.
    ///
    /// For each tag key, every tag value is passed to [`Flusher::flush_tag_value`] (ascending tag
    /// value order), then the key is closed with [`Flusher::flush_tag_key_id`]. The first flusher
    /// error aborts the walk and is returned unchanged; keys already closed stay flushed.
    ///
    /// Writes may continue during the walk. Each tag key is read from one consistent snapshot;
    /// series inserted after that snapshot is taken are not part of this flush.
    pub fn flush_inverted_index_to<F>(&self, flusher: &mut F) -> Result<(), IndexError>
    where
        F: Flusher + ?Sized,
    {
        let _flush_guard = self.flush_lock.lock()?;
        let start = Instant::now();
        let tag_indexes = self.store.snapshot()?;
        self.config.event_listener.on_event(IndexEvent::FlushStarted {
            tag_keys: tag_indexes.len(),
        });

        let mut tag_values = 0usize;
        for (tag_key_id, tag_index) in &tag_indexes {
            let result = flush_tag_index(flusher, *tag_key_id, tag_index);
            match result {
                Ok(flushed) => tag_values += flushed,
                Err(e) => {
                    if self.config.enable_metrics {
                        index_metrics::record_flush_failure();
                    }
                    self.config.event_listener.on_event(IndexEvent::FlushFailed {
                        tag_key_id: *tag_key_id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let duration = start.elapsed();
        if self.config.enable_metrics {
            index_metrics::record_flush(duration, tag_indexes.len() as u64, tag_values as u64);
        }
        self.config.event_listener.on_event(IndexEvent::FlushCompleted {
            tag_keys: tag_indexes.len(),
            tag_values,
            duration,
        });
        Ok(())
    }

    /// Counts tag keys, tag values and distinct series.
    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        let mut stats = IndexStats::default();
        let mut per_key = Vec::new();
        for (_, tag_index) in self.store.snapshot()? {
            stats.tag_keys += 1;
            stats.tag_values += tag_index.tag_value_count()?;
            per_key.push(tag_index.get_all_series_ids()?);
        }
        stats.series = union_all(&per_key).len();
        Ok(stats)
    }
}

fn flush_tag_index<F>(
    flusher: &mut F,
    tag_key_id: TagKeyId,
    tag_index: &TagIndex,
) -> Result<usize, IndexError>
where
    F: Flusher + ?Sized,
{
    let values = tag_index.values_snapshot()?;
    for (tag_value_id, series_ids) in &values {
        flusher.flush_tag_value(*tag_value_id, series_ids)?;
    }
    flusher.flush_tag_key_id(tag_key_id)?;
    Ok(values.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadata;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ids(v: &[u32]) -> SeriesIdBitmap {
        v.iter().copied().collect()
    }

    #[derive(Debug, Default)]
    struct RecordingFlusher {
        calls: Vec<String>,
    }

    impl Flusher for RecordingFlusher {
        fn flush_tag_value(
            &mut self,
            tag_value_id: TagValueId,
            series_ids: &SeriesIdBitmap,
        ) -> Result<(), IndexError> {
            self.calls
                .push(format!("v{}:{:?}", tag_value_id, series_ids.iter().collect::<Vec<_>>()));
            Ok(())
        }

        fn flush_tag_key_id(&mut self, tag_key_id: TagKeyId) -> Result<(), IndexError> {
            self.calls.push(format!("k{}", tag_key_id));
            Ok(())
        }
    }

    #[test]
    fn test_build_and_lookup() {
        let meta = Arc::new(InMemoryMetadata::new());
        let index = InvertedIndex::new(meta.clone());
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("host", "a")])), 1);
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("host", "b")])), 2);

        let host = meta.get_tag_key_id("ns", "cpu", "host").unwrap().unwrap();
        let a = meta.get_tag_value_id(host, "a").unwrap().unwrap();
        assert_eq!(
            index.get_series_ids_by_tag_value_ids(host, &ids(&[a])).unwrap(),
            ids(&[1])
        );
        assert_eq!(index.get_series_ids_for_tag(host).unwrap(), ids(&[1, 2]));
        assert_eq!(index.get_tag_value_ids(host).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_tag_key_is_not_found() {
        let index = InvertedIndex::new(Arc::new(InMemoryMetadata::new()));
        let err = index.get_series_ids_for_tag(9).unwrap_err();
        assert!(err.is_not_found());
        let err = index
            .get_series_ids_by_tag_value_ids(9, &ids(&[1]))
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound { tag_key_id: 9 }));
    }

    #[test]
    fn test_tagless_series_uses_sentinel_key() {
        let index = InvertedIndex::new(Arc::new(InMemoryMetadata::new()));
        index.build_inverted_index("ns", "cpu", None, 5);
        index.build_inverted_index("ns", "cpu", Some(&TagSet::new()), 6);
        assert_eq!(
            index.get_series_ids_for_tag(TAGLESS_TAG_KEY_ID).unwrap(),
            ids(&[5, 6])
        );
    }

    #[test]
    fn test_flush_walks_keys_then_finalizes() {
        let meta = Arc::new(InMemoryMetadata::new());
        let index = InvertedIndex::new(meta);
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("host", "a")])), 1);
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("host", "b")])), 2);
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("host", "a")])), 3);

        let mut flusher = RecordingFlusher::default();
        index.flush_inverted_index_to(&mut flusher).unwrap();
        assert_eq!(flusher.calls, vec!["v1:[1, 3]", "v2:[2]", "k1"]);
    }

    #[test]
    fn test_stats() {
        let index = InvertedIndex::new(Arc::new(InMemoryMetadata::new()));
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("a", "1"), ("b", "1")])), 1);
        index.build_inverted_index("ns", "cpu", Some(&tags(&[("a", "2")])), 2);
        index.build_inverted_index("ns", "cpu", None, 3);
        let stats = index.stats().unwrap();
        assert_eq!(
            stats,
            IndexStats {
                tag_keys: 3,
                tag_values: 4,
                series: 3,
            }
        );
    }
}
