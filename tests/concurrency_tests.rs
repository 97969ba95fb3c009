//! Concurrent writers, readers and flushes against one index.
//! Principles: break it, assume the locking is wrong, look for lost or torn updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;

use tagindex::{
    Flusher, IndexError, InMemoryMetadata, InvertedIndex, SeriesIdBitmap, TagKeyId, TagSet,
    TagValueId,
};

fn tags(pairs: &[(&str, &str)]) -> TagSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn series_tags(series: u32) -> TagSet {
    let host = format!("h{}", series % 17);
    let dc = format!("dc{}", series % 3);
    let shard = format!("s{}", series % 5);
    tags(&[
        ("host", host.as_str()),
        ("dc", dc.as_str()),
        ("shard", shard.as_str()),
    ])
}

/// Verifies the union invariant and ascending order on every flush.
#[derive(Debug, Default)]
struct CheckingFlusher {
    last_key: Option<TagKeyId>,
    pending: SeriesIdBitmap,
    keys: usize,
}

impl Flusher for CheckingFlusher {
    fn flush_tag_value(
        &mut self,
        _tag_value_id: TagValueId,
        series_ids: &SeriesIdBitmap,
    ) -> Result<(), IndexError> {
        assert!(!series_ids.is_empty());
        self.pending |= series_ids;
        Ok(())
    }

    fn flush_tag_key_id(&mut self, tag_key_id: TagKeyId) -> Result<(), IndexError> {
        if let Some(last) = self.last_key {
            assert!(tag_key_id > last, "tag key {} after {}", tag_key_id, last);
        }
        assert!(!self.pending.is_empty());
        self.last_key = Some(tag_key_id);
        self.pending.clear();
        self.keys += 1;
        Ok(())
    }
}

#[test]
fn breakit_parallel_writers_lose_no_series() {
    let metadata = Arc::new(InMemoryMetadata::new());
    let index = Arc::new(InvertedIndex::new(metadata.clone()));

    (0..20_000u32).into_par_iter().for_each(|series| {
        index.build_inverted_index("ns", "cpu", Some(&series_tags(series)), series);
    });

    let all: SeriesIdBitmap = (0..20_000u32).collect();
    for key in ["host", "dc", "shard"] {
        let id = metadata.get_tag_key_id("ns", "cpu", key).unwrap().unwrap();
        assert_eq!(index.get_series_ids_for_tag(id).unwrap(), all, "tag key {}", key);
        let values = index.get_tag_value_ids(id).unwrap();
        assert_eq!(
            index.get_series_ids_by_tag_value_ids(id, &values).unwrap(),
            all
        );
    }
    let stats = index.stats().unwrap();
    assert_eq!(stats.tag_keys, 3);
    assert_eq!(stats.tag_values, 17 + 3 + 5);
    assert_eq!(stats.series, 20_000);
}

#[test]
fn breakit_reads_during_writes_see_consistent_sets() {
    let metadata = Arc::new(InMemoryMetadata::new());
    let index = Arc::new(InvertedIndex::new(metadata.clone()));
    // Create the key before readers start.
    index.build_inverted_index("ns", "cpu", Some(&series_tags(0)), 0);
    let host = metadata.get_tag_key_id("ns", "cpu", "host").unwrap().unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let writers: Vec<_> = (0..4u32)
        .map(|w| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for i in 0..5_000u32 {
                    let series = 1 + w * 5_000 + i;
                    index.build_inverted_index("ns", "cpu", Some(&series_tags(series)), series);
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let index = Arc::clone(&index);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_len = 0u64;
                while !done.load(Ordering::Acquire) {
                    let all = index.get_series_ids_for_tag(host).unwrap();
                    // Append-only: a later read never sees fewer series.
                    assert!(all.len() >= last_len);
                    last_len = all.len();
                    let values = index.get_tag_value_ids(host).unwrap();
                    let by_values = index.get_series_ids_by_tag_value_ids(host, &values).unwrap();
                    // Values are read after `all`, so they can only be ahead of it.
                    assert!(all.is_subset(&by_values));
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(index.get_series_ids_for_tag(host).unwrap().len(), 20_001);
}

#[test]
fn breakit_write_visible_after_return() {
    let metadata = Arc::new(InMemoryMetadata::new());
    let index = Arc::new(InvertedIndex::new(metadata.clone()));

    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            let index = Arc::clone(&index);
            let metadata = Arc::clone(&metadata);
            thread::spawn(move || {
                for i in 0..200u32 {
                    let series = t * 1000 + i;
                    let t_tags = tags(&[("thread", &*format!("t{}", t))]);
                    index.build_inverted_index("ns", "cpu", Some(&t_tags), series);
                    let key = metadata
                        .get_tag_key_id("ns", "cpu", "thread")
                        .unwrap()
                        .unwrap();
                    assert!(index.get_series_ids_for_tag(key).unwrap().contains(series));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn breakit_flush_during_writes_emits_valid_sections() {
    let metadata = Arc::new(InMemoryMetadata::new());
    let index = Arc::new(InvertedIndex::new(metadata));
    for series in 0..100u32 {
        index.build_inverted_index("ns", "cpu", Some(&series_tags(series)), series);
    }

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for series in 100..10_100u32 {
                index.build_inverted_index("ns", "cpu", Some(&series_tags(series)), series);
            }
        })
    };

    let flushers: Vec<_> = (0..2)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for _ in 0..20 {
                    let mut flusher = CheckingFlusher::default();
                    index.flush_inverted_index_to(&mut flusher).unwrap();
                    assert_eq!(flusher.keys, 3);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for f in flushers {
        f.join().unwrap();
    }
    assert_eq!(index.stats().unwrap().series, 10_100);
}
