
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tagindex::{
    Flusher, IndexConfig, IndexError, InMemoryMetadata, InvertedIndex, SectionFlusher,
    SeriesIdBitmap, TagKeyId, TagValueId,
};

fn quiet_config() -> IndexConfig {
    IndexConfig {
        enable_metrics: false,
        ..IndexConfig::default()
    }
}

fn build_index(ops: &[datasets::SeriesOp]) -> (Arc<InMemoryMetadata>, InvertedIndex) {
    let metadata = Arc::new(InMemoryMetadata::new());
    let index = InvertedIndex::with_config(metadata.clone(), quiet_config());
    for op in ops {
        index.build_inverted_index("ns", "bench", Some(&op.tags), op.series_id);
    }
    (metadata, index)
}

/// Drops everything; isolates the index walk from I/O.
struct NullFlusher;

impl Flusher for NullFlusher {
    fn flush_tag_value(
        &mut self,
        tag_value_id: TagValueId,
        series_ids: &SeriesIdBitmap,
    ) -> Result<(), IndexError> {
        black_box((tag_value_id, series_ids.len()));
        Ok(())
    }

    fn flush_tag_key_id(&mut self, tag_key_id: TagKeyId) -> Result<(), IndexError> {
        black_box(tag_key_id);
        Ok(())
    }
}

fn bench_build_fixed_dataset(c: &mut Criterion) {
    let ops = datasets::generate_series_ops(datasets::DEFAULT_SEED, 20_000, 4, 16);

    let mut group = c.benchmark_group("build");
    group.bench_function("build_20k_series_4_tags", |b| {
        b.iter_batched(
            || Arc::new(InMemoryMetadata::new()),
            |metadata| {
                let index = InvertedIndex::with_config(metadata, quiet_config());
                for op in &ops {
                    index.build_inverted_index(
                        "ns",
                        "bench",
                        black_box(Some(&op.tags)),
                        black_box(op.series_id),
                    );
                }
                index
            },
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

fn bench_lookup_fixed_dataset(c: &mut Criterion) {
    let ops = datasets::generate_series_ops(datasets::DEFAULT_SEED, 120_000, 4, 64);
    let (metadata, index) = build_index(&ops);
    let k0 = metadata
        .get_tag_key_id("ns", "bench", "k0")
        .expect("metadata")
        .expect("k0 indexed");

    let one_value: SeriesIdBitmap = [metadata
        .get_tag_value_id(k0, "v7")
        .expect("metadata")
        .expect("v7 indexed")]
    .into_iter()
    .collect();
    let all_values = index.get_tag_value_ids(k0).expect("tag values");

    let mut group = c.benchmark_group("lookup");
    group.bench_function("one_tag_value_120k", |b| {
        b.iter(|| {
            let out = index
                .get_series_ids_by_tag_value_ids(black_box(k0), black_box(&one_value))
                .unwrap();
            black_box(out.len())
        })
    });
    group.bench_function("all_tag_values_120k", |b| {
        b.iter(|| {
            let out = index
                .get_series_ids_by_tag_value_ids(black_box(k0), black_box(&all_values))
                .unwrap();
            black_box(out.len())
        })
    });
    group.bench_function("all_series_for_tag_120k", |b| {
        b.iter(|| black_box(index.get_series_ids_for_tag(black_box(k0)).unwrap().len()))
    });
    group.finish();
}

fn bench_grouping_fixed_dataset(c: &mut Criterion) {
    let ops = datasets::generate_series_ops(datasets::DEFAULT_SEED, 50_000, 4, 16);
    let (metadata, index) = build_index(&ops);
    let keys: Vec<TagKeyId> = ["k0", "k1"]
        .iter()
        .map(|k| {
            metadata
                .get_tag_key_id("ns", "bench", k)
                .expect("metadata")
                .expect("key indexed")
        })
        .collect();
    let scanned: SeriesIdBitmap = (0..50_000u32).step_by(3).collect();

    c.bench_function("group_by_two_keys_50k", |b| {
        b.iter(|| {
            let ctx = index.get_grouping_context(black_box(&keys)).unwrap();
            black_box(ctx.group(black_box(&scanned)).unwrap().len())
        })
    });
}

fn bench_flush_fixed_dataset(c: &mut Criterion) {
    let ops = datasets::generate_series_ops(datasets::DEFAULT_SEED, 50_000, 8, 256);
    let (_, index) = build_index(&ops);

    let mut group = c.benchmark_group("flush");
    group.bench_function("walk_only_50k", |b| {
        b.iter(|| index.flush_inverted_index_to(&mut NullFlusher).unwrap())
    });
    group.bench_function("section_flusher_in_memory_50k", |b| {
        b.iter(|| {
            let mut flusher = SectionFlusher::new(Vec::new()).unwrap();
            index.flush_inverted_index_to(&mut flusher).unwrap();
            black_box(flusher.finish().unwrap().len())
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_build_fixed_dataset,
    bench_lookup_fixed_dataset,
    bench_grouping_fixed_dataset,
    bench_flush_fixed_dataset
);
criterion_main!(benches);
