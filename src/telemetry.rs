use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "prometheus")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "prometheus")]
use std::sync::Mutex;
#[cfg(feature = "prometheus")]
use std::thread::JoinHandle;

use crate::types::TagKeyId;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers inject an implementation through
/// [`IndexConfig`](crate::index::IndexConfig) that forwards these events to `tracing`, `log`,
/// metrics, or custom sinks.
pub trait IndexEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: IndexEvent);
}

/// Structured events emitted by the index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEvent {
    /// A tag key could not be resolved; the series was indexed without it.
    TagKeyIdResolutionFailed {
        namespace: String,
        metric_name: String,
        tag_key: String,
        error: String,
    },
    /// A tag value could not be resolved; the series was indexed without this tag.
    TagValueIdResolutionFailed {
        tag_key: String,
        tag_value: String,
        error: String,
    },
    TagIndexLockPoisoned { tag_key_id: TagKeyId, error: String },
    TagKeyCreated { tag_key_id: TagKeyId },

    FlushStarted { tag_keys: usize },
    FlushCompleted {
        tag_keys: usize,
        tag_values: usize,
        duration: Duration,
    },
    FlushFailed { tag_key_id: TagKeyId, error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl IndexEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: IndexEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn IndexEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation and in-process scraping.
///
/// Emitting metrics is a no-op until a recorder is installed.
pub mod index_metrics {
    #[cfg(feature = "prometheus")]
    use super::*;
    use std::time::Duration;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const SERIES_INDEXED: &str = "tagindex_series_indexed";
    pub const TAG_RESOLUTION_FAILURES: &str = "tagindex_tag_resolution_failures";
    pub const TAG_KEYS_CREATED: &str = "tagindex_tag_keys_created";
    pub const FLUSH_TAG_KEYS: &str = "tagindex_flush_tag_keys";
    pub const FLUSH_TAG_VALUES: &str = "tagindex_flush_tag_values";
    pub const FLUSH_FAILURES: &str = "tagindex_flush_failures";
    pub const FLUSH_DURATION_SECONDS: &str = "tagindex_flush_duration_seconds";

    /// Handle to the in-process Prometheus recorder/scrape renderer.
    ///
    /// This does **not** start an HTTP server. Call [`InProcessPrometheus::render`] to scrape.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct InProcessPrometheus {
        handle: PrometheusHandle,
        stop: Arc<AtomicBool>,
        upkeep_thread: Mutex<Option<JoinHandle<()>>>,
    }

    #[cfg(feature = "prometheus")]
    impl InProcessPrometheus {
        /// Installs a global Prometheus recorder (once per process) and starts a small upkeep thread.
        pub fn install(upkeep_interval: Duration) -> Result<Self, MetricsInitError> {
            describe_all();

            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(MetricsInitError::from_build_error)?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_clone = stop.clone();
            let handle_clone = handle.clone();
            let upkeep_thread = std::thread::Builder::new()
                .name("tagindex-metrics-upkeep".to_string())
                .spawn(move || {
                    while !stop_clone.load(Ordering::Relaxed) {
                        std::thread::sleep(upkeep_interval);
                        handle_clone.run_upkeep();
                    }
                })
                .map_err(|e| MetricsInitError::ThreadSpawn(e.to_string()))?;

            Ok(Self {
                handle,
                stop,
                upkeep_thread: Mutex::new(Some(upkeep_thread)),
            })
        }

        /// Renders the current metrics in the Prometheus text exposition format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for InProcessPrometheus {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Ok(mut guard) = self.upkeep_thread.lock() {
                if let Some(t) = guard.take() {
                    let _ = t.join();
                }
            }
        }
    }

    #[cfg(feature = "prometheus")]
    #[derive(Debug, thiserror::Error)]
    pub enum MetricsInitError {
        #[error("metrics recorder already installed")]
        AlreadyInstalled,
        #[error("failed to install prometheus recorder: {0}")]
        Install(String),
        #[error("failed to spawn upkeep thread: {0}")]
        ThreadSpawn(String),
    }

    #[cfg(feature = "prometheus")]
    impl MetricsInitError {
        fn from_build_error(e: BuildError) -> Self {
            match e {
                BuildError::FailedToSetGlobalRecorder(_) => MetricsInitError::AlreadyInstalled,
                other => MetricsInitError::Install(other.to_string()),
            }
        }
    }

    #[inline]
    pub fn record_series_indexed() {
        ::metrics::counter!(SERIES_INDEXED).increment(1);
    }

    #[inline]
    pub fn record_tag_resolution_failure() {
        ::metrics::counter!(TAG_RESOLUTION_FAILURES).increment(1);
    }

    #[inline]
    pub fn record_tag_key_created() {
        ::metrics::counter!(TAG_KEYS_CREATED).increment(1);
    }

    #[inline]
    pub fn record_flush(duration: Duration, tag_keys: u64, tag_values: u64) {
        ::metrics::histogram!(FLUSH_DURATION_SECONDS).record(duration.as_secs_f64());
        if tag_keys > 0 {
            ::metrics::counter!(FLUSH_TAG_KEYS).increment(tag_keys);
        }
        if tag_values > 0 {
            ::metrics::counter!(FLUSH_TAG_VALUES).increment(tag_values);
        }
    }

    #[inline]
    pub fn record_flush_failure() {
        ::metrics::counter!(FLUSH_FAILURES).increment(1);
    }

    /// Registers descriptions with whatever recorder is installed.
    pub fn describe_all() {
        describe_counter!(
            SERIES_INDEXED,
            Unit::Count,
            "Total number of series registrations processed by InvertedIndex::build_inverted_index."
        );
        describe_counter!(
            TAG_RESOLUTION_FAILURES,
            Unit::Count,
            "Tags skipped during indexing because a tag key or tag value id could not be resolved."
        );
        describe_counter!(
            TAG_KEYS_CREATED,
            Unit::Count,
            "Tag indexes created in the store."
        );
        describe_counter!(
            FLUSH_TAG_KEYS,
            Unit::Count,
            "Tag keys finalized by successful flushes."
        );
        describe_counter!(
            FLUSH_TAG_VALUES,
            Unit::Count,
            "Tag values handed to the flusher by successful flushes."
        );
        describe_counter!(
            FLUSH_FAILURES,
            Unit::Count,
            "Flush walks aborted by a flusher error."
        );
        describe_histogram!(
            FLUSH_DURATION_SECONDS,
            Unit::Seconds,
            "Time to walk the store and hand every tag key to the flusher."
        );
    }
}
