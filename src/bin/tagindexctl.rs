//! Command-line tool for the tag inverted index.
//!
//! Loads settings from (in precedence order): defaults, config file, environment variables
//! (`TAGINDEX_*`), and CLI flags. `generate` builds an index from a deterministic synthetic
//! dataset and flushes it to a section file; `inspect` verifies and summarizes such a file.

use std::fs::File as FsFile;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use tagindex::flusher::read_sections;
use tagindex::{
    InMemoryMetadata, IndexConfig, IndexError, InvertedIndex, MetadataLimits, SectionFlusher,
    TagSet,
};

// ---------- CLI ----------

/// Tag inverted index tool.
#[derive(Parser, Debug)]
#[command(name = "tagindexctl", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `tagindexctl.toml` is loaded when present.
    #[arg(long, env = "TAGINDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print effective settings, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build an index from a synthetic dataset and flush it to a file.
    Generate {
        /// Number of series to register.
        #[arg(long)]
        series: Option<u32>,
        /// Tag keys per series.
        #[arg(long)]
        tag_keys: Option<u32>,
        /// Distinct values per tag key.
        #[arg(long)]
        tag_values: Option<u32>,
        /// Output file for the flushed sections.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Verify a flushed file and print one line per tag key.
    Inspect {
        /// File written by `generate` (or any SectionFlusher).
        path: PathBuf,
    },
}

// ---------- File/env config (all optional for partial config) ----------

/// Settings as read from file + env. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct CtlFileConfig {
    pub namespace: Option<String>,
    pub metric_name: Option<String>,
    pub series: Option<u32>,
    pub tag_keys: Option<u32>,
    pub tag_values: Option<u32>,
    pub out: Option<String>,
    pub max_tag_keys_per_metric: Option<u32>,
    pub max_tag_values_per_key: Option<u32>,
}

/// Effective settings after layering.
#[derive(Debug, Clone)]
pub struct CtlOptions {
    pub namespace: String,
    pub metric_name: String,
    pub series: u32,
    pub tag_keys: u32,
    pub tag_values: u32,
    pub out: PathBuf,
    pub limits: MetadataLimits,
}

impl Default for CtlOptions {
    fn default() -> Self {
        Self {
            namespace: "default-ns".to_string(),
            metric_name: "synthetic".to_string(),
            series: 10_000,
            tag_keys: 4,
            tag_values: 16,
            out: PathBuf::from("tagindex.sections"),
            limits: MetadataLimits::default(),
        }
    }
}

/// Load merged options. CLI overrides file/env.
fn load_options(cli: &Cli) -> Result<CtlOptions, IndexError> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(IndexError::ConfigError(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("tagindexctl.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TAGINDEX")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder
        .build()
        .map_err(|e| IndexError::ConfigError(e.to_string()))?;
    let partial: CtlFileConfig = merged
        .try_deserialize()
        .map_err(|e| IndexError::ConfigError(e.to_string()))?;

    let mut options = CtlOptions::default();
    merge_into_options(&mut options, &partial);

    if let Some(Command::Generate {
        series,
        tag_keys,
        tag_values,
        out,
    }) = &cli.command
    {
        if let Some(n) = series {
            options.series = *n;
        }
        if let Some(n) = tag_keys {
            options.tag_keys = *n;
        }
        if let Some(n) = tag_values {
            options.tag_values = *n;
        }
        if let Some(p) = out {
            options.out = p.clone();
        }
    }

    if options.tag_values == 0 {
        return Err(IndexError::ConfigError(
            "tag_values must be greater than 0".to_string(),
        ));
    }
    Ok(options)
}

/// Merge file/env partial config onto the options. Only overwrites fields that are `Some`.
fn merge_into_options(base: &mut CtlOptions, partial: &CtlFileConfig) {
    if let Some(s) = &partial.namespace {
        base.namespace = s.clone();
    }
    if let Some(s) = &partial.metric_name {
        base.metric_name = s.clone();
    }
    if let Some(n) = partial.series {
        base.series = n;
    }
    if let Some(n) = partial.tag_keys {
        base.tag_keys = n;
    }
    if let Some(n) = partial.tag_values {
        base.tag_values = n;
    }
    if let Some(s) = &partial.out {
        base.out = PathBuf::from(s);
    }
    if let Some(n) = partial.max_tag_keys_per_metric {
        base.limits.max_tag_keys_per_metric = Some(n);
    }
    if let Some(n) = partial.max_tag_values_per_key {
        base.limits.max_tag_values_per_key = Some(n);
    }
}

// ---------- Commands ----------

/// Tags of synthetic series `i`: key `k{j}` takes value `v{(i / (j + 1)) % tag_values}`.
fn synthetic_tags(i: u32, tag_keys: u32, tag_values: u32) -> TagSet {
    (0..tag_keys)
        .map(|j| {
            let v = (i / (j + 1)) % tag_values;
            (format!("k{}", j), format!("v{}", v))
        })
        .collect()
}

fn run_generate(options: &CtlOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let metadata = Arc::new(InMemoryMetadata::with_limits(options.limits));
    let index = InvertedIndex::with_config(metadata, IndexConfig::default());

    for i in 0..options.series {
        let tags = synthetic_tags(i, options.tag_keys, options.tag_values);
        index.build_inverted_index(&options.namespace, &options.metric_name, Some(&tags), i);
    }

    let file = FsFile::create(&options.out)
        .map_err(|e| format!("cannot create {}: {}", options.out.display(), e))?;
    let mut flusher = SectionFlusher::new(BufWriter::new(file))?;
    index.flush_inverted_index_to(&mut flusher)?;
    let sections = flusher.sections_written();
    flusher.finish()?;

    let stats = index.stats()?;
    println!("out={}", options.out.display());
    println!("tag_keys={}", stats.tag_keys);
    println!("tag_values={}", stats.tag_values);
    println!("series={}", stats.series);
    println!("sections={}", sections);
    Ok(())
}

fn run_inspect(path: &Path) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let sections = read_sections(&bytes)?;
    let mut tag_values = 0usize;
    for section in &sections {
        tag_values += section.values.len();
        println!(
            "tag_key={} tag_values={} series={}",
            section.tag_key_id,
            section.values.len(),
            section.series_count
        );
    }
    println!("sections={} tag_values={}", sections.len(), tag_values);
    Ok(())
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let options = load_options(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        println!("namespace={}", options.namespace);
        println!("metric_name={}", options.metric_name);
        println!("series={}", options.series);
        println!("tag_keys={}", options.tag_keys);
        println!("tag_values={}", options.tag_values);
        println!("out={}", options.out.display());
        return Ok(());
    }

    match &cli.command {
        Some(Command::Generate { .. }) => run_generate(&options).map_err(|e| {
            eprintln!("generate failed: {}", e);
            e
        }),
        Some(Command::Inspect { path }) => run_inspect(path).map_err(|e| {
            eprintln!("inspect failed: {}", e);
            e
        }),
        None => Err("no command given (try --help)".into()),
    }
}
