//! YAML pipeline configuration.
//!
//! One file describes one pipeline: its schedule, target, source, registry
//! and the tables it loads. Each table entry is merged over `general`, so
//! shared options are written once.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use weir_loader::{CsvOptions, FileFormat, FileSource, Job, SourceConnector, WindowConfig};
use weir_protocol::defaults::{DEFAULT_REGISTRY_URL, DEFAULT_SCHEMA_SUFFIX};
use weir_protocol::{parse_aware_timestamp, parse_duration, ColumnSpec, Columns, Engine, Record, Value};
use weir_schedule::{AlignedSchedule, Cadence, GatePoller, ScheduleAligner};
use weir_sinks::TargetTable;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub pipeline: PipelineSection,
    pub target: TargetSection,
    pub source: SourceSection,
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub general: TableConfig,
    pub tables: BTreeMap<String, TableConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    pub name: String,
    pub start_date: String,
    pub interval_full_refresh: String,
    pub interval_incremental: String,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSection {
    pub engine: Engine,
    pub url: String,
    pub schema: String,
    #[serde(default)]
    pub schema_suffix: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSection {
    Files {
        root: PathBuf,
        #[serde(default)]
        format: Option<String>,
        /// CSV dialect; only accepted with `format: csv`.
        #[serde(default)]
        csv_options: Option<CsvOptions>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    #[serde(default = "default_registry_url")]
    pub url: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
        }
    }
}

fn default_registry_url() -> String {
    DEFAULT_REGISTRY_URL.to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSection {
    #[serde(default)]
    pub poke_interval: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

/// Options of one table job. Every field is optional so a table entry can
/// be layered over `general`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Target table name; defaults to the table's key in `tables`.
    pub target_table: Option<String>,
    pub columns: Option<Vec<ColumnSpec>>,
    pub exclude_columns: Option<Vec<String>>,
    pub merge_on: Option<Vec<String>>,
    pub primary_key: Option<String>,
    pub index_columns: Option<Vec<String>>,
    pub hash_columns: Option<Vec<String>>,
    pub hash_algorithm: Option<String>,
    pub clean_data: Option<bool>,
    pub load_from: Option<String>,
    pub load_until: Option<String>,
    pub reload_from: Option<String>,
    pub from_offset: Option<String>,
    pub until_offset: Option<String>,
    pub wait_for_seconds: Option<u64>,
    pub key: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub allow_destructive_evolution: Option<bool>,
}

impl TableConfig {
    /// `self` layered over `general`. Metadata maps are merged key by key.
    pub fn merged_over(&self, general: &TableConfig) -> TableConfig {
        let metadata = match (&general.metadata, &self.metadata) {
            (None, None) => None,
            (base, over) => {
                let mut merged = base.clone().unwrap_or_default();
                if let Some(over) = over {
                    merged.extend(over.clone());
                }
                Some(merged)
            }
        };
        TableConfig {
            target_table: self.target_table.clone().or_else(|| general.target_table.clone()),
            columns: self.columns.clone().or_else(|| general.columns.clone()),
            exclude_columns: self.exclude_columns.clone().or_else(|| general.exclude_columns.clone()),
            merge_on: self.merge_on.clone().or_else(|| general.merge_on.clone()),
            primary_key: self.primary_key.clone().or_else(|| general.primary_key.clone()),
            index_columns: self.index_columns.clone().or_else(|| general.index_columns.clone()),
            hash_columns: self.hash_columns.clone().or_else(|| general.hash_columns.clone()),
            hash_algorithm: self.hash_algorithm.clone().or_else(|| general.hash_algorithm.clone()),
            clean_data: self.clean_data.or(general.clean_data),
            load_from: self.load_from.clone().or_else(|| general.load_from.clone()),
            load_until: self.load_until.clone().or_else(|| general.load_until.clone()),
            reload_from: self.reload_from.clone().or_else(|| general.reload_from.clone()),
            from_offset: self.from_offset.clone().or_else(|| general.from_offset.clone()),
            until_offset: self.until_offset.clone().or_else(|| general.until_offset.clone()),
            wait_for_seconds: self.wait_for_seconds.or(general.wait_for_seconds),
            key: self.key.clone().or_else(|| general.key.clone()),
            metadata,
            allow_destructive_evolution: self
                .allow_destructive_evolution
                .or(general.allow_destructive_evolution),
        }
    }

    fn window(&self) -> Result<WindowConfig> {
        Ok(WindowConfig {
            load_from: optional_timestamp("load_from", self.load_from.as_deref())?,
            load_until: optional_timestamp("load_until", self.load_until.as_deref())?,
            reload_from: optional_timestamp("reload_from", self.reload_from.as_deref())?,
            from_offset: optional_duration("from_offset", self.from_offset.as_deref())?,
            until_offset: optional_duration("until_offset", self.until_offset.as_deref())?,
            wait_for_seconds: self.wait_for_seconds.unwrap_or(0),
        })
    }
}

fn optional_timestamp(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|raw| {
        parse_aware_timestamp(raw).with_context(|| format!("Invalid {} '{}'", field, raw))
    })
    .transpose()
}

fn optional_duration(field: &str, raw: Option<&str>) -> Result<Option<Duration>> {
    raw.map(|raw| parse_duration(raw).with_context(|| format!("Invalid {} '{}'", field, raw)))
        .transpose()
}

impl PipelineConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid pipeline file: {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_yaml::from_str(contents).context("Failed to parse pipeline YAML")?;
        if config.tables.is_empty() {
            bail!("Pipeline '{}' has no tables", config.pipeline.name);
        }
        Ok(config)
    }

    pub fn name(&self) -> &str {
        &self.pipeline.name
    }

    pub fn aligner(&self) -> Result<ScheduleAligner> {
        let section = &self.pipeline;
        let start = parse_aware_timestamp(&section.start_date)
            .with_context(|| format!("Invalid start_date '{}'", section.start_date))?;
        let full = parse_duration(&section.interval_full_refresh).with_context(|| {
            format!("Invalid interval_full_refresh '{}'", section.interval_full_refresh)
        })?;
        let incremental = parse_duration(&section.interval_incremental).with_context(|| {
            format!("Invalid interval_incremental '{}'", section.interval_incremental)
        })?;
        let aligner = ScheduleAligner::new(&section.name, start, full, incremental)?;
        match optional_timestamp("end_date", section.end_date.as_deref())? {
            Some(end) => Ok(aligner.with_end_date(end)?),
            None => Ok(aligner),
        }
    }

    /// Cadences as seen by the instance at `execution_ts`.
    ///
    /// Aligning at wall-clock time instead would move the incremental start
    /// past the last instance of a period once that instance becomes due.
    pub fn schedule_for(&self, execution_ts: DateTime<Utc>) -> Result<AlignedSchedule> {
        Ok(self.aligner()?.align_at(execution_ts))
    }

    pub fn poller(&self) -> Result<GatePoller> {
        let mut poller = GatePoller::default();
        if let Some(interval) = optional_duration("gate.poke_interval", self.gate.poke_interval.as_deref())? {
            poller.poke_interval = interval
                .to_std()
                .context("gate.poke_interval must be positive")?;
        }
        if let Some(deadline) = optional_duration("gate.deadline", self.gate.deadline.as_deref())? {
            poller = poller.with_deadline(deadline.to_std().context("gate.deadline must be positive")?);
        }
        Ok(poller)
    }

    pub fn source_connector(&self) -> Result<FileSource> {
        match &self.source {
            SourceSection::Files {
                format,
                csv_options,
                ..
            } => {
                let format = match format {
                    Some(raw) => raw.parse::<FileFormat>().map_err(anyhow::Error::msg)?,
                    None => FileFormat::default(),
                };
                let source = FileSource::new(format);
                match csv_options {
                    Some(options) => Ok(source
                        .with_csv_options(options)
                        .context("Invalid source.csv_options")?),
                    None => Ok(source),
                }
            }
        }
    }

    pub fn source_url(&self) -> String {
        match &self.source {
            SourceSection::Files { root, .. } => root.display().to_string(),
        }
    }

    pub fn registry_url(&self) -> &str {
        &self.registry.url
    }

    /// Table configs with `general` applied, in table-name order.
    pub fn effective_tables(&self) -> Vec<(String, TableConfig)> {
        self.tables
            .iter()
            .map(|(name, table)| (name.clone(), table.merged_over(&self.general)))
            .collect()
    }

    /// Build and validate one job per table for `cadence`.
    pub fn jobs(&self, cadence: Cadence) -> Result<Vec<Job>> {
        let job_id = cadence.job_id(&self.pipeline.name)?;
        let capabilities = self.source_connector()?.capabilities();
        let suffix = self
            .target
            .schema_suffix
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEMA_SUFFIX.to_string());

        let mut jobs = Vec::with_capacity(self.tables.len());
        for (name, table) in self.effective_tables() {
            let mut target = TargetTable::new(
                &self.target.schema,
                table.target_table.clone().unwrap_or_else(|| name.clone()),
            )
            .with_suffix(suffix.clone());
            if let Some(database) = &self.target.database {
                target = target.with_database(database);
            }

            let mut builder = Job::builder(job_id.clone(), cadence.strategy(), self.target.engine, target)
                .window(table.window().with_context(|| format!("Table '{}'", name))?)
                .source_capabilities(capabilities.clone());
            if let Some(columns) = table.columns {
                builder = builder.columns(columns.into_iter().collect::<Columns>());
            }
            if let Some(exclude) = table.exclude_columns {
                builder = builder.exclude_columns(exclude);
            }
            if let Some(keys) = table.merge_on {
                builder = builder.merge_on(keys);
            }
            if let Some(key) = table.primary_key {
                builder = builder.primary_key(key);
            }
            if let Some(indexes) = table.index_columns {
                builder = builder.index_columns(indexes);
            }
            if let Some(hashed) = table.hash_columns {
                builder = builder.hash_columns(hashed);
            }
            if let Some(algorithm) = table.hash_algorithm {
                builder = builder.hash_algorithm(algorithm);
            }
            if let Some(clean) = table.clean_data {
                builder = builder.clean_data(clean);
            }
            if let Some(key) = table.key {
                builder = builder.key(key);
            }
            if let Some(metadata) = table.metadata {
                builder = builder.metadata(
                    metadata
                        .into_iter()
                        .map(|(k, v)| (k, Value::from_json(v)))
                        .collect::<Record>(),
                );
            }
            if let Some(allow) = table.allow_destructive_evolution {
                builder = builder.allow_destructive_evolution(allow);
            }

            let job = builder
                .build()
                .with_context(|| format!("Invalid configuration for table '{}' ({})", name, cadence))?;
            jobs.push(job);
        }
        Ok(jobs)
    }
}
