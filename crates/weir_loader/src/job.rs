//! Job definitions. A [`Job`] is immutable and fully validated; every
//! configuration mistake surfaces from [`JobBuilder::build`].

use crate::error::ConfigError;
use crate::source::SourceCapabilities;
use chrono::{DateTime, Duration, Utc};
use weir_protocol::{Columns, Engine, FieldType, HashAlgorithm, HashSpec, JobId, Record, Strategy};
use weir_sinks::TargetTable;

/// How rows are matched for update-or-insert.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyConfig {
    /// Keys come from primary-key columns of an explicit definition, if any.
    #[default]
    None,
    MergeOn(Vec<String>),
    PrimaryKey(String),
}

/// Static window overrides and relative offsets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowConfig {
    pub load_from: Option<DateTime<Utc>>,
    pub load_until: Option<DateTime<Utc>>,
    /// Start of the window when the target table does not exist yet.
    pub reload_from: Option<DateTime<Utc>>,
    /// Look-back subtracted from `from` on incremental loads.
    pub from_offset: Option<Duration>,
    /// Look-ahead added to `until` on incremental loads.
    pub until_offset: Option<Duration>,
    /// Quiescence delay past `until`, incremental only.
    pub wait_for_seconds: u64,
}

impl WindowConfig {
    pub fn has_overrides(&self) -> bool {
        self.load_from.is_some()
            || self.load_until.is_some()
            || self.reload_from.is_some()
            || self.from_offset.is_some()
            || self.until_offset.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    job_id: JobId,
    strategy: Strategy,
    engine: Engine,
    target: TargetTable,
    columns: Option<Columns>,
    exclude_columns: Vec<String>,
    keys: KeyConfig,
    merge_keys: Vec<String>,
    index_columns: Vec<String>,
    hash: Option<HashSpec>,
    clean_data: bool,
    window: WindowConfig,
    key: Option<String>,
    metadata: Record,
    allow_destructive_evolution: bool,
}

impl Job {
    pub fn builder(job_id: JobId, strategy: Strategy, engine: Engine, target: TargetTable) -> JobBuilder {
        JobBuilder::new(job_id, strategy, engine, target)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn target(&self) -> &TargetTable {
        &self.target
    }

    pub fn columns(&self) -> Option<&Columns> {
        self.columns.as_ref()
    }

    pub fn exclude_columns(&self) -> &[String] {
        &self.exclude_columns
    }

    pub fn key_config(&self) -> &KeyConfig {
        &self.keys
    }

    /// Resolved merge keys; empty means append.
    pub fn merge_keys(&self) -> &[String] {
        &self.merge_keys
    }

    pub fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    pub fn hash(&self) -> Option<&HashSpec> {
        self.hash.as_ref()
    }

    pub fn hash_columns(&self) -> &[String] {
        self.hash.as_ref().map(|h| h.columns.as_slice()).unwrap_or(&[])
    }

    pub fn clean_data(&self) -> bool {
        self.clean_data
    }

    pub fn window(&self) -> &WindowConfig {
        &self.window
    }

    /// Explicit resource key; replaces the time window when set.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn metadata(&self) -> &Record {
        &self.metadata
    }

    pub fn allow_destructive_evolution(&self) -> bool {
        self.allow_destructive_evolution
    }
}

#[derive(Debug, Clone)]
pub struct JobBuilder {
    job_id: JobId,
    strategy: Strategy,
    engine: Engine,
    target: TargetTable,
    columns: Option<Columns>,
    exclude_columns: Vec<String>,
    merge_on: Option<Vec<String>>,
    primary_key: Option<String>,
    index_columns: Vec<String>,
    hash_columns: Vec<String>,
    hash_algorithm: Option<String>,
    clean_data: bool,
    window: WindowConfig,
    key: Option<String>,
    metadata: Record,
    allow_destructive_evolution: bool,
    capabilities: SourceCapabilities,
}

impl JobBuilder {
    pub fn new(job_id: JobId, strategy: Strategy, engine: Engine, target: TargetTable) -> Self {
        Self {
            job_id,
            strategy,
            engine,
            target,
            columns: None,
            exclude_columns: Vec::new(),
            merge_on: None,
            primary_key: None,
            index_columns: Vec::new(),
            hash_columns: Vec::new(),
            hash_algorithm: None,
            clean_data: true,
            window: WindowConfig::default(),
            key: None,
            metadata: Record::new(),
            allow_destructive_evolution: false,
            capabilities: SourceCapabilities::default(),
        }
    }

    pub fn columns(mut self, columns: Columns) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn exclude_columns(mut self, names: Vec<String>) -> Self {
        self.exclude_columns = names;
        self
    }

    pub fn merge_on(mut self, keys: Vec<String>) -> Self {
        self.merge_on = Some(keys);
        self
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = Some(key.into());
        self
    }

    pub fn index_columns(mut self, exprs: Vec<String>) -> Self {
        self.index_columns = exprs;
        self
    }

    pub fn hash_columns(mut self, names: Vec<String>) -> Self {
        self.hash_columns = names;
        self
    }

    pub fn hash_algorithm(mut self, name: impl Into<String>) -> Self {
        self.hash_algorithm = Some(name.into());
        self
    }

    pub fn clean_data(mut self, clean: bool) -> Self {
        self.clean_data = clean;
        self
    }

    pub fn window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn metadata(mut self, metadata: Record) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn allow_destructive_evolution(mut self, allow: bool) -> Self {
        self.allow_destructive_evolution = allow;
        self
    }

    pub fn source_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn build(self) -> Result<Job, ConfigError> {
        if self.merge_on.is_some() && self.primary_key.is_some() {
            return Err(ConfigError::MutuallyExclusive("merge_on", "primary_key"));
        }
        if self.columns.is_some() && !self.exclude_columns.is_empty() {
            return Err(ConfigError::MutuallyExclusive("columns", "exclude_columns"));
        }
        if !self.hash_columns.is_empty() && !self.clean_data {
            return Err(ConfigError::HashWithoutCleaning);
        }
        let algorithm = match &self.hash_algorithm {
            Some(name) => name
                .parse::<HashAlgorithm>()
                .map_err(|_| ConfigError::UnknownHashAlgorithm(name.clone()))?,
            None => HashAlgorithm::default(),
        };
        if self.target.database.is_some() && !self.engine.supports_database() {
            return Err(ConfigError::DatabaseNotSupported(self.engine));
        }
        if self.window.from_offset.is_some_and(|d| d < Duration::zero()) {
            return Err(ConfigError::NegativeOffset("from_offset"));
        }
        if self.window.until_offset.is_some_and(|d| d < Duration::zero()) {
            return Err(ConfigError::NegativeOffset("until_offset"));
        }
        if self.key.is_some() {
            if let Some(field) = first_window_override(&self.window) {
                return Err(ConfigError::KeyWithWindow(field));
            }
        }
        if self.capabilities.requires_columns && self.columns.is_none() {
            return Err(ConfigError::ColumnsRequired);
        }
        if !self.capabilities.supports(self.strategy) {
            return Err(ConfigError::StrategyNotSupported(self.strategy));
        }

        let keys = match (self.merge_on, self.primary_key) {
            (Some(keys), None) => KeyConfig::MergeOn(keys),
            (None, Some(key)) => KeyConfig::PrimaryKey(key),
            _ => KeyConfig::None,
        };
        let merge_keys: Vec<String> = match &keys {
            KeyConfig::MergeOn(keys) => keys.clone(),
            KeyConfig::PrimaryKey(key) => vec![key.clone()],
            KeyConfig::None => self
                .columns
                .as_ref()
                .map(|c| c.primary_keys().into_iter().map(String::from).collect())
                .unwrap_or_default(),
        };
        if let Some(columns) = &self.columns {
            if let Some(missing) = merge_keys.iter().find(|k| !columns.contains(k)) {
                return Err(ConfigError::UnknownMergeKey(missing.clone()));
            }
        }
        if self.strategy == Strategy::Incremental && merge_keys.is_empty() {
            return Err(ConfigError::IncrementalWithoutKeys);
        }

        let columns = self.columns.map(|mut columns| {
            for name in &self.hash_columns {
                if let Some(spec) = columns.get_mut(name) {
                    spec.hashed = true;
                    spec.field_type = FieldType::Text;
                }
            }
            for key in &merge_keys {
                if let Some(spec) = columns.get_mut(key) {
                    spec.primary_key = true;
                }
            }
            columns
        });
        let hash = (!self.hash_columns.is_empty()).then(|| HashSpec::new(self.hash_columns, algorithm));

        Ok(Job {
            job_id: self.job_id,
            strategy: self.strategy,
            engine: self.engine,
            target: self.target,
            columns,
            exclude_columns: self.exclude_columns,
            keys,
            merge_keys,
            index_columns: self.index_columns,
            hash,
            clean_data: self.clean_data,
            window: self.window,
            key: self.key,
            metadata: self.metadata,
            allow_destructive_evolution: self.allow_destructive_evolution,
        })
    }
}

fn first_window_override(window: &WindowConfig) -> Option<&'static str> {
    if window.load_from.is_some() {
        Some("load_from")
    } else if window.load_until.is_some() {
        Some("load_until")
    } else if window.reload_from.is_some() {
        Some("reload_from")
    } else if window.from_offset.is_some() {
        Some("from_offset")
    } else if window.until_offset.is_some() {
        Some("until_offset")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use weir_protocol::ColumnSpec;

    fn text_columns<'a>(names: impl IntoIterator<Item = &'a str>) -> Columns {
        names
            .into_iter()
            .map(|n| ColumnSpec::new(n, FieldType::Text))
            .collect()
    }

    fn builder(strategy: Strategy) -> JobBuilder {
        Job::builder(
            JobId::new("shop_orders").unwrap(),
            strategy,
            Engine::Postgres,
            TargetTable::new("raw", "orders"),
        )
    }

    #[test]
    fn merge_on_and_primary_key_are_exclusive() {
        let err = builder(Strategy::FullRefresh)
            .merge_on(vec!["id".into()])
            .primary_key("id")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MutuallyExclusive("merge_on", "primary_key")));
    }

    #[test]
    fn columns_and_exclude_are_exclusive() {
        let err = builder(Strategy::FullRefresh)
            .columns(text_columns(["id"]))
            .exclude_columns(vec!["secret".into()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MutuallyExclusive("columns", "exclude_columns")));
    }

    #[test]
    fn hashing_requires_cleaning() {
        let err = builder(Strategy::FullRefresh)
            .hash_columns(vec!["email".into()])
            .clean_data(false)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::HashWithoutCleaning));
    }

    #[test]
    fn unknown_hash_algorithm_is_rejected() {
        let err = builder(Strategy::FullRefresh)
            .hash_columns(vec!["email".into()])
            .hash_algorithm("md5")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownHashAlgorithm(name) if name == "md5"));
    }

    #[test]
    fn postgres_rejects_database() {
        let err = Job::builder(
            JobId::new("j").unwrap(),
            Strategy::FullRefresh,
            Engine::Postgres,
            TargetTable::new("raw", "t").with_database("warehouse"),
        )
        .build()
        .unwrap_err();
        assert!(matches!(err, ConfigError::DatabaseNotSupported(Engine::Postgres)));
    }

    #[test]
    fn incremental_needs_keys() {
        let err = builder(Strategy::Incremental).build().unwrap_err();
        assert!(matches!(err, ConfigError::IncrementalWithoutKeys));

        let job = builder(Strategy::Incremental)
            .columns(Columns::new().with(ColumnSpec::new("id", FieldType::Integer).primary_key()))
            .build()
            .unwrap();
        assert_eq!(job.merge_keys(), ["id".to_string()]);
    }

    #[test]
    fn primary_key_becomes_single_merge_key() {
        let job = builder(Strategy::Incremental).primary_key("id").build().unwrap();
        assert_eq!(job.merge_keys(), ["id".to_string()]);
        assert_eq!(job.key_config(), &KeyConfig::PrimaryKey("id".into()));
    }

    #[test]
    fn merge_keys_must_be_declared_columns() {
        let err = builder(Strategy::Incremental)
            .columns(text_columns(["name"]))
            .merge_on(vec!["id".into()])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMergeKey(k) if k == "id"));
    }

    #[test]
    fn negative_offsets_are_rejected() {
        let err = builder(Strategy::FullRefresh)
            .window(WindowConfig {
                from_offset: Some(Duration::hours(-1)),
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NegativeOffset("from_offset")));
    }

    #[test]
    fn key_excludes_window_overrides() {
        let err = builder(Strategy::FullRefresh)
            .key("exports/2024-01-01.json")
            .window(WindowConfig {
                load_from: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                ..Default::default()
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::KeyWithWindow("load_from")));
    }

    #[test]
    fn source_capabilities_are_enforced() {
        let full_only = SourceCapabilities {
            strategies: vec![Strategy::FullRefresh],
            requires_columns: false,
        };
        let err = builder(Strategy::Append)
            .source_capabilities(full_only)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::StrategyNotSupported(Strategy::Append)));

        let needs_columns = SourceCapabilities {
            requires_columns: true,
            ..SourceCapabilities::default()
        };
        let err = builder(Strategy::FullRefresh)
            .source_capabilities(needs_columns)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ColumnsRequired));
    }

    #[test]
    fn hashed_columns_are_forced_to_text() {
        let job = builder(Strategy::FullRefresh)
            .columns(Columns::new().with(ColumnSpec::new("ssn", FieldType::Integer)))
            .hash_columns(vec!["ssn".into()])
            .hash_algorithm("blake3")
            .build()
            .unwrap();
        let spec = job.columns().unwrap().get("ssn").unwrap();
        assert!(spec.hashed);
        assert_eq!(spec.field_type, FieldType::Text);
        assert_eq!(job.hash().unwrap().algorithm, HashAlgorithm::Blake3);
    }
}
