//! Local-files source: JSON, JSON-lines, concatenated JSON and CSV files
//! under a root directory.
//!
//! The endpoint URL is the root path (an optional `file://` prefix is
//! stripped). A window request reads every file whose modification time falls
//! in `[from, until)`, in path order, one batch per file. A key request reads
//! the single file at `root/key`.
//!
//! Listing and reading are blocking filesystem work and run on tokio's
//! blocking pool.

use crate::source::{BatchReader, ExtractRequest, SourceConnector, SourceError};
use crate::transport::Endpoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use walkdir::WalkDir;
use weir_protocol::{record_from_json, Record, RecordBatch, Value, Watermark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// A JSON array of objects, or a single object.
    #[default]
    Json,
    JsonLines,
    /// Objects written back to back with no separator (`{..}{..}`), as
    /// delivered by Kinesis Firehose. Files of any extension are read.
    ConcatenatedJson,
    Csv,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::JsonLines => "json_lines",
            FileFormat::ConcatenatedJson => "concatenated_json",
            FileFormat::Csv => "csv",
        }
    }

    /// Empty means any extension.
    fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileFormat::Json => &["json"],
            FileFormat::JsonLines => &["jsonl", "ndjson"],
            FileFormat::ConcatenatedJson => &[],
            FileFormat::Csv => &["csv"],
        }
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "json" => Ok(FileFormat::Json),
            "json_lines" | "jsonl" | "ndjson" => Ok(FileFormat::JsonLines),
            "concatenated_json" | "firehose_json" | "aws_firehose_json" => {
                Ok(FileFormat::ConcatenatedJson)
            }
            "csv" => Ok(FileFormat::Csv),
            _ => Err(format!(
                "Invalid file format: '{}'. Expected: json, json_lines, concatenated_json, or csv",
                s
            )),
        }
    }
}

/// CSV dialect settings, as written in pipeline files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvOptions {
    pub delimiter: char,
    pub quote: char,
    /// Escape character inside quoted fields. Unset means doubled quotes only.
    pub escape: Option<char>,
    pub double_quote: bool,
    /// When false, quote characters are ordinary data.
    pub quoting: bool,
    /// Lines starting with this character are skipped.
    pub comment: Option<char>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            escape: None,
            double_quote: true,
            quoting: true,
            comment: None,
        }
    }
}

/// [`CsvOptions`] checked down to single bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CsvDialect {
    delimiter: u8,
    quote: u8,
    escape: Option<u8>,
    double_quote: bool,
    quoting: bool,
    comment: Option<u8>,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: None,
            double_quote: true,
            quoting: true,
            comment: None,
        }
    }
}

impl TryFrom<&CsvOptions> for CsvDialect {
    type Error = SourceError;

    fn try_from(options: &CsvOptions) -> Result<Self, Self::Error> {
        Ok(Self {
            delimiter: ascii_byte("delimiter", options.delimiter)?,
            quote: ascii_byte("quote", options.quote)?,
            escape: options.escape.map(|c| ascii_byte("escape", c)).transpose()?,
            double_quote: options.double_quote,
            quoting: options.quoting,
            comment: options.comment.map(|c| ascii_byte("comment", c)).transpose()?,
        })
    }
}

impl CsvDialect {
    fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(true)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .escape(self.escape)
            .double_quote(self.double_quote)
            .quoting(self.quoting)
            .comment(self.comment);
        builder
    }
}

fn ascii_byte(field: &str, c: char) -> Result<u8, SourceError> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| SourceError::Config(format!("csv {} must be one ASCII character, got {:?}", field, c)))
}

#[derive(Debug, Clone, Default)]
pub struct FileSource {
    format: FileFormat,
    csv: CsvDialect,
}

impl FileSource {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            csv: CsvDialect::default(),
        }
    }

    /// Override the CSV dialect. Only valid for the CSV format.
    pub fn with_csv_options(mut self, options: &CsvOptions) -> Result<Self, SourceError> {
        if self.format != FileFormat::Csv {
            return Err(SourceError::Config(format!(
                "csv options are only valid for csv files, not {}",
                self.format.as_str()
            )));
        }
        self.csv = CsvDialect::try_from(options)?;
        Ok(self)
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }
}

fn list_window(root: &Path, format: FileFormat, window: &Watermark) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| SourceError::Io {
            path: root.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() || !matches_extension(format, entry.path()) {
            continue;
        }
        let modified = entry
            .metadata()
            .map_err(|e| SourceError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?
            .modified()
            .map_err(|source| SourceError::Io {
                path: entry.path().to_path_buf(),
                source,
            })?;
        if window.contains(DateTime::<Utc>::from(modified)) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn matches_extension(format: FileFormat, path: &Path) -> bool {
    let extensions = format.extensions();
    if extensions.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn root_path(endpoint: &Endpoint) -> PathBuf {
    PathBuf::from(endpoint.url.strip_prefix("file://").unwrap_or(&endpoint.url))
}

async fn blocking<T, F>(work: F) -> Result<T, SourceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SourceError::Other(format!("file task failed: {}", e)))?
}

#[async_trait]
impl SourceConnector for FileSource {
    async fn extract(
        &self,
        endpoint: &Endpoint,
        request: &ExtractRequest,
    ) -> Result<Box<dyn BatchReader>, SourceError> {
        let root = root_path(endpoint);
        let format = self.format;
        let request = request.clone();
        let listed_root = root.clone();
        let files = blocking(move || match request {
            ExtractRequest::Key(key) => {
                let path = listed_root.join(key);
                if !path.is_file() {
                    return Err(SourceError::NotFound(path.display().to_string()));
                }
                Ok(vec![path])
            }
            ExtractRequest::Window(window) => list_window(&listed_root, format, &window),
        })
        .await?;
        debug!(root = %root.display(), files = files.len(), "listed source files");
        Ok(Box::new(FileReader {
            format,
            csv: self.csv,
            files: files.into_iter(),
        }))
    }
}

struct FileReader {
    format: FileFormat,
    csv: CsvDialect,
    files: std::vec::IntoIter<PathBuf>,
}

#[async_trait]
impl BatchReader for FileReader {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, SourceError> {
        let Some(path) = self.files.next() else {
            return Ok(None);
        };
        let (format, csv) = (self.format, self.csv);
        let read_path = path.clone();
        let batch = blocking(move || read_file(&read_path, format, &csv)).await?;
        debug!(path = %path.display(), rows = batch.len(), "read source file");
        Ok(Some(batch))
    }
}

fn read_file(path: &Path, format: FileFormat, csv: &CsvDialect) -> Result<RecordBatch, SourceError> {
    let parse_err = |message: String| SourceError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let object = |what: String, row: serde_json::Value| {
        record_from_json(row).map_err(|other| {
            parse_err(format!("{}: expected an object, found {}", what, json_kind(&other)))
        })
    };
    match format {
        FileFormat::Json => {
            let text = read_text(path)?;
            let value: serde_json::Value =
                serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?;
            let rows = match value {
                serde_json::Value::Array(rows) => rows,
                single @ serde_json::Value::Object(_) => vec![single],
                other => {
                    return Err(parse_err(format!(
                        "expected an array or object, found {}",
                        json_kind(&other)
                    )))
                }
            };
            let records = rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| object(format!("element {}", i), row))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RecordBatch::new(records))
        }
        FileFormat::JsonLines => {
            let text = read_text(path)?;
            let mut records = Vec::new();
            for (n, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let row = serde_json::from_str::<serde_json::Value>(line)
                    .map_err(|e| parse_err(format!("line {}: {}", n + 1, e)))?;
                records.push(object(format!("line {}", n + 1), row)?);
            }
            Ok(RecordBatch::new(records))
        }
        FileFormat::ConcatenatedJson => {
            let text = read_text(path)?;
            let mut records = Vec::new();
            let stream = serde_json::Deserializer::from_str(&text).into_iter::<serde_json::Value>();
            for (i, row) in stream.enumerate() {
                let row = row.map_err(|e| parse_err(format!("object {}: {}", i, e)))?;
                records.push(object(format!("object {}", i), row)?);
            }
            Ok(RecordBatch::new(records))
        }
        FileFormat::Csv => {
            let mut reader = csv
                .reader_builder()
                .from_path(path)
                .map_err(|e| parse_err(e.to_string()))?;
            let headers = reader.headers().map_err(|e| parse_err(e.to_string()))?.clone();
            let mut records = Vec::new();
            for row in reader.records() {
                let row = row.map_err(|e| parse_err(e.to_string()))?;
                let record: Record = headers
                    .iter()
                    .zip(row.iter())
                    .map(|(name, field)| {
                        let value = if field.is_empty() {
                            Value::Null
                        } else {
                            Value::Text(field.to_string())
                        };
                        (name.to_string(), value)
                    })
                    .collect();
                records.push(record);
            }
            Ok(RecordBatch::new(records))
        }
    }
}

fn read_text(path: &Path) -> Result<String, SourceError> {
    fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn drain(mut reader: Box<dyn BatchReader>) -> Vec<RecordBatch> {
        let mut out = Vec::new();
        while let Some(batch) = reader.next_batch().await.unwrap() {
            out.push(batch);
        }
        out
    }

    async fn read_key(source: &FileSource, dir: &Path, key: &str) -> Result<RecordBatch, SourceError> {
        let endpoint = Endpoint::new(dir.display().to_string());
        let mut reader = source.extract(&endpoint, &ExtractRequest::Key(key.into())).await?;
        Ok(reader.next_batch().await?.unwrap_or_default())
    }

    #[tokio::test]
    async fn reads_json_array_and_object() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        fs::write(dir.path().join("b.json"), r#"{"id": 3}"#).unwrap();
        fs::write(dir.path().join("ignored.csv"), "id\n4\n").unwrap();

        let source = FileSource::new(FileFormat::Json);
        let endpoint = Endpoint::new(dir.path().display().to_string());
        let reader = source
            .extract(&endpoint, &ExtractRequest::Window(Watermark::unbounded()))
            .await
            .unwrap();
        let batches = drain(reader).await;
        assert_eq!(batches.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn non_object_array_element_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mixed.json"), r#"[{"id": 1}, 2, "three", {"id": 4}]"#).unwrap();

        let err = read_key(&FileSource::new(FileFormat::Json), dir.path(), "mixed.json")
            .await
            .unwrap_err();
        match err {
            SourceError::Parse { message, .. } => {
                assert_eq!(message, "element 1: expected an object, found a number")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_object_line_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rows.jsonl"), "{\"id\": 1}\n\n[1, 2]\n").unwrap();

        let err = read_key(&FileSource::new(FileFormat::JsonLines), dir.path(), "rows.jsonl")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { ref message, .. } if message.starts_with("line 3:")));
    }

    #[tokio::test]
    async fn window_filters_by_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.jsonl"), "{\"id\": 1}\n\n{\"id\": 2}\n").unwrap();

        let source = FileSource::new(FileFormat::JsonLines);
        let endpoint = Endpoint::new(format!("file://{}", dir.path().display()));
        let future = Watermark::new(Some(Utc::now() + Duration::hours(1)), None);
        let batches = drain(
            source
                .extract(&endpoint, &ExtractRequest::Window(future))
                .await
                .unwrap(),
        )
        .await;
        assert!(batches.is_empty());

        let around_now = Watermark::new(
            Some(Utc::now() - Duration::hours(1)),
            Some(Utc::now() + Duration::hours(1)),
        );
        let batches = drain(
            source
                .extract(&endpoint, &ExtractRequest::Window(around_now))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn concatenated_objects_are_split() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("delivery-2024-01-01-00"),
            r#"{"id":1,"note":"a}{b"}{"id":2}
{"id":3}"#,
        )
        .unwrap();

        let source = FileSource::new(FileFormat::ConcatenatedJson);
        let endpoint = Endpoint::new(dir.path().display().to_string());
        let batches = drain(
            source
                .extract(&endpoint, &ExtractRequest::Window(Watermark::unbounded()))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(batches.len(), 1);
        let records = batches[0].records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("note"), Some(&Value::from("a}{b")));
        assert_eq!(records[2].get("id"), Some(&Value::Integer(3)));
    }

    #[tokio::test]
    async fn truncated_concatenated_object_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("delivery"), r#"{"id":1}{"id":"#).unwrap();

        let err = read_key(&FileSource::new(FileFormat::ConcatenatedJson), dir.path(), "delivery")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { ref message, .. } if message.starts_with("object 1:")));
    }

    #[tokio::test]
    async fn csv_fields_are_text_and_blank_is_null() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.csv"), "id,name\n1,ann\n2,\n").unwrap();

        let batch = read_key(&FileSource::new(FileFormat::Csv), dir.path(), "users.csv")
            .await
            .unwrap();
        let records = batch.records();
        assert_eq!(records[0].get("name"), Some(&Value::Text("ann".into())));
        assert_eq!(records[1].get("name"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn csv_options_set_the_dialect() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("users.csv"),
            "# exported\nid;name\n1;'Smith; Ann'\n2;'O''Brien'\n",
        )
        .unwrap();

        let options = CsvOptions {
            delimiter: ';',
            quote: '\'',
            comment: Some('#'),
            ..CsvOptions::default()
        };
        let source = FileSource::new(FileFormat::Csv).with_csv_options(&options).unwrap();
        let batch = read_key(&source, dir.path(), "users.csv").await.unwrap();
        let records = batch.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("name"), Some(&Value::from("Smith; Ann")));
        assert_eq!(records[1].get("name"), Some(&Value::from("O'Brien")));
    }

    #[test]
    fn csv_options_are_csv_only() {
        let options = CsvOptions {
            delimiter: '\t',
            ..CsvOptions::default()
        };
        let err = FileSource::new(FileFormat::Json).with_csv_options(&options).unwrap_err();
        assert!(matches!(err, SourceError::Config(_)));

        let wide = CsvOptions {
            delimiter: '§',
            ..CsvOptions::default()
        };
        assert!(FileSource::new(FileFormat::Csv).with_csv_options(&wide).is_err());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_key(&FileSource::default(), dir.path(), "nope.json")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("json-lines".parse::<FileFormat>().unwrap(), FileFormat::JsonLines);
        assert_eq!(
            "AWS_FIREHOSE_JSON".parse::<FileFormat>().unwrap(),
            FileFormat::ConcatenatedJson
        );
        assert!("xml".parse::<FileFormat>().is_err());
    }
}
