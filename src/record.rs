//! Запись библиотеки ("книга"): markdown-файл с YAML front matter.
//!
//! ```text
//! ---
//! title: Dune
//! tags: [fiction]
//! read:
//!   - started: 2024-01-01
//!     finished: 2024-02-01
//! ---
//!
//! Заметки...
//! ```
//!
//! Core использует загрузчик через трейт [`RecordLoader`]; [`FrontMatterLoader`]
//! — реализация по умолчанию.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{ShelfError, ShelfResult};

const FRONT_MATTER_FENCE: &str = "---";

/// Дата из front matter. Нераспознанная строка сохраняется как есть.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateValue {
    Date(NaiveDate),
    Raw(String),
}

impl DateValue {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            DateValue::Date(d) => Some(*d),
            DateValue::Raw(_) => None,
        }
    }

    fn from_yaml(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(
                NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .map_or_else(|_| DateValue::Raw(s.clone()), DateValue::Date),
            ),
            Value::Number(n) => Some(DateValue::Raw(n.to_string())),
            _ => None,
        }
    }

    fn to_yaml(&self) -> Value {
        match self {
            DateValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            DateValue::Raw(s) => Value::String(s.clone()),
        }
    }
}

/// Одно прочтение книги.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateValue>,
}

impl ReadEntry {
    pub fn started(date: DateValue) -> Self {
        Self {
            started: Some(date),
            finished: None,
        }
    }

    pub fn finished(date: DateValue) -> Self {
        Self {
            started: None,
            finished: Some(date),
        }
    }
}

/// Запись. Идентичность — путь.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub path: PathBuf,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_rating: Option<f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub read: Vec<ReadEntry>,
    /// Прочие ключи front matter, которые core не интерпретирует.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
    #[serde(default)]
    pub content: String,
}

impl Record {
    /// Пустая запись для пути.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = file_name_of(&path);
        Self {
            path,
            name,
            ..Self::default()
        }
    }

    /// Запись с дефолтными полями и исходным содержимым — для файла,
    /// который не удалось разобрать.
    pub fn degraded(path: impl Into<PathBuf>, raw: String) -> Self {
        Self {
            content: raw,
            ..Self::new(path)
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_read(mut self, read: Vec<ReadEntry>) -> Self {
        self.read = read;
        self
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Загрузчик записей (внешний коллаборатор core).
///
/// Ошибка разбора должна возвращаться как [`ShelfError::Parse`]; ошибки
/// ввода-вывода — как [`ShelfError::Io`].
pub trait RecordLoader: Send + Sync {
    fn load(&self, path: &Path) -> ShelfResult<Record>;
}

/// Запись плюс (необязательная) ошибка разбора, которая пересылается
/// подписчикам вместе с обычным событием.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadedRecord {
    pub record: Record,
    pub parse_error: Option<String>,
}

/// Результат загрузки с точки зрения синхронизации.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadOutcome {
    Loaded(LoadedRecord),
    /// Файла уже нет (удалён между событием и обработкой).
    Missing,
}

/// Загрузить запись; ошибка разбора не выкидывает файл из индекса.
pub fn load_or_degrade(loader: &dyn RecordLoader, path: &Path) -> LoadOutcome {
    match loader.load(path) {
        Ok(record) => LoadOutcome::Loaded(LoadedRecord {
            record,
            parse_error: None,
        }),
        Err(ShelfError::Parse { message, .. }) => match std::fs::read_to_string(path) {
            Ok(raw) => LoadOutcome::Loaded(LoadedRecord {
                record: Record::degraded(path, raw),
                parse_error: Some(message),
            }),
            Err(_) => LoadOutcome::Missing,
        },
        Err(ShelfError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => LoadOutcome::Missing,
        Err(other) => {
            if path.exists() {
                LoadOutcome::Loaded(LoadedRecord {
                    record: Record::new(path),
                    parse_error: Some(other.to_string()),
                })
            } else {
                LoadOutcome::Missing
            }
        }
    }
}

/// Загрузчик по умолчанию: YAML front matter + markdown.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrontMatterLoader;

impl RecordLoader for FrontMatterLoader {
    fn load(&self, path: &Path) -> ShelfResult<Record> {
        let raw = std::fs::read_to_string(path)?;
        parse_record(path, &raw)
    }
}

/// Разделить текст на YAML и markdown.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let Some(rest) = raw.strip_prefix(FRONT_MATTER_FENCE) else {
        return (None, raw);
    };
    let Some(rest) = rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) else {
        return (None, raw);
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FRONT_MATTER_FENCE {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            // Одна пустая строка между front matter и текстом — часть формата.
            let body = body
                .strip_prefix("\r\n")
                .or_else(|| body.strip_prefix('\n'))
                .unwrap_or(body);
            return (Some(yaml), body);
        }
        offset += line.len();
    }
    (None, raw)
}

fn yaml_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn yaml_tags(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(yaml_string).collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn yaml_read_entries(value: &Value) -> Vec<ReadEntry> {
    let Value::Sequence(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let map = item.as_mapping()?;
            let started = map.get("started").and_then(DateValue::from_yaml);
            let finished = map.get("finished").and_then(DateValue::from_yaml);
            if started.is_none() && finished.is_none() {
                return None;
            }
            Some(ReadEntry { started, finished })
        })
        .collect()
}

/// Разобрать текст файла в [`Record`].
pub fn parse_record(path: &Path, raw: &str) -> ShelfResult<Record> {
    let (yaml, body) = split_front_matter(raw);
    let mut record = Record::new(path);
    record.content = body.to_string();

    let Some(yaml) = yaml else {
        return Ok(record);
    };
    if yaml.trim().is_empty() {
        return Ok(record);
    }

    let data: BTreeMap<String, Value> =
        serde_yaml::from_str(yaml).map_err(|e| ShelfError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    for (key, value) in data {
        match key.as_str() {
            "title" => record.title = yaml_string(&value),
            "author" => record.author = yaml_string(&value),
            "year" => record.year = value.as_i64().or(Some(-1)),
            "myRating" => record.my_rating = value.as_f64().or(Some(-1.0)),
            "tags" => record.tags = yaml_tags(&value),
            "read" => record.read = yaml_read_entries(&value),
            _ => {
                record.extra.insert(key, value);
            }
        }
    }

    Ok(record)
}

/// Закодировать запись обратно в текст файла.
pub fn encode_record(record: &Record) -> ShelfResult<String> {
    let mut data: BTreeMap<String, Value> = record.extra.clone();

    if let Some(title) = &record.title {
        data.insert("title".into(), Value::String(title.clone()));
    }
    if let Some(author) = &record.author {
        data.insert("author".into(), Value::String(author.clone()));
    }
    if let Some(year) = record.year {
        data.insert("year".into(), Value::Number(year.into()));
    }
    if let Some(rating) = record.my_rating {
        data.insert("myRating".into(), Value::Number(rating.into()));
    }
    if !record.tags.is_empty() {
        let tags = record.tags.iter().cloned().map(Value::String).collect();
        data.insert("tags".into(), Value::Sequence(tags));
    }
    if !record.read.is_empty() {
        let entries = record
            .read
            .iter()
            .map(|entry| {
                let mut m = serde_yaml::Mapping::new();
                if let Some(s) = &entry.started {
                    m.insert(Value::String("started".into()), s.to_yaml());
                }
                if let Some(f) = &entry.finished {
                    m.insert(Value::String("finished".into()), f.to_yaml());
                }
                Value::Mapping(m)
            })
            .collect();
        data.insert("read".into(), Value::Sequence(entries));
    }

    if data.is_empty() {
        return Ok(record.content.clone());
    }

    let yaml = serde_yaml::to_string(&data)?;
    Ok(format!(
        "{FRONT_MATTER_FENCE}\n{yaml}{FRONT_MATTER_FENCE}\n\n{}",
        record.content
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = "---\ntitle: Dune\nauthor: Frank Herbert\nyear: 1965\nmyRating: 4.5\ntags: [fiction, scifi]\nread:\n  - started: 2024-01-01\n    finished: 2024-02-01\n  - started: sometime\nshelf: top\n---\n\nGreat book.\n";

    #[test]
    fn test_parse_full_front_matter() {
        let r = parse_record(Path::new("/lib/dune.md"), BOOK).unwrap();
        assert_eq!(r.name, "dune.md");
        assert_eq!(r.title.as_deref(), Some("Dune"));
        assert_eq!(r.author.as_deref(), Some("Frank Herbert"));
        assert_eq!(r.year, Some(1965));
        assert_eq!(r.my_rating, Some(4.5));
        assert!(r.tags.contains("fiction") && r.tags.contains("scifi"));
        assert_eq!(r.read.len(), 2);
        assert_eq!(
            r.read[0].finished,
            Some(DateValue::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()))
        );
        assert_eq!(r.read[1].started, Some(DateValue::Raw("sometime".into())));
        assert_eq!(r.read[1].finished, None);
        assert_eq!(r.extra.get("shelf"), Some(&Value::String("top".into())));
        assert_eq!(r.content, "Great book.\n");
    }

    #[test]
    fn test_parse_without_front_matter() {
        let r = parse_record(Path::new("/lib/plain.md"), "just text").unwrap();
        assert!(r.tags.is_empty());
        assert!(r.read.is_empty());
        assert_eq!(r.content, "just text");
    }

    #[test]
    fn test_parse_invalid_yaml_is_parse_error() {
        let err = parse_record(Path::new("/lib/bad.md"), "---\ntags: [a\n---\n").unwrap_err();
        assert!(matches!(err, ShelfError::Parse { .. }));
    }

    #[test]
    fn test_read_entries_without_dates_are_dropped() {
        let r = parse_record(Path::new("/a.md"), "---\nread:\n  - {}\n  - started: ''\n---\n").unwrap();
        assert!(r.read.is_empty());
    }

    #[test]
    fn test_encode_then_parse_keeps_metadata() {
        let original = parse_record(Path::new("/lib/dune.md"), BOOK).unwrap();
        let text = encode_record(&original).unwrap();
        assert!(text.starts_with("---\n"));
        let again = parse_record(Path::new("/lib/dune.md"), &text).unwrap();
        assert_eq!(again, original);
    }

    #[test]
    fn test_load_or_degrade_keeps_broken_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.md");
        std::fs::write(&path, "---\ntags: [a\n---\nbody").unwrap();

        match load_or_degrade(&FrontMatterLoader, &path) {
            LoadOutcome::Loaded(loaded) => {
                assert!(loaded.parse_error.is_some());
                assert_eq!(loaded.record.path, path);
                assert!(loaded.record.tags.is_empty());
                assert!(loaded.record.content.contains("body"));
            }
            LoadOutcome::Missing => panic!("broken file must stay indexed"),
        }
    }

    #[test]
    fn test_load_or_degrade_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let outcome = load_or_degrade(&FrontMatterLoader, &dir.path().join("none.md"));
        assert_eq!(outcome, LoadOutcome::Missing);
    }
}
