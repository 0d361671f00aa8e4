//! Внешняя поверхность: сообщения в формате, который ждёт клиент.
//!
//! Должна оставаться тонким слоем: только конвертация в wire-формат и
//! запуск сервиса. Вся логика — в `src/*` модулях. Глобального состояния
//! здесь нет: вызывающий владеет [`LibrarySync`].
//!
//! Формат сообщения: `{"type": "FILE_ADD", "data": {...}}`, поля в camelCase.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::bus::{EventBus, EventSink, ScopedEvent, ScopedKind, ShelfEvent};
use crate::config::{resolve_root, SyncConfig};
use crate::error::{ShelfError, ShelfResult};
use crate::logging;
use crate::record::{FrontMatterLoader, Record};
use crate::sync::LibrarySync;
use crate::tree::FolderNode;
use crate::views::{OpenViewSource, ViewId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub path: PathBuf,
    pub record: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub affected_view_ids: Vec<ViewId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePayload {
    pub path: PathBuf,
    pub affected_view_ids: Vec<ViewId>,
}

/// Сообщение клиенту.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiEvent {
    FileAdd(FilePayload),
    FileUpdate(FilePayload),
    FileRemove(RemovePayload),
    TreeUpdate(FolderNode),
    TagsUpdate(Vec<String>),
}

impl From<&ScopedEvent> for ApiEvent {
    fn from(event: &ScopedEvent) -> Self {
        let payload = || FilePayload {
            path: event.path.clone(),
            record: event
                .record
                .clone()
                .unwrap_or_else(|| Record::new(&event.path)),
            parse_error: event.parse_error.clone(),
            affected_view_ids: event.affected_view_ids.clone(),
        };
        match event.kind {
            ScopedKind::Add => Self::FileAdd(payload()),
            ScopedKind::Update => Self::FileUpdate(payload()),
            ScopedKind::Remove => Self::FileRemove(RemovePayload {
                path: event.path.clone(),
                affected_view_ids: event.affected_view_ids.clone(),
            }),
        }
    }
}

impl From<&ShelfEvent> for ApiEvent {
    fn from(event: &ShelfEvent) -> Self {
        match event {
            ShelfEvent::Scoped(scoped) => scoped.into(),
            ShelfEvent::TreeUpdate(tree) => Self::TreeUpdate(tree.clone()),
            ShelfEvent::TagsUpdate(tags) => Self::TagsUpdate(tags.clone()),
        }
    }
}

impl ApiEvent {
    /// Имя сообщения, как в поле `type`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileAdd(_) => "FILE_ADD",
            Self::FileUpdate(_) => "FILE_UPDATE",
            Self::FileRemove(_) => "FILE_REMOVE",
            Self::TreeUpdate(_) => "TREE_UPDATE",
            Self::TagsUpdate(_) => "TAGS_UPDATE",
        }
    }

    pub fn to_json(&self) -> ShelfResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Пишет каждое событие отдельной строкой JSON (например, в stdout
/// дочернего процесса или в сокет).
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn deliver(&self, event: &ShelfEvent) -> ShelfResult<()> {
        let line = ApiEvent::from(event).to_json()?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}").map_err(|e| ShelfError::SinkClosed(e.to_string()))?;
        out.flush().map_err(|e| ShelfError::SinkClosed(e.to_string()))
    }
}

/// Инициализация логирования (можно вызвать сразу после старта процесса).
pub fn init_logging() {
    logging::init_logging();
}

/// Запуск синхронизации с загрузчиком по умолчанию.
///
/// - Если `override_path` = `None` → используется дефолтный `Documents/Bookshelf`
///   (создаётся при отсутствии).
/// - Если `Some` → абсолютный путь к существующей директории, иначе ошибка.
pub fn start_library(
    override_path: Option<&str>,
    views: Arc<dyn OpenViewSource>,
    bus: Arc<EventBus>,
) -> ShelfResult<LibrarySync> {
    logging::init_logging();
    let root = resolve_root(override_path)?;
    LibrarySync::start(
        SyncConfig::new(root),
        views,
        Arc::new(FrontMatterLoader),
        bus,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::{OpenView, SharedViews};
    use serde_json::Value;

    fn scoped(kind: ScopedKind) -> ScopedEvent {
        ScopedEvent {
            kind,
            path: PathBuf::from("/lib/dune.md"),
            record: (kind != ScopedKind::Remove).then(|| Record::new("/lib/dune.md")),
            parse_error: None,
            affected_view_ids: vec![ViewId::from("tab-1")],
        }
    }

    #[test]
    fn test_file_add_wire_shape() {
        let event = ShelfEvent::Scoped(scoped(ScopedKind::Add));
        let json: Value = serde_json::from_str(&ApiEvent::from(&event).to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "FILE_ADD");
        assert_eq!(json["data"]["affectedViewIds"][0], "tab-1");
        assert!(json["data"].get("parseError").is_none());
    }

    #[test]
    fn test_remove_and_tags_wire_shape() {
        let remove = ApiEvent::from(&ShelfEvent::Scoped(scoped(ScopedKind::Remove)));
        assert_eq!(remove.name(), "FILE_REMOVE");
        let json = serde_json::to_value(&remove).unwrap();
        assert_eq!(json["data"]["path"], "/lib/dune.md");
        assert!(json["data"].get("record").is_none());

        let tags = ApiEvent::from(&ShelfEvent::TagsUpdate(vec!["fiction".into()]));
        assert_eq!(
            serde_json::to_value(&tags).unwrap(),
            serde_json::json!({"type": "TAGS_UPDATE", "data": ["fiction"]})
        );
    }

    #[test]
    fn test_json_lines_sink() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.deliver(&ShelfEvent::TagsUpdate(vec![])).unwrap();
        sink.deliver(&ShelfEvent::Scoped(scoped(ScopedKind::Update))).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with(r#"{"type":"FILE_UPDATE""#));
    }

    #[test]
    fn test_start_library_rejects_relative_root() {
        let views = SharedViews::new(vec![OpenView::tag("t", "fiction")]);
        let err = start_library(Some("relative/dir"), Arc::new(views), Arc::new(EventBus::new()))
            .unwrap_err();
        assert!(matches!(err, ShelfError::InvalidPath(_)));
    }
}
