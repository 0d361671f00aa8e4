//! Внутренние типы событий file_watcher.
//!
//! Это уже классифицированные события: скрытые пути и файлы с чужим
//! расширением отфильтрованы, rename разложен на remove/create.

use std::path::PathBuf;

/// Что произошло с путём.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
  Create,
  Modify,
  Remove,
}

/// Тип записи файловой системы.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
  File,
  Dir,
  /// Путь исчез, а событие не говорит, чем он был. Разрешается по
  /// состоянию индекса: известная запись или директория с записями.
  Unknown,
}

/// Классифицированное событие watcher'а.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
  pub kind: ChangeKind,
  pub entry: EntryKind,
  pub paths: Vec<PathBuf>,
}

impl WatchEvent {
  pub fn new(kind: ChangeKind, entry: EntryKind, path: PathBuf) -> Self {
    Self {
      kind,
      entry,
      paths: vec![path],
    }
  }
}
