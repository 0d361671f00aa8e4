//! Классификация сырых событий `notify`.
//!
//! Rename приходит от ОС как пара событий (старое имя / новое имя), а
//! перенос файла в корзину вне root выглядит как обычное удаление.
//! Поэтому тип события определяется пробой пути *после* события:
//! пути нет — remove, путь есть — create/modify.

use std::path::Path;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};

use super::events::{ChangeKind, EntryKind, WatchEvent};
use crate::config::has_data_extension;

/// Скрыт ли путь: любой сегмент относительно root начинается с `.`.
pub fn is_hidden_path(root: &Path, path: &Path) -> bool {
  let relative = path.strip_prefix(root).unwrap_or(path);
  relative.components().any(|c| {
    c.as_os_str()
      .to_str()
      .is_some_and(|s| s.starts_with('.') && s != "." && s != "..")
  })
}

/// Фильтр синхронизации: путь внутри root (но не сам root), без скрытых
/// сегментов, а файл ещё и с расширением записи. `Dir`/`Unknown` по
/// расширению не фильтруются: у папки `Vol. 2` оно тоже есть.
pub fn is_synced_path(root: &Path, data_extension: &str, entry: EntryKind, path: &Path) -> bool {
  if path == root || !path.starts_with(root) || is_hidden_path(root, path) {
    return false;
  }
  entry != EntryKind::File || has_data_extension(path, data_extension)
}

/// Подсказка о типе записи из самого события (нужна для уже удалённых путей).
fn entry_hint(kind: &EventKind) -> Option<EntryKind> {
  match kind {
    EventKind::Create(CreateKind::File) | EventKind::Remove(RemoveKind::File) => {
      Some(EntryKind::File)
    }
    EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
      Some(EntryKind::Dir)
    }
    _ => None,
  }
}

/// Определить тип записи и её существование.
fn probe_entry(path: &Path, hint: Option<EntryKind>) -> (bool, EntryKind) {
  match std::fs::metadata(path) {
    Ok(m) if m.is_dir() => (true, EntryKind::Dir),
    Ok(_) => (true, EntryKind::File),
    // Rename/перенос в корзину (`Name(From)`) подсказки не несёт.
    Err(_) => (false, hint.unwrap_or(EntryKind::Unknown)),
  }
}

/// Разложить событие `notify` на классифицированные [`WatchEvent`].
///
/// Возвращает пустой список для событий доступа, скрытых путей, файлов
/// с чужим расширением и изменений метаданных директорий.
pub fn classify_event(root: &Path, data_extension: &str, event: &Event) -> Vec<WatchEvent> {
  if matches!(event.kind, EventKind::Access(_)) {
    return Vec::new();
  }

  let hint = entry_hint(&event.kind);
  let mut out = Vec::new();

  for path in &event.paths {
    if !is_synced_path(root, data_extension, EntryKind::Unknown, path) {
      continue;
    }

    let (exists, entry) = probe_entry(path, hint);
    if !is_synced_path(root, data_extension, entry, path) {
      continue;
    }

    let kind = if !exists {
      ChangeKind::Remove
    } else {
      match event.kind {
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Metadata(_) | ModifyKind::Other) => {
          ChangeKind::Modify
        }
        EventKind::Modify(ModifyKind::Name(_)) | EventKind::Create(_) | EventKind::Remove(_) => {
          ChangeKind::Create
        }
        _ => ChangeKind::Modify,
      }
    };

    // Изменение метаданных директории не меняет ни дерево, ни записи.
    if entry == EntryKind::Dir && kind == ChangeKind::Modify {
      continue;
    }

    out.push(WatchEvent::new(kind, entry, path.clone()));
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use notify::event::{DataChange, RenameMode};
  use std::fs;
  use std::path::PathBuf;
  use tempfile::TempDir;

  fn event(kind: EventKind, path: PathBuf) -> Event {
    Event::new(kind).add_path(path)
  }

  #[test]
  fn test_hidden_paths_are_detected_relative_to_root() {
    let root = Path::new("/home/u/.local/books");
    assert!(!is_hidden_path(root, Path::new("/home/u/.local/books/a.md")));
    assert!(is_hidden_path(root, Path::new("/home/u/.local/books/.git/a.md")));
    assert!(is_hidden_path(root, Path::new("/home/u/.local/books/x/.a.md")));
  }

  #[test]
  fn test_existing_file_modify() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("a.md");
    fs::write(&file, "x").unwrap();

    let out = classify_event(
      dir.path(),
      "md",
      &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), file.clone()),
    );
    assert_eq!(out, vec![WatchEvent::new(ChangeKind::Modify, EntryKind::File, file)]);
  }

  #[test]
  fn test_vanished_path_is_removal_even_for_create_event() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("gone.md");

    let out = classify_event(dir.path(), "md", &event(EventKind::Create(CreateKind::File), file.clone()));
    assert_eq!(out, vec![WatchEvent::new(ChangeKind::Remove, EntryKind::File, file)]);
  }

  #[test]
  fn test_rename_both_splits_into_remove_and_create() {
    let dir = TempDir::new().unwrap();
    let old = dir.path().join("old.md");
    let new = dir.path().join("new.md");
    fs::write(&new, "x").unwrap();

    let ev = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
      .add_path(old.clone())
      .add_path(new.clone());
    let out = classify_event(dir.path(), "md", &ev);
    assert_eq!(
      out,
      vec![
        WatchEvent::new(ChangeKind::Remove, EntryKind::Unknown, old),
        WatchEvent::new(ChangeKind::Create, EntryKind::File, new),
      ]
    );
  }

  #[test]
  fn test_filters_foreign_extensions_hidden_and_access() {
    let dir = TempDir::new().unwrap();
    let txt = dir.path().join("a.txt");
    fs::write(&txt, "x").unwrap();
    let hidden = dir.path().join(".internal").join("tabs.md");

    assert!(classify_event(dir.path(), "md", &event(EventKind::Create(CreateKind::File), txt.clone())).is_empty());
    assert!(classify_event(dir.path(), "md", &event(EventKind::Create(CreateKind::File), hidden)).is_empty());
    assert!(classify_event(
      dir.path(),
      "md",
      &event(EventKind::Access(notify::event::AccessKind::Any), txt)
    )
    .is_empty());
  }

  #[test]
  fn test_directory_create_and_remove() {
    let dir = TempDir::new().unwrap();
    let sub = dir.path().join("sub");
    fs::create_dir(&sub).unwrap();
    let gone = dir.path().join("gone");

    let created = classify_event(dir.path(), "md", &event(EventKind::Create(CreateKind::Any), sub.clone()));
    assert_eq!(created, vec![WatchEvent::new(ChangeKind::Create, EntryKind::Dir, sub.clone())]);

    let removed = classify_event(dir.path(), "md", &event(EventKind::Remove(RemoveKind::Folder), gone.clone()));
    assert_eq!(removed, vec![WatchEvent::new(ChangeKind::Remove, EntryKind::Dir, gone)]);

    let touched = classify_event(
      dir.path(),
      "md",
      &event(EventKind::Modify(ModifyKind::Metadata(notify::event::MetadataKind::Any)), sub),
    );
    assert!(touched.is_empty());
  }

  #[test]
  fn test_vanished_dotted_folder_is_unknown_removal() {
    let dir = TempDir::new().unwrap();
    let moved = dir.path().join("J.R.R. Tolkien");

    let out = classify_event(
      dir.path(),
      "md",
      &event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), moved.clone()),
    );
    assert_eq!(out, vec![WatchEvent::new(ChangeKind::Remove, EntryKind::Unknown, moved)]);
  }

  #[test]
  fn test_synced_path_filter() {
    let root = Path::new("/lib");
    assert!(is_synced_path(root, "md", EntryKind::File, Path::new("/lib/a.md")));
    assert!(!is_synced_path(root, "md", EntryKind::File, Path::new("/lib/a.txt")));
    assert!(is_synced_path(root, "md", EntryKind::Dir, Path::new("/lib/Vol. 2")));
    assert!(!is_synced_path(root, "md", EntryKind::File, Path::new("/lib/.trash/a.md")));
    assert!(!is_synced_path(root, "md", EntryKind::Dir, Path::new("/lib")));
    assert!(!is_synced_path(root, "md", EntryKind::File, Path::new("/other/a.md")));
  }

  #[test]
  fn test_root_itself_is_ignored() {
    let dir = TempDir::new().unwrap();
    let out = classify_event(dir.path(), "md", &event(EventKind::Create(CreateKind::Folder), dir.path().to_path_buf()));
    assert!(out.is_empty());
  }
}
