//! Интеграционные тесты для file_watcher.
//!
//! Используют временную директорию для изоляции тестов.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use bookshelf_core::error::ShelfError;
use bookshelf_core::file_watcher::{start_watcher, ChangeKind, EntryKind, WatchEvent, WatcherHandle, WatcherOptions};

/// Собирает события в потокобезопасную очередь для проверки.
#[derive(Clone, Default)]
struct EventCollector {
    events: Arc<Mutex<VecDeque<WatchEvent>>>,
}

impl EventCollector {
    fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: WatchEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    fn take_all(&self) -> Vec<WatchEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }

    fn any(&self, pred: impl Fn(&WatchEvent) -> bool) -> bool {
        self.events.lock().unwrap().iter().any(pred)
    }
}

/// Ожидание события, удовлетворяющего условию, с таймаутом.
fn wait_for_event(
    collector: &EventCollector,
    timeout: Duration,
    pred: impl Fn(&WatchEvent) -> bool + Copy,
) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if collector.any(pred) {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Временный root с каноническим путём (notify отдаёт канонические пути).
fn temp_root() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let root = fs::canonicalize(temp_dir.path()).expect("Failed to canonicalize");
    (temp_dir, root)
}

fn start(root: &Path, collector: &EventCollector) -> WatcherHandle {
    let collector_clone = collector.clone();
    let handle = start_watcher(root, WatcherOptions::default(), move |e| {
        collector_clone.push(e);
    })
    .expect("Failed to start watcher");
    // Даём watcher'у время на запуск
    thread::sleep(Duration::from_millis(200));
    handle
}

fn is(kind: ChangeKind, entry: EntryKind, path: &Path) -> impl Fn(&WatchEvent) -> bool + Copy + '_ {
    move |e: &WatchEvent| e.kind == kind && e.entry == entry && e.paths.iter().any(|p| p == path)
}

// ============================================================================
// Тесты базовой функциональности
// ============================================================================

#[test]
fn test_watcher_starts_and_stops_successfully() {
    let (_temp_dir, root) = temp_root();
    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    assert_eq!(handle.watch_dir(), root);
    assert!(handle.is_running());

    handle.stop().expect("Failed to stop watcher");
}

#[test]
fn test_watcher_detects_new_data_file() {
    let (_temp_dir, root) = temp_root();
    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    let path = root.join("dune.md");
    File::create(&path).expect("Failed to create test file");

    let found = wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Create, EntryKind::File, &path),
    );
    assert!(found, "Watcher did not detect the new file within timeout");

    handle.stop().expect("Failed to stop watcher");
}

#[test]
fn test_watcher_reports_modify_and_remove() {
    let (_temp_dir, root) = temp_root();
    let path = root.join("book.md");
    fs::write(&path, "---\ntitle: A\n---\n").unwrap();

    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    fs::write(&path, "---\ntitle: B\n---\n").unwrap();
    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Modify, EntryKind::File, &path)
    ));

    fs::remove_file(&path).unwrap();
    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Remove, EntryKind::File, &path)
    ));

    handle.stop().expect("Failed to stop watcher");
}

#[test]
fn test_rename_is_remove_plus_create() {
    let (_temp_dir, root) = temp_root();
    let old = root.join("old.md");
    let new = root.join("new.md");
    fs::write(&old, "x").unwrap();

    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    fs::rename(&old, &new).unwrap();
    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Create, EntryKind::File, &new)
    ));
    // Старое имя уже исчезло, а rename не сообщает тип записи.
    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Remove, EntryKind::Unknown, &old)
    ));

    handle.stop().expect("Failed to stop watcher");
}

#[test]
fn test_dotted_folder_moved_out_is_reported() {
    let (_temp_dir, root) = temp_root();
    let author = root.join("J.R.R. Tolkien");
    fs::create_dir(&author).unwrap();
    fs::write(author.join("hobbit.md"), "x").unwrap();
    let outside = TempDir::new().expect("Failed to create temp dir");

    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    fs::rename(&author, outside.path().join("J.R.R. Tolkien")).unwrap();
    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Remove, EntryKind::Unknown, &author)
    ));

    handle.stop().expect("Failed to stop watcher");
}

#[test]
fn test_directory_create_is_reported() {
    let (_temp_dir, root) = temp_root();
    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    let subdir = root.join("shelf");
    fs::create_dir(&subdir).expect("Failed to create subdir");

    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Create, EntryKind::Dir, &subdir)
    ));

    handle.stop().expect("Failed to stop watcher");
}

// ============================================================================
// Тесты фильтрации
// ============================================================================

#[test]
fn test_watcher_ignores_hidden_and_foreign_files() {
    let (_temp_dir, root) = temp_root();
    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    fs::write(root.join("notes.txt"), "x").unwrap();
    fs::write(root.join(".draft.md"), "x").unwrap();
    fs::create_dir(root.join(".git")).unwrap();
    fs::write(root.join(".git").join("HEAD.md"), "x").unwrap();

    // Маркер: после него уверены, что предыдущие события уже доставлены.
    let marker = root.join("marker.md");
    fs::write(&marker, "x").unwrap();
    assert!(wait_for_event(
        &collector,
        Duration::from_secs(5),
        is(ChangeKind::Create, EntryKind::File, &marker)
    ));
    thread::sleep(Duration::from_millis(200));

    let events = collector.take_all();
    for event in &events {
        for path in &event.paths {
            assert!(path.starts_with(&root));
            let name = path.file_name().unwrap().to_string_lossy();
            assert!(!name.starts_with('.'), "hidden path leaked: {:?}", event);
            assert!(!name.ends_with(".txt"), "foreign file leaked: {:?}", event);
            assert!(!path.starts_with(root.join(".git")), "hidden dir leaked: {:?}", event);
        }
    }

    handle.stop().expect("Failed to stop watcher");
}

// ============================================================================
// Тесты обработки ошибок
// ============================================================================

#[test]
fn test_watcher_rejects_empty_path() {
    let collector = EventCollector::new();
    let result = start_watcher(Path::new(""), WatcherOptions::default(), move |e| {
        collector.push(e);
    });
    assert!(matches!(result, Err(ShelfError::InvalidPath(_))));
}

#[test]
fn test_watcher_rejects_relative_path() {
    let collector = EventCollector::new();
    let result = start_watcher(Path::new("relative/path"), WatcherOptions::default(), move |e| {
        collector.push(e);
    });

    match result {
        Err(err) => assert!(err.to_string().contains("must be absolute")),
        Ok(_) => panic!("relative root accepted"),
    }
}

#[test]
fn test_watcher_fails_for_missing_root() {
    let (_temp_dir, root) = temp_root();
    let missing = root.join("subdir").join("nested");

    let collector = EventCollector::new();
    let result = start_watcher(&missing, WatcherOptions::default(), move |e| {
        collector.push(e);
    });

    assert!(matches!(result, Err(ShelfError::RootNotFound(_))));
    assert!(!missing.exists(), "explicit root must not be created");
}

#[test]
fn test_watcher_fails_for_file_root() {
    let (_temp_dir, root) = temp_root();
    let file = root.join("plain.md");
    fs::write(&file, "x").unwrap();

    let result = start_watcher(&file, WatcherOptions::default(), |_| {});
    assert!(matches!(result, Err(ShelfError::NotADirectory(_))));
}

// ============================================================================
// Тесты graceful shutdown
// ============================================================================

#[test]
fn test_watcher_stops_cleanly() {
    let (_temp_dir, root) = temp_root();
    let collector = EventCollector::new();
    let handle = start(&root, &collector);

    // Останавливаем и проверяем, что это не блокирует навечно
    let start = std::time::Instant::now();
    handle.stop().expect("Failed to stop watcher");
    let elapsed = start.elapsed();

    assert!(
        elapsed < Duration::from_secs(2),
        "Stop took too long: {:?}",
        elapsed
    );
}

#[test]
fn test_no_events_after_stop() {
    let (_temp_dir, root) = temp_root();
    let collector = EventCollector::new();
    let handle = start(&root, &collector);
    handle.stop().expect("Failed to stop watcher");

    fs::write(root.join("late.md"), "x").unwrap();
    thread::sleep(Duration::from_millis(500));

    assert!(collector.take_all().is_empty());
}
