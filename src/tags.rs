//! Индекс тегов: `tag -> {path}` и обратный `path -> {tag}`.
//!
//! Обратный индекс — авторитетное "последнее известное" состояние файла,
//! по нему считается diff при изменении. Тег с пустым множеством путей
//! удаляется сразу.
//!
//! Кроме пользовательских тегов каждый файл получает синтетические
//! (`_read`, `_reading`, `_unread`), вычисленные из записей о прочтении.
//! Они участвуют в индексе (на них можно открыть вкладку), но скрыты из
//! пользовательского списка тегов.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{ShelfError, ShelfResult};
use crate::record::Record;
use crate::timer::CancellableTimer;

const LOG_TARGET: &str = "bookshelf::tags";

pub const SYNTHETIC_TAG_PREFIX: &str = "_";
pub const TAG_READ: &str = "_read";
pub const TAG_READING: &str = "_reading";
pub const TAG_UNREAD: &str = "_unread";

pub fn is_synthetic_tag(tag: &str) -> bool {
    tag.starts_with(SYNTHETIC_TAG_PREFIX)
}

/// Синтетические теги записи. Нет прочтений — `{_unread}`; иначе `_read`
/// за каждое завершённое и `_reading` за каждое незавершённое.
pub fn synthetic_tags(record: &Record) -> BTreeSet<String> {
    if record.read.is_empty() {
        return BTreeSet::from([TAG_UNREAD.to_string()]);
    }
    record
        .read
        .iter()
        .map(|entry| {
            if entry.finished.is_some() {
                TAG_READ.to_string()
            } else {
                TAG_READING.to_string()
            }
        })
        .collect()
}

/// Пользовательские теги ∪ синтетические.
pub fn effective_tags(record: &Record) -> BTreeSet<String> {
    let mut tags = record.tags.clone();
    tags.extend(synthetic_tags(record));
    tags
}

/// Как изменилось членство файла в тегах.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, BTreeSet<PathBuf>>,
    by_path: HashMap<PathBuf, BTreeSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Проиндексировать новый файл. Повторное добавление известного пути
    /// обрабатывается как изменение.
    pub fn on_file_added(&mut self, record: &Record) -> TagDiff {
        self.on_file_changed(record)
    }

    /// Пересчитать теги файла и применить diff.
    pub fn on_file_changed(&mut self, record: &Record) -> TagDiff {
        let new_tags = effective_tags(record);
        let path = record.path.as_path();

        let diff = match self.by_path.get(path) {
            Some(old_tags) => TagDiff {
                added: new_tags.difference(old_tags).cloned().collect(),
                removed: old_tags.difference(&new_tags).cloned().collect(),
            },
            None => TagDiff {
                added: new_tags.clone(),
                removed: BTreeSet::new(),
            },
        };

        if diff.is_empty() {
            trace!(target: LOG_TARGET, "tags unchanged for {}", path.display());
            return diff;
        }

        for tag in &diff.added {
            self.insert(tag, path);
        }
        for tag in &diff.removed {
            self.remove(tag, path);
        }
        self.by_path.insert(path.to_path_buf(), new_tags);

        debug!(
            target: LOG_TARGET,
            "{}: +{:?} -{:?}",
            path.display(),
            diff.added,
            diff.removed
        );
        diff
    }

    /// Убрать файл из индекса. Возвращает теги, которые у него были.
    pub fn on_file_removed(&mut self, path: &Path) -> BTreeSet<String> {
        let Some(tags) = self.by_path.remove(path) else {
            return BTreeSet::new();
        };
        for tag in &tags {
            self.remove(tag, path);
        }
        debug!(target: LOG_TARGET, "{} removed, had {:?}", path.display(), tags);
        tags
    }

    fn insert(&mut self, tag: &str, path: &Path) {
        self.by_tag
            .entry(tag.to_string())
            .or_default()
            .insert(path.to_path_buf());
    }

    fn remove(&mut self, tag: &str, path: &Path) {
        let Some(paths) = self.by_tag.get_mut(tag) else {
            return;
        };
        paths.remove(path);
        if paths.is_empty() {
            self.by_tag.remove(tag);
        }
    }

    /// Пользовательские теги (без синтетических), отсортированы.
    pub fn get_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .by_tag
            .keys()
            .filter(|t| !is_synthetic_tag(t))
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// Все теги индекса, включая синтетические.
    pub fn all_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.by_tag.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Пути с тегом. Тег без файлов — [`ShelfError::UnknownTag`].
    pub fn get_paths_for_tag(&self, tag: &str) -> ShelfResult<Vec<PathBuf>> {
        self.by_tag
            .get(tag)
            .map(|paths| paths.iter().cloned().collect())
            .ok_or_else(|| ShelfError::UnknownTag(tag.to_string()))
    }

    /// Последние известные теги файла (включая синтетические).
    pub fn tags_of(&self, path: &Path) -> BTreeSet<String> {
        self.by_path.get(path).cloned().unwrap_or_default()
    }
}

/// Debounced-отправка списка тегов подписчикам.
///
/// Каждое изменение индекса вызывает [`TagEmitter::notify`]; отправка
/// происходит один раз после затишья длиной `window`. Ошибка отправки
/// логируется и отбрасывается: следующее изменение запланирует новую.
#[derive(Debug)]
pub struct TagEmitter {
    timer: CancellableTimer,
}

impl TagEmitter {
    pub fn new<S, E>(window: Duration, snapshot: S, emit: E) -> Self
    where
        S: Fn() -> Vec<String> + Send + 'static,
        E: Fn(Vec<String>) -> ShelfResult<()> + Send + 'static,
    {
        let timer = CancellableTimer::debounce(window, move || {
            let tags = snapshot();
            debug!(target: LOG_TARGET, "emitting {} tags", tags.len());
            if let Err(e) = emit(tags) {
                warn!(target: LOG_TARGET, "Failed to emit tags update: {e}");
            }
        });
        Self { timer }
    }

    pub fn notify(&self) {
        self.timer.schedule();
    }

    /// Отправить ожидающее обновление немедленно.
    pub fn flush(&self) {
        self.timer.fire_now();
    }

    pub fn cancel(&self) {
        self.timer.cancel();
    }
}
