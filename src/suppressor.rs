//! Подавление эха собственных записей (ignore window).
//!
//! Когда приложение само пишет файл, watcher сообщит о "modify" этого же
//! пути. Запись в реестре живёт `ttl` и одноразовая: первое обращение
//! удаляет её независимо от того, истекла она или нет.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct SelfWriteSuppressor {
    ignored: HashMap<PathBuf, Instant>,
}

impl SelfWriteSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Открыть ignore window для `path` на `ttl`.
    pub fn mark_ignored(&mut self, path: impl Into<PathBuf>, ttl: Duration) {
        self.mark_ignored_at(path, ttl, Instant::now());
    }

    fn mark_ignored_at(&mut self, path: impl Into<PathBuf>, ttl: Duration, now: Instant) {
        self.ignored.insert(path.into(), now + ttl);
    }

    /// Нужно ли проглотить событие для `path`. Запись удаляется в любом случае.
    pub fn should_suppress(&mut self, path: &Path) -> bool {
        self.should_suppress_at(path, Instant::now())
    }

    fn should_suppress_at(&mut self, path: &Path, now: Instant) -> bool {
        match self.ignored.remove(path) {
            Some(expiry) => now < expiry,
            None => false,
        }
    }

    /// Выбросить истёкшие записи, по которым событие так и не пришло.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.ignored.len();
        self.ignored.retain(|_, expiry| now < *expiry);
        before - self.ignored.len()
    }

    pub fn len(&self) -> usize {
        self.ignored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }

    pub fn clear(&mut self) {
        self.ignored.clear();
    }
}
