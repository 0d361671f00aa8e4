//! Fan-out: одно изменение файла → ноль или больше адресных событий.
//!
//! [`plan_add`], [`plan_remove`] и [`plan_update`] — чистые функции над
//! снимком открытых представлений. [`EventBus`] доставляет готовые события
//! подписчикам синхронно, в порядке подписки.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError, RwLock};

use log::{trace, warn};

use crate::error::{ShelfError, ShelfResult};
use crate::record::{LoadedRecord, Record};
use crate::tree::FolderNode;
use crate::views::{is_path_relevant, relevant_view_ids, OpenView, ViewId};

const LOG_TARGET: &str = "bookshelf::sync";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScopedKind {
    Add,
    Update,
    Remove,
}

/// Событие для конкретного набора представлений.
#[derive(Clone, Debug, PartialEq)]
pub struct ScopedEvent {
    pub kind: ScopedKind,
    pub path: PathBuf,
    /// Есть для add/update, нет для remove.
    pub record: Option<Record>,
    /// Ошибка разбора файла; запись при этом проиндексирована с дефолтами.
    pub parse_error: Option<String>,
    pub affected_view_ids: Vec<ViewId>,
}

impl ScopedEvent {
    fn with_record(kind: ScopedKind, loaded: &LoadedRecord, ids: Vec<ViewId>) -> Self {
        Self {
            kind,
            path: loaded.record.path.clone(),
            record: Some(loaded.record.clone()),
            parse_error: loaded.parse_error.clone(),
            affected_view_ids: ids,
        }
    }

    fn removal(path: &Path, ids: Vec<ViewId>) -> Self {
        Self {
            kind: ScopedKind::Remove,
            path: path.to_path_buf(),
            record: None,
            parse_error: None,
            affected_view_ids: ids,
        }
    }

    pub fn affects(&self, id: &ViewId) -> bool {
        self.affected_view_ids.contains(id)
    }
}

/// Всё, что core отдаёт наружу.
#[derive(Clone, Debug, PartialEq)]
pub enum ShelfEvent {
    Scoped(ScopedEvent),
    /// Полный снимок дерева папок.
    TreeUpdate(FolderNode),
    /// Пользовательские теги (без синтетических), после debounce.
    TagsUpdate(Vec<String>),
}

/// Новый файл: add для представлений, которые его теперь содержат.
pub fn plan_add(
    views: &[OpenView],
    loaded: &LoadedRecord,
    post_tags: &BTreeSet<String>,
) -> Option<ScopedEvent> {
    let ids = relevant_view_ids(views, &loaded.record.path, post_tags);
    (!ids.is_empty()).then(|| ScopedEvent::with_record(ScopedKind::Add, loaded, ids))
}

/// Удалённый файл: remove для представлений, которые его содержали.
pub fn plan_remove(
    views: &[OpenView],
    path: &Path,
    pre_tags: &BTreeSet<String>,
) -> Option<ScopedEvent> {
    let ids = relevant_view_ids(views, path, pre_tags);
    (!ids.is_empty()).then(|| ScopedEvent::removal(path, ids))
}

/// Изменённый файл. Переходы по тегам — независимые diff'ы:
/// - remove для вкладок тегов, из которых файл вышел (по тегам до изменения);
/// - add для вкладок тегов, в которые файл вошёл (по тегам после);
/// - update для остальных затронутых: папки, сам файл, теги без изменения членства.
///
/// Порядок результата: remove, add, update.
pub fn plan_update(
    views: &[OpenView],
    loaded: &LoadedRecord,
    pre_tags: &BTreeSet<String>,
    post_tags: &BTreeSet<String>,
) -> Vec<ScopedEvent> {
    let path = loaded.record.path.as_path();
    let mut left = Vec::new();
    let mut entered = Vec::new();
    let mut updated = Vec::new();

    for view in views {
        match view.tag_name() {
            Some(tag) => match (pre_tags.contains(tag), post_tags.contains(tag)) {
                (true, false) => left.push(view.id.clone()),
                (false, true) => entered.push(view.id.clone()),
                (true, true) => updated.push(view.id.clone()),
                (false, false) => {}
            },
            None => {
                if is_path_relevant(view, path) {
                    updated.push(view.id.clone());
                }
            }
        }
    }

    let mut out = Vec::new();
    if !left.is_empty() {
        out.push(ScopedEvent::removal(path, left));
    }
    if !entered.is_empty() {
        out.push(ScopedEvent::with_record(ScopedKind::Add, loaded, entered));
    }
    if !updated.is_empty() {
        out.push(ScopedEvent::with_record(ScopedKind::Update, loaded, updated));
    }
    out
}

/// Подписчик шины.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &ShelfEvent) -> ShelfResult<()>;
}

impl<F> EventSink for F
where
    F: Fn(&ShelfEvent) -> ShelfResult<()> + Send + Sync,
{
    fn deliver(&self, event: &ShelfEvent) -> ShelfResult<()> {
        self(event)
    }
}

/// Подписчик, пересылающий события в канал.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<mpsc::Sender<ShelfEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<ShelfEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &ShelfEvent) -> ShelfResult<()> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event.clone())
            .map_err(|_| ShelfError::SinkClosed("receiver dropped".to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Шина событий. Доставка синхронная, в порядке подписки; ошибка одного
/// подписчика логируется и не мешает остальным.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn EventSink>)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sink));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Доставить событие всем подписчикам. Возвращает число успешных доставок.
    pub fn publish(&self, event: &ShelfEvent) -> usize {
        let subs: Vec<Arc<dyn EventSink>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| s.clone())
            .collect();

        trace!(target: LOG_TARGET, "publish {:?}", event);
        let mut delivered = 0;
        for sink in subs {
            match sink.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(target: LOG_TARGET, "Subscriber rejected event: {e}"),
            }
        }
        delivered
    }

    /// Доставить событие, вернув первую ошибку (для TAGS_UPDATE, где ошибка
    /// должна дойти до debounced-отправителя).
    pub fn publish_strict(&self, event: &ShelfEvent) -> ShelfResult<()> {
        let subs: Vec<Arc<dyn EventSink>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, s)| s.clone())
            .collect();

        let mut first_err = None;
        for sink in subs {
            if let Err(e) = sink.deliver(event) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
