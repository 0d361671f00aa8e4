//! Сервис синхронизации библиотеки с директорией на диске.
//!
//! [`LibrarySync`] владеет всем производным состоянием одного root:
//! записями, индексом тегов и ignore window. Смена root — это остановка
//! старого экземпляра и построение нового; глобального состояния нет.
//!
//! ## Поток событий
//! ```text
//! notify → file_watcher (классификация) → канал → worker
//!   worker: загрузка записей (параллельно, без блокировки состояния)
//!         → применение по порядку (suppressor, TagIndex, records)
//!         → fan-out → EventBus
//! ```
//! Worker единственный, поэтому изменения состояния сериализованы, а
//! события одного пути доставляются в порядке поступления.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error, info, trace, warn};
use rayon::prelude::*;

use crate::bus::{plan_add, plan_remove, plan_update, EventBus, ScopedEvent, ShelfEvent};
use crate::config::{validate_root, SyncConfig};
use crate::error::{ShelfError, ShelfResult};
use crate::file_watcher::{
    is_synced_path, start_watcher, ChangeKind, EntryKind, WatchEvent, WatcherHandle, WatcherOptions,
};
use crate::logging::LogContext;
use crate::record::{encode_record, load_or_degrade, LoadOutcome, LoadedRecord, Record, RecordLoader};
use crate::suppressor::SelfWriteSuppressor;
use crate::tags::{TagEmitter, TagIndex};
use crate::tree::{build_folder_tree, scan_data_files, FolderNode};
use crate::views::{is_descendant, is_relevant, OpenView, OpenViewSource};

const LOG_TARGET: &str = "bookshelf::sync";

#[derive(Debug, Default)]
struct SyncState {
    records: BTreeMap<PathBuf, LoadedRecord>,
    tags: TagIndex,
    suppressor: SelfWriteSuppressor,
}

/// Итог применения пачки изменений к состоянию.
#[derive(Debug, Default)]
struct Applied {
    events: Vec<ScopedEvent>,
    tags_changed: bool,
    tree_changed: bool,
}

enum WorkerMsg {
    Fs(WatchEvent),
    Shutdown,
}

/// Ядро, разделяемое между API и worker'ом.
struct Engine {
    root: PathBuf,
    config: SyncConfig,
    state: Arc<Mutex<SyncState>>,
    /// Держится на время "применить + опубликовать", чтобы события
    /// публиковались в порядке применения.
    publish_order: Mutex<()>,
    active: AtomicBool,
    bus: Arc<EventBus>,
    views: Arc<dyn OpenViewSource>,
    loader: Arc<dyn RecordLoader>,
    tag_emitter: TagEmitter,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    fn new(
        root: PathBuf,
        config: SyncConfig,
        bus: Arc<EventBus>,
        views: Arc<dyn OpenViewSource>,
        loader: Arc<dyn RecordLoader>,
    ) -> Self {
        let state: Arc<Mutex<SyncState>> = Arc::default();
        let snapshot_state = state.clone();
        let emit_bus = bus.clone();
        let tag_emitter = TagEmitter::new(
            config.tag_debounce,
            move || lock(&snapshot_state).tags.get_tags(),
            move |tags| emit_bus.publish_strict(&ShelfEvent::TagsUpdate(tags)),
        );

        Self {
            root,
            config,
            state,
            publish_order: Mutex::new(()),
            active: AtomicBool::new(true),
            bus,
            views,
            loader,
            tag_emitter,
        }
    }

    fn load_all(&self, paths: &[PathBuf]) -> HashMap<PathBuf, LoadOutcome> {
        let loader = self.loader.as_ref();
        paths
            .par_iter()
            .map(|p| (p.clone(), load_or_degrade(loader, p)))
            .collect()
    }

    /// Начальный обход root: индексируем без адресных событий.
    fn initial_scan(&self) -> usize {
        let files = scan_data_files(&self.root, &self.config.data_extension);
        let loaded = self.load_all(&files);

        let mut state = lock(&self.state);
        for path in &files {
            if let Some(LoadOutcome::Loaded(l)) = loaded.get(path) {
                if let Some(err) = &l.parse_error {
                    warn!(target: LOG_TARGET, "Cannot parse {}: {err}", path.display());
                }
                state.tags.on_file_added(&l.record);
                state.records.insert(path.clone(), l.clone());
            }
        }
        state.records.len()
    }

    fn publish_tree(&self) {
        match build_folder_tree(&self.root) {
            Ok(tree) => {
                self.bus.publish(&ShelfEvent::TreeUpdate(tree));
            }
            Err(e) => warn!(target: LOG_TARGET, "Cannot build folder tree: {e}"),
        }
    }

    fn views(&self) -> Vec<OpenView> {
        self.views.current_open_views()
    }

    /// Тип записи для `Unknown`, если путь ещё существует (события,
    /// поданные через [`LibrarySync::process_events`]).
    fn resolve_entry(entry: EntryKind, path: &Path) -> EntryKind {
        if entry != EntryKind::Unknown {
            return entry;
        }
        match std::fs::metadata(path) {
            Ok(m) if m.is_dir() => EntryKind::Dir,
            Ok(_) => EntryKind::File,
            Err(_) => EntryKind::Unknown,
        }
    }

    /// Обработать пачку классифицированных событий.
    fn process_batch(&self, batch: Vec<WatchEvent>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let ctx = LogContext::with_operation("fs_batch");
        debug!(target: LOG_TARGET, "[{ctx}] {} raw events", batch.len());

        // Плоский список (kind, entry, path) с одной записью на файл.
        let mut items: Vec<(ChangeKind, EntryKind, PathBuf)> = Vec::new();
        let mut seen_files: HashSet<PathBuf> = HashSet::new();
        for event in batch {
            let entry = event.entry;
            for path in event.paths {
                let entry = Self::resolve_entry(entry, &path);
                if !is_synced_path(&self.root, &self.config.data_extension, entry, &path) {
                    trace!(target: LOG_TARGET, "[{ctx}] filtered: {}", path.display());
                    continue;
                }
                if entry == EntryKind::File && !seen_files.insert(path.clone()) {
                    continue;
                }
                items.push((event.kind, entry, path));
            }
        }

        // Загрузка — единственная блокирующая часть; делаем её параллельно
        // и до взятия блокировки состояния.
        let mut dir_files: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
        let mut to_load: Vec<PathBuf> = Vec::new();
        for (kind, entry, path) in &items {
            match (entry, kind) {
                (EntryKind::File, _) => to_load.push(path.clone()),
                (EntryKind::Dir, ChangeKind::Create) => {
                    // Файлы, пришедшие в пачке отдельным событием, уже учтены.
                    let files: Vec<PathBuf> = scan_data_files(path, &self.config.data_extension)
                        .into_iter()
                        .filter(|f| seen_files.insert(f.clone()))
                        .collect();
                    to_load.extend(files.iter().cloned());
                    dir_files.insert(path.clone(), files);
                }
                (EntryKind::Dir | EntryKind::Unknown, _) => {}
            }
        }
        to_load.sort();
        to_load.dedup();
        let loaded = self.load_all(&to_load);

        let _order = lock(&self.publish_order);
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let applied = {
            let mut state = lock(&self.state);
            let mut applied = Applied::default();
            for (kind, entry, path) in &items {
                match entry {
                    EntryKind::File => {
                        let outcome = loaded.get(path).cloned().unwrap_or(LoadOutcome::Missing);
                        self.apply_file(&mut state, path, outcome, false, &mut applied);
                    }
                    // Исчезнувший путь неизвестного типа: запись или папка.
                    EntryKind::Unknown if state.records.contains_key(path) => {
                        self.apply_file(&mut state, path, LoadOutcome::Missing, false, &mut applied);
                    }
                    EntryKind::Unknown => self.apply_dir_removed(&mut state, path, &mut applied),
                    EntryKind::Dir if *kind == ChangeKind::Remove => {
                        self.apply_dir_removed(&mut state, path, &mut applied);
                    }
                    EntryKind::Dir => {
                        for file in dir_files.get(path).into_iter().flatten() {
                            let outcome = loaded.get(file).cloned().unwrap_or(LoadOutcome::Missing);
                            self.apply_file(&mut state, file, outcome, false, &mut applied);
                        }
                        applied.tree_changed = true;
                    }
                }
            }
            applied
        };

        debug!(
            target: LOG_TARGET,
            "[{ctx}] {} scoped events, tags changed: {}, tree changed: {}",
            applied.events.len(),
            applied.tags_changed,
            applied.tree_changed
        );
        self.publish(applied);
    }

    fn publish(&self, applied: Applied) {
        for event in applied.events {
            self.bus.publish(&ShelfEvent::Scoped(event));
        }
        if applied.tree_changed {
            self.publish_tree();
        }
        if applied.tags_changed {
            self.tag_emitter.notify();
        }
    }

    /// Применить итог загрузки одного файла.
    ///
    /// `own_write`: изменение пришло от самого приложения (save), ignore
    /// window не проверяется.
    fn apply_file(
        &self,
        state: &mut SyncState,
        path: &Path,
        outcome: LoadOutcome,
        own_write: bool,
        applied: &mut Applied,
    ) {
        let known = state.records.contains_key(path);

        match outcome {
            LoadOutcome::Missing => {
                if !known {
                    return;
                }
                let pre_tags = state.tags.on_file_removed(path);
                state.records.remove(path);
                applied.tags_changed |= !pre_tags.is_empty();
                info!(target: LOG_TARGET, "File removed: {}", path.display());
                applied.events.extend(plan_remove(&self.views(), path, &pre_tags));
            }
            LoadOutcome::Loaded(loaded) => {
                if let Some(err) = &loaded.parse_error {
                    warn!(target: LOG_TARGET, "Cannot parse {}: {err}", path.display());
                }
                if !known {
                    let diff = state.tags.on_file_added(&loaded.record);
                    let post_tags = state.tags.tags_of(path);
                    applied.tags_changed |= !diff.is_empty();
                    info!(target: LOG_TARGET, "File added: {}", path.display());
                    applied.events.extend(plan_add(&self.views(), &loaded, &post_tags));
                    state.records.insert(path.to_path_buf(), loaded);
                    return;
                }

                if !own_write && state.suppressor.should_suppress(path) {
                    debug!(target: LOG_TARGET, "Suppressed own write echo: {}", path.display());
                    return;
                }
                if state.records.get(path) == Some(&loaded) {
                    return;
                }

                let pre_tags = state.tags.tags_of(path);
                let diff = state.tags.on_file_changed(&loaded.record);
                let post_tags = state.tags.tags_of(path);
                applied.tags_changed |= !diff.is_empty();
                debug!(target: LOG_TARGET, "File updated: {}", path.display());
                applied
                    .events
                    .extend(plan_update(&self.views(), &loaded, &pre_tags, &post_tags));
                state.records.insert(path.to_path_buf(), loaded);
            }
        }
    }

    /// Директория исчезла: все записи под ней удаляются.
    fn apply_dir_removed(&self, state: &mut SyncState, dir: &Path, applied: &mut Applied) {
        let gone: Vec<PathBuf> = state
            .records
            .keys()
            .filter(|p| is_descendant(dir, p))
            .cloned()
            .collect();
        info!(target: LOG_TARGET, "Directory removed: {} ({} files)", dir.display(), gone.len());
        for path in gone {
            self.apply_file(state, &path, LoadOutcome::Missing, false, applied);
        }
        applied.tree_changed = true;
    }

    fn save(&self, record: Record) -> ShelfResult<()> {
        if !is_descendant(&self.root, &record.path) {
            return Err(ShelfError::InvalidPath(format!(
                "{} is outside of {}",
                record.path.display(),
                self.root.display()
            )));
        }
        let text = encode_record(&record)?;
        let path = record.path.clone();

        let _order = lock(&self.publish_order);
        // Окно открывается до записи, чтобы эхо не обогнало его.
        lock(&self.state)
            .suppressor
            .mark_ignored(path.clone(), self.config.ignore_ttl);
        if let Err(e) = write_atomic(&path, text.as_bytes()) {
            lock(&self.state).suppressor.should_suppress(&path);
            return Err(e);
        }

        // В состояние кладём то, что прочитает и эхо, чтобы повторное
        // событие после закрытия окна сравнилось как "без изменений".
        let outcome = match load_or_degrade(self.loader.as_ref(), &path) {
            LoadOutcome::Missing => LoadOutcome::Loaded(LoadedRecord {
                record,
                parse_error: None,
            }),
            loaded => loaded,
        };
        let applied = {
            let mut state = lock(&self.state);
            let mut applied = Applied::default();
            self.apply_file(&mut state, &path, outcome, true, &mut applied);
            applied
        };
        self.publish(applied);
        Ok(())
    }
}

/// Запись через скрытый временный файл и rename: watcher не видит
/// промежуточного (обрезанного) содержимого.
fn write_atomic(path: &Path, bytes: &[u8]) -> ShelfResult<()> {
    let name = path
        .file_name()
        .ok_or_else(|| ShelfError::FileNameMissing(path.to_path_buf()))?;
    let tmp = path.with_file_name(format!(".{}.tmp", name.to_string_lossy()));
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Запущенная синхронизация одного root.
pub struct LibrarySync {
    engine: Arc<Engine>,
    watcher: Option<WatcherHandle>,
    worker_tx: Option<mpsc::Sender<WorkerMsg>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for LibrarySync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibrarySync")
            .field("root", &self.engine.root)
            .field("running", &self.is_running())
            .finish()
    }
}

impl LibrarySync {
    /// Запустить синхронизацию.
    ///
    /// Подписчики `bus` получают `TREE_UPDATE` и `TAGS_UPDATE` сразу после
    /// начального обхода. Отсутствующий root — ошибка, watcher не стартует.
    pub fn start(
        config: SyncConfig,
        views: Arc<dyn OpenViewSource>,
        loader: Arc<dyn RecordLoader>,
        bus: Arc<EventBus>,
    ) -> ShelfResult<Self> {
        crate::logging::init_logging();

        let root = std::fs::canonicalize(validate_root(&config.root)?)?;
        let engine = Arc::new(Engine::new(root.clone(), config.clone(), bus, views, loader));

        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        // Watcher стартует до обхода: события, пришедшие во время обхода,
        // ждут в канале и применяются как add/update.
        let fs_tx = worker_tx.clone();
        let watcher = start_watcher(
            &root,
            WatcherOptions {
                data_extension: config.data_extension.clone(),
                poll_tick: config.poll_tick,
            },
            move |event| {
                let _ = fs_tx.send(WorkerMsg::Fs(event));
            },
        )?;

        let count = engine.initial_scan();
        info!(target: LOG_TARGET, "Indexed {count} files under {}", root.display());
        engine.publish_tree();
        engine.tag_emitter.notify();
        engine.tag_emitter.flush();

        let worker_engine = engine.clone();
        let worker = thread::spawn(move || run_worker(&worker_engine, &worker_rx));

        Ok(Self {
            engine,
            watcher: Some(watcher),
            worker_tx: Some(worker_tx),
            worker: Some(worker),
        })
    }

    pub fn root(&self) -> &Path {
        &self.engine.root
    }

    pub fn config(&self) -> &SyncConfig {
        &self.engine.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.engine.bus
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.engine.active.load(Ordering::SeqCst)
    }

    /// Применить события в обход ОС (например, от внешнего источника).
    /// Выполняется синхронно в вызывающем потоке. Скрытые пути, пути вне
    /// root и файлы с чужим расширением отбрасываются, как и у watcher'а.
    pub fn process_events(&self, events: Vec<WatchEvent>) {
        self.engine.process_batch(events);
    }

    /// Открыть ignore window для собственной записи приложения.
    pub fn mark_ignored(&self, path: impl Into<PathBuf>) {
        lock(&self.engine.state)
            .suppressor
            .mark_ignored(path, self.engine.config.ignore_ttl);
    }

    /// Записать запись на диск. Эхо от watcher'а будет проглочено, а
    /// состояние и подписчики обновляются сразу.
    pub fn save_record(&self, record: Record) -> ShelfResult<()> {
        self.engine.save(record)
    }

    pub fn record(&self, path: &Path) -> Option<LoadedRecord> {
        lock(&self.engine.state).records.get(path).cloned()
    }

    /// Все записи, отсортированы по пути.
    pub fn files(&self) -> Vec<LoadedRecord> {
        lock(&self.engine.state).records.values().cloned().collect()
    }

    /// Пользовательские теги (без синтетических).
    pub fn tags(&self) -> Vec<String> {
        lock(&self.engine.state).tags.get_tags()
    }

    /// Все теги индекса, включая синтетические.
    pub fn all_tags(&self) -> Vec<String> {
        lock(&self.engine.state).tags.all_tags()
    }

    pub fn paths_for_tag(&self, tag: &str) -> ShelfResult<Vec<PathBuf>> {
        lock(&self.engine.state).tags.get_paths_for_tag(tag)
    }

    /// Содержимое представления — то, что нужно клиенту для полного reload.
    pub fn files_for_view(&self, view: &OpenView) -> Vec<Record> {
        let state = lock(&self.engine.state);
        state
            .records
            .iter()
            .filter(|(path, _)| is_relevant(view, path, &state.tags.tags_of(path)))
            .map(|(_, l)| l.record.clone())
            .collect()
    }

    pub fn tree(&self) -> ShelfResult<FolderNode> {
        build_folder_tree(&self.engine.root)
    }

    /// Сменить root: старый watcher и worker останавливаются синхронно,
    /// состояние строится заново.
    ///
    /// Невалидный root отклоняется до остановки: экземпляр продолжает
    /// работать со старым root. Если новый root прошёл проверку, но запуск
    /// всё равно упал (watcher, `canonicalize`), синхронизация старого root
    /// перезапускается и возвращается ошибка нового запуска. Если не удался
    /// и перезапуск, экземпляр остаётся остановленным: `is_running()`
    /// вернёт `false`.
    pub fn switch_root(&mut self, root: impl Into<PathBuf>) -> ShelfResult<()> {
        let previous = self.engine.config.clone();
        let mut config = previous.clone();
        config.root = root.into();
        validate_root(&config.root)?;

        info!(target: LOG_TARGET, "Switching root to {}", config.root.display());
        self.shutdown();
        match self.restart(config) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(target: LOG_TARGET, "Cannot start new root: {e}; restoring {}", previous.root.display());
                if let Err(restore) = self.restart(previous) {
                    error!(target: LOG_TARGET, "Cannot restore previous root: {restore}");
                }
                Err(e)
            }
        }
    }

    fn restart(&mut self, config: SyncConfig) -> ShelfResult<()> {
        let next = Self::start(
            config,
            self.engine.views.clone(),
            self.engine.loader.clone(),
            self.engine.bus.clone(),
        )?;
        *self = next;
        Ok(())
    }

    /// Остановить синхронизацию (idempotent).
    pub fn stop(mut self) -> ShelfResult<()> {
        if self.worker.is_none() {
            return Err(ShelfError::WatcherNotRunning);
        }
        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        // 1) watcher: после stop() новых событий не будет.
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.stop() {
                warn!(target: LOG_TARGET, "Watcher stop failed: {e}");
            }
        }
        // 2) worker: необработанные события старого root отбрасываются.
        self.engine.active.store(false, Ordering::SeqCst);
        if let Some(tx) = self.worker_tx.take() {
            let _ = tx.send(WorkerMsg::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(target: LOG_TARGET, "Sync worker panicked");
            }
        }
        self.engine.tag_emitter.cancel();
        lock(&self.engine.state).suppressor.clear();
    }
}

impl Drop for LibrarySync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(engine: &Engine, rx: &mpsc::Receiver<WorkerMsg>) {
    loop {
        let first = match rx.recv() {
            Ok(WorkerMsg::Fs(event)) => event,
            Ok(WorkerMsg::Shutdown) | Err(_) => break,
        };

        let mut batch = vec![first];
        let mut stop = false;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                WorkerMsg::Fs(event) => batch.push(event),
                WorkerMsg::Shutdown => {
                    stop = true;
                    break;
                }
            }
        }
        if stop {
            break;
        }

        engine.process_batch(batch);
        lock(&engine.state).suppressor.purge_expired();
    }
    debug!(target: LOG_TARGET, "Sync worker finished");
}
