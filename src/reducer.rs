//! Клиентская сторона: throttled-применение адресных событий к списку
//! одного представления.
//!
//! Пачка из N переименований даёт до 2N событий, а их поштучное применение
//! к плоскому списку квадратично. Поэтому события копятся в буфере и
//! сбрасываются не чаще раза в `throttle`; если в буфере больше
//! `threshold` событий, вместо replay делается один полный reload.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::bus::{EventBus, EventSink, ScopedEvent, ScopedKind, ShelfEvent, SubscriptionId};
use crate::config::ReducerConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::record::Record;
use crate::timer::CancellableTimer;
use crate::views::ViewId;

const LOG_TARGET: &str = "bookshelf::reducer";

/// Куда reducer применяет события.
pub trait ReducerTarget: Send {
    fn apply_incremental(&mut self, event: &ScopedEvent) -> ShelfResult<()>;
    fn full_refresh(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReducerState {
    Idle,
    Buffering,
    Flushing,
}

/// Чем закончился flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Applied(usize),
    FullRefresh,
}

struct Inner<T> {
    state: ReducerState,
    buffer: Vec<ScopedEvent>,
    threshold: usize,
    target: T,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: ReducerTarget> Inner<T> {
    fn flush(&mut self, force_full: bool) -> FlushOutcome {
        if self.buffer.is_empty() && !force_full {
            self.state = ReducerState::Idle;
            return FlushOutcome::Empty;
        }
        self.state = ReducerState::Flushing;
        let events = std::mem::take(&mut self.buffer);

        let outcome = if force_full || events.len() > self.threshold {
            debug!(target: LOG_TARGET, "full refresh instead of {} events", events.len());
            self.target.full_refresh();
            FlushOutcome::FullRefresh
        } else {
            let mut outcome = FlushOutcome::Applied(events.len());
            for event in &events {
                if let Err(e) = self.target.apply_incremental(event) {
                    warn!(
                        target: LOG_TARGET,
                        "Cannot apply {:?} for {}: {e}; falling back to full refresh",
                        event.kind,
                        event.path.display()
                    );
                    self.target.full_refresh();
                    outcome = FlushOutcome::FullRefresh;
                    break;
                }
            }
            outcome
        };

        self.state = ReducerState::Idle;
        outcome
    }
}

/// Буферизующий reducer одного представления.
pub struct ThrottledReducer<T: ReducerTarget + 'static> {
    // Объявлен первым: при drop таймер останавливается раньше состояния.
    timer: CancellableTimer,
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: ReducerTarget + 'static> ThrottledReducer<T> {
    pub fn new(config: ReducerConfig, target: T) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            state: ReducerState::Idle,
            buffer: Vec::new(),
            threshold: config.threshold,
            target,
        }));
        let timer_inner = inner.clone();
        let timer = CancellableTimer::throttle(config.throttle, move || {
            lock(&timer_inner).flush(false);
        });
        Self { timer, inner }
    }

    /// Добавить событие в буфер и запланировать flush, если он ещё не ждёт.
    pub fn on_event(&self, event: ScopedEvent) {
        let mut inner = lock(&self.inner);
        inner.buffer.push(event);
        inner.state = ReducerState::Buffering;
        drop(inner);
        self.timer.schedule();
    }

    /// Сбросить буфер сейчас. `force_full` — полный reload независимо от
    /// размера буфера.
    pub fn flush(&self, force_full: bool) -> FlushOutcome {
        self.timer.cancel();
        lock(&self.inner).flush(force_full)
    }

    /// Отменить ожидающий flush и выбросить буфер.
    pub fn cancel(&self) {
        self.timer.cancel();
        let mut inner = lock(&self.inner);
        inner.buffer.clear();
        inner.state = ReducerState::Idle;
    }

    pub fn state(&self) -> ReducerState {
        lock(&self.inner).state
    }

    pub fn pending(&self) -> usize {
        lock(&self.inner).buffer.len()
    }

    pub fn with_target<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner).target)
    }
}

impl<T: ReducerTarget + 'static> std::fmt::Debug for ThrottledReducer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("ThrottledReducer")
            .field("state", &inner.state)
            .field("pending", &inner.buffer.len())
            .finish_non_exhaustive()
    }
}

type Reload = Box<dyn FnMut() -> Vec<Record> + Send>;

/// Плоский список записей представления.
pub struct ViewList {
    items: Vec<Record>,
    reload: Reload,
    full_refreshes: usize,
}

impl ViewList {
    /// `reload` отдаёт актуальное содержимое представления целиком
    /// (обычно `LibrarySync::files_for_view`).
    pub fn new(reload: impl FnMut() -> Vec<Record> + Send + 'static) -> Self {
        let mut reload: Reload = Box::new(reload);
        let items = reload();
        Self {
            items,
            reload,
            full_refreshes: 0,
        }
    }

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.items.iter().map(|r| r.path.as_path()).collect()
    }

    pub fn full_refreshes(&self) -> usize {
        self.full_refreshes
    }
}

impl ReducerTarget for ViewList {
    fn apply_incremental(&mut self, event: &ScopedEvent) -> ShelfResult<()> {
        match event.kind {
            ScopedKind::Add | ScopedKind::Update => {
                let record = event.record.clone().ok_or_else(|| {
                    ShelfError::Apply(format!("{:?} without record: {}", event.kind, event.path.display()))
                })?;
                // Повторный add уже известного пути — это update.
                match self.items.iter_mut().find(|r| r.path == event.path) {
                    Some(slot) => *slot = record,
                    None => self.items.push(record),
                }
            }
            ScopedKind::Remove => self.items.retain(|r| r.path != event.path),
        }
        Ok(())
    }

    fn full_refresh(&mut self) {
        self.items = (self.reload)();
        self.full_refreshes += 1;
    }
}

struct ViewFilter<T: ReducerTarget + 'static> {
    view_id: ViewId,
    reducer: Arc<ThrottledReducer<T>>,
}

impl<T: ReducerTarget + 'static> EventSink for ViewFilter<T> {
    fn deliver(&self, event: &ShelfEvent) -> ShelfResult<()> {
        if let ShelfEvent::Scoped(scoped) = event {
            if scoped.affects(&self.view_id) {
                self.reducer.on_event(scoped.clone());
            }
        }
        Ok(())
    }
}

/// Подписка представления на шину: пропускает только события, в которых
/// есть его id. Drop отписывает и отменяет ожидающий flush.
pub struct ViewSubscription<T: ReducerTarget + 'static> {
    bus: Arc<EventBus>,
    id: SubscriptionId,
    view_id: ViewId,
    reducer: Arc<ThrottledReducer<T>>,
}

impl<T: ReducerTarget + 'static> ViewSubscription<T> {
    pub fn attach(bus: &Arc<EventBus>, view_id: ViewId, reducer: ThrottledReducer<T>) -> Self {
        let reducer = Arc::new(reducer);
        let id = bus.subscribe(Arc::new(ViewFilter {
            view_id: view_id.clone(),
            reducer: reducer.clone(),
        }));
        debug!(target: LOG_TARGET, "view {view_id} subscribed");
        Self {
            bus: bus.clone(),
            id,
            view_id,
            reducer,
        }
    }

    pub fn view_id(&self) -> &ViewId {
        &self.view_id
    }

    pub fn reducer(&self) -> &ThrottledReducer<T> {
        &self.reducer
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T: ReducerTarget + 'static> Drop for ViewSubscription<T> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
        self.reducer.cancel();
        debug!(target: LOG_TARGET, "view {} unsubscribed", self.view_id);
    }
}
