//! Модуль мониторинга файловой системы.
//!
//! Отвечает за:
//! - проверку root (отсутствующий root — фатальная ошибка старта)
//! - запуск рекурсивного `notify` watcher в отдельном потоке
//! - классификацию событий (см. [`classify`])
//! - graceful shutdown: после `stop()` callback больше не вызывается

mod classify;
mod events;

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::validate_root;
use crate::error::{ShelfError, ShelfResult};

pub use classify::{classify_event, is_synced_path};
pub use events::{ChangeKind, EntryKind, WatchEvent};

const LOG_TARGET: &str = "bookshelf::watcher";

/// Параметры запуска watcher'а.
#[derive(Clone, Debug)]
pub struct WatcherOptions {
  /// Расширение файлов-записей без точки.
  pub data_extension: String,
  /// Как часто поток проверяет stop-сигнал.
  pub poll_tick: Duration,
}

impl Default for WatcherOptions {
  fn default() -> Self {
    Self {
      data_extension: crate::config::DEFAULT_DATA_EXTENSION.to_string(),
      poll_tick: crate::config::DEFAULT_POLL_TICK,
    }
  }
}

/// Handle запущенного watcher'а.
#[derive(Debug)]
pub struct WatcherHandle {
  stop_tx: mpsc::Sender<()>,
  join: Option<thread::JoinHandle<()>>,
  watch_dir: PathBuf,
}

impl WatcherHandle {
  pub fn watch_dir(&self) -> &Path {
    &self.watch_dir
  }

  pub fn is_running(&self) -> bool {
    self.join.as_ref().is_some_and(|j| !j.is_finished())
  }

  /// Остановить watcher и дождаться завершения потока.
  pub fn stop(mut self) -> ShelfResult<()> {
    self.shutdown()
  }

  fn shutdown(&mut self) -> ShelfResult<()> {
    let Some(join) = self.join.take() else {
      return Err(ShelfError::WatcherNotRunning);
    };
    let _ = self.stop_tx.send(());
    if join.join().is_err() {
      error!(target: LOG_TARGET, "Watcher thread panicked");
    }
    Ok(())
  }
}

impl Drop for WatcherHandle {
  fn drop(&mut self) {
    if self.join.is_some() {
      let _ = self.shutdown();
    }
  }
}

/// Запустить watcher.
///
/// `root`: абсолютный путь существующей директории.
/// `on_event`: callback для каждого классифицированного события; вызывается
/// из одного потока, в порядке доставки ОС.
pub fn start_watcher(
  root: &Path,
  options: WatcherOptions,
  on_event: impl Fn(WatchEvent) + Send + 'static,
) -> ShelfResult<WatcherHandle> {
  let root = validate_root(root)?;
  // notify отдаёт канонические пути (например, /private/var на macOS).
  let watch_dir = std::fs::canonicalize(&root)?;

  info!(target: LOG_TARGET, "Starting watcher for: {}", watch_dir.display());

  let (stop_tx, stop_rx) = mpsc::channel::<()>();
  let (ready_tx, ready_rx) = mpsc::channel::<ShelfResult<()>>();
  let (event_tx, event_rx) = mpsc::channel::<Result<notify::Event, notify::Error>>();

  let watch_dir_clone = watch_dir.clone();
  let join = thread::spawn(move || {
    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
      // best-effort send; если receiver уже закрыт — просто игнорируем.
      let _ = event_tx.send(res);
    }) {
      Ok(w) => w,
      Err(e) => {
        error!(target: LOG_TARGET, "Failed to create watcher: {e}");
        let _ = ready_tx.send(Err(e.into()));
        return;
      }
    };

    if let Err(e) = watcher.watch(&watch_dir_clone, RecursiveMode::Recursive) {
      error!(target: LOG_TARGET, "Failed to watch directory {}: {e}", watch_dir_clone.display());
      let _ = ready_tx.send(Err(e.into()));
      return;
    }
    let _ = ready_tx.send(Ok(()));

    loop {
      // 1) graceful shutdown
      if stop_rx.try_recv().is_ok() {
        info!(target: LOG_TARGET, "Watcher shutdown requested");
        break;
      }

      // 2) обработка событий notify
      match event_rx.recv_timeout(options.poll_tick) {
        Ok(Ok(event)) => {
          trace!(target: LOG_TARGET, "notify event: {:?} {:?}", event.kind, event.paths);
          for classified in classify_event(&watch_dir_clone, &options.data_extension, &event) {
            debug!(target: LOG_TARGET, "{:?} {:?} {:?}", classified.kind, classified.entry, classified.paths);
            on_event(classified);
          }
        }
        Ok(Err(err)) => {
          warn!(target: LOG_TARGET, "notify error: {err}");
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
          // тик
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
          warn!(target: LOG_TARGET, "notify channel disconnected");
          break;
        }
      }
    }

    // Отписываемся до выхода: события в очереди дропаются вместе с event_rx.
    let _ = watcher.unwatch(&watch_dir_clone);
    info!(target: LOG_TARGET, "Watcher thread finished");
  });

  match ready_rx.recv() {
    Ok(Ok(())) => Ok(WatcherHandle {
      stop_tx,
      join: Some(join),
      watch_dir,
    }),
    Ok(Err(e)) => {
      let _ = join.join();
      Err(e)
    }
    Err(_) => {
      let _ = join.join();
      Err(ShelfError::WatcherNotRunning)
    }
  }
}
