//! Нормализованное логирование для bookshelf core.
//!
//! ## Уровни логов
//! - `ERROR`: критические ошибки, требующие внимания
//! - `WARN`:  некритичные проблемы (например, подписчик не принял событие)
//! - `INFO`:  события жизненного цикла (start/stop watcher, смена root)
//! - `DEBUG`: детальная информация о каждом событии файловой системы
//! - `TRACE`: максимально детальный вывод (включая содержимое событий)
//!
//! ## Targets
//! Каждый компонент пишет в свой target: `bookshelf::watcher`,
//! `bookshelf::sync`, `bookshelf::tags`, `bookshelf::reducer`.
//!
//! ## Корреляция событий
//! Worker синхронизации создаёт [`LogContext`] на каждую пачку событий
//! watcher'а, чтобы все строки одной пачки можно было связать.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use log::{Level, LevelFilter};

static INIT: Once = Once::new();

/// Инициализировать логирование (idempotent).
///
/// Управление уровнем логов: переменная окружения `RUST_LOG`.
/// Примеры:
/// - `RUST_LOG=info` — только INFO и выше
/// - `RUST_LOG=bookshelf=debug` — DEBUG для всех компонентов
/// - `RUST_LOG=bookshelf::tags=trace` — только индекс тегов
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env("RUST_LOG")
            .format(|buf, record| {
                let level = match record.level() {
                    Level::Error => "E",
                    Level::Warn => "W",
                    Level::Info => "I",
                    Level::Debug => "D",
                    Level::Trace => "T",
                };

                // Формат: [timestamp] [LEVEL] [target] message
                writeln!(
                    buf,
                    "[{}] [{}] [{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    level,
                    record.target(),
                    record.args()
                )
            })
            .filter_module("bookshelf", LevelFilter::Info)
            .filter_module("bookshelf_core", LevelFilter::Info)
            .filter_module("notify", LevelFilter::Warn)
            .try_init();
    });
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Идентификатор одной операции в логах: `corr_<ms>_<n>[:operation]`.
///
/// Выводится через `Display`, так что его можно ставить прямо в
/// форматную строку: `debug!("[{ctx}] ...")`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    pub correlation_id: String,
    pub operation: Option<String>,
}

impl LogContext {
    pub fn new() -> Self {
        let n = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            correlation_id: format!("corr_{}_{n}", chrono::Utc::now().timestamp_millis()),
            operation: None,
        }
    }

    pub fn with_operation(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Self::new()
        }
    }
}

impl Default for LogContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.correlation_id)?;
        if let Some(op) = &self.operation {
            write!(f, ":{op}")?;
        }
        Ok(())
    }
}
