//! Конфигурация синхронизации и клиентского reducer'а.
//!
//! Root по умолчанию: `Documents/Bookshelf` (создаётся при отсутствии).
//! Явно переданный root должен существовать: ошибка здесь фатальна для
//! запуска watcher'а.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ShelfError, ShelfResult};

/// Папка библиотеки по умолчанию (внутри Documents).
pub const DEFAULT_LIBRARY_FOLDER_NAME: &str = "Bookshelf";

/// Расширение файлов-записей по умолчанию.
pub const DEFAULT_DATA_EXTENSION: &str = "md";

pub const DEFAULT_TAG_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_IGNORE_TTL: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_TICK: Duration = Duration::from_millis(250);

pub const DEFAULT_REDUCER_THROTTLE: Duration = Duration::from_millis(300);
pub const DEFAULT_REDUCER_THRESHOLD: usize = 15;

pub const ENV_ROOT: &str = "BOOKSHELF_ROOT";
pub const ENV_DATA_EXT: &str = "BOOKSHELF_DATA_EXT";

/// Параметры [`crate::sync::LibrarySync`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Абсолютный путь наблюдаемой директории.
    pub root: PathBuf,
    /// Расширение файлов-записей без точки.
    pub data_extension: String,
    /// Окно коалесценции для `TAGS_UPDATE`.
    #[serde(with = "duration_ms")]
    pub tag_debounce: Duration,
    /// Сколько живёт ignore window после собственной записи.
    #[serde(with = "duration_ms")]
    pub ignore_ttl: Duration,
    /// Период опроса stop-сигнала в потоке watcher'а.
    #[serde(with = "duration_ms")]
    pub poll_tick: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            data_extension: DEFAULT_DATA_EXTENSION.to_string(),
            tag_debounce: DEFAULT_TAG_DEBOUNCE,
            ignore_ttl: DEFAULT_IGNORE_TTL,
            poll_tick: DEFAULT_POLL_TICK,
        }
    }
}

impl SyncConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Собрать конфиг из окружения (`BOOKSHELF_ROOT`, `BOOKSHELF_DATA_EXT`).
    pub fn from_env() -> ShelfResult<Self> {
        let root_override = std::env::var(ENV_ROOT).ok();
        let root = resolve_root(root_override.as_deref())?;
        let mut config = Self::new(root);
        if let Ok(ext) = std::env::var(ENV_DATA_EXT) {
            config = config.with_data_extension(ext);
        }
        Ok(config)
    }

    pub fn with_data_extension(mut self, ext: impl Into<String>) -> Self {
        self.data_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_tag_debounce(mut self, window: Duration) -> Self {
        self.tag_debounce = window;
        self
    }

    pub fn with_ignore_ttl(mut self, ttl: Duration) -> Self {
        self.ignore_ttl = ttl;
        self
    }

    pub fn with_poll_tick(mut self, tick: Duration) -> Self {
        self.poll_tick = tick;
        self
    }
}

/// Проверка расширения файла-записи; `data_extension` без точки.
pub fn has_data_extension(path: &Path, data_extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == data_extension)
}

/// Параметры [`crate::reducer::ThrottledReducer`].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReducerConfig {
    #[serde(with = "duration_ms")]
    pub throttle: Duration,
    /// Больше этого числа событий в буфере — полный reload вместо replay.
    pub threshold: usize,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_REDUCER_THROTTLE,
            threshold: DEFAULT_REDUCER_THRESHOLD,
        }
    }
}

/// Определить дефолтный root: `Documents/Bookshelf`.
/// Если директории нет — создать.
pub fn ensure_default_root() -> ShelfResult<PathBuf> {
    let docs = dirs::document_dir().ok_or(ShelfError::DefaultRootUnavailable)?;
    let root = docs.join(DEFAULT_LIBRARY_FOLDER_NAME);
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

/// Проверить явно заданный root: непустой, абсолютный, существующая директория.
pub fn validate_root(path: &Path) -> ShelfResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(ShelfError::InvalidPath("empty root path".to_string()));
    }
    if !path.is_absolute() {
        return Err(ShelfError::InvalidPath(format!(
            "root path must be absolute: {}",
            path.display()
        )));
    }
    let meta = std::fs::metadata(path).map_err(|_| ShelfError::RootNotFound(path.to_path_buf()))?;
    if !meta.is_dir() {
        return Err(ShelfError::NotADirectory(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
}

/// `override_path`: абсолютный путь (если указан). Иначе — дефолт.
pub fn resolve_root(override_path: Option<&str>) -> ShelfResult<PathBuf> {
    match override_path {
        Some(p) if p.trim().is_empty() => {
            Err(ShelfError::InvalidPath("empty root path".to_string()))
        }
        Some(p) => validate_root(Path::new(p)),
        None => ensure_default_root(),
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
