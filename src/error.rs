use std::path::PathBuf;

/// Единый тип ошибок bookshelf core.
#[derive(thiserror::Error, Debug)]
pub enum ShelfError {
  #[error("Documents directory is not available on this OS/user")]
  DefaultRootUnavailable,

  #[error("Invalid path: {0}")]
  InvalidPath(String),

  #[error("Watch root does not exist: {0:?}")]
  RootNotFound(PathBuf),

  #[error("Watch root is not a directory: {0:?}")]
  NotADirectory(PathBuf),

  #[error("Watcher is not running")]
  WatcherNotRunning,

  #[error("Unknown tag: {0}")]
  UnknownTag(String),

  #[error("Cannot parse {path:?}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("Cannot determine file name for path: {0:?}")]
  FileNameMissing(PathBuf),

  #[error("Event sink closed: {0}")]
  SinkClosed(String),

  #[error("Cannot apply event: {0}")]
  Apply(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Notify error: {0}")]
  Notify(#[from] notify::Error),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("YAML error: {0}")]
  Yaml(#[from] serde_yaml::Error),
}

pub type ShelfResult<T> = std::result::Result<T, ShelfError>;
