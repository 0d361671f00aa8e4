//! Bookshelf Rust Core
//!
//! Синхронизация личной библиотеки книг с директорией на диске: watcher
//! файловой системы, индекс тегов, адресная рассылка изменений открытым
//! представлениям и клиентский throttled reducer.
//!
//! Точка входа — [`sync::LibrarySync`]; внешний wire-формат — в [`api`].

pub mod bus;
pub mod config;
pub mod error;
pub mod file_watcher;
pub mod logging;
pub mod record;
pub mod reducer;
pub mod suppressor;
pub mod sync;
pub mod tags;
pub mod timer;
pub mod tree;
pub mod views;

// Тонкий внешний слой лежит в корне crate, рядом с Cargo.toml.
#[path = "../api.rs"]
pub mod api;

pub use bus::{EventBus, EventSink, ScopedEvent, ScopedKind, ShelfEvent};
pub use config::{ReducerConfig, SyncConfig};
pub use error::{ShelfError, ShelfResult};
pub use record::{LoadedRecord, Record, RecordLoader};
pub use sync::LibrarySync;
pub use views::{OpenView, OpenViewSource, SharedViews, ViewId};
