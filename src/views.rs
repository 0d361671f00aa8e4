//! Открытые представления UI и определение их релевантности.
//!
//! Core не владеет списком вкладок: UI отдаёт снимок через
//! [`OpenViewSource`], и он перечитывается на каждое событие.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Стабильный идентификатор представления.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageKind {
    Home,
    Settings,
    NewFile,
}

/// Что показывает представление.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ViewTarget {
    File {
        path: PathBuf,
    },
    Folder {
        path: PathBuf,
        #[serde(default)]
        recursive: bool,
    },
    Tag {
        name: String,
    },
    Page {
        kind: PageKind,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenView {
    pub id: ViewId,
    #[serde(flatten)]
    pub target: ViewTarget,
}

impl OpenView {
    pub fn file(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: ViewId::new(id),
            target: ViewTarget::File { path: path.into() },
        }
    }

    pub fn folder(id: impl Into<String>, path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            id: ViewId::new(id),
            target: ViewTarget::Folder {
                path: path.into(),
                recursive,
            },
        }
    }

    pub fn tag(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ViewId::new(id),
            target: ViewTarget::Tag { name: name.into() },
        }
    }

    pub fn page(id: impl Into<String>, kind: PageKind) -> Self {
        Self {
            id: ViewId::new(id),
            target: ViewTarget::Page { kind },
        }
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.target {
            ViewTarget::Tag { name } => Some(name),
            _ => None,
        }
    }
}

/// `path` строго внутри `ancestor` (по границам сегментов, не по строке).
pub fn is_descendant(ancestor: &Path, path: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}

/// Релевантность по расположению файла (`File`/`Folder`). Теги и страницы
/// здесь не учитываются.
pub fn is_path_relevant(view: &OpenView, path: &Path) -> bool {
    match &view.target {
        ViewTarget::File { path: p } => p == path,
        ViewTarget::Folder {
            path: p,
            recursive: true,
        } => is_descendant(p, path),
        ViewTarget::Folder {
            path: p,
            recursive: false,
        } => path.parent() == Some(p.as_path()),
        ViewTarget::Tag { .. } | ViewTarget::Page { .. } => false,
    }
}

/// Затронуто ли представление изменением `path`.
///
/// `path_tags` — теги файла в нужный момент: до изменения для remove,
/// после изменения для add.
pub fn is_relevant(view: &OpenView, path: &Path, path_tags: &BTreeSet<String>) -> bool {
    match &view.target {
        ViewTarget::Tag { name } => path_tags.contains(name),
        _ => is_path_relevant(view, path),
    }
}

/// Идентификаторы затронутых представлений в исходном порядке.
/// Пустой результат — "никому сообщать не нужно".
pub fn relevant_view_ids(
    views: &[OpenView],
    path: &Path,
    path_tags: &BTreeSet<String>,
) -> Vec<ViewId> {
    views
        .iter()
        .filter(|view| is_relevant(view, path, path_tags))
        .map(|view| view.id.clone())
        .collect()
}

/// Источник снимка открытых представлений.
pub trait OpenViewSource: Send + Sync {
    fn current_open_views(&self) -> Vec<OpenView>;
}

impl<F> OpenViewSource for F
where
    F: Fn() -> Vec<OpenView> + Send + Sync,
{
    fn current_open_views(&self) -> Vec<OpenView> {
        self()
    }
}

/// Список представлений, который UI обновляет, а core читает.
#[derive(Clone, Debug, Default)]
pub struct SharedViews {
    inner: Arc<RwLock<Vec<OpenView>>>,
}

impl SharedViews {
    pub fn new(views: Vec<OpenView>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(views)),
        }
    }

    /// Заменить весь список (UI открыл/закрыл/переупорядочил вкладки).
    pub fn replace(&self, views: Vec<OpenView>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = views;
    }

    pub fn open(&self, view: OpenView) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(view);
    }

    pub fn close(&self, id: &ViewId) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|v| &v.id != id);
    }

    pub fn snapshot(&self) -> Vec<OpenView> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OpenViewSource for SharedViews {
    fn current_open_views(&self) -> Vec<OpenView> {
        self.snapshot()
    }
}
