//! Дерево папок (гранулярность — директории) и начальный обход root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::config::has_data_extension;
use crate::error::ShelfResult;

/// Узел дерева папок для `TREE_UPDATE`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub name: String,
    pub path: PathBuf,
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    fn new(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            children: Vec::new(),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|s| s.starts_with('.'))
}

/// Снять верхний узел стека и повесить его на родителя.
fn close_node(stack: &mut Vec<FolderNode>, root: &mut FolderNode) {
    if let Some(child) = stack.pop() {
        stack.last_mut().unwrap_or(root).children.push(child);
    }
}

/// Построить дерево директорий под `root` (скрытые пропускаются,
/// дети отсортированы по имени).
pub fn build_folder_tree(root: &Path) -> ShelfResult<FolderNode> {
    std::fs::metadata(root)?;
    let mut tree = FolderNode::new(root);

    // Обход в глубину: на стеке цепочка предков текущей директории
    // (глубины 1..depth-1). Директории, удалённые во время обхода, пропускаются.
    let mut stack: Vec<FolderNode> = Vec::new();
    let dirs = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir());
    for entry in dirs {
        while stack.len() >= entry.depth() {
            close_node(&mut stack, &mut tree);
        }
        stack.push(FolderNode::new(entry.path()));
    }
    while !stack.is_empty() {
        close_node(&mut stack, &mut tree);
    }
    Ok(tree)
}

/// Все файлы-записи под `dir` (рекурсивно, без скрытых), отсортированы.
pub fn scan_data_files(dir: &Path, data_extension: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
        .filter(|p| has_data_extension(p, data_extension))
        .collect();
    files.sort();
    files
}
