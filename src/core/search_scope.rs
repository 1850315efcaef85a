// src/core/search_scope.rs

use std::path::{Path, PathBuf};

/// Where to look for marker files.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchScope {
    /// Walk upward from `from` to `to`, both inclusive. `to` must be `from`
    /// or one of its ancestors; `None` walks up to the filesystem root.
    Tree { from: PathBuf, to: Option<PathBuf> },
    /// Look in these folders, in order.
    List(Vec<PathBuf>),
}

impl SearchScope {
    /// A tree scope bounded at `to`. If `to` is not an ancestor of `from`,
    /// only `from` itself is searched.
    pub fn tree(from: impl Into<PathBuf>, to: Option<PathBuf>) -> Self {
        let from = from.into();
        let to = match to {
            Some(to) if from.starts_with(&to) => Some(to),
            Some(to) => {
                log::warn!(
                    "Scope bound '{}' is not an ancestor of '{}', searching '{}' only",
                    to.display(),
                    from.display(),
                    from.display()
                );
                Some(from.clone())
            }
            None => None,
        };
        Self::Tree { from, to }
    }

    /// The tree scope that starts at the folder containing `file`.
    pub fn for_file(file: &Path, to: Option<PathBuf>) -> Self {
        let from = file.parent().unwrap_or(file).to_path_buf();
        Self::tree(from, to)
    }

    /// Folders to search, nearest first.
    pub fn folders(&self) -> Vec<PathBuf> {
        match self {
            Self::List(folders) => folders.clone(),
            Self::Tree { from, to } => {
                let mut folders = Vec::new();
                for ancestor in from.ancestors() {
                    folders.push(ancestor.to_path_buf());
                    if to.as_deref() == Some(ancestor) {
                        break;
                    }
                }
                folders
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_scope_stops_at_bound() {
        let scope = SearchScope::tree("/home/u/proj/src", Some(PathBuf::from("/home/u")));
        assert_eq!(
            scope.folders(),
            vec![
                PathBuf::from("/home/u/proj/src"),
                PathBuf::from("/home/u/proj"),
                PathBuf::from("/home/u"),
            ]
        );
    }

    #[test]
    fn test_tree_scope_defaults_to_root() {
        let scope = SearchScope::tree("/a/b", None);
        assert_eq!(
            scope.folders(),
            vec![PathBuf::from("/a/b"), PathBuf::from("/a"), PathBuf::from("/")]
        );
    }

    #[test]
    fn test_unrelated_bound_stops_at_start() {
        let scope = SearchScope::tree("/a/b", Some(PathBuf::from("/x")));
        assert_eq!(
            scope,
            SearchScope::Tree { from: PathBuf::from("/a/b"), to: Some(PathBuf::from("/a/b")) }
        );
        assert_eq!(scope.folders(), vec![PathBuf::from("/a/b")]);
    }

    #[test]
    fn test_list_scope_keeps_order() {
        let scope = SearchScope::List(vec![PathBuf::from("/z"), PathBuf::from("/a")]);
        assert_eq!(scope.folders(), vec![PathBuf::from("/z"), PathBuf::from("/a")]);
    }

    #[test]
    fn test_for_file_starts_at_parent() {
        let scope = SearchScope::for_file(Path::new("/p/src/main.cpp"), Some(PathBuf::from("/p")));
        assert_eq!(scope.folders(), vec![PathBuf::from("/p/src"), PathBuf::from("/p")]);
    }
}
