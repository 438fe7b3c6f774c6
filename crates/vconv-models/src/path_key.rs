//! Canonical catalog path keys.
//!
//! Videos are keyed by their path relative to the scan root that found
//! them, normalized to the host's separator and always prefixed with one.
//! Deriving the key through a single function keeps keys stable no matter
//! which platform produced them.

use std::path::{Path, MAIN_SEPARATOR};

/// Derive the catalog key for `absolute` under scan root `root`.
///
/// Returns `None` when the file does not live under the root.
pub fn catalog_path_key(root: &Path, absolute: &Path) -> Option<String> {
    let relative = absolute.strip_prefix(root).ok()?;
    let mut key = String::new();
    for component in relative.components() {
        key.push(MAIN_SEPARATOR);
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    if key.is_empty() {
        return None;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sep(template: &str) -> String {
        template.replace('/', &MAIN_SEPARATOR.to_string())
    }

    #[test]
    fn test_key_is_separator_prefixed() {
        let root = PathBuf::from("/srv/media");
        let file = PathBuf::from("/srv/media/movies/a.mp4");
        assert_eq!(
            catalog_path_key(&root, &file).unwrap(),
            sep("/movies/a.mp4")
        );
    }

    #[test]
    fn test_key_for_file_directly_under_root() {
        let root = PathBuf::from("/srv/media");
        let file = PathBuf::from("/srv/media/a.mp4");
        assert_eq!(catalog_path_key(&root, &file).unwrap(), sep("/a.mp4"));
    }

    #[test]
    fn test_outside_root_yields_none() {
        let root = PathBuf::from("/srv/media");
        let file = PathBuf::from("/other/b.mp4");
        assert!(catalog_path_key(&root, &file).is_none());
    }

    #[test]
    fn test_root_itself_yields_none() {
        let root = PathBuf::from("/srv/media");
        assert!(catalog_path_key(&root, &root).is_none());
    }
}
