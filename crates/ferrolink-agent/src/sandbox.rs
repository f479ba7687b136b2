use std::path::{Component, Path, PathBuf};

/// Resolve a client-supplied path inside the agent's root directory.
///
/// Only plain relative paths are accepted: absolute paths, drive
/// prefixes, and any `..` component are rejected so a request can never
/// name a file outside the root.
pub fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    if requested.is_empty() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(clean))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> &'static Path {
        Path::new("/srv/ferrolink")
    }

    #[test]
    fn plain_relative_paths_resolve() {
        assert_eq!(
            resolve(root(), "data/report.bin"),
            Some(PathBuf::from("/srv/ferrolink/data/report.bin"))
        );
        assert_eq!(
            resolve(root(), "./a.txt"),
            Some(PathBuf::from("/srv/ferrolink/a.txt"))
        );
    }

    #[test]
    fn traversal_and_absolute_paths_rejected() {
        assert_eq!(resolve(root(), "../etc/passwd"), None);
        assert_eq!(resolve(root(), "data/../../x"), None);
        assert_eq!(resolve(root(), "/etc/passwd"), None);
        assert_eq!(resolve(root(), ""), None);
        assert_eq!(resolve(root(), "."), None);
    }
}
