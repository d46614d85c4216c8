// Path containment for file operations
// Requested paths are joined onto the project root and must stay under it,
// compared component by component rather than as raw string prefixes.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Directory names hidden from listings regardless of ignore files
const VCS_METADATA_DIRS: &[&str] = &[".git"];

#[derive(Debug, thiserror::Error)]
pub enum PathGuardError {
    #[error("project path must be absolute: {0}")]
    NotAbsolute(String),
    #[error("path escapes project root: {0}")]
    Escape(String),
    #[error("failed to resolve {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolve `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root, the same way the OS treats `/..`.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Normalize a project root supplied by a client or the CLI
pub fn normalize_root(raw: &str) -> Result<PathBuf, PathGuardError> {
    let trimmed = raw.trim();
    let path = Path::new(trimmed);
    if trimmed.is_empty() || !path.is_absolute() {
        return Err(PathGuardError::NotAbsolute(raw.to_string()));
    }
    Ok(normalize_lexically(path))
}

/// Join `request` onto `root` and verify the result stays within `root`.
///
/// An absolute `request` replaces the root (filesystem-join semantics) and is
/// then held to the same containment check as any other path.
pub fn resolve(root: &Path, request: &str) -> Result<PathBuf, PathGuardError> {
    let root = normalize_lexically(root);
    let candidate = normalize_lexically(&root.join(request));
    if candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(PathGuardError::Escape(request.to_string()))
    }
}

/// Re-check containment through the filesystem so symlinks inside the
/// project cannot redirect an operation outside of it.
///
/// Canonicalizes the deepest existing ancestor of `resolved`; a dangling
/// symlink anywhere on the way is rejected outright.
pub fn confine_existing(root: &Path, resolved: &Path) -> Result<(), PathGuardError> {
    let canonical_root = std::fs::canonicalize(root).map_err(|source| PathGuardError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut ancestor = resolved.to_path_buf();
    let canonical = loop {
        match std::fs::canonicalize(&ancestor) {
            Ok(canonical) => break canonical,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if std::fs::symlink_metadata(&ancestor).is_ok() {
                    return Err(PathGuardError::Escape(resolved.display().to_string()));
                }
                if !ancestor.pop() {
                    return Err(PathGuardError::Io {
                        path: resolved.to_path_buf(),
                        source: err,
                    });
                }
            }
            Err(source) => {
                return Err(PathGuardError::Io {
                    path: ancestor,
                    source,
                })
            }
        }
    };

    if canonical.starts_with(&canonical_root) {
        Ok(())
    } else {
        Err(PathGuardError::Escape(resolved.display().to_string()))
    }
}

/// Whether a directory entry is version-control metadata
pub fn is_vcs_metadata(name: &str) -> bool {
    VCS_METADATA_DIRS.contains(&name)
}
