// File operations scoped to a project root
// Every call goes through the path guard; nothing is cached between requests.

use crate::session::path_guard::{self, PathGuardError};
use crate::session::protocol::{FileNode, PathContents};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Per-directory ignore files honoured by listings
const IGNORE_FILES: &[&str] = &[".gitignore", ".ignore"];

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error(transparent)]
    Guard(#[from] PathGuardError),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not valid UTF-8", .0.display())]
    NotUtf8(PathBuf),
    #[error("{} is a directory", .0.display())]
    IsDirectory(PathBuf),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileError {
    /// True when the request named a path outside the project
    pub fn is_containment(&self) -> bool {
        matches!(
            self,
            FileError::Guard(PathGuardError::Escape(_) | PathGuardError::NotAbsolute(_))
        )
    }
}

/// Read a file or list a directory under `root`
pub fn read_path(root: &Path, request: &str) -> Result<PathContents, FileError> {
    let resolved = path_guard::resolve(root, request)?;
    path_guard::confine_existing(root, &resolved)?;

    let metadata = fs::metadata(&resolved).map_err(|source| FileError::Read {
        path: resolved.clone(),
        source,
    })?;

    if metadata.is_dir() {
        return Ok(PathContents::Dir {
            contents: list_dir(&path_guard::normalize_lexically(root), &resolved),
        });
    }

    let bytes = fs::read(&resolved).map_err(|source| FileError::Read {
        path: resolved.clone(),
        source,
    })?;
    let contents = String::from_utf8(bytes).map_err(|_| FileError::NotUtf8(resolved.clone()))?;

    Ok(PathContents::File {
        name: file_name(&resolved),
        length: contents.len() as u64,
        contents,
    })
}

/// Write `contents` to `request` under `root`, creating parent directories
pub fn write_file(root: &Path, request: &str, contents: &str) -> Result<PathBuf, FileError> {
    let resolved = path_guard::resolve(root, request)?;
    path_guard::confine_existing(root, &resolved)?;

    if resolved.is_dir() {
        return Err(FileError::IsDirectory(resolved));
    }

    if let Some(parent) = resolved.parent() {
        fs::create_dir_all(parent).map_err(|source| FileError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    atomic_write(&resolved, contents).map_err(|source| FileError::Write {
        path: resolved.clone(),
        source,
    })?;

    Ok(resolved)
}

/// Write to a uniquely named sibling temp file, then rename over the target
fn atomic_write(path: &Path, contents: &str) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no parent directory for {}", path.display()),
        )
    })?;

    // Same directory keeps the rename on one filesystem; the temp file is
    // removed on drop if anything below fails
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents.as_bytes())?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Directory listing
// ============================================================================

enum NodeBuilder {
    File(u64),
    Dir(DirBuilder),
}

#[derive(Default)]
struct DirBuilder {
    children: BTreeMap<String, NodeBuilder>,
}

impl DirBuilder {
    fn insert(&mut self, parts: &[String], leaf: NodeBuilder) {
        let Some((first, rest)) = parts.split_first() else {
            return;
        };

        if rest.is_empty() {
            match leaf {
                NodeBuilder::File(_) => {
                    self.children.insert(first.clone(), leaf);
                }
                NodeBuilder::Dir(_) => {
                    self.children.entry(first.clone()).or_insert(leaf);
                }
            }
            return;
        }

        let child = self
            .children
            .entry(first.clone())
            .or_insert_with(|| NodeBuilder::Dir(DirBuilder::default()));
        if let NodeBuilder::Dir(dir) = child {
            dir.insert(rest, leaf);
        }
    }

    fn into_nodes(self) -> Vec<FileNode> {
        self.children
            .into_iter()
            .map(|(name, node)| match node {
                NodeBuilder::File(length) => FileNode::File { name, length },
                NodeBuilder::Dir(dir) => FileNode::Dir {
                    name,
                    contents: dir.into_nodes(),
                },
            })
            .collect()
    }
}

/// Ignore matchers for the directories between `root` (inclusive) and
/// `dir` (exclusive). The walker reads `dir` and everything below it itself.
fn inherited_ignores(root: &Path, dir: &Path) -> Vec<Gitignore> {
    let Ok(relative) = dir.strip_prefix(root) else {
        return Vec::new();
    };

    let mut current = root.to_path_buf();
    let mut ancestors = Vec::new();
    for component in relative.components() {
        ancestors.push(current.clone());
        current.push(component);
    }

    ancestors
        .iter()
        .filter_map(|ancestor| {
            let mut builder = GitignoreBuilder::new(ancestor);
            for name in IGNORE_FILES {
                let file = ancestor.join(name);
                if file.is_file() {
                    if let Some(err) = builder.add(&file) {
                        tracing::debug!("Bad ignore file {}: {}", file.display(), err);
                    }
                }
            }
            builder.build().ok().filter(|gi| !gi.is_empty())
        })
        .collect()
}

/// Recursive listing of `dir` inside the project at `root`, sorted by name.
///
/// Skips `.git` and anything the project's ignore files exclude. Ignore
/// files above `root` are not consulted. Entries that cannot be read are
/// left out rather than failing the listing.
pub fn list_dir(root: &Path, dir: &Path) -> Vec<FileNode> {
    let inherited = inherited_ignores(root, dir);
    let walker = WalkBuilder::new(dir)
        .hidden(false)
        .parents(false)
        .follow_links(false)
        .require_git(false)
        .git_global(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_vcs = entry
                .file_name()
                .to_str()
                .map(path_guard::is_vcs_metadata)
                .unwrap_or(false);
            if is_vcs {
                return false;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !inherited
                .iter()
                .any(|gi| gi.matched_path_or_any_parents(entry.path(), is_dir).is_ignore())
        })
        .build();

    let mut tree = DirBuilder::default();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let leaf = if is_dir {
            NodeBuilder::Dir(DirBuilder::default())
        } else {
            match entry.metadata() {
                Ok(metadata) => NodeBuilder::File(metadata.len()),
                Err(err) => {
                    tracing::debug!("Skipping {}: {}", entry.path().display(), err);
                    continue;
                }
            }
        };

        tree.insert(&parts, leaf);
    }

    tree.into_nodes()
}
