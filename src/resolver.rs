//! Safe-root path resolution.
//!
//! Every path handed to govguard passes through [`SafePathResolver::resolve`].
//! The input is first normalized lexically against the root; anything that
//! escapes is rejected before the filesystem is touched. Only then is the
//! longest existing prefix canonicalized, which catches symlinks that point
//! outside the root. Resolution never creates anything.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{GovernanceError, Result};

/// Links followed while resolving a dangling symlink before giving up.
const MAX_LINK_HOPS: usize = 40;

/// Resolves and bounds paths to a canonical safe root.
#[derive(Debug, Clone)]
pub struct SafePathResolver {
    root: PathBuf,
    /// The root as configured, lexically normalized. Differs from `root`
    /// when the configured spelling passes through a symlink.
    configured: PathBuf,
}

/// A path proven to live inside the safe root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    absolute: PathBuf,
    relative: PathBuf,
}

impl ResolvedPath {
    /// Canonical absolute path.
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Path relative to the safe root (empty for the root itself).
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// `/`-separated relative path, used as the lookup and lock key.
    pub fn key(&self) -> String {
        path_key(&self.relative)
    }
}

impl SafePathResolver {
    /// Create a resolver for `root`, which must be an existing absolute directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(GovernanceError::Config(format!(
                "safe root must be absolute: {}",
                root.display()
            )));
        }
        let canonical = root.canonicalize().map_err(|e| {
            GovernanceError::Config(format!("cannot resolve safe root {}: {}", root.display(), e))
        })?;
        if !canonical.is_dir() {
            return Err(GovernanceError::Config(format!(
                "safe root is not a directory: {}",
                canonical.display()
            )));
        }
        let configured = normalize_lexically(root).unwrap_or_else(|| canonical.clone());
        Ok(Self {
            root: canonical,
            configured,
        })
    }

    /// The canonical safe root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` (relative to the root, or absolute) to a canonical path
    /// inside the root.
    ///
    /// Fails with [`GovernanceError::PathSecurity`] if the path escapes,
    /// either lexically via `..` or through a symlink.
    pub fn resolve(&self, raw: &str) -> Result<ResolvedPath> {
        if raw.contains('\0') {
            return Err(GovernanceError::security(raw, &self.root));
        }

        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        // Lexical pass: no I/O happens for traversal attempts.
        let normalized = normalize_lexically(&joined)
            .map(|p| self.rebase(p))
            .filter(|p| p.starts_with(&self.root))
            .ok_or_else(|| GovernanceError::security(raw, &self.root))?;

        let canonical = canonicalize_existing_prefix(&normalized)
            .ok_or_else(|| GovernanceError::security(raw, &self.root))?;
        let relative = canonical
            .strip_prefix(&self.root)
            .map_err(|_| GovernanceError::security(raw, &self.root))?
            .to_path_buf();

        Ok(ResolvedPath {
            absolute: canonical,
            relative,
        })
    }

    /// Move a path spelled with the configured root onto the canonical one.
    fn rebase(&self, path: PathBuf) -> PathBuf {
        if self.configured == self.root {
            return path;
        }
        match path.strip_prefix(&self.configured) {
            Ok(rest) => self.root.join(rest),
            Err(_) => path,
        }
    }
}

/// Join path components with `/` regardless of platform.
pub fn path_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Collapse `.` and `..` without touching the filesystem.
///
/// Returns `None` if `..` would climb above the filesystem root.
fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}

/// Canonicalize the deepest existing ancestor of `path` and re-attach the
/// missing tail. The tail does not exist, so it cannot contain symlinks.
///
/// A dangling symlink resolves to the missing path it names. Returns `None`
/// for link cycles.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    canonicalize_within_hops(path, MAX_LINK_HOPS)
}

fn canonicalize_within_hops(path: &Path, hops: usize) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        match fs::symlink_metadata(&existing) {
            Ok(meta) => {
                let mut resolved = match existing.canonicalize() {
                    Ok(resolved) => resolved,
                    Err(_) if meta.file_type().is_symlink() && hops > 0 => {
                        let target = fs::read_link(&existing).ok()?;
                        let target = match existing.parent() {
                            Some(parent) if target.is_relative() => parent.join(target),
                            _ => target,
                        };
                        canonicalize_within_hops(&normalize_lexically(&target)?, hops - 1)?
                    }
                    Err(_) => return None,
                };
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Some(resolved);
            }
            Err(_) => {
                let name = existing.file_name()?.to_os_string();
                tail.push(name);
                if !existing.pop() {
                    return None;
                }
            }
        }
    }
}
