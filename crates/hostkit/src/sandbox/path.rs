//! Sandboxed path resolution.
//!
//! A requested path is made absolute (relative paths join the first root),
//! then resolved one component at a time: every existing prefix is checked
//! for a symlink and the link target is followed, `..` pops the resolved
//! prefix, and components that do not exist are appended as-is. Containment
//! is checked on the fully resolved path, so an escape is rejected the same
//! way whether the target exists or not.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Links followed before giving up (matches the usual kernel `MAXSYMLINKS`).
const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathDenied {
    Empty,
    NoRoots,
    SymlinkLoop,
    Escape(PathBuf),
}

/// Resolve `raw` and require it to lie inside one of `roots`.
///
/// `roots` must already be canonical (see [`SandboxPolicy::prepare`]).
///
/// [`SandboxPolicy::prepare`]: crate::config::SandboxPolicy::prepare
pub fn resolve_within(raw: &str, roots: &[PathBuf]) -> Result<PathBuf, PathDenied> {
    if raw.trim().is_empty() {
        return Err(PathDenied::Empty);
    }
    let requested = Path::new(raw);
    let absolute = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        roots.first().ok_or(PathDenied::NoRoots)?.join(requested)
    };

    let resolved = resolve_symlinks(&absolute)?;
    if roots.iter().any(|root| resolved.starts_with(root)) {
        Ok(resolved)
    } else {
        Err(PathDenied::Escape(resolved))
    }
}

/// Split a path into its anchor (prefix and root) and the remaining names,
/// with `.` dropped and `..` kept as a name.
fn split(path: &Path) -> (PathBuf, Vec<OsString>) {
    let mut anchor = PathBuf::new();
    let mut names = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => anchor.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => names.push(OsString::from("..")),
            Component::Normal(name) => names.push(name.to_os_string()),
        }
    }
    (anchor, names)
}

fn resolve_symlinks(path: &Path) -> Result<PathBuf, PathDenied> {
    let (mut resolved, names) = split(path);
    let mut pending: Vec<OsString> = names.into_iter().rev().collect();
    let mut hops = 0;

    while let Some(name) = pending.pop() {
        if name == ".." {
            resolved.pop();
            continue;
        }
        resolved.push(&name);

        let is_link = std::fs::symlink_metadata(&resolved)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            continue;
        }

        hops += 1;
        if hops > MAX_SYMLINK_HOPS {
            return Err(PathDenied::SymlinkLoop);
        }
        let target = std::fs::read_link(&resolved).map_err(|_| PathDenied::SymlinkLoop)?;
        resolved.pop();
        let (anchor, target_names) = split(&target);
        if target.is_absolute() {
            resolved = anchor;
        }
        pending.extend(target_names.into_iter().rev());
    }

    Ok(resolved)
}
