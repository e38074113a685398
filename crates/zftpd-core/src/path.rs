//! Chroot-aware path normalization and resolution.
//!
//! Every command handler that touches the filesystem on behalf of a client
//! must route the client-supplied argument through [`resolve`] first; no
//! other entry point is permitted to reach a filesystem syscall with raw
//! client input. Symbolic links are never expanded here — escape via a
//! symlink is prevented instead by canonicalizing the session root once at
//! connect time, so every later prefix comparison is textually sound.

use crate::error::{Error, Result};

/// Maximum number of path components accepted by [`normalize`].
pub const MAX_PATH_DEPTH: usize = 32;

/// Maximum output length accepted by [`normalize`], matching the POSIX
/// `PATH_MAX` convention used throughout the configuration surface.
pub const MAX_PATH_LEN: usize = 4096;

/// Collapse `.`, `..`, and duplicate separators out of `input`.
///
/// `..` pops the last pushed component if any remain, or is silently
/// dropped — a normalized path can never climb above the root of the input
/// it was given, which is what lets [`resolve`] rely on simple prefix
/// comparison afterward.
pub fn normalize(input: &str) -> Result<String> {
    let mut stack: Vec<&str> = Vec::new();

    for component in input.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => {
                if stack.len() >= MAX_PATH_DEPTH {
                    return Err(Error::PathTooLong);
                }
                stack.push(other);
            }
        }
    }

    let result = if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    };

    if result.len() > MAX_PATH_LEN {
        return Err(Error::PathTooLong);
    }

    Ok(result)
}

/// Join `cwd` and a user-supplied `input`, normalize, and verify the result
/// stays within `root`.
///
/// `input` beginning with `/` is treated as absolute (relative to `root`,
/// not the host filesystem); anything else is resolved relative to `cwd`.
/// The returned string is guaranteed to satisfy
/// `is_within_root(result, root) == true`.
pub fn resolve(root: &str, cwd: &str, input: &str) -> Result<String> {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{cwd}/{input}")
    };

    let normalized = normalize(&joined)?;
    let candidate = if normalized == "/" {
        root.to_string()
    } else {
        format!("{}{}", root.trim_end_matches('/'), normalized)
    };
    let candidate = normalize(&candidate).unwrap_or(candidate);

    if is_within_root(&candidate, root) {
        Ok(candidate)
    } else {
        Err(Error::PathInvalid(candidate.into()))
    }
}

/// `true` iff `path` equals `root`, or `path` starts with `root` followed
/// immediately by `/`. A root of `"/"` matches every path.
pub fn is_within_root(path: &str, root: &str) -> bool {
    if root == "/" {
        return true;
    }
    if path == root {
        return true;
    }
    match path.strip_prefix(root) {
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Reject paths containing a NUL byte or any character outside
/// `{alphanumeric, '/', '.', '-', '_', space}`.
///
/// This is an additional filter applied before filesystem operations in the
/// HTTP browser's server-embedded tooling; the FTP core's own security
/// relies solely on [`resolve`]'s chroot enforcement.
pub fn is_safe(path: &str) -> bool {
    path.bytes().all(|b| {
        b == b'/' || b == b'.' || b == b'-' || b == b'_' || b == b' ' || b.is_ascii_alphanumeric()
    }) && !path.contains('\0')
}

/// Return the final path component, or `"/"` for the root itself.
pub fn basename(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Return the parent directory of `path`, or `"/"` if `path` has no parent.
pub fn dirname(path: &str) -> &str {
    if path == "/" {
        return "/";
    }
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

/// Join two path segments with a single separating `/`.
pub fn join(base: &str, segment: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), segment.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dot_and_dotdot() {
        assert_eq!(normalize("/a/./b/../c").unwrap(), "/a/c");
        assert_eq!(normalize("a//b///c").unwrap(), "/a/b/c");
        assert_eq!(normalize("..").unwrap(), "/");
        assert_eq!(normalize("../../..").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["/a/b/c", "/a/./b/../c", "..", "/", "a/b"] {
            let once = normalize(p).unwrap();
            let twice = normalize(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalize_rejects_too_many_components() {
        let deep: String = (0..200).map(|i| format!("/d{i}")).collect();
        assert!(matches!(normalize(&deep), Err(Error::PathTooLong)));
    }

    #[test]
    fn is_within_root_matches_spec_rule() {
        assert!(is_within_root("/srv/root", "/srv/root"));
        assert!(is_within_root("/srv/root/sub", "/srv/root"));
        assert!(!is_within_root("/srv/rootevil", "/srv/root"));
        assert!(is_within_root("/anything", "/"));
    }

    #[test]
    fn resolve_rejects_traversal_above_root() {
        let result = resolve("/srv/root", "/srv/root", "../etc");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "/srv/root");
    }

    #[test]
    fn resolve_stays_within_root_for_nested_traversal() {
        let result = resolve("/srv/root", "/srv/root/a/b", "../../../../etc/passwd").unwrap();
        assert!(is_within_root(&result, "/srv/root"));
    }

    #[test]
    fn resolve_handles_absolute_input() {
        let result = resolve("/srv/root", "/srv/root/sub", "/other/dir").unwrap();
        assert_eq!(result, "/srv/root/other/dir");
    }

    #[test]
    fn is_safe_rejects_nul_and_shell_metacharacters() {
        assert!(is_safe("/a/b-c_d.e f"));
        assert!(!is_safe("/a;rm -rf"));
        assert!(!is_safe("/a\0b"));
    }

    #[test]
    fn basename_and_dirname_roundtrip() {
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(basename("/"), "/");
        assert_eq!(dirname("/"), "/");
        assert_eq!(dirname("/a"), "/");
    }
}
