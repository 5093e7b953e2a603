//! Small filesystem helpers shared by the blob and metadata stores.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::CacheError;

/// Creates `dir` and any missing parents. An existing directory is not an
/// error, so two processes racing to create the store both succeed.
pub(crate) fn ensure_dir(dir: &Path, mode: u32) -> Result<(), CacheError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder
        .create(dir)
        .map_err(|e| CacheError::io("create_dir", dir, e))
}

/// Applies the read-only blob mode to `path`.
pub(crate) fn make_read_only(path: &Path, mode: u32) -> Result<(), CacheError> {
    #[cfg(unix)]
    let perms = {
        use std::os::unix::fs::PermissionsExt;
        fs::Permissions::from_mode(mode)
    };
    #[cfg(not(unix))]
    let perms = {
        let _ = mode;
        let mut perms = fs::metadata(path)
            .map_err(|e| CacheError::io("chmod", path, e))?
            .permissions();
        perms.set_readonly(true);
        perms
    };
    fs::set_permissions(path, perms).map_err(|e| CacheError::io("chmod", path, e))
}

/// Creates a symbolic link at `link` pointing to `target`.
pub(crate) fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(target, link)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (target, link);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "symbolic links are not supported on this platform",
        ))
    }
}

/// Returns `true` if `a` and `b` resolve to the same file, following links.
pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(ca), Ok(cb)) => ca == cb,
            _ => false,
        }
    }
}
