use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Path of the temporary sibling used to stage a replacement of `path`.
///
/// The temp file lives in the same directory as `path` so the final rename
/// never crosses a filesystem boundary.
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ))
}

/// Replace `path` with the staged file at `temp`.
///
/// # Errors
/// Returns an error if the rename (and, on Windows, the copy fallback) fails.
/// The temp file is removed on failure.
pub fn replace_with(temp: &Path, path: &Path) -> io::Result<()> {
    match fs::rename(temp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists. Try copy + remove as fallback.
            if cfg!(windows) {
                let copied = fs::copy(temp, path).map(|_| ());
                let _ = fs::remove_file(temp);
                copied
            } else {
                let _ = fs::remove_file(temp);
                Err(e)
            }
        }
    }
}

/// Whether `path` lives inside a `node_modules` directory.
#[must_use]
pub fn is_in_node_modules(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == std::ffi::OsStr::new("node_modules"))
}
