//! Atomic file replacement
//!
//! Every piece of harvest state that must survive a crash (progress files,
//! candidate-id caches, downloaded images) is written through
//! [`write_atomic`]: the bytes go to a temporary file in the destination's
//! directory, are flushed to disk, and the temporary file is renamed over the
//! destination. A reader therefore sees either the previous complete file or
//! the new complete file, never a truncated one.

use crate::error::{CommonError, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic_with(path, |file| file.write_all(bytes))
}

/// Atomically replace `path` with whatever `write` produces.
///
/// If `write` fails, the temporary file is removed and `path` is left
/// untouched.
pub fn write_atomic_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if path.file_name().is_none() {
        return Err(CommonError::InvalidPath(path.display().to_string()));
    }

    std::fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    write(temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| CommonError::Io(e.error))?;
    Ok(())
}
