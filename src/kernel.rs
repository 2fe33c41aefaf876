//! Kernel binary file source.
//!
//! Kernels ship alongside the executable; a bare file name is resolved
//! against the executable's directory so the tool works no matter where
//! it is launched from. Binaries are consumed read-only.

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// Longest path accepted before resolution is even attempted.
const MAX_PATH_LEN: usize = 260;

/// Resolve a kernel file name against the executable's directory.
///
/// Absolute paths pass through untouched.
pub fn resolve(file_name: &str) -> Result<PathBuf> {
    if file_name.len() > MAX_PATH_LEN {
        return Err(Error::PathTooLong(file_name.into()));
    }
    let path = Path::new(file_name);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let exe = env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(path))
}

/// Read a kernel binary in full.
pub fn load(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str().len() > MAX_PATH_LEN {
        return Err(Error::PathTooLong(path.display().to_string()));
    }

    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => Error::Unauthorized(path.display().to_string()),
        _ => Error::Io(e),
    })?;

    let expected = file.metadata()?.len() as usize;
    let mut contents = Vec::with_capacity(expected);
    let actual = file.read_to_end(&mut contents)?;
    if actual < expected {
        return Err(Error::Truncated { expected, actual });
    }
    if contents.is_empty() {
        return Err(Error::Truncated {
            expected: 1,
            actual: 0,
        });
    }

    debug!("loaded kernel {} ({} bytes)", path.display(), actual);
    Ok(contents)
}
