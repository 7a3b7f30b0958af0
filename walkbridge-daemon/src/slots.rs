//! Request/response files shared with the emulator script.

use std::io::ErrorKind;
use std::path::Path;
use std::time::SystemTime;

/// Modification time of the request file, `None` if it does not exist.
pub fn modified(path: &Path) -> std::io::Result<Option<SystemTime>> {
    match std::fs::metadata(path) {
        Ok(m) => m.modified().map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Whole request file as text. Invalid UTF-8 (binary or half-written content) is replaced, not an error.
pub fn read_request(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Overwrite the response file with raw reply bytes (zero length allowed).
pub fn write_response(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}
