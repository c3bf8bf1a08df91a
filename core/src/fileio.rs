//! Blocking filesystem load/save helpers backing the file transfer mode (§1 scope note: treated
//! as plain byte I/O, not a component in its own right).
use flux::error::{Error, Result};
use std::fs;

pub fn load_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::FileIo(format!("load {}: {}", path, e)))
}

/// Saves `bytes` to `path`, creating parent directories as needed. Returns `path` back on
/// success so the caller can echo it into a file-notify message; callers treat a `FileIo` error
/// here as non-fatal and emit a notify with an empty path instead (§7).
pub fn save_file(path: &str, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| Error::FileIo(format!("mkdir {}: {}", path, e)))?;
        }
    }
    fs::write(path, bytes).map_err(|e| Error::FileIo(format!("save {}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("core-proto-fileio-test-{}", std::process::id()));
        let path = dir.join("payload.bin");
        let path_str = path.to_str().unwrap();

        save_file(path_str, b"hello file").expect("save");
        let loaded = load_file(path_str).expect("load");
        assert_eq!(loaded, b"hello file");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_missing_file_is_a_file_io_error() {
        assert!(load_file("/nonexistent/path/for/testing").is_err());
    }
}
