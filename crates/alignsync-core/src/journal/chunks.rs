//! BULK_INSERT chunk files
//!
//! Each bulk entry keeps its links in `bulk_insert_<entry-id>.json` inside
//! the project's chunk directory. Files are written atomically (write to a
//! temp file, sync, rename) so a crash never leaves a half-written chunk.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::Link;
use crate::storage::{StorageError, StorageResult};

/// File name of the chunk belonging to a journal entry
pub fn chunk_file_name(entry_id: &str) -> String {
    format!("bulk_insert_{}.json", entry_id)
}

/// Serialize `links` into the chunk file for `entry_id`
///
/// Returns the file name, relative to `dir`.
pub fn write_chunk(dir: &Path, entry_id: &str, links: &[Link]) -> StorageResult<String> {
    let name = chunk_file_name(entry_id);
    let bytes = serde_json::to_vec(links)?;
    atomic_write(&dir.join(&name), &bytes)?;
    Ok(name)
}

/// Read the links stored in a chunk file
pub fn read_chunk(dir: &Path, file_name: &str) -> StorageResult<Vec<Link>> {
    let path = dir.join(file_name);
    let bytes = fs::read(&path).map_err(|e| StorageError::from_read(e, path.clone()))?;
    serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidFormat {
        path,
        details: e.to_string(),
    })
}

/// Delete a chunk file; a file that is already gone is not an error
pub fn remove_chunk(dir: &Path, file_name: &str) -> StorageResult<()> {
    let path = dir.join(file_name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::from_io(e, path)),
    }
}

/// Remove the whole chunk directory of a project
pub fn remove_chunk_dir(dir: &Path) -> StorageResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::from_io(e, dir.to_path_buf())),
    }
}

/// Write data to a file atomically
///
/// 1. Write to a temporary file in the same directory
/// 2. Sync the file to disk
/// 3. Rename the temp file to the target path
fn atomic_write(path: &Path, data: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp_path: PathBuf = path.with_extension("tmp");

    let mut file =
        File::create(&temp_path).map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.write_all(data)
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;
    file.sync_all()
        .map_err(|e| StorageError::from_io(e, temp_path.clone()))?;

    fs::rename(&temp_path, path).map_err(|source| StorageError::AtomicWriteFailed {
        from: temp_path.clone(),
        to: path.to_path_buf(),
        source,
    })?;

    Ok(())
}
