//! Writing decrypted payloads to local disk

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;

use geocrypt_core::types::SharePayload;
use geocrypt_core::{GeocryptError, GeocryptResult};

/// Write `payload` into `dir` under its own filename and return the path.
///
/// Only the final component of the stored filename is used, so a record
/// cannot direct the write outside `dir`.
pub async fn write_payload(dir: &Path, payload: &SharePayload) -> GeocryptResult<PathBuf> {
    let name = Path::new(&payload.filename)
        .file_name()
        .filter(|n| !n.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("download.bin"));
    let dest = dir.join(name);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| map_io(e, dir))?;
    tokio::fs::write(&dest, &payload.bytes)
        .await
        .map_err(|e| map_io(e, &dest))?;

    info!(path = %dest.display(), bytes = payload.bytes.len(), "payload saved");
    Ok(dest)
}

fn map_io(e: std::io::Error, path: &Path) -> GeocryptError {
    if e.kind() == ErrorKind::PermissionDenied {
        GeocryptError::PermissionDenied(path.display().to_string())
    } else {
        GeocryptError::Io(e)
    }
}
