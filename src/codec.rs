//! Framed snapshot files.
//!
//! ```text
//! magic[4] | version u32 | crc32 u32 | payload_len u64 | payload
//! ```
//! All integers little-endian. Files are written to a sibling temp file,
//! fsynced and renamed into place.

use crate::error::{IndexError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub(crate) const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

pub(crate) fn encode_framed(magic: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(magic);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

pub(crate) fn decode_framed<'a>(magic: &[u8; 4], bytes: &'a [u8], path: &Path) -> Result<&'a [u8]> {
    let corrupt = |reason: &str| IndexError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if bytes.len() < HEADER_LEN {
        return Err(corrupt("truncated header"));
    }
    if &bytes[0..4] != magic {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(&format!("unsupported format version {version}")));
    }
    let crc = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[12..20]);
    let len = u64::from_le_bytes(len_bytes) as usize;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != len {
        return Err(corrupt("payload length mismatch"));
    }
    if crc32fast::hash(payload) != crc {
        return Err(corrupt("checksum mismatch"));
    }
    Ok(payload)
}

/// Replace `path` with `bytes` so readers see either the old or the new
/// file, never a torn one.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_frame_rejects_tampering() {
        let path = Path::new("test.bin");
        let mut bytes = encode_framed(b"TEST", b"hello");
        assert_eq!(decode_framed(b"TEST", &bytes, path).unwrap(), b"hello");
        assert!(decode_framed(b"NOPE", &bytes, path).is_err());

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            decode_framed(b"TEST", &bytes, path),
            Err(IndexError::Corrupt { .. })
        ));
        assert!(decode_framed(b"TEST", &bytes[..10], path).is_err());
    }

    #[test]
    fn test_write_atomically_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        write_atomically(&path, b"one").unwrap();
        write_atomically(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_remove_missing_dir() {
        let dir = tempdir().unwrap();
        remove_dir_if_exists(&dir.path().join("never-created")).unwrap();
    }
}
