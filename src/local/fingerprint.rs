//! SHA-256 content fingerprints

use std::fs::File;
use std::io;
use std::path::Path;

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{DirsnapError, Result};

/// Lowercase hex SHA-256 of a file, streamed through the hasher
pub fn file_digest(path: &Path) -> Result<String> {
    let fingerprint_err = |source| DirsnapError::Fingerprint {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(fingerprint_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(fingerprint_err)?;
    Ok(hex::encode(hasher.finalize()))
}

/// [`file_digest`] on tokio's blocking pool, so hashing a large file never
/// stalls a runtime worker
pub async fn file_digest_async(path: &Path) -> Result<String> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_digest(&owned))
        .await
        .map_err(|e| DirsnapError::Internal(format!("digest task failed: {}", e)))?
}

/// Lowercase hex SHA-256 of an in-memory buffer
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Base64 form of a hex digest, as S3's `x-amz-checksum-sha256` expects
pub fn digest_to_base64(hex_digest: &str) -> Result<String> {
    let raw = hex::decode(hex_digest)
        .map_err(|e| DirsnapError::Internal(format!("invalid hex digest: {}", e)))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // sha256("x")
    const DIGEST_X: &str = "2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881";

    #[test]
    fn test_file_digest_matches_buffer_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();

        assert_eq!(file_digest(&path).unwrap(), DIGEST_X);
        assert_eq!(digest_bytes(b"x"), DIGEST_X);
    }

    #[test]
    fn test_large_file_streams() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(file_digest(&path).unwrap(), digest_bytes(&data));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = file_digest(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, DirsnapError::Fingerprint { .. }));
    }

    #[tokio::test]
    async fn test_async_digest_matches_sync_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 241) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        assert_eq!(file_digest_async(&path).await.unwrap(), digest_bytes(&data));
        let err = file_digest_async(&dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, DirsnapError::Fingerprint { .. }));
    }

    #[test]
    fn test_base64_checksum() {
        // sha256("") in both encodings
        let hex_empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert_eq!(
            digest_to_base64(hex_empty).unwrap(),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
        assert!(digest_to_base64("zz").is_err());
    }
}
