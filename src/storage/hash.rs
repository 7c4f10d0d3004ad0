use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::utils::Result;

pub struct HashUtils;

impl HashUtils {
    pub fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Short content-derived identifier for a shared file. The same name,
    /// content hash and size always map to the same id.
    pub fn file_id(name: &str, file_hash: &str, size: u64) -> String {
        let seed = format!("{name}:{file_hash}:{size}");
        let mut id = Self::sha256_hex(seed.as_bytes());
        id.truncate(16);
        id
    }

    pub fn verify(data: &[u8], expected_hex: &str) -> bool {
        Self::sha256_hex(data) == expected_hex
    }

    /// Streaming digest of a whole file on disk.
    pub async fn hash_file(path: &Path) -> Result<String> {
        let mut file = File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 256 * 1024];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_is_deterministic() {
        let a = HashUtils::file_id("report.pdf", "abcd1234", 4096);
        let b = HashUtils::file_id("report.pdf", "abcd1234", 4096);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn file_id_changes_with_any_input() {
        let base = HashUtils::file_id("report.pdf", "abcd1234", 4096);
        assert_ne!(base, HashUtils::file_id("report2.pdf", "abcd1234", 4096));
        assert_ne!(base, HashUtils::file_id("report.pdf", "abcd1235", 4096));
        assert_ne!(base, HashUtils::file_id("report.pdf", "abcd1234", 4097));
    }

    #[test]
    fn verify_detects_corruption() {
        let digest = HashUtils::sha256_hex(b"hello");
        assert!(HashUtils::verify(b"hello", &digest));
        assert!(!HashUtils::verify(b"hellp", &digest));
    }

    #[tokio::test]
    async fn hash_file_matches_in_memory_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sample.bin");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.expect("write");

        let on_disk = HashUtils::hash_file(&path).await.expect("hash");
        assert_eq!(on_disk, HashUtils::sha256_hex(&data));
    }
}
