//! Content fingerprints (128-bit MD5 digests of a file's bytes).
//!
//! Fingerprints are a function of content only: two files with the same bytes
//! always share a fingerprint regardless of name, mtime or permissions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Read buffer used while streaming file content through the digest
const CHUNK_SIZE: usize = 64 * 1024;

/// A 128-bit content digest, rendered as lowercase hex on the wire.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ContentFingerprint([u8; 16]);

impl ContentFingerprint {
    /// Fingerprint of an in-memory buffer
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFingerprint({})", self.to_hex())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Stream a file through the digest without loading it whole.
pub async fn fingerprint_file(path: &Path) -> io::Result<ContentFingerprint> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }

    Ok(ContentFingerprint(context.compute().0))
}

/// Copy `src` to `dest` and fingerprint the copied bytes in the same pass.
///
/// `dest` is truncated if it exists. Returns the fingerprint and byte count.
pub async fn copy_with_fingerprint(src: &Path, dest: &Path) -> io::Result<(ContentFingerprint, u64)> {
    let mut reader = tokio::fs::File::open(src).await?;
    let mut writer = tokio::fs::File::create(dest).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }

    writer.flush().await?;
    writer.sync_all().await?;

    Ok((ContentFingerprint(context.compute().0), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_known_digest() {
        let fp = ContentFingerprint::of_bytes(b"The quick brown fox jumps over the lazy dog");
        assert_eq!(fp.to_hex(), "9e107d9d372bb6826bd81d3542a419d6");
    }

    #[test]
    fn test_hex_parsing() {
        let fp = ContentFingerprint::from_hex("9e107d9d372bb6826bd81d3542a419d6").unwrap();
        assert_eq!(fp.to_string(), "9e107d9d372bb6826bd81d3542a419d6");

        assert!(ContentFingerprint::from_hex("9e107d").is_err());
        assert!(ContentFingerprint::from_hex("zz107d9d372bb6826bd81d3542a419d6").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = ContentFingerprint::of_bytes(b"");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, "\"d41d8cd98f00b204e9800998ecf8427e\"");

        let back: ContentFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }

    #[tokio::test]
    async fn test_fingerprint_file_matches_bytes() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("big.bin");
        // Spans several read chunks
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data)?;

        assert_eq!(fingerprint_file(&path).await?, ContentFingerprint::of_bytes(&data));
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_with_fingerprint() -> io::Result<()> {
        let dir = TempDir::new()?;
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        std::fs::write(&src, b"mirror me")?;
        std::fs::write(&dest, b"stale content that is longer")?;

        let (fp, bytes) = copy_with_fingerprint(&src, &dest).await?;

        assert_eq!(bytes, 9);
        assert_eq!(std::fs::read(&dest)?, b"mirror me");
        assert_eq!(fp, ContentFingerprint::of_bytes(b"mirror me"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = fingerprint_file(&dir.path().join("nope")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
