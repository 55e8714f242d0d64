//! Content digests.
//!
//! Registries address every blob by the SHA-256 of its exact bytes. Layers
//! additionally carry a diff-id: the SHA-256 of their *decompressed* tar
//! stream. Both are rendered as `sha256:<hex>`; this module computes them
//! with streaming readers so large layers never need to fit in memory.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use hoist_core::error::{HoistError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

const ALGORITHM: &str = "sha256";

/// A validated `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Build a digest from a finished hasher.
    fn from_hasher(hasher: Sha256) -> Self {
        Self {
            hex: hex::encode(hasher.finalize()),
        }
    }

    /// Hex part of the digest, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn algorithm(&self) -> &str {
        ALGORITHM
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", ALGORITHM, self.hex)
    }
}

impl FromStr for Digest {
    type Err = HoistError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| {
            HoistError::Other(format!("Invalid digest '{}': expected algorithm:hex", s))
        })?;

        if algorithm != ALGORITHM {
            return Err(HoistError::Other(format!(
                "Unsupported digest algorithm '{}' in '{}'",
                algorithm, s
            )));
        }

        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HoistError::Other(format!(
                "Invalid digest '{}': expected 64 hex characters",
                s
            )));
        }

        Ok(Self {
            hex: hex.to_ascii_lowercase(),
        })
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// SHA-256 over the exact byte stream.
pub fn digest_of_reader<R: Read>(mut reader: R) -> std::io::Result<(Digest, u64)> {
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut reader, &mut hasher)?;
    Ok((Digest::from_hasher(hasher), size))
}

/// SHA-256 of an in-memory blob.
pub fn digest_of_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest::from_hasher(hasher)
}

/// Digest and size of a file on disk.
pub fn digest_of_file(path: &Path) -> Result<(Digest, u64)> {
    let file = std::fs::File::open(path).map_err(|e| {
        HoistError::Build(format!(
            "Failed to open {} for hashing: {}",
            path.display(),
            e
        ))
    })?;
    digest_of_reader(std::io::BufReader::new(file)).map_err(|e| {
        HoistError::Build(format!("Failed to hash {}: {}", path.display(), e))
    })
}

/// Decompress a gzip stream and digest the resulting bytes (the layer diff-id).
///
/// `name` identifies the stream in errors.
pub fn digest_of_decompressed_tar<R: Read>(gzip_stream: R, name: &str) -> Result<Digest> {
    let decoder = flate2::read::GzDecoder::new(gzip_stream);
    let (digest, _) = digest_of_reader(decoder).map_err(|e| HoistError::CorruptArchive {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    Ok(digest)
}

/// Diff-id of a compressed layer file.
pub fn diff_id_of_file(path: &Path) -> Result<Digest> {
    let file = std::fs::File::open(path).map_err(|e| {
        HoistError::Build(format!(
            "Failed to open layer {} for diff_id: {}",
            path.display(),
            e
        ))
    })?;
    digest_of_decompressed_tar(std::io::BufReader::new(file), &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    // Known SHA256 of "hello"
    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_digest_of_bytes() {
        assert_eq!(digest_of_bytes(b"hello").to_string(), HELLO);
    }

    #[test]
    fn test_digest_of_reader_matches_bytes() {
        let (digest, size) = digest_of_reader(&b"hello"[..]).unwrap();
        assert_eq!(digest, digest_of_bytes(b"hello"));
        assert_eq!(size, 5);
    }

    #[test]
    fn test_digest_of_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("blob");
        std::fs::write(&path, "hello").unwrap();

        let (digest, size) = digest_of_file(&path).unwrap();
        assert_eq!(digest.to_string(), HELLO);
        assert_eq!(size, 5);
    }

    #[test]
    fn test_decompressed_digest_differs_from_blob_digest() {
        let compressed = gzip(b"hello");
        let diff_id = digest_of_decompressed_tar(&compressed[..], "test").unwrap();
        assert_eq!(diff_id.to_string(), HELLO);
        assert_ne!(digest_of_bytes(&compressed), diff_id);
    }

    #[test]
    fn test_decompressed_digest_rejects_non_gzip() {
        let result = digest_of_decompressed_tar(&b"definitely not gzip"[..], "bogus.tar.gz");
        match result {
            Err(HoistError::CorruptArchive { name, .. }) => assert_eq!(name, "bogus.tar.gz"),
            other => panic!("expected CorruptArchive, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_digest() {
        let digest: Digest = HELLO.parse().unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(
            digest.hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(digest.to_string(), HELLO);
    }

    #[test]
    fn test_parse_digest_normalizes_case() {
        let upper = HELLO.replace("2cf24dba", "2CF24DBA");
        let digest: Digest = upper.parse().unwrap();
        assert_eq!(digest.to_string(), HELLO);
    }

    #[test]
    fn test_parse_digest_invalid() {
        assert!("2cf24dba".parse::<Digest>().is_err());
        assert!("sha512:abcd".parse::<Digest>().is_err());
        assert!("sha256:xyz".parse::<Digest>().is_err());
        assert!("sha256:abcd".parse::<Digest>().is_err());
    }

    #[test]
    fn test_digest_serde() {
        let digest = digest_of_bytes(b"hello");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", HELLO));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"sha256:nothex\"").is_err());
    }
}
